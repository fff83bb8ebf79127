//! Example: tracking one vehicle live
//!
//! Reads shard endpoints from `FLEET_BACKEND_ENDPOINT1..3` and
//! `FLEET_AUTH_ENDPOINT`, remembers the vehicle in the recently viewed list
//! and logs every location until Ctrl+C.
//!
//! Run with: cargo run --example track -- BUS-42 [state-dir]

use fleet_tracker::{
    ConnectionState, Entity, FileStore, IdentitySource, IdentityStore, LiveLocationStream,
    LocationListener, LocationSample, RecentCache, TrackerConfig, WsTransport,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Logs everything the stream reports
struct LogListener;

impl LocationListener for LogListener {
    fn on_sample(&self, entity_id: &str, sample: &LocationSample) {
        info!(
            "[{}] lat={:.6} long={:.6} t={}",
            entity_id, sample.latitude, sample.longitude, sample.timestamp
        );
    }

    fn on_state_change(&self, entity_id: &str, state: ConnectionState) {
        info!("[{}] {:?}", entity_id, state);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; RUST_LOG=fleet_tracker=debug shows reconnects
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let entity_id = args.next().ok_or("usage: track <vehicle-id> [state-dir]")?;
    let state_dir = args.next().unwrap_or_else(|| ".fleet-tracker".to_string());

    let config = TrackerConfig::from_env()?;
    let store = Arc::new(FileStore::open(state_dir).await?);
    let identity = Arc::new(IdentityStore::load(store.clone()).await);

    info!(
        "Partition key {:?} routes to {}",
        identity.partition_key(),
        config.shards.lookup(identity.partition_key()).endpoint
    );

    let recent = RecentCache::new(store, &config.recent);
    recent.subscribe(|| info!("Recently viewed list changed"));
    recent
        .add(Entity::new(serde_json::json!({ "obu_id": entity_id })))
        .await;
    info!("Recently viewed: {} vehicles", recent.list().await.len());

    let stream = LiveLocationStream::new(&config, identity, WsTransport::new());
    let handle = stream.track(entity_id, None, LogListener);

    info!("Tracking... Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    handle.cancel();

    let snapshot = stream.metrics().snapshot();
    info!("Final metrics:");
    info!("  Connections: {}", snapshot.connections_total);
    info!("  Reconnect attempts: {}", snapshot.reconnect_attempts_total);
    info!("  Samples accepted: {}", snapshot.samples_accepted_total);
    info!("  Samples dropped: {}", snapshot.samples_dropped_total);

    Ok(())
}
