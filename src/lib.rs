//! # fleet-tracker
//!
//! Client-side core for live vehicle tracking against a sharded backend.
//!
//! ## Features
//!
//! - **Shard routing** of a client's partition key to a backend endpoint
//! - **Live location streams** with auto-reconnection and exponential backoff
//! - **Ordering and staleness**: out-of-order and duplicate samples are dropped
//! - **Cancellable sessions**: no callbacks after cancel, drop cancels
//! - **Recently viewed** entities, persisted and observable
//! - **Metrics** for observability
//!
//! ## Example
//!
//! ```ignore
//! use fleet_tracker::{
//!     FileStore, IdentityStore, LiveLocationStream, LocationSample, TrackerConfig, WsTransport,
//! };
//! use std::sync::Arc;
//!
//! let config = TrackerConfig::from_env()?;
//! let store = Arc::new(FileStore::open("./state").await?);
//! let identity = Arc::new(IdentityStore::load(store.clone()).await);
//!
//! let stream = LiveLocationStream::new(&config, identity, WsTransport::new());
//! let handle = stream.track("BUS-42", None, |id: &str, sample: &LocationSample| {
//!     println!("{} at {},{}", id, sample.latitude, sample.longitude);
//! });
//! ```

mod config;
mod connection;
mod entity;
mod error;
mod health;
mod identity;
mod listener;
mod metrics;
mod mock;
mod recent;
mod router;
mod sample;
mod session;
mod storage;
mod tracker;
mod transport;

pub use config::{
    BackoffConfig, ConfigError, RecentConfig, StreamConfig, TrackerConfig, TrackerConfigBuilder,
};
pub use entity::{Entity, EntityKey};
pub use error::{Error, ErrorKind};
pub use identity::{Credential, Identity, IdentitySource, IdentityStore, DEFAULT_IDENTITY_KEY};
pub use listener::LocationListener;
pub use metrics::{MetricsSnapshot, StreamMetrics};
pub use recent::{Observer, ObserverToken, RecentCache, RecentList, RecentTarget};
pub use router::{PartitionKey, Purpose, ShardEntry, ShardRouter, ShardTable};
pub use sample::{LocationSample, SampleError, SampleGate, SampleVerdict};
pub use session::{ConnectionState, SessionSnapshot};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use tracker::{LiveLocationStream, TrackingHandle};
pub use transport::{Frame, FrameStream, StreamRequest, StreamTransport, WsTransport};

// Scripted transport for the integration tests; not part of the supported API
#[doc(hidden)]
pub use mock::{ConnectAttempt, MockFeed, MockTransport};

/// Result type for fleet-tracker operations
pub type Result<T> = std::result::Result<T, Error>;
