//! Client identity: the partition key that selects a shard and the bearer
//! credential attached to authenticated requests.

use crate::router::PartitionKey;
use crate::storage::KeyValueStore;
use crate::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default storage key for the persisted identity
pub const DEFAULT_IDENTITY_KEY: &str = "identity";

/// Opaque bearer credential.
///
/// The token never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token
    pub fn token(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Provides the current client identity.
///
/// Reads must be cheap and non-blocking: the stream worker calls
/// [`partition_key`](IdentitySource::partition_key) before every
/// connection attempt.
pub trait IdentitySource: Send + Sync + 'static {
    /// Partition key, `None` when unknown
    fn partition_key(&self) -> Option<PartitionKey>;

    /// Bearer credential, `None` for anonymous clients
    fn credential(&self) -> Option<Credential>;
}

/// A fixed identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Partition key; stored either as a number or as text
    #[serde(default, deserialize_with = "lenient_partition_key")]
    pub partition_key: Option<PartitionKey>,
    /// Bearer credential
    #[serde(default)]
    pub credential: Option<Credential>,
}

impl Identity {
    /// Anonymous identity with no partition key
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Identity with a key and optional credential
    pub fn new(partition_key: Option<PartitionKey>, credential: Option<Credential>) -> Self {
        Self {
            partition_key,
            credential,
        }
    }
}

impl IdentitySource for Identity {
    fn partition_key(&self) -> Option<PartitionKey> {
        self.partition_key
    }

    fn credential(&self) -> Option<Credential> {
        self.credential.clone()
    }
}

fn lenient_partition_key<'de, D>(deserializer: D) -> std::result::Result<Option<PartitionKey>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawKey {
        Number(i64),
        Text(String),
    }

    Ok(match Option::<RawKey>::deserialize(deserializer)? {
        Some(RawKey::Number(n)) => Some(PartitionKey::new(n)),
        Some(RawKey::Text(s)) => PartitionKey::parse(&s),
        None => None,
    })
}

/// Identity persisted under one storage key.
///
/// Loaded once at startup and cached in memory; setters write through.
/// Setters are serialized, so storage always ends up holding the last
/// identity written to memory. A setter whose write fails leaves the
/// in-memory identity unchanged and returns the storage error.
pub struct IdentityStore<S: KeyValueStore> {
    store: Arc<S>,
    storage_key: String,
    current: RwLock<Identity>,
    // Held across update + persist; readers only take `current`
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> IdentityStore<S> {
    /// Load the identity stored under [`DEFAULT_IDENTITY_KEY`]
    pub async fn load(store: Arc<S>) -> Self {
        Self::load_from(store, DEFAULT_IDENTITY_KEY).await
    }

    /// Load the identity stored under `storage_key`.
    ///
    /// Missing, unreadable or corrupt content yields an anonymous identity.
    pub async fn load_from(store: Arc<S>, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let identity = match store.get(&storage_key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding corrupt stored identity: {}", e);
                Identity::anonymous()
            }),
            Ok(None) => Identity::anonymous(),
            Err(e) => {
                warn!("Failed to read stored identity: {}", e);
                Identity::anonymous()
            }
        };

        debug!(
            "Loaded identity (partition_key={:?}, authenticated={})",
            identity.partition_key,
            identity.credential.is_some()
        );

        Self {
            store,
            storage_key,
            current: RwLock::new(identity),
            write_lock: Mutex::new(()),
        }
    }

    /// Snapshot of the current identity
    pub fn identity(&self) -> Identity {
        self.current.read().clone()
    }

    /// Replace the partition key and persist
    pub async fn set_partition_key(&self, key: Option<PartitionKey>) -> Result<()> {
        self.update(|identity| identity.partition_key = key).await
    }

    /// Replace the credential and persist
    pub async fn set_credential(&self, credential: Option<Credential>) -> Result<()> {
        self.update(|identity| identity.credential = credential).await
    }

    /// Forget both key and credential
    pub async fn sign_out(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(&self.storage_key).await?;
        *self.current.write() = Identity::anonymous();
        Ok(())
    }

    async fn update(&self, change: impl FnOnce(&mut Identity) + Send) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut next = self.identity();
        change(&mut next);

        let encoded = serde_json::to_string(&next)?;
        if let Err(e) = self.store.set(&self.storage_key, encoded).await {
            warn!("Failed to persist identity, keeping previous: {}", e);
            return Err(e);
        }

        *self.current.write() = next;
        Ok(())
    }
}

impl<S: KeyValueStore> IdentitySource for IdentityStore<S> {
    fn partition_key(&self) -> Option<PartitionKey> {
        self.current.read().partition_key
    }

    fn credential(&self) -> Option<Credential> {
        self.current.read().credential.clone()
    }
}
