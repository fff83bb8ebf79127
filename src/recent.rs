use crate::config::RecentConfig;
use crate::entity::{Entity, EntityKey};
use crate::storage::KeyValueStore;
use crate::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Recently viewed entities, most recent first
pub type RecentList = Vec<Entity>;

/// Callback invoked after every successful cache mutation
pub type Observer = Arc<dyn Fn() + Send + Sync>;

/// Handle identifying one registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

/// What to remove from the cache
#[derive(Debug, Clone)]
pub enum RecentTarget {
    /// Remove whatever shares this entity's identity key
    Entity(Entity),
    /// Remove by raw identity key
    Key(EntityKey),
}

impl RecentTarget {
    fn key(&self) -> Option<EntityKey> {
        match self {
            RecentTarget::Entity(entity) => entity.identity_key(),
            RecentTarget::Key(key) => Some(key.clone()),
        }
    }
}

impl From<Entity> for RecentTarget {
    fn from(entity: Entity) -> Self {
        RecentTarget::Entity(entity)
    }
}

impl From<EntityKey> for RecentTarget {
    fn from(key: EntityKey) -> Self {
        RecentTarget::Key(key)
    }
}

impl From<&str> for RecentTarget {
    fn from(key: &str) -> Self {
        RecentTarget::Key(EntityKey::from(key))
    }
}

impl From<String> for RecentTarget {
    fn from(key: String) -> Self {
        RecentTarget::Key(EntityKey::from(key))
    }
}

/// Observers owned by one cache instance
#[derive(Default)]
struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<HashMap<u64, Observer>>,
}

impl ObserverRegistry {
    fn register(&self, observer: Observer) -> ObserverToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().insert(id, observer);
        ObserverToken(id)
    }

    fn deregister(&self, token: ObserverToken) -> bool {
        self.observers.write().remove(&token.0).is_some()
    }

    fn len(&self) -> usize {
        self.observers.read().len()
    }

    fn notify(&self) {
        // Snapshot so observers may (un)subscribe from inside the callback
        let observers: Vec<Observer> = self.observers.read().values().cloned().collect();
        for observer in observers {
            observer();
        }
    }
}

/// Bounded, persisted list of recently viewed entities.
///
/// Every mutation is a read-modify-write of the whole list performed under
/// one async mutex, so concurrent `add`/`remove` calls never lose updates.
/// Storage failures are logged and leave the list unchanged; they never
/// reach the caller.
pub struct RecentCache<S: KeyValueStore> {
    store: Arc<S>,
    storage_key: String,
    max_entries: usize,
    lock: Mutex<()>,
    observers: ObserverRegistry,
}

impl<S: KeyValueStore> RecentCache<S> {
    /// Create a cache over `store`
    pub fn new(store: Arc<S>, config: &RecentConfig) -> Self {
        Self {
            store,
            storage_key: config.storage_key.clone(),
            max_entries: config.max_entries.max(1),
            lock: Mutex::new(()),
            observers: ObserverRegistry::default(),
        }
    }

    /// Maximum number of remembered entities
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Current list, most recent first.
    ///
    /// Empty when storage is empty, unreadable or corrupt.
    pub async fn list(&self) -> RecentList {
        let _guard = self.lock.lock().await;
        self.read_list().await
    }

    /// Put `entity` at the front, dropping any older copy of it.
    pub async fn add(&self, entity: Entity) {
        let Some(key) = entity.identity_key() else {
            warn!("Ignoring recent entity without a usable identity");
            return;
        };

        {
            let _guard = self.lock.lock().await;
            let mut list = self.read_list().await;
            list.retain(|e| e.identity_key().as_ref() != Some(&key));
            list.insert(0, entity);
            list.truncate(self.max_entries);

            if let Err(e) = self.write_list(&list).await {
                warn!("Failed to add recent entity {}: {}", key, e);
                return;
            }
            debug!("Added recent entity {} ({} stored)", key, list.len());
        }

        self.observers.notify();
    }

    /// Remove an entity by value or key.
    ///
    /// Observers are notified even when nothing matched.
    pub async fn remove(&self, target: impl Into<RecentTarget>) {
        let Some(key) = target.into().key() else {
            warn!("Ignoring recent removal without a usable identity");
            return;
        };

        {
            let _guard = self.lock.lock().await;
            let mut list = self.read_list().await;
            let before = list.len();
            list.retain(|e| e.identity_key().as_ref() != Some(&key));

            if let Err(e) = self.write_list(&list).await {
                warn!("Failed to remove recent entity {}: {}", key, e);
                return;
            }
            debug!(
                "Removed recent entity {} ({} matched)",
                key,
                before - list.len()
            );
        }

        self.observers.notify();
    }

    /// Forget every entity
    pub async fn clear(&self) {
        {
            let _guard = self.lock.lock().await;
            if let Err(e) = self.store.remove(&self.storage_key).await {
                warn!("Failed to clear recent entities: {}", e);
                return;
            }
        }

        self.observers.notify();
    }

    /// Register an observer called (without payload) after each mutation.
    pub fn subscribe<F>(&self, callback: F) -> ObserverToken
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observers.register(Arc::new(callback))
    }

    /// Deregister exactly the observer behind `token`.
    ///
    /// Returns `false` if it was already removed.
    pub fn unsubscribe(&self, token: ObserverToken) -> bool {
        self.observers.deregister(token)
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    async fn read_list(&self) -> RecentList {
        let raw = match self.store.get(&self.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read recent entities from storage: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<RecentList>(&raw) {
            Ok(mut list) => {
                list.truncate(self.max_entries);
                list
            }
            Err(e) => {
                warn!("Discarding corrupt recent entity list: {}", e);
                Vec::new()
            }
        }
    }

    async fn write_list(&self, list: &RecentList) -> Result<()> {
        let encoded = serde_json::to_string(list)?;
        self.store.set(&self.storage_key, encoded).await
    }
}
