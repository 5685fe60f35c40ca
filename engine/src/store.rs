use promolane_types::{RewardInstance, RewardTemplate};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Storage failures. The in-memory backend is infallible; a durable backend
/// maps its I/O and decoding failures into these variants.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record for key {0}: {1}")]
    Corrupt(String, String),
}

/// Keys of the instance store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Catalog template by id.
    Template(u64),
    /// Reward instance, scoped under its owning player.
    Instance { player: String, id: u64 },
    /// Owner index: instance id -> player. Maintained at mint, never changed.
    Owner(u64),
    /// Last instance id handed out.
    Sequence,
}

/// Values of the instance store.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Template(RewardTemplate),
    Instance(RewardInstance),
    Owner(String),
    Sequence(u64),
}

/// Durable record store. One record per template, one per instance.
///
/// The store is the single source of truth: callers re-read under the
/// per-player lock, mutate, and write back before releasing. Methods take
/// `&self`; implementations provide their own interior synchronization.
pub trait Store: Send + Sync + 'static {
    fn get(&self, key: &Key) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;
    fn insert(&self, key: Key, value: Value)
        -> impl Future<Output = Result<(), StoreError>> + Send;
    fn delete(&self, key: &Key) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// All instances owned by a player, in unspecified order.
    fn player_instances(
        &self,
        player: &str,
    ) -> impl Future<Output = Result<Vec<RewardInstance>, StoreError>> + Send;

    /// All players that own at least one instance.
    fn players(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}

// A shared handle to a store is itself a store. Lets tests (and deployments
// embedding the engine) keep a reference to the backend across engine restarts.
impl<S: Store> Store for Arc<S> {
    async fn get(&self, key: &Key) -> Result<Option<Value>, StoreError> {
        self.as_ref().get(key).await
    }

    async fn insert(&self, key: Key, value: Value) -> Result<(), StoreError> {
        self.as_ref().insert(key, value).await
    }

    async fn delete(&self, key: &Key) -> Result<(), StoreError> {
        self.as_ref().delete(key).await
    }

    async fn player_instances(&self, player: &str) -> Result<Vec<RewardInstance>, StoreError> {
        self.as_ref().player_instances(player).await
    }

    async fn players(&self) -> Result<Vec<String>, StoreError> {
        self.as_ref().players().await
    }
}

pub(crate) async fn load_template<S: Store>(
    store: &S,
    id: u64,
) -> Result<Option<RewardTemplate>, StoreError> {
    Ok(match store.get(&Key::Template(id)).await? {
        Some(Value::Template(template)) => Some(template),
        _ => None,
    })
}

pub(crate) async fn load_instance<S: Store>(
    store: &S,
    player: &str,
    id: u64,
) -> Result<Option<RewardInstance>, StoreError> {
    Ok(match store
        .get(&Key::Instance {
            player: player.to_string(),
            id,
        })
        .await?
    {
        Some(Value::Instance(instance)) => Some(instance),
        _ => None,
    })
}

pub(crate) async fn load_owner<S: Store>(
    store: &S,
    id: u64,
) -> Result<Option<String>, StoreError> {
    Ok(match store.get(&Key::Owner(id)).await? {
        Some(Value::Owner(player)) => Some(player),
        _ => None,
    })
}

pub(crate) async fn write_instance<S: Store>(
    store: &S,
    instance: &RewardInstance,
) -> Result<(), StoreError> {
    store
        .insert(
            Key::Instance {
                player: instance.player.clone(),
                id: instance.id,
            },
            Value::Instance(instance.clone()),
        )
        .await
}

/// In-memory store backend. Used by tests and by deployments that accept
/// process-lifetime durability.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<Key, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Value>, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(key).cloned())
    }

    async fn insert(&self, key: Key, value: Value) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.remove(key);
        Ok(())
    }

    async fn player_instances(&self, player: &str) -> Result<Vec<RewardInstance>, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut instances = Vec::new();
        for (key, value) in records.iter() {
            if let (Key::Instance { player: owner, .. }, Value::Instance(instance)) = (key, value) {
                if owner == player {
                    instances.push(instance.clone());
                }
            }
        }
        Ok(instances)
    }

    async fn players(&self) -> Result<Vec<String>, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut players = Vec::new();
        for key in records.keys() {
            if let Key::Instance { player, .. } = key {
                if players.last().map(|p| p != player).unwrap_or(true) {
                    players.push(player.clone());
                }
            }
        }
        players.dedup();
        Ok(players)
    }
}
