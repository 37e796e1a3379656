//! Persistence substrate: a host-provided, synchronous-in-spirit key-value
//! store holding whole JSON collections. Every write replaces a whole
//! collection, so two concurrent read-modify-write cycles on the same key
//! would silently drop one writer's changes; [`TypedStore::update`] runs the
//! cycle under that collection's mutex to rule this out.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::errors::StockError;

/// Collection keys used by the engine. The host substrate namespaces by
/// these names; nothing else in the crate hard-codes a key.
pub mod collections {
    pub const STOCK_BATCHES: &str = "stock_batches";
    pub const STOCK_MOVEMENTS: &str = "stock_movements";
    pub const PRODUCTS: &str = "products";
    pub const SALES: &str = "sales";
    pub const REGISTER_ENTRIES: &str = "register_entries";
}

/// Whole-collection get/set, the only contract the host has to honor.
/// No transactions, no partial updates.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn get_raw(&self, collection: &str) -> Result<Option<Value>, StockError>;
    async fn put_raw(&self, collection: &str, value: Value) -> Result<(), StockError>;
}

/// Typed helpers layered over the raw contract, plus the per-collection
/// mutexes that serialize read-modify-write cycles. Clones share the lock
/// registry, so every service built from the same `TypedStore` contends on
/// the same mutex for a given collection.
pub struct TypedStore {
    inner: Arc<dyn CollectionStore>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TypedStore {
    pub fn new(inner: Arc<dyn CollectionStore>) -> Self {
        Self {
            inner,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// The mutex guarding one collection's read-modify-write cycle. Exposed
    /// for callers whose cycle cannot be a closure (conditional writes,
    /// cross-collection reads in the middle); everyone else goes through
    /// [`TypedStore::update`].
    pub fn collection_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read a whole collection, falling back to `T::default()` when the key
    /// has never been written.
    pub async fn read<T>(&self, collection: &str) -> Result<T, StockError>
    where
        T: DeserializeOwned + Default,
    {
        match self.inner.get_raw(collection).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(T::default()),
        }
    }

    pub async fn write<T>(&self, collection: &str, value: &T) -> Result<(), StockError>
    where
        T: Serialize,
    {
        let raw = serde_json::to_value(value)?;
        self.inner.put_raw(collection, raw).await
    }

    /// Read-modify-write under the collection's mutex. The closure sees the
    /// freshest rows; if it returns `Err` nothing is written back, which is
    /// what lets validation happen against in-lock state.
    pub async fn update<T, R, F>(&self, collection: &str, f: F) -> Result<R, StockError>
    where
        T: DeserializeOwned + Default + Serialize + Send,
        R: Send,
        F: FnOnce(&mut T) -> Result<R, StockError> + Send,
    {
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;
        let mut rows: T = self.read(collection).await?;
        let out = f(&mut rows)?;
        self.write(collection, &rows).await?;
        Ok(out)
    }
}

impl Clone for TypedStore {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            locks: self.locks.clone(),
        }
    }
}

/// In-memory substrate for tests and embedded use.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    collections: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for InMemoryStore {
    async fn get_raw(&self, collection: &str) -> Result<Option<Value>, StockError> {
        let guard = self
            .collections
            .read()
            .map_err(|_| StockError::store("store lock poisoned"))?;
        Ok(guard.get(collection).cloned())
    }

    async fn put_raw(&self, collection: &str, value: Value) -> Result<(), StockError> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| StockError::store("store lock poisoned"))?;
        guard.insert(collection.to_string(), value);
        Ok(())
    }
}
