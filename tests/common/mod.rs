// Each integration test binary compiles this module separately and uses a
// different slice of it.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use rxstock::auth::RolePermissions;
use rxstock::clock::{Clock, FixedClock};
use rxstock::config::EngineConfig;
use rxstock::entities::{NewBatch, Product, StockBatch};
use rxstock::errors::StockError;
use rxstock::events::Event;
use rxstock::store::{CollectionStore, InMemoryStore};
use rxstock::StockEngine;

struct ScriptedFault {
    collection: String,
    skip: usize,
    remaining: usize,
}

/// Substrate wrapper that fails scripted writes, for exercising the
/// compensation and retry paths. Reads always pass through.
pub struct FaultStore {
    inner: InMemoryStore,
    faults: Mutex<Vec<ScriptedFault>>,
}

impl FaultStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Fail one future put to `collection`, after letting `skip` puts to it
    /// through first.
    pub fn fail_put(&self, collection: &str, skip: usize) {
        self.faults.lock().unwrap().push(ScriptedFault {
            collection: collection.to_string(),
            skip,
            remaining: 1,
        });
    }
}

#[async_trait]
impl CollectionStore for FaultStore {
    async fn get_raw(&self, collection: &str) -> Result<Option<Value>, StockError> {
        self.inner.get_raw(collection).await
    }

    async fn put_raw(&self, collection: &str, value: Value) -> Result<(), StockError> {
        {
            let mut faults = self.faults.lock().unwrap();
            if let Some(fault) = faults
                .iter_mut()
                .find(|f| f.collection == collection && f.remaining > 0)
            {
                if fault.skip > 0 {
                    fault.skip -= 1;
                } else {
                    fault.remaining -= 1;
                    return Err(StockError::store(format!(
                        "injected write failure on {collection}"
                    )));
                }
            }
        }
        self.inner.put_raw(collection, value).await
    }
}

/// Harness wiring a [`StockEngine`] to the in-memory substrate and a fixed
/// clock, with the event receiver kept so tests can assert on emissions.
pub struct TestEngine {
    pub engine: StockEngine,
    pub clock: Arc<FixedClock>,
    pub events: mpsc::Receiver<Event>,
}

impl TestEngine {
    /// Fresh engine at 2024-06-01 with default config.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    /// Fresh engine over a [`FaultStore`], handed back so tests can script
    /// write failures.
    pub fn faulty() -> (Self, Arc<FaultStore>) {
        let store = Arc::new(FaultStore::new());
        let harness = Self::with_store(EngineConfig::default(), store.clone());
        (harness, store)
    }

    fn with_store(config: EngineConfig, store: Arc<dyn CollectionStore>) -> Self {
        let clock = Arc::new(FixedClock::at_date(
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        ));
        let (engine, events) = StockEngine::new(
            config,
            store,
            clock.clone(),
            Arc::new(RolePermissions::new()),
        );
        Self {
            engine,
            clock,
            events,
        }
    }

    pub async fn seed_product(&self, name: &str, units_per_pack: u32) -> Product {
        let product = Product::new(name, units_per_pack, self.clock.now());
        self.engine.products().upsert(product.clone()).await.unwrap();
        product
    }

    pub async fn seed_batch(
        &self,
        product_id: Uuid,
        quantity: i64,
        expiry: NaiveDate,
    ) -> StockBatch {
        self.seed_batch_priced(product_id, quantity, expiry, dec!(1.00))
            .await
    }

    pub async fn seed_batch_priced(
        &self,
        product_id: Uuid,
        quantity: i64,
        expiry: NaiveDate,
        cost_price: Decimal,
    ) -> StockBatch {
        let batch = self
            .engine
            .batches()
            .create_batch(NewBatch {
                product_id,
                quantity,
                expiry_date: expiry,
                cost_price,
                source_ref: None,
                batch_number: None,
                received_date: self.clock.today(),
            })
            .await
            .unwrap();
        self.engine.products().refresh_summary(product_id).await.unwrap();
        batch
    }

    /// Drain every event currently buffered on the channel.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
