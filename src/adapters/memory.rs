use crate::domain::model::{ApplicationRecord, BusEvent, FinalDecision, PricingResult, RiskResult};
use crate::domain::ports::{EventBus, EventHandler, ParameterStore, ResultStore};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Process-local bus. Rules map a detail type to handlers and delivery happens
/// inline, so results are stored before `publish` returns.
#[derive(Default)]
pub struct InMemoryEventBus {
    rules: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    history: Mutex<VecDeque<BusEvent>>,
    history_limit: usize,
}

impl InMemoryEventBus {
    /// A bus that keeps no record of published events.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that remembers the last `limit` published events.
    pub fn with_history(limit: usize) -> Self {
        Self {
            history_limit: limit,
            ..Self::default()
        }
    }

    pub async fn subscribe(&self, detail_type: &str, handler: Arc<dyn EventHandler>) {
        self.rules
            .write()
            .await
            .entry(detail_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Recent events, oldest first.
    pub async fn published(&self) -> Vec<BusEvent> {
        self.history.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: BusEvent) -> Result<()> {
        if self.history_limit > 0 {
            let mut history = self.history.lock().await;
            if history.len() == self.history_limit {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // Clone the targets so handlers may publish without holding the lock.
        let targets = self
            .rules
            .read()
            .await
            .get(&event.detail_type)
            .cloned()
            .unwrap_or_default();

        for handler in targets {
            if let Err(e) = handler.handle(&event).await {
                tracing::error!(detail_type = %event.detail_type, "Event handler failed: {}", e);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct Records {
    by_id: HashMap<String, ApplicationRecord>,
    /// Insertion order, for eviction.
    order: VecDeque<String>,
}

/// Results table held in memory. With a capacity, the oldest rows are evicted
/// once it is full.
#[derive(Default)]
pub struct InMemoryResultStore {
    records: RwLock<Records>,
    capacity: Option<usize>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::default(),
            capacity: Some(capacity.max(1)),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.by_id.is_empty()
    }

    fn make_room(&self, records: &mut Records) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while records.by_id.len() >= capacity {
            let Some(oldest) = records.order.pop_front() else {
                break;
            };
            records.by_id.remove(&oldest);
            tracing::debug!(application_id = %oldest, "Evicted result record");
        }
    }

    async fn upsert<F, T>(&self, application_id: &str, update: F) -> T
    where
        F: FnOnce(&mut ApplicationRecord) -> T,
    {
        let mut records = self.records.write().await;
        if !records.by_id.contains_key(application_id) {
            self.make_room(&mut records);
            records.order.push_back(application_id.to_string());
        }
        let record = records
            .by_id
            .entry(application_id.to_string())
            .or_insert_with(|| ApplicationRecord::empty(application_id));
        update(record)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn create(&self, record: ApplicationRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if !records.by_id.contains_key(&record.application_id) {
            self.make_room(&mut records);
            records.order.push_back(record.application_id.clone());
        }
        records.by_id.insert(record.application_id.clone(), record);
        Ok(())
    }

    async fn get(&self, application_id: &str) -> Result<Option<ApplicationRecord>> {
        Ok(self.records.read().await.by_id.get(application_id).cloned())
    }

    async fn record_pricing(
        &self,
        application_id: &str,
        pricing: &PricingResult,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.upsert(application_id, |record| {
            record.pricing_result = Some(pricing.clone());
            record.updated_at = Some(updated_at);
        })
        .await;
        Ok(())
    }

    async fn record_risk(
        &self,
        application_id: &str,
        risk: &RiskResult,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.upsert(application_id, |record| {
            record.risk_result = Some(risk.clone());
            record.updated_at = Some(updated_at);
        })
        .await;
        Ok(())
    }

    async fn record_decision(&self, application_id: &str, decision: &FinalDecision) -> Result<bool> {
        let completed = self
            .upsert(application_id, |record| {
                record.final_decision = Some(decision.clone());
                !std::mem::replace(&mut record.processing_complete, true)
            })
            .await;
        Ok(completed)
    }
}

/// Fixed pricing parameters, standing in for the parameters table.
#[derive(Debug, Clone, Default)]
pub struct StaticParameterStore {
    values: HashMap<String, f64>,
}

impl StaticParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, parameter_type: &str, value: f64) -> Self {
        self.values.insert(parameter_type.to_string(), value);
        self
    }
}

#[async_trait]
impl ParameterStore for StaticParameterStore {
    async fn get_parameter(&self, parameter_type: &str) -> Result<Option<f64>> {
        Ok(self.values.get(parameter_type).copied())
    }
}
