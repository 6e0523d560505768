use crate::domain::model::{
    ApplicationRecord, BusEvent, FinalDecision, LoanApplication, PricingResult, RiskResult,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: BusEvent) -> Result<()>;
}

/// A rule target on the bus.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &BusEvent) -> Result<()>;
}

/// Results table. The `record_*` methods upsert, so a result may arrive before
/// the submission row exists.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create(&self, record: ApplicationRecord) -> Result<()>;
    async fn get(&self, application_id: &str) -> Result<Option<ApplicationRecord>>;
    async fn record_pricing(
        &self,
        application_id: &str,
        pricing: &PricingResult,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn record_risk(
        &self,
        application_id: &str,
        risk: &RiskResult,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;
    /// Stores the decision and marks the record complete. Returns `true` only for
    /// the write that moved the record from processing to complete.
    async fn record_decision(&self, application_id: &str, decision: &FinalDecision) -> Result<bool>;
}

#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_parameter(&self, parameter_type: &str) -> Result<Option<f64>>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn read_object(&self, key: &str) -> Result<Vec<u8>>;
    async fn write_object(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Human-readable location of `key`, used in model metadata.
    fn location(&self, key: &str) -> String {
        key.to_string()
    }
}

#[async_trait]
pub trait ScoringBackend: Send + Sync {
    async fn price(&self, application: &LoanApplication) -> Result<PricingResult>;
    async fn assess(&self, application: &LoanApplication) -> Result<RiskResult>;
}
