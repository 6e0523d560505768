use crate::config::OrchestratorConfig;
use crate::core::events::EventPublisher;
use crate::core::prediction::DefaultPredictionService;
use crate::core::pricing::{validate_application, LoanPricingService};
use crate::domain::model::{ApplicationRecord, LoanApplication, PricingResult, RiskResult};
use crate::domain::ports::{ResultStore, ScoringBackend};
use crate::utils::error::{MortgageError, Result};
use crate::utils::metrics::ServiceMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

/// Scores in-process and publishes each result on the bus.
pub struct LocalScoring {
    pricing: Arc<LoanPricingService>,
    prediction: Arc<DefaultPredictionService>,
    publisher: EventPublisher,
}

impl LocalScoring {
    pub fn new(
        pricing: Arc<LoanPricingService>,
        prediction: Arc<DefaultPredictionService>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            pricing,
            prediction,
            publisher,
        }
    }
}

#[async_trait]
impl ScoringBackend for LocalScoring {
    async fn price(&self, application: &LoanApplication) -> Result<PricingResult> {
        let result = self.pricing.process(application).await?;
        self.publisher.pricing_calculated(&result).await?;
        Ok(result)
    }

    async fn assess(&self, application: &LoanApplication) -> Result<RiskResult> {
        let result = self.prediction.assess(application).await?;
        self.publisher.risk_assessed(&result).await?;
        Ok(result)
    }
}

pub struct Orchestrator {
    store: Arc<dyn ResultStore>,
    publisher: EventPublisher,
    scoring: Arc<dyn ScoringBackend>,
    config: OrchestratorConfig,
    metrics: Arc<ServiceMetrics>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ResultStore>,
        publisher: EventPublisher,
        scoring: Arc<dyn ScoringBackend>,
        config: OrchestratorConfig,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            store,
            publisher,
            scoring,
            config,
            metrics,
        }
    }

    /// Stores and announces the application, then scores it. Scoring failures
    /// leave the record in `processing`.
    pub async fn submit(&self, application: LoanApplication) -> Result<String> {
        validate_application(&application)?;
        let application_id = application.application_id.clone();

        self.store.create(ApplicationRecord::new(&application)).await?;
        self.publisher.application_submitted(&application).await?;
        self.metrics.applications_submitted.inc();
        tracing::info!(application_id = %application_id, "Application submitted");

        let (pricing, risk) = tokio::join!(
            self.scoring.price(&application),
            self.scoring.assess(&application)
        );
        if let Err(e) = pricing {
            tracing::error!(application_id = %application_id, "Pricing failed: {}", e);
        }
        if let Err(e) = risk {
            tracing::error!(application_id = %application_id, "Risk assessment failed: {}", e);
        }

        Ok(application_id)
    }

    /// Submits, then waits for the aggregated record. The flag is false when
    /// the timeout expired first.
    pub async fn process(&self, application: LoanApplication) -> Result<(ApplicationRecord, bool)> {
        let application_id = self.submit(application).await?;
        let deadline = Instant::now() + self.config.result_timeout();

        loop {
            let record = self.status(&application_id).await?;
            if record.processing_complete {
                return Ok((record, true));
            }
            if Instant::now() >= deadline {
                tracing::warn!(application_id = %application_id, "Timed out waiting for results");
                return Ok((record, false));
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    pub async fn status(&self, application_id: &str) -> Result<ApplicationRecord> {
        self.store
            .get(application_id)
            .await?
            .ok_or_else(|| MortgageError::not_found("application", application_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryEventBus, InMemoryResultStore};
    use crate::domain::model::{RiskCategory, DETAIL_APPLICATION_SUBMITTED};
    use chrono::Utc;

    struct FailingScoring;

    #[async_trait]
    impl ScoringBackend for FailingScoring {
        async fn price(&self, _application: &LoanApplication) -> Result<PricingResult> {
            Err(MortgageError::UpstreamError {
                service: "pricing".to_string(),
                message: "connection refused".to_string(),
            })
        }

        async fn assess(&self, application: &LoanApplication) -> Result<RiskResult> {
            Ok(RiskResult {
                application_id: application.application_id.clone(),
                default_probability: 0.05,
                default_risk: false,
                risk_category: RiskCategory::Low,
                confidence_score: 0.95,
                model_type: "rule_based".to_string(),
                model_version: None,
                processing_time_ms: 0.0,
                timestamp: Utc::now(),
            })
        }
    }

    fn orchestrator(
        scoring: Arc<dyn ScoringBackend>,
    ) -> (Orchestrator, Arc<InMemoryEventBus>, Arc<InMemoryResultStore>) {
        let bus = Arc::new(InMemoryEventBus::with_history(16));
        let store = Arc::new(InMemoryResultStore::new());
        let metrics = Arc::new(ServiceMetrics::new());
        let publisher = EventPublisher::new(bus.clone(), "test-bus", metrics.clone());
        let config = OrchestratorConfig {
            poll_interval_ms: 5,
            result_timeout_ms: 30,
            ..OrchestratorConfig::default()
        };
        (
            Orchestrator::new(store.clone(), publisher, scoring, config, metrics),
            bus,
            store,
        )
    }

    #[tokio::test]
    async fn test_submit_records_and_publishes() {
        let (orchestrator, bus, store) = orchestrator(Arc::new(FailingScoring));
        let app = LoanApplication::new(250000.0, 720).with_dti(0.35);

        let id = orchestrator.submit(app.clone()).await.unwrap();
        assert_eq!(id, app.application_id);

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.application_data, Some(app));
        assert_eq!(record.status(), "processing");

        let events = bus.published().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].detail_type, DETAIL_APPLICATION_SUBMITTED);
        assert_eq!(events[0].application_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_application() {
        let (orchestrator, bus, _) = orchestrator(Arc::new(FailingScoring));
        let err = orchestrator
            .submit(LoanApplication::new(250000.0, 100))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(bus.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_process_times_out_without_aggregation() {
        let (orchestrator, _, _) = orchestrator(Arc::new(FailingScoring));
        let (record, complete) = orchestrator
            .process(LoanApplication::new(250000.0, 720))
            .await
            .unwrap();
        assert!(!complete);
        assert!(!record.processing_complete);
    }

    #[tokio::test]
    async fn test_status_of_unknown_application() {
        let (orchestrator, _, _) = orchestrator(Arc::new(FailingScoring));
        let err = orchestrator.status("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
