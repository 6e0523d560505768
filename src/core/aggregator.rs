use crate::config::DecisionConfig;
use crate::domain::model::{
    BusEvent, Decision, FinalDecision, PricingResult, RiskCategory, RiskResult,
    DETAIL_PRICING_RESULT, DETAIL_RISK_RESULT,
};
use crate::domain::ports::{EventHandler, ResultStore};
use crate::utils::error::{MortgageError, Result};
use crate::utils::metrics::ServiceMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationOutcome {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<FinalDecision>,
}

impl AggregationOutcome {
    fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            decision: None,
        }
    }
}

/// Final decision from the risk result alone; pricing only gates when it runs.
pub fn decide(risk: &RiskResult, config: &DecisionConfig) -> FinalDecision {
    let mut reasons = Vec::new();
    if risk.risk_category == RiskCategory::VeryHigh {
        reasons.push("Risk category is VERY_HIGH".to_string());
    }
    if risk.default_probability > config.reject_probability {
        reasons.push(format!(
            "Default probability {:.4} exceeds {:.2}",
            risk.default_probability, config.reject_probability
        ));
    }

    let decision = if !reasons.is_empty() {
        Decision::Rejected
    } else if risk.risk_category == RiskCategory::High {
        reasons.push("Risk category is HIGH".to_string());
        Decision::ApprovedWithConditions
    } else {
        Decision::Approved
    };

    FinalDecision {
        decision,
        reasons,
        decided_at: Utc::now(),
    }
}

/// Merges pricing and risk result events into one record per application.
pub struct Aggregator {
    store: Arc<dyn ResultStore>,
    config: DecisionConfig,
    metrics: Arc<ServiceMetrics>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ResultStore>, config: DecisionConfig, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    pub async fn process(&self, event: &BusEvent) -> AggregationOutcome {
        match self.try_process(event).await {
            Ok(outcome) => outcome,
            Err(e @ MortgageError::ValidationError { .. }) => AggregationOutcome::new(400, e.to_string()),
            Err(e) => {
                tracing::error!("Error processing event: {}", e);
                AggregationOutcome::new(500, format!("Error: {}", e))
            }
        }
    }

    async fn try_process(&self, event: &BusEvent) -> Result<AggregationOutcome> {
        let Some(application_id) = event.application_id() else {
            return Ok(AggregationOutcome::new(400, "Missing application_id"));
        };
        let updated_at = detail_timestamp(event);

        match event.detail_type.as_str() {
            DETAIL_PRICING_RESULT => {
                let pricing: PricingResult = parse_detail(event)?;
                self.store
                    .record_pricing(application_id, &pricing, updated_at)
                    .await?;
            }
            DETAIL_RISK_RESULT => {
                let risk: RiskResult = parse_detail(event)?;
                self.store.record_risk(application_id, &risk, updated_at).await?;
            }
            other => {
                tracing::debug!(detail_type = other, "Ignoring event with no aggregation rule");
                return Ok(AggregationOutcome::new(
                    200,
                    format!("Ignored {} for {}", other, application_id),
                ));
            }
        }

        let mut outcome = AggregationOutcome::new(
            200,
            format!(
                "Successfully processed {} for {}",
                event.detail_type, application_id
            ),
        );

        let Some(record) = self.store.get(application_id).await? else {
            return Ok(outcome);
        };
        if let (Some(_), Some(risk)) = (&record.pricing_result, &record.risk_result) {
            let decision = decide(risk, &self.config);
            if self.store.record_decision(application_id, &decision).await? {
                self.metrics.record_decision(decision.decision.as_str());
            }
            tracing::info!(
                application_id,
                decision = %decision.decision,
                "Processing complete"
            );
            outcome.decision = Some(decision);
        }

        Ok(outcome)
    }
}

fn parse_detail<T: serde::de::DeserializeOwned>(event: &BusEvent) -> Result<T> {
    serde_json::from_value(event.detail.clone()).map_err(|e| {
        MortgageError::validation(format!("Invalid {} detail: {}", event.detail_type, e))
    })
}

fn detail_timestamp(event: &BusEvent) -> DateTime<Utc> {
    event
        .detail
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(event.time)
}

#[async_trait]
impl EventHandler for Aggregator {
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        let outcome = self.process(event).await;
        match outcome.status_code {
            200..=299 => Ok(()),
            400..=499 => Err(MortgageError::validation(outcome.message)),
            _ => Err(MortgageError::storage(outcome.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryResultStore;
    use crate::domain::model::{ApplicationRecord, LoanApplication};

    fn risk(application_id: &str, probability: f64) -> RiskResult {
        RiskResult {
            application_id: application_id.to_string(),
            default_probability: probability,
            default_risk: probability >= 0.5,
            risk_category: RiskCategory::from_probability(probability),
            confidence_score: probability.max(1.0 - probability),
            model_type: "rule_based".to_string(),
            model_version: None,
            processing_time_ms: 0.1,
            timestamp: Utc::now(),
        }
    }

    fn pricing(application_id: &str) -> PricingResult {
        PricingResult {
            application_id: application_id.to_string(),
            interest_rate: 4.25,
            monthly_payment: 1721.79,
            total_interest: 269844.4,
            loan_amount: 350000.0,
            loan_to_value_ratio: Some(0.778),
            debt_to_income_ratio: None,
            model_type: "rule_based".to_string(),
            processing_time_ms: 0.1,
            timestamp: Utc::now(),
        }
    }

    fn event<T: Serialize>(detail_type: &str, detail: &T) -> BusEvent {
        BusEvent::new("test", detail_type, serde_json::to_value(detail).unwrap())
    }

    fn aggregator() -> (Aggregator, Arc<InMemoryResultStore>, Arc<ServiceMetrics>) {
        let store = Arc::new(InMemoryResultStore::new());
        let metrics = Arc::new(ServiceMetrics::new());
        (
            Aggregator::new(store.clone(), DecisionConfig::default(), metrics.clone()),
            store,
            metrics,
        )
    }

    #[test]
    fn test_decision_rules() {
        let config = DecisionConfig::default();
        assert_eq!(decide(&risk("a", 0.05), &config).decision, Decision::Approved);
        assert_eq!(decide(&risk("a", 0.2), &config).decision, Decision::Approved);

        let conditional = decide(&risk("a", 0.3), &config);
        assert_eq!(conditional.decision, Decision::ApprovedWithConditions);
        assert_eq!(conditional.reasons, vec!["Risk category is HIGH"]);

        // HIGH band but above the probability threshold
        let rejected = decide(&risk("a", 0.45), &config);
        assert_eq!(rejected.decision, Decision::Rejected);
        assert_eq!(rejected.reasons.len(), 1);

        assert_eq!(decide(&risk("a", 0.6), &config).decision, Decision::Rejected);
        assert_eq!(decide(&risk("a", 0.6), &config).reasons.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_application_id() {
        let (aggregator, _, _) = aggregator();
        let outcome = aggregator
            .process(&BusEvent::new("test", DETAIL_PRICING_RESULT, serde_json::json!({})))
            .await;
        assert_eq!(outcome.status_code, 400);
        assert_eq!(outcome.message, "Missing application_id");
    }

    #[tokio::test]
    async fn test_invalid_detail_is_rejected() {
        let (aggregator, store, _) = aggregator();
        let outcome = aggregator
            .process(&BusEvent::new(
                "test",
                DETAIL_RISK_RESULT,
                serde_json::json!({"application_id": "app-1", "risk_category": "LOW"}),
            ))
            .await;
        assert_eq!(outcome.status_code, 400);
        assert!(store.get("app-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_result_waits_for_the_other() {
        let (aggregator, store, _) = aggregator();
        let app = LoanApplication::new(350000.0, 720);
        store.create(ApplicationRecord::new(&app)).await.unwrap();

        let outcome = aggregator
            .process(&event(DETAIL_PRICING_RESULT, &pricing(&app.application_id)))
            .await;
        assert_eq!(outcome.status_code, 200);
        assert!(outcome.decision.is_none());

        let record = store.get(&app.application_id).await.unwrap().unwrap();
        assert!(record.pricing_result.is_some());
        assert!(!record.processing_complete);
        assert!(record.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_both_results_complete_the_record_in_any_order() {
        let (aggregator, store, metrics) = aggregator();
        let id = "app-2";

        aggregator.process(&event(DETAIL_RISK_RESULT, &risk(id, 0.3))).await;
        let outcome = aggregator.process(&event(DETAIL_PRICING_RESULT, &pricing(id))).await;

        assert_eq!(outcome.status_code, 200);
        assert_eq!(
            outcome.decision.as_ref().map(|d| d.decision),
            Some(Decision::ApprovedWithConditions)
        );

        let record = store.get(id).await.unwrap().unwrap();
        assert!(record.processing_complete);
        assert_eq!(record.status(), "completed");
        assert_eq!(
            record.final_decision.map(|d| d.decision),
            Some(Decision::ApprovedWithConditions)
        );
        assert_eq!(metrics.decision_count("APPROVED_WITH_CONDITIONS"), 1);
    }

    #[tokio::test]
    async fn test_replayed_event_is_idempotent() {
        let (aggregator, store, metrics) = aggregator();
        let id = "app-3";
        let risk_event = event(DETAIL_RISK_RESULT, &risk(id, 0.05));

        aggregator.process(&event(DETAIL_PRICING_RESULT, &pricing(id))).await;
        aggregator.process(&risk_event).await;
        let replay = aggregator.process(&risk_event).await;

        assert_eq!(replay.decision.map(|d| d.decision), Some(Decision::Approved));
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.final_decision.map(|d| d.decision), Some(Decision::Approved));
        assert_eq!(metrics.decision_count("APPROVED"), 1);
    }

    #[tokio::test]
    async fn test_unrelated_event_leaves_completed_record_untouched() {
        let (aggregator, store, metrics) = aggregator();
        let id = "app-5";
        aggregator.process(&event(DETAIL_PRICING_RESULT, &pricing(id))).await;
        aggregator.process(&event(DETAIL_RISK_RESULT, &risk(id, 0.05))).await;
        let before = store.get(id).await.unwrap().unwrap();

        let outcome = aggregator
            .process(&BusEvent::new(
                "mortgage-application",
                "LoanApplicationSubmitted",
                serde_json::json!({"application_id": id}),
            ))
            .await;
        assert_eq!(outcome.status_code, 200);
        assert!(outcome.decision.is_none());

        let after = store.get(id).await.unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(metrics.decision_count("APPROVED"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_results_count_one_decision() {
        let (aggregator, store, metrics) = aggregator();
        let id = "app-6";
        store.record_pricing(id, &pricing(id), Utc::now()).await.unwrap();
        store.record_risk(id, &risk(id, 0.05), Utc::now()).await.unwrap();

        let risk_event = event(DETAIL_RISK_RESULT, &risk(id, 0.05));
        let pricing_event = event(DETAIL_PRICING_RESULT, &pricing(id));
        let (a, b) = tokio::join!(
            aggregator.process(&risk_event),
            aggregator.process(&pricing_event)
        );
        assert!(a.decision.is_some());
        assert!(b.decision.is_some());
        assert_eq!(metrics.decision_count("APPROVED"), 1);
    }

    #[tokio::test]
    async fn test_unrelated_event_is_accepted() {
        let (aggregator, store, _) = aggregator();
        let outcome = aggregator
            .process(&BusEvent::new(
                "mortgage-application",
                "LoanApplicationSubmitted",
                serde_json::json!({"application_id": "app-4"}),
            ))
            .await;
        assert_eq!(outcome.status_code, 200);
        assert!(store.get("app-4").await.unwrap().is_none());
    }
}
