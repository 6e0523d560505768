use crate::domain::model::{
    BusEvent, LoanApplication, PricingResult, RiskResult, DETAIL_APPLICATION_SUBMITTED,
    DETAIL_MODEL_UPDATED, DETAIL_PRICING_RESULT, DETAIL_RISK_RESULT, SOURCE_APPLICATION,
    SOURCE_PREDICTION, SOURCE_PRICING, SOURCE_TRAINING,
};
use crate::domain::ports::EventBus;
use crate::utils::error::Result;
use crate::utils::metrics::ServiceMetrics;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Wraps an [`EventBus`] with the envelopes each service publishes.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    bus_name: String,
    metrics: Arc<ServiceMetrics>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>, bus_name: impl Into<String>, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            bus,
            bus_name: bus_name.into(),
            metrics,
        }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub async fn publish<T: Serialize>(&self, source: &str, detail_type: &str, detail: &T) -> Result<()> {
        let detail = stamp_detail(detail_type, serde_json::to_value(detail)?);
        let mut event = BusEvent::new(source, detail_type, detail);
        event.event_bus_name = Some(self.bus_name.clone());

        tracing::debug!(source, detail_type, bus = %self.bus_name, "Publishing event");
        self.bus.publish(event).await?;
        self.metrics.events_published.inc();
        Ok(())
    }

    pub async fn application_submitted(&self, application: &LoanApplication) -> Result<()> {
        self.publish(SOURCE_APPLICATION, DETAIL_APPLICATION_SUBMITTED, application)
            .await
    }

    pub async fn pricing_calculated(&self, pricing: &PricingResult) -> Result<()> {
        self.publish(SOURCE_PRICING, DETAIL_PRICING_RESULT, pricing).await
    }

    pub async fn risk_assessed(&self, risk: &RiskResult) -> Result<()> {
        self.publish(SOURCE_PREDICTION, DETAIL_RISK_RESULT, risk).await
    }

    pub async fn model_updated(&self, model_version: &str, model_path: &str) -> Result<()> {
        let detail = serde_json::json!({
            "model_version": model_version,
            "model_path": model_path,
        });
        self.publish(SOURCE_TRAINING, DETAIL_MODEL_UPDATED, &detail).await
    }
}

/// Adds `event_id` always, and `timestamp` when missing, to an object detail.
fn stamp_detail(detail_type: &str, detail: Value) -> Value {
    let now = Utc::now();
    match detail {
        Value::Object(mut map) => {
            map.entry("timestamp")
                .or_insert_with(|| Value::String(now.to_rfc3339()));
            map.insert(
                "event_id".to_string(),
                Value::String(format!("{}_{}", detail_type, now.format("%Y%m%d_%H%M%S"))),
            );
            Value::Object(map)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryEventBus;

    #[tokio::test]
    async fn test_publish_stamps_detail() {
        let bus = Arc::new(InMemoryEventBus::with_history(16));
        let metrics = Arc::new(ServiceMetrics::new());
        let publisher = EventPublisher::new(bus.clone(), "mortgage-application-bus", metrics.clone());

        publisher
            .publish("test-application", "TestEvent", &serde_json::json!({"message": "hello"}))
            .await
            .unwrap();

        let events = bus.published().await;
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.source, "test-application");
        assert_eq!(event.detail_type, "TestEvent");
        assert_eq!(event.event_bus_name.as_deref(), Some("mortgage-application-bus"));
        assert_eq!(event.detail["message"], "hello");
        assert!(event.detail["timestamp"].is_string());
        assert!(event.detail["event_id"]
            .as_str()
            .unwrap()
            .starts_with("TestEvent_"));
        assert_eq!(metrics.events_published.get(), 1);
    }

    #[tokio::test]
    async fn test_existing_timestamp_is_kept() {
        let detail = stamp_detail(
            "PricingResult",
            serde_json::json!({"timestamp": "2024-01-01T00:00:00Z"}),
        );
        assert_eq!(detail["timestamp"], "2024-01-01T00:00:00Z");
    }
}
