use crate::domain::model::{LoanApplication, PricingResult, RiskResult};
use crate::domain::ports::ScoringBackend;
use crate::utils::error::{MortgageError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Scores through the remote pricing and prediction services. Each service
/// publishes its own result event.
pub struct HttpScoring {
    client: reqwest::Client,
    pricing_url: String,
    prediction_url: String,
}

impl HttpScoring {
    pub fn new(pricing_url: &str, prediction_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            pricing_url: pricing_url.trim_end_matches('/').to_string(),
            prediction_url: prediction_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        service: &str,
        url: String,
        application: &LoanApplication,
    ) -> Result<T> {
        tracing::debug!(service, url = %url, "Calling scoring service");
        let response = self.client.post(&url).json(application).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MortgageError::UpstreamError {
                service: service.to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ScoringBackend for HttpScoring {
    async fn price(&self, application: &LoanApplication) -> Result<PricingResult> {
        self.post("pricing", format!("{}/process", self.pricing_url), application)
            .await
    }

    async fn assess(&self, application: &LoanApplication) -> Result<RiskResult> {
        self.post(
            "prediction",
            format!("{}/predict", self.prediction_url),
            application,
        )
        .await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingResponse {
    pub status: String,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub metrics: Option<Value>,
}

/// Triggers `/train-model` on the training service.
pub struct TrainingClient {
    client: reqwest::Client,
    base_url: String,
}

impl TrainingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn trigger(&self) -> Result<TrainingResponse> {
        let url = format!("{}/train-model", self.base_url);
        tracing::info!(url = %url, "Triggering model training");
        let response = self.client.post(&url).json(&serde_json::json!({})).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MortgageError::UpstreamError {
                service: "training".to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        Ok(response.json::<TrainingResponse>().await?)
    }
}
