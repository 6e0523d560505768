use crate::config::PredictionConfig;
use crate::core::features::{LoanFeatures, FEATURE_COLUMNS};
use crate::core::forest::RandomForest;
use crate::core::pricing::validate_application;
use crate::domain::model::{round_to, BusEvent, LoanApplication, RiskCategory, RiskResult, DETAIL_MODEL_UPDATED};
use crate::domain::ports::{ArtifactStore, EventHandler};
use crate::utils::error::{MortgageError, Result};
use crate::utils::metrics::ServiceMetrics;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Serialized model as stored under `prediction.model_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_version: String,
    pub feature_columns: Vec<String>,
    pub forest: RandomForest,
}

impl ModelArtifact {
    /// Rejects artifacts built for other features or with a broken forest.
    fn check(&self) -> Result<()> {
        let expected: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
        if self.feature_columns != expected || self.forest.n_features != expected.len() {
            return Err(MortgageError::model(format!(
                "model {} was trained on incompatible features {:?}",
                self.model_version, self.feature_columns
            )));
        }
        self.forest.check().map_err(|e| {
            MortgageError::model(format!("model {} is corrupt: {}", self.model_version, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub model_type: &'static str,
    pub model_version: Option<String>,
}

/// Baseline probability adjusted by credit, DTI and LTV bands, capped at 0.95.
pub fn rule_based_probability(application: &LoanApplication) -> f64 {
    let mut probability = 0.05;

    let credit_score = application.credit_score;
    if credit_score < 600 {
        probability += 0.15;
    } else if credit_score < 650 {
        probability += 0.08;
    } else if credit_score < 700 {
        probability += 0.03;
    }

    let dti = application.dti_ratio.unwrap_or(0.0);
    if dti > 0.43 {
        probability += 0.10;
    } else if dti > 0.36 {
        probability += 0.05;
    }

    let ltv = application.loan_to_value().unwrap_or(0.0);
    if ltv > 0.95 {
        probability += 0.08;
    } else if ltv > 0.80 {
        probability += 0.03;
    }

    f64::min(probability, 0.95)
}

pub struct DefaultPredictionService {
    artifacts: Arc<dyn ArtifactStore>,
    config: PredictionConfig,
    model: RwLock<Option<Arc<ModelArtifact>>>,
    metrics: Arc<ServiceMetrics>,
}

impl DefaultPredictionService {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        config: PredictionConfig,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            artifacts,
            config,
            model: RwLock::new(None),
            metrics,
        }
    }

    /// Reads the model artifact. On failure the current model is kept; if there is
    /// none the service keeps scoring with the rule-based fallback.
    pub async fn load_model(&self) -> Result<String> {
        let start = Instant::now();
        let bytes = self.artifacts.read_object(&self.config.model_key).await?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
        artifact.check()?;

        let version = artifact.model_version.clone();
        self.install(artifact).await;

        self.metrics.model_loads.inc();
        self.metrics.model_load_duration.observe(start.elapsed());
        tracing::info!(model_version = %version, key = %self.config.model_key, "Prediction model loaded");
        Ok(version)
    }

    /// Loads the model if possible, logging instead of failing.
    pub async fn try_load_model(&self) -> bool {
        match self.load_model().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Could not load prediction model: {}", e);
                tracing::info!("Using rule-based prediction model");
                false
            }
        }
    }

    pub async fn install(&self, artifact: ModelArtifact) {
        *self.model.write().await = Some(Arc::new(artifact));
    }

    pub async fn status(&self) -> ModelStatus {
        match self.model.read().await.as_ref() {
            Some(model) => ModelStatus {
                model_type: "ml",
                model_version: Some(model.model_version.clone()),
            },
            None => ModelStatus {
                model_type: "rule_based",
                model_version: None,
            },
        }
    }

    pub async fn assess(&self, application: &LoanApplication) -> Result<RiskResult> {
        validate_application(application)?;
        self.metrics.prediction_requests.inc();
        let start = Instant::now();

        let model = self.model.read().await.clone();
        let (probability, model_type, model_version) = match model {
            Some(model) => {
                let row = LoanFeatures::from_application(application).to_row();
                (
                    model.forest.predict_proba(&row),
                    "ml",
                    Some(model.model_version.clone()),
                )
            }
            None => (rule_based_probability(application), "rule_based", None),
        };

        let elapsed = start.elapsed();
        self.metrics.prediction_duration.observe(elapsed);

        let result = RiskResult {
            application_id: application.application_id.clone(),
            default_probability: round_to(probability, 4),
            default_risk: probability >= 0.5,
            risk_category: RiskCategory::from_probability(probability),
            confidence_score: round_to(probability.max(1.0 - probability), 4),
            model_type: model_type.to_string(),
            model_version,
            processing_time_ms: elapsed.as_secs_f64() * 1000.0,
            timestamp: Utc::now(),
        };

        tracing::info!(
            application_id = %result.application_id,
            probability = result.default_probability,
            category = %result.risk_category,
            model_type,
            "Default risk assessed"
        );
        Ok(result)
    }
}

#[async_trait]
impl EventHandler for DefaultPredictionService {
    async fn handle(&self, event: &BusEvent) -> Result<()> {
        if event.detail_type != DETAIL_MODEL_UPDATED {
            return Ok(());
        }
        tracing::info!(
            model_version = ?event.detail.get("model_version"),
            "Model update received, reloading"
        );
        self.load_model().await.map(|_| ())
    }
}
