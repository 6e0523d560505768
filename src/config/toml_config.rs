use crate::utils::error::{MortgageError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub pricing: PricingConfig,
    pub prediction: PredictionConfig,
    pub training: TrainingConfig,
    pub decision: DecisionConfig,
    pub orchestrator: OrchestratorConfig,
    pub events: EventsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    All,
    Pricing,
    Prediction,
    Orchestrator,
    Training,
}

impl ServiceRole {
    pub fn service_name(&self) -> &'static str {
        match self {
            ServiceRole::All => "mortgage-engine",
            ServiceRole::Pricing => "loan-pricing",
            ServiceRole::Prediction => "default-prediction",
            ServiceRole::Orchestrator => "mortgage-application-orchestrator",
            ServiceRole::Training => "model-training-service",
        }
    }

    pub fn serves_pricing(&self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Pricing)
    }

    pub fn serves_prediction(&self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Prediction)
    }

    pub fn serves_training(&self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Training)
    }

    pub fn serves_orchestration(&self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Orchestrator)
    }
}

impl FromStr for ServiceRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(ServiceRole::All),
            "pricing" => Ok(ServiceRole::Pricing),
            "prediction" => Ok(ServiceRole::Prediction),
            "orchestrator" => Ok(ServiceRole::Orchestrator),
            "training" => Ok(ServiceRole::Training),
            other => Err(format!(
                "unknown role '{}' (expected all, pricing, prediction, orchestrator or training)",
                other
            )),
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceRole::All => "all",
            ServiceRole::Pricing => "pricing",
            ServiceRole::Prediction => "prediction",
            ServiceRole::Orchestrator => "orchestrator",
            ServiceRole::Training => "training",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub role: ServiceRole,
    /// Request bodies above this size are refused with 413.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            role: ServiceRole::All,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Used when the `base_rate` parameter is missing or unreadable.
    pub default_base_rate: f64,
    pub rate_floor: f64,
    pub base_rate_parameter: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default_base_rate: 4.5,
            rate_floor: 3.0,
            base_rate_parameter: "base_rate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub model_key: String,
    pub metadata_key: String,
    pub load_on_startup: bool,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            model_key: "models/random_forest_default_model.json".to_string(),
            metadata_key: "models/model_metadata.json".to_string(),
            load_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub data_key: String,
    pub synthetic_samples: usize,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub test_fraction: f64,
    /// Zero disables cross-validation.
    pub cv_folds: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_key: "training-data/loan_dataset.csv".to_string(),
            synthetic_samples: 10_000,
            n_estimators: 200,
            max_depth: 15,
            min_samples_split: 10,
            min_samples_leaf: 5,
            test_fraction: 0.2,
            cv_folds: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub reject_probability: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            reject_probability: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Pricing and prediction run inside the orchestrator process.
    Local,
    /// Pricing and prediction are remote services reached over HTTP.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub scoring: ScoringMode,
    pub pricing_url: String,
    pub prediction_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub result_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringMode::Local,
            pricing_url: "http://loan-pricing-service:5000".to_string(),
            prediction_url: "http://default-prediction-service:5001".to_string(),
            request_timeout_secs: 10,
            poll_interval_ms: 100,
            result_timeout_ms: 10_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_millis(self.result_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub bus_name: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            bus_name: "mortgage-application-bus".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Aws,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub artifact_dir: String,
    pub model_bucket: String,
    pub results_table: String,
    pub parameters_table: String,
    pub region: String,
    /// Rows kept by the in-memory results store before the oldest are evicted.
    pub memory_results_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            artifact_dir: "./models".to_string(),
            model_bucket: "mortgage-ml-models".to_string(),
            results_table: "loan-application-results".to_string(),
            parameters_table: "loan-pricing-parameters".to_string(),
            region: "us-east-1".to_string(),
            memory_results_capacity: 10_000,
        }
    }
}

impl ServiceConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(MortgageError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| MortgageError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${PRICING_URL})，未定義的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| MortgageError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 以部署環境變數覆蓋檔案中的設定
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| MortgageError::InvalidConfigValueError {
                field: "PORT".to_string(),
                value: port.clone(),
                reason: "must be a valid port number".to_string(),
            })?;
        }
        if let Some(role) = lookup("SERVICE_ROLE") {
            self.server.role = role
                .parse()
                .map_err(|reason| MortgageError::InvalidConfigValueError {
                    field: "SERVICE_ROLE".to_string(),
                    value: role.clone(),
                    reason,
                })?;
        }
        if let Some(bucket) = lookup("MODEL_BUCKET") {
            self.storage.model_bucket = bucket;
        }
        if let Some(url) = lookup("PRICING_SERVICE_URL") {
            self.orchestrator.pricing_url = url;
        }
        if let Some(url) = lookup("PREDICTION_SERVICE_URL") {
            self.orchestrator.prediction_url = url;
        }
        if let Some(bus) = lookup("EVENT_BUS_NAME") {
            self.events.bus_name = bus;
        }
        if let Some(table) = lookup("RESULTS_TABLE") {
            self.storage.results_table = table;
        }
        if let Some(table) = lookup("PARAMETERS_TABLE") {
            self.storage.parameters_table = table;
        }
        if let Some(region) = lookup("AWS_REGION") {
            self.storage.region = region;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> Result<()> {
        // 驗證服務設定
        validation::validate_non_empty_string("server.host", &self.server.host)?;
        validation::validate_positive_number("server.max_body_bytes", self.server.max_body_bytes, 64)?;

        if self.pricing.rate_floor < 0.0 || self.pricing.default_base_rate < 0.0 {
            return Err(MortgageError::InvalidConfigValueError {
                field: "pricing".to_string(),
                value: format!(
                    "base={} floor={}",
                    self.pricing.default_base_rate, self.pricing.rate_floor
                ),
                reason: "rates cannot be negative".to_string(),
            });
        }
        validation::validate_non_empty_string("prediction.model_key", &self.prediction.model_key)?;

        // 驗證訓練參數
        validation::validate_positive_number("training.n_estimators", self.training.n_estimators, 1)?;
        validation::validate_positive_number("training.max_depth", self.training.max_depth, 1)?;
        validation::validate_positive_number(
            "training.min_samples_split",
            self.training.min_samples_split,
            2,
        )?;
        validation::validate_positive_number(
            "training.min_samples_leaf",
            self.training.min_samples_leaf,
            1,
        )?;
        validation::validate_positive_number(
            "training.synthetic_samples",
            self.training.synthetic_samples,
            20,
        )?;
        validation::validate_range("training.test_fraction", self.training.test_fraction, 0.05, 0.5)?;
        if self.training.cv_folds == 1 {
            return Err(MortgageError::InvalidConfigValueError {
                field: "training.cv_folds".to_string(),
                value: "1".to_string(),
                reason: "use 0 to disable cross-validation or at least 2 folds".to_string(),
            });
        }

        validation::validate_range(
            "decision.reject_probability",
            self.decision.reject_probability,
            0.0,
            1.0,
        )?;

        // 驗證遠端服務URL
        if self.orchestrator.scoring == ScoringMode::Http {
            validation::validate_url("orchestrator.pricing_url", &self.orchestrator.pricing_url)?;
            validation::validate_url(
                "orchestrator.prediction_url",
                &self.orchestrator.prediction_url,
            )?;
        }
        validation::validate_positive_number(
            "orchestrator.poll_interval_ms",
            self.orchestrator.poll_interval_ms as usize,
            1,
        )?;

        validation::validate_non_empty_string("events.bus_name", &self.events.bus_name)?;
        validation::validate_path("storage.artifact_dir", &self.storage.artifact_dir)?;
        validation::validate_non_empty_string("storage.results_table", &self.storage.results_table)?;
        validation::validate_positive_number(
            "storage.memory_results_capacity",
            self.storage.memory_results_capacity,
            1,
        )?;

        tracing::debug!("Service configuration validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServiceConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.role, ServiceRole::All);
        assert_eq!(config.pricing.default_base_rate, 4.5);
        assert_eq!(config.decision.reject_probability, 0.4);
        assert_eq!(config.events.bus_name, "mortgage-application-bus");
        assert_eq!(config.storage.results_table, "loan-application-results");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config = ServiceConfig::from_toml_str(
            r#"
[server]
port = 5001
role = "prediction"

[orchestrator]
scoring = "http"
pricing_url = "http://localhost:5001"
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 5001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.role, ServiceRole::Prediction);
        assert_eq!(config.orchestrator.scoring, ScoringMode::Http);
        assert_eq!(config.orchestrator.pricing_url, "http://localhost:5001");
        assert_eq!(
            config.orchestrator.prediction_url,
            "http://default-prediction-service:5001"
        );
    }

    #[test]
    fn test_env_substitution_leaves_unknown_vars() {
        let config = ServiceConfig::from_toml_str(
            r#"
[events]
bus_name = "${MORTGAGE_ENGINE_TEST_SURELY_UNSET}"
"#,
        )
        .unwrap();
        assert_eq!(config.events.bus_name, "${MORTGAGE_ENGINE_TEST_SURELY_UNSET}");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "8080"),
            ("SERVICE_ROLE", "orchestrator"),
            ("MODEL_BUCKET", "other-models"),
            ("RESULTS_TABLE", "results-dev"),
        ]
        .into_iter()
        .collect();

        let mut config = ServiceConfig::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.role, ServiceRole::Orchestrator);
        assert_eq!(config.storage.model_bucket, "other-models");
        assert_eq!(config.storage.results_table, "results-dev");
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = ServiceConfig::default();
        let result = config.apply_overrides(|name| (name == "PORT").then(|| "http".to_string()));
        assert!(result.is_err());

        let result =
            config.apply_overrides(|name| (name == "SERVICE_ROLE").then(|| "gateway".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ServiceConfig::default();
        config.orchestrator.scoring = ScoringMode::Http;
        config.orchestrator.pricing_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.training.cv_folds = 1;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.decision.reject_probability = 1.5;
        assert!(config.validate().is_err());
    }
}
