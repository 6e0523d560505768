use thiserror::Error;

#[derive(Error, Debug)]
pub enum MortgageError {
    #[error("HTTP request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("HTTP server error: {0}")]
    ServerError(#[from] hyper::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFieldsError { fields: Vec<String> },

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLargeError { limit: usize },

    #[error("{resource} not found: {id}")]
    NotFoundError { resource: String, id: String },

    #[error("{service} service failed: {message}")]
    UpstreamError { service: String, message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Event bus error: {message}")]
    EventBusError { message: String },

    #[error("Model error: {message}")]
    ModelError { message: String },
}

impl MortgageError {
    pub fn validation(message: impl Into<String>) -> Self {
        MortgageError::ValidationError {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        MortgageError::StorageError {
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        MortgageError::ModelError {
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        MortgageError::NotFoundError {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    /// HTTP status used when this error escapes a request handler.
    pub fn status_code(&self) -> u16 {
        match self {
            MortgageError::ValidationError { .. } | MortgageError::MissingFieldsError { .. } => 400,
            MortgageError::PayloadTooLargeError { .. } => 413,
            MortgageError::NotFoundError { .. } => 404,
            MortgageError::UpstreamError { .. } | MortgageError::ApiError(_) => 502,
            _ => 500,
        }
    }

    /// CLI 的退出碼，依錯誤類型區分
    pub fn exit_code(&self) -> i32 {
        match self {
            MortgageError::ConfigError { .. } | MortgageError::InvalidConfigValueError { .. } => 2,
            MortgageError::ValidationError { .. } | MortgageError::MissingFieldsError { .. } => 3,
            _ => 1,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MortgageError::NotFoundError { .. })
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            MortgageError::ConfigError { .. } | MortgageError::InvalidConfigValueError { .. } => {
                "Check the configuration file and environment overrides"
            }
            MortgageError::ValidationError { .. } | MortgageError::MissingFieldsError { .. } => {
                "Correct the application data and resubmit"
            }
            MortgageError::ApiError(_) | MortgageError::UpstreamError { .. } => {
                "Check that the pricing and prediction services are reachable"
            }
            MortgageError::StorageError { .. } | MortgageError::EventBusError { .. } => {
                "Check AWS credentials, region and resource names"
            }
            MortgageError::ModelError { .. } => "Retrain the model with `mortgage-engine train`",
            MortgageError::IoError(_) => "Check file paths and permissions",
            _ => "Re-run with --verbose for details",
        }
    }
}

pub type Result<T> = std::result::Result<T, MortgageError>;
