pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{Cli, Command};
pub use config::{ServiceConfig, ServiceRole};

pub use core::{Aggregator, DefaultPredictionService, LoanPricingService, ModelTrainer, Orchestrator};
pub use domain::model::{ApplicationRecord, BusEvent, LoanApplication, PricingResult, RiskResult};
pub use utils::error::{MortgageError, Result};
