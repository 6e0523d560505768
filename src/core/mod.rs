pub mod aggregator;
pub mod events;
pub mod features;
pub mod forest;
pub mod orchestrator;
pub mod prediction;
pub mod pricing;
pub mod training;

pub use aggregator::{AggregationOutcome, Aggregator};
pub use events::EventPublisher;
pub use orchestrator::{LocalScoring, Orchestrator};
pub use prediction::{DefaultPredictionService, ModelArtifact, ModelStatus};
pub use pricing::LoanPricingService;
pub use training::{ModelMetadata, ModelTrainer, TrainingMetrics, TrainingOutcome};
