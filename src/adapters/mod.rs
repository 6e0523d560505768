// Concrete implementations of the domain ports.

#[cfg(feature = "aws")]
pub mod aws;
pub mod http;
pub mod local;
pub mod memory;

#[cfg(feature = "aws")]
pub use aws::{AwsAdapters, DynamoDbParameterStore, DynamoDbResultStore, EventBridgeBus, S3ArtifactStore};
pub use http::{HttpScoring, TrainingClient};
pub use local::LocalArtifactStore;
pub use memory::{InMemoryEventBus, InMemoryResultStore, StaticParameterStore};
