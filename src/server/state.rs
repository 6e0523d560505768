use crate::adapters::{HttpScoring, InMemoryEventBus, InMemoryResultStore, LocalArtifactStore, StaticParameterStore};
use crate::config::{ScoringMode, ServiceConfig, ServiceRole, StorageBackend};
use crate::core::{
    Aggregator, DefaultPredictionService, EventPublisher, LoanPricingService, LocalScoring,
    ModelTrainer, Orchestrator,
};
use crate::domain::model::{DETAIL_MODEL_UPDATED, DETAIL_PRICING_RESULT, DETAIL_RISK_RESULT};
use crate::domain::ports::{ArtifactStore, EventBus, ParameterStore, ResultStore, ScoringBackend};
use crate::utils::error::Result;
use crate::utils::metrics::ServiceMetrics;
use std::sync::Arc;

/// The infrastructure a service instance talks to.
pub struct Ports {
    pub bus: Arc<dyn EventBus>,
    pub results: Arc<dyn ResultStore>,
    pub parameters: Arc<dyn ParameterStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    local_bus: Option<Arc<InMemoryEventBus>>,
}

impl Ports {
    /// Single-process wiring: in-memory bus and results, artifacts on local disk.
    pub fn in_memory(config: &ServiceConfig) -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        Self {
            bus: bus.clone(),
            results: Arc::new(InMemoryResultStore::with_capacity(config.storage.memory_results_capacity)),
            parameters: Arc::new(StaticParameterStore::new()),
            artifacts: Arc::new(LocalArtifactStore::new(config.storage.artifact_dir.clone())),
            local_bus: Some(bus),
        }
    }

    #[cfg(feature = "aws")]
    pub async fn aws(config: &ServiceConfig) -> Self {
        let adapters = crate::adapters::AwsAdapters::from_config(config).await;
        Self {
            bus: adapters.bus,
            results: adapters.results,
            parameters: adapters.parameters,
            artifacts: adapters.artifacts,
            local_bus: None,
        }
    }

    pub async fn from_config(config: &ServiceConfig) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Memory => Ok(Self::in_memory(config)),
            #[cfg(feature = "aws")]
            StorageBackend::Aws => Ok(Self::aws(config).await),
            #[cfg(not(feature = "aws"))]
            StorageBackend::Aws => Err(crate::utils::error::MortgageError::ConfigError {
                message: "storage.backend = \"aws\" requires the `aws` feature".to_string(),
            }),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_parameters(mut self, parameters: Arc<dyn ParameterStore>) -> Self {
        self.parameters = parameters;
        self
    }

    /// The in-process bus, when events are delivered locally.
    pub fn local_bus(&self) -> Option<Arc<InMemoryEventBus>> {
        self.local_bus.clone()
    }
}

/// Services mounted for one role. Absent services have no routes.
pub struct AppState {
    pub role: ServiceRole,
    pub max_body_bytes: usize,
    pub metrics: Arc<ServiceMetrics>,
    pub publisher: EventPublisher,
    pub pricing: Option<Arc<LoanPricingService>>,
    pub prediction: Option<Arc<DefaultPredictionService>>,
    pub trainer: Option<Arc<ModelTrainer>>,
    pub orchestrator: Option<Arc<Orchestrator>>,
}

impl AppState {
    pub async fn build(config: &ServiceConfig, ports: Ports) -> Result<Self> {
        let role = config.server.role;
        let metrics = Arc::new(ServiceMetrics::new());
        let publisher = EventPublisher::new(
            ports.bus.clone(),
            config.events.bus_name.clone(),
            metrics.clone(),
        );

        // Local scoring runs both services inside the orchestrator.
        let local_scoring =
            role.serves_orchestration() && config.orchestrator.scoring == ScoringMode::Local;

        let pricing = (role.serves_pricing() || local_scoring).then(|| {
            Arc::new(LoanPricingService::new(
                ports.parameters.clone(),
                config.pricing.clone(),
                metrics.clone(),
            ))
        });

        let prediction = (role.serves_prediction() || local_scoring).then(|| {
            Arc::new(DefaultPredictionService::new(
                ports.artifacts.clone(),
                config.prediction.clone(),
                metrics.clone(),
            ))
        });
        if let Some(prediction) = &prediction {
            if config.prediction.load_on_startup {
                prediction.try_load_model().await;
            }
        }

        let trainer = role.serves_training().then(|| {
            Arc::new(ModelTrainer::new(
                ports.artifacts.clone(),
                config.training.clone(),
                config.prediction.clone(),
                Some(publisher.clone()),
            ))
        });

        let orchestrator = if role.serves_orchestration() {
            let scoring: Arc<dyn ScoringBackend> =
                match (config.orchestrator.scoring, &pricing, &prediction) {
                    (ScoringMode::Local, Some(pricing), Some(prediction)) => Arc::new(
                        LocalScoring::new(pricing.clone(), prediction.clone(), publisher.clone()),
                    ),
                    _ => Arc::new(HttpScoring::new(
                        &config.orchestrator.pricing_url,
                        &config.orchestrator.prediction_url,
                        config.orchestrator.request_timeout(),
                    )?),
                };
            Some(Arc::new(Orchestrator::new(
                ports.results.clone(),
                publisher.clone(),
                scoring,
                config.orchestrator.clone(),
                metrics.clone(),
            )))
        } else {
            None
        };

        if let Some(bus) = ports.local_bus() {
            let aggregator = Arc::new(Aggregator::new(
                ports.results.clone(),
                config.decision.clone(),
                metrics.clone(),
            ));
            bus.subscribe(DETAIL_PRICING_RESULT, aggregator.clone()).await;
            bus.subscribe(DETAIL_RISK_RESULT, aggregator).await;
            if let Some(prediction) = &prediction {
                bus.subscribe(DETAIL_MODEL_UPDATED, prediction.clone()).await;
            }
            tracing::debug!("In-memory event rules registered");
        }

        tracing::info!(
            role = %role,
            pricing = pricing.is_some(),
            prediction = prediction.is_some(),
            training = trainer.is_some(),
            orchestration = orchestrator.is_some(),
            "Service state ready"
        );

        Ok(Self {
            role,
            max_body_bytes: config.server.max_body_bytes,
            metrics,
            publisher,
            pricing,
            prediction,
            trainer,
            orchestrator,
        })
    }
}
