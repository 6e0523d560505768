use clap::Parser;
use mortgage_engine::config::{Cli, Command, ServiceConfig};
use mortgage_engine::core::aggregator::decide;
use mortgage_engine::core::events::EventPublisher;
use mortgage_engine::core::pricing::quick_quote;
use mortgage_engine::server::{self, AppState, Ports};
use mortgage_engine::utils::error::{MortgageError, Result};
use mortgage_engine::utils::metrics::ServiceMetrics;
use mortgage_engine::utils::{logger, validation::Validate};
use mortgage_engine::{DefaultPredictionService, LoanApplication, LoanPricingService, ModelTrainer};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日誌
    logger::init_cli_logger(cli.verbose);
    tracing::info!("Starting mortgage-engine CLI");
    if cli.verbose {
        tracing::debug!("CLI arguments: {:?}", cli);
    }

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        // 輸出用戶友好的錯誤信息，並依錯誤類型決定退出碼
        tracing::error!("❌ {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e);
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(e.exit_code());
    }
    Ok(())
}

fn load_config(path: Option<&str>) -> Result<ServiceConfig> {
    let mut config = match path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            ServiceConfig::from_file(path)?
        }
        None => ServiceConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

async fn run(command: Command, mut config: ServiceConfig) -> Result<()> {
    match command {
        Command::Serve { role, port } => {
            if let Some(role) = role {
                config.server.role =
                    role.parse()
                        .map_err(|reason| MortgageError::InvalidConfigValueError {
                            field: "role".to_string(),
                            value: role.clone(),
                            reason,
                        })?;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            // 驗證配置
            config.validate()?;
            serve(config).await
        }
        Command::Quote {
            loan_amount,
            credit_score,
            dti_ratio,
        } => {
            let rate = quick_quote(loan_amount, credit_score, dti_ratio)?;
            println!("Interest rate: {:.3}%", rate);
            Ok(())
        }
        Command::Assess { application } => {
            config.validate()?;
            assess(&config, &application).await
        }
        Command::Train { samples, trees } => {
            if let Some(samples) = samples {
                config.training.synthetic_samples = samples;
            }
            if let Some(trees) = trees {
                config.training.n_estimators = trees;
            }
            config.validate()?;
            train(&config).await
        }
    }
}

async fn serve(config: ServiceConfig) -> Result<()> {
    let addr: SocketAddr =
        config
            .bind_address()
            .parse()
            .map_err(|_| MortgageError::InvalidConfigValueError {
                field: "server".to_string(),
                value: config.bind_address(),
                reason: "not a valid socket address".to_string(),
            })?;

    tracing::info!(
        "🚀 Starting {} ({} role)",
        config.server.role.service_name(),
        config.server.role
    );
    let ports = Ports::from_config(&config).await?;
    let state = Arc::new(AppState::build(&config, ports).await?);
    server::serve(state, addr, server::shutdown_signal()).await
}

async fn assess(config: &ServiceConfig, path: &str) -> Result<()> {
    let data = tokio::fs::read(path).await?;
    let application: LoanApplication = serde_json::from_slice(&data)?;

    let ports = Ports::from_config(config).await?;
    let metrics = Arc::new(ServiceMetrics::new());
    let pricing = LoanPricingService::new(ports.parameters.clone(), config.pricing.clone(), metrics.clone());
    let prediction = DefaultPredictionService::new(ports.artifacts.clone(), config.prediction.clone(), metrics);
    prediction.try_load_model().await;

    let (priced, risk) = tokio::join!(pricing.process(&application), prediction.assess(&application));
    let (priced, risk) = (priced?, risk?);
    let decision = decide(&risk, &config.decision);

    let report = serde_json::json!({
        "application_id": application.application_id,
        "pricing_result": priced,
        "risk_result": risk,
        "final_decision": decision,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn train(config: &ServiceConfig) -> Result<()> {
    let ports = Ports::from_config(config).await?;
    let publisher = EventPublisher::new(
        ports.bus.clone(),
        config.events.bus_name.clone(),
        Arc::new(ServiceMetrics::new()),
    );
    let trainer = ModelTrainer::new(
        ports.artifacts.clone(),
        config.training.clone(),
        config.prediction.clone(),
        Some(publisher),
    );

    let outcome = trainer.train_and_deploy().await?;
    println!("✅ Model {} trained", outcome.model_version);
    println!("   Test accuracy: {:.4}", outcome.metrics.test_accuracy);
    println!("   ROC AUC:       {:.4}", outcome.metrics.roc_auc_score);
    println!(
        "📁 Saved to: {}",
        ports.artifacts.location(&config.prediction.model_key)
    );
    Ok(())
}
