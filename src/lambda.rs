use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use mortgage_engine::adapters::AwsAdapters;
use mortgage_engine::config::ServiceConfig;
use mortgage_engine::core::Aggregator;
use mortgage_engine::utils::logger;
use mortgage_engine::utils::metrics::ServiceMetrics;
use mortgage_engine::BusEvent;
use serde::Serialize;
use std::sync::Arc;

/// API Gateway style reply; EventBridge ignores the payload.
#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

async fn function_handler(event: LambdaEvent<BusEvent>, aggregator: &Aggregator) -> Result<Response, Error> {
    let event = event.payload;
    tracing::info!(
        source = %event.source,
        detail_type = %event.detail_type,
        application_id = ?event.application_id(),
        "Received event"
    );

    let outcome = aggregator.process(&event).await;
    Ok(Response {
        status_code: outcome.status_code,
        body: serde_json::to_string(&outcome.message)?,
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();

    // 從環境變量創建配置
    let mut config = ServiceConfig::default();
    config
        .apply_env_overrides()
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;

    // 創建AWS客戶端和匯總器
    let adapters = AwsAdapters::from_config(&config).await;
    let aggregator = Aggregator::new(
        adapters.results,
        config.decision.clone(),
        Arc::new(ServiceMetrics::new()),
    );
    tracing::info!(table = %config.storage.results_table, "Aggregator ready");

    let aggregator = &aggregator;
    run(service_fn(move |event: LambdaEvent<BusEvent>| async move {
        function_handler(event, aggregator).await
    }))
    .await
}
