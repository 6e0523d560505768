use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use mortgage_engine::adapters::TrainingClient;
use mortgage_engine::utils::logger;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TRAINING_URL: &str = "http://model-training-service.mortgage-application.svc.cluster.local";
const TRAINING_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

async fn function_handler(_event: LambdaEvent<Value>, client: &TrainingClient) -> Result<Response, Error> {
    tracing::info!("Starting scheduled training at {}", chrono::Utc::now().to_rfc3339());

    let (status_code, body) = match client.trigger().await {
        Ok(result) => {
            tracing::info!(
                model_version = ?result.model_version,
                metrics = ?result.metrics,
                "Training completed successfully"
            );
            (
                200,
                json!({
                    "message": "Training completed successfully",
                    "model_version": result.model_version,
                }),
            )
        }
        Err(e) => {
            tracing::error!("Scheduled training failed: {}", e);
            (500, json!({ "error": "Training failed", "details": e.to_string() }))
        }
    };

    Ok(Response {
        status_code,
        body: body.to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();

    let url = std::env::var("TRAINING_SERVICE_URL").unwrap_or_else(|_| DEFAULT_TRAINING_URL.to_string());
    let client = TrainingClient::new(&url, TRAINING_TIMEOUT)
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;

    let client = &client;
    run(service_fn(move |event: LambdaEvent<Value>| async move {
        function_handler(event, client).await
    }))
    .await
}
