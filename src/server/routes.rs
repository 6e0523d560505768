use super::response;
use super::state::AppState;
use crate::core::pricing::quick_quote;
use crate::domain::model::{ApplicationRecord, LoanApplication};
use crate::utils::error::{MortgageError, Result};
use hyper::{Body, Method, Request, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

const APPLICATION_FIELDS: &[&str] = &["loan_amount", "credit_score"];
const QUOTE_FIELDS: &[&str] = &["loan_amount", "credit_score", "dti_ratio"];

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Health,
    Metrics,
    PriceLoan,
    PricingCalculate,
    PricingProcess,
    PredictDefault,
    PredictionDefaultRisk,
    Predict,
    TrainModel,
    ModelStatus,
    ProcessApplication,
    SubmitApplication,
    ApplicationStatus(String),
}

impl Route {
    pub fn resolve(path: &str) -> Option<Route> {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        let route = match path {
            "/health" => Route::Health,
            "/metrics" => Route::Metrics,
            "/price_loan" => Route::PriceLoan,
            "/pricing/calculate" => Route::PricingCalculate,
            "/process" => Route::PricingProcess,
            "/predict_default" => Route::PredictDefault,
            "/prediction/default-risk" => Route::PredictionDefaultRisk,
            "/predict" => Route::Predict,
            "/train-model" => Route::TrainModel,
            "/model-status" => Route::ModelStatus,
            "/process_application" => Route::ProcessApplication,
            "/submit-application" => Route::SubmitApplication,
            other => {
                let id = other
                    .strip_prefix("/application-status/")
                    .or_else(|| other.strip_prefix("/status/"))?;
                if id.is_empty() || id.contains('/') {
                    return None;
                }
                Route::ApplicationStatus(id.to_string())
            }
        };
        Some(route)
    }

    pub fn method(&self) -> Method {
        match self {
            Route::Health | Route::Metrics | Route::ModelStatus | Route::ApplicationStatus(_) => Method::GET,
            _ => Method::POST,
        }
    }

    fn mounted(&self, state: &AppState) -> bool {
        match self {
            Route::Health | Route::Metrics => true,
            Route::PriceLoan | Route::PricingCalculate | Route::PricingProcess => {
                state.role.serves_pricing()
            }
            Route::PredictDefault | Route::PredictionDefaultRisk | Route::Predict => {
                state.role.serves_prediction()
            }
            Route::TrainModel => state.trainer.is_some(),
            Route::ModelStatus => {
                state.trainer.is_some() || state.role.serves_prediction()
            }
            Route::ProcessApplication | Route::SubmitApplication | Route::ApplicationStatus(_) => {
                state.orchestrator.is_some()
            }
        }
    }
}

pub async fn handle(req: Request<Body>, state: Arc<AppState>) -> std::result::Result<Response<Body>, hyper::Error> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match Route::resolve(&path).filter(|route| route.mounted(&state)) {
        None => response::error(404, "Not found"),
        Some(route) if route.method() != method => response::error(405, "Method not allowed"),
        Some(route) => match dispatch(route, req, &state).await {
            Ok(response) => response,
            Err(e) => {
                if e.status_code() >= 500 {
                    tracing::error!(method = %method, path = %path, "Request failed: {}", e);
                }
                response::from_error(&e)
            }
        },
    };

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request handled"
    );
    Ok(response)
}

fn unavailable(service: &str) -> MortgageError {
    MortgageError::ConfigError {
        message: format!("{} service is not configured", service),
    }
}

async fn dispatch(route: Route, req: Request<Body>, state: &AppState) -> Result<Response<Body>> {
    match route {
        Route::Health => health(state).await,
        Route::Metrics => Ok(response::text(200, state.metrics.render())),
        Route::PriceLoan => price_loan(req, state).await,
        Route::PricingCalculate => pricing(req, state, false).await,
        Route::PricingProcess => pricing(req, state, true).await,
        Route::PredictDefault => predict_default(req, state).await,
        Route::PredictionDefaultRisk => prediction(req, state, false).await,
        Route::Predict => prediction(req, state, true).await,
        Route::TrainModel => train_model(state).await,
        Route::ModelStatus => model_status(state).await,
        Route::ProcessApplication => process_application(req, state).await,
        Route::SubmitApplication => submit_application(req, state).await,
        Route::ApplicationStatus(id) => application_status(&id, state).await,
    }
}

async fn health(state: &AppState) -> Result<Response<Body>> {
    let mut body = json!({
        "status": "healthy",
        "service": state.role.service_name(),
    });
    if state.role.serves_prediction() {
        if let Some(prediction) = &state.prediction {
            body["model_status"] = json!(prediction.status().await.model_type);
        }
    }
    response::json(200, &body)
}

#[derive(Debug, Deserialize)]
struct QuoteRequest {
    loan_amount: f64,
    credit_score: u32,
    dti_ratio: f64,
}

async fn price_loan(req: Request<Body>, state: &AppState) -> Result<Response<Body>> {
    let quote: QuoteRequest = response::read_json(req, QUOTE_FIELDS, state.max_body_bytes).await?;
    let rate = quick_quote(quote.loan_amount, quote.credit_score, quote.dti_ratio)?;
    response::json(200, &json!({ "interest_rate": rate }))
}

async fn pricing(req: Request<Body>, state: &AppState, publish: bool) -> Result<Response<Body>> {
    let service = state.pricing.as_ref().ok_or_else(|| unavailable("pricing"))?;
    let application: LoanApplication = response::read_json(req, APPLICATION_FIELDS, state.max_body_bytes).await?;
    let result = service.process(&application).await?;

    if publish {
        state.publisher.pricing_calculated(&result).await?;
    }
    response::json(200, &result)
}

async fn predict_default(req: Request<Body>, state: &AppState) -> Result<Response<Body>> {
    let service = state.prediction.as_ref().ok_or_else(|| unavailable("prediction"))?;
    let application: LoanApplication = response::read_json(req, QUOTE_FIELDS, state.max_body_bytes).await?;
    let result = service.assess(&application).await?;

    response::json(
        200,
        &json!({
            "default_risk": result.default_risk,
            "default_probability": result.default_probability,
            "risk_category": result.risk_category,
        }),
    )
}

async fn prediction(req: Request<Body>, state: &AppState, publish: bool) -> Result<Response<Body>> {
    let service = state.prediction.as_ref().ok_or_else(|| unavailable("prediction"))?;
    let application: LoanApplication = response::read_json(req, APPLICATION_FIELDS, state.max_body_bytes).await?;
    let result = service.assess(&application).await?;

    if publish {
        state.publisher.risk_assessed(&result).await?;
    }
    response::json(200, &result)
}

async fn train_model(state: &AppState) -> Result<Response<Body>> {
    let trainer = state.trainer.as_ref().ok_or_else(|| unavailable("training"))?;
    tracing::info!("Starting model training pipeline");

    match trainer.train_and_deploy().await {
        Ok(outcome) => response::json(
            200,
            &json!({
                "status": "success",
                "model_version": outcome.model_version,
                "metrics": outcome.metrics,
            }),
        ),
        Err(e) => {
            tracing::error!("Model training failed: {}", e);
            response::json(500, &json!({ "status": "error", "error": e.to_string() }))
        }
    }
}

async fn model_status(state: &AppState) -> Result<Response<Body>> {
    if let Some(trainer) = &state.trainer {
        let metadata = match trainer.load_metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::error!("Could not read model metadata: {}", e);
                return response::json(500, &json!({ "status": "error", "error": e.to_string() }));
            }
        };
        let body = match metadata {
            Some(metadata) => json!({
                "status": "available",
                "model_version": metadata.model_version,
                "training_timestamp": metadata.training_timestamp,
                "performance_metrics": metadata.performance_metrics,
                "artifact_paths": metadata.artifact_paths,
            }),
            None => json!({
                "status": "no_model",
                "message": "No trained model found",
            }),
        };
        return response::json(200, &body);
    }

    let prediction = state.prediction.as_ref().ok_or_else(|| unavailable("prediction"))?;
    let status = prediction.status().await;
    let mut body = serde_json::to_value(&status)?;
    body["status"] = json!(if status.model_version.is_some() {
        "available"
    } else {
        "no_model"
    });
    response::json(200, &body)
}

fn record_body(record: &ApplicationRecord) -> Result<Value> {
    let mut body = serde_json::to_value(record)?;
    body["status"] = json!(record.status());
    Ok(body)
}

async fn process_application(req: Request<Body>, state: &AppState) -> Result<Response<Body>> {
    let orchestrator = state.orchestrator.as_ref().ok_or_else(|| unavailable("orchestrator"))?;
    let application: LoanApplication = response::read_json(req, APPLICATION_FIELDS, state.max_body_bytes).await?;

    let (record, complete) = orchestrator.process(application).await?;
    response::json(if complete { 200 } else { 202 }, &record_body(&record)?)
}

async fn submit_application(req: Request<Body>, state: &AppState) -> Result<Response<Body>> {
    let orchestrator = state.orchestrator.as_ref().ok_or_else(|| unavailable("orchestrator"))?;
    let application: LoanApplication = response::read_json(req, APPLICATION_FIELDS, state.max_body_bytes).await?;

    let application_id = orchestrator.submit(application).await?;
    response::json(
        202,
        &json!({ "application_id": application_id, "status": "submitted" }),
    )
}

async fn application_status(id: &str, state: &AppState) -> Result<Response<Body>> {
    let orchestrator = state.orchestrator.as_ref().ok_or_else(|| unavailable("orchestrator"))?;
    let record = orchestrator.status(id).await?;
    response::json(200, &record_body(&record)?)
}
