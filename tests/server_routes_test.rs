use hyper::{Body, Method, Request, StatusCode};
use mortgage_engine::config::{ServiceConfig, ServiceRole, TrainingConfig};
use mortgage_engine::server::{self, AppState, Ports};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

async fn app(role: ServiceRole, dir: &TempDir) -> Arc<AppState> {
    let mut config = ServiceConfig::default();
    config.server.role = role;
    config.storage.artifact_dir = dir.path().to_str().unwrap().to_string();
    config.orchestrator.poll_interval_ms = 5;
    config.orchestrator.result_timeout_ms = 200;
    config.training = TrainingConfig {
        synthetic_samples: 600,
        n_estimators: 12,
        max_depth: 6,
        cv_folds: 3,
        ..TrainingConfig::default()
    };

    let ports = Ports::in_memory(&config);
    Arc::new(AppState::build(&config, ports).await.unwrap())
}

async fn call_raw(state: &Arc<AppState>, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let body = body.map(|v| Body::from(v.to_string())).unwrap_or_else(Body::empty);
    let req = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let response = server::handle(req, state.clone()).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

async fn call(state: &Arc<AppState>, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = call_raw(state, method, path, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn prime_application() -> Value {
    json!({
        "loan_amount": 250000,
        "credit_score": 720,
        "dti_ratio": 0.35,
        "applicant_income": 85000,
        "property_value": 350000
    })
}

#[tokio::test]
async fn test_health_and_unknown_routes() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::All, &dir).await;

    let (status, body) = call(&state, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "mortgage-engine");
    assert_eq!(body["model_status"], "rule_based");

    let (status, body) = call(&state, Method::GET, "/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "Not found"}));

    let (status, _) = call(&state, Method::GET, "/price_loan", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_price_loan_quick_quote() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::Pricing, &dir).await;

    let (status, body) = call(
        &state,
        Method::POST,
        "/price_loan",
        Some(json!({"loan_amount": 250000, "credit_score": 720, "dti_ratio": 0.35})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"interest_rate": 4.5}));

    let (status, body) = call(
        &state,
        Method::POST,
        "/price_loan",
        Some(json!({"loan_amount": 250000, "credit_score": 720})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["missing_fields"], json!(["dti_ratio"]));

    let (status, body) = call(
        &state,
        Method::POST,
        "/price_loan",
        Some(json!({"loan_amount": 250000, "credit_score": 200, "dti_ratio": 0.35})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Credit score must be between 300 and 850"));
}

#[tokio::test]
async fn test_role_limits_mounted_routes() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::Pricing, &dir).await;

    let (status, _) = call(&state, Method::POST, "/predict_default", Some(prime_application())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&state, Method::POST, "/process_application", Some(prime_application())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&state, Method::POST, "/pricing/calculate", Some(prime_application())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_type"], "rule_based");
    assert!(body["monthly_payment"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_predict_default_without_model() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::Prediction, &dir).await;

    let (status, body) = call(
        &state,
        Method::POST,
        "/predict_default",
        Some(json!({"loan_amount": 250000, "credit_score": 720, "dti_ratio": 0.35})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default_risk"], false);
    assert_eq!(body["default_probability"], 0.05);
    assert_eq!(body["risk_category"], "LOW");

    let (status, body) = call(&state, Method::GET, "/model-status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_model");
    assert_eq!(body["model_type"], "rule_based");
}

#[tokio::test]
async fn test_process_application_end_to_end() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::All, &dir).await;

    let (status, record) = call(&state, Method::POST, "/process_application", Some(prime_application())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "completed");
    assert_eq!(record["processing_complete"], true);
    assert_eq!(record["final_decision"]["decision"], "APPROVED");
    assert_eq!(record["risk_result"]["risk_category"], "LOW");
    assert!(record["pricing_result"]["interest_rate"].as_f64().unwrap() >= 3.0);

    let id = record["application_id"].as_str().unwrap().to_string();
    let (status, fetched) = call(&state, Method::GET, &format!("/status/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["final_decision"], record["final_decision"]);

    let (status, _) = call(&state, Method::GET, &format!("/application-status/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&state, Method::GET, "/status/unknown-id", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, metrics) = call_raw(&state, Method::GET, "/metrics", None).await;
    let metrics = String::from_utf8(metrics).unwrap();
    assert!(metrics.contains("applications_submitted_total 1"));
    assert!(metrics.contains("loan_decisions_total{decision=\"APPROVED\"} 1"));
}

#[tokio::test]
async fn test_high_risk_application_gets_conditions() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::Orchestrator, &dir).await;

    let (status, record) = call(
        &state,
        Method::POST,
        "/process_application",
        Some(json!({
            "application_id": "app-risky",
            "loan_amount": 290000,
            "credit_score": 580,
            "dti_ratio": 0.5,
            "property_value": 300000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["application_id"], "app-risky");
    assert_eq!(record["risk_result"]["risk_category"], "HIGH");
    assert_eq!(record["final_decision"]["decision"], "APPROVED_WITH_CONDITIONS");
}

#[tokio::test]
async fn test_submit_application_validates() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::Orchestrator, &dir).await;

    let (status, body) = call(&state, Method::POST, "/submit-application", Some(json!({"loan_amount": 1000}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["missing_fields"], json!(["credit_score"]));

    let (status, body) = call(&state, Method::POST, "/submit-application", Some(prime_application())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "submitted");
    assert!(body["application_id"].as_str().is_some());
}

#[tokio::test]
async fn test_train_model_reloads_predictor() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::All, &dir).await;

    let (status, body) = call(&state, Method::GET, "/model-status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_model");

    let (status, body) = call(&state, Method::POST, "/train-model", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    let version = body["model_version"].as_str().unwrap().to_string();
    assert!(body["metrics"]["roc_auc_score"].as_f64().is_some());

    let (_, body) = call(&state, Method::GET, "/model-status", None).await;
    assert_eq!(body["status"], "available");
    assert_eq!(body["model_version"], version.as_str());

    // ModelUpdated reaches the predictor through the bus
    let (_, risk) = call(&state, Method::POST, "/prediction/default-risk", Some(prime_application())).await;
    assert_eq!(risk["model_type"], "ml");
    assert_eq!(risk["model_version"], version.as_str());
    assert!(dir.path().join("models/random_forest_default_model.json").exists());
}

#[tokio::test]
async fn test_corrupt_artifacts_degrade_gracefully() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::All, &dir).await;
    let (status, _) = call(&state, Method::POST, "/train-model", None).await;
    assert_eq!(status, StatusCode::OK);

    let model_path = dir.path().join("models/random_forest_default_model.json");
    let mut model: Value = serde_json::from_slice(&std::fs::read(&model_path).unwrap()).unwrap();
    model["forest"]["trees"] = json!([]);
    std::fs::write(&model_path, model.to_string()).unwrap();

    let predictor = app(ServiceRole::Prediction, &dir).await;
    let (status, risk) = call(&predictor, Method::POST, "/prediction/default-risk", Some(prime_application())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(risk["model_type"], "rule_based");
    assert!(risk["default_probability"].as_f64().unwrap().is_finite());

    std::fs::write(dir.path().join("models/model_metadata.json"), "{not json").unwrap();
    let trainer = app(ServiceRole::Training, &dir).await;
    let (status, body) = call(&trainer, Method::GET, "/model-status", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_predict_default_accepts_income_and_dti_aliases() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::Prediction, &dir).await;

    let (status, body) = call(
        &state,
        Method::POST,
        "/predict_default",
        Some(json!({
            "loan_amount": 250000,
            "credit_score": 720,
            "debt_to_income_ratio": 0.35,
            "annual_income": 85000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["risk_category"], "LOW");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let dir = TempDir::new().unwrap();
    let state = app(ServiceRole::Pricing, &dir).await;

    let mut application = prime_application();
    application["notes"] = json!("x".repeat(2 * 1024 * 1024));
    let (status, body) = call(&state, Method::POST, "/price_loan", Some(application)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["error"].as_str().unwrap().contains("exceeds"));
}
