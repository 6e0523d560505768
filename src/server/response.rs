use crate::utils::error::{MortgageError, Result};
use crate::utils::validation::require_fields;
use hyper::body::HttpBody;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

fn with_body(status: u16, content_type: &'static str, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Response<Body>> {
    let body = serde_json::to_vec(value)?;
    Ok(with_body(status, "application/json", Body::from(body)))
}

pub fn text(status: u16, body: String) -> Response<Body> {
    with_body(status, "text/plain; version=0.0.4", Body::from(body))
}

pub fn error(status: u16, message: &str) -> Response<Body> {
    let body = json!({ "error": message }).to_string();
    with_body(status, "application/json", Body::from(body))
}

/// `{"error": ...}` at the status the error maps to.
pub fn from_error(err: &MortgageError) -> Response<Body> {
    let status = err.status_code();
    let body = match err {
        MortgageError::MissingFieldsError { fields } => json!({
            "error": err.to_string(),
            "missing_fields": fields,
        }),
        _ => json!({ "error": err.to_string() }),
    };
    with_body(status, "application/json", Body::from(body.to_string()))
}

/// Alternate request keys, moved onto their canonical name before the
/// required-field check.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("debt_to_income_ratio", "dti_ratio"),
    ("annual_income", "applicant_income"),
];

/// Buffers the body, failing once it grows past `limit` bytes.
async fn read_body(req: Request<Body>, limit: usize) -> Result<Vec<u8>> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|length| length > limit) {
        return Err(MortgageError::PayloadTooLargeError { limit });
    }

    let mut body = req.into_body();
    let mut bytes = Vec::with_capacity(declared.unwrap_or(0));
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > limit {
            return Err(MortgageError::PayloadTooLargeError { limit });
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn resolve_aliases(value: &mut Value) {
    let Value::Object(fields) = value else {
        return;
    };
    for (alias, canonical) in FIELD_ALIASES {
        if let Some(aliased) = fields.remove(*alias) {
            if !fields.contains_key(*canonical) {
                fields.insert(canonical.to_string(), aliased);
            }
        }
    }
}

/// Parses a body of at most `limit` bytes as JSON and checks `required` before
/// typed decoding.
pub async fn read_json<T: DeserializeOwned>(
    req: Request<Body>,
    required: &[&str],
    limit: usize,
) -> Result<T> {
    let bytes = read_body(req, limit).await?;
    let mut value: Value = if bytes.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&bytes)
            .map_err(|e| MortgageError::validation(format!("Invalid JSON body: {}", e)))?
    };

    resolve_aliases(&mut value);
    require_fields(&value, required)?;
    serde_json::from_value(value)
        .map_err(|e| MortgageError::validation(format!("Invalid request: {}", e)))
}
