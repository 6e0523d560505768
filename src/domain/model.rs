use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SOURCE_APPLICATION: &str = "mortgage-application";
pub const SOURCE_PRICING: &str = "loan-pricing-service";
pub const SOURCE_PREDICTION: &str = "default-prediction-service";
pub const SOURCE_TRAINING: &str = "model-training-service";

pub const DETAIL_APPLICATION_SUBMITTED: &str = "LoanApplicationSubmitted";
pub const DETAIL_PRICING_RESULT: &str = "PricingResult";
pub const DETAIL_RISK_RESULT: &str = "RiskResult";
pub const DETAIL_MODEL_UPDATED: &str = "ModelUpdated";

fn new_application_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_loan_term() -> u32 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    #[serde(default = "new_application_id")]
    pub application_id: String,
    pub loan_amount: f64,
    pub credit_score: u32,
    #[serde(default, alias = "debt_to_income_ratio")]
    pub dti_ratio: Option<f64>,
    #[serde(default, alias = "annual_income")]
    pub applicant_income: Option<f64>,
    #[serde(default)]
    pub property_value: Option<f64>,
    #[serde(default)]
    pub down_payment: Option<f64>,
    #[serde(default)]
    pub employment_years: Option<f64>,
    /// Term in years.
    #[serde(default = "default_loan_term")]
    pub loan_term: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_purpose: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl LoanApplication {
    pub fn new(loan_amount: f64, credit_score: u32) -> Self {
        Self {
            application_id: new_application_id(),
            loan_amount,
            credit_score,
            dti_ratio: None,
            applicant_income: None,
            property_value: None,
            down_payment: None,
            employment_years: None,
            loan_term: default_loan_term(),
            property_type: None,
            loan_purpose: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_dti(mut self, dti_ratio: f64) -> Self {
        self.dti_ratio = Some(dti_ratio);
        self
    }

    pub fn with_income(mut self, income: f64) -> Self {
        self.applicant_income = Some(income);
        self
    }

    pub fn with_property_value(mut self, value: f64) -> Self {
        self.property_value = Some(value);
        self
    }

    pub fn with_employment_years(mut self, years: f64) -> Self {
        self.employment_years = Some(years);
        self
    }

    pub fn loan_to_value(&self) -> Option<f64> {
        self.property_value
            .filter(|v| *v > 0.0)
            .map(|v| self.loan_amount / v)
    }

    pub fn loan_to_income(&self) -> Option<f64> {
        self.applicant_income
            .filter(|v| *v > 0.0)
            .map(|v| self.loan_amount / v)
    }

    pub fn term_months(&self) -> u32 {
        self.loan_term * 12
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingResult {
    pub application_id: String,
    pub interest_rate: f64,
    pub monthly_payment: f64,
    pub total_interest: f64,
    pub loan_amount: f64,
    #[serde(default)]
    pub loan_to_value_ratio: Option<f64>,
    #[serde(default)]
    pub debt_to_income_ratio: Option<f64>,
    pub model_type: String,
    pub processing_time_ms: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskCategory {
    pub fn from_probability(probability: f64) -> Self {
        if probability < 0.10 {
            RiskCategory::Low
        } else if probability < 0.25 {
            RiskCategory::Medium
        } else if probability < 0.50 {
            RiskCategory::High
        } else {
            RiskCategory::VeryHigh
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Low => "LOW",
            RiskCategory::Medium => "MEDIUM",
            RiskCategory::High => "HIGH",
            RiskCategory::VeryHigh => "VERY_HIGH",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub application_id: String,
    pub default_probability: f64,
    pub default_risk: bool,
    pub risk_category: RiskCategory,
    pub confidence_score: f64,
    pub model_type: String,
    #[serde(default)]
    pub model_version: Option<String>,
    pub processing_time_ms: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    ApprovedWithConditions,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "APPROVED",
            Decision::ApprovedWithConditions => "APPROVED_WITH_CONDITIONS",
            Decision::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    pub decision: Decision,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub decided_at: DateTime<Utc>,
}

/// One row of the results table, keyed by `application_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application_id: String,
    #[serde(default)]
    pub application_data: Option<LoanApplication>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pricing_result: Option<PricingResult>,
    #[serde(default)]
    pub risk_result: Option<RiskResult>,
    #[serde(default)]
    pub final_decision: Option<FinalDecision>,
    #[serde(default)]
    pub processing_complete: bool,
}

impl ApplicationRecord {
    pub fn new(application: &LoanApplication) -> Self {
        Self {
            application_id: application.application_id.clone(),
            application_data: Some(application.clone()),
            created_at: application.timestamp,
            updated_at: None,
            pricing_result: None,
            risk_result: None,
            final_decision: None,
            processing_complete: false,
        }
    }

    /// Placeholder row for results that arrive before the submission is stored.
    pub fn empty(application_id: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            application_data: None,
            created_at: Utc::now(),
            updated_at: None,
            pricing_result: None,
            risk_result: None,
            final_decision: None,
            processing_complete: false,
        }
    }

    pub fn status(&self) -> &'static str {
        if self.processing_complete {
            "completed"
        } else {
            "processing"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub source: String,
    #[serde(rename = "detail-type", alias = "detail_type")]
    pub detail_type: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    #[serde(default)]
    pub event_bus_name: Option<String>,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(source: &str, detail_type: &str, detail: serde_json::Value) -> Self {
        Self {
            source: source.to_string(),
            detail_type: detail_type.to_string(),
            detail,
            event_bus_name: None,
            time: Utc::now(),
        }
    }

    pub fn application_id(&self) -> Option<&str> {
        self.detail
            .get("application_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_defaults_and_aliases() {
        let app: LoanApplication = serde_json::from_value(serde_json::json!({
            "loan_amount": 250000,
            "credit_score": 720,
            "debt_to_income_ratio": 0.35,
            "annual_income": 85000
        }))
        .unwrap();

        assert!(!app.application_id.is_empty());
        assert_eq!(app.dti_ratio, Some(0.35));
        assert_eq!(app.applicant_income, Some(85000.0));
        assert_eq!(app.loan_term, 30);
        assert_eq!(app.term_months(), 360);
        assert_eq!(app.loan_to_value(), None);
    }

    #[test]
    fn test_risk_category_thresholds() {
        assert_eq!(RiskCategory::from_probability(0.05), RiskCategory::Low);
        assert_eq!(RiskCategory::from_probability(0.10), RiskCategory::Medium);
        assert_eq!(RiskCategory::from_probability(0.25), RiskCategory::High);
        assert_eq!(RiskCategory::from_probability(0.49), RiskCategory::High);
        assert_eq!(RiskCategory::from_probability(0.50), RiskCategory::VeryHigh);
        assert_eq!(
            serde_json::to_value(RiskCategory::VeryHigh).unwrap(),
            serde_json::json!("VERY_HIGH")
        );
    }

    #[test]
    fn test_bus_event_wire_names() {
        let event: BusEvent = serde_json::from_value(serde_json::json!({
            "source": "loan-pricing-service",
            "detail-type": "PricingResult",
            "detail": {"application_id": "app-1"}
        }))
        .unwrap();
        assert_eq!(event.detail_type, DETAIL_PRICING_RESULT);
        assert_eq!(event.application_id(), Some("app-1"));

        let empty = BusEvent::new("x", "PricingResult", serde_json::json!({"application_id": ""}));
        assert_eq!(empty.application_id(), None);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(4.56789, 3), 4.568);
        assert_eq!(round_to(1234.5678, 2), 1234.57);
    }
}
