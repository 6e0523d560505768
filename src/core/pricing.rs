use crate::config::PricingConfig;
use crate::domain::model::{round_to, LoanApplication, PricingResult};
use crate::domain::ports::ParameterStore;
use crate::utils::error::{MortgageError, Result};
use crate::utils::metrics::ServiceMetrics;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

const QUICK_QUOTE_BASE_RATE: f64 = 3.5;

/// Three-factor rate used by the `/price_loan` quick quote.
pub fn quick_quote(loan_amount: f64, credit_score: u32, dti_ratio: f64) -> Result<f64> {
    validate_inputs(loan_amount, credit_score, Some(dti_ratio))?;

    let mut risk_premium = 0.0;
    if credit_score < 640 {
        risk_premium += 2.0;
    } else if credit_score < 740 {
        risk_premium += 1.0;
    }

    if dti_ratio > 0.4 {
        risk_premium += 1.5;
    }

    Ok(QUICK_QUOTE_BASE_RATE + risk_premium)
}

pub fn validate_application(application: &LoanApplication) -> Result<()> {
    validate_inputs(
        application.loan_amount,
        application.credit_score,
        application.dti_ratio,
    )?;

    if let Some(value) = application.property_value {
        if !(value > 0.0) {
            return Err(MortgageError::validation("Property value must be positive"));
        }
    }
    if let Some(income) = application.applicant_income {
        if !(income > 0.0) {
            return Err(MortgageError::validation("Applicant income must be positive"));
        }
    }
    if !(1..=50).contains(&application.loan_term) {
        return Err(MortgageError::validation(
            "Loan term must be between 1 and 50 years",
        ));
    }
    Ok(())
}

fn validate_inputs(loan_amount: f64, credit_score: u32, dti_ratio: Option<f64>) -> Result<()> {
    if !(loan_amount > 0.0) || !loan_amount.is_finite() {
        return Err(MortgageError::validation("Loan amount must be positive"));
    }
    if !(300..=850).contains(&credit_score) {
        return Err(MortgageError::validation(
            "Credit score must be between 300 and 850",
        ));
    }
    if let Some(dti) = dti_ratio {
        if !(0.0..=1.0).contains(&dti) {
            return Err(MortgageError::validation("DTI ratio must be between 0 and 1"));
        }
    }
    Ok(())
}

/// Standard fixed-rate amortization. A zero rate spreads the principal evenly.
pub fn monthly_payment(principal: f64, annual_rate_pct: f64, term_months: u32) -> f64 {
    let monthly_rate = annual_rate_pct / 100.0 / 12.0;
    let n = term_months as f64;
    if monthly_rate == 0.0 {
        return principal / n;
    }
    let growth = (1.0 + monthly_rate).powf(n);
    principal * (monthly_rate * growth) / (growth - 1.0)
}

pub struct LoanPricingService {
    parameters: Arc<dyn ParameterStore>,
    config: PricingConfig,
    metrics: Arc<ServiceMetrics>,
}

impl LoanPricingService {
    pub fn new(
        parameters: Arc<dyn ParameterStore>,
        config: PricingConfig,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            parameters,
            config,
            metrics,
        }
    }

    async fn base_rate(&self) -> f64 {
        match self
            .parameters
            .get_parameter(&self.config.base_rate_parameter)
            .await
        {
            Ok(Some(rate)) => rate,
            Ok(None) => self.config.default_base_rate,
            Err(e) => {
                tracing::warn!("Base rate lookup failed, using fallback: {}", e);
                self.config.default_base_rate
            }
        }
    }

    pub async fn interest_rate(&self, application: &LoanApplication) -> f64 {
        let base_rate = self.base_rate().await;
        let rate = base_rate + rate_adjustments(application);
        rate.max(self.config.rate_floor)
    }

    pub async fn process(&self, application: &LoanApplication) -> Result<PricingResult> {
        validate_application(application)?;
        self.metrics.pricing_requests.inc();
        let start = Instant::now();

        let interest_rate = self.interest_rate(application).await;
        let months = application.term_months();
        let payment = monthly_payment(application.loan_amount, interest_rate, months);
        let total_interest = payment * months as f64 - application.loan_amount;

        let elapsed = start.elapsed();
        self.metrics.pricing_duration.observe(elapsed);

        let result = PricingResult {
            application_id: application.application_id.clone(),
            interest_rate: round_to(interest_rate, 3),
            monthly_payment: round_to(payment, 2),
            total_interest: round_to(total_interest, 2),
            loan_amount: application.loan_amount,
            loan_to_value_ratio: application.loan_to_value().map(|ltv| round_to(ltv, 3)),
            debt_to_income_ratio: application
                .applicant_income
                .filter(|income| *income > 0.0)
                .map(|income| round_to(payment * 12.0 / income, 3)),
            model_type: "rule_based".to_string(),
            processing_time_ms: elapsed.as_secs_f64() * 1000.0,
            timestamp: Utc::now(),
        };

        tracing::info!(
            application_id = %result.application_id,
            rate = result.interest_rate,
            payment = result.monthly_payment,
            "Loan priced"
        );
        Ok(result)
    }
}

fn rate_adjustments(application: &LoanApplication) -> f64 {
    let credit = if application.credit_score < 620 {
        2.0
    } else if application.credit_score < 680 {
        1.0
    } else if application.credit_score > 750 {
        -0.5
    } else {
        0.0
    };

    let dti = match application.dti_ratio {
        Some(d) if d > 0.43 => 0.75,
        Some(d) if d > 0.36 => 0.25,
        _ => 0.0,
    };

    let ltv = match application.loan_to_value() {
        Some(l) if l > 0.95 => 1.0,
        Some(l) if l > 0.90 => 0.5,
        Some(l) if l < 0.80 => -0.25,
        _ => 0.0,
    };

    credit + dti + ltv
}
