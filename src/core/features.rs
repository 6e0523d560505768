use crate::domain::model::LoanApplication;

pub const FEATURE_COLUMNS: [&str; 6] = [
    "loan_amount",
    "credit_score_normalized",
    "dti_ratio",
    "ltv_ratio",
    "loan_to_income",
    "employment_stability",
];

const DEFAULT_DTI: f64 = 0.0;
const DEFAULT_LTV: f64 = 0.8;
const DEFAULT_INCOME: f64 = 50_000.0;
const DEFAULT_EMPLOYMENT_YEARS: f64 = 5.0;

/// Raw inputs for one loan, before feature engineering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoanFeatures {
    pub loan_amount: f64,
    pub credit_score: f64,
    pub dti_ratio: f64,
    pub ltv_ratio: f64,
    pub annual_income: f64,
    pub employment_years: f64,
}

impl LoanFeatures {
    pub fn from_application(application: &LoanApplication) -> Self {
        Self {
            loan_amount: application.loan_amount,
            credit_score: application.credit_score as f64,
            dti_ratio: application.dti_ratio.unwrap_or(DEFAULT_DTI),
            ltv_ratio: application.loan_to_value().unwrap_or(DEFAULT_LTV),
            annual_income: application
                .applicant_income
                .filter(|v| *v > 0.0)
                .unwrap_or(DEFAULT_INCOME),
            employment_years: application
                .employment_years
                .unwrap_or(DEFAULT_EMPLOYMENT_YEARS),
        }
    }

    /// Row in [`FEATURE_COLUMNS`] order.
    pub fn to_row(&self) -> Vec<f64> {
        vec![
            self.loan_amount,
            (self.credit_score - 300.0) / (850.0 - 300.0),
            self.dti_ratio,
            self.ltv_ratio,
            self.loan_amount / self.annual_income,
            (self.employment_years / 10.0).clamp(0.0, 1.0),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_from_full_application() {
        let app = LoanApplication::new(350000.0, 720)
            .with_dti(0.35)
            .with_income(87500.0)
            .with_property_value(437500.0)
            .with_employment_years(15.0);
        let row = LoanFeatures::from_application(&app).to_row();

        assert_eq!(row.len(), FEATURE_COLUMNS.len());
        assert_eq!(row[0], 350000.0);
        assert!((row[1] - 420.0 / 550.0).abs() < 1e-12);
        assert_eq!(row[2], 0.35);
        assert!((row[3] - 0.8).abs() < 1e-12);
        assert_eq!(row[4], 4.0);
        assert_eq!(row[5], 1.0);
    }

    #[test]
    fn test_defaults_for_missing_inputs() {
        let app = LoanApplication::new(100000.0, 300);
        let features = LoanFeatures::from_application(&app);
        assert_eq!(features.dti_ratio, 0.0);
        assert_eq!(features.ltv_ratio, 0.8);
        assert_eq!(features.annual_income, 50000.0);

        let row = features.to_row();
        assert_eq!(row[1], 0.0);
        assert_eq!(row[4], 2.0);
        assert_eq!(row[5], 0.5);
    }
}
