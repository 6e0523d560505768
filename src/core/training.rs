use crate::config::{PredictionConfig, TrainingConfig};
use crate::core::events::EventPublisher;
use crate::core::features::{LoanFeatures, FEATURE_COLUMNS};
use crate::core::forest::{ForestParams, RandomForest};
use crate::core::prediction::ModelArtifact;
use crate::domain::ports::ArtifactStore;
use crate::utils::error::{MortgageError, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

const MIN_TRAINING_SAMPLES: usize = 20;

/// One labelled loan, as read from the training CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub loan_amount: f64,
    pub credit_score: f64,
    pub dti_ratio: f64,
    pub employment_years: f64,
    pub annual_income: f64,
    pub property_value: f64,
    #[serde(default)]
    pub ltv_ratio: Option<f64>,
    pub defaulted: u8,
}

impl TrainingSample {
    fn features(&self) -> LoanFeatures {
        LoanFeatures {
            loan_amount: self.loan_amount,
            credit_score: self.credit_score,
            dti_ratio: self.dti_ratio,
            ltv_ratio: self
                .ltv_ratio
                .unwrap_or(self.loan_amount / self.property_value),
            annual_income: self.annual_income,
            employment_years: self.employment_years,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub cv_mean_accuracy: Option<f64>,
    pub cv_std_accuracy: Option<f64>,
    pub roc_auc_score: f64,
    pub feature_importance: BTreeMap<String, f64>,
    pub training_samples: usize,
    pub default_rate: f64,
    pub training_time_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_version: String,
    pub training_timestamp: DateTime<Utc>,
    pub feature_columns: Vec<String>,
    pub model_type: String,
    pub model_parameters: ForestParams,
    pub performance_metrics: TrainingMetrics,
    pub artifact_paths: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingOutcome {
    pub model_version: String,
    pub metrics: TrainingMetrics,
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    // Box-Muller; 1 - u keeps the log argument in (0, 1].
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Beta(2, 3) is the second order statistic of four uniforms.
fn beta_2_3(rng: &mut StdRng) -> f64 {
    let mut u: [f64; 4] = [rng.gen(), rng.gen(), rng.gen(), rng.gen()];
    u.sort_by(f64::total_cmp);
    u[1]
}

/// Seeded synthetic loan book with defaults driven by credit, DTI, LTV and tenure.
pub fn synthetic_dataset(n_samples: usize, seed: u64) -> Vec<TrainingSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_samples)
        .map(|_| {
            let loan_amount = (300_000.0 + 100_000.0 * standard_normal(&mut rng)).clamp(50_000.0, 1_000_000.0);
            let credit_score = (680.0 + 80.0 * standard_normal(&mut rng)).clamp(300.0, 850.0).trunc();
            let dti_ratio = beta_2_3(&mut rng) * 0.6;
            let employment_years = (-(1.0 - rng.gen::<f64>()).ln() * 5.0).clamp(0.0, 40.0);
            let annual_income = (11.0 + 0.5 * standard_normal(&mut rng)).exp().clamp(30_000.0, 500_000.0);
            let property_value =
                (loan_amount / (0.7 + 0.1 * standard_normal(&mut rng))).clamp(loan_amount, loan_amount * 2.0);
            let ltv_ratio = loan_amount / property_value;

            let risk = 0.3 * f64::from(u8::from(credit_score < 640.0))
                + 0.25 * f64::from(u8::from(dti_ratio > 0.43))
                + 0.2 * f64::from(u8::from(ltv_ratio > 0.95))
                + 0.15 * f64::from(u8::from(employment_years < 2.0))
                + 0.1 * standard_normal(&mut rng);
            let default_probability = 1.0 / (1.0 + (-5.0 * (risk - 0.5)).exp());
            let defaulted = u8::from(rng.gen::<f64>() < default_probability);

            TrainingSample {
                loan_amount,
                credit_score,
                dti_ratio,
                employment_years,
                annual_income,
                property_value,
                ltv_ratio: Some(ltv_ratio),
                defaulted,
            }
        })
        .collect()
}

impl TrainingSample {
    /// Rejects rows whose derived ratios would be infinite or meaningless.
    fn check(&self, line: usize) -> Result<()> {
        let invalid = |reason: String| MortgageError::validation(format!("line {}: {}", line, reason));

        if self.defaulted > 1 {
            return Err(invalid(format!("defaulted must be 0 or 1, got {}", self.defaulted)));
        }
        let fields = [
            ("loan_amount", self.loan_amount),
            ("credit_score", self.credit_score),
            ("dti_ratio", self.dti_ratio),
            ("employment_years", self.employment_years),
            ("annual_income", self.annual_income),
            ("property_value", self.property_value),
        ];
        for (name, value) in fields.into_iter().chain(self.ltv_ratio.map(|v| ("ltv_ratio", v))) {
            if !value.is_finite() {
                return Err(invalid(format!("{} is not a finite number", name)));
            }
        }
        for (name, value) in [
            ("loan_amount", self.loan_amount),
            ("annual_income", self.annual_income),
            ("property_value", self.property_value),
        ] {
            if value <= 0.0 {
                return Err(invalid(format!("{} must be positive, got {}", name, value)));
            }
        }
        Ok(())
    }
}

pub fn parse_training_csv(data: &[u8]) -> Result<Vec<TrainingSample>> {
    let mut reader = csv::Reader::from_reader(data);
    let mut samples = Vec::new();
    for (index, record) in reader.deserialize().enumerate() {
        let sample: TrainingSample = record?;
        // Line 1 is the header.
        sample.check(index + 2)?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Area under the ROC curve via the rank-sum statistic, averaging tied ranks.
pub fn roc_auc(scores: &[f64], labels: &[u8]) -> f64 {
    let positives = labels.iter().filter(|&&l| l == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &index in &order[i..=j] {
            if labels[index] == 1 {
                rank_sum += average_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    (rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

/// Stratified split returning (train, test) indices.
fn stratified_split(labels: &[u8], test_fraction: f64, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        members.shuffle(rng);
        let n_test = ((members.len() as f64) * test_fraction).round() as usize;
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    (train, test)
}

fn select(x: &[Vec<f64>], y: &[u8], indices: &[usize]) -> (Vec<Vec<f64>>, Vec<u8>) {
    (
        indices.iter().map(|&i| x[i].clone()).collect(),
        indices.iter().map(|&i| y[i]).collect(),
    )
}

/// Mean and standard deviation of k-fold accuracy. Folds left without held-out
/// or training rows are skipped; `None` when no fold could be scored.
fn cross_validate(
    x: &[Vec<f64>],
    y: &[u8],
    folds: usize,
    params: &ForestParams,
    rng: &mut StdRng,
) -> Result<Option<(f64, f64)>> {
    let mut order: Vec<usize> = (0..x.len()).collect();
    order.shuffle(rng);

    let mut scores = Vec::with_capacity(folds);
    for fold in 0..folds {
        let (held_out, kept): (Vec<(usize, usize)>, Vec<(usize, usize)>) = order
            .iter()
            .copied()
            .enumerate()
            .partition(|(position, _)| position % folds == fold);
        if held_out.is_empty() || kept.is_empty() {
            continue;
        }
        let held_out: Vec<usize> = held_out.into_iter().map(|(_, index)| index).collect();
        let kept: Vec<usize> = kept.into_iter().map(|(_, index)| index).collect();

        let (train_x, train_y) = select(x, y, &kept);
        let (test_x, test_y) = select(x, y, &held_out);
        let forest = RandomForest::fit(&train_x, &train_y, params)?;
        scores.push(forest.accuracy(&test_x, &test_y));
    }

    if scores.is_empty() {
        return Ok(None);
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    Ok(Some((mean, variance.sqrt())))
}

pub fn forest_params(config: &TrainingConfig) -> ForestParams {
    ForestParams {
        n_estimators: config.n_estimators,
        max_depth: config.max_depth,
        min_samples_split: config.min_samples_split,
        min_samples_leaf: config.min_samples_leaf,
        max_features: None,
        bootstrap: true,
        seed: config.seed,
    }
}

/// Fits the forest and evaluates it. CPU-bound; callers on the runtime should
/// run it on a blocking thread.
pub fn train_forest(samples: &[TrainingSample], config: &TrainingConfig) -> Result<(RandomForest, TrainingMetrics)> {
    if samples.len() < MIN_TRAINING_SAMPLES {
        return Err(MortgageError::model(format!(
            "need at least {} training samples, got {}",
            MIN_TRAINING_SAMPLES,
            samples.len()
        )));
    }
    let start = Instant::now();

    let x: Vec<Vec<f64>> = samples.iter().map(|s| s.features().to_row()).collect();
    let y: Vec<u8> = samples.iter().map(|s| s.defaulted).collect();
    let defaults = y.iter().filter(|&&l| l == 1).count();
    if defaults == 0 || defaults == y.len() {
        return Err(MortgageError::model("training data must contain both outcomes"));
    }

    let params = forest_params(config);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let (train_idx, test_idx) = stratified_split(&y, config.test_fraction, &mut rng);
    let (train_x, train_y) = select(&x, &y, &train_idx);
    let (test_x, test_y) = select(&x, &y, &test_idx);

    tracing::info!(
        train = train_x.len(),
        test = test_x.len(),
        trees = params.n_estimators,
        "Starting model training"
    );
    let forest = RandomForest::fit(&train_x, &train_y, &params)?;

    let cv = if config.cv_folds >= 2 {
        cross_validate(&train_x, &train_y, config.cv_folds, &params, &mut rng)?
    } else {
        None
    };
    let (cv_mean, cv_std) = cv.map_or((None, None), |(mean, std)| (Some(mean), Some(std)));

    let test_scores: Vec<f64> = test_x.iter().map(|row| forest.predict_proba(row)).collect();
    let metrics = TrainingMetrics {
        train_accuracy: forest.accuracy(&train_x, &train_y),
        test_accuracy: forest.accuracy(&test_x, &test_y),
        cv_mean_accuracy: cv_mean,
        cv_std_accuracy: cv_std,
        roc_auc_score: roc_auc(&test_scores, &test_y),
        feature_importance: FEATURE_COLUMNS
            .iter()
            .zip(&forest.feature_importances)
            .map(|(name, value)| (name.to_string(), *value))
            .collect(),
        training_samples: samples.len(),
        default_rate: defaults as f64 / y.len() as f64,
        training_time_secs: start.elapsed().as_secs_f64(),
    };

    tracing::info!(
        train_accuracy = metrics.train_accuracy,
        test_accuracy = metrics.test_accuracy,
        roc_auc = metrics.roc_auc_score,
        "Model training completed"
    );
    Ok((forest, metrics))
}

pub struct ModelTrainer {
    artifacts: Arc<dyn ArtifactStore>,
    config: TrainingConfig,
    keys: PredictionConfig,
    publisher: Option<EventPublisher>,
}

impl ModelTrainer {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        config: TrainingConfig,
        keys: PredictionConfig,
        publisher: Option<EventPublisher>,
    ) -> Self {
        Self {
            artifacts,
            config,
            keys,
            publisher,
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn with_config(mut self, config: TrainingConfig) -> Self {
        self.config = config;
        self
    }

    /// Training CSV from the artifact store, or synthetic data when it is unavailable.
    pub async fn load_training_data(&self) -> Vec<TrainingSample> {
        let loaded = match self.artifacts.read_object(&self.config.data_key).await {
            Ok(bytes) => parse_training_csv(&bytes),
            Err(e) => Err(e),
        };

        match loaded {
            Ok(samples) if !samples.is_empty() => {
                tracing::info!("Loaded {} training records from {}", samples.len(), self.config.data_key);
                samples
            }
            Ok(_) => {
                tracing::warn!("Training data at {} is empty, using synthetic data", self.config.data_key);
                self.synthetic()
            }
            Err(e) => {
                tracing::warn!("Failed to load training data: {}, using synthetic data", e);
                self.synthetic()
            }
        }
    }

    fn synthetic(&self) -> Vec<TrainingSample> {
        let samples = synthetic_dataset(self.config.synthetic_samples, self.config.seed);
        let defaults = samples.iter().filter(|s| s.defaulted == 1).count();
        tracing::info!(
            "Generated {} synthetic training samples (default rate {:.2}%)",
            samples.len(),
            100.0 * defaults as f64 / samples.len().max(1) as f64
        );
        samples
    }

    pub async fn train_and_deploy(&self) -> Result<TrainingOutcome> {
        let samples = self.load_training_data().await;
        let config = self.config.clone();
        let (forest, metrics) = tokio::task::spawn_blocking(move || train_forest(&samples, &config))
            .await
            .map_err(|e| MortgageError::model(format!("training task failed: {}", e)))??;

        let trained_at = Utc::now();
        let model_version = trained_at.format("%Y%m%d_%H%M%S").to_string();
        let feature_columns: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();

        let artifact = ModelArtifact {
            model_version: model_version.clone(),
            feature_columns: feature_columns.clone(),
            forest,
        };
        let model_parameters = artifact.forest.params.clone();
        self.artifacts
            .write_object(&self.keys.model_key, &serde_json::to_vec(&artifact)?)
            .await?;

        let model_path = self.artifacts.location(&self.keys.model_key);
        let metadata = ModelMetadata {
            model_version: model_version.clone(),
            training_timestamp: trained_at,
            feature_columns,
            model_type: "RandomForestClassifier".to_string(),
            model_parameters,
            performance_metrics: metrics.clone(),
            artifact_paths: BTreeMap::from([
                ("model".to_string(), model_path.clone()),
                (
                    "metadata".to_string(),
                    self.artifacts.location(&self.keys.metadata_key),
                ),
            ]),
        };
        self.artifacts
            .write_object(&self.keys.metadata_key, &serde_json::to_vec_pretty(&metadata)?)
            .await?;
        tracing::info!(model_version = %model_version, model = %model_path, "Model artifacts saved");

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.model_updated(&model_version, &model_path).await {
                tracing::warn!("Failed to publish model update event: {}", e);
            }
        }

        Ok(TrainingOutcome {
            model_version,
            metrics,
        })
    }

    /// `None` when no model has been trained yet.
    pub async fn load_metadata(&self) -> Result<Option<ModelMetadata>> {
        match self.artifacts.read_object(&self.keys.metadata_key).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
