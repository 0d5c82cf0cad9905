//! Trainable signal quality classifier.
//!
//! Collects (feature vector, outcome) samples and, once enough exist, fits a
//! binary model on standardised features. Training problems never reach the
//! caller: the classifier drops back to untrained and answers with the
//! neutral score until a later retrain succeeds.

use std::sync::{Arc, Mutex, MutexGuard};

use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("outcomes contain a single class")]
    SingleClass,

    #[error("every feature is constant")]
    DegenerateFeatures,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("training diverged after {0} iterations")]
    Diverged(usize),
}

/// A binary model over standardised features.
pub trait QualityModel: Send {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(), TrainingError>;

    /// Probability of a positive outcome, if the model can give one.
    fn predict_proba(&self, x: &Array1<f64>) -> Option<f64>;

    /// Hard classification.
    fn predict(&self, x: &Array1<f64>) -> Option<bool>;

    /// Forget any fitted state.
    fn reset(&mut self);
}

/// L2-regularised logistic regression fitted by batch gradient descent.
#[derive(Debug, Clone)]
pub struct LogisticModel {
    coefficients: Option<Array1<f64>>,
    intercept: f64,
    learning_rate: f64,
    max_iter: usize,
    tolerance: f64,
    l2: f64,
}

impl Default for LogisticModel {
    fn default() -> Self {
        LogisticModel {
            coefficients: None,
            intercept: 0.0,
            learning_rate: 0.1,
            max_iter: 1000,
            tolerance: 1e-7,
            l2: 0.01,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let exp_z = z.exp();
        exp_z / (1.0 + exp_z)
    }
}

fn log_loss(y: &Array1<f64>, p: &Array1<f64>) -> f64 {
    let eps = 1e-15;
    -y.iter()
        .zip(p.iter())
        .map(|(&y, &p)| {
            let p = p.clamp(eps, 1.0 - eps);
            y * p.ln() + (1.0 - y) * (1.0 - p).ln()
        })
        .sum::<f64>()
        / y.len() as f64
}

impl QualityModel for LogisticModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(), TrainingError> {
        if x.nrows() != y.len() {
            return Err(TrainingError::DimensionMismatch {
                expected: x.nrows(),
                got: y.len(),
            });
        }
        let n = x.nrows() as f64;
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;
        let mut prev_cost = f64::INFINITY;

        for iter in 0..self.max_iter {
            let predictions = (x.dot(&weights) + bias).mapv(sigmoid);
            let errors = &predictions - y;
            let dw = x.t().dot(&errors) / n + &weights * self.l2;
            let db = errors.sum() / n;

            weights = &weights - &(dw * self.learning_rate);
            bias -= self.learning_rate * db;

            if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                return Err(TrainingError::Diverged(iter + 1));
            }

            let cost = log_loss(y, &predictions);
            if (prev_cost - cost).abs() < self.tolerance {
                log::debug!("logistic fit converged at iteration {iter}");
                break;
            }
            prev_cost = cost;
        }

        self.coefficients = Some(weights);
        self.intercept = bias;
        Ok(())
    }

    fn predict_proba(&self, x: &Array1<f64>) -> Option<f64> {
        let w = self.coefficients.as_ref()?;
        if w.len() != x.len() {
            return None;
        }
        let p = sigmoid(w.dot(x) + self.intercept);
        p.is_finite().then_some(p)
    }

    fn predict(&self, x: &Array1<f64>) -> Option<bool> {
        self.predict_proba(x).map(|p| p >= 0.5)
    }

    fn reset(&mut self) {
        self.coefficients = None;
        self.intercept = 0.0;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Samples required before the first training run.
    pub min_samples: usize,
    /// New samples between retrains.
    pub retrain_every: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            min_samples: 30,
            retrain_every: 20,
        }
    }
}

pub const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone)]
struct Standardizer {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Standardizer {
    fn fit(x: &Array2<f64>) -> Result<Self, TrainingError> {
        let mean = x.mean_axis(Axis(0)).ok_or(TrainingError::DegenerateFeatures)?;
        let std = x.std_axis(Axis(0), 0.0);
        if std.iter().all(|&s| s <= f64::EPSILON) {
            return Err(TrainingError::DegenerateFeatures);
        }
        // Constant columns pass through centred but unscaled.
        let scale = std.mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Ok(Standardizer { mean, scale })
    }

    fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }

    fn transform_row(&self, x: &Array1<f64>) -> Array1<f64> {
        (x - &self.mean) / &self.scale
    }
}

pub struct SignalQualityClassifier<M: QualityModel = LogisticModel> {
    config: ClassifierConfig,
    n_features: usize,
    samples: Vec<Vec<f64>>,
    outcomes: Vec<bool>,
    model: M,
    standardizer: Option<Standardizer>,
    since_attempt: usize,
    attempted: bool,
}

impl SignalQualityClassifier<LogisticModel> {
    pub fn new(n_features: usize, config: ClassifierConfig) -> Self {
        Self::with_model(n_features, config, LogisticModel::default())
    }
}

impl<M: QualityModel> SignalQualityClassifier<M> {
    pub fn with_model(n_features: usize, config: ClassifierConfig, model: M) -> Self {
        SignalQualityClassifier {
            config,
            n_features,
            samples: Vec::new(),
            outcomes: Vec::new(),
            model,
            standardizer: None,
            since_attempt: 0,
            attempted: false,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_trained(&self) -> bool {
        self.standardizer.is_some()
    }

    /// Record a labelled sample, training or retraining when due.
    ///
    /// Only a feature vector of the wrong length is refused.
    pub fn add_outcome(&mut self, features: &[f64], outcome: bool) -> Result<(), TrainingError> {
        if features.len() != self.n_features {
            return Err(TrainingError::DimensionMismatch {
                expected: self.n_features,
                got: features.len(),
            });
        }
        self.samples.push(features.to_vec());
        self.outcomes.push(outcome);
        self.since_attempt += 1;

        let due = if self.attempted {
            self.since_attempt >= self.config.retrain_every
        } else {
            self.samples.len() >= self.config.min_samples
        };
        if due {
            self.retrain();
        }
        Ok(())
    }

    fn retrain(&mut self) {
        self.attempted = true;
        self.since_attempt = 0;
        match self.train() {
            Ok(standardizer) => {
                log::debug!("quality classifier trained on {} samples", self.samples.len());
                self.standardizer = Some(standardizer);
            }
            Err(e) => {
                log::warn!("quality classifier training failed, reverting to neutral: {e}");
                self.model.reset();
                self.standardizer = None;
            }
        }
    }

    fn train(&mut self) -> Result<Standardizer, TrainingError> {
        if self.outcomes.iter().all(|&o| o) || self.outcomes.iter().all(|&o| !o) {
            return Err(TrainingError::SingleClass);
        }
        let flat: Vec<f64> = self.samples.iter().flatten().copied().collect();
        let x = Array2::from_shape_vec((self.samples.len(), self.n_features), flat).map_err(|_| {
            TrainingError::DimensionMismatch {
                expected: self.samples.len() * self.n_features,
                got: self.samples.iter().map(Vec::len).sum(),
            }
        })?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(TrainingError::DegenerateFeatures);
        }
        let y: Array1<f64> = self.outcomes.iter().map(|&o| if o { 1.0 } else { 0.0 }).collect();

        let standardizer = Standardizer::fit(&x)?;
        self.model.fit(&standardizer.transform(&x), &y)?;
        Ok(standardizer)
    }

    /// Probability of a positive outcome in `[0, 1]`; the neutral score when
    /// untrained or when the features cannot be scored.
    pub fn score(&self, features: &[f64]) -> f64 {
        let Some(standardizer) = self.standardizer.as_ref() else {
            return NEUTRAL_SCORE;
        };
        if features.len() != self.n_features || features.iter().any(|v| !v.is_finite()) {
            return NEUTRAL_SCORE;
        }
        let x = standardizer.transform_row(&Array1::from_vec(features.to_vec()));
        match self.model.predict_proba(&x) {
            Some(p) => p.clamp(0.0, 1.0),
            None => match self.model.predict(&x) {
                Some(true) => 1.0,
                Some(false) => 0.0,
                None => NEUTRAL_SCORE,
            },
        }
    }
}

/// A classifier shared between workers. Adding samples and scoring are
/// serialised through one lock.
#[derive(Clone)]
pub struct SharedQualityClassifier {
    inner: Arc<Mutex<SignalQualityClassifier>>,
}

impl SharedQualityClassifier {
    pub fn new(classifier: SignalQualityClassifier) -> Self {
        SharedQualityClassifier {
            inner: Arc::new(Mutex::new(classifier)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SignalQualityClassifier> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_outcome(&self, features: &[f64], outcome: bool) -> Result<(), TrainingError> {
        self.lock().add_outcome(features, outcome)
    }

    pub fn score(&self, features: &[f64]) -> f64 {
        self.lock().score(features)
    }

    pub fn is_trained(&self) -> bool {
        self.lock().is_trained()
    }
}
