//! L2-regularized logistic regression trained by full-batch gradient descent
//!
//! Inputs are z-score normalized with population statistics fit once on the
//! training matrix; those statistics are frozen into the [`TrainedModel`].

use crate::error::ModelError;
use crate::models::{TrainedModel, TrainingStats};
use crate::utils::cancel::CancelToken;
use crate::utils::features::{Diagnostics, LabelMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Fewest usable rows a training run accepts
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// |z| beyond this saturates the sigmoid and would overflow `exp`
const SIGMOID_CLAMP: f64 = 40.0;

/// Hyperparameters for one training run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub learning_rate: f64,
    pub epochs: usize,
    /// L2 penalty strength
    pub lambda: f64,
    pub min_samples: usize,
    pub label_mode: LabelMode,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 500,
            lambda: 0.01,
            min_samples: MIN_TRAINING_SAMPLES,
            label_mode: LabelMode::Straight,
        }
    }
}

/// Logistic function with the input clamped to a finite range
pub fn sigmoid(z: f64) -> f64 {
    let z = z.clamp(-SIGMOID_CLAMP, SIGMOID_CLAMP);
    1.0 / (1.0 + (-z).exp())
}

/// Per-feature z-score parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Normalizer {
    /// Fit column means and population standard deviations. Columns with
    /// zero spread get std 1; their indices are returned alongside.
    pub fn fit(x: &[Vec<f64>], n_features: usize) -> (Self, Vec<usize>) {
        let n = x.len().max(1) as f64;
        let mut means = vec![0.0; n_features];
        for row in x {
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut stds = vec![0.0; n_features];
        for row in x {
            for ((var, value), mean) in stds.iter_mut().zip(row).zip(&means) {
                *var += (value - mean).powi(2);
            }
        }

        let mut zero_variance = Vec::new();
        for (j, std) in stds.iter_mut().enumerate() {
            *std = (*std / n).sqrt();
            if *std == 0.0 {
                *std = 1.0;
                zero_variance.push(j);
            }
        }

        (Self { means, stds }, zero_variance)
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(value, (mean, std))| (value - mean) / std)
            .collect()
    }
}

/// Result of a successful training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub model: TrainedModel,
    pub stats: TrainingStats,
    pub diagnostics: Diagnostics,
}

fn linear(weights: &[f64], bias: f64, row: &[f64]) -> f64 {
    bias + weights.iter().zip(row).map(|(w, x)| w * x).sum::<f64>()
}

/// Train without a cancellation hook
pub fn train_logistic_regression<S: AsRef<str>>(
    x: &[Vec<f64>],
    y: &[f64],
    feature_names: &[S],
    params: &TrainingParams,
) -> Result<TrainingOutcome, ModelError> {
    train_logistic_regression_with_cancel(x, y, feature_names, params, &CancelToken::new())
}

/// Train, checking `cancel` between epochs. Deterministic for fixed inputs.
pub fn train_logistic_regression_with_cancel<S: AsRef<str>>(
    x: &[Vec<f64>],
    y: &[f64],
    feature_names: &[S],
    params: &TrainingParams,
    cancel: &CancelToken,
) -> Result<TrainingOutcome, ModelError> {
    let n_features = feature_names.len();
    if x.len() != y.len() {
        return Err(ModelError::ModelShape(format!(
            "{} feature rows but {} labels",
            x.len(),
            y.len()
        )));
    }
    if let Some(row) = x.iter().find(|row| row.len() != n_features) {
        return Err(ModelError::ModelShape(format!(
            "row has {} values, expected {}",
            row.len(),
            n_features
        )));
    }
    let required = params.min_samples.max(1);
    if x.len() < required {
        return Err(ModelError::InsufficientData {
            required,
            found: x.len(),
        });
    }

    let mut diagnostics = Diagnostics::default();
    let (normalizer, zero_variance) = Normalizer::fit(x, n_features);
    for j in zero_variance {
        debug!(
            "Feature {} has zero variance, using std 1",
            feature_names[j].as_ref()
        );
        diagnostics
            .zero_variance_features
            .push(feature_names[j].as_ref().to_string());
    }

    let x_norm: Vec<Vec<f64>> = x.iter().map(|row| normalizer.transform(row)).collect();
    let n = x_norm.len() as f64;

    let mut weights = vec![0.0; n_features];
    let mut bias = 0.0;
    let mut grad_w = vec![0.0; n_features];

    for epoch in 0..params.epochs {
        if cancel.is_cancelled() {
            info!("Training cancelled at epoch {}", epoch);
            return Err(ModelError::Cancelled);
        }

        grad_w.iter_mut().for_each(|g| *g = 0.0);
        let mut grad_b = 0.0;
        let mut loss = 0.0;

        for (row, &label) in x_norm.iter().zip(y) {
            let p = sigmoid(linear(&weights, bias, row));
            let error = p - label;
            for (g, value) in grad_w.iter_mut().zip(row) {
                *g += error * value;
            }
            grad_b += error;
            loss -= label * p.max(1e-15).ln() + (1.0 - label) * (1.0 - p).max(1e-15).ln();
        }

        for (w, g) in weights.iter_mut().zip(&grad_w) {
            let gradient = g / n + params.lambda * *w;
            *w -= params.learning_rate * gradient;
        }
        bias -= params.learning_rate * grad_b / n;

        if epoch % 100 == 0 {
            debug!("Epoch {}: log loss {:.5}", epoch, loss / n);
        }
    }

    let correct = x_norm
        .iter()
        .zip(y)
        .filter(|(row, &label)| {
            let predicted_win = sigmoid(linear(&weights, bias, row)) >= 0.5;
            predicted_win == (label >= 0.5)
        })
        .count();
    let stats = TrainingStats {
        accuracy: correct as f64 / n,
        samples: x_norm.len(),
    };

    info!(
        "Trained on {} samples: accuracy {:.1}%",
        stats.samples,
        stats.accuracy * 100.0
    );

    Ok(TrainingOutcome {
        model: TrainedModel {
            weights,
            bias,
            means: normalizer.means,
            stds: normalizer.stds,
            features: feature_names
                .iter()
                .map(|name| name.as_ref().to_string())
                .collect(),
        },
        stats,
        diagnostics,
    })
}
