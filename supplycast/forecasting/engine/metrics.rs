use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

/// Row indices of a train/holdout split, each side in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Rows used to fit the ensemble.
    pub train: Vec<usize>,
    /// Rows held out for scoring.
    pub holdout: Vec<usize>,
}

/// Shuffles `0..rows` with a seeded RNG and holds out `ceil(ratio * rows)` of them,
/// always leaving at least one training row.
#[must_use]
pub fn train_holdout_split(rows: usize, holdout_ratio: f64, seed: u64) -> Partition {
    let mut indices: Vec<usize> = (0..rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let wanted = (holdout_ratio.clamp(0.0, 1.0) * rows as f64).ceil() as usize;
    let holdout_len = wanted.min(rows.saturating_sub(1));
    let mut holdout = indices[..holdout_len].to_vec();
    let mut train = indices[holdout_len..].to_vec();
    holdout.sort_unstable();
    train.sort_unstable();
    Partition { train, holdout }
}

/// MAE, RMSE and R² of one scored partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Mean absolute error.
    pub mae: f64,
    /// Root mean squared error.
    pub rmse: f64,
    /// Coefficient of determination.
    pub r2: f64,
}

impl RegressionMetrics {
    /// Scores predictions against labels.
    #[must_use]
    pub fn compute(predictions: &[f64], labels: &[f64]) -> Self {
        Self {
            mae: mean_absolute_error(predictions, labels),
            rmse: mean_squared_error(predictions, labels).sqrt(),
            r2: r2_score(predictions, labels),
        }
    }
}

/// Mean absolute error; 0 for empty or mismatched inputs.
#[must_use]
pub fn mean_absolute_error(predictions: &[f64], labels: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != labels.len() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(labels)
        .map(|(pred, label)| (pred - label).abs())
        .sum::<f64>()
        / predictions.len() as f64
}

/// Mean squared error; 0 for empty or mismatched inputs.
#[must_use]
pub fn mean_squared_error(predictions: &[f64], labels: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != labels.len() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(labels)
        .map(|(pred, label)| (pred - label).powi(2))
        .sum::<f64>()
        / predictions.len() as f64
}

/// Coefficient of determination. A constant label vector scores 1 when matched exactly and
/// 0 otherwise, so the result is always finite.
#[must_use]
pub fn r2_score(predictions: &[f64], labels: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != labels.len() {
        return 0.0;
    }
    let mean = labels.iter().sum::<f64>() / labels.len() as f64;
    let ss_tot: f64 = labels.iter().map(|label| (label - mean).powi(2)).sum();
    let ss_res: f64 = predictions
        .iter()
        .zip(labels)
        .map(|(pred, label)| (label - pred).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}
