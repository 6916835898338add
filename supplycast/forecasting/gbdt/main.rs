//! Histogram-based gradient-boosted regression trees on squared error.
//!
//! Training is fully deterministic: bins come from sorted distinct values, rows are visited in
//! index order and split ties keep the first candidate, so identical inputs give identical
//! ensembles.

/// Feature binning.
pub mod binning;
/// Regression trees and the tree grower.
pub mod tree;

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};
use binning::BinMapper;
use tree::{RegressionTree, TrainingFrame, TreeGrower};

/// Largest histogram the binning stage supports.
pub const MAX_SUPPORTED_BINS: usize = 1024;

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Number of boosting rounds.
    pub n_estimators: usize,
    /// Maximum tree depth in splits.
    pub max_depth: usize,
    /// Shrinkage applied to every leaf.
    pub learning_rate: f64,
    /// Minimum rows on each side of a split.
    pub min_samples_leaf: usize,
    /// L2 penalty on leaf values.
    pub l2_regularization: f64,
    /// Maximum histogram bins per feature.
    pub max_bins: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.1,
            min_samples_leaf: 1,
            l2_regularization: 1.0,
            max_bins: 256,
        }
    }
}

impl Hyperparameters {
    /// Convenience constructor for the three knobs domains usually tune.
    #[must_use]
    pub fn new(n_estimators: usize, max_depth: usize, learning_rate: f64) -> Self {
        Self {
            n_estimators,
            max_depth,
            learning_rate,
            ..Self::default()
        }
    }

    /// Rejects values the trainer cannot work with.
    pub fn validate(&self) -> ForecastResult<()> {
        let reason = if self.n_estimators == 0 {
            Some("n_estimators must be positive".to_string())
        } else if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            Some(format!("learning_rate must be positive, got {}", self.learning_rate))
        } else if !(self.l2_regularization.is_finite() && self.l2_regularization >= 0.0) {
            Some(format!(
                "l2_regularization must be non-negative, got {}",
                self.l2_regularization
            ))
        } else if !(2..=MAX_SUPPORTED_BINS).contains(&self.max_bins) {
            Some(format!(
                "max_bins must be within 2..={MAX_SUPPORTED_BINS}, got {}",
                self.max_bins
            ))
        } else if self.min_samples_leaf == 0 {
            Some("min_samples_leaf must be at least 1".to_string())
        } else {
            None
        };
        reason.map_or(Ok(()), |reason| {
            Err(ForecastError::InvalidHyperparameters { reason })
        })
    }
}

/// Fitted boosted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    base_score: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
    feature_importances: Vec<f64>,
}

impl GradientBoostedRegressor {
    /// Fits an ensemble. The base score is the target mean; each round fits one tree to the
    /// current residuals.
    pub fn fit(
        features: ArrayView2<'_, f64>,
        targets: &[f64],
        params: &Hyperparameters,
    ) -> ForecastResult<Self> {
        params.validate()?;
        let (n_rows, n_features) = features.dim();
        if n_rows != targets.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: n_rows,
                found: targets.len(),
            });
        }
        if n_rows == 0 || n_features == 0 {
            return Err(ForecastError::InsufficientData {
                rows: n_rows,
                required: 1,
            });
        }
        if let Some((idx, _)) = features.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(ForecastError::MalformedNumber {
                row: idx / n_features,
                column: format!("feature[{}]", idx % n_features),
                value: features[[idx / n_features, idx % n_features]].to_string(),
            });
        }

        let mappers: Vec<BinMapper> = features
            .columns()
            .into_iter()
            .map(|column| BinMapper::fit(column, params.max_bins))
            .collect();
        let bins: Vec<Vec<u16>> = mappers
            .iter()
            .zip(features.columns())
            .map(|(mapper, column)| column.iter().map(|v| mapper.bin(*v)).collect())
            .collect();
        let frame = TrainingFrame {
            mappers: &mappers,
            bins: &bins,
        };

        let base_score = targets.iter().sum::<f64>() / n_rows as f64;
        let mut predictions = vec![base_score; n_rows];
        let mut residuals = vec![0.0; n_rows];
        let mut gains = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            for ((residual, target), prediction) in
                residuals.iter_mut().zip(targets).zip(&predictions)
            {
                *residual = target - prediction;
            }
            let (tree, tree_gains) =
                TreeGrower::new(&frame, &residuals, params).grow((0..n_rows).collect());
            for (prediction, row) in predictions.iter_mut().zip(features.rows()) {
                *prediction += tree.predict_row(row);
            }
            for (total, gain) in gains.iter_mut().zip(tree_gains) {
                *total += gain;
            }
            trees.push(tree);
        }

        Ok(Self {
            base_score,
            n_features,
            trees,
            feature_importances: normalize(gains),
        })
    }

    /// Predicts every row of a matrix.
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> ForecastResult<Vec<f64>> {
        if features.ncols() != self.n_features {
            return Err(ForecastError::DimensionMismatch {
                expected: self.n_features,
                found: features.ncols(),
            });
        }
        Ok(features.rows().into_iter().map(|row| self.predict_row(row)).collect())
    }

    /// Predicts a single feature row.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.trees
            .iter()
            .fold(self.base_score, |acc, tree| acc + tree.predict_row(row))
    }

    /// Normalized total split gain per feature, summing to 1.
    #[must_use]
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    /// Number of fitted trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Number of input features.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Initial prediction before any tree.
    #[must_use]
    pub const fn base_score(&self) -> f64 {
        self.base_score
    }

    /// Fitted trees in boosting order.
    #[must_use]
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Structural check used when restoring a persisted ensemble.
    pub(crate) fn consistency_error(&self) -> Option<String> {
        if !self.base_score.is_finite() {
            return Some("non-finite base score".into());
        }
        if self.feature_importances.len() != self.n_features {
            return Some(format!(
                "{} importances for {} features",
                self.feature_importances.len(),
                self.n_features
            ));
        }
        self.trees
            .iter()
            .position(|tree| !tree.is_well_formed(self.n_features))
            .map(|idx| format!("tree {idx} is malformed"))
    }
}

/// Gains scaled to sum to 1; uniform when no split reduced the loss.
fn normalize(gains: Vec<f64>) -> Vec<f64> {
    let total: f64 = gains.iter().sum();
    if total > 0.0 {
        gains.into_iter().map(|gain| gain / total).collect()
    } else {
        let uniform = 1.0 / gains.len() as f64;
        vec![uniform; gains.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn step_data() -> (Array2<f64>, Vec<f64>) {
        let rows = 40;
        let mut features = Array2::<f64>::zeros((rows, 2));
        let mut targets = Vec::with_capacity(rows);
        for idx in 0..rows {
            let x = idx as f64;
            features[[idx, 0]] = x;
            features[[idx, 1]] = (idx % 3) as f64;
            targets.push(if idx < 20 { 10.0 } else { 50.0 });
        }
        (features, targets)
    }

    #[test]
    fn boosting_fits_a_step_function() {
        let (features, targets) = step_data();
        let params = Hyperparameters::new(50, 3, 0.3);
        let model = GradientBoostedRegressor::fit(features.view(), &targets, &params).unwrap();
        let predictions = model.predict(features.view()).unwrap();
        for (prediction, target) in predictions.iter().zip(&targets) {
            assert!((prediction - target).abs() < 1.0, "{prediction} vs {target}");
        }
        assert_eq!(model.n_trees(), 50);
        assert_eq!(model.base_score(), 30.0);
        let importances = model.feature_importances();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
        assert!(model.consistency_error().is_none());
    }

    #[test]
    fn training_is_deterministic() {
        let (features, targets) = step_data();
        let params = Hyperparameters::new(10, 4, 0.1);
        let first = GradientBoostedRegressor::fit(features.view(), &targets, &params).unwrap();
        let second = GradientBoostedRegressor::fit(features.view(), &targets, &params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn constant_target_yields_uniform_importances() {
        let features = array![[1.0, 2.0], [2.0, 3.0], [3.0, 4.0]];
        let model =
            GradientBoostedRegressor::fit(features.view(), &[5.0, 5.0, 5.0], &Hyperparameters::default())
                .unwrap();
        assert_eq!(model.feature_importances(), [0.5, 0.5]);
        assert_eq!(model.predict_row(features.row(1)), 5.0);
    }

    #[test]
    fn rejects_bad_shapes_and_params() {
        let features = array![[1.0], [2.0]];
        assert!(matches!(
            GradientBoostedRegressor::fit(features.view(), &[1.0], &Hyperparameters::default()),
            Err(ForecastError::DimensionMismatch { expected: 2, found: 1 })
        ));
        let params = Hyperparameters {
            max_bins: 1,
            ..Hyperparameters::default()
        };
        assert!(matches!(
            GradientBoostedRegressor::fit(features.view(), &[1.0, 2.0], &params),
            Err(ForecastError::InvalidHyperparameters { .. })
        ));
        let model = GradientBoostedRegressor::fit(
            features.view(),
            &[1.0, 2.0],
            &Hyperparameters::new(3, 2, 0.1),
        )
        .unwrap();
        let wide = array![[1.0, 2.0]];
        assert!(matches!(
            model.predict(wide.view()),
            Err(ForecastError::DimensionMismatch { expected: 1, found: 2 })
        ));
    }
}
