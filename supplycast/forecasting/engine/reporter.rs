use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::{Partition, RegressionMetrics};

/// One feature's share of the ensemble's total split gain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    /// Feature name as it appears in the matrix header.
    pub feature: String,
    /// Normalized importance in `[0, 1]`.
    pub importance: f64,
}

/// Ranks importances descending; equal scores keep matrix order.
#[must_use]
pub fn rank_importances(names: &[String], scores: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = names
        .iter()
        .zip(scores)
        .map(|(feature, importance)| FeatureImportance {
            feature: feature.clone(),
            importance: *importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

/// Report describing one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Domain key.
    pub domain: String,
    /// Target column.
    pub target: String,
    /// Rows after feature preparation.
    pub rows: usize,
    /// Train-partition mean absolute error.
    pub train_mae: f64,
    /// Train-partition root mean squared error.
    pub train_rmse: f64,
    /// Train-partition R².
    pub train_r2: f64,
    /// Holdout mean absolute error.
    pub test_mae: f64,
    /// Holdout root mean squared error.
    pub test_rmse: f64,
    /// Holdout R².
    pub test_r2: f64,
    /// Importances ranked descending.
    pub feature_importances: Vec<FeatureImportance>,
    /// Row indices of both partitions.
    pub partition: Partition,
    /// Trees in the fitted ensemble.
    pub n_trees: usize,
    /// Completion time.
    pub trained_at: DateTime<Utc>,
}

impl TrainingReport {
    /// Train-partition metrics.
    #[must_use]
    pub const fn train_metrics(&self) -> RegressionMetrics {
        RegressionMetrics {
            mae: self.train_mae,
            rmse: self.train_rmse,
            r2: self.train_r2,
        }
    }

    /// Holdout metrics.
    #[must_use]
    pub const fn test_metrics(&self) -> RegressionMetrics {
        RegressionMetrics {
            mae: self.test_mae,
            rmse: self.test_rmse,
            r2: self.test_r2,
        }
    }

    /// Highest-ranked features.
    #[must_use]
    pub fn top_features(&self, count: usize) -> &[FeatureImportance] {
        &self.feature_importances[..count.min(self.feature_importances.len())]
    }

    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[{}] target={} rows={} trees={} train_mae={:.4} test_mae={:.4} test_rmse={:.4} test_r2={:.4}",
            self.domain,
            self.target,
            self.rows,
            self.n_trees,
            self.train_mae,
            self.test_mae,
            self.test_rmse,
            self.test_r2
        )
    }
}

/// Scores of a fitted model on a labelled batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Domain key.
    pub domain: String,
    /// Rows scored.
    pub rows: usize,
    /// Mean absolute error.
    pub mae: f64,
    /// Root mean squared error.
    pub rmse: f64,
    /// R².
    pub r2: f64,
}

impl EvaluationReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[{}] rows={} mae={:.4} rmse={:.4} r2={:.4}",
            self.domain, self.rows, self.mae, self.rmse, self.r2
        )
    }
}
