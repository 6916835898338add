//! Symmetric uncertainty band around a batch of point estimates.
//!
//! The band is `point ± multiplier·σ` where σ is the population standard deviation of the
//! batch's own predictions. It is a batch-level approximation of a 95% interval under a
//! normality assumption, not a calibrated per-sample interval: the same row gets a different
//! band depending on what else is in the batch.

use serde::{Deserialize, Serialize};

/// Default band multiplier (≈95% under normality).
pub const DEFAULT_MULTIPLIER: f64 = 1.96;

/// Computes lower/upper bounds for point estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalEstimator {
    multiplier: f64,
}

impl Default for IntervalEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_MULTIPLIER)
    }
}

impl IntervalEstimator {
    /// Estimator with a custom multiplier. Negative or non-finite values collapse to zero width.
    #[must_use]
    pub fn new(multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() {
            multiplier.max(0.0)
        } else {
            0.0
        };
        Self { multiplier }
    }

    /// Band multiplier.
    #[must_use]
    pub const fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Half-width of the band for this batch.
    #[must_use]
    pub fn spread(&self, points: &[f64]) -> f64 {
        self.multiplier * population_std(points)
    }

    /// Lower and upper bounds, elementwise.
    #[must_use]
    pub fn bounds(&self, points: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let spread = self.spread(points);
        points
            .iter()
            .map(|point| (point - spread, point + spread))
            .unzip()
    }
}

fn population_std(points: &[f64]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let mean = points.iter().sum::<f64>() / n;
    let variance = points.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
