//! Generic forecasting engine: one implementation parameterised by schema, target and
//! hyperparameters, instantiated once per domain.

/// Split and scoring helpers.
pub mod metrics;
/// Training and evaluation reports.
pub mod reporter;

use std::path::Path;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    codec::{schema::FeatureSchema, FeatureCodec, FeatureMatrix},
    dataset::RecordBatch,
    error::{ForecastError, ForecastResult},
    gbdt::{GradientBoostedRegressor, Hyperparameters},
    interval::{IntervalEstimator, DEFAULT_MULTIPLIER},
    store::{self, ModelArtifact, TrainingMetadata, ARTIFACT_FORMAT_VERSION},
    telemetry::{self, ForecastTelemetry},
};
use metrics::{train_holdout_split, RegressionMetrics};
use reporter::{rank_importances, EvaluationReport, TrainingReport};

/// Default minimum number of prepared rows required to fit.
pub const DEFAULT_MIN_ROWS: usize = 50;
/// Default holdout share.
pub const DEFAULT_HOLDOUT_RATIO: f64 = 0.2;
/// Default split seed.
pub const DEFAULT_SEED: u64 = 42;

/// Everything that parameterises one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Domain key, used for logging and artifact naming.
    pub domain: String,
    /// Declared features.
    pub schema: FeatureSchema,
    /// Target column.
    pub target: String,
    /// Boosting hyperparameters.
    pub hyperparameters: Hyperparameters,
    /// Minimum prepared rows for `fit`.
    pub min_rows: usize,
    /// Holdout share in `(0, 1)`.
    pub holdout_ratio: f64,
    /// Seed of the train/holdout shuffle.
    pub seed: u64,
    /// Interval band multiplier.
    pub interval_multiplier: f64,
}

impl EngineConfig {
    /// Config with default thresholds, seed and hyperparameters.
    #[must_use]
    pub fn new(domain: impl Into<String>, schema: FeatureSchema, target: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            schema,
            target: target.into(),
            hyperparameters: Hyperparameters::default(),
            min_rows: DEFAULT_MIN_ROWS,
            holdout_ratio: DEFAULT_HOLDOUT_RATIO,
            seed: DEFAULT_SEED,
            interval_multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Replaces the hyperparameters.
    #[must_use]
    pub fn with_hyperparameters(mut self, hyperparameters: Hyperparameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    /// Checks thresholds, ratio, schema and hyperparameters.
    pub fn validate(&self) -> ForecastResult<()> {
        self.schema.validate()?;
        self.hyperparameters.validate()?;
        if !(self.holdout_ratio > 0.0 && self.holdout_ratio < 1.0) {
            return Err(ForecastError::InvalidHyperparameters {
                reason: format!("holdout_ratio must be in (0, 1), got {}", self.holdout_ratio),
            });
        }
        if self.min_rows < 2 {
            return Err(ForecastError::InvalidHyperparameters {
                reason: format!("min_rows must be at least 2, got {}", self.min_rows),
            });
        }
        Ok(())
    }
}

/// One scored row with its band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Identifier column value, or `row-<n>`.
    pub identifier: String,
    /// Point estimate.
    pub predicted: f64,
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
    /// Row date, when the schema has a date column.
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
struct FittedState {
    codec: FeatureCodec,
    regressor: GradientBoostedRegressor,
    feature_names: Vec<String>,
    metadata: TrainingMetadata,
}

/// Forecast model for one domain. `fit` needs `&mut self`; scoring is read-only.
#[derive(Debug, Clone)]
pub struct ForecastModel {
    config: EngineConfig,
    fitted: Option<FittedState>,
    telemetry: Option<ForecastTelemetry>,
}

impl ForecastModel {
    /// Unfitted model.
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            config,
            fitted: None,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ForecastTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Sets telemetry after construction.
    pub fn set_telemetry(&mut self, telemetry: ForecastTelemetry) {
        self.telemetry = Some(telemetry);
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True once `fit` or `load` succeeded.
    #[must_use]
    pub const fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Feature names captured at training time.
    #[must_use]
    pub fn feature_names(&self) -> Option<&[String]> {
        self.fitted.as_ref().map(|state| state.feature_names.as_slice())
    }

    /// Training metadata of the fitted model.
    #[must_use]
    pub fn metadata(&self) -> Option<&TrainingMetadata> {
        self.fitted.as_ref().map(|state| &state.metadata)
    }

    /// Fitted ensemble.
    #[must_use]
    pub fn regressor(&self) -> Option<&GradientBoostedRegressor> {
        self.fitted.as_ref().map(|state| &state.regressor)
    }

    /// Fits encoder and ensemble on a labelled batch. On error the previous state is kept.
    pub fn fit(&mut self, batch: &RecordBatch) -> ForecastResult<TrainingReport> {
        self.config.validate()?;
        self.log(
            LogLevel::Info,
            "forecast.fit.start",
            json!({ "domain": self.config.domain, "rows": batch.len(), "target": self.config.target }),
        );
        let (codec, matrix, target) =
            FeatureCodec::fit_transform(self.config.schema.clone(), batch, &self.config.target)
                .inspect_err(|err| {
                    self.log(
                        LogLevel::Error,
                        "forecast.fit.rejected",
                        json!({ "domain": self.config.domain, "error": err.to_string() }),
                    );
                })?;
        let rows = matrix.n_rows();
        if rows < self.config.min_rows {
            let err = ForecastError::InsufficientData {
                rows,
                required: self.config.min_rows,
            };
            self.log(
                LogLevel::Error,
                "forecast.fit.rejected",
                json!({ "domain": self.config.domain, "error": err.to_string() }),
            );
            return Err(err);
        }

        let partition = train_holdout_split(rows, self.config.holdout_ratio, self.config.seed);
        self.log(
            LogLevel::Debug,
            "forecast.fit.partition",
            json!({ "train": partition.train.len(), "holdout": partition.holdout.len(), "seed": self.config.seed }),
        );
        let train_x = matrix.select_rows(&partition.train);
        let train_y = pick(&target, &partition.train);
        let holdout_x = matrix.select_rows(&partition.holdout);
        let holdout_y = pick(&target, &partition.holdout);

        let params = &self.config.hyperparameters;
        let regressor = GradientBoostedRegressor::fit(train_x.view(), &train_y, params)?;
        let train_metrics =
            RegressionMetrics::compute(&regressor.predict(train_x.view())?, &train_y);
        let test_metrics =
            RegressionMetrics::compute(&regressor.predict(holdout_x.view())?, &holdout_y);
        let feature_names = matrix.columns().to_vec();
        let trained_at = Utc::now();

        let report = TrainingReport {
            domain: self.config.domain.clone(),
            target: self.config.target.clone(),
            rows,
            train_mae: train_metrics.mae,
            train_rmse: train_metrics.rmse,
            train_r2: train_metrics.r2,
            test_mae: test_metrics.mae,
            test_rmse: test_metrics.rmse,
            test_r2: test_metrics.r2,
            feature_importances: rank_importances(&feature_names, regressor.feature_importances()),
            n_trees: regressor.n_trees(),
            trained_at,
            partition,
        };
        let metadata = TrainingMetadata {
            artifact_id: Uuid::new_v4(),
            domain: self.config.domain.clone(),
            target: self.config.target.clone(),
            row_count: rows,
            train_rows: report.partition.train.len(),
            holdout_rows: report.partition.holdout.len(),
            test_mae: report.test_mae,
            test_r2: report.test_r2,
            hyperparameters: params.clone(),
            trained_at,
        };
        self.fitted = Some(FittedState {
            codec,
            regressor,
            feature_names,
            metadata,
        });
        self.log(
            LogLevel::Info,
            "forecast.fit.complete",
            json!({
                "domain": report.domain,
                "rows": report.rows,
                "train_mae": report.train_mae,
                "test_mae": report.test_mae,
                "test_rmse": report.test_rmse,
                "test_r2": report.test_r2,
                "top_feature": report.feature_importances.first().map(|f| f.feature.clone()),
            }),
        );
        Ok(report)
    }

    /// Scores a labelled batch without touching the fitted state.
    pub fn evaluate(&self, batch: &RecordBatch) -> ForecastResult<EvaluationReport> {
        let predictions = self.predict(batch)?;
        let labels = FeatureCodec::extract_target(batch, &self.config.target)?;
        let scores = RegressionMetrics::compute(&predictions, &labels);
        Ok(EvaluationReport {
            domain: self.config.domain.clone(),
            rows: predictions.len(),
            mae: scores.mae,
            rmse: scores.rmse,
            r2: scores.r2,
        })
    }

    /// Point estimates for every row. Encoding is transform-only.
    pub fn predict(&self, batch: &RecordBatch) -> ForecastResult<Vec<f64>> {
        let state = self.state()?;
        let matrix = state.checked_transform(batch)?;
        state.regressor.predict(matrix.view())
    }

    /// Point estimates with interval bounds, identifiers and as-of dates.
    pub fn predict_records(&self, batch: &RecordBatch) -> ForecastResult<Vec<PredictionRecord>> {
        let state = self.state()?;
        let matrix = state.checked_transform(batch)?;
        let predicted = state.regressor.predict(matrix.view())?;
        let (lower, upper) = IntervalEstimator::new(self.config.interval_multiplier).bounds(&predicted);
        let identifiers = state.codec.identifiers(batch);
        let dates = state.codec.as_of_dates(batch)?;
        Ok(identifiers
            .into_iter()
            .zip(dates)
            .zip(predicted.into_iter().zip(lower.into_iter().zip(upper)))
            .map(|((identifier, as_of), (predicted, (lower, upper)))| PredictionRecord {
                identifier,
                predicted,
                lower,
                upper,
                as_of,
            })
            .collect())
    }

    /// Snapshot of the fitted state as a persistable artifact.
    pub fn to_artifact(&self) -> ForecastResult<ModelArtifact> {
        let state = self.state()?;
        Ok(ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            schema: state.codec.schema().clone(),
            encoder_state: state.codec.encoder_state().clone(),
            feature_names: state.feature_names.clone(),
            regressor: state.regressor.clone(),
            metadata: state.metadata.clone(),
        })
    }

    /// Restores a model from an artifact, checking it matches the configured schema.
    pub fn from_artifact(config: EngineConfig, artifact: ModelArtifact) -> ForecastResult<Self> {
        let expected = config.schema.feature_names();
        if artifact.feature_names != expected {
            return Err(ForecastError::SchemaMismatch {
                expected,
                found: artifact.feature_names,
            });
        }
        let codec = artifact.codec()?;
        Ok(Self {
            config,
            fitted: Some(FittedState {
                codec,
                regressor: artifact.regressor,
                feature_names: artifact.feature_names,
                metadata: artifact.metadata,
            }),
            telemetry: None,
        })
    }

    /// Writes the fitted state to `path` atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> ForecastResult<()> {
        let artifact = self.to_artifact()?;
        store::save_artifact(&artifact, path.as_ref())?;
        self.log(
            LogLevel::Info,
            "forecast.artifact.saved",
            json!({ "domain": self.config.domain, "path": path.as_ref().display().to_string(), "artifact_id": artifact.metadata.artifact_id }),
        );
        Ok(())
    }

    /// Loads a model saved with [`ForecastModel::save`].
    pub fn load(config: EngineConfig, path: impl AsRef<Path>) -> ForecastResult<Self> {
        let artifact = store::load_artifact(path)?;
        Self::from_artifact(config, artifact)
    }

    fn state(&self) -> ForecastResult<&FittedState> {
        self.fitted.as_ref().ok_or(ForecastError::ModelNotFitted)
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        telemetry::log(self.telemetry.as_ref(), level, message, metadata);
    }
}

impl FittedState {
    fn checked_transform(&self, batch: &RecordBatch) -> ForecastResult<FeatureMatrix> {
        let matrix = self.codec.transform(batch)?;
        if matrix.columns() != self.feature_names.as_slice() {
            return Err(ForecastError::SchemaMismatch {
                expected: self.feature_names.clone(),
                found: matrix.columns().to_vec(),
            });
        }
        Ok(matrix)
    }
}

fn pick(values: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&idx| values[idx]).collect()
}
