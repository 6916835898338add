#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

//! Supplycast forecasting engine: a feature codec, a gradient-boosted regressor, interval
//! estimation, persisted artifacts and a per-domain serving registry.

/// Error taxonomy.
#[path = "../error.rs"]
pub mod error;

/// Raw tabular rows and CSV loading.
#[path = "../dataset.rs"]
pub mod dataset;

/// Feature codec: schema, encoders and date parsing.
#[path = "../codec/main.rs"]
pub mod codec;

/// Gradient-boosted regression trees.
#[path = "../gbdt/main.rs"]
pub mod gbdt;

/// Uncertainty bands.
#[path = "../interval.rs"]
pub mod interval;

/// Artifact persistence.
#[path = "../store.rs"]
pub mod store;

/// Generic forecast model, metrics and reports.
#[path = "../engine/main.rs"]
pub mod engine;

/// Domain catalogue.
#[path = "../domains/main.rs"]
pub mod domains;

/// Model registry with synthetic fallback.
#[path = "../serving.rs"]
pub mod serving;

/// TOML settings.
#[path = "../settings.rs"]
pub mod settings;

/// Telemetry helpers for structured logging.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use codec::{
    encoder::{CategoryVocabulary, EncoderState},
    schema::{FeatureSchema, FeatureSource, TemporalField, UnseenCategoryPolicy},
    FeatureCodec, FeatureMatrix,
};
pub use dataset::{RawRecord, RecordBatch};
pub use domains::{Domain, FallbackProfile};
pub use engine::{
    reporter::{EvaluationReport, FeatureImportance, TrainingReport},
    EngineConfig, ForecastModel, PredictionRecord,
};
pub use error::{ForecastError, ForecastResult};
pub use gbdt::{GradientBoostedRegressor, Hyperparameters};
pub use interval::IntervalEstimator;
pub use serving::{DomainStatus, ForecastRegistry, ForecastResponse, ForecastSource};
pub use settings::{ForecastSettings, HyperparameterOverrides};
pub use store::{ModelArtifact, ModelStore, TrainingMetadata};
pub use telemetry::{ForecastTelemetry, ForecastTelemetryBuilder};
