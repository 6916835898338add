use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the forecasting engine.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A column required by the feature schema (or the target) is absent from a row.
    #[error("row {row}: missing required column `{column}`")]
    MissingColumn {
        /// Zero-based row index within the batch.
        row: usize,
        /// Column name.
        column: String,
    },
    /// A date cell could not be parsed with any of the schema's formats.
    #[error("row {row}: malformed date `{value}` in column `{column}`")]
    MalformedDate {
        /// Zero-based row index within the batch.
        row: usize,
        /// Column name.
        column: String,
        /// Offending raw value.
        value: String,
    },
    /// A numeric cell is empty, non-numeric, or not finite.
    #[error("row {row}: malformed number `{value}` in column `{column}`")]
    MalformedNumber {
        /// Zero-based row index within the batch.
        row: usize,
        /// Column name.
        column: String,
        /// Offending raw value.
        value: String,
    },
    /// Fewer rows than the configured minimum survived feature preparation.
    #[error("insufficient data: {rows} rows available, at least {required} required")]
    InsufficientData {
        /// Rows available after feature preparation.
        rows: usize,
        /// Configured minimum.
        required: usize,
    },
    /// The feature schema declaration is unusable.
    #[error("invalid feature schema: {reason}")]
    InvalidSchema {
        /// Human-readable cause.
        reason: String,
    },
    /// A categorical value was not part of the vocabulary frozen at training time.
    #[error("row {row}: unseen category `{value}` in column `{column}`")]
    UnseenCategory {
        /// Zero-based row index within the batch.
        row: usize,
        /// Column name.
        column: String,
        /// Offending raw value.
        value: String,
    },
    /// Inference features differ from the ones captured at training time.
    #[error("feature schema mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        /// Feature names captured at training time.
        expected: Vec<String>,
        /// Feature names presented at inference time.
        found: Vec<String>,
    },
    /// A matrix handed to the regressor has the wrong shape.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected length or column count.
        expected: usize,
        /// Observed length or column count.
        found: usize,
    },
    /// Hyperparameters or engine settings outside their valid range.
    #[error("invalid hyperparameters: {reason}")]
    InvalidHyperparameters {
        /// Human-readable cause.
        reason: String,
    },
    /// Prediction or export was attempted before `fit`/`load`.
    #[error("model has not been fitted or loaded")]
    ModelNotFitted,
    /// No artifact exists at the requested location.
    #[error("artifact not found at {}", path.display())]
    ArtifactNotFound {
        /// Requested location.
        path: PathBuf,
    },
    /// The artifact exists but cannot be decoded or is internally inconsistent.
    #[error("artifact at {} is corrupt: {reason}", path.display())]
    ArtifactCorrupt {
        /// Artifact location.
        path: PathBuf,
        /// Human-readable cause.
        reason: String,
    },
    /// Domain key not present in the catalogue.
    #[error("unknown forecasting domain `{0}`")]
    UnknownDomain(String),
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV decoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForecastError {
    /// True for errors caused by the shape or content of the input data.
    #[must_use]
    pub const fn is_data_quality(&self) -> bool {
        matches!(
            self,
            Self::MissingColumn { .. }
                | Self::MalformedDate { .. }
                | Self::MalformedNumber { .. }
                | Self::InsufficientData { .. }
                | Self::InvalidSchema { .. }
        )
    }

    /// True for errors a serving layer must answer by falling back to an untrained state.
    #[must_use]
    pub const fn is_fallback_trigger(&self) -> bool {
        matches!(
            self,
            Self::ModelNotFitted
                | Self::ArtifactNotFound { .. }
                | Self::ArtifactCorrupt { .. }
                | Self::SchemaMismatch { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type ForecastResult<T> = Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let missing = ForecastError::ArtifactNotFound {
            path: PathBuf::from("models/x.model.json"),
        };
        assert!(missing.is_fallback_trigger());
        assert!(!missing.is_data_quality());

        let short = ForecastError::InsufficientData {
            rows: 49,
            required: 50,
        };
        assert!(short.is_data_quality());
        assert!(!short.is_fallback_trigger());

        let unseen = ForecastError::UnseenCategory {
            row: 3,
            column: "Region".into(),
            value: "Atlantis".into(),
        };
        assert!(!unseen.is_data_quality());
        assert_eq!(
            unseen.to_string(),
            "row 3: unseen category `Atlantis` in column `Region`"
        );
    }
}
