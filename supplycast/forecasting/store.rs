//! Persisted model artifacts.
//!
//! An artifact is one JSON document bundling the regressor, the frozen encoder state and the
//! feature schema. Saves go through a uniquely named temporary file that is synced and then
//! renamed over the destination, so readers see either the previous artifact or the new one.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    codec::{encoder::EncoderState, schema::FeatureSchema, FeatureCodec},
    error::{ForecastError, ForecastResult},
    gbdt::{GradientBoostedRegressor, Hyperparameters},
};

/// Current artifact layout version.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// File suffix of artifacts managed by [`ModelStore`].
pub const ARTIFACT_SUFFIX: &str = ".model.json";

/// Facts captured when the model was trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    /// Unique id of this artifact.
    pub artifact_id: Uuid,
    /// Domain key.
    pub domain: String,
    /// Target column.
    pub target: String,
    /// Rows after feature preparation.
    pub row_count: usize,
    /// Rows in the train partition.
    pub train_rows: usize,
    /// Rows in the holdout partition.
    pub holdout_rows: usize,
    /// Holdout mean absolute error.
    pub test_mae: f64,
    /// Holdout R².
    pub test_r2: f64,
    /// Hyperparameters used for the fit.
    pub hyperparameters: Hyperparameters,
    /// Training completion time.
    pub trained_at: DateTime<Utc>,
}

/// Everything needed to score new rows exactly as the trained model did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Layout version, see [`ARTIFACT_FORMAT_VERSION`].
    pub format_version: u32,
    /// Feature schema at training time.
    pub schema: FeatureSchema,
    /// Frozen categorical vocabularies.
    pub encoder_state: EncoderState,
    /// Matrix header captured at training time.
    pub feature_names: Vec<String>,
    /// Fitted ensemble.
    pub regressor: GradientBoostedRegressor,
    /// Training metadata.
    pub metadata: TrainingMetadata,
}

impl ModelArtifact {
    /// Checks internal consistency. Returns the reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(format!(
                "unsupported format version {} (expected {ARTIFACT_FORMAT_VERSION})",
                self.format_version
            ));
        }
        self.schema.validate().map_err(|err| err.to_string())?;
        let declared = self.schema.feature_names();
        if declared != self.feature_names {
            return Err(format!(
                "schema declares {declared:?} but artifact captured {:?}",
                self.feature_names
            ));
        }
        if self.regressor.n_features() != self.feature_names.len() {
            return Err(format!(
                "regressor expects {} features, artifact lists {}",
                self.regressor.n_features(),
                self.feature_names.len()
            ));
        }
        if let Some(reason) = self.regressor.consistency_error() {
            return Err(reason);
        }
        for column in self.schema.categorical() {
            match self.encoder_state.vocabulary(column) {
                None => return Err(format!("missing vocabulary for `{column}`")),
                Some(vocabulary) if !vocabulary.is_sorted_unique() => {
                    return Err(format!("vocabulary for `{column}` is not sorted"))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Rebuilds the frozen codec.
    pub fn codec(&self) -> ForecastResult<FeatureCodec> {
        FeatureCodec::from_parts(self.schema.clone(), self.encoder_state.clone())
    }
}

/// Writes an artifact atomically.
pub fn save_artifact(artifact: &ModelArtifact, location: impl AsRef<Path>) -> ForecastResult<()> {
    let location = location.as_ref();
    if let Some(parent) = location.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp = temp_path(location);
    let result = write_synced(artifact, &temp)
        .and_then(|()| fs::rename(&temp, location).map_err(ForecastError::from));
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn temp_path(location: &Path) -> PathBuf {
    let name = location
        .file_name()
        .map_or_else(|| "artifact".into(), |name| name.to_string_lossy().into_owned());
    location.with_file_name(format!(".{name}.tmp-{}", Uuid::new_v4().simple()))
}

fn write_synced(artifact: &ModelArtifact, path: &Path) -> ForecastResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, artifact)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Reads and validates an artifact.
pub fn load_artifact(location: impl AsRef<Path>) -> ForecastResult<ModelArtifact> {
    let location = location.as_ref();
    let raw = match fs::read(location) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ForecastError::ArtifactNotFound {
                path: location.to_path_buf(),
            })
        }
        Err(err) => return Err(err.into()),
    };
    let corrupt = |reason: String| ForecastError::ArtifactCorrupt {
        path: location.to_path_buf(),
        reason,
    };
    let artifact: ModelArtifact =
        serde_json::from_slice(&raw).map_err(|err| corrupt(err.to_string()))?;
    artifact.validate().map_err(corrupt)?;
    Ok(artifact)
}

/// Directory of per-domain artifacts named `<domain>.model.json`.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    /// Store rooted at `root`; the directory is created on first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact path of a domain.
    #[must_use]
    pub fn location(&self, domain: &str) -> PathBuf {
        self.root.join(format!("{domain}{ARTIFACT_SUFFIX}"))
    }

    /// Saves under the artifact's own domain key and returns the path written.
    pub fn save(&self, artifact: &ModelArtifact) -> ForecastResult<PathBuf> {
        let location = self.location(&artifact.metadata.domain);
        save_artifact(artifact, &location)?;
        Ok(location)
    }

    /// Loads a domain's artifact.
    pub fn load(&self, domain: &str) -> ForecastResult<ModelArtifact> {
        load_artifact(self.location(domain))
    }

    /// Domain keys with an artifact on disk, sorted.
    pub fn available(&self) -> ForecastResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut domains = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(domain) = name.to_str().and_then(|n| n.strip_suffix(ARTIFACT_SUFFIX)) {
                if !domain.is_empty() && !domain.starts_with('.') {
                    domains.push(domain.to_string());
                }
            }
        }
        domains.sort();
        Ok(domains)
    }
}

#[cfg(test)]
pub(crate) fn sample_artifact(domain: &str) -> ModelArtifact {
    use crate::{codec::schema::synthetic_schema, dataset::RecordBatch, dataset::SYNTHETIC_TARGET};

    let batch = RecordBatch::synthetic(60, 5);
    let (codec, matrix, target) =
        FeatureCodec::fit_transform(synthetic_schema(), &batch, SYNTHETIC_TARGET).unwrap();
    let hyperparameters = Hyperparameters::new(5, 3, 0.2);
    let regressor =
        GradientBoostedRegressor::fit(matrix.view(), &target, &hyperparameters).unwrap();
    ModelArtifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        feature_names: matrix.columns().to_vec(),
        schema: codec.schema().clone(),
        encoder_state: codec.encoder_state().clone(),
        regressor,
        metadata: TrainingMetadata {
            artifact_id: Uuid::new_v4(),
            domain: domain.to_string(),
            target: SYNTHETIC_TARGET.to_string(),
            row_count: 60,
            train_rows: 60,
            holdout_rows: 0,
            test_mae: 0.0,
            test_r2: 0.0,
            hyperparameters,
            trained_at: Utc::now(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_artifact() {
        let dir = tempdir().unwrap();
        let artifact = sample_artifact("unit_demand");
        let path = dir.path().join("nested/unit.model.json");
        save_artifact(&artifact, &path).unwrap();
        let restored = load_artifact(&path).unwrap();
        assert_eq!(restored, artifact);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn missing_and_truncated_artifacts_are_distinguishable() {
        let dir = tempdir().unwrap();
        let missing = load_artifact(dir.path().join("absent.model.json")).unwrap_err();
        assert!(matches!(missing, ForecastError::ArtifactNotFound { .. }));
        assert!(missing.is_fallback_trigger());

        let path = dir.path().join("cut.model.json");
        save_artifact(&sample_artifact("unit_demand"), &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        let corrupt = load_artifact(&path).unwrap_err();
        assert!(matches!(corrupt, ForecastError::ArtifactCorrupt { .. }));
        assert!(corrupt.is_fallback_trigger());
    }

    #[test]
    fn inconsistent_artifacts_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.model.json");

        let mut wrong_version = sample_artifact("unit_demand");
        wrong_version.format_version = 99;
        save_artifact(&wrong_version, &path).unwrap();
        assert!(matches!(
            load_artifact(&path),
            Err(ForecastError::ArtifactCorrupt { .. })
        ));

        let mut renamed = sample_artifact("unit_demand");
        renamed.feature_names.reverse();
        save_artifact(&renamed, &path).unwrap();
        assert!(matches!(
            load_artifact(&path),
            Err(ForecastError::ArtifactCorrupt { .. })
        ));

        let mut no_vocab = sample_artifact("unit_demand");
        no_vocab.encoder_state = EncoderState::default();
        assert!(no_vocab.validate().is_err());
    }

    #[test]
    fn artifact_with_broken_schema_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unit_demand.model.json");
        save_artifact(&sample_artifact("unit_demand"), &path).unwrap();

        let mut document: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        document["schema"]["date_column"] = serde_json::Value::Null;
        fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();
        let err = load_artifact(&path).unwrap_err();
        assert!(matches!(err, ForecastError::ArtifactCorrupt { .. }), "{err}");
        assert!(err.is_fallback_trigger());

        document["schema"]["date_column"] = serde_json::json!({ "name": "date", "formats": [] });
        fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();
        assert!(matches!(
            load_artifact(&path),
            Err(ForecastError::ArtifactCorrupt { .. })
        ));
    }

    #[test]
    fn failed_save_keeps_previous_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unit_demand.model.json");
        let original = sample_artifact("unit_demand");
        save_artifact(&original, &path).unwrap();

        // A non-empty directory at the destination makes the final rename fail.
        let blocked = dir.path().join("blocked.model.json");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), "x").unwrap();
        let mut replacement = sample_artifact("unit_demand");
        replacement.metadata.row_count = 999;
        assert!(save_artifact(&replacement, &blocked).is_err());

        // A parent that is a regular file cannot be created.
        let under_file = path.join("nested.model.json");
        assert!(save_artifact(&replacement, &under_file).is_err());

        assert_eq!(load_artifact(&path).unwrap(), original);
        let temps: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".tmp-"))
            .collect();
        assert!(temps.is_empty(), "leftover temp files: {temps:?}");
    }

    #[test]
    fn store_lists_saved_domains() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("models"));
        assert!(store.available().unwrap().is_empty());
        store.save(&sample_artifact("weekly_sales")).unwrap();
        let path = store.save(&sample_artifact("retail_demand")).unwrap();
        assert_eq!(path, store.location("retail_demand"));
        fs::write(store.root().join("notes.txt"), "ignored").unwrap();
        assert_eq!(
            store.available().unwrap(),
            vec!["retail_demand".to_string(), "weekly_sales".to_string()]
        );
        assert_eq!(store.load("weekly_sales").unwrap().metadata.domain, "weekly_sales");
    }
}
