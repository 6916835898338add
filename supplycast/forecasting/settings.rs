use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared_logging::LogLevel;

use crate::{
    domains::Domain,
    engine::{EngineConfig, DEFAULT_HOLDOUT_RATIO, DEFAULT_MIN_ROWS, DEFAULT_SEED},
    gbdt::Hyperparameters,
    interval::DEFAULT_MULTIPLIER,
    serving::{ForecastRegistry, DEFAULT_FALLBACK_SEED},
    store::ModelStore,
    telemetry::ForecastTelemetry,
};

/// Runtime settings shared by the CLI and any serving layer.
#[derive(Debug, Clone)]
pub struct ForecastSettings {
    /// Directory holding `<domain>.model.json` artifacts.
    pub artifact_dir: PathBuf,
    /// JSON-lines log file; logging is off when absent.
    pub log_path: Option<PathBuf>,
    /// Minimum level written to the log.
    pub log_level: LogLevel,
    /// Seed of the train/holdout shuffle.
    pub seed: u64,
    /// Minimum prepared rows for a fit.
    pub min_rows: usize,
    /// Holdout share.
    pub holdout_ratio: f64,
    /// Interval band multiplier.
    pub interval_multiplier: f64,
    /// Seed of the fallback generator.
    pub fallback_seed: u64,
    /// Per-domain hyperparameter overrides.
    pub domains: BTreeMap<Domain, HyperparameterOverrides>,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("models"),
            log_path: None,
            log_level: LogLevel::Info,
            seed: DEFAULT_SEED,
            min_rows: DEFAULT_MIN_ROWS,
            holdout_ratio: DEFAULT_HOLDOUT_RATIO,
            interval_multiplier: DEFAULT_MULTIPLIER,
            fallback_seed: DEFAULT_FALLBACK_SEED,
            domains: BTreeMap::new(),
        }
    }
}

impl ForecastSettings {
    /// Loads settings from a TOML file. Relative paths resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading forecast settings {}", path.display()))?;
        let base = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_toml_str(&raw, &base).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses settings from TOML text, resolving relative paths against `base`.
    pub fn from_toml_str(raw: &str, base: &Path) -> Result<Self> {
        let document: SettingsSerde = toml::from_str(raw)?;
        let mut domains = BTreeMap::new();
        for (key, overrides) in document.domains {
            let domain: Domain = key
                .parse()
                .with_context(|| format!("unknown domain section [domains.{key}]"))?;
            domains.insert(domain, overrides);
        }
        let resolve = |candidate: PathBuf| {
            if candidate.is_absolute() {
                candidate
            } else {
                base.join(candidate)
            }
        };
        let settings = Self {
            artifact_dir: resolve(document.artifact_dir),
            log_path: document.log_path.map(resolve),
            log_level: document.log_level,
            seed: document.seed,
            min_rows: document.min_rows,
            holdout_ratio: document.holdout_ratio,
            interval_multiplier: document.interval_multiplier,
            fallback_seed: document.fallback_seed,
            domains,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects thresholds and overrides the engine cannot use.
    pub fn validate(&self) -> Result<()> {
        if !(self.holdout_ratio > 0.0 && self.holdout_ratio < 1.0) {
            bail!("holdout_ratio must be in (0, 1), got {}", self.holdout_ratio);
        }
        if self.min_rows < 2 {
            bail!("min_rows must be at least 2, got {}", self.min_rows);
        }
        if !(self.interval_multiplier.is_finite() && self.interval_multiplier >= 0.0) {
            bail!(
                "interval_multiplier must be non-negative, got {}",
                self.interval_multiplier
            );
        }
        for domain in Domain::ALL {
            self.engine_config(domain)
                .validate()
                .with_context(|| format!("settings for domain {domain}"))?;
        }
        Ok(())
    }

    /// Hyperparameters of a domain after overrides.
    #[must_use]
    pub fn hyperparameters(&self, domain: Domain) -> Hyperparameters {
        let mut params = domain.hyperparameters();
        if let Some(overrides) = self.domains.get(&domain) {
            overrides.apply(&mut params);
        }
        params
    }

    /// Engine config of a domain with these settings applied.
    #[must_use]
    pub fn engine_config(&self, domain: Domain) -> EngineConfig {
        let mut config = domain
            .config()
            .with_hyperparameters(self.hyperparameters(domain));
        config.min_rows = self.min_rows;
        config.holdout_ratio = self.holdout_ratio;
        config.seed = self.seed;
        config.interval_multiplier = self.interval_multiplier;
        config
    }

    /// Artifact store at `artifact_dir`.
    #[must_use]
    pub fn model_store(&self) -> ModelStore {
        ModelStore::new(&self.artifact_dir)
    }

    /// Telemetry writing to `log_path`, or a silent handle when no path is set.
    pub fn telemetry(&self, module: &str) -> Result<ForecastTelemetry> {
        match &self.log_path {
            Some(path) => ForecastTelemetry::builder(module)
                .log_path(path)
                .min_level(self.log_level)
                .build()
                .with_context(|| format!("opening log file {}", path.display())),
            None => Ok(ForecastTelemetry::disabled(module)),
        }
    }

    /// Registry with per-domain configs, fallback seed and telemetry. Slots start empty.
    pub fn registry(&self) -> Result<ForecastRegistry> {
        let telemetry = self.telemetry("forecast.registry")?;
        Ok(Domain::ALL.into_iter().fold(
            ForecastRegistry::new(self.model_store())
                .with_fallback_seed(self.fallback_seed)
                .with_telemetry(telemetry),
            |registry, domain| registry.with_config(domain, self.engine_config(domain)),
        ))
    }
}

/// Optional per-domain hyperparameter overrides.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HyperparameterOverrides {
    /// Boosting rounds.
    pub n_estimators: Option<usize>,
    /// Tree depth.
    pub max_depth: Option<usize>,
    /// Shrinkage.
    pub learning_rate: Option<f64>,
    /// Minimum rows per leaf.
    pub min_samples_leaf: Option<usize>,
    /// L2 penalty.
    pub l2_regularization: Option<f64>,
    /// Histogram bins.
    pub max_bins: Option<usize>,
}

impl HyperparameterOverrides {
    /// Writes every set field into `params`.
    pub fn apply(&self, params: &mut Hyperparameters) {
        if let Some(value) = self.n_estimators {
            params.n_estimators = value;
        }
        if let Some(value) = self.max_depth {
            params.max_depth = value;
        }
        if let Some(value) = self.learning_rate {
            params.learning_rate = value;
        }
        if let Some(value) = self.min_samples_leaf {
            params.min_samples_leaf = value;
        }
        if let Some(value) = self.l2_regularization {
            params.l2_regularization = value;
        }
        if let Some(value) = self.max_bins {
            params.max_bins = value;
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsSerde {
    #[serde(default = "default_artifact_dir")]
    artifact_dir: PathBuf,
    #[serde(default)]
    log_path: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    log_level: LogLevel,
    #[serde(default = "default_seed")]
    seed: u64,
    #[serde(default = "default_min_rows")]
    min_rows: usize,
    #[serde(default = "default_holdout_ratio")]
    holdout_ratio: f64,
    #[serde(default = "default_interval_multiplier")]
    interval_multiplier: f64,
    #[serde(default = "default_fallback_seed")]
    fallback_seed: u64,
    #[serde(default)]
    domains: BTreeMap<String, HyperparameterOverrides>,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("models")
}

const fn default_log_level() -> LogLevel {
    LogLevel::Info
}

const fn default_seed() -> u64 {
    DEFAULT_SEED
}

const fn default_min_rows() -> usize {
    DEFAULT_MIN_ROWS
}

const fn default_holdout_ratio() -> f64 {
    DEFAULT_HOLDOUT_RATIO
}

const fn default_interval_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

const fn default_fallback_seed() -> u64 {
    DEFAULT_FALLBACK_SEED
}
