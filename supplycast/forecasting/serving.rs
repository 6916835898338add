//! Per-domain model registry consumed by a serving layer.
//!
//! Each domain owns one slot holding `Arc<ForecastModel>`. Readers clone the `Arc` and score
//! without holding the lock; reloads swap the `Arc` under a registry-wide mutex, so in-flight
//! requests finish on the model they started with. A domain without a usable model is served
//! by a seeded synthetic generator and the response says so.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    codec::temporal,
    dataset::RecordBatch,
    domains::Domain,
    engine::{EngineConfig, ForecastModel, PredictionRecord},
    error::ForecastResult,
    store::ModelStore,
    telemetry::{self, ForecastTelemetry},
};

/// Default seed of the fallback generator.
pub const DEFAULT_FALLBACK_SEED: u64 = 7;

/// What produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSource {
    /// A trained model.
    Model,
    /// The synthetic fallback generator.
    Fallback,
}

/// Records for one request plus their provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    /// Domain served.
    pub domain: Domain,
    /// Producer of the records.
    pub source: ForecastSource,
    /// One record per input row.
    pub records: Vec<PredictionRecord>,
}

/// Slot state of one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainStatus {
    /// Domain key.
    pub domain: Domain,
    /// Who answers requests right now.
    pub source: ForecastSource,
    /// Loaded artifact id.
    pub artifact_id: Option<Uuid>,
    /// Training time of the loaded model.
    pub trained_at: Option<DateTime<Utc>>,
    /// Why the domain is on fallback, if it is.
    pub detail: Option<String>,
}

struct Slot {
    config: EngineConfig,
    model: RwLock<Option<Arc<ForecastModel>>>,
    detail: RwLock<Option<String>>,
}

/// Owns one model slot per domain. Construct it explicitly and hand it to the serving layer.
pub struct ForecastRegistry {
    store: ModelStore,
    slots: IndexMap<Domain, Slot>,
    reload_lock: Mutex<()>,
    fallback: FallbackGenerator,
    telemetry: Option<ForecastTelemetry>,
}

impl std::fmt::Debug for ForecastRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastRegistry")
            .field("store", &self.store)
            .field("domains", &self.slots.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ForecastRegistry {
    /// Registry over every catalogue domain with default configs and empty slots.
    #[must_use]
    pub fn new(store: ModelStore) -> Self {
        let slots = Domain::ALL
            .into_iter()
            .map(|domain| {
                (
                    domain,
                    Slot {
                        config: domain.config(),
                        model: RwLock::new(None),
                        detail: RwLock::new(None),
                    },
                )
            })
            .collect();
        Self {
            store,
            slots,
            reload_lock: Mutex::new(()),
            fallback: FallbackGenerator::new(DEFAULT_FALLBACK_SEED),
            telemetry: None,
        }
    }

    /// Replaces a domain's engine config, used when the slot is next loaded.
    #[must_use]
    pub fn with_config(mut self, domain: Domain, config: EngineConfig) -> Self {
        if let Some(slot) = self.slots.get_mut(&domain) {
            slot.config = config;
        }
        self
    }

    /// Seeds the fallback generator.
    #[must_use]
    pub const fn with_fallback_seed(mut self, seed: u64) -> Self {
        self.fallback = FallbackGenerator::new(seed);
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ForecastTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Artifact store backing the slots.
    #[must_use]
    pub const fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Reloads one domain from the store. Missing, corrupt or mismatched artifacts empty the
    /// slot and report fallback; other errors propagate.
    pub fn reload(&self, domain: Domain) -> ForecastResult<DomainStatus> {
        let _guard = self.reload_lock.lock();
        let slot = self.slot(domain);
        let loaded = self
            .store
            .load(domain.as_str())
            .and_then(|artifact| ForecastModel::from_artifact(slot.config.clone(), artifact));
        match loaded {
            Ok(model) => {
                let model = match &self.telemetry {
                    Some(tel) => model.with_telemetry(tel.scoped(format!("forecast.{domain}"))),
                    None => model,
                };
                self.log(
                    LogLevel::Info,
                    "forecast.registry.loaded",
                    json!({ "domain": domain, "artifact_id": model.metadata().map(|m| m.artifact_id) }),
                );
                *slot.model.write() = Some(Arc::new(model));
                *slot.detail.write() = None;
            }
            Err(err) if err.is_fallback_trigger() => {
                self.log(
                    LogLevel::Warn,
                    "forecast.registry.fallback",
                    json!({ "domain": domain, "reason": err.to_string() }),
                );
                *slot.model.write() = None;
                *slot.detail.write() = Some(err.to_string());
            }
            Err(err) => return Err(err),
        }
        Ok(self.domain_status(domain, slot))
    }

    /// Reloads every domain.
    pub fn reload_all(&self) -> ForecastResult<Vec<DomainStatus>> {
        Domain::ALL
            .into_iter()
            .map(|domain| self.reload(domain))
            .collect()
    }

    /// Swaps in a freshly trained model.
    pub fn install(&self, domain: Domain, mut model: ForecastModel) {
        let _guard = self.reload_lock.lock();
        let slot = self.slot(domain);
        if let Some(tel) = &self.telemetry {
            model.set_telemetry(tel.scoped(format!("forecast.{domain}")));
        }
        *slot.model.write() = Some(Arc::new(model));
        *slot.detail.write() = None;
        self.log(
            LogLevel::Info,
            "forecast.registry.installed",
            json!({ "domain": domain }),
        );
    }

    /// Current model of a domain.
    #[must_use]
    pub fn model(&self, domain: Domain) -> Option<Arc<ForecastModel>> {
        self.slot(domain).model.read().clone()
    }

    /// Forecasts a batch with the domain's model, or the fallback generator when none is
    /// usable. Data-quality and unseen-category errors from a loaded model propagate.
    pub fn forecast(&self, domain: Domain, batch: &RecordBatch) -> ForecastResult<ForecastResponse> {
        if let Some(model) = self.model(domain) {
            match model.predict_records(batch) {
                Ok(records) => {
                    return Ok(ForecastResponse {
                        domain,
                        source: ForecastSource::Model,
                        records,
                    })
                }
                Err(err) if err.is_fallback_trigger() => {
                    self.log(
                        LogLevel::Warn,
                        "forecast.registry.fallback",
                        json!({ "domain": domain, "reason": err.to_string() }),
                    );
                }
                Err(err) => return Err(err),
            }
        }
        let slot = self.slot(domain);
        Ok(ForecastResponse {
            domain,
            source: ForecastSource::Fallback,
            records: self.fallback.records(domain, &slot.config, batch),
        })
    }

    /// Slot state of every domain, in catalogue order.
    #[must_use]
    pub fn status(&self) -> Vec<DomainStatus> {
        self.slots
            .iter()
            .map(|(domain, slot)| self.domain_status(*domain, slot))
            .collect()
    }

    fn domain_status(&self, domain: Domain, slot: &Slot) -> DomainStatus {
        let model = slot.model.read().clone();
        let metadata = model.as_ref().and_then(|model| model.metadata().cloned());
        DomainStatus {
            domain,
            source: if model.is_some() {
                ForecastSource::Model
            } else {
                ForecastSource::Fallback
            },
            artifact_id: metadata.as_ref().map(|m| m.artifact_id),
            trained_at: metadata.map(|m| m.trained_at),
            detail: slot.detail.read().clone(),
        }
    }

    fn slot(&self, domain: Domain) -> &Slot {
        // Every catalogue domain gets a slot in `new`.
        &self.slots[&domain]
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        telemetry::log(self.telemetry.as_ref(), level, message, metadata);
    }
}

/// Deterministic synthetic records shaped by each domain's [`crate::domains::FallbackProfile`].
#[derive(Debug, Clone, Copy)]
pub struct FallbackGenerator {
    seed: u64,
}

impl FallbackGenerator {
    /// Generator with a fixed seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// One record per row. Identifiers and dates come from the raw row when present.
    #[must_use]
    pub fn records(
        &self,
        domain: Domain,
        config: &EngineConfig,
        batch: &RecordBatch,
    ) -> Vec<PredictionRecord> {
        let profile = domain.fallback();
        let mut rng = SmallRng::seed_from_u64(self.seed ^ domain_salt(domain));
        let identifier_column = config.schema.identifier_column();
        let date_column = config.schema.date_column();
        batch
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                let predicted = (profile.base + rng.gen_range(profile.noise_low..profile.noise_high)) as f64;
                PredictionRecord {
                    identifier: identifier_column
                        .and_then(|column| row.get(column))
                        .map_or_else(|| format!("row-{idx}"), str::to_string),
                    predicted,
                    lower: predicted - profile.lower_offset as f64,
                    upper: predicted + profile.upper_offset as f64,
                    as_of: date_column.and_then(|date| {
                        row.get(&date.name)
                            .and_then(|raw| temporal::parse_date(raw, &date.formats))
                    }),
                }
            })
            .collect()
    }
}

fn domain_salt(domain: Domain) -> u64 {
    domain
        .as_str()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::schema::synthetic_schema,
        dataset::{RawRecord, SYNTHETIC_TARGET},
        error::ForecastError,
        gbdt::Hyperparameters,
    };
    use std::fs;
    use tempfile::tempdir;

    fn synthetic_config() -> EngineConfig {
        EngineConfig::new(Domain::UnitDemand.as_str(), synthetic_schema(), SYNTHETIC_TARGET)
            .with_hyperparameters(Hyperparameters::new(10, 3, 0.2))
    }

    fn unit_rows() -> RecordBatch {
        RecordBatch::new(vec![
            RawRecord::new()
                .with("Date", "2024-05-01")
                .with("Product ID", "P0042"),
            RawRecord::new().with("Product ID", "P0043"),
        ])
    }

    #[test]
    fn empty_store_serves_fallback() {
        let dir = tempdir().unwrap();
        let registry = ForecastRegistry::new(ModelStore::new(dir.path()));
        let statuses = registry.reload_all().unwrap();
        assert!(statuses
            .iter()
            .all(|status| status.source == ForecastSource::Fallback && status.detail.is_some()));

        let response = registry.forecast(Domain::UnitDemand, &unit_rows()).unwrap();
        assert_eq!(response.source, ForecastSource::Fallback);
        let first = &response.records[0];
        assert_eq!(first.identifier, "P0042");
        assert_eq!(first.as_of, chrono::NaiveDate::from_ymd_opt(2024, 5, 1));
        assert!((900.0..1200.0).contains(&first.predicted));
        assert_eq!(first.lower, first.predicted - 100.0);
        assert_eq!(first.upper, first.predicted + 150.0);
        assert_eq!(response.records[1].as_of, None);

        let again = registry.forecast(Domain::UnitDemand, &unit_rows()).unwrap();
        assert_eq!(again.records, response.records);
    }

    #[test]
    fn install_and_reload_serve_the_model() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let batch = RecordBatch::synthetic(60, 4);
        let mut model = ForecastModel::new(synthetic_config());
        model.fit(&batch).unwrap();

        let registry =
            ForecastRegistry::new(store.clone()).with_config(Domain::UnitDemand, synthetic_config());
        registry.install(Domain::UnitDemand, model.clone());
        let response = registry.forecast(Domain::UnitDemand, &batch.head(3)).unwrap();
        assert_eq!(response.source, ForecastSource::Model);
        assert_eq!(response.records.len(), 3);

        store.save(&model.to_artifact().unwrap()).unwrap();
        let fresh =
            ForecastRegistry::new(store).with_config(Domain::UnitDemand, synthetic_config());
        let status = fresh.reload(Domain::UnitDemand).unwrap();
        assert_eq!(status.source, ForecastSource::Model);
        assert_eq!(status.artifact_id, model.metadata().map(|m| m.artifact_id));
        let served = fresh.forecast(Domain::UnitDemand, &batch.head(3)).unwrap();
        assert_eq!(served.records, response.records);
    }

    #[test]
    fn corrupt_artifact_falls_back_without_failing() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        fs::write(store.location("weekly_sales"), "{\"format_version\":").unwrap();
        let registry = ForecastRegistry::new(store);
        let status = registry.reload(Domain::WeeklySales).unwrap();
        assert_eq!(status.source, ForecastSource::Fallback);
        assert!(status.detail.unwrap().contains("corrupt"));
        assert!(registry.model(Domain::WeeklySales).is_none());
    }

    #[test]
    fn artifact_with_broken_schema_falls_back() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let batch = RecordBatch::synthetic(60, 4);
        let mut model = ForecastModel::new(synthetic_config());
        model.fit(&batch).unwrap();
        let path = store.save(&model.to_artifact().unwrap()).unwrap();
        let mut document: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        document["schema"]["date_column"] = serde_json::Value::Null;
        fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

        let registry =
            ForecastRegistry::new(store).with_config(Domain::UnitDemand, synthetic_config());
        let status = registry.reload(Domain::UnitDemand).unwrap();
        assert_eq!(status.source, ForecastSource::Fallback);
        assert!(status.detail.unwrap().contains("corrupt"));
        let statuses = registry.reload_all().unwrap();
        assert_eq!(statuses.len(), Domain::ALL.len());
        let response = registry.forecast(Domain::UnitDemand, &batch.head(2)).unwrap();
        assert_eq!(response.source, ForecastSource::Fallback);
    }

    #[test]
    fn installed_model_logs_through_registry_telemetry() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("registry.log");
        let telemetry = ForecastTelemetry::builder("forecast.registry")
            .log_path(&log_path)
            .build()
            .unwrap();
        let registry = ForecastRegistry::new(ModelStore::new(dir.path()))
            .with_config(Domain::UnitDemand, synthetic_config())
            .with_telemetry(telemetry);
        let batch = RecordBatch::synthetic(60, 4);
        let mut model = ForecastModel::new(synthetic_config());
        model.fit(&batch).unwrap();
        registry.install(Domain::UnitDemand, model);
        let installed = registry.model(Domain::UnitDemand).unwrap();
        installed.save(dir.path().join("unit_demand.model.json")).unwrap();
        let log = fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("forecast.registry.installed"));
        assert!(log.contains("forecast.artifact.saved"));
        assert!(log.contains("\"module\":\"forecast.unit_demand\""));
    }

    #[test]
    fn loaded_model_still_rejects_unseen_categories() {
        let dir = tempdir().unwrap();
        let batch = RecordBatch::synthetic(60, 4);
        let mut model = ForecastModel::new(synthetic_config());
        model.fit(&batch).unwrap();
        let registry = ForecastRegistry::new(ModelStore::new(dir.path()));
        registry.install(Domain::UnitDemand, model);
        let novel = RecordBatch::new(vec![batch.rows()[0].clone().with("segment", "omega")]);
        assert!(matches!(
            registry.forecast(Domain::UnitDemand, &novel),
            Err(ForecastError::UnseenCategory { .. })
        ));
    }

    #[test]
    fn fallback_differs_per_domain() {
        let generator = FallbackGenerator::new(1);
        let rows = RecordBatch::synthetic(4, 1);
        let unit = generator.records(Domain::UnitDemand, &Domain::UnitDemand.config(), &rows);
        let weekly = generator.records(Domain::WeeklySales, &Domain::WeeklySales.config(), &rows);
        assert!(unit.iter().all(|r| (900.0..1200.0).contains(&r.predicted)));
        assert!(weekly.iter().all(|r| (2100.0..3100.0).contains(&r.predicted)));
        assert_eq!(unit[0].identifier, "row-0");
    }
}
