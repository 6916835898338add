use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Builder configuring telemetry for forecasting workflows.
pub struct ForecastTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
}

impl ForecastTelemetryBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Info,
        }
    }

    /// Sets the JSON log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Finalizes the builder.
    pub fn build(self) -> Result<ForecastTelemetry> {
        ForecastTelemetry::new(self.module, self.log_path, self.min_level)
    }
}

/// Telemetry handle for forecasting workflows. Cloning shares the sink.
#[derive(Clone)]
pub struct ForecastTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for ForecastTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForecastTelemetry")
            .field("module", &self.inner.module)
            .field("log_path", &self.inner.logger.as_ref().map(|logger| logger.path()))
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<Arc<JsonLogger>>,
}

impl ForecastTelemetry {
    fn new(module: impl Into<String>, log_path: Option<PathBuf>, min_level: LogLevel) -> Result<Self> {
        let logger = if let Some(path) = log_path {
            Some(Arc::new(JsonLogger::with_min_level(path, min_level)?))
        } else {
            None
        };
        Ok(Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger,
            }),
        })
    }

    /// Returns a builder for this telemetry helper.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> ForecastTelemetryBuilder {
        ForecastTelemetryBuilder::new(module)
    }

    /// Telemetry that discards every record.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
            }),
        }
    }

    /// Same sink, different module label.
    #[must_use]
    pub fn scoped(&self, module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: self.inner.logger.clone(),
            }),
        }
    }

    /// Module label stamped on every record.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Logs a structured record.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }
}

/// Logs through optional telemetry, ignoring sink failures.
pub(crate) fn log(
    telemetry: Option<&ForecastTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn telemetry_logs_above_threshold() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("forecast.log");
        let telemetry = ForecastTelemetry::builder("forecast")
            .log_path(&log_path)
            .min_level(LogLevel::Info)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Debug, "forecast.tree", json!({ "tree": 1 }))
            .unwrap();
        telemetry
            .log(LogLevel::Info, "forecast.trained", json!({ "rows": 200 }))
            .unwrap();
        let scoped = telemetry.scoped("forecast.retail_demand");
        scoped
            .log(LogLevel::Warn, "forecast.fallback", json!({}))
            .unwrap();
        assert!(Arc::ptr_eq(
            scoped.inner.logger.as_ref().unwrap(),
            telemetry.inner.logger.as_ref().unwrap()
        ));
        let content = std::fs::read_to_string(log_path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("forecast.trained"));
        assert!(content.contains("\"module\":\"forecast.retail_demand\""));
    }

    #[test]
    fn scoped_handles_write_whole_lines_concurrently() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("forecast.log");
        let telemetry = ForecastTelemetry::builder("forecast")
            .log_path(&log_path)
            .build()
            .unwrap();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let scoped = telemetry.scoped(format!("forecast.worker{worker}"));
                std::thread::spawn(move || {
                    for step in 0..50 {
                        scoped
                            .log(LogLevel::Info, "forecast.step", json!({ "step": step }))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let content = std::fs::read_to_string(log_path).unwrap();
        assert_eq!(content.lines().count(), 200);
        for line in content.lines() {
            serde_json::from_str::<Value>(line).unwrap();
        }
    }

    #[test]
    fn disabled_telemetry_is_silent() {
        let telemetry = ForecastTelemetry::disabled("forecast");
        assert!(telemetry.log(LogLevel::Error, "ignored", json!({})).is_ok());
        assert_eq!(telemetry.module(), "forecast");
    }
}
