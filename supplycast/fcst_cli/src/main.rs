use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use supplycast_forecasting::{
    Domain, EncoderState, ForecastModel, ForecastSettings, ForecastSource, RecordBatch,
    TrainingReport,
};
use uuid::Uuid;

/// File under the artifact directory listing every training run.
const RUN_MANIFEST: &str = "runs.jsonl";

#[derive(Parser, Debug)]
#[command(name = "fcst", version, about = "Supplycast demand forecasting")]
struct Cli {
    /// TOML settings file; built-in defaults apply when omitted.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Print machine-readable JSON instead of summaries.
    #[arg(long, global = true)]
    json: bool,
    /// Overrides the settings' minimum log level (debug, info, warn, error).
    #[arg(long, global = true, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fits a domain model on a CSV file and saves its artifact.
    Train {
        #[arg(long, value_parser = parse_domain)]
        domain: Domain,
        #[arg(long)]
        data: PathBuf,
    },
    /// Scores the saved model of a domain against a labelled CSV file.
    Evaluate {
        #[arg(long, value_parser = parse_domain)]
        domain: Domain,
        #[arg(long)]
        data: PathBuf,
    },
    /// Forecasts every row of a CSV file, falling back to synthetic values without a model.
    Predict {
        #[arg(long, value_parser = parse_domain)]
        domain: Domain,
        #[arg(long)]
        data: PathBuf,
        /// Writes the records as JSON to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Shows metadata and top features of a saved artifact.
    Inspect {
        #[arg(long, value_parser = parse_domain)]
        domain: Domain,
        /// Number of features to list.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Reports which domains have a usable trained model.
    Status,
    /// Lists the most recent training runs.
    History {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn parse_domain(raw: &str) -> Result<Domain, String> {
    raw.parse::<Domain>().map_err(|err| err.to_string())
}

fn parse_log_level(raw: &str) -> Result<LogLevel, String> {
    raw.parse::<LogLevel>().map_err(|err| err.to_string())
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct RunManifestEntry {
    run_id: String,
    domain: Domain,
    data: PathBuf,
    artifact: PathBuf,
    artifact_id: Option<Uuid>,
    rows: usize,
    test_mae: f64,
    test_r2: f64,
    trained_at: DateTime<Utc>,
}

impl RunManifestEntry {
    fn new(
        domain: Domain,
        data: PathBuf,
        artifact: PathBuf,
        artifact_id: Option<Uuid>,
        report: &TrainingReport,
    ) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            domain,
            data,
            artifact,
            artifact_id,
            rows: report.rows,
            test_mae: report.test_mae,
            test_r2: report.test_r2,
            trained_at: report.trained_at,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = match &cli.settings {
        Some(path) => ForecastSettings::load(path)?,
        None => ForecastSettings::default(),
    };
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    match cli.command {
        Commands::Train { domain, data } => handle_train(&settings, domain, data, cli.json),
        Commands::Evaluate { domain, data } => {
            let batch = read_batch(&data)?;
            let model = ForecastModel::load(
                settings.engine_config(domain),
                settings.model_store().location(domain.as_str()),
            )
            .with_context(|| format!("loading {domain} model"))?;
            let report = model.evaluate(&batch)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
            }
            Ok(())
        }
        Commands::Predict { domain, data, out } => {
            let batch = read_batch(&data)?;
            let registry = settings.registry()?;
            let status = registry.reload(domain)?;
            if status.source == ForecastSource::Fallback {
                eprintln!(
                    "{domain}: no usable model ({}), serving synthetic fallback",
                    status.detail.as_deref().unwrap_or("not loaded")
                );
            }
            let response = registry.forecast(domain, &batch)?;
            let rendered = serde_json::to_string_pretty(&response)?;
            match out {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("{} records written to {}", response.records.len(), path.display());
                }
                None => println!("{rendered}"),
            }
            Ok(())
        }
        Commands::Inspect { domain, top } => {
            let artifact = settings.model_store().load(domain.as_str())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&artifact.metadata)?);
                return Ok(());
            }
            let meta = &artifact.metadata;
            println!(
                "{} | artifact {} | target {} | rows {} (train {}, holdout {}) | trained {}",
                meta.domain,
                meta.artifact_id,
                meta.target,
                meta.row_count,
                meta.train_rows,
                meta.holdout_rows,
                meta.trained_at
            );
            let deepest = artifact
                .regressor
                .trees()
                .iter()
                .map(|tree| tree.depth())
                .max()
                .unwrap_or(0);
            println!(
                "trees={} depth={deepest}/{} lr={} test_mae={:.4} test_r2={:.4}",
                artifact.regressor.n_trees(),
                meta.hyperparameters.max_depth,
                meta.hyperparameters.learning_rate,
                meta.test_mae,
                meta.test_r2
            );
            for column in artifact.encoder_state.columns() {
                println!("  {}", describe_vocabulary(&artifact.encoder_state, column));
            }
            let mut ranked: Vec<(&String, f64)> = artifact
                .feature_names
                .iter()
                .zip(artifact.regressor.feature_importances().iter().copied())
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            for (name, importance) in ranked.into_iter().take(top) {
                println!("  {importance:>8.4}  {name}");
            }
            Ok(())
        }
        Commands::Status => {
            let registry = settings.registry()?;
            let statuses = registry.reload_all()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
                return Ok(());
            }
            for status in statuses {
                let source = match status.source {
                    ForecastSource::Model => "model",
                    ForecastSource::Fallback => "fallback",
                };
                println!(
                    "{:<20} | {:<8} | {} | {}",
                    status.domain,
                    source,
                    status
                        .trained_at
                        .map_or_else(|| "-".to_string(), |at| at.to_rfc3339()),
                    status.detail.unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::History { limit } => {
            let manifest = settings.artifact_dir.join(RUN_MANIFEST);
            let entries = read_manifest(&manifest)?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | rows {} | test_mae {:.4} | test_r2 {:.4} | {}",
                    entry.run_id,
                    entry.domain,
                    entry.rows,
                    entry.test_mae,
                    entry.test_r2,
                    entry.trained_at
                );
            }
            Ok(())
        }
    }
}

fn handle_train(settings: &ForecastSettings, domain: Domain, data: PathBuf, json: bool) -> Result<()> {
    let telemetry = settings.telemetry(&format!("forecast.{domain}"))?;
    let batch = read_batch(&data)?;
    let mut model =
        ForecastModel::new(settings.engine_config(domain)).with_telemetry(telemetry.clone());
    let report = match model.fit(&batch) {
        Ok(report) => report,
        Err(err) => {
            let _ = telemetry.log(
                LogLevel::Error,
                "fcst.train.failed",
                json!({ "domain": domain, "data": data, "error": err.to_string() }),
            );
            return Err(err).with_context(|| format!("training {domain} on {}", data.display()));
        }
    };
    let artifact = model.to_artifact()?;
    let location = settings.model_store().save(&artifact)?;
    let entry = RunManifestEntry::new(
        domain,
        data,
        location.clone(),
        Some(artifact.metadata.artifact_id),
        &report,
    );
    append_manifest(&settings.artifact_dir.join(RUN_MANIFEST), &entry)?;
    let _ = telemetry.log(
        LogLevel::Info,
        "fcst.train.saved",
        json!({ "run_id": entry.run_id, "artifact": location }),
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
        for feature in report.top_features(5) {
            println!("  {:>8.4}  {}", feature.importance, feature.feature);
        }
        println!("artifact saved to {}", location.display());
    }
    Ok(())
}

/// `column: n categories [first .. last]` using the frozen codes.
fn describe_vocabulary(state: &EncoderState, column: &str) -> String {
    let size = state.vocabulary(column).map_or(0, |vocabulary| vocabulary.len());
    if size == 0 {
        return format!("{column}: no categories");
    }
    let first = state.decode(column, 0).unwrap_or("?");
    let last = state.decode(column, size - 1).unwrap_or("?");
    format!("{column}: {size} categories [{first} .. {last}]")
}

fn read_batch(path: &Path) -> Result<RecordBatch> {
    RecordBatch::from_csv_path(path).with_context(|| format!("reading {}", path.display()))
}

fn append_manifest(path: &Path, entry: &RunManifestEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    serde_json::to_writer(&mut file, entry)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Vec<RunManifestEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}
