use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_event_bus::FileEventPublisher;
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink, StderrLogger};
use somnus_model::{
    BundleStore, InferenceService, ModelTelemetry, SleepRecord, TrainingConfig, TrainingDataset,
    TrainingPipeline,
};
use uuid::Uuid;

const DEFAULT_STORE: &str = "somnus-store";
const DEFAULT_MANIFEST: &str = "somnus-store/runs.jsonl";
const DEFAULT_LOG_DIR: &str = "somnus-store/logs";

#[derive(Parser, Debug)]
#[command(name = "somnus", version, about = "Sleep-disorder model training and inference")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains on a CSV export and commits a bundle.
    Train(TrainArgs),
    /// Predicts from JSON records (a single object or an array).
    Predict {
        /// Bundle directory or store root.
        #[arg(long, default_value = DEFAULT_STORE)]
        bundle: PathBuf,
        /// JSON file; stdin when omitted.
        #[arg(long)]
        record: Option<PathBuf>,
        /// Overrides both pressure readings with `systolic/diastolic` text.
        #[arg(long)]
        blood_pressure: Option<String>,
    },
    /// Describes a committed bundle.
    Inspect {
        /// Bundle directory or store root.
        #[arg(long, default_value = DEFAULT_STORE)]
        bundle: PathBuf,
    },
    /// Queries the training run manifest.
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RunsCommand {
    /// Lists the most recent runs.
    List {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
    /// Shows one run.
    Status {
        job_id: String,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct TrainArgs {
    /// Historical CSV with a header row.
    #[arg(long)]
    data: PathBuf,
    /// TOML training config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_STORE)]
    store: PathBuf,
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,
    #[arg(long)]
    event_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct RunManifestEntry {
    job_id: String,
    submitted_at: DateTime<Utc>,
    data: PathBuf,
    config: Option<PathBuf>,
    store: PathBuf,
    log_path: PathBuf,
    status: RunStatus,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

impl RunManifestEntry {
    fn new(args: &TrainArgs, log_path: PathBuf) -> Self {
        Self {
            job_id: format!("job-{}", Uuid::new_v4()),
            submitted_at: Utc::now(),
            data: args.data.clone(),
            config: args.config.clone(),
            store: args.store.clone(),
            log_path,
            status: RunStatus::Queued,
            run_id: None,
            accuracy: None,
            error: None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => handle_train(&args),
        Commands::Predict {
            bundle,
            record,
            blood_pressure,
        } => handle_predict(&bundle, record.as_deref(), blood_pressure.as_deref()),
        Commands::Inspect { bundle } => handle_inspect(&bundle),
        Commands::Runs {
            command: RunsCommand::List { limit, manifest },
        } => {
            let entries = read_manifest(&manifest)?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {:?} | {} | {} | {}",
                    entry.job_id,
                    entry.status,
                    entry.submitted_at,
                    entry.run_id.as_deref().unwrap_or("-"),
                    entry
                        .accuracy
                        .map_or_else(|| "-".to_owned(), |accuracy| format!("{accuracy:.4}"))
                );
            }
            Ok(())
        }
        Commands::Runs {
            command: RunsCommand::Status { job_id, manifest },
        } => {
            let entries = read_manifest(&manifest)?;
            if let Some(entry) = entries.into_iter().find(|e| e.job_id == job_id) {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("run {job_id} not found");
            }
            Ok(())
        }
    }
}

fn handle_train(args: &TrainArgs) -> Result<()> {
    anyhow::ensure!(args.data.exists(), "dataset {} not found", args.data.display());
    let config = match &args.config {
        Some(path) => TrainingConfig::load(path)?,
        None => TrainingConfig::default(),
    };

    let log_path = compute_log_path(&args.log_dir)?;
    let mut entry = RunManifestEntry::new(args, log_path.clone());
    append_manifest(&args.manifest, &entry)?;

    let mut telemetry = ModelTelemetry::builder("somnus").log_path(&log_path);
    if let Some(path) = &args.event_log {
        telemetry = telemetry.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    let pipeline = TrainingPipeline::new(config).with_telemetry(telemetry.build()?);

    entry.status = RunStatus::Running;
    update_entry(&args.manifest, &entry)?;
    log_job_event(
        &log_path,
        LogLevel::Info,
        "job started",
        json!({ "job_id": entry.job_id, "data": entry.data }),
    )?;

    let outcome = TrainingDataset::from_csv_path(&args.data)
        .map_err(anyhow::Error::from)
        .and_then(|dataset| {
            pipeline
                .train_and_commit(&dataset, &BundleStore::new(&args.store))
                .map_err(anyhow::Error::from)
        });
    match outcome {
        Ok(outcome) => {
            entry.status = RunStatus::Completed;
            entry.run_id = Some(outcome.run_id.clone());
            entry.accuracy = Some(outcome.report.accuracy);
            update_entry(&args.manifest, &entry)?;
            log_job_event(
                &log_path,
                LogLevel::Info,
                "job completed",
                json!({ "job_id": entry.job_id, "run_id": outcome.run_id }),
            )?;
            let summary = json!({
                "job_id": entry.job_id,
                "run_id": outcome.run_id,
                "bundle_dir": outcome.bundle_dir,
                "evaluation": outcome.report.summary(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(err) => {
            entry.status = RunStatus::Failed;
            entry.error = Some(format!("{err:#}"));
            update_entry(&args.manifest, &entry)?;
            log_job_event(
                &log_path,
                LogLevel::Error,
                "job failed",
                json!({ "job_id": entry.job_id, "error": format!("{err:#}") }),
            )?;
            Err(err.context(format!("training job {} failed", entry.job_id)))
        }
    }
}

fn handle_predict(bundle: &Path, record: Option<&Path>, blood_pressure: Option<&str>) -> Result<()> {
    let raw = match record {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading record {}", path.display()))?,
        None => {
            let mut raw = String::new();
            io::stdin().read_to_string(&mut raw).context("reading record from stdin")?;
            raw
        }
    };
    let input: Value = serde_json::from_str(&raw).context("record is not valid JSON")?;
    let batch = input.is_array();
    let mut records: Vec<SleepRecord> = if batch {
        serde_json::from_value(input).context("invalid record batch")?
    } else {
        vec![serde_json::from_value(input).context("invalid record")?]
    };
    if let Some(text) = blood_pressure {
        records = records
            .into_iter()
            .map(|record| record.with_blood_pressure(text))
            .collect::<Result<_, _>>()?;
    }

    let service = load_service(bundle)?;
    let mut responses = Vec::with_capacity(records.len());
    for result in service.predict_batch(&records) {
        responses.push(match result {
            Ok(prediction) => serde_json::to_value(prediction)?,
            Err(err) => json!({ "error": err.to_string() }),
        });
    }
    let output = if batch {
        Value::Array(responses)
    } else {
        responses.pop().unwrap_or(Value::Null)
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn handle_inspect(bundle: &Path) -> Result<()> {
    let service = load_service(bundle)?;
    let bundle = service.bundle();
    let vocabularies: serde_json::Map<String, Value> = bundle
        .encoders()
        .feature_vocabularies()
        .chain(bundle.labels().ok())
        .map(|vocabulary| (vocabulary.field().to_owned(), json!(vocabulary.values())))
        .collect();
    let description = json!({
        "run_id": bundle.run_id(),
        "created_at": bundle.created_at(),
        "path": service.bundle_dir(),
        "algorithm": bundle.classifier().algorithm(),
        "features": bundle.schema().names(),
        "vocabularies": vocabularies,
        "evaluation": bundle.evaluation().map(somnus_model::EvaluationReport::summary),
    });
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

fn load_service(location: &Path) -> Result<InferenceService> {
    let telemetry = ModelTelemetry::builder("somnus")
        .sink(Arc::new(StderrLogger::new(LogLevel::Warn)))
        .build()?;
    InferenceService::load_with_telemetry(location, telemetry)
        .with_context(|| format!("loading bundle from {}", location.display()))
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

fn update_entry(path: &Path, updated: &RunManifestEntry) -> Result<()> {
    let mut entries = read_manifest(path)?;
    let Some(slot) = entries.iter_mut().find(|entry| entry.job_id == updated.job_id) else {
        return append_manifest(path, updated);
    };
    *slot = updated.clone();
    let staging = path.with_extension("jsonl.tmp");
    let mut file = File::create(&staging)?;
    for entry in &entries {
        serde_json::to_writer(&mut file, entry)?;
        file.write_all(b"\n")?;
    }
    file.sync_all()?;
    fs::rename(&staging, path).with_context(|| format!("replacing manifest {}", path.display()))?;
    Ok(())
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!(
        "train-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    )))
}

fn log_job_event(path: &Path, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
    let logger = JsonLogger::new(path)?;
    logger.log(&LogRecord::new("somnus", level, message).with_metadata(metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(root: &Path) -> TrainArgs {
        TrainArgs {
            data: root.join("data.csv"),
            config: None,
            store: root.join("store"),
            log_dir: root.join("logs"),
            manifest: root.join("runs.jsonl"),
            event_log: None,
        }
    }

    #[test]
    fn manifest_tracks_status_transitions() {
        let tmp = tempdir().unwrap();
        let args = args(tmp.path());
        let mut entry = RunManifestEntry::new(&args, tmp.path().join("job.log"));
        append_manifest(&args.manifest, &entry).unwrap();
        let other = RunManifestEntry::new(&args, tmp.path().join("other.log"));
        append_manifest(&args.manifest, &other).unwrap();

        entry.status = RunStatus::Completed;
        entry.run_id = Some("20260101T000000Z-abcdef12".into());
        update_entry(&args.manifest, &entry).unwrap();

        let entries = read_manifest(&args.manifest).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, RunStatus::Completed);
        assert_eq!(entries[0].run_id.as_deref(), Some("20260101T000000Z-abcdef12"));
        assert_eq!(entries[1].status, RunStatus::Queued);
    }

    #[test]
    fn missing_manifest_reads_empty() {
        let tmp = tempdir().unwrap();
        assert!(read_manifest(&tmp.path().join("absent.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn failed_training_is_recorded() {
        let tmp = tempdir().unwrap();
        let args = args(tmp.path());
        fs::write(&args.data, "Gender,Age\n").unwrap();
        assert!(handle_train(&args).is_err());
        let entries = read_manifest(&args.manifest).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, RunStatus::Failed);
        assert!(entries[0].error.is_some());
        let log = fs::read_to_string(&entries[0].log_path).unwrap();
        assert!(log.contains("job failed"));
    }

    #[test]
    fn cli_parses_nested_runs_command() {
        let cli = Cli::try_parse_from(["somnus", "runs", "status", "job-1"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Runs {
                command: RunsCommand::Status { ref job_id, .. }
            } if job_id == "job-1"
        ));
    }
}
