//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "binary"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Binary entrypoint for the RAO pipeline daemon."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use rao_common::{init_tracing, AppConfig, CaseId};
use rao_core::{summarize, CaseStatus, Coordinator, DirectorySource, ProfileSource, StudyCase};
use rao_engine::ProcessEngine;
use rao_metrics::{new_registry, spawn_http_server, MetricsServer, PipelineMetrics};
use rao_model::{build_case, load_parameters, BuildOptions, ConversionTable};
use rao_persistence::{latest_in, StatusJournal};
use rao_profiles::{parse_profile, RecordSet};
use tokio::signal;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "RAO pipeline daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run one study case through the pipeline")]
    Run {
        #[arg(value_parser = parse_case, help = "Case key, e.g. 20250602T1030Z_1D")]
        case: CaseId,
    },
    #[command(about = "Run several independent cases concurrently")]
    Batch {
        #[arg(value_parser = parse_case, help = "Case keys; defaults to every delivery directory")]
        cases: Vec<CaseId>,
    },
    #[command(about = "Parse and build a case without dispatching it")]
    Build {
        #[arg(value_parser = parse_case)]
        case: CaseId,
        #[arg(long, value_name = "FILE", help = "Write the internal case JSON here instead of stdout")]
        out: Option<PathBuf>,
        #[arg(long = "contingency", value_name = "ID", help = "Restrict curative CNECs to these contingencies")]
        contingencies: Vec<String>,
    },
    #[command(about = "Load and validate the parameter document for a time horizon")]
    Params {
        #[arg(long, default_value = "1D")]
        horizon: String,
    },
    #[command(about = "Show journaled case status")]
    Status {
        #[arg(value_parser = parse_case, help = "Show the full history of one case")]
        case: Option<CaseId>,
    },
}

fn parse_case(raw: &str) -> std::result::Result<CaseId, String> {
    raw.parse::<CaseId>().map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/raod.toml"));
    candidates.push(PathBuf::from("configs/raod.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    init_tracing("raod", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    match cli.command {
        Commands::Run { case } => {
            let study = run_cases(&config, vec![case]).await?;
            if study.iter().any(|case| case.status != CaseStatus::Completed) {
                bail!("case did not complete");
            }
        }
        Commands::Batch { cases } => {
            let cases = if cases.is_empty() {
                delivered_cases(&config.storage.input_root)?
            } else {
                cases
            };
            if cases.is_empty() {
                warn!(input_root = %config.storage.input_root.display(), "no cases delivered");
                return Ok(());
            }
            run_cases(&config, cases).await?;
        }
        Commands::Build {
            case,
            out,
            contingencies,
        } => build_only(&config, &case, out.as_deref(), contingencies).await?,
        Commands::Params { horizon } => {
            let parameters = load_parameters(&config.parameters, &horizon)?;
            let report = serde_json::json!({
                "horizon": horizon,
                "digest": parameters.digest(),
                "summary": parameters.summary(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status { case } => show_status(&config.storage.journal_path, case.as_ref())?,
    }
    Ok(())
}

async fn run_cases(config: &AppConfig, cases: Vec<CaseId>) -> Result<Vec<StudyCase>> {
    let registry = new_registry();
    let metrics = PipelineMetrics::new(registry.clone())?;
    let metrics_server: Option<MetricsServer> = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        None
    };

    let engine = Arc::new(ProcessEngine::new(config.engine.clone()));
    let coordinator = Arc::new(Coordinator::from_config(config, engine, Some(metrics))?);

    let started = Instant::now();
    let batch = {
        let coordinator = Arc::clone(&coordinator);
        let cases = cases.clone();
        tokio::spawn(async move { coordinator.run_batch(cases).await })
    };
    tokio::pin!(batch);
    let outcomes = tokio::select! {
        joined = &mut batch => joined?,
        _ = signal::ctrl_c() => {
            warn!("ctrl-c received; cancelling running cases");
            for case in &cases {
                if let Err(err) = coordinator.cancel(case) {
                    info!(case = %case, error = %err, "not cancelled");
                }
            }
            batch.await?
        }
    };
    let late = coordinator.shutdown().await;
    if !late.is_empty() {
        info!(runs = late.len(), "late engine runs settled");
    }

    let summary = summarize(&outcomes);
    info!(
        cases = outcomes.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        summary = ?summary,
        "batch finished"
    );
    let mut studies = Vec::with_capacity(outcomes.len());
    for (case, outcome) in outcomes {
        match outcome {
            Ok(study) => {
                println!("{}", serde_json::to_string(&study)?);
                studies.push(study);
            }
            Err(err) => warn!(case = %case, error = %err, "case rejected"),
        }
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(studies)
}

/// Every `<input_root>/<case-key>` directory.
fn delivered_cases(root: &Path) -> Result<Vec<CaseId>> {
    let mut cases = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to list {}", root.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        match name.parse::<CaseId>() {
            Ok(case) => cases.push(case),
            Err(err) => warn!(directory = %name, error = %err, "skipping directory"),
        }
    }
    cases.sort();
    Ok(cases)
}

async fn build_only(
    config: &AppConfig,
    case: &CaseId,
    out: Option<&Path>,
    contingencies: Vec<String>,
) -> Result<()> {
    let source = DirectorySource::new(&config.storage.input_root);
    let documents = source.fetch(case).await?;
    let mut records = RecordSet::default();
    for document in &documents {
        let parsed = parse_profile(document, case.timestamp())?;
        records.extend(parsed.records);
    }
    let parameters = load_parameters(&config.parameters, case.scenario())?;
    let options = BuildOptions {
        contingency_filter: (!contingencies.is_empty())
            .then(|| contingencies.into_iter().collect::<BTreeSet<_>>()),
    };
    let table = ConversionTable::from_records(&records);
    let built = build_case(case, &records, &table, parameters.applied(), &options)?;
    let bytes = built.case.to_json_bytes()?;
    match out {
        Some(path) => {
            std::fs::write(path, &bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), digest = %built.digest, "internal case written");
        }
        None => println!("{}", String::from_utf8(bytes)?),
    }
    Ok(())
}

fn show_status(journal: &Path, case: Option<&CaseId>) -> Result<()> {
    if !journal.exists() {
        return Err(anyhow!("no status journal at {}", journal.display()));
    }
    match case {
        Some(case) => {
            let history = StatusJournal::open(journal)?.history(&case.key())?;
            if history.is_empty() {
                bail!("case {case} has no journaled transitions");
            }
            for record in history {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        None => {
            for (case, record) in latest_in(journal)? {
                println!(
                    "{case}\t{}\t{}\t{}",
                    record.to,
                    record.at.to_rfc3339(),
                    record.detail.unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
