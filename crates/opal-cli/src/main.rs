use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "opal-eval",
    version,
    about = "Leave-one-out evaluation harness for the OPAL segmentation program"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FailurePolicyArg {
    #[value(name = "continue")]
    Continue,
    #[value(name = "abort")]
    Abort,
}

impl From<FailurePolicyArg> for opal_harness::FailurePolicy {
    fn from(value: FailurePolicyArg) -> Self {
        match value {
            FailurePolicyArg::Continue => opal_harness::FailurePolicy::Continue,
            FailurePolicyArg::Abort => opal_harness::FailurePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct HarnessArgs {
    /// YAML harness configuration; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Path to the OPAL executable.
    #[arg(long)]
    executable: Option<PathBuf>,
    #[arg(long)]
    images: Option<PathBuf>,
    #[arg(long)]
    segmentations: Option<PathBuf>,
    /// Directory holding config.txt and one sub-directory per fold.
    #[arg(long)]
    results_root: Option<PathBuf>,
    #[arg(long)]
    summary: Option<PathBuf>,
    /// Substring a file name must contain to belong to the database.
    #[arg(long)]
    extension: Option<String>,
    #[arg(long, value_enum)]
    failure_policy: Option<FailurePolicyArg>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every leave-one-out fold and report per-label statistics.
    Run {
        #[command(flatten)]
        harness: HarnessArgs,
        #[arg(long)]
        json: bool,
    },
    /// Segment one target with each other entry as its only atlas.
    OneAtlas {
        #[command(flatten)]
        harness: HarnessArgs,
        #[arg(long, default_value_t = 2)]
        target: usize,
        #[arg(long)]
        json: bool,
    },
    /// Recompute the report from a persisted summary.
    Report {
        #[arg(default_value = "results.json")]
        summary: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Compare per-label means of two persisted summaries.
    Compare {
        baseline: PathBuf,
        candidate: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write a harness configuration template.
    InitConfig {
        #[arg(long, default_value = "harness.yaml")]
        out: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            if payload_failed(&payload) {
                std::process::exit(1);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(
                    error_code(&err),
                    format!("{:#}", err),
                    json!({}),
                ));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_options(args: HarnessArgs) -> Result<opal_harness::HarnessOptions> {
    let file = match &args.config {
        Some(path) => opal_harness::load_harness_file(path)
            .with_context(|| format!("failed to load harness config {}", path.display()))?,
        None => opal_harness::HarnessFile::default(),
    };
    let mut options = opal_harness::HarnessOptions::from_file(file);
    if let Some(v) = args.executable {
        options.executable = v;
    }
    if let Some(v) = args.images {
        options.images_dir = v;
    }
    if let Some(v) = args.segmentations {
        options.segmentations_dir = v;
    }
    if let Some(v) = args.results_root {
        options.results_root = v;
    }
    if let Some(v) = args.summary {
        options.summary_path = v;
    }
    if let Some(v) = args.extension {
        options.extension = v;
    }
    if let Some(v) = args.failure_policy {
        options.failure_policy = v.into();
    }
    Ok(options)
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run { harness, json } => {
            let options = resolve_options(harness)?;
            let outcome = opal_harness::run_harness(&options)?;
            if json {
                return Ok(Some(json!({
                    "ok": outcome.report.is_ok(),
                    "command": "run",
                    "run": run_outcome_to_json(&options, &outcome),
                })));
            }
            print_run_summary(&options, &outcome);
            let report = outcome.report.with_context(|| {
                format!(
                    "cannot compute statistics (raw results kept in {})",
                    outcome.summary_path.display()
                )
            })?;
            print!("{}", report);
        }
        Commands::OneAtlas {
            harness,
            target,
            json,
        } => {
            let options = resolve_options(harness)?;
            let outcome = opal_harness::run_one_atlas(&options, target)?;
            if json {
                return Ok(Some(json!({
                    "ok": outcome.report.is_ok(),
                    "command": "one-atlas",
                    "target": outcome.target,
                    "output_dir": outcome.output_dir.display().to_string(),
                    "runs": outcome.runs.iter().map(fold_outcome_to_json).collect::<Vec<_>>(),
                    "report": report_to_json(&outcome.report),
                })));
            }
            println!("target: {}", outcome.target);
            println!("output_dir: {}", outcome.output_dir.display());
            let report = outcome.report.context("cannot compute statistics")?;
            print!("{}", report);
        }
        Commands::Report { summary, json } => {
            let aggregator = load_summary(&summary)?;
            if json {
                let rows = aggregator.summarize()?;
                return Ok(Some(json!({
                    "ok": true,
                    "command": "report",
                    "summary": summary.display().to_string(),
                    "labels": rows.iter().map(label_stats_to_json).collect::<Vec<_>>(),
                    "mean_running_time": aggregator.mean_running_time()?,
                })));
            }
            print!("{}", aggregator.report()?);
        }
        Commands::Compare {
            baseline,
            candidate,
            json,
        } => {
            let base = load_summary(&baseline)?;
            let cand = load_summary(&candidate)?;
            let cmp = opal_harness::compare_summaries(&base, &cand)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "compare",
                    "baseline": baseline.display().to_string(),
                    "candidate": candidate.display().to_string(),
                    "labels": cmp.labels.iter().map(label_comparison_to_json).collect::<Vec<_>>(),
                    "baseline_mean_time": cmp.baseline_mean_time,
                    "candidate_mean_time": cmp.candidate_mean_time,
                })));
            }
            print!("{}", opal_harness::render_comparison(&cmp));
        }
        Commands::InitConfig { out, force } => {
            if out.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    out.display()
                );
            }
            if let Some(parent) = out.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(&out, opal_harness::harness_file_template())
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("wrote: {}", out.display());
            println!("next: opal-eval run --config {}", out.display());
        }
    }
    Ok(None)
}

fn load_summary(path: &Path) -> Result<opal_harness::Aggregator> {
    opal_harness::Aggregator::load(path)
        .with_context(|| format!("failed to load summary {}", path.display()))
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

/// Envelopes reporting `"ok": false` must end the process with a failure.
fn payload_failed(payload: &Value) -> bool {
    payload.get("ok") == Some(&Value::Bool(false))
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<opal_harness::HarnessError>())
        .map(|e| e.code())
        .unwrap_or("command_failed")
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::OneAtlas { json, .. }
        | Commands::Report { json, .. }
        | Commands::Compare { json, .. } => *json,
        Commands::InitConfig { .. } => false,
    }
}

fn report_to_json(report: &opal_harness::Result<String>) -> Value {
    match report {
        Ok(text) => json!({ "ok": true, "text": text }),
        Err(e) => json!({ "ok": false, "code": e.code(), "message": e.to_string() }),
    }
}

fn fold_outcome_to_json(fold: &opal_harness::FoldOutcome) -> Value {
    let (status, reason, labels, elapsed) = match &fold.status {
        opal_harness::FoldStatus::Succeeded {
            labels,
            elapsed_seconds,
        } => ("succeeded", None, Some(*labels), Some(*elapsed_seconds)),
        opal_harness::FoldStatus::Failed { reason } => {
            ("failed", Some(reason.clone()), None, None)
        }
    };
    json!({
        "index": fold.index,
        "status": status,
        "reason": reason,
        "exit_code": fold.exit_code,
        "labels": labels,
        "elapsed_seconds": elapsed,
        "log": fold.log_path.as_ref().map(|p| p.display().to_string()),
    })
}

fn label_stats_to_json(row: &opal_harness::LabelStats) -> Value {
    json!({
        "label": row.label,
        "min": row.min,
        "max": row.max,
        "mean": row.mean,
        "median": row.median,
        "vs_key_points": row.vs_key_points,
        "vs_syn": row.vs_syn,
        "has_baseline": row.has_baseline,
    })
}

fn label_comparison_to_json(row: &opal_harness::LabelComparison) -> Value {
    json!({
        "label": row.label,
        "baseline_mean": row.baseline_mean,
        "candidate_mean": row.candidate_mean,
        "delta": row.delta(),
    })
}

fn run_outcome_to_json(
    options: &opal_harness::HarnessOptions,
    outcome: &opal_harness::RunOutcome,
) -> Value {
    let labels = outcome
        .aggregator
        .summarize()
        .map(|rows| rows.iter().map(label_stats_to_json).collect::<Vec<_>>())
        .unwrap_or_default();
    json!({
        "executable": options.executable.display().to_string(),
        "results_root": options.results_root.display().to_string(),
        "summary": outcome.summary_path.display().to_string(),
        "failure_policy": options.failure_policy.as_str(),
        "entries": outcome.dataset_len,
        "failed_folds": outcome.failed_folds(),
        "folds": outcome.folds.iter().map(fold_outcome_to_json).collect::<Vec<_>>(),
        "labels": labels,
        "mean_running_time": outcome.aggregator.mean_running_time().ok(),
        "report": report_to_json(&outcome.report),
    })
}

fn print_run_summary(
    options: &opal_harness::HarnessOptions,
    outcome: &opal_harness::RunOutcome,
) {
    println!("executable: {}", options.executable.display());
    println!("results_root: {}", options.results_root.display());
    println!("summary: {}", outcome.summary_path.display());
    println!("failure_policy: {}", options.failure_policy.as_str());
    println!("entries: {}", outcome.dataset_len);
    println!("failed_folds: {}", outcome.failed_folds());
    println!();
}
