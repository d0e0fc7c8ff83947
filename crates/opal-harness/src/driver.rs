use crate::aggregate::Aggregator;
use crate::config::{write_config, FailurePolicy, HarnessFile, OpalSettings};
use crate::dataset::{list_paired, Dataset, DEFAULT_EXTENSION};
use crate::error::{HarnessError, Result};
use crate::fold::{run_fold, FoldRun};
use crate::fsutil::{atomic_write_bytes, reset_dir};
use crate::interpret::{parse_log_file, FoldScores};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.txt";
pub const FOLD_ERROR_FILE_NAME: &str = "fold_error.txt";

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessOptions {
    pub executable: PathBuf,
    pub images_dir: PathBuf,
    pub segmentations_dir: PathBuf,
    pub results_root: PathBuf,
    pub summary_path: PathBuf,
    pub extension: String,
    pub failure_policy: FailurePolicy,
    pub opal: OpalSettings,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("../build/main/OPAL"),
            images_dir: PathBuf::from("../test/test_data/Images"),
            segmentations_dir: PathBuf::from("../test/test_data/Segmentations"),
            results_root: PathBuf::from("results"),
            summary_path: PathBuf::from("results.json"),
            extension: DEFAULT_EXTENSION.to_string(),
            failure_policy: FailurePolicy::default(),
            opal: OpalSettings::default(),
        }
    }
}

impl HarnessOptions {
    pub fn from_file(file: HarnessFile) -> Self {
        let defaults = Self::default();
        Self {
            executable: file.executable.unwrap_or(defaults.executable),
            images_dir: file.images_dir.unwrap_or(defaults.images_dir),
            segmentations_dir: file.segmentations_dir.unwrap_or(defaults.segmentations_dir),
            results_root: file.results_root.unwrap_or(defaults.results_root),
            summary_path: file.summary_path.unwrap_or(defaults.summary_path),
            extension: file.extension.unwrap_or(defaults.extension),
            failure_policy: file.failure_policy.unwrap_or(defaults.failure_policy),
            opal: file.opal,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.results_root.join(CONFIG_FILE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FoldStatus {
    Succeeded { labels: usize, elapsed_seconds: f64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldOutcome {
    pub index: usize,
    pub log_path: Option<PathBuf>,
    pub exit_code: Option<i32>,
    pub status: FoldStatus,
}

impl FoldOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, FoldStatus::Succeeded { .. })
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub dataset_len: usize,
    pub folds: Vec<FoldOutcome>,
    pub aggregator: Aggregator,
    pub summary_path: PathBuf,
    /// Statistics can fail (empty samples) even though the summary was written.
    pub report: Result<String>,
}

impl RunOutcome {
    pub fn failed_folds(&self) -> usize {
        self.folds.iter().filter(|f| !f.is_success()).count()
    }
}

/// Precondition checks shared by every entry point. Touches nothing on disk.
pub fn validate(options: &HarnessOptions) -> Result<Dataset> {
    if !options.executable.exists() {
        return Err(HarnessError::ExecutableNotFound(options.executable.clone()));
    }
    list_paired(
        &options.images_dir,
        &options.segmentations_dir,
        &options.extension,
    )
}

pub(crate) fn exit_failure_reason(exit_code: Option<i32>) -> Option<String> {
    match exit_code {
        Some(0) => None,
        Some(code) => Some(format!("exit status {}", code)),
        None => Some("terminated by signal".to_string()),
    }
}

/// Turn a finished invocation into scores, or the reason it yields none.
pub(crate) fn interpret_run(
    log_path: &Path,
    exit_code: Option<i32>,
) -> std::result::Result<FoldScores, String> {
    if let Some(reason) = exit_failure_reason(exit_code) {
        return Err(reason);
    }
    parse_log_file(log_path).map_err(|e| e.to_string())
}

pub(crate) fn settle(
    aggregator: &mut Aggregator,
    index: usize,
    log_path: &Path,
    exit_code: Option<i32>,
    error_file: Option<&Path>,
) -> Result<FoldOutcome> {
    let status = match interpret_run(log_path, exit_code) {
        Ok(scores) => {
            aggregator.accumulate(&scores);
            FoldStatus::Succeeded {
                labels: scores.scores.len(),
                elapsed_seconds: scores.elapsed_seconds,
            }
        }
        Err(reason) => {
            tracing::warn!(index, reason = %reason, log = %log_path.display(), "fold failed");
            if let Some(error_file) = error_file {
                atomic_write_bytes(error_file, format!("{}\n", reason).as_bytes())?;
            }
            aggregator.record_failure(index, reason.clone());
            FoldStatus::Failed { reason }
        }
    };
    Ok(FoldOutcome {
        index,
        log_path: Some(log_path.to_path_buf()),
        exit_code,
        status,
    })
}

fn fold_outcome(
    aggregator: &mut Aggregator,
    dataset: &Dataset,
    options: &HarnessOptions,
    target: usize,
) -> Result<FoldOutcome> {
    let run = match run_fold(
        &options.executable,
        &options.config_path(),
        dataset,
        target,
        &options.results_root,
    ) {
        Ok(run) => run,
        Err(HarnessError::DirectoryConflict(dir)) => {
            let reason = HarnessError::DirectoryConflict(dir).to_string();
            tracing::warn!(index = target, reason = %reason, "fold failed");
            aggregator.record_failure(target, reason.clone());
            return Ok(FoldOutcome {
                index: target,
                log_path: None,
                exit_code: None,
                status: FoldStatus::Failed { reason },
            });
        }
        Err(e) => return Err(e),
    };
    let FoldRun {
        log_path,
        exit_code,
        ..
    } = run;
    let error_file = log_path.with_file_name(FOLD_ERROR_FILE_NAME);
    settle(aggregator, target, &log_path, exit_code, Some(&error_file))
}

/// Leave-one-out run over the whole database.
///
/// Validate, reset the results root, write the program config, run every
/// fold in ascending order, persist the summary, then build the report.
pub fn run_harness(options: &HarnessOptions) -> Result<RunOutcome> {
    let dataset = validate(options)?;
    tracing::info!(
        entries = dataset.len(),
        images = %options.images_dir.display(),
        segmentations = %options.segmentations_dir.display(),
        "dataset validated"
    );

    reset_dir(&options.results_root)?;
    write_config(&options.config_path(), &options.opal)?;

    let mut aggregator = Aggregator::new();
    let mut folds = Vec::with_capacity(dataset.len());
    for entry in dataset.entries() {
        tracing::info!(index = entry.index, total = dataset.len(), "running fold");
        let outcome = fold_outcome(&mut aggregator, &dataset, options, entry.index)?;
        if let FoldStatus::Failed { reason } = &outcome.status {
            if options.failure_policy == FailurePolicy::Abort {
                return Err(HarnessError::FoldFailed {
                    target: entry.index,
                    reason: reason.clone(),
                });
            }
        } else {
            tracing::info!(index = entry.index, "fold done");
        }
        folds.push(outcome);
    }

    aggregator.persist(&options.summary_path)?;
    tracing::info!(path = %options.summary_path.display(), "summary written");

    let report = aggregator.report();
    Ok(RunOutcome {
        dataset_len: dataset.len(),
        folds,
        aggregator,
        summary_path: options.summary_path.clone(),
        report,
    })
}

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use super::*;
    use crate::dataset::write_fixture_dataset;
    use crate::fold::write_stub_program;

    /// Stub that scores label `2` by fold position and label `1` always; the
    /// fold whose target image name contains `fail_marker` exits non-zero.
    pub(crate) fn stub_options(root: &Path, count: usize, fail_marker: &str) -> HarnessOptions {
        let (images, segs) = write_fixture_dataset(root, count);
        let body = format!(
            r#"case "$2" in
  *{fail}*) echo "crashed"; exit 2 ;;
esac
n=$(( ($# - 4) / 2 ))
printf '1\t0.99\n'
printf '2\t0.%s\n' "$n"
printf '7\t0.5\n'
echo "OPAL running time: 1$n.0""#,
            fail = fail_marker
        );
        let program = write_stub_program(root, &body);
        HarnessOptions {
            executable: program,
            images_dir: images,
            segmentations_dir: segs,
            results_root: root.join("results"),
            summary_path: root.join("results.json"),
            ..HarnessOptions::default()
        }
    }
}
