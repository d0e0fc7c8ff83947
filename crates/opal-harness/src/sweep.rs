//! Single-atlas sweep: segment one fixed target with each other entry as the
//! only atlas, to see how much each reference image contributes on its own.

use crate::aggregate::Aggregator;
use crate::config::{write_config, FailurePolicy};
use crate::driver::{settle, validate, FoldOutcome, FoldStatus, HarnessOptions};
use crate::error::{HarnessError, Result};
use crate::fold::invoke_with_log;
use crate::fsutil::ensure_dir;
use std::fs;
use std::path::{Path, PathBuf};

pub const SWEEP_DIR_NAME: &str = "with_one";
pub const RESULT_IMAGE_NAME: &str = "result.png";

#[derive(Debug)]
pub struct SweepOutcome {
    pub target: usize,
    pub output_dir: PathBuf,
    pub runs: Vec<FoldOutcome>,
    pub aggregator: Aggregator,
    pub report: Result<String>,
}

pub fn sweep_output_dir(results_root: &Path, target: usize) -> PathBuf {
    results_root.join(target.to_string()).join(SWEEP_DIR_NAME)
}

/// Drop a `result.png` left by an earlier invocation so it cannot be
/// credited to the next atlas.
fn clear_result_image(output_dir: &Path) -> Result<()> {
    let produced = output_dir.join(RESULT_IMAGE_NAME);
    match fs::remove_file(&produced) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarnessError::io(&produced, e)),
    }
}

/// Move the program's `result.png` to `result_<atlas>.png`.
fn preserve_result_image(output_dir: &Path, atlas: usize) -> Result<()> {
    let produced = output_dir.join(RESULT_IMAGE_NAME);
    if !produced.is_file() {
        tracing::debug!(atlas, "no result image to preserve");
        return Ok(());
    }
    let kept = output_dir.join(format!("result_{}.png", atlas));
    fs::rename(&produced, &kept).map_err(|e| HarnessError::io(&kept, e))?;
    Ok(())
}

/// Runs are not persisted and the results root is not reset.
pub fn run_one_atlas(options: &HarnessOptions, target: usize) -> Result<SweepOutcome> {
    let dataset = validate(options)?;
    let target_entry = dataset
        .get(target)
        .ok_or(HarnessError::TargetOutOfRange {
            target,
            len: dataset.len(),
        })?
        .clone();

    ensure_dir(&options.results_root)?;
    let config_path = options.config_path();
    write_config(&config_path, &options.opal)?;
    let output_dir = sweep_output_dir(&options.results_root, target);
    ensure_dir(&output_dir)?;

    tracing::info!(target, atlases = dataset.len().saturating_sub(1), "running one-atlas sweep");
    let mut aggregator = Aggregator::new();
    let mut runs = Vec::new();
    for atlas in dataset.entries().iter().filter(|e| e.index != target) {
        let args = vec![
            config_path.clone(),
            target_entry.image.clone(),
            target_entry.segmentation.clone(),
            atlas.image.clone(),
            atlas.segmentation.clone(),
            output_dir.clone(),
        ];
        let log_path = output_dir.join(format!("log_{}.txt", atlas.index));
        clear_result_image(&output_dir)?;
        let exit_code = invoke_with_log(&options.executable, &args, &log_path)?;
        preserve_result_image(&output_dir, atlas.index)?;
        let outcome = settle(&mut aggregator, atlas.index, &log_path, exit_code, None)?;
        if let FoldStatus::Failed { reason } = &outcome.status {
            if options.failure_policy == FailurePolicy::Abort {
                return Err(HarnessError::FoldFailed {
                    target: atlas.index,
                    reason: reason.clone(),
                });
            }
        }
        runs.push(outcome);
    }

    let report = aggregator.report();
    Ok(SweepOutcome {
        target,
        output_dir,
        runs,
        aggregator,
        report,
    })
}
