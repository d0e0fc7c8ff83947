//! Leave-one-out evaluation harness for the OPAL segmentation program.
//!
//! For every entry of an image / ground-truth database the program is run
//! once with that entry held out and all others as atlases. Per-label overlap
//! scores and running times are read back from its stdout, accumulated, and
//! summarized against published baseline numbers.

pub mod aggregate;
pub mod compare;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod fold;
mod fsutil;
pub mod interpret;
pub mod sweep;

pub use aggregate::{Aggregator, FoldFailure, LabelStats, RunSummary, BASELINE_TABLE};
pub use compare::{compare_summaries, render_comparison, LabelComparison, SummaryComparison};
pub use config::{
    harness_file_template, load_harness_file, write_config, FailurePolicy, HarnessFile,
    OpalSettings,
};
pub use dataset::{list_paired, Dataset, DatasetEntry};
pub use driver::{run_harness, validate, FoldOutcome, FoldStatus, HarnessOptions, RunOutcome};
pub use error::{HarnessError, Result};
pub use fold::{run_fold, Fold, FoldRun};
pub use interpret::{parse_log, FoldScores};
pub use sweep::{run_one_atlas, SweepOutcome};
