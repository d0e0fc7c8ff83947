//! Side-by-side comparison of two persisted run summaries, e.g. a reference
//! build against a working copy.

use crate::aggregate::{format_significant, mean, Aggregator, COLUMN_WIDTH, FIRST_REPORTED_LABEL};
use crate::error::Result;
use std::collections::BTreeSet;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub struct LabelComparison {
    pub label: u32,
    pub baseline_mean: Option<f64>,
    pub candidate_mean: Option<f64>,
}

impl LabelComparison {
    /// `candidate - baseline`, when the label was scored in both runs.
    pub fn delta(&self) -> Option<f64> {
        Some(self.candidate_mean? - self.baseline_mean?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryComparison {
    pub labels: Vec<LabelComparison>,
    pub baseline_mean_time: Option<f64>,
    pub candidate_mean_time: Option<f64>,
}

fn label_mean(agg: &Aggregator, label: u32) -> Result<Option<f64>> {
    match agg.scores().get(&label) {
        Some(values) => mean(values, &format!("label {}", label)).map(Some),
        None => Ok(None),
    }
}

fn time_mean(agg: &Aggregator) -> Option<f64> {
    agg.mean_running_time().ok()
}

pub fn compare_summaries(baseline: &Aggregator, candidate: &Aggregator) -> Result<SummaryComparison> {
    let labels: BTreeSet<u32> = baseline
        .scores()
        .range(FIRST_REPORTED_LABEL..)
        .chain(candidate.scores().range(FIRST_REPORTED_LABEL..))
        .map(|(label, _)| *label)
        .collect();
    let mut rows = Vec::with_capacity(labels.len());
    for label in labels {
        rows.push(LabelComparison {
            label,
            baseline_mean: label_mean(baseline, label)?,
            candidate_mean: label_mean(candidate, label)?,
        });
    }
    Ok(SummaryComparison {
        labels: rows,
        baseline_mean_time: time_mean(baseline),
        candidate_mean_time: time_mean(candidate),
    })
}

fn cell(value: Option<f64>) -> String {
    value
        .map(|v| format_significant(v, 5))
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_comparison(cmp: &SummaryComparison) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<W$}{:<W$}{:<W$}{:<W$}",
        "Label",
        "Baseline",
        "Candidate",
        "Delta",
        W = COLUMN_WIDTH
    );
    for row in &cmp.labels {
        let _ = writeln!(
            out,
            "{:<W$}{:<W$}{:<W$}{:<W$}",
            row.label,
            cell(row.baseline_mean),
            cell(row.candidate_mean),
            cell(row.delta()),
            W = COLUMN_WIDTH
        );
    }
    let time_delta = match (cmp.baseline_mean_time, cmp.candidate_mean_time) {
        (Some(b), Some(c)) => Some(c - b),
        _ => None,
    };
    let _ = writeln!(
        out,
        "{:<W$}{:<W$}{:<W$}{:<W$}",
        "time",
        cell(cmp.baseline_mean_time),
        cell(cmp.candidate_mean_time),
        cell(time_delta),
        W = COLUMN_WIDTH
    );
    out
}
