//! Accumulation of per-fold results and the summary statistics reported at
//! the end of a run.

use crate::error::{HarnessError, Result};
use crate::fsutil::atomic_write_bytes;
use crate::interpret::FoldScores;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

pub const COLUMN_WIDTH: usize = 14;

/// Labels below this value are background/reserved and never reported.
pub const FIRST_REPORTED_LABEL: u32 = 2;

/// Published mean overlap of two competing methods, (KeyPoints, SyN), per label.
pub const BASELINE_TABLE: &[(u32, f64, f64)] = &[
    (2, 0.93, 0.94),
    (3, 0.74, 0.72),
    (4, 0.84, 0.73),
    (5, 0.03, 0.0),
    (7, 0.67, 0.70),
    (8, 0.63, 0.61),
    (10, 0.83, 0.83),
    (14, 0.09, 0.0),
    (15, 0.0, 0.20),
    (16, 0.87, 0.89),
    (17, 0.60, 0.62),
    (24, 0.27, 0.10),
    (41, 0.73, 0.78),
    (42, 0.75, 0.73),
    (43, 0.83, 0.78),
    (46, 0.68, 0.59),
    (47, 0.63, 0.60),
    (49, 0.84, 0.81),
    (53, 0.58, 0.50),
];

pub fn baseline_for(label: u32) -> Option<(f64, f64)> {
    BASELINE_TABLE
        .iter()
        .find(|(l, _, _)| *l == label)
        .map(|(_, key_points, syn)| (*key_points, *syn))
}

fn non_empty<'a>(values: &'a [f64], series: &str) -> Result<&'a [f64]> {
    if values.is_empty() {
        return Err(HarnessError::EmptySample {
            series: series.to_string(),
        });
    }
    Ok(values)
}

pub fn mean(values: &[f64], series: &str) -> Result<f64> {
    let values = non_empty(values, series)?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Middle value, or the mean of the two middle values for even lengths.
pub fn median(values: &[f64], series: &str) -> Result<f64> {
    let values = non_empty(values, series)?;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Ok(sorted[mid])
    } else {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

pub fn min(values: &[f64], series: &str) -> Result<f64> {
    let values = non_empty(values, series)?;
    Ok(values.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn max(values: &[f64], series: &str) -> Result<f64> {
    let values = non_empty(values, series)?;
    Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelStats {
    pub label: u32,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// `mean - baseline`; 0.0 when the label has no baseline entry.
    pub vs_key_points: f64,
    pub vs_syn: f64,
    pub has_baseline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldFailure {
    /// Held-out index for leave-one-out folds, atlas index for one-atlas runs.
    pub index: usize,
    pub reason: String,
}

/// Raw accumulated data in its persisted shape: `{"scores": .., "times": ..}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scores: BTreeMap<u32, Vec<f64>>,
    pub times: Vec<f64>,
}

/// Owns every score and time collected during a run. `accumulate` is the
/// only way scores and times grow.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    summary: RunSummary,
    failures: Vec<FoldFailure>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_summary(summary: RunSummary) -> Self {
        Self {
            summary,
            failures: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| HarnessError::io(path, e))?;
        let summary: RunSummary =
            serde_json::from_slice(&bytes).map_err(|source| HarnessError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_summary(summary))
    }

    pub fn accumulate(&mut self, fold: &FoldScores) {
        self.summary.times.push(fold.elapsed_seconds);
        for (label, score) in &fold.scores {
            self.summary.scores.entry(*label).or_default().push(*score);
        }
    }

    pub fn record_failure(&mut self, index: usize, reason: impl Into<String>) {
        self.failures.push(FoldFailure {
            index,
            reason: reason.into(),
        });
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn scores(&self) -> &BTreeMap<u32, Vec<f64>> {
        &self.summary.scores
    }

    pub fn times(&self) -> &[f64] {
        &self.summary.times
    }

    pub fn failures(&self) -> &[FoldFailure] {
        &self.failures
    }

    fn render_json(&self) -> serde_json::Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.summary.serialize(&mut ser)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Write the raw scores and times. Independent of whether statistics can
    /// be computed.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let bytes = self.render_json().map_err(|source| HarnessError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        atomic_write_bytes(path, &bytes)
    }

    pub fn summarize(&self) -> Result<Vec<LabelStats>> {
        let mut rows = Vec::new();
        for (label, values) in self.summary.scores.range(FIRST_REPORTED_LABEL..) {
            let series = format!("label {}", label);
            let mean = mean(values, &series)?;
            let (vs_key_points, vs_syn, has_baseline) = match baseline_for(*label) {
                Some((key_points, syn)) => (mean - key_points, mean - syn, true),
                None => (0.0, 0.0, false),
            };
            rows.push(LabelStats {
                label: *label,
                min: min(values, &series)?,
                max: max(values, &series)?,
                mean,
                median: median(values, &series)?,
                vs_key_points,
                vs_syn,
                has_baseline,
            });
        }
        Ok(rows)
    }

    pub fn mean_running_time(&self) -> Result<f64> {
        mean(&self.summary.times, "running time")
    }

    pub fn report(&self) -> Result<String> {
        let rows = self.summarize()?;
        let mean_time = self.mean_running_time()?;

        let mut out = String::new();
        if !self.failures.is_empty() {
            let _ = writeln!(out, "failed folds: {}", self.failures.len());
            for failure in &self.failures {
                let _ = writeln!(out, "  fold {}: {}", failure.index, failure.reason);
            }
        }
        let _ = writeln!(
            out,
            "{:<W$}{:<W$}{:<W$}{:<W$}{:<W$}{:<W$}{:<W$}",
            "Label",
            "Min",
            "Max",
            "Mean",
            "Median",
            "vs. KeyPoints",
            "vs. SyN",
            W = COLUMN_WIDTH
        );
        for row in &rows {
            let _ = writeln!(
                out,
                "{:<W$}{:<W$}{:<W$}{:<W$}{:<W$}{:<W$}{:<W$}",
                row.label,
                format_significant(row.min, 5),
                format_significant(row.max, 5),
                format_significant(row.mean, 5),
                format_significant(row.median, 5),
                format_significant(row.vs_key_points, 5),
                format_significant(row.vs_syn, 5),
                W = COLUMN_WIDTH
            );
        }
        let _ = writeln!(out, "{:?}", mean_time);
        Ok(out)
    }
}

/// Render `value` with `digits` significant digits, dropping trailing zeros
/// but keeping at least one fractional digit in fixed notation.
/// Exponent notation is used below 1e-4 and from 10^digits upwards.
pub fn format_significant(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let digits = digits.max(1);
    let sci = format!("{:.*e}", digits - 1, value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if exp < -4 || exp >= digits as i32 {
        let mantissa = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exp.abs());
    }
    let decimals = (digits as i32 - 1 - exp).max(0) as usize;
    let fixed = format!("{:.*}", decimals, value);
    let trimmed = trim_fraction(&fixed);
    if trimmed.contains('.') {
        trimmed
    } else {
        format!("{}.0", trimmed)
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::temp_root;

    fn fold(scores: &[(u32, f64)], elapsed: f64) -> FoldScores {
        FoldScores {
            scores: scores.to_vec(),
            elapsed_seconds: elapsed,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn accumulate_appends_per_label_and_time() {
        let mut agg = Aggregator::new();
        agg.accumulate(&fold(&[(2, 0.9)], 10.0));
        agg.accumulate(&fold(&[(2, 0.8), (3, 0.7)], 20.0));

        assert_eq!(agg.times(), &[10.0, 20.0]);
        assert_eq!(agg.scores().get(&2), Some(&vec![0.9, 0.8]));
        assert_eq!(agg.scores().get(&3), Some(&vec![0.7]));

        let rows = agg.summarize().expect("stats");
        let two = &rows[0];
        assert_eq!(two.label, 2);
        assert!(close(two.mean, 0.85), "mean {}", two.mean);
        assert!(close(two.median, 0.85), "median {}", two.median);
        assert_eq!(two.min, 0.8);
        assert_eq!(two.max, 0.9);
        assert!(close(two.vs_key_points, 0.85 - 0.93));
        assert!(close(two.vs_syn, 0.85 - 0.94));
        assert!(close(agg.mean_running_time().expect("time"), 15.0));
    }

    #[test]
    fn reserved_labels_never_reported() {
        let mut agg = Aggregator::new();
        agg.accumulate(&fold(&[(0, 0.99), (1, 0.98), (2, 0.5), (12, 0.4)], 1.0));
        let rows = agg.summarize().expect("stats");
        let labels: Vec<u32> = rows.iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![2, 12]);

        let report = agg.report().expect("report");
        for line in report.lines().skip(1) {
            let first = line.split_whitespace().next().unwrap_or("");
            assert_ne!(first, "0", "label 0 leaked: {}", line);
            assert_ne!(first, "1", "label 1 leaked: {}", line);
        }
        assert_eq!(agg.scores().get(&0), Some(&vec![0.99]));
    }

    #[test]
    fn label_without_baseline_gets_zero_deltas() {
        let mut agg = Aggregator::new();
        agg.accumulate(&fold(&[(12, 0.4)], 1.0));
        let rows = agg.summarize().expect("stats");
        assert!(!rows[0].has_baseline);
        assert_eq!(rows[0].vs_key_points, 0.0);
        assert_eq!(rows[0].vs_syn, 0.0);
    }

    #[test]
    fn report_layout_matches_columns() {
        let mut agg = Aggregator::new();
        agg.accumulate(&fold(&[(2, 0.9)], 10.0));
        agg.accumulate(&fold(&[(2, 0.8), (3, 0.7)], 20.0));
        let report = agg.report().expect("report");
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "Label         Min           Max           Mean          Median        vs. KeyPoints vs. SyN       "
        );
        assert!(lines[1].starts_with("2             0.8           0.9           0.85          0.85          -0.08         -0.09"));
        assert!(lines[2].starts_with("3             0.7           0.7           0.7           0.7           -0.04         -0.02"));
        assert_eq!(lines[3], "15.0");
    }

    #[test]
    fn report_lists_failed_folds() {
        let mut agg = Aggregator::new();
        agg.accumulate(&fold(&[(2, 0.9)], 10.0));
        agg.record_failure(1, "exit status 1");
        let report = agg.report().expect("report");
        assert!(report.starts_with("failed folds: 1\n  fold 1: exit status 1\n"));
        assert!(report.ends_with("10.0\n"));
    }

    #[test]
    fn empty_series_fails_report_but_not_persist() {
        let mut summary = RunSummary::default();
        summary.scores.insert(4, Vec::new());
        summary.times.push(3.0);
        let agg = Aggregator::from_summary(summary);

        let err = agg.report().expect_err("empty label must fail");
        match err {
            HarnessError::EmptySample { series } => assert_eq!(series, "label 4"),
            other => panic!("unexpected error: {}", other),
        }

        let root = temp_root("agg_empty");
        agg.persist(&root.join("results.json")).expect("persist still works");
        let _ = std::fs::remove_dir_all(root);

        let err = Aggregator::new().mean_running_time().expect_err("no times");
        assert!(matches!(err, HarnessError::EmptySample { .. }));
    }

    #[test]
    fn persist_is_sorted_indented_and_idempotent() {
        let mut agg = Aggregator::new();
        agg.accumulate(&fold(&[(10, 0.5), (2, 0.25)], 12.0));
        let root = temp_root("agg_persist");
        let path = root.join("results.json");
        agg.persist(&path).expect("first persist");
        let first = std::fs::read(&path).expect("read");
        agg.persist(&path).expect("second persist");
        let second = std::fs::read(&path).expect("read");
        assert_eq!(first, second);

        let text = String::from_utf8(first).expect("utf8");
        assert_eq!(
            text,
            "{\n    \"scores\": {\n        \"2\": [\n            0.25\n        ],\n        \"10\": [\n            0.5\n        ]\n    },\n    \"times\": [\n        12.0\n    ]\n}\n"
        );

        let loaded = Aggregator::load(&path).expect("load");
        assert_eq!(loaded.summary(), agg.summary());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn median_handles_odd_and_even_lengths() {
        assert_eq!(median(&[3.0, 1.0, 2.0], "x").expect("odd"), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0], "x").expect("even"), 2.5);
    }

    #[test]
    fn significant_digit_rendering() {
        assert_eq!(format_significant(0.85, 5), "0.85");
        assert_eq!(format_significant(0.123456, 5), "0.12346");
        assert_eq!(format_significant(-0.03, 5), "-0.03");
        assert_eq!(format_significant(0.0, 5), "0.0");
        assert_eq!(format_significant(1.0, 5), "1.0");
        assert_eq!(format_significant(9.999999, 5), "10.0");
        assert_eq!(format_significant(12345.0, 5), "12345.0");
        assert_eq!(format_significant(123456.0, 5), "1.2346e+05");
        assert_eq!(format_significant(0.00001, 5), "1e-05");
        assert_eq!(format_significant(0.0001234, 5), "0.0001234");
    }
}
