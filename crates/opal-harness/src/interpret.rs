//! Interpretation of the segmentation program's stdout.
//!
//! Two line shapes carry meaning: `<label>\t<score>` and a line containing
//! `OPAL running time: <seconds>`. Everything else is ignored.

use crate::error::{HarnessError, Result};
use std::path::Path;

pub const TIME_MARKER: &str = "OPAL running time:";

#[derive(Debug, Clone, PartialEq)]
pub enum LogLine<'a> {
    Score { label: u32, score: f64 },
    Time(&'a str),
    Other,
}

/// Scores in log order plus the elapsed seconds of one fold.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldScores {
    pub scores: Vec<(u32, f64)>,
    pub elapsed_seconds: f64,
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// A score starts with a digit; the rest is whatever a float literal allows
/// (`0.91`, `1.`, `1e-05`, `2.5e-03`).
fn parse_score(s: &str) -> Option<f64> {
    if !s.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    s.parse::<f64>().ok()
}

pub fn classify_line(line: &str) -> LogLine<'_> {
    let trimmed = line.trim();
    let mut fields = trimmed.split('\t');
    if let (Some(label), Some(score), None) = (fields.next(), fields.next(), fields.next()) {
        if is_digits(label) {
            if let (Ok(label), Some(score)) = (label.parse::<u32>(), parse_score(score)) {
                return LogLine::Score { label, score };
            }
        }
    }
    if let Some(pos) = trimmed.find(TIME_MARKER) {
        return LogLine::Time(trimmed[pos + TIME_MARKER.len()..].trim());
    }
    LogLine::Other
}

pub fn parse_log(text: &str) -> Result<FoldScores> {
    let mut scores = Vec::new();
    let mut time_value: Option<&str> = None;
    for line in text.lines() {
        match classify_line(line) {
            LogLine::Score { label, score } => scores.push((label, score)),
            LogLine::Time(value) => time_value = Some(value),
            LogLine::Other => {}
        }
    }
    let raw = time_value.ok_or(HarnessError::MissingTimingLine)?;
    let elapsed_seconds = raw
        .parse::<f64>()
        .map_err(|_| HarnessError::MalformedTiming {
            value: raw.to_string(),
        })?;
    Ok(FoldScores {
        scores,
        elapsed_seconds,
    })
}

pub fn parse_log_file(path: &Path) -> Result<FoldScores> {
    let bytes = std::fs::read(path).map_err(|e| HarnessError::io(path, e))?;
    parse_log(&String::from_utf8_lossy(&bytes))
}
