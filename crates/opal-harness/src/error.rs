use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("path_not_found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("executable_not_found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("count_mismatch: images count {images} != segmentations count {segmentations}")]
    CountMismatch { images: usize, segmentations: usize },

    #[error("directory_conflict: fold output directory already exists: {}", .0.display())]
    DirectoryConflict(PathBuf),

    #[error("missing_timing_line: log has no 'OPAL running time:' line")]
    MissingTimingLine,

    #[error("malformed_timing: cannot parse running time value '{value}'")]
    MalformedTiming { value: String },

    #[error("empty_sample: no samples for {series}")]
    EmptySample { series: String },

    #[error("target_out_of_range: target index {target} but dataset has {len} entries")]
    TargetOutOfRange { target: usize, len: usize },

    #[error("fold_failed: fold {target}: {reason}")]
    FoldFailed { target: usize, reason: String },

    #[error("io_error: at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json_error: at {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("yaml_error: at {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Short machine-readable code, the prefix of the `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            HarnessError::PathNotFound(_) => "path_not_found",
            HarnessError::ExecutableNotFound(_) => "executable_not_found",
            HarnessError::CountMismatch { .. } => "count_mismatch",
            HarnessError::DirectoryConflict(_) => "directory_conflict",
            HarnessError::MissingTimingLine => "missing_timing_line",
            HarnessError::MalformedTiming { .. } => "malformed_timing",
            HarnessError::EmptySample { .. } => "empty_sample",
            HarnessError::TargetOutOfRange { .. } => "target_out_of_range",
            HarnessError::FoldFailed { .. } => "fold_failed",
            HarnessError::Io { .. } => "io_error",
            HarnessError::Json { .. } => "json_error",
            HarnessError::Yaml { .. } => "yaml_error",
        }
    }
}
