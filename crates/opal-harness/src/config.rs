//! Parameters handed to the segmentation program and the harness's own
//! YAML configuration file.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Algorithm parameters written to the program's `key=value` config file.
///
/// The harness never interprets these; they are passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct OpalSettings {
    pub init_window_radius: u32,
    pub patch_radius: u32,
    pub intermediate_saving: bool,
    pub intermediate_saving_path: String,
    pub max_iterations: u32,
}

impl Default for OpalSettings {
    fn default() -> Self {
        Self {
            init_window_radius: 15,
            patch_radius: 6,
            intermediate_saving: false,
            intermediate_saving_path: String::new(),
            max_iterations: 30,
        }
    }
}

impl OpalSettings {
    /// Parameter name/value pairs in the order they are written.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("initWindowRadius", self.init_window_radius.to_string()),
            ("patchRadius", self.patch_radius.to_string()),
            ("intermediateSaving", self.intermediate_saving.to_string()),
            (
                "intermediateSavingPath",
                self.intermediate_saving_path.clone(),
            ),
            ("maxIterations", self.max_iterations.to_string()),
        ]
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.entries() {
            let _ = writeln!(out, "{}={}", name, value);
        }
        out
    }
}

pub fn write_config(path: &Path, settings: &OpalSettings) -> Result<()> {
    fs::write(path, settings.render()).map_err(|e| HarnessError::io(path, e))
}

/// What to do with the remaining folds once one fold has failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep going.
    #[default]
    Continue,
    /// Stop at the first failed fold.
    Abort,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Continue => "continue",
            FailurePolicy::Abort => "abort",
        }
    }
}

/// On-disk harness configuration. Every field is optional; command-line
/// flags take precedence over values read from the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessFile {
    pub executable: Option<PathBuf>,
    pub images_dir: Option<PathBuf>,
    pub segmentations_dir: Option<PathBuf>,
    pub results_root: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
    pub extension: Option<String>,
    pub failure_policy: Option<FailurePolicy>,
    pub opal: OpalSettings,
}

pub fn load_harness_file(path: &Path) -> Result<HarnessFile> {
    let raw = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
    serde_yaml::from_str(&raw).map_err(|source| HarnessError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

pub fn harness_file_template() -> &'static str {
    r#"# opal-eval harness configuration
executable: ../build/main/OPAL
images_dir: ../test/test_data/Images
segmentations_dir: ../test/test_data/Segmentations
results_root: results
summary_path: results.json
extension: .img
failure_policy: continue
opal:
  initWindowRadius: 15
  patchRadius: 6
  intermediateSaving: false
  intermediateSavingPath: ""
  maxIterations: 30
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::temp_root;

    #[test]
    fn config_lines_keep_declaration_order() {
        let rendered = OpalSettings::default().render();
        assert_eq!(
            rendered,
            "initWindowRadius=15\npatchRadius=6\nintermediateSaving=false\nintermediateSavingPath=\nmaxIterations=30\n"
        );
    }

    #[test]
    fn write_config_overwrites_existing_file() {
        let root = temp_root("config_write");
        let path = root.join("config.txt");
        fs::write(&path, "stale=1\nstale=2\nstale=3\nstale=4\nstale=5\nstale=6\n").expect("seed");
        let settings = OpalSettings {
            patch_radius: 3,
            intermediate_saving: true,
            intermediate_saving_path: "/tmp/steps".to_string(),
            ..OpalSettings::default()
        };
        write_config(&path, &settings).expect("write config");
        let text = fs::read_to_string(&path).expect("read back");
        assert_eq!(text.lines().count(), 5);
        assert!(text.contains("patchRadius=3\n"));
        assert!(text.contains("intermediateSaving=true\n"));
        assert!(text.contains("intermediateSavingPath=/tmp/steps\n"));
        assert!(!text.contains("stale"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn template_parses_into_defaults() {
        let file: HarnessFile =
            serde_yaml::from_str(harness_file_template()).expect("template must parse");
        assert_eq!(file.opal, OpalSettings::default());
        assert_eq!(file.failure_policy, Some(FailurePolicy::Continue));
        assert_eq!(file.extension.as_deref(), Some(".img"));
        assert_eq!(file.results_root, Some(PathBuf::from("results")));
    }

    #[test]
    fn partial_opal_block_keeps_other_defaults() {
        let file: HarnessFile =
            serde_yaml::from_str("opal:\n  maxIterations: 5\nfailure_policy: abort\n")
                .expect("partial config");
        assert_eq!(file.opal.max_iterations, 5);
        assert_eq!(file.opal.patch_radius, 6);
        assert_eq!(file.failure_policy, Some(FailurePolicy::Abort));
        assert!(file.executable.is_none());
    }

    #[test]
    fn misspelled_parameter_is_rejected() {
        let root = temp_root("config_typo");
        let path = root.join("harness.yaml");
        fs::write(&path, "opal:\n  patchRadus: 4\n").expect("write yaml");
        let err = load_harness_file(&path).expect_err("typo must be rejected");
        assert_eq!(err.code(), "yaml_error");
        assert!(err.to_string().contains("harness.yaml"));
        let _ = fs::remove_dir_all(root);
    }
}
