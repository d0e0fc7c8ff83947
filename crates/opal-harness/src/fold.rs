use crate::dataset::Dataset;
use crate::error::{HarnessError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const LOG_FILE_NAME: &str = "log.txt";

/// One leave-one-out round: `target` is held out, every other index is an atlas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub target: usize,
    pub atlas: Vec<usize>,
    pub output_dir: PathBuf,
}

impl Fold {
    pub fn new(target: usize, dataset_len: usize, results_root: &Path) -> Self {
        Self {
            target,
            atlas: (0..dataset_len).filter(|i| *i != target).collect(),
            output_dir: results_root.join(target.to_string()),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(LOG_FILE_NAME)
    }

    /// `config target_image target_gt {atlas_image atlas_gt}* output_dir`
    pub fn arguments(&self, config: &Path, dataset: &Dataset) -> Result<Vec<PathBuf>> {
        let mut args = vec![config.to_path_buf()];
        for index in std::iter::once(self.target).chain(self.atlas.iter().copied()) {
            let entry = dataset.get(index).ok_or(HarnessError::TargetOutOfRange {
                target: index,
                len: dataset.len(),
            })?;
            args.push(entry.image.clone());
            args.push(entry.segmentation.clone());
        }
        args.push(self.output_dir.clone());
        Ok(args)
    }
}

/// What happened when a fold's program ran. The log is kept whatever the
/// exit status was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldRun {
    pub target: usize,
    pub log_path: PathBuf,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl FoldRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `program` with `args`, stdout captured into `log_path`, and wait for it.
pub fn invoke_with_log(program: &Path, args: &[PathBuf], log_path: &Path) -> Result<Option<i32>> {
    let log = fs::File::create(log_path).map_err(|e| HarnessError::io(log_path, e))?;
    tracing::debug!(program = %program.display(), ?args, "invoking segmentation program");
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| HarnessError::io(program, e))?;
    Ok(status.code())
}

pub fn run_fold(
    program: &Path,
    config: &Path,
    dataset: &Dataset,
    target: usize,
    results_root: &Path,
) -> Result<FoldRun> {
    if target >= dataset.len() {
        return Err(HarnessError::TargetOutOfRange {
            target,
            len: dataset.len(),
        });
    }
    let fold = Fold::new(target, dataset.len(), results_root);
    let args = fold.arguments(config, dataset)?;
    match fs::create_dir(&fold.output_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(HarnessError::DirectoryConflict(fold.output_dir.clone()))
        }
        Err(e) => return Err(HarnessError::io(&fold.output_dir, e)),
    }
    let log_path = fold.log_path();
    let exit_code = invoke_with_log(program, &args, &log_path)?;
    Ok(FoldRun {
        target,
        log_path,
        exit_code,
    })
}

#[cfg(all(test, unix))]
pub(crate) fn write_stub_program(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("opal_stub.sh");
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write stub");
    let mut perms = fs::metadata(&path).expect("stub metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod stub");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{list_paired, write_fixture_dataset};
    use crate::fsutil::temp_root;

    #[test]
    fn argument_order_for_held_out_index() {
        let root = temp_root("fold_args");
        let (images, segs) = write_fixture_dataset(&root, 4);
        let dataset = list_paired(&images, &segs, ".img").expect("dataset");
        let results = root.join("results");
        let config = results.join("config.txt");

        let fold = Fold::new(2, dataset.len(), &results);
        assert_eq!(fold.atlas, vec![0, 1, 3]);
        let args = fold.arguments(&config, &dataset).expect("args");
        let expected = vec![
            config.clone(),
            images.join("img_2.img"),
            segs.join("seg_2.img"),
            images.join("img_0.img"),
            segs.join("seg_0.img"),
            images.join("img_1.img"),
            segs.join("seg_1.img"),
            images.join("img_3.img"),
            segs.join("seg_3.img"),
            results.join("2"),
        ];
        assert_eq!(args, expected);
        let _ = fs::remove_dir_all(root);
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_reports_exit_code() {
        let root = temp_root("fold_run");
        let (images, segs) = write_fixture_dataset(&root, 3);
        let dataset = list_paired(&images, &segs, ".img").expect("dataset");
        let results = root.join("results");
        fs::create_dir_all(&results).expect("results root");
        let program = write_stub_program(&root, "echo \"$#\"\nfor a in \"$@\"; do echo \"$a\"; done\nexit 3");

        let run = run_fold(&program, Path::new("cfg.txt"), &dataset, 1, &results).expect("run fold");
        assert_eq!(run.exit_code, Some(3));
        assert!(!run.succeeded());
        assert_eq!(run.log_path, results.join("1").join("log.txt"));
        let log = fs::read_to_string(&run.log_path).expect("log");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], "8");
        assert_eq!(lines[1], "cfg.txt");
        assert_eq!(lines[2], images.join("img_1.img").to_string_lossy());
        assert_eq!(lines[8], results.join("1").to_string_lossy());
        let _ = fs::remove_dir_all(root);
    }

    #[cfg(unix)]
    #[test]
    fn existing_output_directory_is_a_conflict() {
        let root = temp_root("fold_conflict");
        let (images, segs) = write_fixture_dataset(&root, 2);
        let dataset = list_paired(&images, &segs, ".img").expect("dataset");
        let results = root.join("results");
        fs::create_dir_all(results.join("0")).expect("pre-existing fold dir");
        let program = write_stub_program(&root, "exit 0");

        let err = run_fold(&program, Path::new("cfg.txt"), &dataset, 0, &results)
            .expect_err("must conflict");
        assert!(matches!(err, HarnessError::DirectoryConflict(p) if p == results.join("0")));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn target_outside_dataset_is_rejected() {
        let root = temp_root("fold_range");
        let (images, segs) = write_fixture_dataset(&root, 2);
        let dataset = list_paired(&images, &segs, ".img").expect("dataset");
        let err = run_fold(
            Path::new("/bin/true"),
            Path::new("cfg.txt"),
            &dataset,
            2,
            &root.join("results"),
        )
        .expect_err("out of range");
        assert!(matches!(
            err,
            HarnessError::TargetOutOfRange { target: 2, len: 2 }
        ));
        let _ = fs::remove_dir_all(root);
    }
}
