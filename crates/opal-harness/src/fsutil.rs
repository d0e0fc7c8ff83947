use crate::error::{HarnessError, Result};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::Path;

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| HarnessError::io(path, e))
}

/// Write through a sibling temp file and rename, so readers never see a
/// partially written file.
pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp).map_err(|e| HarnessError::io(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| HarnessError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| HarnessError::io(path, e))?;
    Ok(())
}

/// Remove `path` if present, then recreate it empty.
pub(crate) fn reset_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(HarnessError::io(path, e)),
    }
    ensure_dir(path)
}

#[cfg(test)]
pub(crate) fn temp_root(tag: &str) -> std::path::PathBuf {
    let root = std::env::temp_dir().join(format!(
        "opal_harness_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&root).expect("temp root");
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_files() {
        let root = temp_root("atomic");
        let target = root.join("nested").join("out.txt");
        atomic_write_bytes(&target, b"first").expect("first write");
        atomic_write_bytes(&target, b"second").expect("second write");
        assert_eq!(fs::read(&target).expect("read"), b"second");
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {:?}", leftovers);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn reset_dir_clears_previous_content_and_tolerates_missing() {
        let root = temp_root("reset");
        let results = root.join("results");
        reset_dir(&results).expect("reset missing dir");
        fs::create_dir_all(results.join("0")).expect("stale fold");
        fs::write(results.join("0").join("log.txt"), "old").expect("stale log");
        reset_dir(&results).expect("reset existing dir");
        assert!(results.is_dir());
        assert_eq!(fs::read_dir(&results).expect("list").count(), 0);
        let _ = fs::remove_dir_all(root);
    }
}
