//! Discovery of the paired image / ground-truth database on disk.

use crate::error::{HarnessError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_EXTENSION: &str = ".img";

/// One image together with its ground-truth segmentation.
///
/// `index` is the position in the name-sorted listing; pairing is positional,
/// file names are never matched against each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub index: usize,
    pub image: PathBuf,
    pub segmentation: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    entries: Vec<DatasetEntry>,
}

impl Dataset {
    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DatasetEntry> {
        self.entries.get(index)
    }
}

/// Sorted file names in `dir` whose name contains `extension`. Names are
/// returned as found on disk, so non-UTF-8 names still join to real paths.
pub fn list_matching(dir: &Path, extension: &str) -> Result<Vec<OsString>> {
    if !dir.exists() {
        return Err(HarnessError::PathNotFound(dir.to_path_buf()));
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk error"));
            HarnessError::Io { path, source }
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().contains(extension) {
            names.push(name.to_os_string());
        }
    }
    names.sort();
    Ok(names)
}

pub fn list_paired(
    images_dir: &Path,
    segmentations_dir: &Path,
    extension: &str,
) -> Result<Dataset> {
    let images = list_matching(images_dir, extension)?;
    let segmentations = list_matching(segmentations_dir, extension)?;
    if images.len() != segmentations.len() {
        return Err(HarnessError::CountMismatch {
            images: images.len(),
            segmentations: segmentations.len(),
        });
    }
    let entries = images
        .into_iter()
        .zip(segmentations)
        .enumerate()
        .map(|(index, (image, segmentation))| DatasetEntry {
            index,
            image: images_dir.join(image),
            segmentation: segmentations_dir.join(segmentation),
        })
        .collect();
    Ok(Dataset { entries })
}

#[cfg(test)]
pub(crate) fn write_fixture_dataset(root: &Path, count: usize) -> (PathBuf, PathBuf) {
    let images = root.join("Images");
    let segs = root.join("Segmentations");
    std::fs::create_dir_all(&images).expect("images dir");
    std::fs::create_dir_all(&segs).expect("segs dir");
    for i in 0..count {
        std::fs::write(images.join(format!("img_{}.img", i)), b"").expect("image");
        std::fs::write(images.join(format!("img_{}.hdr", i)), b"").expect("header");
        std::fs::write(segs.join(format!("seg_{}.img", i)), b"").expect("seg");
    }
    (images, segs)
}
