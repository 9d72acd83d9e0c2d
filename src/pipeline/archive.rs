//! Release archive extraction
//!
//! Entries the archive flags as directories are directories. Any other entry
//! is written as a file when its last path segment has an extension or is
//! `LICENSE`, and created as a directory otherwise.

use crate::core::error::PipelineError;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Counts of what an extraction produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub skipped: usize,
}

/// Whether a non-directory entry's final segment should be written as a file
pub fn looks_like_file(entry_name: &str) -> bool {
    let last = entry_name
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    if last == "LICENSE" {
        return true;
    }
    match last.rfind('.') {
        Some(dot) => dot + 1 < last.len(),
        None => false,
    }
}

/// Extract `archive` into `target` on the blocking pool
pub async fn extract(archive: &Path, target: &Path) -> Result<ExtractSummary, PipelineError> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();

    tokio::task::spawn_blocking(move || extract_blocking(&archive, &target))
        .await
        .map_err(|e| PipelineError::TaskFailed(e.to_string()))?
}

fn extract_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::ExtractFailed(e.to_string())
}

/// Extract `archive` into `target`
pub fn extract_blocking(archive: &Path, target: &Path) -> Result<ExtractSummary, PipelineError> {
    let file = File::open(archive).map_err(extract_error)?;
    let mut zip = zip::ZipArchive::new(file).map_err(extract_error)?;
    let mut summary = ExtractSummary::default();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(extract_error)?;

        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "skipping archive entry outside the workspace");
            summary.skipped += 1;
            continue;
        };
        let destination: PathBuf = target.join(relative);

        if entry.is_dir() || !looks_like_file(entry.name()) {
            fs::create_dir_all(&destination).map_err(extract_error)?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(extract_error)?;
        }
        let mut output = File::create(&destination).map_err(extract_error)?;
        io::copy(&mut entry, &mut output).map_err(extract_error)?;
        summary.files += 1;
    }

    debug!(
        files = summary.files,
        directories = summary.directories,
        skipped = summary.skipped,
        "archive extracted"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, entries: &[(&str, Option<&[u8]>)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            match content {
                Some(bytes) => {
                    writer.start_file(*name, options).unwrap();
                    writer.write_all(bytes).unwrap();
                }
                None => {
                    writer.add_directory(*name, options).unwrap();
                }
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_looks_like_file() {
        assert!(looks_like_file("LICENSE"));
        assert!(looks_like_file("docs/LICENSE"));
        assert!(looks_like_file("a/b/c.json"));
        assert!(looks_like_file(".gitignore"));
        assert!(!looks_like_file("content/images"));
        assert!(!looks_like_file("trailing."));
        assert!(!looks_like_file("README"));
    }

    #[test]
    fn test_extract_creates_files_and_directories() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("release.zip");
        let target = temp.path().join("out");
        fs::create_dir(&target).unwrap();

        build_zip(
            &archive,
            &[
                ("LICENSE", Some(b"MIT".as_slice())),
                ("a/b/c.json", Some(b"{\"x\":1}".as_slice())),
                ("content/", None),
                ("content/adapters", Some(b"".as_slice())),
                (".gitignore", Some(b"node_modules\n".as_slice())),
            ],
        );

        let summary = extract_blocking(&archive, &target).unwrap();

        assert!(target.join("LICENSE").is_file());
        assert_eq!(fs::read(target.join("LICENSE")).unwrap(), b"MIT");
        assert!(target.join("a/b").is_dir());
        assert_eq!(fs::read_to_string(target.join("a/b/c.json")).unwrap(), "{\"x\":1}");
        assert!(target.join("content/adapters").is_dir());
        assert!(target.join(".gitignore").is_file());
        assert_eq!(summary.files, 3);
        assert_eq!(summary.directories, 2);
        assert_eq!(summary.skipped, 0);
    }

    #[test]
    fn test_extract_skips_escaping_entries() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.zip");
        let target = temp.path().join("out");
        fs::create_dir(&target).unwrap();

        build_zip(
            &archive,
            &[
                ("../escape.txt", Some(b"nope".as_slice())),
                ("ok.txt", Some(b"fine".as_slice())),
            ],
        );

        let summary = extract_blocking(&archive, &target).unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.files, 1);
        assert!(!temp.path().join("escape.txt").exists());
        assert!(target.join("ok.txt").exists());
    }

    #[tokio::test]
    async fn test_extract_rejects_non_archive() {
        let temp = TempDir::new().unwrap();
        let bogus = temp.path().join("not-a.zip");
        fs::write(&bogus, b"<html>404</html>").unwrap();

        let result = extract(&bogus, temp.path()).await;
        assert!(matches!(result, Err(PipelineError::ExtractFailed(_))));
    }
}
