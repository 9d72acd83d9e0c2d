//! Copies the deployment resource directory over the workspace

use crate::core::error::PipelineError;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Recursively copy `source` into `target`, overwriting same-named files.
///
/// Returns the number of files copied.
pub async fn overlay_resources(source: &Path, target: &Path) -> Result<usize, PipelineError> {
    let source = source.to_path_buf();
    let target = target.to_path_buf();

    tokio::task::spawn_blocking(move || copy_tree(&source, &target))
        .await
        .map_err(|e| PipelineError::TaskFailed(e.to_string()))?
}

fn copy_tree(source: &Path, target: &Path) -> Result<usize, PipelineError> {
    let failed = |message: String| PipelineError::OverlayFailed {
        path: source.display().to_string(),
        message,
    };

    if !source.is_dir() {
        return Err(failed("resource directory does not exist".to_string()));
    }

    let mut copied = 0;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|e| failed(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| failed(e.to_string()))?;
        let destination = target.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)
                .map_err(|e| failed(format!("{}: {}", destination.display(), e)))?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| failed(format!("{}: {}", parent.display(), e)))?;
            }
            fs::copy(entry.path(), &destination)
                .map_err(|e| failed(format!("{}: {}", entry.path().display(), e)))?;
            copied += 1;
        }
    }

    debug!(source = %source.display(), files = copied, "resources copied");
    Ok(copied)
}
