use futures::future::join_all;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub deleted: Vec<PathBuf>,
    pub absent: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

enum Removal {
    Deleted,
    Absent,
    Failed,
}

async fn remove(path: &Path) -> Removal {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!(target = "cleanup", path = %path.display(), "deleted");
            Removal::Deleted
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Removal::Absent,
        Err(err) => {
            warn!(target = "cleanup", path = %path.display(), error = %err, "delete failed");
            Removal::Failed
        }
    }
}

/// Deletes each path if present. A missing file is not an error; any other
/// failure is logged and listed in `failed` without stopping the rest.
pub async fn cleanup(paths: &[PathBuf]) -> CleanupSummary {
    let outcomes = join_all(paths.iter().map(|path| remove(path))).await;
    let mut summary = CleanupSummary::default();
    for (path, outcome) in paths.iter().zip(outcomes) {
        let bucket = match outcome {
            Removal::Deleted => &mut summary.deleted,
            Removal::Absent => &mut summary.absent,
            Removal::Failed => &mut summary.failed,
        };
        bucket.push(path.clone());
    }
    info!(
        target = "cleanup",
        deleted = summary.deleted.len(),
        absent = summary.absent.len(),
        failed = summary.failed.len(),
        "cleanup finished"
    );
    summary
}
