use crate::error::CheckpointError;
use crate::harvest::config::tmp_sibling;
use crate::harvest::stats::StatsSnapshot;
use crate::igdb::models::EnrichedRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serializes `value` to `path.tmp` and renames it over `path`.
///
/// Readers only ever see the previous complete document or the new one.
pub async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), CheckpointError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    let tmp = tmp_sibling(path);
    tokio::fs::write(&tmp, &bytes).await.map_err(io_err(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err(path))?;
    Ok(())
}

/// `Ok(None)` when the file does not exist.
pub async fn read_json_opt<T>(path: &Path) -> Result<Option<T>, CheckpointError>
where
    T: DeserializeOwned,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path)(err)),
    }
}

/// Fires each time the processed count crosses another multiple of `every`.
#[derive(Debug, Clone)]
pub struct CheckpointTrigger {
    every: usize,
    last_bucket: usize,
}

impl CheckpointTrigger {
    pub fn new(every: usize, already_processed: usize) -> Self {
        let every = every.max(1);
        Self {
            every,
            last_bucket: already_processed / every,
        }
    }

    pub fn due(&mut self, processed: usize) -> bool {
        let bucket = processed / self.every;
        if bucket > self.last_bucket {
            self.last_bucket = bucket;
            true
        } else {
            false
        }
    }
}

/// Full-state snapshots of the enriched set plus stats.
///
/// Each write replaces the previous pair. `write` takes `&mut self`, so one
/// store can never have two writes in flight.
#[derive(Debug)]
pub struct CheckpointStore {
    records_path: PathBuf,
    stats_path: PathBuf,
    writes: u64,
    failures: u64,
}

impl CheckpointStore {
    pub fn new(records_path: impl Into<PathBuf>, stats_path: impl Into<PathBuf>) -> Self {
        Self {
            records_path: records_path.into(),
            stats_path: stats_path.into(),
            writes: 0,
            failures: 0,
        }
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub async fn write(
        &mut self,
        records: &[EnrichedRecord],
        stats: &StatsSnapshot,
    ) -> Result<(), CheckpointError> {
        let result = async {
            write_json_atomic(&self.records_path, records).await?;
            write_json_atomic(&self.stats_path, stats).await
        }
        .await;
        match &result {
            Ok(()) => {
                self.writes += 1;
                info!(
                    target = "checkpoint",
                    records = records.len(),
                    processed = stats.processed_games,
                    total = stats.total_games,
                    "checkpoint saved"
                );
            }
            Err(err) => {
                self.failures += 1;
                warn!(target = "checkpoint", error = %err, "checkpoint write failed; will retry at next trigger");
            }
        }
        result
    }

    /// Previous run's state, if both files are present.
    pub async fn load(&self) -> Result<Option<(Vec<EnrichedRecord>, StatsSnapshot)>, CheckpointError> {
        let records: Option<Vec<EnrichedRecord>> = read_json_opt(&self.records_path).await?;
        let stats: Option<StatsSnapshot> = read_json_opt(&self.stats_path).await?;
        Ok(records.zip(stats))
    }
}
