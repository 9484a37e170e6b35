use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single catalog call failed. Recorded per chunk; never retried by the fetcher.
#[derive(Debug, Clone, Error)]
#[error("fetch {endpoint} failed (status={}): {cause}", status_label(*.status))]
pub struct FetchError {
    /// HTTP status, `None` for transport or decode failures.
    pub status: Option<u16>,
    pub endpoint: String,
    pub cause: String,
}

fn status_label(status: Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

impl FetchError {
    pub fn new(endpoint: impl Into<String>, status: Option<u16>, cause: impl Into<String>) -> Self {
        Self {
            status,
            endpoint: endpoint.into(),
            cause: cause.into(),
        }
    }
}

/// Durable write failed. The in-memory state is untouched and the next
/// trigger retries.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Games,
    Enrich,
    Verify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Games => "games",
            Phase::Enrich => "enrich",
            Phase::Verify => "verify",
        })
    }
}

/// Errors that stop forward progress. Everything else is absorbed into `RunStats`.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("primary page at offset {offset} failed after {attempts} attempt(s): {source}")]
    PageFetch {
        offset: usize,
        attempts: u32,
        #[source]
        source: FetchError,
    },
    #[error("cannot read {}: {source}", .path.display())]
    InputRead {
        phase: Phase,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {}: {source}", .path.display())]
    InputParse {
        phase: Phase,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot write {}: {source}", .path.display())]
    OutputWrite {
        phase: Phase,
        path: PathBuf,
        #[source]
        source: CheckpointError,
    },
}

impl HarvestError {
    pub fn phase(&self) -> Phase {
        match self {
            HarvestError::PageFetch { .. } => Phase::Games,
            HarvestError::InputRead { phase, .. }
            | HarvestError::InputParse { phase, .. }
            | HarvestError::OutputWrite { phase, .. } => *phase,
        }
    }
}
