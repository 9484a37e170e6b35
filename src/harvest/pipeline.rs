use crate::error::{FetchError, HarvestError, Phase};
use crate::harvest::checkpoint::{write_json_atomic, CheckpointStore, CheckpointTrigger};
use crate::harvest::collector::collect_references;
use crate::harvest::config::HarvestConfig;
use crate::harvest::resolver::BatchResolver;
use crate::harvest::stats::{Relation, RunStats, StatsSnapshot};
use crate::harvest::stitcher::stitch;
use crate::igdb::fetcher::Fetcher;
use crate::igdb::kinds::{EntityKind, IGDB_MAX_LIMIT};
use crate::igdb::models::{EnrichedRecord, GameRecord};
use crate::igdb::transport::CatalogTransport;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GamesSummary {
    pub pages: usize,
    pub games: usize,
    pub failed_attempts: u32,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichSummary {
    pub total_games: usize,
    pub enriched_games: usize,
    pub skipped_from_checkpoint: usize,
    pub cancelled: bool,
    pub stats: StatsSnapshot,
}

pub fn games_page_query(limit: usize, offset: usize) -> String {
    format!(
        "fields {}; sort id asc; limit {}; offset {};",
        EntityKind::Games.fields(),
        limit,
        offset
    )
}

/// Drives both harvesting phases against one fetcher.
pub struct Harvester {
    cfg: HarvestConfig,
    fetcher: Arc<Fetcher>,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(cfg: HarvestConfig, transport: Arc<dyn CatalogTransport>, cancel: CancellationToken) -> Self {
        let fetcher = Arc::new(Fetcher::from_config(transport, &cfg));
        Self { cfg, fetcher, cancel }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.cfg
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    async fn fetch_page(&self, offset: usize, limit: usize, failed_attempts: &mut u32) -> Result<Vec<Value>, HarvestError> {
        let query = games_page_query(limit, offset);
        let max_attempts = self.cfg.page_retries + 1;
        let mut last_err: Option<FetchError> = None;
        let mut attempts = 0;
        for attempt in 1..=max_attempts {
            attempts = attempt;
            match self.fetcher.fetch(EntityKind::Games, &query).await {
                Ok(rows) => return Ok(rows),
                Err(err) => {
                    *failed_attempts += 1;
                    warn!(target = "pipeline", offset, attempt, max_attempts, error = %err, "games page failed");
                    last_err = Some(err);
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if attempt < max_attempts {
                        let wait = self.cfg.backoff_ms * u64::from(attempt);
                        tokio::time::sleep(Duration::from_millis(wait)).await;
                    }
                }
            }
        }
        Err(HarvestError::PageFetch {
            offset,
            attempts,
            source: last_err.unwrap_or_else(|| FetchError::new(EntityKind::Games.as_str(), None, "no attempt made")),
        })
    }

    /// Pages `/games` until a short page, `max_pages`, or cancellation.
    ///
    /// The raw set is rewritten every `raw_save_every` games and always at the
    /// end, including when a page exhausts its retries.
    #[instrument(skip(self), fields(dir = %self.cfg.output_dir.display()))]
    pub async fn harvest_games(&self) -> Result<GamesSummary, HarvestError> {
        let path = self.cfg.raw_games_path();
        let limit = self.cfg.page_size.clamp(1, IGDB_MAX_LIMIT);
        let mut games: Vec<Value> = Vec::new();
        let mut trigger = CheckpointTrigger::new(self.cfg.raw_save_every, 0);
        let mut summary = GamesSummary {
            pages: 0,
            games: 0,
            failed_attempts: 0,
            cancelled: false,
        };
        let mut offset = 0usize;

        let outcome = loop {
            if self.cfg.max_pages > 0 && summary.pages >= self.cfg.max_pages {
                break Ok(());
            }
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                info!(target = "pipeline", offset, "games harvest cancelled");
                break Ok(());
            }
            info!(target = "pipeline", offset, limit, "fetching games page");
            let page = match self.fetch_page(offset, limit, &mut summary.failed_attempts).await {
                Ok(page) => page,
                Err(err) if self.cancel.is_cancelled() => {
                    summary.cancelled = true;
                    info!(target = "pipeline", offset, error = %err, "games harvest cancelled during page retries");
                    break Ok(());
                }
                Err(err) => break Err(err),
            };
            let short = page.len() < limit;
            games.extend(page);
            summary.pages += 1;
            offset += limit;

            if trigger.due(games.len()) {
                if let Err(err) = write_json_atomic(&path, &games).await {
                    warn!(target = "checkpoint", error = %err, "raw games save failed; continuing");
                } else {
                    info!(target = "checkpoint", games = games.len(), "raw games progress saved");
                }
            }
            if short {
                break Ok(());
            }
        };

        summary.games = games.len();
        let saved = write_json_atomic(&path, &games).await;
        match outcome {
            Ok(()) => match saved {
                Ok(()) => {
                    info!(target = "pipeline", games = summary.games, pages = summary.pages, path = %path.display(), "raw games saved");
                    Ok(summary)
                }
                Err(source) => Err(HarvestError::OutputWrite {
                    phase: Phase::Games,
                    path,
                    source,
                }),
            },
            Err(err) => {
                if let Err(save_err) = saved {
                    error!(target = "checkpoint", error = %save_err, "final raw games save failed");
                }
                error!(
                    target = "pipeline",
                    phase = %err.phase(),
                    games = summary.games,
                    pages = summary.pages,
                    failed_attempts = summary.failed_attempts,
                    error = %err,
                    "games harvest aborted"
                );
                Err(err)
            }
        }
    }

    /// Enriches the raw games file page by page.
    ///
    /// With `resume`, games already present in the enriched checkpoint are
    /// skipped and the stored counters continue. A page interrupted by
    /// cancellation is discarded rather than stitched against partial lookups.
    #[instrument(skip(self), fields(dir = %self.cfg.output_dir.display()))]
    pub async fn enrich(&self, resume: bool) -> Result<EnrichSummary, HarvestError> {
        let raw_path = self.cfg.raw_games_path();
        let games = read_games(&raw_path)?;
        let mut store = CheckpointStore::new(self.cfg.enriched_games_path(), self.cfg.stats_path());

        let (mut enriched, stats) = if resume {
            match store.load().await {
                Ok(Some((records, snapshot))) => {
                    info!(target = "pipeline", restored = records.len(), "resuming from checkpoint");
                    (records, RunStats::from_snapshot(&snapshot))
                }
                Ok(None) => (Vec::new(), RunStats::new()),
                Err(err) => {
                    warn!(target = "checkpoint", error = %err, "checkpoint unreadable; starting fresh");
                    (Vec::new(), RunStats::new())
                }
            }
        } else {
            (Vec::new(), RunStats::new())
        };
        let stats = Arc::new(stats);
        stats.set_total_games(games.len() as u64);

        let done: HashSet<i64> = enriched.iter().map(|r| r.id).collect();
        let pending: Vec<GameRecord> = games.into_iter().filter(|g| !done.contains(&g.id)).collect();
        let skipped = done.len();
        info!(
            target = "pipeline",
            total = stats.snapshot().total_games,
            pending = pending.len(),
            skipped,
            "starting enrichment"
        );

        let resolver = BatchResolver::new(self.fetcher.clone(), stats.clone(), self.cancel.clone())
            .with_batch_sizes(&self.cfg);
        let mut trigger = CheckpointTrigger::new(self.cfg.checkpoint_every, enriched.len());
        let page_count = pending.len().div_ceil(self.cfg.game_chunk.max(1));
        let mut cancelled = false;

        for (idx, page) in pending.chunks(self.cfg.game_chunk.max(1)).enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            info!(target = "pipeline", page = idx + 1, pages = page_count, games = page.len(), "processing page");

            let refs = collect_references(page);
            let lookups = resolver.resolve_all(&refs).await;
            if resolver.is_cancelled() {
                warn!(target = "pipeline", page = idx + 1, "cancelled mid-page; page discarded");
                cancelled = true;
                break;
            }
            for kind in lookups.empty_kinds() {
                if refs.len(kind) > 0 {
                    warn!(target = "pipeline", %kind, requested = refs.len(kind), "no entities resolved for kind");
                }
            }

            enriched.extend(stitch(page, &lookups, &stats));
            stats.add_processed(page.len() as u64);

            if trigger.due(enriched.len()) {
                if let Err(err) = store.write(&enriched, &stats.snapshot()).await {
                    debug!(target = "pipeline", enriched = enriched.len(), error = %err, "periodic checkpoint skipped");
                }
            }
        }

        let snapshot = stats.snapshot();
        if let Err(source) = store.write(&enriched, &snapshot).await {
            error!(
                target = "pipeline",
                phase = %Phase::Enrich,
                enriched = enriched.len(),
                successful_api_calls = snapshot.successful_api_calls,
                failed_api_calls = snapshot.failed_api_calls,
                "final checkpoint failed"
            );
            return Err(HarvestError::OutputWrite {
                phase: Phase::Enrich,
                path: store.records_path().to_path_buf(),
                source,
            });
        }

        info!(
            target = "pipeline",
            enriched = enriched.len(),
            cancelled,
            with_companies = snapshot.games_with_companies,
            with_platforms = snapshot.games_with_platforms,
            missing_platforms = snapshot.missing_relationships.get(&Relation::Platforms).map_or(0, Vec::len),
            api_success = %snapshot.api_success,
            "enrichment finished"
        );
        Ok(EnrichSummary {
            total_games: snapshot.total_games as usize,
            enriched_games: enriched.len(),
            skipped_from_checkpoint: skipped,
            cancelled,
            stats: snapshot,
        })
    }
}

/// Reads a whole JSON document written by an earlier phase.
pub(crate) fn read_input<T: DeserializeOwned>(path: &Path, phase: Phase) -> Result<T, HarvestError> {
    let raw = std::fs::read(path).map_err(|source| HarvestError::InputRead {
        phase,
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| HarvestError::InputParse {
        phase,
        path: path.to_path_buf(),
        source,
    })
}

fn read_games(path: &Path) -> Result<Vec<GameRecord>, HarvestError> {
    read_input(path, Phase::Enrich)
}

/// Loads a previously written enriched set.
pub fn read_enriched(path: &Path) -> Result<Vec<EnrichedRecord>, HarvestError> {
    read_input(path, Phase::Verify)
}
