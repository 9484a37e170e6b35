use crate::harvest::collector::{company_ids, website_ids, ReferenceSet};
use crate::harvest::config::HarvestConfig;
use crate::harvest::stats::RunStats;
use crate::igdb::fetcher::Fetcher;
use crate::igdb::kinds::{EntityKind, DEFAULT_BATCH_SIZE, IGDB_MAX_LIMIT};
use crate::igdb::models::RelatedEntity;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type Lookup = HashMap<i64, RelatedEntity>;

/// Read-only view of the run-wide lookups, taken once a page's plan finishes.
#[derive(Debug, Clone, Default)]
pub struct RelatedLookups {
    by_kind: HashMap<EntityKind, Arc<Lookup>>,
}

impl RelatedLookups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, kind: EntityKind, lookup: Lookup) -> Self {
        self.with_shared(kind, Arc::new(lookup))
    }

    pub fn with_shared(mut self, kind: EntityKind, lookup: Arc<Lookup>) -> Self {
        self.by_kind.insert(kind, lookup);
        self
    }

    pub fn get(&self, kind: EntityKind, id: i64) -> Option<&RelatedEntity> {
        self.by_kind.get(&kind).and_then(|lookup| lookup.get(&id))
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.by_kind.get(&kind).map_or(0, |lookup| lookup.len())
    }

    /// Kinds that came back empty; useful to spot a dead endpoint.
    pub fn empty_kinds(&self) -> Vec<EntityKind> {
        EntityKind::RELATED
            .into_iter()
            .filter(|kind| self.len(*kind) == 0)
            .collect()
    }
}

pub fn chunk_query(kind: EntityKind, chunk: &[i64]) -> String {
    format!(
        "fields {}; where id = ({}); limit {};",
        kind.fields(),
        chunk.iter().join(","),
        chunk.len()
    )
}

/// Turns ID sets into ID-keyed lookups, one rate-limited call per chunk.
///
/// The resolver owns one lookup per kind for the whole run. An entity that
/// resolved once is never requested again; IDs whose chunk failed stay out of
/// the cache and are requested again if a later page references them.
pub struct BatchResolver {
    fetcher: Arc<Fetcher>,
    stats: Arc<RunStats>,
    default_batch: usize,
    batch_overrides: BTreeMap<EntityKind, usize>,
    cache: Mutex<HashMap<EntityKind, Arc<Lookup>>>,
    cancel: CancellationToken,
}

impl BatchResolver {
    pub fn new(fetcher: Arc<Fetcher>, stats: Arc<RunStats>, cancel: CancellationToken) -> Self {
        Self {
            fetcher,
            stats,
            default_batch: DEFAULT_BATCH_SIZE,
            batch_overrides: BTreeMap::new(),
            cache: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    pub fn with_batch_sizes(mut self, cfg: &HarvestConfig) -> Self {
        self.default_batch = cfg.batch_size;
        self.batch_overrides = cfg.batch_overrides.clone();
        self
    }

    pub fn batch_size_for(&self, kind: EntityKind) -> usize {
        self.batch_overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.default_batch)
            .clamp(1, IGDB_MAX_LIMIT)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fetches `ids` in ordered chunks of at most `batch_size`.
    ///
    /// A failed chunk is logged with its IDs, counted, and skipped; the other
    /// chunks still land in the result. Cancellation is honoured between chunks.
    pub async fn resolve(&self, kind: EntityKind, ids: &BTreeSet<i64>, batch_size: usize) -> Lookup {
        let mut lookup = Lookup::with_capacity(ids.len());
        if ids.is_empty() {
            return lookup;
        }
        let ordered: Vec<i64> = ids.iter().copied().collect();
        let batch_size = batch_size.clamp(1, IGDB_MAX_LIMIT);
        let mut failed_chunks = 0usize;

        for chunk in ordered.chunks(batch_size) {
            if self.cancel.is_cancelled() {
                info!(target = "resolver", %kind, resolved = lookup.len(), "cancelled at chunk boundary");
                break;
            }
            let query = chunk_query(kind, chunk);
            match self.fetcher.fetch(kind, &query).await {
                Ok(rows) => {
                    self.stats.record_api_success();
                    let mut added = 0u64;
                    for row in rows {
                        let entity: RelatedEntity = match serde_json::from_value(row) {
                            Ok(entity) => entity,
                            Err(err) => {
                                warn!(target = "resolver", %kind, error = %err, "undecodable entity skipped");
                                continue;
                            }
                        };
                        if lookup.contains_key(&entity.id) {
                            warn!(target = "resolver", %kind, id = entity.id, "duplicate entity id from source; keeping first copy");
                            self.stats.record_duplicate(kind);
                            continue;
                        }
                        lookup.insert(entity.id, entity);
                        added += 1;
                    }
                    self.stats.record_resolved(kind, added);
                    debug!(target = "resolver", %kind, requested = chunk.len(), added, "chunk resolved");
                }
                Err(err) => {
                    self.stats.record_api_failure();
                    failed_chunks += 1;
                    warn!(
                        target = "resolver",
                        %kind,
                        batch = %chunk.iter().join(","),
                        status = ?err.status,
                        error = %err.cause,
                        "batch failed; skipping"
                    );
                }
            }
        }

        if failed_chunks > 0 {
            warn!(
                target = "resolver",
                %kind,
                failed_chunks,
                requested = ids.len(),
                resolved = lookup.len(),
                "partial batch failure"
            );
        }
        lookup
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<EntityKind, Arc<Lookup>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entities of `kind` already resolved during this run.
    pub fn cached(&self, kind: EntityKind) -> usize {
        self.cache().get(&kind).map_or(0, |lookup| lookup.len())
    }

    /// Resolves the IDs not yet cached and returns the run-wide lookup for `kind`.
    pub async fn resolve_kind(&self, kind: EntityKind, ids: &BTreeSet<i64>) -> Arc<Lookup> {
        let pending: BTreeSet<i64> = {
            let cache = self.cache();
            match cache.get(&kind) {
                Some(known) => ids.iter().copied().filter(|id| !known.contains_key(id)).collect(),
                None => ids.clone(),
            }
        };
        if pending.len() < ids.len() {
            debug!(target = "resolver", %kind, cached = ids.len() - pending.len(), pending = pending.len(), "reusing cached entities");
        }
        let fetched = self.resolve(kind, &pending, self.batch_size_for(kind)).await;

        let mut cache = self.cache();
        let shared = cache.entry(kind).or_default();
        if !fetched.is_empty() {
            let lookup = Arc::make_mut(shared);
            for (id, entity) in fetched {
                lookup.entry(id).or_insert(entity);
            }
        }
        shared.clone()
    }

    /// Involved-company links, then the companies they name, then those companies' websites.
    async fn resolve_company_chain(
        &self,
        link_ids: &BTreeSet<i64>,
    ) -> (Arc<Lookup>, Arc<Lookup>, Arc<Lookup>) {
        let links = self.resolve_kind(EntityKind::InvolvedCompanies, link_ids).await;
        let wanted_companies = company_ids(&links, link_ids);
        let companies = self
            .resolve_kind(EntityKind::Companies, &wanted_companies)
            .await;
        let websites = self
            .resolve_kind(EntityKind::CompanyWebsites, &website_ids(&companies, &wanted_companies))
            .await;
        (links, companies, websites)
    }

    /// Runs the dependency-ordered plan for one page of references.
    ///
    /// Platforms, genres and game modes have no ordering constraint and run
    /// concurrently alongside the company chain.
    pub async fn resolve_all(&self, refs: &ReferenceSet) -> RelatedLookups {
        let platform_ids = refs.ids(EntityKind::Platforms);
        let genre_ids = refs.ids(EntityKind::Genres);
        let mode_ids = refs.ids(EntityKind::GameModes);
        let link_ids = refs.ids(EntityKind::InvolvedCompanies);

        let (platforms, genres, modes, (links, companies, websites)) = tokio::join!(
            self.resolve_kind(EntityKind::Platforms, &platform_ids),
            self.resolve_kind(EntityKind::Genres, &genre_ids),
            self.resolve_kind(EntityKind::GameModes, &mode_ids),
            self.resolve_company_chain(&link_ids),
        );

        RelatedLookups::new()
            .with_shared(EntityKind::Platforms, platforms)
            .with_shared(EntityKind::Genres, genres)
            .with_shared(EntityKind::GameModes, modes)
            .with_shared(EntityKind::InvolvedCompanies, links)
            .with_shared(EntityKind::Companies, companies)
            .with_shared(EntityKind::CompanyWebsites, websites)
    }
}
