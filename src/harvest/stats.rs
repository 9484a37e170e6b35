use crate::igdb::kinds::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Relationship kinds that appear on an enriched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    Companies,
    Platforms,
    GameModes,
    Genres,
    /// Websites hanging off a resolved company.
    CompanyWebsites,
}

impl Relation {
    /// The four relations that count toward completeness and data quality.
    pub const CORE: [Relation; 4] = [
        Relation::Companies,
        Relation::Platforms,
        Relation::GameModes,
        Relation::Genres,
    ];
    pub const ALL: [Relation; 5] = [
        Relation::Companies,
        Relation::Platforms,
        Relation::GameModes,
        Relation::Genres,
        Relation::CompanyWebsites,
    ];

    fn core_index(self) -> Option<usize> {
        Relation::CORE.iter().position(|r| *r == self)
    }
}

/// `12.34%`; zero denominators render as `0.00%`.
pub fn percent(numerator: u64, denominator: u64) -> String {
    format!("{:.2}%", ratio_percent(numerator, denominator))
}

pub fn ratio_percent(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide counters for one run.
///
/// Every mutation goes through a method here: scalar counters are atomics and
/// the keyed tallies sit behind one mutex each, so concurrent resolvers for
/// different kinds never race on a counter. Nothing is ever reset mid-run.
#[derive(Debug, Default)]
pub struct RunStats {
    total_games: AtomicU64,
    processed_games: AtomicU64,
    games_with: [AtomicU64; 4],
    successful_api_calls: AtomicU64,
    failed_api_calls: AtomicU64,
    resolved: Mutex<BTreeMap<EntityKind, u64>>,
    duplicates: Mutex<BTreeMap<EntityKind, u64>>,
    missing: Mutex<BTreeMap<Relation, Vec<i64>>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue counting from a previously checkpointed snapshot.
    pub fn from_snapshot(snapshot: &StatsSnapshot) -> Self {
        let stats = Self::new();
        stats.total_games.store(snapshot.total_games, Ordering::SeqCst);
        stats
            .processed_games
            .store(snapshot.processed_games, Ordering::SeqCst);
        for (slot, value) in stats.games_with.iter().zip([
            snapshot.games_with_companies,
            snapshot.games_with_platforms,
            snapshot.games_with_game_modes,
            snapshot.games_with_genres,
        ]) {
            slot.store(value, Ordering::SeqCst);
        }
        stats
            .successful_api_calls
            .store(snapshot.successful_api_calls, Ordering::SeqCst);
        stats
            .failed_api_calls
            .store(snapshot.failed_api_calls, Ordering::SeqCst);
        *lock(&stats.resolved) = snapshot.resolved_entities.clone();
        *lock(&stats.duplicates) = snapshot.duplicate_entities.clone();
        *lock(&stats.missing) = snapshot.missing_relationships.clone();
        stats
    }

    pub fn set_total_games(&self, total: u64) {
        self.total_games.store(total, Ordering::SeqCst);
    }

    pub fn add_processed(&self, n: u64) {
        self.processed_games.fetch_add(n, Ordering::SeqCst);
    }

    pub fn record_api_success(&self) {
        self.successful_api_calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_api_failure(&self) {
        self.failed_api_calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_resolved(&self, kind: EntityKind, n: u64) {
        *lock(&self.resolved).entry(kind).or_insert(0) += n;
    }

    pub fn record_duplicate(&self, kind: EntityKind) {
        *lock(&self.duplicates).entry(kind).or_insert(0) += 1;
    }

    pub fn record_missing(&self, relation: Relation, game_id: i64) {
        lock(&self.missing).entry(relation).or_default().push(game_id);
    }

    /// Counts a record whose resolved list for `relation` is non-empty.
    pub fn record_game_with(&self, relation: Relation) {
        if let Some(idx) = relation.core_index() {
            self.games_with[idx].fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn successful_api_calls(&self) -> u64 {
        self.successful_api_calls.load(Ordering::SeqCst)
    }

    pub fn failed_api_calls(&self) -> u64 {
        self.failed_api_calls.load(Ordering::SeqCst)
    }

    pub fn processed_games(&self) -> u64 {
        self.processed_games.load(Ordering::SeqCst)
    }

    pub fn games_with(&self, relation: Relation) -> u64 {
        relation
            .core_index()
            .map_or(0, |idx| self.games_with[idx].load(Ordering::SeqCst))
    }

    pub fn missing_for(&self, relation: Relation) -> Vec<i64> {
        lock(&self.missing).get(&relation).cloned().unwrap_or_default()
    }

    pub fn duplicates_for(&self, kind: EntityKind) -> u64 {
        lock(&self.duplicates).get(&kind).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_games = self.total_games.load(Ordering::SeqCst);
        let successful = self.successful_api_calls();
        let failed = self.failed_api_calls();
        let mut missing = lock(&self.missing).clone();
        for relation in Relation::ALL {
            missing.entry(relation).or_default();
        }
        let completeness_rate = Relation::CORE
            .iter()
            .map(|r| (*r, percent(self.games_with(*r), total_games)))
            .collect();

        StatsSnapshot {
            total_games,
            processed_games: self.processed_games(),
            games_with_companies: self.games_with(Relation::Companies),
            games_with_platforms: self.games_with(Relation::Platforms),
            games_with_game_modes: self.games_with(Relation::GameModes),
            games_with_genres: self.games_with(Relation::Genres),
            successful_api_calls: successful,
            failed_api_calls: failed,
            resolved_entities: lock(&self.resolved).clone(),
            duplicate_entities: lock(&self.duplicates).clone(),
            missing_relationships: missing,
            completeness_rate,
            api_success: percent(successful, successful + failed),
        }
    }
}

/// Serialized form written next to every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_games: u64,
    #[serde(default)]
    pub processed_games: u64,
    pub games_with_companies: u64,
    pub games_with_platforms: u64,
    pub games_with_game_modes: u64,
    pub games_with_genres: u64,
    pub successful_api_calls: u64,
    pub failed_api_calls: u64,
    #[serde(default)]
    pub resolved_entities: BTreeMap<EntityKind, u64>,
    #[serde(default)]
    pub duplicate_entities: BTreeMap<EntityKind, u64>,
    #[serde(default)]
    pub missing_relationships: BTreeMap<Relation, Vec<i64>>,
    /// Derived; recomputed on every snapshot.
    #[serde(default)]
    pub completeness_rate: BTreeMap<Relation, String>,
    #[serde(default)]
    pub api_success: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn percent_handles_zero_denominator() {
        assert_eq!(percent(0, 0), "0.00%");
        assert_eq!(percent(1, 3), "33.33%");
    }

    #[test]
    fn snapshot_serializes_camel_case_with_all_missing_keys() {
        let stats = RunStats::new();
        stats.set_total_games(4);
        stats.record_game_with(Relation::Platforms);
        stats.record_missing(Relation::Genres, 9);
        stats.record_api_success();
        stats.record_api_success();
        stats.record_api_success();
        stats.record_api_failure();
        stats.record_resolved(EntityKind::Platforms, 2);

        let value = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(value["gamesWithPlatforms"], json!(1));
        assert_eq!(value["missingRelationships"]["genres"], json!([9]));
        assert_eq!(value["missingRelationships"]["gameModes"], json!([]));
        assert_eq!(value["missingRelationships"]["companyWebsites"], json!([]));
        assert_eq!(value["completenessRate"]["platforms"], json!("25.00%"));
        assert_eq!(value["apiSuccess"], json!("75.00%"));
        assert_eq!(value["resolvedEntities"]["platforms"], json!(2));
    }

    #[test]
    fn snapshot_restores_counters() {
        let stats = RunStats::new();
        stats.set_total_games(10);
        stats.add_processed(5);
        stats.record_game_with(Relation::Companies);
        stats.record_missing(Relation::Platforms, 3);
        stats.record_duplicate(EntityKind::Genres);

        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        let parsed: StatsSnapshot = serde_json::from_str(&json).unwrap();
        let restored = RunStats::from_snapshot(&parsed);
        restored.add_processed(5);

        assert_eq!(restored.processed_games(), 10);
        assert_eq!(restored.games_with(Relation::Companies), 1);
        assert_eq!(restored.missing_for(Relation::Platforms), vec![3]);
        assert_eq!(restored.duplicates_for(EntityKind::Genres), 1);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(RunStats::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..500 {
                    stats.record_api_success();
                    stats.record_resolved(EntityKind::Genres, 1);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(stats.successful_api_calls(), 4000);
        assert_eq!(stats.snapshot().resolved_entities[&EntityKind::Genres], 4000);
    }
}
