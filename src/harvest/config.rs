use crate::igdb::kinds::{EntityKind, DEFAULT_BATCH_SIZE, IGDB_MAX_LIMIT};
use crate::util::env::{env_opt, env_parse};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const RAW_GAMES_FILE: &str = "games_partial.json";
pub const ENRICHED_GAMES_FILE: &str = "games_enriched.json";
pub const ENRICHMENT_STATS_FILE: &str = "enrichment_stats.json";
pub const VERIFICATION_REPORT_FILE: &str = "data_verification_report.json";
/// Produced by an older manual fix-up step; only ever deleted.
pub const LEGACY_FIXED_FILE: &str = "games_enriched_fixed.json";

/// Floor for per-endpoint spacing; `IGDB_MIN_DELAY_MS` can raise it, never lower it.
pub const MIN_CALL_DELAY_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub api_base: String,
    /// Shared token-bucket rate across every fetch call site.
    pub requests_per_second: u32,
    /// Spacing between the end of one call and the start of the next on the same endpoint.
    pub min_delay: Duration,
    pub page_size: usize,
    /// 0 = until a short page.
    pub max_pages: usize,
    pub batch_size: usize,
    pub batch_overrides: BTreeMap<EntityKind, usize>,
    pub game_chunk: usize,
    pub checkpoint_every: usize,
    pub raw_save_every: usize,
    pub page_retries: u32,
    pub backoff_ms: u64,
    pub output_dir: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.igdb.com/v4".to_string(),
            requests_per_second: 4,
            min_delay: Duration::from_millis(MIN_CALL_DELAY_MS),
            page_size: IGDB_MAX_LIMIT,
            max_pages: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_overrides: BTreeMap::new(),
            game_chunk: 50,
            checkpoint_every: 1000,
            raw_save_every: 10_000,
            page_retries: 3,
            backoff_ms: 1000,
            output_dir: PathBuf::from("."),
        }
    }
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_opt("IGDB_API_URL") {
            cfg.api_base = v.trim().trim_end_matches('/').to_string();
        }
        cfg.requests_per_second = env_parse("IGDB_RPS", cfg.requests_per_second).max(1);
        cfg.min_delay = Duration::from_millis(
            env_parse("IGDB_MIN_DELAY_MS", MIN_CALL_DELAY_MS).max(MIN_CALL_DELAY_MS),
        );
        cfg.page_size = env_parse("IGDB_PAGE_SIZE", cfg.page_size).clamp(1, IGDB_MAX_LIMIT);
        cfg.max_pages = env_parse("IGDB_MAX_PAGES", cfg.max_pages);
        cfg.batch_size = env_parse("IGDB_BATCH_SIZE", cfg.batch_size).clamp(1, IGDB_MAX_LIMIT);
        if let Some(raw) = env_opt("IGDB_BATCH_OVERRIDES") {
            cfg.batch_overrides = parse_batch_overrides(&raw);
        }
        cfg.game_chunk = env_parse("IGDB_GAME_CHUNK", cfg.game_chunk).max(1);
        cfg.checkpoint_every = env_parse("HARVEST_CHECKPOINT_EVERY", cfg.checkpoint_every).max(1);
        cfg.page_retries = env_parse("IGDB_PAGE_RETRIES", cfg.page_retries);
        cfg.backoff_ms = env_parse("IGDB_BACKOFF_MS", cfg.backoff_ms);
        if let Some(dir) = env_opt("HARVEST_DIR") {
            cfg.output_dir = PathBuf::from(dir);
        }
        cfg
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.output_dir.join(file)
    }

    pub fn raw_games_path(&self) -> PathBuf {
        self.path(RAW_GAMES_FILE)
    }

    pub fn enriched_games_path(&self) -> PathBuf {
        self.path(ENRICHED_GAMES_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.path(ENRICHMENT_STATS_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.path(VERIFICATION_REPORT_FILE)
    }

    /// Intermediate files the cleanup command removes.
    pub fn intermediate_files(&self) -> Vec<PathBuf> {
        [
            RAW_GAMES_FILE,
            ENRICHED_GAMES_FILE,
            LEGACY_FIXED_FILE,
            ENRICHMENT_STATS_FILE,
        ]
        .iter()
        .flat_map(|name| {
            let path = self.path(name);
            [tmp_sibling(&path), path]
        })
        .collect()
    }
}

/// `foo.json` -> `foo.json.tmp`, used for write-then-rename.
pub fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Parses `kind=size` pairs separated by commas or spaces. Bad entries are skipped.
pub fn parse_batch_overrides(raw: &str) -> BTreeMap<EntityKind, usize> {
    raw.split(|c| c == ',' || c == ' ')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            let Some((kind, size)) = token.split_once('=') else {
                warn!(target = "config", token, "batch override missing '='; skipped");
                return None;
            };
            match (kind.parse::<EntityKind>(), size.trim().parse::<usize>()) {
                (Ok(kind), Ok(size)) if size > 0 => Some((kind, size)),
                _ => {
                    warn!(target = "config", token, "unparseable batch override; skipped");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_parse_and_skip_garbage() {
        let parsed = parse_batch_overrides("company_websites=3, companies=10 bogus genres=0 x=1");
        assert_eq!(parsed.get(&EntityKind::CompanyWebsites), Some(&3));
        assert_eq!(parsed.get(&EntityKind::Companies), Some(&10));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn min_delay_never_drops_below_floor() {
        std::env::set_var("IGDB_MIN_DELAY_MS", "0");
        assert_eq!(HarvestConfig::from_env().min_delay, Duration::from_millis(250));
        std::env::set_var("IGDB_MIN_DELAY_MS", "400");
        assert_eq!(HarvestConfig::from_env().min_delay, Duration::from_millis(400));
        std::env::remove_var("IGDB_MIN_DELAY_MS");
        assert_eq!(HarvestConfig::from_env().min_delay, Duration::from_millis(250));
    }

    #[test]
    fn intermediate_files_include_tmp_siblings() {
        let cfg = HarvestConfig {
            output_dir: PathBuf::from("/data"),
            ..HarvestConfig::default()
        };
        let files = cfg.intermediate_files();
        assert!(files.contains(&PathBuf::from("/data/games_partial.json")));
        assert!(files.contains(&PathBuf::from("/data/games_partial.json.tmp")));
        assert!(files.contains(&PathBuf::from("/data/games_enriched_fixed.json")));
        assert!(!files.contains(&PathBuf::from("/data/data_verification_report.json")));
    }
}
