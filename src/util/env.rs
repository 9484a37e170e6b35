//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        if dotenv::dotenv().is_ok() {
            return;
        }
        // Fallback to Cargo project root
        let candidate = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenv::from_path(candidate);
    });
}

/// Common bootstrap for CLI binaries:
///   * initialize dotenv/env once
///   * log which credential path the catalog transport will take
pub fn bootstrap_cli(bin_name: &str) {
    init_env();

    if env_opt("IGDB_ACCESS_TOKEN").is_some() {
        info!(
            target = "bootstrap",
            bin = bin_name,
            "static IGDB_ACCESS_TOKEN detected; skipping Twitch OAuth"
        );
    } else if env_opt("TWITCH_CLIENT_SECRET").is_some() {
        info!(
            target = "bootstrap",
            bin = bin_name,
            "Twitch client credentials detected"
        );
    } else {
        warn!(
            target = "bootstrap",
            bin = bin_name,
            "no IGDB_ACCESS_TOKEN or TWITCH_CLIENT_SECRET configured; catalog calls will fail"
        );
    }
}

/// Get required env var; error if missing.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    init_env();
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing env var {key}"))
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_falls_back_on_garbage() {
        std::env::set_var("HARVEST_TEST_PARSE_GARBAGE", "not-a-number");
        assert_eq!(env_parse("HARVEST_TEST_PARSE_GARBAGE", 7u32), 7);
    }

    #[test]
    fn flag_accepts_common_truthy_values() {
        std::env::set_var("HARVEST_TEST_FLAG_ON", "Yes");
        assert!(env_flag("HARVEST_TEST_FLAG_ON", false));
        assert!(env_flag("HARVEST_TEST_FLAG_UNSET", true));
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        std::env::set_var("HARVEST_TEST_BLANK", "   ");
        assert_eq!(env_opt("HARVEST_TEST_BLANK"), None);
        assert!(env_req("HARVEST_TEST_DEFINITELY_UNSET").is_err());
    }
}
