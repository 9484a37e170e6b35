use crate::error::{HarvestError, Phase};
use crate::harvest::checkpoint::write_json_atomic;
use crate::harvest::config::HarvestConfig;
use crate::harvest::pipeline::read_input;
use crate::harvest::stats::{percent, ratio_percent};
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, instrument, warn};

const INTEGRITY_SAMPLE: usize = 100;
const PASSTHROUGH_FIELDS: [&str; 4] = ["name", "first_release_date", "summary", "total_rating"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Success,
    Warning,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub total_games: u64,
    pub games_with_basic_info: u64,
    pub field_counts: IndexMap<String, u64>,
    pub missing_fields: IndexMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedBlock {
    pub total_games: u64,
    pub games_with_companies: u64,
    pub games_with_platforms: u64,
    pub games_with_game_modes: u64,
    pub games_with_genres: u64,
    pub games_with_summary: u64,
    pub games_with_cover: u64,
    pub games_with_rating: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIntegrity {
    pub matches: u64,
    pub mismatches: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    /// Whether both sets have the same number of records.
    pub matching_game_count: bool,
    pub missing_games: Vec<i64>,
    pub unexpected_games: Vec<i64>,
    pub data_integrity: IndexMap<String, FieldIntegrity>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportStats {
    pub raw: RawBlock,
    pub enriched: EnrichedBlock,
    pub comparison: Comparison,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPercentages {
    pub games_with_basic_info: String,
    pub field_completeness: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedPercentages {
    pub companies_rate: String,
    pub platforms_rate: String,
    pub game_modes_rate: String,
    pub genres_rate: String,
    pub summary_rate: String,
    pub cover_rate: String,
    pub rating_rate: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Percentages {
    pub raw: RawPercentages,
    pub enriched: EnrichedPercentages,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub status: ReportStatus,
    pub missing_games_count: usize,
    /// Mean non-empty rate of the four relation kinds, 0-100.
    pub data_quality_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub timestamp: String,
    pub stats: ReportStats,
    pub percentages: Percentages,
    pub summary: ReportSummary,
}

/// Null, `false`, `0`, and empty strings or arrays count as absent.
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Bool(true)) | Some(Value::Object(_)) => true,
    }
}

fn record_id(record: &Value) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}

/// Null and missing keys compare equal.
fn field_value<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    record.get(field).filter(|v| !v.is_null())
}

fn raw_block(raw: &[Value]) -> RawBlock {
    let mut block = RawBlock {
        total_games: raw.len() as u64,
        ..RawBlock::default()
    };
    for record in raw {
        if is_present(record.get("id")) && is_present(record.get("name")) {
            block.games_with_basic_info += 1;
        }
        let Some(fields) = record.as_object() else {
            continue;
        };
        for (key, value) in fields {
            if value.is_null() {
                *block.missing_fields.entry(key.clone()).or_default() += 1;
            } else {
                *block.field_counts.entry(key.clone()).or_default() += 1;
            }
        }
    }
    block
}

fn enriched_block(enriched: &[Value]) -> EnrichedBlock {
    let mut block = EnrichedBlock {
        total_games: enriched.len() as u64,
        ..EnrichedBlock::default()
    };
    for record in enriched {
        let has = |field: &str| u64::from(is_present(record.get(field)));
        block.games_with_companies += has("companies");
        block.games_with_platforms += has("platforms");
        block.games_with_game_modes += has("game_modes");
        block.games_with_genres += has("genres");
        block.games_with_summary += has("summary");
        block.games_with_cover += has("cover");
        block.games_with_rating += has("total_rating");
    }
    block
}

fn compare(raw: &[Value], enriched: &[Value]) -> Comparison {
    let raw_ids: BTreeSet<i64> = raw.iter().filter_map(record_id).collect();
    let enriched_ids: BTreeSet<i64> = enriched.iter().filter_map(record_id).collect();
    let by_id: HashMap<i64, &Value> = enriched
        .iter()
        .filter_map(|record| record_id(record).map(|id| (id, record)))
        .collect();

    let mut data_integrity: IndexMap<String, FieldIntegrity> = IndexMap::new();
    for raw_record in raw.iter().take(INTEGRITY_SAMPLE) {
        let Some(enriched_record) = record_id(raw_record).and_then(|id| by_id.get(&id)) else {
            continue;
        };
        for field in PASSTHROUGH_FIELDS {
            let entry = data_integrity.entry(field.to_string()).or_default();
            if field_value(raw_record, field) == field_value(enriched_record, field) {
                entry.matches += 1;
            } else {
                entry.mismatches += 1;
            }
        }
    }

    Comparison {
        matching_game_count: raw.len() == enriched.len(),
        missing_games: raw_ids.difference(&enriched_ids).copied().collect(),
        unexpected_games: enriched_ids.difference(&raw_ids).copied().collect(),
        data_integrity,
    }
}

/// Builds the advisory report comparing the raw and enriched sets.
pub fn validate(raw: &[Value], enriched: &[Value]) -> ValidationReport {
    let raw_stats = raw_block(raw);
    let enriched_stats = enriched_block(enriched);
    let comparison = compare(raw, enriched);

    let percentages = Percentages {
        raw: RawPercentages {
            games_with_basic_info: percent(raw_stats.games_with_basic_info, raw_stats.total_games),
            field_completeness: raw_stats
                .field_counts
                .iter()
                .map(|(field, count)| (field.clone(), percent(*count, raw_stats.total_games)))
                .collect(),
        },
        enriched: {
            let total = enriched_stats.total_games;
            EnrichedPercentages {
                companies_rate: percent(enriched_stats.games_with_companies, total),
                platforms_rate: percent(enriched_stats.games_with_platforms, total),
                game_modes_rate: percent(enriched_stats.games_with_game_modes, total),
                genres_rate: percent(enriched_stats.games_with_genres, total),
                summary_rate: percent(enriched_stats.games_with_summary, total),
                cover_rate: percent(enriched_stats.games_with_cover, total),
                rating_rate: percent(enriched_stats.games_with_rating, total),
            }
        },
    };

    let relation_hits = enriched_stats.games_with_companies
        + enriched_stats.games_with_platforms
        + enriched_stats.games_with_game_modes
        + enriched_stats.games_with_genres;
    let score = ratio_percent(relation_hits, enriched_stats.total_games * 4);
    let status = if comparison.missing_games.is_empty() && comparison.unexpected_games.is_empty() {
        ReportStatus::Success
    } else {
        ReportStatus::Warning
    };

    ValidationReport {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        summary: ReportSummary {
            status,
            missing_games_count: comparison.missing_games.len(),
            data_quality_score: (score * 100.0).round() / 100.0,
        },
        stats: ReportStats {
            raw: raw_stats,
            enriched: enriched_stats,
            comparison,
        },
        percentages,
    }
}

/// Reads both output files, validates them, and writes the report next to them.
#[instrument(skip(cfg), fields(dir = %cfg.output_dir.display()))]
pub async fn verify_files(cfg: &HarvestConfig) -> Result<ValidationReport, HarvestError> {
    let raw: Vec<Value> = read_input(&cfg.raw_games_path(), Phase::Verify)?;
    let enriched: Vec<Value> = read_input(&cfg.enriched_games_path(), Phase::Verify)?;
    let report = validate(&raw, &enriched);

    let path = cfg.report_path();
    if let Err(source) = write_json_atomic(&path, &report).await {
        return Err(HarvestError::OutputWrite {
            phase: Phase::Verify,
            path,
            source,
        });
    }
    report_outcome(&report);
    Ok(report)
}

fn report_outcome(report: &ValidationReport) {
    let comparison = &report.stats.comparison;
    if report.summary.status == ReportStatus::Warning {
        warn!(
            target = "report",
            missing = comparison.missing_games.len(),
            unexpected = comparison.unexpected_games.len(),
            "raw and enriched id sets differ"
        );
    }
    info!(
        target = "report",
        raw = report.stats.raw.total_games,
        enriched = report.stats.enriched.total_games,
        score = report.summary.data_quality_score,
        "verification report written"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dropped_game_raises_warning() {
        let raw = vec![
            json!({"id": 1, "name": "A"}),
            json!({"id": 2, "name": "B"}),
            json!({"id": 3, "name": "C"}),
        ];
        let enriched = vec![json!({"id": 1, "name": "A"}), json!({"id": 3, "name": "C"})];

        let report = validate(&raw, &enriched);

        assert_eq!(report.summary.status, ReportStatus::Warning);
        assert_eq!(report.stats.comparison.missing_games, vec![2]);
        assert!(report.stats.comparison.unexpected_games.is_empty());
        assert_eq!(report.summary.missing_games_count, 1);
        assert!(!report.stats.comparison.matching_game_count);
    }

    #[test]
    fn identical_id_sets_succeed() {
        let raw = vec![json!({"id": 1, "name": "A"})];
        let enriched = vec![json!({"id": 1, "name": "A", "platforms": [{"name": "PC"}]})];

        let report = validate(&raw, &enriched);

        assert_eq!(report.summary.status, ReportStatus::Success);
        assert_eq!(report.summary.data_quality_score, 25.0);
        assert_eq!(report.percentages.enriched.platforms_rate, "100.00%");
        assert_eq!(report.percentages.enriched.companies_rate, "0.00%");
    }

    #[test]
    fn unexpected_enriched_game_also_warns() {
        let raw = vec![json!({"id": 1, "name": "A"})];
        let enriched = vec![json!({"id": 1}), json!({"id": 9})];
        let report = validate(&raw, &enriched);
        assert_eq!(report.summary.status, ReportStatus::Warning);
        assert_eq!(report.stats.comparison.unexpected_games, vec![9]);
        assert!(report.stats.comparison.missing_games.is_empty());
    }

    #[test]
    fn raw_block_counts_presence_and_nulls() {
        let raw = vec![
            json!({"id": 1, "name": "A", "summary": null}),
            json!({"id": 2, "name": "", "summary": "s"}),
        ];
        let report = validate(&raw, &[]);
        let block = &report.stats.raw;

        assert_eq!(block.games_with_basic_info, 1);
        assert_eq!(block.field_counts["summary"], 1);
        assert_eq!(block.missing_fields["summary"], 1);
        assert_eq!(report.percentages.raw.field_completeness["id"], "100.00%");
        assert_eq!(report.percentages.raw.field_completeness["summary"], "50.00%");
    }

    #[test]
    fn integrity_compares_passthrough_fields() {
        let raw = vec![json!({"id": 1, "name": "A", "total_rating": 80.0, "summary": null})];
        let enriched = vec![json!({"id": 1, "name": "A2", "total_rating": 80.0})];

        let report = validate(&raw, &enriched);
        let integrity = &report.stats.comparison.data_integrity;

        assert_eq!(integrity["name"], FieldIntegrity { matches: 0, mismatches: 1 });
        assert_eq!(integrity["total_rating"], FieldIntegrity { matches: 1, mismatches: 0 });
        assert_eq!(integrity["summary"], FieldIntegrity { matches: 1, mismatches: 0 });
        assert_eq!(integrity.len(), PASSTHROUGH_FIELDS.len());
    }

    #[test]
    fn presence_follows_truthiness() {
        assert!(is_present(Some(&json!(true))));
        assert!(is_present(Some(&json!({"a": 1}))));
        assert!(is_present(Some(&json!(80))));
        assert!(!is_present(Some(&json!(false))));
        assert!(!is_present(Some(&json!(0))));
        assert!(!is_present(Some(&json!([]))));
        assert!(!is_present(Some(&Value::Null)));
        assert!(!is_present(None));
    }

    #[test]
    fn empty_sets_do_not_divide_by_zero() {
        let report = validate(&[], &[]);
        assert_eq!(report.summary.status, ReportStatus::Success);
        assert_eq!(report.summary.data_quality_score, 0.0);
        assert_eq!(report.percentages.raw.games_with_basic_info, "0.00%");
    }

    #[tokio::test]
    async fn verify_files_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = HarvestConfig {
            output_dir: dir.path().to_path_buf(),
            ..HarvestConfig::default()
        };
        std::fs::write(cfg.raw_games_path(), br#"[{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]"#).unwrap();
        std::fs::write(cfg.enriched_games_path(), br#"[{"id": 1, "name": "A", "genres": []}]"#).unwrap();

        let report = verify_files(&cfg).await.unwrap();
        assert_eq!(report.stats.comparison.missing_games, vec![2]);

        let written: Value = serde_json::from_slice(&std::fs::read(cfg.report_path()).unwrap()).unwrap();
        assert_eq!(written["summary"]["status"], json!("WARNING"));
        assert_eq!(written["stats"]["comparison"]["missingGames"], json!([2]));
    }

    #[tokio::test]
    async fn missing_enriched_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = HarvestConfig {
            output_dir: dir.path().to_path_buf(),
            ..HarvestConfig::default()
        };
        std::fs::write(cfg.raw_games_path(), b"[]").unwrap();
        let err = verify_files(&cfg).await.unwrap_err();
        assert_eq!(err.phase(), Phase::Verify);
        assert!(!cfg.report_path().exists());
    }
}
