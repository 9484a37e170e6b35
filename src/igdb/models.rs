use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Accepts `null`, a missing key, or an array, keeping only integral IDs.
/// Catalog dumps occasionally carry `null` entries; those never become references.
fn id_list<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_i64)
        .collect())
}

/// A game as returned by the `/games` endpoint.
///
/// Only the reference lists are typed. Every other field (name, summary,
/// ratings, ...) stays as raw JSON in `extra` and passes through enrichment
/// byte-for-byte, so `80` is never rewritten as `80.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "id_list")]
    pub platforms: Vec<i64>,
    #[serde(default, deserialize_with = "id_list")]
    pub genres: Vec<i64>,
    #[serde(default, deserialize_with = "id_list")]
    pub game_modes: Vec<i64>,
    #[serde(default, deserialize_with = "id_list")]
    pub involved_companies: Vec<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Any secondary catalog object. Which optional fields are populated depends
/// on the endpoint it came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Involved-company link: target company id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<bool>,
    /// Company: website ids.
    #[serde(default, deserialize_with = "id_list", skip_serializing_if = "Vec::is_empty")]
    pub websites: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRole {
    pub developer: bool,
    pub publisher: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedCompany {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: CompanyRole,
    #[serde(default)]
    pub websites: Vec<String>,
}

/// A game with every reference replaced by the resolved entity's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub id: i64,
    #[serde(default)]
    pub companies: Vec<EnrichedCompany>,
    #[serde(default)]
    pub platforms: Vec<PlatformRef>,
    #[serde(default)]
    pub game_modes: Vec<NamedRef>,
    #[serde(default)]
    pub genres: Vec<NamedRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnrichedRecord {
    pub fn name(&self) -> Option<&str> {
        self.extra.get("name").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn game_record_drops_null_reference_ids_and_keeps_extras() {
        let game: GameRecord = serde_json::from_value(json!({
            "id": 7,
            "name": "Quake",
            "platforms": [6, null, 14],
            "genres": null,
            "summary": "Frag.",
            "cover": 1234
        }))
        .unwrap();
        assert_eq!(game.platforms, vec![6, 14]);
        assert!(game.genres.is_empty());
        assert!(game.involved_companies.is_empty());
        assert_eq!(game.extra.get("summary"), Some(&json!("Frag.")));
        assert_eq!(game.extra.get("cover"), Some(&json!(1234)));
    }

    #[test]
    fn related_entity_requires_id() {
        let ok: Result<RelatedEntity, _> =
            serde_json::from_value(json!({"id": 3, "company": 9, "developer": true}));
        let entity = ok.unwrap();
        assert_eq!(entity.company, Some(9));
        assert_eq!(entity.publisher, None);

        let missing: Result<RelatedEntity, _> = serde_json::from_value(json!({"name": "x"}));
        assert!(missing.is_err());
    }

    #[test]
    fn scalars_round_trip_without_retyping() {
        let raw = json!({
            "id": 1,
            "name": "A",
            "total_rating": 80,
            "first_release_date": 755222400,
            "summary": null
        });
        let game: GameRecord = serde_json::from_value(raw).unwrap();
        let record = EnrichedRecord {
            id: game.id,
            companies: Vec::new(),
            platforms: vec![PlatformRef {
                name: Some("PC".into()),
                abbreviation: None,
            }],
            game_modes: Vec::new(),
            genres: Vec::new(),
            extra: game.extra,
        };
        let text = serde_json::to_string(&record).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["total_rating"], json!(80));
        assert_eq!(value["platforms"], json!([{"name": "PC"}]));
        assert_eq!(record.name(), Some("A"));
    }

    #[test]
    fn odd_scalar_types_do_not_reject_the_record() {
        let game: GameRecord =
            serde_json::from_value(json!({"id": 2, "name": 42, "total_rating": "n/a"})).unwrap();
        assert_eq!(game.extra.get("name"), Some(&json!(42)));
        assert_eq!(game.extra.get("total_rating"), Some(&json!("n/a")));
    }
}
