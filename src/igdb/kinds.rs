use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound IGDB accepts for `limit`.
pub const IGDB_MAX_LIMIT: usize = 500;
pub const DEFAULT_BATCH_SIZE: usize = 50;

const GAME_FIELDS: &str = "name,cover,first_release_date,game_modes,involved_companies,platforms,summary,total_rating,total_rating_count,genres";

/// Every catalog endpoint the harvester talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Games,
    Platforms,
    Genres,
    GameModes,
    InvolvedCompanies,
    Companies,
    CompanyWebsites,
}

impl EntityKind {
    pub const RELATED: [EntityKind; 6] = [
        EntityKind::Platforms,
        EntityKind::Genres,
        EntityKind::GameModes,
        EntityKind::InvolvedCompanies,
        EntityKind::Companies,
        EntityKind::CompanyWebsites,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Games => "games",
            EntityKind::Platforms => "platforms",
            EntityKind::Genres => "genres",
            EntityKind::GameModes => "game_modes",
            EntityKind::InvolvedCompanies => "involved_companies",
            EntityKind::Companies => "companies",
            EntityKind::CompanyWebsites => "company_websites",
        }
    }

    /// Path segment under the API base URL.
    pub fn endpoint_path(self) -> &'static str {
        self.as_str()
    }

    /// Comma separated field selection for this endpoint.
    pub fn fields(self) -> &'static str {
        match self {
            EntityKind::Games => GAME_FIELDS,
            EntityKind::Platforms => "name,abbreviation",
            EntityKind::Genres | EntityKind::GameModes => "name",
            EntityKind::InvolvedCompanies => "company,developer,publisher",
            EntityKind::Companies => "name,websites",
            EntityKind::CompanyWebsites => "url",
        }
    }

    pub fn endpoint_url(self, api_base: &str) -> String {
        format!("{}/{}", api_base.trim_end_matches('/'), self.endpoint_path())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let kind = match normalized.as_str() {
            "games" => EntityKind::Games,
            "platforms" => EntityKind::Platforms,
            "genres" => EntityKind::Genres,
            "game_modes" => EntityKind::GameModes,
            "involved_companies" => EntityKind::InvolvedCompanies,
            "companies" => EntityKind::Companies,
            "company_websites" => EntityKind::CompanyWebsites,
            other => return Err(format!("unknown entity kind: {other}")),
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_tolerates_trailing_slash() {
        assert_eq!(
            EntityKind::CompanyWebsites.endpoint_url("https://api.igdb.com/v4/"),
            "https://api.igdb.com/v4/company_websites"
        );
    }

    #[test]
    fn kind_parses_kebab_and_snake() {
        assert_eq!(
            "game-modes".parse::<EntityKind>().unwrap(),
            EntityKind::GameModes
        );
        assert_eq!(
            " Involved_Companies ".parse::<EntityKind>().unwrap(),
            EntityKind::InvolvedCompanies
        );
        assert!("characters".parse::<EntityKind>().is_err());
    }
}
