use crate::harvest::resolver::RelatedLookups;
use crate::harvest::stats::{Relation, RunStats};
use crate::igdb::kinds::EntityKind;
use crate::igdb::models::{
    CompanyRole, EnrichedCompany, EnrichedRecord, GameRecord, NamedRef, PlatformRef,
};
use tracing::debug;

/// Joins games against resolved lookups.
///
/// Unresolved references are omitted and the game id is appended to
/// `missingRelationships[relation]`; a record is never dropped over one
/// missing relation. Output is a pure function of `(games, lookups)`.
pub fn stitch(games: &[GameRecord], lookups: &RelatedLookups, stats: &RunStats) -> Vec<EnrichedRecord> {
    let enriched: Vec<EnrichedRecord> = games
        .iter()
        .map(|game| stitch_one(game, lookups, stats))
        .collect();
    debug!(target = "stitcher", games = games.len(), "page stitched");
    enriched
}

fn stitch_one(game: &GameRecord, lookups: &RelatedLookups, stats: &RunStats) -> EnrichedRecord {
    let platforms: Vec<PlatformRef> = game
        .platforms
        .iter()
        .filter_map(|id| {
            let found = lookups.get(EntityKind::Platforms, *id);
            if found.is_none() {
                stats.record_missing(Relation::Platforms, game.id);
            }
            found
        })
        .map(|platform| PlatformRef {
            name: platform.name.clone(),
            abbreviation: platform.abbreviation.clone(),
        })
        .collect();

    let game_modes = named_refs(game, &game.game_modes, EntityKind::GameModes, Relation::GameModes, lookups, stats);
    let genres = named_refs(game, &game.genres, EntityKind::Genres, Relation::Genres, lookups, stats);

    let companies: Vec<EnrichedCompany> = game
        .involved_companies
        .iter()
        .filter_map(|link_id| {
            let company = resolve_company(game.id, *link_id, lookups, stats);
            if company.is_none() {
                stats.record_missing(Relation::Companies, game.id);
            }
            company
        })
        .collect();

    for (relation, resolved) in [
        (Relation::Companies, !companies.is_empty()),
        (Relation::Platforms, !platforms.is_empty()),
        (Relation::GameModes, !game_modes.is_empty()),
        (Relation::Genres, !genres.is_empty()),
    ] {
        if resolved {
            stats.record_game_with(relation);
        }
    }

    let mut extra = game.extra.clone();
    extra.remove("companies");

    EnrichedRecord {
        id: game.id,
        companies,
        platforms,
        game_modes,
        genres,
        extra,
    }
}

fn named_refs(
    game: &GameRecord,
    ids: &[i64],
    kind: EntityKind,
    relation: Relation,
    lookups: &RelatedLookups,
    stats: &RunStats,
) -> Vec<NamedRef> {
    ids.iter()
        .filter_map(|id| match lookups.get(kind, *id) {
            Some(entity) => Some(NamedRef {
                name: entity.name.clone(),
            }),
            None => {
                stats.record_missing(relation, game.id);
                None
            }
        })
        .collect()
}

/// Link -> company, both hops required. Websites that failed to resolve are
/// dropped from the list without dropping the company.
fn resolve_company(
    game_id: i64,
    link_id: i64,
    lookups: &RelatedLookups,
    stats: &RunStats,
) -> Option<EnrichedCompany> {
    let link = lookups.get(EntityKind::InvolvedCompanies, link_id)?;
    let company = lookups.get(EntityKind::Companies, link.company?)?;

    let websites = company
        .websites
        .iter()
        .filter_map(|website_id| match lookups.get(EntityKind::CompanyWebsites, *website_id) {
            Some(site) => site.url.clone(),
            None => {
                stats.record_missing(Relation::CompanyWebsites, game_id);
                None
            }
        })
        .collect();

    Some(EnrichedCompany {
        name: company.name.clone(),
        role: CompanyRole {
            developer: link.developer.unwrap_or(false),
            publisher: link.publisher.unwrap_or(false),
        },
        websites,
    })
}
