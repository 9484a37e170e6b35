use crate::harvest::resolver::Lookup;
use crate::igdb::kinds::EntityKind;
use crate::igdb::models::GameRecord;
use std::collections::{BTreeMap, BTreeSet};

/// Distinct foreign IDs per target kind. Sorted, so chunking is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    by_kind: BTreeMap<EntityKind, BTreeSet<i64>>,
}

impl ReferenceSet {
    pub fn ids(&self, kind: EntityKind) -> BTreeSet<i64> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.by_kind.get(&kind).map_or(0, BTreeSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(BTreeSet::is_empty)
    }

    fn extend(&mut self, kind: EntityKind, ids: &[i64]) {
        if ids.is_empty() {
            return;
        }
        self.by_kind.entry(kind).or_default().extend(ids.iter().copied());
    }
}

/// Direct references from a page of games. Absent or empty lists contribute nothing.
pub fn collect_references(games: &[GameRecord]) -> ReferenceSet {
    let mut refs = ReferenceSet::default();
    for game in games {
        refs.extend(EntityKind::Platforms, &game.platforms);
        refs.extend(EntityKind::Genres, &game.genres);
        refs.extend(EntityKind::GameModes, &game.game_modes);
        refs.extend(EntityKind::InvolvedCompanies, &game.involved_companies);
    }
    refs
}

/// Second hop: companies named by the resolved links among `link_ids`.
pub fn company_ids(links: &Lookup, link_ids: &BTreeSet<i64>) -> BTreeSet<i64> {
    link_ids
        .iter()
        .filter_map(|id| links.get(id))
        .filter_map(|link| link.company)
        .collect()
}

/// Third hop: websites listed on the resolved companies among `company_ids`.
pub fn website_ids(companies: &Lookup, company_ids: &BTreeSet<i64>) -> BTreeSet<i64> {
    company_ids
        .iter()
        .filter_map(|id| companies.get(id))
        .flat_map(|company| company.websites.iter().copied())
        .collect()
}
