//! In-memory catalog used by unit tests.
use crate::error::FetchError;
use crate::igdb::kinds::EntityKind;
use crate::igdb::transport::CatalogTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct FakeCatalog {
    rows: HashMap<EntityKind, Vec<Value>>,
    failing: HashMap<EntityKind, HashSet<i64>>,
    /// offset -> remaining failures for `/games` pages
    failing_pages: Mutex<HashMap<usize, u32>>,
    calls: Mutex<Vec<(String, String)>>,
    /// Cancels the token while answering the nth call (1-based) to the kind.
    cancel_on: Option<(EntityKind, usize, CancellationToken)>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: EntityKind, rows: Vec<Value>) -> Self {
        self.rows.entry(kind).or_default().extend(rows);
        self
    }

    /// Any chunk containing one of `ids` answers HTTP 500.
    pub fn failing_ids(mut self, kind: EntityKind, ids: impl IntoIterator<Item = i64>) -> Self {
        self.failing.entry(kind).or_default().extend(ids);
        self
    }

    pub fn failing_page(self, offset: usize, times: u32) -> Self {
        self.failing_pages
            .lock()
            .unwrap()
            .insert(offset, times);
        self
    }

    pub fn cancel_during_call(mut self, kind: EntityKind, nth: usize, token: CancellationToken) -> Self {
        self.cancel_on = Some((kind, nth, token));
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, kind: EntityKind) -> usize {
        let suffix = format!("/{}", kind.endpoint_path());
        self.calls()
            .iter()
            .filter(|(endpoint, _)| endpoint.ends_with(&suffix))
            .count()
    }
}

fn clause_number(query: &str, keyword: &str) -> Option<usize> {
    query
        .split(';')
        .map(str::trim)
        .find_map(|clause| clause.strip_prefix(keyword))
        .and_then(|rest| rest.trim().parse().ok())
}

fn requested_ids(query: &str) -> Option<Vec<i64>> {
    let start = query.find("where id = (")? + "where id = (".len();
    let end = query[start..].find(')')? + start;
    Some(
        query[start..end]
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect(),
    )
}

#[async_trait]
impl CatalogTransport for FakeCatalog {
    async fn post(&self, endpoint_url: &str, query: &str) -> Result<Vec<Value>, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint_url.to_string(), query.to_string()));
        let segment = endpoint_url.rsplit('/').next().unwrap_or_default();
        let kind: EntityKind = segment
            .parse()
            .map_err(|e: String| FetchError::new(endpoint_url, Some(404), e))?;
        if let Some((target, nth, token)) = &self.cancel_on {
            if *target == kind && self.calls_to(kind) == *nth {
                token.cancel();
            }
        }
        let rows = self.rows.get(&kind).cloned().unwrap_or_default();

        match requested_ids(query) {
            Some(ids) => {
                let failing = self.failing.get(&kind);
                if ids
                    .iter()
                    .any(|id| failing.is_some_and(|set| set.contains(id)))
                {
                    return Err(FetchError::new(endpoint_url, Some(500), "injected failure"));
                }
                Ok(rows
                    .into_iter()
                    .filter(|row| {
                        row.get("id")
                            .and_then(Value::as_i64)
                            .is_some_and(|id| ids.contains(&id))
                    })
                    .collect())
            }
            None => {
                let offset = clause_number(query, "offset").unwrap_or(0);
                let limit = clause_number(query, "limit").unwrap_or(usize::MAX);
                {
                    let mut pages = self.failing_pages.lock().unwrap();
                    if let Some(remaining) = pages.get_mut(&offset) {
                        if *remaining > 0 {
                            *remaining -= 1;
                            return Err(FetchError::new(endpoint_url, Some(503), "injected page failure"));
                        }
                    }
                }
                Ok(rows.into_iter().skip(offset).take(limit).collect())
            }
        }
    }
}
