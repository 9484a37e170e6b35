//! Rate-limited access to the catalog.
//!
//! Two limits apply to every call:
//! - a token bucket shared by all call sites (the per-credential quota), and
//! - a minimum gap on each endpoint stream, measured from the end of the
//!   previous call on that endpoint.
//!
//! Concurrent relation kinds therefore only contend on the shared bucket, not
//! on each other's spacing.
use crate::error::FetchError;
use crate::harvest::config::HarvestConfig;
use crate::igdb::kinds::EntityKind;
use crate::igdb::transport::CatalogTransport;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Fetcher {
    transport: Arc<dyn CatalogTransport>,
    api_base: String,
    limiter: DefaultDirectRateLimiter,
    min_delay: Duration,
    last_call_end: Mutex<HashMap<EntityKind, Instant>>,
    in_flight: AtomicUsize,
    calls_issued: AtomicU64,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn CatalogTransport>,
        api_base: impl Into<String>,
        requests_per_second: u32,
        min_delay: Duration,
    ) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            transport,
            api_base: api_base.into(),
            limiter: RateLimiter::direct(Quota::per_second(rps)),
            min_delay,
            last_call_end: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            calls_issued: AtomicU64::new(0),
        }
    }

    pub fn from_config(transport: Arc<dyn CatalogTransport>, cfg: &HarvestConfig) -> Self {
        Self::new(
            transport,
            cfg.api_base.clone(),
            cfg.requests_per_second,
            cfg.min_delay,
        )
    }

    /// Calls currently awaiting the transport. Diagnostics only.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn calls_issued(&self) -> u64 {
        self.calls_issued.load(Ordering::SeqCst)
    }

    async fn wait_for_endpoint(&self, kind: EntityKind) {
        if self.min_delay.is_zero() {
            return;
        }
        let ready_at = {
            let guard = self.last_call_end.lock().await;
            guard.get(&kind).map(|end| *end + self.min_delay)
        };
        if let Some(at) = ready_at {
            tokio::time::sleep_until(at).await;
        }
    }

    /// Issues one query against `kind`'s endpoint. Never retries.
    pub async fn fetch(&self, kind: EntityKind, query: &str) -> Result<Vec<Value>, FetchError> {
        self.wait_for_endpoint(kind).await;
        self.limiter.until_ready().await;

        let endpoint = kind.endpoint_url(&self.api_base);
        let result = {
            let _guard = InFlight::enter(&self.in_flight);
            self.calls_issued.fetch_add(1, Ordering::SeqCst);
            debug!(target = "fetcher", %kind, query, in_flight = self.in_flight(), "catalog call");
            self.transport.post(&endpoint, query).await
        };
        self.last_call_end.lock().await.insert(kind, Instant::now());

        if let Err(err) = &result {
            warn!(
                target = "fetcher",
                %kind,
                endpoint = %err.endpoint,
                status = ?err.status,
                cause = %err.cause,
                "catalog call failed"
            );
        }
        result
    }
}
