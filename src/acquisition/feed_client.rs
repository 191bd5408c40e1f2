//! Feed Client — conditional-GET poller for the aircraft JSON feed.
//!
//! One shared keep-alive connection per antenna (the pool keeps a single
//! idle socket), 3 s request timeout. Remembers the last `ETag` /
//! `Last-Modified` of a successful response and replays them on the next
//! request; a `304 Not Modified` answer reuses the cached body. At most one
//! request is in flight — concurrent callers await the same shared future.
//! No retries here; the orchestrator simply polls again next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::FeedSnapshot;

/// Request timeout for a single feed poll.
const FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Feed client errors.
///
/// Clone-able so a single failure can be observed by every caller sharing
/// the in-flight fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("feed returned status {0}")]
    Status(u16),
    #[error("feed JSON parse error: {0}")]
    Parse(String),
    #[error("304 received but no cached body is available")]
    EmptyCache,
}

/// Conditional-request validators plus the body they validate.
#[derive(Default)]
struct ValidatorCache {
    etag: Option<String>,
    last_modified: Option<String>,
    body: Option<Arc<FeedSnapshot>>,
}

type InFlightFetch = Shared<BoxFuture<'static, Result<Arc<FeedSnapshot>, FeedError>>>;

/// HTTP client for one antenna's aircraft feed.
#[derive(Clone)]
pub struct FeedClient {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    http: reqwest::Client,
    antenna_id: String,
    url: String,
    cache: Mutex<ValidatorCache>,
    in_flight: Mutex<Option<InFlightFetch>>,
    cache_hits: AtomicU64,
}

impl FeedClient {
    /// Create a new feed client for the given antenna endpoint.
    pub fn new(antenna_id: &str, url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .pool_max_idle_per_host(1)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            inner: Arc::new(FeedInner {
                http,
                antenna_id: antenna_id.to_string(),
                url: url.to_string(),
                cache: Mutex::new(ValidatorCache::default()),
                in_flight: Mutex::new(None),
                cache_hits: AtomicU64::new(0),
            }),
        }
    }

    /// Fetch the current feed state.
    ///
    /// Joins an already in-flight request when one exists; otherwise starts
    /// one and publishes it for concurrent callers. The in-flight slot is
    /// cleared once the request settles.
    pub async fn fetch(&self) -> Result<Arc<FeedSnapshot>, FeedError> {
        let fut = {
            let mut slot = self.inner.in_flight.lock().await;
            if let Some(existing) = slot.as_ref() {
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let fut: InFlightFetch = async move {
                    let result = inner.do_fetch().await;
                    *inner.in_flight.lock().await = None;
                    result
                }
                .boxed()
                .shared();
                *slot = Some(fut.clone());
                fut
            }
        };

        fut.await
    }

    /// Number of polls answered from the validator cache (304 responses).
    pub fn cache_hits(&self) -> u64 {
        self.inner.cache_hits.load(Ordering::Relaxed)
    }

    /// Antenna identifier this client polls.
    pub fn antenna_id(&self) -> &str {
        &self.inner.antenna_id
    }
}

impl FeedInner {
    async fn do_fetch(&self) -> Result<Arc<FeedSnapshot>, FeedError> {
        let mut req = self.http.get(&self.url);
        {
            let cache = self.cache.lock().await;
            if let Some(etag) = &cache.etag {
                req = req.header(header::IF_NONE_MATCH, etag);
            }
            if let Some(lm) = &cache.last_modified {
                req = req.header(header::IF_MODIFIED_SINCE, lm);
            }
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.drop_cache().await;
                return Err(FeedError::Http(e.to_string()));
            }
        };

        match resp.status() {
            StatusCode::NOT_MODIFIED => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                let cache = self.cache.lock().await;
                cache.body.clone().ok_or(FeedError::EmptyCache)
            }
            StatusCode::OK => {
                let etag = header_string(&resp, header::ETAG);
                let last_modified = header_string(&resp, header::LAST_MODIFIED);

                let bytes = match resp.bytes().await {
                    Ok(b) => b,
                    Err(e) => {
                        self.drop_cache().await;
                        return Err(FeedError::Http(e.to_string()));
                    }
                };
                let snapshot: FeedSnapshot = match serde_json::from_slice(&bytes) {
                    Ok(s) => s,
                    Err(e) => {
                        self.drop_cache().await;
                        return Err(FeedError::Parse(e.to_string()));
                    }
                };

                let body = Arc::new(snapshot);
                let mut cache = self.cache.lock().await;
                cache.etag = etag;
                cache.last_modified = last_modified;
                cache.body = Some(Arc::clone(&body));
                debug!(
                    antenna = %self.antenna_id,
                    aircraft = body.aircraft.len(),
                    "Feed poll returned fresh body"
                );
                Ok(body)
            }
            status => {
                warn!(antenna = %self.antenna_id, status = %status, "Feed poll rejected");
                self.drop_cache().await;
                Err(FeedError::Status(status.as_u16()))
            }
        }
    }

    async fn drop_cache(&self) {
        let mut cache = self.cache.lock().await;
        *cache = ValidatorCache::default();
    }
}

fn header_string(resp: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
