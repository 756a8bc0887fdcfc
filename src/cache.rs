// Time-bounded file cache in front of the realtime feed.
//
// Staleness is decided purely by the cache file's age against the wall clock:
// no ETags, no content hashing. The clock and the fetch capability are
// injected so staleness logic can be tested without real timestamps or a
// network.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use serde_json::Value;

use crate::error::{PlannerError, Result};

/// Snapshots older than this are refetched.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fetch capability: retrieve a URL and parse the body as JSON.
pub trait FetchJson {
    fn fetch(&self, url: &str) -> Result<Value>;
}

/// Production fetcher on a blocking reqwest client with a request timeout, so
/// an unreachable upstream bounds worst-case latency instead of hanging.
pub struct HttpFetch {
    client: reqwest::blocking::Client,
}

impl HttpFetch {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                PlannerError::FeedUnavailable(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(HttpFetch { client })
    }
}

impl FetchJson for HttpFetch {
    fn fetch(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| PlannerError::FeedUnavailable(format!("Request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PlannerError::FeedUnavailable(format!(
                "{url} answered with status {}",
                response.status()
            )));
        }

        response
            .json()
            .map_err(|e| PlannerError::FeedUnavailable(format!("{url} returned invalid JSON: {e}")))
    }
}

pub struct FeedCache<F: FetchJson = HttpFetch> {
    fetcher: F,
    max_age: Duration,
    clock: Box<dyn Fn() -> SystemTime>,
}

impl FeedCache<HttpFetch> {
    pub fn new(max_age: Duration) -> Result<Self> {
        Ok(FeedCache::with_parts(
            HttpFetch::new()?,
            max_age,
            Box::new(SystemTime::now),
        ))
    }
}

impl<F: FetchJson> FeedCache<F> {
    pub fn with_parts(fetcher: F, max_age: Duration, clock: Box<dyn Fn() -> SystemTime>) -> Self {
        FeedCache {
            fetcher,
            max_age,
            clock,
        }
    }

    /// Returns the feed snapshot, reading `cache_file` while it is fresh and
    /// fetching `url` otherwise.
    ///
    /// A fetched snapshot overwrites the cache file wholesale; a write
    /// failure is only a warning since the caller already has the data. A
    /// fetch failure surfaces as `FeedUnavailable` — distinguishable from a
    /// feed that is reachable but empty.
    pub fn get_data(&self, url: &str, cache_file: &Path) -> Result<Value> {
        if self.cache_is_fresh(cache_file) {
            match Self::read_cache(cache_file) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    // Unreadable or corrupt cache counts as stale.
                    eprintln!("⚠️  Could not use cache {cache_file:?} ({e}), refetching");
                }
            }
        }

        let value = self.fetcher.fetch(url)?;

        match serde_json::to_string_pretty(&value) {
            Ok(body) => {
                if let Err(e) = fs::write(cache_file, body) {
                    eprintln!("⚠️  Could not write cache {cache_file:?}: {e}");
                }
            }
            Err(e) => eprintln!("⚠️  Could not serialize snapshot for {cache_file:?}: {e}"),
        }

        Ok(value)
    }

    fn cache_is_fresh(&self, cache_file: &Path) -> bool {
        let Ok(modified) = fs::metadata(cache_file).and_then(|m| m.modified()) else {
            return false;
        };
        match (self.clock)().duration_since(modified) {
            Ok(age) => age < self.max_age,
            // A modification time in the future counts as fresh.
            Err(_) => true,
        }
    }

    fn read_cache(cache_file: &Path) -> Result<Value> {
        let contents = fs::read_to_string(cache_file).map_err(|e| PlannerError::SourceUnreadable {
            path: cache_file.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| PlannerError::SourceUnreadable {
            path: cache_file.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
