//! HTTP response cache for aggregator lookups
//!
//! Keyed by the full request URL, so two requests share an entry only when
//! every query parameter matches. Lifetimes come from the response's
//! `Cache-Control` header; anything without a positive `max-age` is not kept.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug, Clone)]
struct CachedBody {
    body: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CachedBody>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh body for `url`, if any
    pub async fn get(&self, url: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(url)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.body.clone())
    }

    /// Keep `body` for as long as `cache_control` allows. Returns whether it
    /// was stored.
    pub async fn store(&self, url: &str, body: &str, cache_control: Option<&str>) -> bool {
        let Some(ttl) = cache_control.and_then(ttl_from_header) else {
            return false;
        };

        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            url.to_string(),
            CachedBody {
                body: body.to_string(),
                expires_at: now + ttl,
            },
        );
        trace!("Cached {} for {:?}", url, ttl);
        true
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// How long a response may be reused, per its `Cache-Control` header
pub fn ttl_from_header(header: &str) -> Option<Duration> {
    let mut max_age = None;

    for directive in header.split(',').map(|d| d.trim().to_ascii_lowercase()) {
        match directive.as_str() {
            "no-store" | "no-cache" | "private" => return None,
            d => {
                if let Some(value) = d.strip_prefix("max-age=") {
                    max_age = value.trim_matches('"').parse::<u64>().ok();
                }
            }
        }
    }

    max_age.filter(|&secs| secs > 0).map(Duration::from_secs)
}
