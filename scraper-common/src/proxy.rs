use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use store::Client;
use tracing::warn;

use crate::types::{now_ms, ProxyEntry};

const PROXY_STATS_TTL_SECS: u64 = 30 * 24 * 60 * 60;

fn proxy_stats_key(prefix: &str, url: &str) -> String {
    format!("{prefix}proxy:{url}:stats")
}

/// Proxy URLs carry credentials; never put one in a log line verbatim.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("?")
        ),
        Err(_) => "<unparseable-proxy-url>".to_string(),
    }
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct PersistedStats {
    #[serde(rename = "successCount")]
    success_count: u64,
    #[serde(rename = "failureCount")]
    failure_count: u64,
}

/// Round-robin pool with persisted success/failure counters. One instance is
/// owned by the process entry point and shared (via `Arc`) across job loops:
/// in-memory state mutated under a plain mutex, cross-process counters
/// reconciled through the store.
pub struct ProxyManager {
    store: Arc<dyn Client>,
    key_prefix: String,
    pool: Mutex<Vec<ProxyEntry>>,
    cursor: AtomicUsize,
}

impl ProxyManager {
    pub fn new(store: Arc<dyn Client>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            pool: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Loads `urls` into the pool and hydrates persisted counters. Reads are
    /// issued concurrently (the store trait has no native multi-get) rather
    /// than one at a time, approximating a single batched read without
    /// requiring a new store primitive.
    pub async fn initialize(&self, urls: Vec<String>) {
        let fetches = urls.iter().map(|url| {
            let store = self.store.clone();
            let key = proxy_stats_key(&self.key_prefix, url);
            async move { store.get(&key).await }
        });
        let raw_stats = futures_util::future::join_all(fetches).await;

        let mut pool = Vec::with_capacity(urls.len());
        for (url, raw) in urls.into_iter().zip(raw_stats) {
            let stats = match raw {
                Ok(payload) => match serde_json::from_str::<PersistedStats>(&payload) {
                    Ok(stats) => stats,
                    Err(err) => {
                        warn!(proxy = %redact(&url), error = %err, "malformed proxy stats record, resetting to zero");
                        PersistedStats::default()
                    }
                },
                Err(store::StoreError::NotFound) => PersistedStats::default(),
                Err(err) => {
                    warn!(proxy = %redact(&url), error = %err, "failed to read proxy stats, resetting to zero");
                    PersistedStats::default()
                }
            };
            pool.push(ProxyEntry {
                url,
                success_count: stats.success_count,
                failure_count: stats.failure_count,
                last_used_at_ms: 0,
            });
        }

        *self.pool.lock().expect("proxy pool mutex poisoned") = pool;
    }

    /// O(1) round-robin selection; stamps `lastUsedAt`. `None` if the pool is
    /// empty, signaling the dispatcher to fall back to a direct connection.
    pub fn next(&self) -> Option<ProxyEntry> {
        let mut pool = self.pool.lock().expect("proxy pool mutex poisoned");
        if pool.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % pool.len();
        pool[index].last_used_at_ms = now_ms();
        Some(pool[index].clone())
    }

    /// Increments the in-memory counter and fires a best-effort persisted
    /// write. Unknown `proxy_url` is logged and ignored, never an error the
    /// caller has to handle.
    pub fn report(&self, proxy_url: &str, success: bool) {
        let updated = {
            let mut pool = self.pool.lock().expect("proxy pool mutex poisoned");
            let Some(entry) = pool.iter_mut().find(|e| e.url == proxy_url) else {
                warn!(proxy = %redact(proxy_url), "report() for unknown proxy url, ignoring");
                return;
            };
            if success {
                entry.success_count += 1;
            } else {
                entry.failure_count += 1;
            }
            entry.clone()
        };

        let store = self.store.clone();
        let key = proxy_stats_key(&self.key_prefix, proxy_url);
        let payload = serde_json::to_string(&PersistedStats {
            success_count: updated.success_count,
            failure_count: updated.failure_count,
        });
        let Ok(payload) = payload else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = store.set_ex(&key, &payload, PROXY_STATS_TTL_SECS).await {
                warn!(error = %err, "failed to persist proxy stats (fire-and-forget)");
            }
        });
    }

    /// Deep copy of the pool, for metrics/introspection.
    pub fn stats(&self) -> Vec<ProxyEntry> {
        self.pool.lock().expect("proxy pool mutex poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MockStoreClient;

    fn manager() -> ProxyManager {
        ProxyManager::new(Arc::new(MockStoreClient::new()), "asc:")
    }

    #[tokio::test]
    async fn next_returns_none_on_empty_pool() {
        let manager = manager();
        manager.initialize(vec![]).await;
        assert!(manager.next().is_none());
    }

    #[tokio::test]
    async fn rotation_is_fair_across_k_calls() {
        let manager = manager();
        manager
            .initialize(vec![
                "http://p1.example".to_string(),
                "http://p2.example".to_string(),
                "http://p3.example".to_string(),
            ])
            .await;

        let mut counts = std::collections::HashMap::new();
        for _ in 0..10 {
            let entry = manager.next().unwrap();
            *counts.entry(entry.url).or_insert(0) += 1;
        }
        // 10 calls over 3 proxies: floor(10/3)=3, ceil(10/3)=4.
        for count in counts.values() {
            assert!(*count == 3 || *count == 4);
        }
    }

    #[tokio::test]
    async fn report_increments_counters_and_ignores_unknown_url() {
        let manager = manager();
        manager
            .initialize(vec!["http://p1.example".to_string()])
            .await;

        manager.report("http://p1.example", true);
        manager.report("http://unknown.example", false);

        let stats = manager.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].success_count, 1);
        assert_eq!(stats[0].failure_count, 0);
    }
}
