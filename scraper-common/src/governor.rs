use std::collections::HashMap;
use std::sync::Arc;

use store::Client;
use tokio::sync::Mutex;
use tracing::warn;

use crate::types::{now_ms, HostState};

const HOST_STATE_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub cooldown_factor: f64,
    pub block_status_codes: Vec<u16>,
    pub block_body_keywords: Vec<String>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 1.5,
            cooldown_factor: 1.1,
            block_status_codes: vec![403, 429, 503],
            block_body_keywords: vec![
                "captcha".to_string(),
                "blocked".to_string(),
                "are you a robot".to_string(),
            ],
        }
    }
}

fn governor_key(prefix: &str, host: &str) -> String {
    format!("{prefix}governor:host:{host}")
}

/// Per-host adaptive delay, shared in-process via `Arc` and cross-process
/// through the store. The cache is a single mutex rather than a sharded map:
/// report calls are cheap (one comparison, one multiply, one fire-and-wait
/// persisted write) and only same-host calls need to serialize, which a
/// single mutex trivially provides.
pub struct FeedbackGovernor {
    store: Arc<dyn Client>,
    key_prefix: String,
    config: GovernorConfig,
    cache: Mutex<HashMap<String, HostState>>,
}

impl FeedbackGovernor {
    pub fn new(store: Arc<dyn Client>, key_prefix: impl Into<String>, config: GovernorConfig) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// True iff `status_code` is a configured block status, or `body`
    /// contains a configured keyword (case-insensitive). An empty body never
    /// matches a keyword.
    pub fn is_blocked(&self, status_code: u16, body: &str) -> bool {
        if self.config.block_status_codes.contains(&status_code) {
            return true;
        }
        if body.is_empty() {
            return false;
        }
        let lower = body.to_ascii_lowercase();
        self.config
            .block_body_keywords
            .iter()
            .any(|kw| lower.contains(&kw.to_ascii_lowercase()))
    }

    /// Cached delay for `host`, hydrating from the store on cache miss and
    /// falling back to a fresh initial state when the store has nothing
    /// either.
    pub async fn delay_for(&self, host: &str) -> u64 {
        let host = host.to_ascii_lowercase();
        let mut cache = self.cache.lock().await;
        if let Some(state) = cache.get(&host) {
            return state.current_delay_ms;
        }

        let state = match self.store.get(&governor_key(&self.key_prefix, &host)).await {
            Ok(payload) => match serde_json::from_str::<HostState>(&payload) {
                Ok(state) => state,
                Err(err) => {
                    warn!(host = %host, error = %err, "malformed host state, starting fresh");
                    self.fresh_state(&host)
                }
            },
            Err(_) => self.fresh_state(&host),
        };
        let delay = state.current_delay_ms;
        cache.insert(host, state);
        delay
    }

    fn fresh_state(&self, host: &str) -> HostState {
        HostState {
            host: host.to_string(),
            current_delay_ms: self.config.initial_delay_ms,
            success_streak: 0,
            last_updated_ms: now_ms(),
        }
    }

    /// Applies a success or block report to `host` and persists the result.
    /// Store errors are logged and never affect the in-memory decision.
    pub async fn report(&self, host: &str, success: bool) {
        let host = host.to_ascii_lowercase();
        let mut cache = self.cache.lock().await;
        let mut state = cache
            .remove(&host)
            .unwrap_or_else(|| self.fresh_state(&host));

        if success {
            state.success_streak += 1;
            if state.success_streak % 10 == 0 && state.current_delay_ms > self.config.initial_delay_ms {
                let cooled = (state.current_delay_ms as f64 / self.config.cooldown_factor).floor() as u64;
                state.current_delay_ms = cooled.max(self.config.initial_delay_ms);
            }
        } else {
            state.success_streak = 0;
            let backed_off = (state.current_delay_ms as f64 * self.config.backoff_factor).ceil() as u64;
            state.current_delay_ms = backed_off.min(self.config.max_delay_ms);
        }
        state.last_updated_ms = now_ms();

        let persisted = state.clone();
        cache.insert(host.clone(), state);
        drop(cache);

        match serde_json::to_string(&persisted) {
            Ok(payload) => {
                if let Err(err) = self
                    .store
                    .set_ex(&governor_key(&self.key_prefix, &host), &payload, HOST_STATE_TTL_SECS)
                    .await
                {
                    warn!(host = %host, error = %err, "failed to persist host state");
                }
            }
            Err(err) => warn!(host = %host, error = %err, "failed to serialize host state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MockStoreClient;

    fn governor(config: GovernorConfig) -> FeedbackGovernor {
        FeedbackGovernor::new(Arc::new(MockStoreClient::new()), "asc:", config)
    }

    #[tokio::test]
    async fn delay_for_creates_initial_state_on_miss() {
        let governor = governor(GovernorConfig::default());
        assert_eq!(governor.delay_for("t.example").await, 1000);
    }

    #[tokio::test]
    async fn block_report_backs_off_and_resets_streak() {
        let governor = governor(GovernorConfig::default());
        governor.delay_for("t.example").await;
        governor.report("t.example", false).await;
        assert_eq!(governor.delay_for("t.example").await, 1500);
    }

    #[tokio::test]
    async fn cooldown_after_ten_successes() {
        // precondition currentDelay=5000, streak=0; ten successes should
        // cool to floor(5000/1.1) = 4545.
        let governor = governor(GovernorConfig::default());
        {
            let mut cache = governor.cache.lock().await;
            cache.insert(
                "h".to_string(),
                HostState {
                    host: "h".to_string(),
                    current_delay_ms: 5000,
                    success_streak: 0,
                    last_updated_ms: now_ms(),
                },
            );
        }
        for _ in 0..10 {
            governor.report("h", true).await;
        }
        assert_eq!(governor.delay_for("h").await, 4545);

        for _ in 0..10 {
            governor.report("h", true).await;
        }
        assert_eq!(governor.delay_for("h").await, 4131);
    }

    #[tokio::test]
    async fn constant_delay_when_initial_equals_max() {
        let config = GovernorConfig {
            initial_delay_ms: 2000,
            max_delay_ms: 2000,
            ..GovernorConfig::default()
        };
        let governor = governor(config);
        governor.report("h", false).await;
        assert_eq!(governor.delay_for("h").await, 2000);
        for _ in 0..20 {
            governor.report("h", true).await;
        }
        assert_eq!(governor.delay_for("h").await, 2000);
    }

    #[test]
    fn is_blocked_matches_status_or_keyword_case_insensitively() {
        let governor = governor(GovernorConfig::default());
        assert!(governor.is_blocked(429, ""));
        assert!(governor.is_blocked(200, "Please solve this CAPTCHA"));
        assert!(!governor.is_blocked(200, ""));
        assert!(!governor.is_blocked(200, "all good"));
    }
}
