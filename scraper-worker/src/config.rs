use envconfig::Envconfig;
use scraper_common::GovernorConfig;

/// Environment-sourced configuration: a flat `Envconfig` struct for parsing,
/// a richer `AppConfig` with the derived/defaulted values the rest of the
/// binary actually wants.
#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(from = "REDIS_URL", default = "redis://localhost:6379")]
    pub redis_url: String,

    #[envconfig(from = "KEY_PREFIX", default = "asc:")]
    pub key_prefix: String,

    #[envconfig(from = "LOGGING_LEVEL", default = "info")]
    pub logging_level: String,

    #[envconfig(from = "LOGGING_PRETTY", default = "false")]
    pub logging_pretty: bool,

    /// Comma-separated proxy URLs; empty means the dispatcher performs
    /// direct connections.
    #[envconfig(from = "PROXIES", default = "")]
    pub proxies: String,

    /// Comma-separated `User-Agent` strings.
    #[envconfig(from = "USER_AGENTS", default = "")]
    pub user_agents: String,

    #[envconfig(from = "GOVERNOR_INITIAL_DELAY_MS", default = "1000")]
    pub governor_initial_delay_ms: u64,

    #[envconfig(from = "GOVERNOR_MAX_DELAY_MS", default = "30000")]
    pub governor_max_delay_ms: u64,

    #[envconfig(from = "GOVERNOR_BACKOFF_FACTOR", default = "1.5")]
    pub governor_backoff_factor: f64,

    #[envconfig(from = "GOVERNOR_COOLDOWN_FACTOR", default = "1.1")]
    pub governor_cooldown_factor: f64,

    /// Comma-separated status codes, e.g. "403,429,503".
    #[envconfig(from = "GOVERNOR_BLOCK_STATUS_CODES", default = "403,429,503")]
    pub governor_block_status_codes: String,

    /// Comma-separated keywords, case folded at parse time.
    #[envconfig(
        from = "GOVERNOR_BLOCK_BODY_KEYWORDS",
        default = "captcha,blocked,are you a robot"
    )]
    pub governor_block_body_keywords: String,

    #[envconfig(from = "WORKER_CONCURRENCY", default = "1")]
    pub worker_concurrency: u32,

    /// Used to size the in-progress TTL (`2 * workerTimeout`) and the
    /// heartbeat interval (`workerTimeout / 2`); the controller uses the
    /// same value to decide when a worker is dead.
    #[envconfig(from = "CONTROLLER_WORKER_TIMEOUT_SECS", default = "60")]
    pub worker_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub key_prefix: String,
    pub proxies: Vec<String>,
    pub user_agents: Vec<String>,
    pub governor: GovernorConfig,
    pub worker_concurrency: u32,
    pub worker_timeout_secs: u64,
}

impl AppConfig {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    pub fn into_app_config(self) -> AppConfig {
        let proxies = split_non_empty(&self.proxies);
        let user_agents = split_non_empty(&self.user_agents);
        let block_status_codes = self
            .governor_block_status_codes
            .split(',')
            .filter_map(|s| s.trim().parse::<u16>().ok())
            .collect();
        let block_body_keywords = split_non_empty(&self.governor_block_body_keywords)
            .into_iter()
            .map(|s| s.to_ascii_lowercase())
            .collect();

        AppConfig {
            host: self.host,
            port: self.port,
            redis_url: self.redis_url,
            key_prefix: self.key_prefix,
            proxies,
            user_agents,
            governor: GovernorConfig {
                initial_delay_ms: self.governor_initial_delay_ms,
                max_delay_ms: self.governor_max_delay_ms,
                backoff_factor: self.governor_backoff_factor,
                cooldown_factor: self.governor_cooldown_factor,
                block_status_codes,
                block_body_keywords,
            },
            worker_concurrency: self.worker_concurrency,
            worker_timeout_secs: self.worker_timeout_secs,
        }
    }
}

fn split_non_empty(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
