use envconfig::Envconfig;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3311")]
    pub port: u16,

    #[envconfig(from = "REDIS_URL", default = "redis://localhost:6379")]
    pub redis_url: String,

    #[envconfig(from = "KEY_PREFIX", default = "asc:")]
    pub key_prefix: String,

    #[envconfig(from = "LOGGING_LEVEL", default = "info")]
    pub logging_level: String,

    #[envconfig(from = "LOGGING_PRETTY", default = "false")]
    pub logging_pretty: bool,

    #[envconfig(from = "CONTROLLER_WORKER_TIMEOUT_SECS", default = "60")]
    pub worker_timeout_secs: u64,

    #[envconfig(from = "CONTROLLER_METRICS_UPDATE_INTERVAL_SECS", default = "30")]
    pub metrics_update_interval_secs: u64,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
