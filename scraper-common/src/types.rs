use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default parser name used when a job does not name one.
pub const DEFAULT_PARSER: &str = "html-cheerio";

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

impl HttpMethod {
    /// Whether a body is honored for this method: only POST/PUT/PATCH carry
    /// one on the wire.
    pub fn allows_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        };
        write!(f, "{s}")
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(format!("{other} is not a valid HttpMethod")),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobHttp {
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

/// Immutable once enqueued. `parser`/`priority`/`metadata` carry serde
/// defaults so the controller can fill them in during submission handling
/// without a separate "raw vs validated" type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    #[serde(default = "default_parser_name")]
    pub parser: String,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub http: JobHttp,
}

fn default_parser_name() -> String {
    DEFAULT_PARSER.to_string()
}

impl Job {
    /// Practical priority ceiling; clamps rather than rejects, since the
    /// controller's job is to fill sane defaults, not to reject
    /// slightly-out-of-range submissions.
    pub fn clamped_priority(&self) -> u8 {
        self.priority.min(10)
    }
}

/// Per-hostname adaptive politeness state, owned by the Feedback Governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostState {
    pub host: String,
    pub current_delay_ms: u64,
    pub success_streak: u64,
    pub last_updated_ms: u64,
}

/// Owned by the Proxy Manager; `url` includes credentials, so this type must
/// never be logged directly (see `proxy.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub url: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: crate::error::JobErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Append-only result published to `results:success` or `results:failed`.
/// Tagged on `status` so both variants round-trip through the same stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum OutcomeRecord {
    #[serde(rename = "success")]
    Success {
        #[serde(rename = "jobId")]
        job_id: String,
        #[serde(rename = "workerId")]
        worker_id: String,
        timestamp: u64,
        url: String,
        #[serde(rename = "finalUrl")]
        final_url: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
        metadata: serde_json::Value,
        data: serde_json::Value,
    },
    #[serde(rename = "failed")]
    Failed {
        #[serde(rename = "jobId")]
        job_id: String,
        #[serde(rename = "workerId")]
        worker_id: String,
        timestamp: u64,
        url: String,
        metadata: serde_json::Value,
        error: FailureDetail,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_parser_defaults_to_html_cheerio() {
        let job: Job = serde_json::from_str(r#"{"id":"j1","url":"http://t.example/ok"}"#).unwrap();
        assert_eq!(job.parser, "html-cheerio");
        assert_eq!(job.priority, 0);
    }

    #[test]
    fn success_record_serializes_with_status_tag() {
        let record = OutcomeRecord::Success {
            job_id: "j1".into(),
            worker_id: "worker-x-aaaaaaaa".into(),
            timestamp: 0,
            url: "http://t.example/ok".into(),
            final_url: "http://t.example/ok".into(),
            status_code: 200,
            metadata: serde_json::json!({"tag": "a"}),
            data: serde_json::json!({"title": "Hi"}),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["jobId"], "j1");
    }
}
