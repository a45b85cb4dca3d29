use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::Policy;
use tracing::warn;

use crate::error::JobError;
use crate::governor::FeedbackGovernor;
use crate::proxy::ProxyManager;
use crate::types::{HttpMethod, Job};
use crate::user_agent::UserAgentRotator;

const HEADERS_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 5;

/// What the dispatcher hands back to the worker: the worker, not the
/// dispatcher, decides what a blocked-but-2xx response means for the job.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub body: String,
    pub status_code: u16,
    pub final_url: String,
}

/// Composes and executes one HTTP request through a rotated proxy and
/// user-agent, reporting the outcome to the Governor and Proxy Manager.
/// Each dispatch gets its own scoped client and independent header/body
/// timeouts so one slow upstream host can't pin resources meant for another.
pub struct RequestDispatcher<'a> {
    pub proxies: &'a ProxyManager,
    pub user_agents: &'a UserAgentRotator,
    pub governor: &'a FeedbackGovernor,
}

impl<'a> RequestDispatcher<'a> {
    pub fn new(
        proxies: &'a ProxyManager,
        user_agents: &'a UserAgentRotator,
        governor: &'a FeedbackGovernor,
    ) -> Self {
        Self {
            proxies,
            user_agents,
            governor,
        }
    }

    pub async fn dispatch(&self, job: &Job) -> Result<DispatchOutcome, JobError> {
        let url = url::Url::parse(&job.url)?;
        let host = url.host_str().unwrap_or("").to_ascii_lowercase();

        let proxy = self.proxies.next();
        let ua = self.user_agents.random().map(|s| s.to_string());

        let delay_ms = self.governor.delay_for(&host).await;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let headers = compose_headers(job, ua.as_deref());
        let body = request_body(job);

        // Scoped-acquisition: the proxy-bound client only lives for this one
        // request, so its connection pool is released deterministically on
        // every exit path below.
        let client = match build_client(proxy.as_ref().map(|p| p.url.as_str())) {
            Ok(client) => client,
            Err(err) => {
                self.report_failure(&host, proxy.as_ref().map(|p| p.url.as_str())).await;
                return Err(JobError::RequestFailed(format!(
                    "failed to build proxy client: {err}"
                )));
            }
        };

        let mut request = client.request(job.http.method.into(), url.clone()).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let send_result = tokio::time::timeout(HEADERS_TIMEOUT, request.send()).await;
        let response = match send_result {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                self.report_failure(&host, proxy.as_ref().map(|p| p.url.as_str())).await;
                return Err(JobError::RequestFailed(err.to_string()));
            }
            Err(_) => {
                self.report_failure(&host, proxy.as_ref().map(|p| p.url.as_str())).await;
                return Err(JobError::RequestFailed(format!(
                    "timed out waiting for response headers after {HEADERS_TIMEOUT:?}"
                )));
            }
        };

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();

        let body_text = match tokio::time::timeout(BODY_TIMEOUT, response.text()).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                self.report_failure(&host, proxy.as_ref().map(|p| p.url.as_str())).await;
                return Err(JobError::RequestFailed(err.to_string()));
            }
            Err(_) => {
                self.report_failure(&host, proxy.as_ref().map(|p| p.url.as_str())).await;
                return Err(JobError::RequestFailed(format!(
                    "timed out reading response body after {BODY_TIMEOUT:?}"
                )));
            }
        };

        let blocked = self.governor.is_blocked(status_code, &body_text);
        let successful = !blocked && (200..400).contains(&status_code);

        self.governor.report(&host, successful).await;
        if let Some(proxy) = &proxy {
            self.proxies.report(&proxy.url, successful);
        }

        Ok(DispatchOutcome {
            body: body_text,
            status_code,
            final_url,
        })
    }

    async fn report_failure(&self, host: &str, proxy_url: Option<&str>) {
        self.governor.report(host, false).await;
        if let Some(proxy_url) = proxy_url {
            self.proxies.report(proxy_url, false);
        }
    }
}

fn build_client(proxy_url: Option<&str>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .redirect(Policy::limited(MAX_REDIRECTS))
        .timeout(HEADERS_TIMEOUT + BODY_TIMEOUT);
    if let Some(proxy_url) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    } else {
        builder = builder.no_proxy();
    }
    builder.build()
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.5"),
    );
    headers.insert(
        reqwest::header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip,deflate,br"),
    );
    headers.insert(
        reqwest::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );
    headers
}

/// Builds the outgoing header set: defaults, overlaid by `job.http.headers`
/// (last write wins since `HeaderName` normalizes case), then `User-Agent`
/// unless the job already set one.
fn compose_headers(job: &Job, ua: Option<&str>) -> HeaderMap {
    let mut headers = default_headers();

    for (key, value) in &job.http.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            warn!(header = %key, "dropping job header that is not valid for an HTTP request");
            continue;
        };
        headers.insert(name, value);
    }

    if !headers.contains_key(USER_AGENT) {
        if let Some(ua) = ua {
            if let Ok(value) = HeaderValue::from_str(ua) {
                headers.insert(USER_AGENT, value);
            }
        }
    }

    if job.http.method.allows_body() {
        if let Some(serde_json::Value::Object(_) | serde_json::Value::Array(_)) = &job.http.body {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
        }
    }

    headers
}

fn request_body(job: &Job) -> Option<Vec<u8>> {
    if !job.http.method.allows_body() {
        return None;
    }
    match &job.http.body {
        Some(serde_json::Value::String(s)) => Some(s.clone().into_bytes()),
        Some(value @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
            serde_json::to_vec(value).ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobHttp;
    use std::collections::HashMap;

    fn job_with_headers(headers: HashMap<String, String>) -> Job {
        Job {
            id: "j1".to_string(),
            url: "http://t.example/ok".to_string(),
            parser: "html-cheerio".to_string(),
            priority: 0,
            metadata: serde_json::json!({}),
            http: JobHttp {
                method: HttpMethod::Get,
                headers,
                body: None,
            },
        }
    }

    #[test]
    fn job_headers_override_defaults_last_write_wins() {
        let mut overrides = HashMap::new();
        overrides.insert("Accept-Language".to_string(), "fr-FR".to_string());
        let job = job_with_headers(overrides);
        let headers = compose_headers(&job, None);
        assert_eq!(headers.get(reqwest::header::ACCEPT_LANGUAGE).unwrap(), "fr-FR");
    }

    #[test]
    fn user_agent_omitted_when_rotator_empty_and_job_silent() {
        let job = job_with_headers(HashMap::new());
        let headers = compose_headers(&job, None);
        assert!(!headers.contains_key(USER_AGENT));
    }

    #[test]
    fn user_agent_not_overridden_when_job_sets_it() {
        let mut overrides = HashMap::new();
        overrides.insert("User-Agent".to_string(), "custom/1".to_string());
        let job = job_with_headers(overrides);
        let headers = compose_headers(&job, Some("rotated/1"));
        assert_eq!(headers.get(USER_AGENT).unwrap(), "custom/1");
    }

    #[test]
    fn json_body_gets_content_type_and_is_skipped_for_get() {
        let mut job = job_with_headers(HashMap::new());
        job.http.method = HttpMethod::Post;
        job.http.body = Some(serde_json::json!({"a": 1}));
        let headers = compose_headers(&job, None);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(request_body(&job).is_some());

        job.http.method = HttpMethod::Get;
        assert!(request_body(&job).is_none());
    }
}
