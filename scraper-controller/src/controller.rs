use std::sync::Arc;

use scraper_common::{now_ms, Job, JobHttp, WorkerRecord};
use serde::Deserialize;
use store::{Client, Pipeline};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::InvalidJob;

const JOB_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Mirrors `Job`, but `id` is optional and `priority`/`metadata` carry the
/// controller's own defaults, rather than relying on the worker-side `Job`
/// defaults which would silently fill in an id.
#[derive(Debug, Deserialize)]
struct SubmittedJob {
    id: Option<String>,
    url: String,
    #[serde(default = "default_parser_name")]
    parser: String,
    #[serde(default)]
    priority: u8,
    #[serde(default = "default_metadata")]
    metadata: serde_json::Value,
    #[serde(default)]
    http: JobHttp,
}

fn default_parser_name() -> String {
    "html-cheerio".to_string()
}

fn default_metadata() -> serde_json::Value {
    serde_json::json!({})
}

fn validate_and_fill_defaults(raw: &str) -> Result<Job, InvalidJob> {
    let submitted: SubmittedJob = serde_json::from_str(raw)?;

    url::Url::parse(&submitted.url).map_err(|err| InvalidJob::InvalidUrl(err.to_string()))?;

    let id = submitted
        .id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(Job {
        id,
        url: submitted.url,
        parser: submitted.parser,
        priority: submitted.priority.min(10),
        metadata: submitted.metadata,
        http: submitted.http,
    })
}

/// Runs the controller's submission handler for the lifetime of `rx`: one
/// message in, parse/validate/default/enqueue, repeat. Returns when the
/// subscription channel closes (store connection lost or shutdown).
pub async fn run_submission_handler(
    store: Arc<dyn Client>,
    key_prefix: String,
    mut rx: tokio::sync::mpsc::Receiver<String>,
) {
    while let Some(message) = rx.recv().await {
        let job = match validate_and_fill_defaults(&message) {
            Ok(job) => job,
            Err(err) => {
                warn!(error = %err, "dropping invalid job submission");
                continue;
            }
        };

        let payload = match serde_json::to_string(&job) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "failed to serialize validated job");
                continue;
            }
        };

        let ops = Pipeline::new()
            .set_ex(format!("{key_prefix}jobs:{}", job.id), payload.clone(), JOB_TTL_SECS)
            .lpush(format!("{key_prefix}queue:p{}", job.priority), payload)
            .into_ops();

        if let Err(err) = store.execute_pipeline(ops).await {
            warn!(job_id = %job.id, error = %err, "failed to enqueue job");
            continue;
        }
        info!(job_id = %job.id, priority = job.priority, "enqueued job");
    }
}

/// Every `interval_secs`, removes stale entries from `workers:active`.
pub async fn run_reaper_loop(store: Arc<dyn Client>, key_prefix: String, interval_secs: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        reap_dead_workers(&store, &key_prefix, interval_secs).await;
    }
}

async fn reap_dead_workers(store: &Arc<dyn Client>, key_prefix: &str, worker_timeout_secs: u64) {
    let workers_key = format!("{key_prefix}workers:active");
    let entries = match store.hgetall(&workers_key).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, "failed to read workers:active for reaper pass");
            return;
        }
    };

    let cutoff = now_ms().saturating_sub(worker_timeout_secs * 1000);
    for (worker_id, payload) in entries {
        let stale = match serde_json::from_str::<WorkerRecord>(&payload) {
            Ok(record) => record.timestamp < cutoff,
            Err(_) => true,
        };
        if stale {
            if let Err(err) = store.hdel(&workers_key, &worker_id).await {
                warn!(worker_id = %worker_id, error = %err, "failed to reap dead worker entry");
                continue;
            }
            warn!(worker_id = %worker_id, "reaped dead worker");
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterMetrics {
    pub active_workers: u64,
    pub pending_jobs: u64,
    pub processing_jobs: u64,
    pub completed_total: u64,
    pub failed_total: u64,
}

/// Every `interval_secs`, fetches cluster-wide metrics and logs a single
/// structured record, plus mirrors them into Prometheus gauges.
pub async fn run_metrics_loop(store: Arc<dyn Client>, key_prefix: String, interval_secs: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        let metrics = collect_metrics(&store, &key_prefix).await;
        info!(
            active_workers = metrics.active_workers,
            pending_jobs = metrics.pending_jobs,
            processing_jobs = metrics.processing_jobs,
            completed_total = metrics.completed_total,
            failed_total = metrics.failed_total,
            "cluster metrics"
        );
        metrics::gauge!("scraper_active_workers").set(metrics.active_workers as f64);
        metrics::gauge!("scraper_pending_jobs").set(metrics.pending_jobs as f64);
        metrics::gauge!("scraper_processing_jobs").set(metrics.processing_jobs as f64);
        metrics::gauge!("scraper_completed_jobs_total").set(metrics.completed_total as f64);
        metrics::gauge!("scraper_failed_jobs_total").set(metrics.failed_total as f64);
    }
}

async fn collect_metrics(store: &Arc<dyn Client>, key_prefix: &str) -> ClusterMetrics {
    let active_workers = store
        .hgetall(&format!("{key_prefix}workers:active"))
        .await
        .map(|m| m.len() as u64)
        .unwrap_or(0);

    let mut pending_jobs = 0;
    for priority in 0..=10 {
        pending_jobs += store
            .llen(&format!("{key_prefix}queue:p{priority}"))
            .await
            .unwrap_or(0);
    }

    let processing_jobs = store
        .scard(&format!("{key_prefix}queue:processing"))
        .await
        .unwrap_or(0);

    let completed_total = parse_counter(store.get(&format!("{key_prefix}stats:jobs:completed")).await);
    let failed_total = parse_counter(store.get(&format!("{key_prefix}stats:jobs:failed")).await);

    ClusterMetrics {
        active_workers,
        pending_jobs,
        processing_jobs,
        completed_total,
        failed_total,
    }
}

fn parse_counter(result: Result<String, store::StoreError>) -> u64 {
    result.ok().and_then(|s| s.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MockStoreClient;

    #[test]
    fn missing_id_gets_generated() {
        let job = validate_and_fill_defaults(r#"{"url":"http://t.example/ok"}"#).unwrap();
        assert!(!job.id.is_empty());
        assert_eq!(job.priority, 0);
        assert_eq!(job.metadata, serde_json::json!({}));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = validate_and_fill_defaults(r#"{"id":"j1","url":"not a url"}"#).unwrap_err();
        assert!(matches!(err, InvalidJob::InvalidUrl(_)));
    }

    #[test]
    fn priority_above_ten_is_clamped() {
        let job =
            validate_and_fill_defaults(r#"{"id":"j1","url":"http://t.example/ok","priority":99}"#)
                .unwrap();
        assert_eq!(job.priority, 10);
    }

    #[tokio::test]
    async fn reaper_removes_stale_worker_and_keeps_fresh_one() {
        let store = Arc::new(MockStoreClient::new());
        let key = "asc:workers:active";
        let fresh = WorkerRecord {
            id: "fresh".to_string(),
            status: scraper_common::WorkerStatus::Idle,
            current_job_id: None,
            timestamp: now_ms(),
        };
        let stale = WorkerRecord {
            id: "stale".to_string(),
            status: scraper_common::WorkerStatus::Idle,
            current_job_id: None,
            timestamp: 0,
        };
        store
            .hset(key, "fresh", &serde_json::to_string(&fresh).unwrap())
            .await
            .unwrap();
        store
            .hset(key, "stale", &serde_json::to_string(&stale).unwrap())
            .await
            .unwrap();

        reap_dead_workers(&(store.clone() as Arc<dyn Client>), "asc:", 60).await;

        let remaining = store.hash_snapshot(key);
        assert!(remaining.contains_key("fresh"));
        assert!(!remaining.contains_key("stale"));
    }

    #[tokio::test]
    async fn metrics_collects_zero_on_empty_store() {
        let store: Arc<dyn Client> = Arc::new(MockStoreClient::new());
        let metrics = collect_metrics(&store, "asc:").await;
        assert_eq!(metrics.active_workers, 0);
        assert_eq!(metrics.pending_jobs, 0);
    }
}
