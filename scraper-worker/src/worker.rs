use std::sync::{Arc, Mutex};
use std::time::Duration;

use scraper_common::{
    now_ms, DispatchOutcome, FailureDetail, FeedbackGovernor, GovernorConfig, Job, JobError,
    OutcomeRecord, ParserRegistry, ProxyManager, RequestDispatcher, UserAgentRotator, WorkerRecord,
    WorkerStatus,
};
use store::{Client, Pipeline};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use health::HealthHandle;

/// How long the blocking pop waits before re-checking the shutdown signal.
/// The wait is meant to be indefinite and interruptible; a short re-poll
/// interval gets the same externally observable behavior without racing a
/// half-sent BRPOP against cancellation.
const POP_REPOLL_INTERVAL: Duration = Duration::from_secs(5);
/// Resilience pause after a transient store failure on the blocking pop.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(5);

fn worker_id(hostname: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("worker-{hostname}-{}", &suffix[..8])
}

fn priority_queue_keys(prefix: &str) -> Vec<String> {
    (0..=10).rev().map(|p| format!("{prefix}queue:p{p}")).collect()
}

#[derive(Clone)]
struct Presence {
    inner: Arc<Mutex<(WorkerStatus, Option<String>)>>,
}

impl Presence {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new((WorkerStatus::Idle, None))),
        }
    }

    fn set_busy(&self, job_id: &str) {
        let mut guard = self.inner.lock().expect("presence mutex poisoned");
        *guard = (WorkerStatus::Busy, Some(job_id.to_string()));
    }

    fn set_idle(&self) {
        let mut guard = self.inner.lock().expect("presence mutex poisoned");
        *guard = (WorkerStatus::Idle, None);
    }

    fn snapshot(&self) -> (WorkerStatus, Option<String>) {
        self.inner.lock().expect("presence mutex poisoned").clone()
    }
}

/// One independent job loop with its own identity. Reaching a configured
/// concurrency means running several of these linear pipelines side by side
/// rather than weaving a single async state machine across jobs.
pub struct Worker {
    pub id: String,
    store: Arc<dyn Client>,
    key_prefix: String,
    worker_timeout_secs: u64,
    proxies: Arc<ProxyManager>,
    user_agents: Arc<UserAgentRotator>,
    governor: Arc<FeedbackGovernor>,
    parsers: ParserRegistry,
    presence: Presence,
    health: HealthHandle,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hostname: &str,
        store: Arc<dyn Client>,
        key_prefix: String,
        worker_timeout_secs: u64,
        proxies: Arc<ProxyManager>,
        user_agents: Arc<UserAgentRotator>,
        governor: Arc<FeedbackGovernor>,
        parsers: ParserRegistry,
        health: HealthHandle,
    ) -> Self {
        Self {
            id: worker_id(hostname),
            store,
            key_prefix,
            worker_timeout_secs,
            proxies,
            user_agents,
            governor,
            parsers,
            presence: Presence::new(),
            health,
        }
    }

    fn workers_active_key(&self) -> String {
        format!("{}workers:active", self.key_prefix)
    }

    fn inprogress_key(&self) -> String {
        format!("{}jobs:inprogress:{}", self.key_prefix, self.id)
    }

    fn processing_set_key(&self) -> String {
        format!("{}queue:processing", self.key_prefix)
    }

    /// Heartbeat loop: writes this worker's presence record every
    /// `workerTimeout / 2` seconds until `shutdown` fires.
    pub async fn run_heartbeat(&self, mut shutdown: watch::Receiver<bool>) {
        let interval_secs = (self.worker_timeout_secs / 2).max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.write_presence().await;
                    self.health.report_healthy().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn write_presence(&self) {
        let (status, current_job_id) = self.presence.snapshot();
        let record = WorkerRecord {
            id: self.id.clone(),
            status,
            current_job_id,
            timestamp: now_ms(),
        };
        let Ok(payload) = serde_json::to_string(&record) else {
            return;
        };
        if let Err(err) = self
            .store
            .hset(&self.workers_active_key(), &self.id, &payload)
            .await
        {
            warn!(worker = %self.id, error = %err, "failed to write heartbeat");
        }
    }

    /// Main job loop. Returns once `shutdown` fires and any mid-flight job
    /// has been requeued or completed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let queues = priority_queue_keys(&self.key_prefix);
        self.write_presence().await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let popped = self
                .store
                .blocking_rpop(&queues, POP_REPOLL_INTERVAL)
                .await;

            match popped {
                Ok(Some(element)) => {
                    if self.process_job(&element.key, &element.value, &shutdown).await {
                        break;
                    }
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(worker = %self.id, error = %err, "transient store failure on blocking pop, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(TRANSIENT_RETRY_DELAY) => {},
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        self.write_presence().await;
        if let Err(err) = self.store.hdel(&self.workers_active_key(), &self.id).await {
            warn!(worker = %self.id, error = %err, "failed to remove worker record on shutdown");
        }
    }

    /// Processes one popped job. Returns `true` if the caller should stop
    /// the main loop (shutdown observed before dispatch started).
    async fn process_job(&self, origin_queue: &str, raw: &str, shutdown: &watch::Receiver<bool>) -> bool {
        let job: Job = match serde_json::from_str(raw) {
            Ok(job) => job,
            Err(err) => {
                warn!(worker = %self.id, error = %err, "discarding unparseable job payload");
                return false;
            }
        };

        self.presence.set_busy(&job.id);
        let inprogress_ttl = self.worker_timeout_secs * 2;
        if let Err(err) = self
            .store
            .set_ex(&self.inprogress_key(), raw, inprogress_ttl)
            .await
        {
            warn!(worker = %self.id, job_id = %job.id, error = %err, "failed to record in-progress job");
        }

        if *shutdown.borrow() {
            info!(worker = %self.id, job_id = %job.id, "shutdown observed before dispatch started, requeuing job");
            self.recover_job(origin_queue, raw).await;
            if let Err(err) = self.store.del(&self.inprogress_key()).await {
                warn!(worker = %self.id, job_id = %job.id, error = %err, "failed to clear in-progress key");
            }
            self.presence.set_idle();
            return true;
        }

        if let Err(err) = self.store.sadd(&self.processing_set_key(), &job.id).await {
            warn!(worker = %self.id, job_id = %job.id, error = %err, "failed to mark job as processing");
        }

        let dispatcher = RequestDispatcher::new(&self.proxies, &self.user_agents, &self.governor);
        let outcome = match dispatcher.dispatch(&job).await {
            Ok(outcome) => self.run_parser(&job, outcome),
            Err(err) => Err(err),
        };

        self.publish_outcome(&job, outcome).await;

        if let Err(err) = self.store.del(&self.inprogress_key()).await {
            warn!(worker = %self.id, job_id = %job.id, error = %err, "failed to clear in-progress key");
        }
        if let Err(err) = self.store.srem(&self.processing_set_key(), &job.id).await {
            warn!(worker = %self.id, job_id = %job.id, error = %err, "failed to clear processing marker");
        }
        self.presence.set_idle();
        false
    }

    /// Resolves and runs the job's parser against the dispatched body. The
    /// default policy is to always attempt parsing, even on a response
    /// classified as blocked.
    fn run_parser(&self, job: &Job, outcome: DispatchOutcome) -> Result<(DispatchOutcome, serde_json::Value), JobError> {
        let parser = self.parsers.get(&job.parser)?;
        let data = parser(&outcome.body, job).map_err(|err| JobError::ParserError(err.to_string()))?;
        Ok((outcome, data))
    }

    async fn publish_outcome(
        &self,
        job: &Job,
        result: Result<(DispatchOutcome, serde_json::Value), JobError>,
    ) {
        let prefix = &self.key_prefix;
        match result {
            Ok((outcome, data)) => {
                let record = OutcomeRecord::Success {
                    job_id: job.id.clone(),
                    worker_id: self.id.clone(),
                    timestamp: now_ms(),
                    url: job.url.clone(),
                    final_url: outcome.final_url,
                    status_code: outcome.status_code,
                    metadata: job.metadata.clone(),
                    data,
                };
                self.publish_record(&format!("{prefix}results:success"), &format!("{prefix}stats:jobs:completed"), record)
                    .await;
            }
            Err(err) => {
                let record = OutcomeRecord::Failed {
                    job_id: job.id.clone(),
                    worker_id: self.id.clone(),
                    timestamp: now_ms(),
                    url: job.url.clone(),
                    metadata: job.metadata.clone(),
                    error: FailureDetail {
                        kind: err.kind(),
                        message: err.message(),
                        stack: None,
                    },
                };
                self.publish_record(&format!("{prefix}results:failed"), &format!("{prefix}stats:jobs:failed"), record)
                    .await;
            }
        }
    }

    async fn publish_record(&self, stream_key: &str, counter_key: &str, record: OutcomeRecord) {
        let Ok(payload) = serde_json::to_string(&record) else {
            warn!(worker = %self.id, "failed to serialize outcome record");
            return;
        };
        let ops = Pipeline::new().lpush(stream_key, payload).incr(counter_key).into_ops();
        if let Err(err) = self.store.execute_pipeline(ops).await {
            warn!(worker = %self.id, error = %err, "failed to publish outcome record");
        }
    }

    /// Requeues a job that was in-progress at shutdown time. `RPUSH` lands it
    /// directly at the pop end (workers consume via `BRPOP`), so it is served
    /// on the very next pop rather than waiting behind already-queued work.
    async fn recover_job(&self, origin_queue: &str, raw: &str) {
        if let Err(err) = self.store.rpush(origin_queue, raw).await {
            warn!(worker = %self.id, queue = %origin_queue, error = %err, "failed to requeue in-progress job");
        }
    }
}

/// Convenience bundle the binary wires up once and clones an `Arc` of. Proxy
/// pool and UA rotator are built separately by the binary since they need
/// the configured URL/UA lists, which this bundle has no access to.
pub struct SharedServices {
    pub governor: Arc<FeedbackGovernor>,
    pub parsers: ParserRegistry,
}

impl SharedServices {
    pub fn new(store: Arc<dyn Client>, key_prefix: &str, governor_config: GovernorConfig) -> Self {
        Self {
            governor: Arc::new(FeedbackGovernor::new(store, key_prefix, governor_config)),
            parsers: ParserRegistry::with_defaults(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use health::HealthRegistry;
    use store::MockStoreClient;

    async fn test_worker() -> (Worker, Arc<MockStoreClient>) {
        let store = Arc::new(MockStoreClient::new());
        let registry = HealthRegistry::new("test");
        let health = registry.register("worker".to_string(), Duration::from_secs(30)).await;
        let governor = Arc::new(FeedbackGovernor::new(
            store.clone(),
            "asc:",
            GovernorConfig::default(),
        ));
        let proxies = Arc::new(ProxyManager::new(store.clone(), "asc:"));
        proxies.initialize(vec![]).await;
        let worker = Worker::new(
            "host",
            store.clone(),
            "asc:".to_string(),
            60,
            proxies,
            Arc::new(UserAgentRotator::new(vec!["UA/1".to_string()])),
            governor,
            ParserRegistry::with_defaults(),
            health,
        );
        (worker, store)
    }

    #[tokio::test]
    async fn malformed_job_payload_is_discarded_without_panicking() {
        let (worker, _store) = test_worker().await;
        let (_tx, rx) = watch::channel(false);
        let stop = worker.process_job("asc:queue:p0", "not json", &rx).await;
        assert!(!stop);
    }

    #[tokio::test]
    async fn shutdown_before_dispatch_requeues_job_at_pop_end() {
        let (worker, store) = test_worker().await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let raw = serde_json::to_string(&serde_json::json!({
            "id": "x",
            "url": "http://t.example/ok",
            "priority": 2
        }))
        .unwrap();

        let stop = worker.process_job("asc:queue:p2", &raw, &rx).await;
        assert!(stop);
        assert_eq!(store.list_len("asc:queue:p2"), 1);
    }
}
