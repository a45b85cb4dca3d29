use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Client, PipelineOp, PoppedElement, StoreError};

/// In-memory stand-in for [`crate::RedisStoreClient`]: same trait, no
/// network, used by every higher component's unit tests in this workspace.
#[derive(Default)]
pub struct MockStoreClient {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    strings: HashMap<String, String>,
    sorted_sets: HashMap<String, Vec<(String, f64)>>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, std::collections::HashSet<String>>,
    counters: HashMap<String, i64>,
    subscribers: HashMap<String, Vec<mpsc::Sender<String>>>,
}

impl MockStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Test helper: seed a string value directly, bypassing TTL bookkeeping
    /// (the mock does not expire keys; TTL correctness is the real backend's
    /// responsibility and is out of scope for unit tests against the mock).
    pub fn seed_string(&self, key: &str, value: &str) {
        self.lock().strings.insert(key.to_owned(), value.to_owned());
    }

    pub fn list_len(&self, key: &str) -> usize {
        self.lock().lists.get(key).map(|l| l.len()).unwrap_or(0)
    }

    pub fn hash_snapshot(&self, key: &str) -> HashMap<String, String> {
        self.lock().hashes.get(key).cloned().unwrap_or_default()
    }

    fn apply_op(state: &mut State, op: PipelineOp) {
        match op {
            PipelineOp::SetEx { key, value, .. } => {
                state.strings.insert(key, value);
            }
            PipelineOp::Set { key, value } => {
                state.strings.insert(key, value);
            }
            PipelineOp::LPush { key, value } => {
                state.lists.entry(key).or_default().push_front(value);
            }
            PipelineOp::RPush { key, value } => {
                state.lists.entry(key).or_default().push_back(value);
            }
            PipelineOp::SAdd { key, member } => {
                state.sets.entry(key).or_default().insert(member);
            }
            PipelineOp::SRem { key, member } => {
                if let Some(set) = state.sets.get_mut(&key) {
                    set.remove(&member);
                }
            }
            PipelineOp::Incr { key } => {
                *state.counters.entry(key).or_insert(0) += 1;
            }
        }
    }
}

#[async_trait]
impl Client for MockStoreClient {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.lock()
            .strings
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().strings.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<(), StoreError> {
        self.lock().strings.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.strings.remove(key);
        state.lists.remove(key);
        state.hashes.remove(key);
        state.sorted_sets.remove(key);
        state.sets.remove(key);
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut state = self.lock();
        let set = state.sorted_sets.entry(key.to_owned()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_owned(), score));
        Ok(())
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        let mut members: Vec<(String, f64)> = state
            .sorted_sets
            .get(key)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .collect();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(members.into_iter().map(|(m, _)| m).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(set) = self.lock().sorted_sets.get_mut(key) {
            set.retain(|(m, _)| m != member);
        }
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()
            .lists
            .entry(key.to_owned())
            .or_default()
            .push_front(value.to_owned());
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()
            .lists
            .entry(key.to_owned())
            .or_default()
            .push_back(value.to_owned());
        Ok(())
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.lock().lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn blocking_rpop(
        &self,
        keys: &[String],
        _timeout: Duration,
    ) -> Result<Option<PoppedElement>, StoreError> {
        let mut state = self.lock();
        for key in keys {
            if let Some(list) = state.lists.get_mut(key) {
                if let Some(value) = list.pop_back() {
                    return Ok(Some(PoppedElement {
                        key: key.clone(),
                        value,
                    }));
                }
            }
        }
        Ok(None)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.lock()
            .hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        if let Some(h) = self.lock().hashes.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.lock()
            .sets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(set) = self.lock().sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .sets
            .get(key)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let subs = self.lock().subscribers.get(channel).cloned();
        if let Some(subs) = subs {
            for sub in subs {
                let _ = sub.send(message.to_owned()).await;
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError> {
        let (tx, rx) = mpsc::channel(64);
        self.lock()
            .subscribers
            .entry(channel.to_owned())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn execute_pipeline(&self, ops: Vec<PipelineOp>) -> Result<(), StoreError> {
        let mut state = self.lock();
        for op in ops {
            Self::apply_op(&mut state, op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pipeline;

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let store = MockStoreClient::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = MockStoreClient::new();
        assert_eq!(store.get("missing").await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn blocking_rpop_prefers_first_ready_key_in_order() {
        let store = MockStoreClient::new();
        store.lpush("queue:p3", "low").await.unwrap();
        store.lpush("queue:p7", "high").await.unwrap();

        let keys = vec!["queue:p7".to_string(), "queue:p3".to_string()];
        let popped = store
            .blocking_rpop(&keys, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.key, "queue:p7");
        assert_eq!(popped.value, "high");
    }

    #[tokio::test]
    async fn blocking_rpop_falls_through_to_lower_priority_when_higher_empty() {
        let store = MockStoreClient::new();
        store.lpush("queue:p3", "only-job").await.unwrap();

        let keys = vec!["queue:p7".to_string(), "queue:p3".to_string()];
        let popped = store
            .blocking_rpop(&keys, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.key, "queue:p3");
    }

    #[tokio::test]
    async fn pipeline_executes_all_ops_atomically_from_the_caller_s_view() {
        let store = MockStoreClient::new();
        let ops = Pipeline::new()
            .set_ex("jobs:1", "{}", 604800)
            .lpush("queue:p5", "1")
            .into_ops();

        store.execute_pipeline(ops).await.unwrap();

        assert_eq!(store.get("jobs:1").await.unwrap(), "{}");
        assert_eq!(store.list_len("queue:p5"), 1);
    }

    #[tokio::test]
    async fn hash_set_and_delete() {
        let store = MockStoreClient::new();
        store.hset("workers:active", "worker-1", "rec").await.unwrap();
        assert_eq!(store.hash_snapshot("workers:active").len(), 1);
        store.hdel("workers:active", "worker-1").await.unwrap();
        assert_eq!(store.hash_snapshot("workers:active").len(), 0);
    }

    #[tokio::test]
    async fn sadd_scard_srem_roundtrip() {
        let store = MockStoreClient::new();
        store.sadd("queue:processing", "job-1").await.unwrap();
        store.sadd("queue:processing", "job-2").await.unwrap();
        assert_eq!(store.scard("queue:processing").await.unwrap(), 2);
        store.srem("queue:processing", "job-1").await.unwrap();
        assert_eq!(store.scard("queue:processing").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn llen_reports_current_length() {
        let store = MockStoreClient::new();
        assert_eq!(store.llen("queue:p0").await.unwrap(), 0);
        store.rpush("queue:p0", "a").await.unwrap();
        store.rpush("queue:p0", "b").await.unwrap();
        assert_eq!(store.llen("queue:p0").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let store = MockStoreClient::new();
        let mut rx = store.subscribe("jobs:submit").await.unwrap();
        store.publish("jobs:submit", "hello").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, "hello");
    }
}
