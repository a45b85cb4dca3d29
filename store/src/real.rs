use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::warn;

use crate::{Client, PipelineOp, PoppedElement, StoreError, DEFAULT_STORE_TIMEOUT};

/// Redis-backed coordination store client. Holds a multiplexed connection so
/// it can be cloned cheaply and shared across job loops.
#[derive(Clone)]
pub struct RedisStoreClient {
    client: redis::Client,
    connection: MultiplexedConnection,
    timeout: Duration,
}

impl RedisStoreClient {
    pub async fn new(addr: &str) -> Result<Self, StoreError> {
        Self::with_timeout(addr, DEFAULT_STORE_TIMEOUT).await
    }

    pub async fn with_timeout(addr: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(addr)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            connection,
            timeout,
        })
    }
}

#[async_trait]
impl Client for RedisStoreClient {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.connection.clone();
        let result: Option<String> =
            timeout(self.timeout, conn.get(key)).await??;
        result.ok_or(StoreError::NotFound)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.set::<_, _, ()>(key, value)).await??;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.set_ex::<_, _, ()>(key, value, ttl_secs)).await??;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.del::<_, ()>(key)).await??;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.zadd::<_, _, _, ()>(key, member, score)).await??;
        Ok(())
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let result: Vec<String> =
            timeout(self.timeout, conn.zrangebyscore(key, min, max)).await??;
        Ok(result)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.zrem::<_, _, ()>(key, member)).await??;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.lpush::<_, _, ()>(key, value)).await??;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.rpush::<_, _, ()>(key, value)).await??;
        Ok(())
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let result: u64 = timeout(self.timeout, conn.llen(key)).await??;
        Ok(result)
    }

    async fn blocking_rpop(
        &self,
        keys: &[String],
        timeout_duration: Duration,
    ) -> Result<Option<PoppedElement>, StoreError> {
        let mut conn = self.connection.clone();
        // BRPOP reports the key it popped from, which is exactly what the
        // worker needs to know which priority queue produced the job.
        let result: RedisResult<Option<(String, String)>> = conn
            .brpop(keys, timeout_duration.as_secs_f64())
            .await;
        match result? {
            Some((key, value)) => Ok(Some(PoppedElement { key, value })),
            None => Ok(None),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.hset::<_, _, _, ()>(key, field, value)).await??;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.hdel::<_, _, ()>(key, field)).await??;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.connection.clone();
        let result: HashMap<String, String> =
            timeout(self.timeout, conn.hgetall(key)).await??;
        Ok(result)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.sadd::<_, _, ()>(key, member)).await??;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.srem::<_, _, ()>(key, member)).await??;
        Ok(())
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let result: u64 = timeout(self.timeout, conn.scard(key)).await??;
        Ok(result)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        timeout(self.timeout, conn.publish::<_, _, ()>(channel, message)).await??;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError> {
        // A subscription takes over the whole connection, so it gets its own
        // dedicated connection rather than the shared multiplexed one, to
        // avoid blocking normal commands behind it.
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(64);
        let channel = channel.to_owned();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(err) => {
                        warn!("failed to decode pubsub payload on {}: {}", channel, err);
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn execute_pipeline(&self, ops: Vec<PipelineOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                PipelineOp::SetEx {
                    key,
                    value,
                    ttl_secs,
                } => {
                    pipe.set_ex(key, value, ttl_secs);
                }
                PipelineOp::Set { key, value } => {
                    pipe.set(key, value);
                }
                PipelineOp::LPush { key, value } => {
                    pipe.lpush(key, value);
                }
                PipelineOp::RPush { key, value } => {
                    pipe.rpush(key, value);
                }
                PipelineOp::SAdd { key, member } => {
                    pipe.sadd(key, member);
                }
                PipelineOp::SRem { key, member } => {
                    pipe.srem(key, member);
                }
                PipelineOp::Incr { key } => {
                    pipe.incr(key, 1);
                }
            };
        }
        let mut conn = self.connection.clone();
        let _: () = timeout(self.timeout, pipe.query_async(&mut conn)).await??;
        Ok(())
    }
}
