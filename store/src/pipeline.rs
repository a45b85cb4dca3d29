//! Atomic multi-command pipelines, trimmed to the operations the
//! controller/worker actually batch: setting a serialized job with a TTL and
//! pushing its id onto a priority queue in one round-trip.

/// A single operation inside a [`crate::Client::execute_pipeline`] batch.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    SetEx {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    Set {
        key: String,
        value: String,
    },
    LPush {
        key: String,
        value: String,
    },
    RPush {
        key: String,
        value: String,
    },
    SAdd {
        key: String,
        member: String,
    },
    SRem {
        key: String,
        member: String,
    },
    Incr {
        key: String,
    },
}

/// Fluent builder for a batch of [`PipelineOp`]s.
#[derive(Default)]
pub struct Pipeline {
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ex(mut self, key: impl Into<String>, value: impl Into<String>, ttl_secs: u64) -> Self {
        self.ops.push(PipelineOp::SetEx {
            key: key.into(),
            value: value.into(),
            ttl_secs,
        });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn lpush(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::LPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn rpush(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::RPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn sadd(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn srem(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::SRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn incr(mut self, key: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::Incr { key: key.into() });
        self
    }

    pub fn into_ops(self) -> Vec<PipelineOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
