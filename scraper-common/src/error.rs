use thiserror::Error;

/// Error taxonomy shared by the worker and controller binaries. Terminal,
/// job-scoped errors are kept separate from infrastructure errors so callers
/// can tell at a glance which ones produce a failure record and which ones
/// just trigger a retry.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A coordination-store failure that is expected to be transient: logged,
/// the caller skips this iteration, and the surrounding loop continues after
/// a short backoff. Never terminates a job or the process.
#[derive(Error, Debug)]
#[error("transient store error: {0}")]
pub struct StoreTransient(#[from] pub store::StoreError);

/// Terminal, job-scoped errors produced while dispatching and parsing a job.
/// Every variant here ends the job's life with a failure record; none of
/// them propagate out of the worker's main loop.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("job failed schema validation: {0}")]
    InvalidJob(String),

    #[error("invalid job url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("unknown parser {0:?}")]
    UnknownParser(String),

    #[error("parser error: {0}")]
    ParserError(String),
}

impl JobError {
    /// The `error.message` field of the resulting Failure Record.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// The `error.kind` field of the resulting Failure Record, so consumers
    /// can match on failure kind without string-parsing `message` (ground
    /// truth: `cyclotron-fetch::FetchFailure.kind`).
    pub fn kind(&self) -> JobErrorKind {
        match self {
            JobError::InvalidJob(_) => JobErrorKind::InvalidJob,
            JobError::InvalidUrl(_) => JobErrorKind::InvalidUrl,
            JobError::RequestFailed(_) => JobErrorKind::RequestFailed,
            JobError::UnknownParser(_) => JobErrorKind::UnknownParser,
            JobError::ParserError(_) => JobErrorKind::ParserError,
        }
    }
}

/// Machine-matchable counterpart to [`JobError`]'s display message, carried
/// on the Failure Record alongside the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobErrorKind {
    InvalidJob,
    InvalidUrl,
    RequestFailed,
    UnknownParser,
    ParserError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(JobError::UnknownParser("x".into()).kind(), JobErrorKind::UnknownParser);
        assert_eq!(JobError::RequestFailed("x".into()).kind(), JobErrorKind::RequestFailed);
    }
}
