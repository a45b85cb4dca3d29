use thiserror::Error;

/// A submitted job that failed schema validation. Dropped with a structured
/// log; the submitter is never notified, since the submission channel is
/// fire-and-forget.
#[derive(Error, Debug)]
pub enum InvalidJob {
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}
