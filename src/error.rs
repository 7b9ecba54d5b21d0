use std::path::PathBuf;

use chrono::NaiveDate;

/// Failures talking to the mail provider. These abort the whole gather
/// call; anything persisted before the failure stays on disk.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("gmail token is not available; set BCFEED_GMAIL_TOKEN or pass --token-file")]
    Auth,

    #[error("gmail request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gmail returned status {status} for {context}")]
    Status { status: u16, context: String },

    #[error("decode message payload: {0}")]
    Decode(String),
}

/// Cache write failures. Reads never produce an error: a missing or
/// malformed file is treated as an empty cache and logged.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum GatherError {
    #[error("invalid date {input:?}, expected YYYY/MM/DD")]
    InvalidDate { input: String },

    #[error("start date {start} is after end date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
