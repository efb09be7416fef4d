use std::time::Duration;

use thiserror::Error;

/// Navigation or automation failure while loading one page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to start fetch session: {reason}")]
    Launch { reason: String },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("timed out after {timeout:?} waiting for `{selector}` at {url}")]
    ReadyTimeout {
        url: String,
        selector: String,
        timeout: Duration,
    },
    #[error("`{selector}` not present in document at {url}")]
    NotReady { url: String, selector: String },
    #[error("failed to tear down fetch session: {reason}")]
    Teardown { reason: String },
    #[error("session already released")]
    Released,
}

impl FetchError {
    /// Whether the session itself is suspect, as opposed to one page being
    /// slow or missing content.
    pub fn is_session_fault(&self) -> bool {
        !matches!(self, FetchError::ReadyTimeout { .. } | FetchError::NotReady { .. })
    }
}

/// Why a seed URL produced no restaurant.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("no menu categories found for {url}")]
    NoCategoriesFound { url: String },
}

impl ParseError {
    pub fn url(&self) -> &str {
        match self {
            ParseError::Fetch { url, .. } | ParseError::NoCategoriesFound { url } => url,
        }
    }
}

/// Transport or storage failure while exporting one restaurant.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("storage error on partition `{partition}`: {source}")]
    Storage {
        partition: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("partition `{0}` does not exist")]
    MissingPartition(String),
    #[error("row {row} is out of range for partition `{partition}`")]
    RowOutOfRange { partition: String, row: usize },
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Invalid page-structure contract (bad selector).
#[derive(Debug, Error)]
#[error("invalid `{name}` selector `{selector}`: {reason}")]
pub struct SelectorError {
    pub name: &'static str,
    pub selector: String,
    pub reason: String,
}
