use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ArpError {
    #[error("keyword is empty")]
    #[diagnostic(help("type a keyword before searching"))]
    EmptyQuery,

    #[error("a bulk load is already running")]
    RunInProgress,

    #[error("request failed: {0}")]
    Http(String),

    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("no cached result set for \"{0}\"")]
    #[diagnostic(help("run `arp load` for this keyword first"))]
    NotCached(String),

    #[error("result cache error: {0}")]
    Cache(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid filter pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid sort direction: {0}")]
    InvalidSortDirection(String),
}

impl ArpError {
    /// True for every failure that came from talking to a remote service.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ArpError::Http(_) | ArpError::Status { .. } | ArpError::Decode(_)
        )
    }
}
