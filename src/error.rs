use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid selector `{selector}`: {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("timed out after {timeout:?} waiting for `{selector}` on {url}")]
    NavigationTimeout {
        url: String,
        selector: String,
        timeout: Duration,
    },

    #[error("section not found: {0}")]
    SectionNotFound(String),

    #[error("link not found: {0}")]
    LinkNotFound(String),

    #[error("browser session failed: {0}")]
    Browser(String),

    #[error("cannot derive a file name from {0}")]
    InvalidFileUrl(String),

    #[error("download request failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive extraction failed: {0}")]
    Extract(String),
}

impl HarvestError {
    /// Errors worth another attempt under a retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            HarvestError::NavigationTimeout { .. } | HarvestError::DownloadHttp(_) => true,
            HarvestError::DownloadStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
