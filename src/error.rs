use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid accession: {0}")]
    #[diagnostic(help("ProteomeXchange accessions look like PXD000001"))]
    InvalidAccession(String),

    #[error("a search keyword is required")]
    #[diagnostic(help("pass --keyword or set \"keyword\" in px-harvest.json"))]
    MissingKeyword,

    #[error("worker count {value} is outside the allowed range {min}..={max}")]
    InvalidWorkerCount { value: usize, min: usize, max: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("{url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("unparseable response from {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("browser session failed: {0}")]
    Browser(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to start statistics worker: {0}")]
    WorkerSpawn(String),

    #[error("interrupted")]
    Interrupted,
}

impl HarvestError {
    pub fn parse(origin: impl Into<String>, message: impl Into<String>) -> Self {
        HarvestError::Parse {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            HarvestError::Timeout { .. } | HarvestError::Connection { .. } => true,
            HarvestError::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            HarvestError::MissingKeyword
                | HarvestError::InvalidWorkerCount { .. }
                | HarvestError::InvalidConfig(_)
                | HarvestError::ConfigRead(_)
                | HarvestError::ConfigParse(_)
        )
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
