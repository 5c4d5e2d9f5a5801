//! Error types for the ingestion pipeline

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised while discovering, fetching and decoding procurement feeds
///
/// Only [`IngestError::is_fatal`] errors stop a run; everything else is folded
/// into per-item statistics by the pipeline.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Malformed feed: {0}")]
    MalformedFeed(String),

    #[error("Malformed entry: {0}")]
    MalformedEntry(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No discovery strategy matches URL: {0}")]
    NoDiscoveryStrategy(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Source already registered: {0}")]
    DuplicateSource(String),

    #[error("Worker panicked: {0}")]
    WorkerPanic(String),
}

impl IngestError {
    /// Configuration problems abort a run instead of being retried or skipped
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::NoDiscoveryStrategy(_)
                | IngestError::Config(_)
                | IngestError::UnknownSource(_)
                | IngestError::DuplicateSource(_)
        )
    }

    /// HTTP status of the failure, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            IngestError::HttpStatus { status, .. } => Some(*status),
            IngestError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<regex::Error> for IngestError {
    fn from(err: regex::Error) -> Self {
        IngestError::Parse(format!("Regex error: {}", err))
    }
}

impl From<IngestError> for licita_common::LicitaError {
    fn from(err: IngestError) -> Self {
        use licita_common::LicitaError;
        match err {
            IngestError::Io(e) => LicitaError::Io(e),
            IngestError::Json(e) => LicitaError::Serialization(e),
            IngestError::Http(_) | IngestError::HttpStatus { .. } => {
                LicitaError::Network(err.to_string())
            },
            IngestError::Config(_)
            | IngestError::NoDiscoveryStrategy(_)
            | IngestError::UnknownSource(_)
            | IngestError::DuplicateSource(_) => LicitaError::Config(err.to_string()),
            other => LicitaError::Parse(other.to_string()),
        }
    }
}
