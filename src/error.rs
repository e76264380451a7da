#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("Database error")]
    DatabaseError(#[from] sqlx::error::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("Config file {0} does not exist")]
    MissingConfig(String),

    #[error("Invalid config {path}: {source}")]
    Config {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Invalid seed file {path}, line {line}: {reason}")]
    Seed {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("No handler registered for project {0:?}")]
    UnknownProject(String),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Transport or HTTP status failure while fetching a document.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Could not fetch {url}: {reason}")]
    Other { url: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LinkResolutionError {
    #[error("Cannot resolve {href:?} against {base}: {source}")]
    Invalid {
        base: String,
        href: String,
        source: url::ParseError,
    },

    #[error("Unsupported scheme {scheme:?} in {url}")]
    UnsupportedScheme { url: String, scheme: String },
}

/// Failure raised by a handler while consuming a document.
#[derive(Debug, thiserror::Error)]
#[error("Handler failed on {url}: {reason}")]
pub struct HandlerError {
    pub url: String,
    pub reason: String,
}

impl HandlerError {
    pub fn new<U: Into<String>, R: ToString>(url: U, reason: R) -> Self {
        HandlerError {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
