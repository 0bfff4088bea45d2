//! Error types for the slideshow engine.
//!
//! Each component has its own error enum so the controller can decide how a
//! failure propagates: configuration errors are terminal, catalog errors are
//! retried on a fixed interval, load errors skip a single asset.

use thiserror::Error;

/// Missing or unusable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required key is absent or empty.
    #[error("missing configuration key: {0}")]
    Missing(&'static str),

    /// A key is present but its value cannot be used.
    #[error("invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// The configuration sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Failure of a single catalog page query.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog host could not be reached at all.
    #[error("catalog unreachable: {0}")]
    Connect(String),

    #[error("catalog request timed out")]
    Timeout,

    /// The catalog answered with a non-success status.
    #[error("catalog returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not the expected shape.
    #[error("malformed catalog response: {0}")]
    Decode(String),

    #[error("invalid catalog url: {0}")]
    Url(#[from] url::ParseError),
}

impl CatalogError {
    /// True when the failure means the catalog could not be contacted at all,
    /// as opposed to answering badly.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, CatalogError::Connect(_) | CatalogError::Timeout)
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CatalogError::Timeout
        } else if err.is_connect() {
            CatalogError::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            CatalogError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            CatalogError::Decode(err.to_string())
        } else {
            CatalogError::Connect(err.to_string())
        }
    }
}

/// Failure to turn one descriptor into a playable resource.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("fetch of {variant} for asset {id} failed: {message}")]
    Fetch {
        id: String,
        variant: &'static str,
        message: String,
    },

    #[error("fetch of {variant} for asset {id} timed out")]
    Timeout { id: String, variant: &'static str },

    #[error("fetch of {variant} for asset {id} returned HTTP {status}")]
    Status {
        id: String,
        variant: &'static str,
        status: u16,
    },

    /// The payload arrived but is not a decodable image.
    #[error("payload for asset {id} is not a usable image: {reason}")]
    Corrupt { id: String, reason: String },

    /// The payload could not be written to the spool.
    #[error("failed to spool asset {id}: {source}")]
    Store {
        id: String,
        #[source]
        source: ResourceError,
    },
}

/// Spool bookkeeping failures.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("spool I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The handle has already been released once.
    #[error("resource {0} was already released")]
    AlreadyReleased(u64),

    #[error("failed to serialize playlist snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Cursor persistence failures.
#[derive(Error, Debug)]
pub enum CursorError {
    #[error("cursor store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cursor store holds malformed data: {0}")]
    Parse(#[from] serde_json::Error),
}
