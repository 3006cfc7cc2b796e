use std::sync::Arc;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error for everything the client does.
///
/// The cursor latches the first error it sees and keeps returning it, so the
/// type is `Clone`; the only non-clonable payload (`reqwest::Error`) is held
/// behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(String),

    #[error("transport: {0}")]
    Transport(#[source] Arc<reqwest::Error>),

    #[error("kerberos: {0}")]
    Kerberos(String),

    #[error("query failed ({status}): \"{reason}\"")]
    QueryFailed { status: u16, reason: String },

    #[error("query canceled")]
    QueryCancelled,

    #[error("server provided an unsupported {0} header")]
    UnsupportedHeader(&'static str),

    #[error("both the progress callback and the progress callback period must be set when one is")]
    InvalidProgressHeaders,

    #[error("unsupported parameter type: {0}")]
    UnsupportedParameter(&'static str),

    #[error("decode: {0}")]
    Decode(String),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl Error {
    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Whether this is the query-failed wrapper for the given HTTP status.
    pub fn is_status(&self, status: u16) -> bool {
        matches!(self, Error::QueryFailed { status: s, .. } if *s == status)
    }
}
