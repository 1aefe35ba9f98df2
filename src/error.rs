//! Error types for the broker.

use thiserror::Error;

/// Errors surfaced to callers of `find` and `grab`.
///
/// Individual provider and candidate failures never show up here; they are
/// logged and dropped inside the engine.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Malformed or out-of-range request field.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Unrecoverable failure after validation passed.
    #[error("broker failure: {0}")]
    Fatal(String),

    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BrokerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BrokerError::Validation(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        BrokerError::Fatal(msg.into())
    }

    /// Whether this error was raised before any network activity.
    pub fn is_validation(&self) -> bool {
        matches!(self, BrokerError::Validation(_))
    }
}

/// Why a single candidate was dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckFailure {
    /// Host is listed on a DNS blacklist.
    #[error("listed on DNSBL {list}")]
    Blacklisted { list: String },

    /// None of the requested protocol handshakes succeeded.
    #[error("no requested protocol type worked")]
    NoWorkingTypes,

    /// Host could not be parsed or resolved.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The check task was aborted before it finished.
    #[error("check cancelled")]
    Cancelled,
}
