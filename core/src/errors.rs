//! Unified error types for the docsync core crate.
//!
//! Every public operation returns [`CoreError`]. Variants are grouped by the
//! layer that raises them rather than by component, since callers (the CLI,
//! a future sync worker) generally want to know "is this retryable" or "is
//! this a user mistake", not which internal module produced it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// No local folder is bound to a server.
    #[error("not bound: {0}")]
    NotBound(String),

    /// A bind was requested for a folder that is already bound.
    #[error("already bound: {0}")]
    AlreadyBound(String),

    /// A local path does not resolve to any known binding.
    #[error("no binding covers path: {0}")]
    NotFound(String),

    /// A local path falls inside more than one binding.
    #[error("path is covered by multiple bindings: {0}")]
    AmbiguousBinding(String),

    /// A server URL failed to normalize (empty, or otherwise unusable).
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    /// An operation needed a token but the binding has none.
    #[error("no token available for this binding")]
    NoToken,

    /// The remote server rejected the active credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// A remote call failed at the transport layer.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Encryption or decryption of a stored secret failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A pair-state transition was requested that the state machine forbids.
    #[error("illegal pair state transition: {0}")]
    IllegalPairState(String),

    /// The on-disk store's schema version does not match this build.
    #[error("schema error: {0}")]
    Schema(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A low-level database error.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_bound_display() {
        let err = CoreError::NotBound("/home/alice/Docs".into());
        assert_eq!(err.to_string(), "not bound: /home/alice/Docs");
    }

    #[test]
    fn core_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let core_err: CoreError = io_err.into();
        assert_eq!(core_err.to_string(), "I/O error: gone");
    }

    #[test]
    fn core_error_from_db_error() {
        let db_err = rusqlite::Error::QueryReturnedNoRows;
        let core_err: CoreError = db_err.into();
        assert!(core_err.to_string().starts_with("database error"));
    }
}
