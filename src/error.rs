//! Custom error types for the application.
//!
//! This module defines the primary error type, `RelayError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from configuration issues to correlation-lookup failures and archive
//! request failures.
//!
//! ## Error Hierarchy
//!
//! `RelayError` consolidates the error sources of the dispatch path:
//!
//! - **`Config` / `Configuration`**: loading and semantic validation of the
//!   settings. These occur at startup, before any document is processed, and
//!   are the only fatal errors in the system.
//! - **`UnsupportedDocument` / `UnknownKind`**: a document the dispatcher
//!   cannot route, or a wire name that maps to no known kind.
//! - **`UnknownRun` / `UnknownDescriptor`**: correlation-lookup failures; a
//!   document references a run or descriptor that is not live in the store.
//! - **`Http` / `Api`**: archive request failures, transport errors and
//!   timeouts from `reqwest`, and non-2xx responses respectively. Neither is
//!   retried.
//! - **`Payload` / `Packaging`**: serialization and zip-packaging failures on
//!   the push path.
//!
//! Every dispatch-path error is local to the document that triggered it; the
//! serving loop logs it and moves on to the next document.

use crate::document::DocumentKind;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration load error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Received unsupported document kind `{0}`")]
    UnsupportedDocument(DocumentKind),

    #[error("Unknown document kind `{0}` on the wire")]
    UnknownKind(String),

    #[error("No open run with run_start uid `{0}`")]
    UnknownRun(String),

    #[error("No registered event descriptor with uid `{0}`")]
    UnknownDescriptor(String),

    #[error("Archive request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Document payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Payload packaging error: {0}")]
    Packaging(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Document queue is closed")]
    QueueClosed,

    #[error("Relay task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<figment::Error> for RelayError {
    fn from(error: figment::Error) -> Self {
        RelayError::Config(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::UnknownRun("a1".to_string());
        assert_eq!(err.to_string(), "No open run with run_start uid `a1`");
    }

    #[test]
    fn test_unsupported_document_names_kind() {
        let err = RelayError::UnsupportedDocument(DocumentKind::DatumPage);
        assert!(err.to_string().contains("datum_page"));
    }
}
