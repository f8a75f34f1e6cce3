//! Centralized error types for mailintake.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailintake library.
#[derive(Error, Debug)]
pub enum IntakeError {
    /// The mailbox rejected the credentials.
    #[error("Authentication failed for '{login}': {reason}")]
    Auth { login: String, reason: String },

    /// The mailbox could not be reached or the session dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The mailbox answered with a non-OK status.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The sequence id no longer exists (deleted between listing and fetch).
    #[error("Message {sequence_id} not found in folder '{folder}'")]
    NotFound { folder: String, sequence_id: u32 },

    /// None of the accepted date formats matched the `Date:` header.
    #[error("Unparsable date header: '{0}'")]
    UnparsableDate(String),

    /// The message bytes could not be decoded into text.
    #[error("Decode error: {0}")]
    Decode(String),

    /// HTML rasterization or tiling failed.
    #[error("Render error: {0}")]
    Render(String),

    /// The document store rejected a read or write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A profile pattern failed to compile.
    #[error("Invalid pattern '{pattern}' in profile '{profile}': {source}")]
    InvalidPattern {
        profile: String,
        pattern: String,
        source: regex::Error,
    },

    /// A source's worker thread panicked or could not be started.
    #[error("Worker for '{source_name}' failed: {reason}")]
    Worker { source_name: String, reason: String },

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, IntakeError>`.
pub type Result<T> = std::result::Result<T, IntakeError>;

impl IntakeError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for failures that exclude a single message from the batch.
    ///
    /// Everything else aborts the run and leaves the cursor untouched.
    pub fn is_message_scoped(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::UnparsableDate(_) | Self::Decode(_) | Self::Render(_)
        )
    }
}

impl From<std::io::Error> for IntakeError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

impl From<rusqlite::Error> for IntakeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(format!("document serialization: {e}"))
    }
}

impl From<imap::error::Error> for IntakeError {
    fn from(e: imap::error::Error) -> Self {
        use imap::error::Error as ImapError;
        match e {
            ImapError::No(reason) | ImapError::Bad(reason) => Self::Protocol(reason),
            ImapError::Parse(p) => Self::Protocol(format!("unparsable response: {p}")),
            other => Self::Connection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_scoped_classification() {
        assert!(IntakeError::UnparsableDate("x".into()).is_message_scoped());
        assert!(IntakeError::Decode("x".into()).is_message_scoped());
        assert!(IntakeError::Render("x".into()).is_message_scoped());
        assert!(IntakeError::NotFound {
            folder: "INBOX".into(),
            sequence_id: 3
        }
        .is_message_scoped());

        assert!(!IntakeError::Protocol("x".into()).is_message_scoped());
        assert!(!IntakeError::Connection("x".into()).is_message_scoped());
        assert!(!IntakeError::Persistence("x".into()).is_message_scoped());
        assert!(!IntakeError::Worker {
            source_name: "support".into(),
            reason: "panicked".into()
        }
        .is_message_scoped());
    }
}
