//! Error taxonomy for the vault library.
//!
//! Library functions return [`Result`]; the CLI wraps these in `anyhow` at
//! the binary edge and the HTTP layer maps each variant to a status code.

use thiserror::Error;

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    /// CSV input could not be parsed into rows.
    #[error("Malformed CSV at line {line}: {message} (content: {content:?})")]
    Parse {
        line: u64,
        message: String,
        content: String,
    },

    /// A row could not be serialized for fingerprinting.
    #[error("Cannot fingerprint row: {0}")]
    Hash(String),

    /// The storage engine failed or is unreachable.
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Required input is missing or malformed at the boundary.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// A unique constraint rejected the write (e.g. contact email).
    #[error("{0}")]
    Conflict(String),

    /// The mail transport rejected or failed to accept a message.
    #[error("Mail delivery failed: {0}")]
    Mail(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// True when the caller sent bad input rather than the system failing.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::Validation(_) | Self::NotFound(_) | Self::Conflict(_)
        )
    }
}

/// True when a sqlx error is a UNIQUE violation on `target`
/// (`table.column`). Violations on any other key do not match.
pub(crate) fn is_unique_violation_on(err: &sqlx::Error, target: &str) -> bool {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => db
            .message()
            .strip_prefix("UNIQUE constraint failed: ")
            .is_some_and(|columns| columns.split(", ").any(|c| c == target)),
        _ => false,
    }
}
