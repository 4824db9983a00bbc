//! Error types for the querysync engine.

use thiserror::Error;

/// All possible errors surfaced by a synced query.
///
/// The enum is `Clone` so a failure can be stored in [`crate::SyncState`]
/// and handed to every observer of the state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("field cannot be used for ordering: {0}")]
    RestrictedField(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // Remote errors
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    // Local errors
    #[error("cache error: {0}")]
    Cache(String),
}

impl Error {
    /// Whether the failing operation may be retried.
    ///
    /// Only connectivity failures are retried; everything else is terminal
    /// for the generation that observed it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Whether this is a validation failure raised before any I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidKey(_) | Error::RestrictedField(_) | Error::InvalidQuery(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::InvalidKey("1st".into());
        assert_eq!(err.to_string(), "invalid key: 1st");

        let err = Error::Remote {
            code: 101,
            message: "object not found".into(),
        };
        assert_eq!(err.to_string(), "remote error 101: object not found");

        let err = Error::RestrictedField("password".into());
        assert_eq!(
            err.to_string(),
            "field cannot be used for ordering: password"
        );
    }

    #[test]
    fn classification() {
        assert!(Error::Connection("reset".into()).is_retryable());
        assert!(!Error::Cache("disk full".into()).is_retryable());
        assert!(!Error::Remote {
            code: 1,
            message: "boom".into()
        }
        .is_retryable());

        assert!(Error::InvalidQuery("empty".into()).is_validation());
        assert!(!Error::Connection("reset".into()).is_validation());
    }
}
