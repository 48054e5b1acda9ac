//! Error types for the CoTravel escrow service

use thiserror::Error;

/// Result type alias using the CoTravel Error
pub type Result<T> = std::result::Result<T, Error>;

/// CoTravel error types
///
/// The five user-facing categories render as `"<Category> failed: <reason>"`;
/// clients display these messages verbatim.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Auth failed: {0}")]
    Auth(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Funding failed: {0}")]
    Funding(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Chain failed: {0}")]
    Chain(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        Error::Auth(e.to_string())
    }
}

impl Error {
    /// Invoice not found helper, used all over the engine.
    pub fn invoice_not_found(id: &str) -> Self {
        Error::NotFound {
            kind: "invoice".to_string(),
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_message_convention() {
        let e = Error::Funding("amount exceeds remaining unpaid amount".to_string());
        assert_eq!(
            e.to_string(),
            "Funding failed: amount exceeds remaining unpaid amount"
        );

        let e = Error::Auth("invalid signature".to_string());
        assert_eq!(e.to_string(), "Auth failed: invalid signature");
    }
}
