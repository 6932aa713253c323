//! Core error types.

use thiserror::Error;

/// A string could not be used as a subscriber token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The token was empty.
    #[error("token is empty")]
    Empty,
    /// The token contained a character outside `[A-Za-z0-9]`.
    #[error("invalid character {character:?} at byte {position} in token")]
    InvalidCharacter {
        /// The offending character.
        character: char,
        /// Byte offset of the character.
        position: usize,
    },
}

/// A cross-instance envelope could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The envelope or its inner notification was not valid JSON.
    #[error("malformed envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The envelope addressed an invalid token.
    #[error("envelope token rejected: {0}")]
    Token(#[from] TokenError),
}
