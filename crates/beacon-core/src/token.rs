//! Subscriber tokens.
//!
//! A token is an opaque, case-sensitive key matching `^[A-Za-z0-9]+$`. It is
//! the only identity a subscriber has: the relay never authenticates it and
//! never interprets it beyond equality.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::TokenError;

/// A validated subscriber token.
///
/// Construction is the single place the character class is enforced, so a
/// `Token` in hand is always a valid registry key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    /// Parse and validate a token.
    pub fn parse(value: &str) -> Result<Self, TokenError> {
        validate(value)?;
        Ok(Self(value.to_owned()))
    }

    /// Whether `value` would parse as a token.
    pub fn is_valid(value: &str) -> bool {
        validate(value).is_ok()
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

fn validate(value: &str) -> Result<(), TokenError> {
    if value.is_empty() {
        return Err(TokenError::Empty);
    }
    match value.char_indices().find(|(_, c)| !c.is_ascii_alphanumeric()) {
        Some((position, character)) => Err(TokenError::InvalidCharacter {
            character,
            position,
        }),
        None => Ok(()),
    }
}

impl FromStr for Token {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Token {
    type Error = TokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(Self(value))
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
