//! Opaque version tokens.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Version marker stored per identifier.
///
/// Minted tokens are UUIDv7s in simple (32 lowercase hex chars) form: a
/// millisecond timestamp followed by random bits, so two mints never collide
/// and the value never contains a key separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Mint a fresh, unpredictable token.
    pub fn mint() -> Self {
        Token(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_minted_tokens_are_unique_hex() {
        let tokens: HashSet<Token> = (0..1000).map(|_| Token::mint()).collect();
        assert_eq!(tokens.len(), 1000);
        for token in &tokens {
            assert_eq!(token.as_str().len(), 32);
            assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
