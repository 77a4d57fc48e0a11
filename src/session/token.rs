//! Session token generation and store-key derivation.
//!
//! Tokens are 64 lowercase hex characters built from two random UUIDs.
//! Only a SHA-256 digest of the token is ever used as a store key, so a
//! leaked key listing does not leak live credentials.

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const TOKEN_LEN: usize = 64;

/// Generates a fresh, unguessable session token.
pub fn generate() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Returns true when `token` has the shape produced by [`generate`].
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub fn storage_key(token: &str) -> String {
    format!("session:{}", hex::encode(Sha256::digest(token.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_tokens_are_well_formed_and_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate()).collect();
        assert_eq!(tokens.len(), 1000);
        assert!(tokens.iter().all(|t| is_well_formed(t)));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("abc"));
        assert!(!is_well_formed(&"G".repeat(TOKEN_LEN)));
        assert!(!is_well_formed(&"A".repeat(TOKEN_LEN)));
        assert!(!is_well_formed(&"a".repeat(TOKEN_LEN + 1)));
    }

    #[test]
    fn storage_key_hides_the_token() {
        let token = generate();
        let key = storage_key(&token);
        assert!(key.starts_with("session:"));
        assert!(!key.contains(&token));
        assert_eq!(key, storage_key(&token));
    }
}
