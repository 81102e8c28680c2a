//! Session token generation.

use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::{GateError, GateResult};

/// Default entropy per token, in bytes
pub const DEFAULT_TOKEN_LENGTH: usize = 256;

/// Create a new opaque session token with `length` random bytes of entropy.
/// The token is URL-safe base64 without padding.
pub fn generate(length: usize) -> GateResult<String> {
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| GateError::internal_from("failed to generate session token", e))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token so raw values never reach the cache.
/// The hex digest is the lookup key when the token is presented.
pub fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_length_and_alphabet() {
        let token = generate(32).unwrap();
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generate_is_random() {
        assert_ne!(generate(DEFAULT_TOKEN_LENGTH).unwrap(), generate(DEFAULT_TOKEN_LENGTH).unwrap());
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let a = digest("token");
        assert_eq!(a, digest("token"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, digest("token2"));
    }
}
