//! Cryptographic primitives for the gateway
//!
//! The EIP-191 personal-message digest and random nonce/token generation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

/// Prefix on every session token
pub const SESSION_TOKEN_PREFIX: &str = "ags_";

/// Digest signed by `personal_sign`:
/// keccak256("\x19Ethereum Signed Message:\n" || len || message)
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    alloy_primitives::eip191_hash_message(message).0
}

/// Generate a challenge nonce (`len` random bytes, hex encoded)
pub fn generate_nonce(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a session token (`len` bytes from the OS RNG, base64url)
///
/// Drawn from a different generator than nonces.
pub fn generate_session_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", SESSION_TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eip191_hash() {
        // Matches ethers' hashMessage("Hello World")
        assert_eq!(
            hex::encode(eip191_hash(b"Hello World")),
            "a1de988600a42c4b4ab089b619297c17d53cffae5d5120d82d8a92d0bb3b78f2"
        );
        assert_eq!(
            hex::encode(eip191_hash(b"hello world")),
            "d9eba16ed0ecae432b71fe008c98cc872bb4cc214d3220a36f365326cf807d68"
        );
    }

    #[test]
    fn test_generate_nonce() {
        let nonce1 = generate_nonce(16);
        let nonce2 = generate_nonce(16);
        assert_eq!(nonce1.len(), 32);
        assert!(nonce1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(nonce1, nonce2);
    }

    #[test]
    fn test_generate_session_token() {
        let token = generate_session_token(32);
        assert!(token.starts_with(SESSION_TOKEN_PREFIX));

        let raw = URL_SAFE_NO_PAD
            .decode(&token[SESSION_TOKEN_PREFIX.len()..])
            .unwrap();
        assert_eq!(raw.len(), 32);
        assert_ne!(token, generate_session_token(32));
    }
}
