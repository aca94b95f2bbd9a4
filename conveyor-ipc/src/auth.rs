//! Shared-secret challenge/response
//!
//! The server sends a random nonce; the client proves it knows the secret by
//! answering with `hex(sha256(nonce || secret))`. The secret itself never
//! crosses the wire.

use sha2::{Digest, Sha256};

/// Fresh 256-bit nonce, hex encoded
pub fn generate_nonce() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

pub fn compute_digest(nonce: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of `digest` against the expected one
pub fn verify_digest(nonce: &str, secret: &str, digest: &str) -> bool {
    let expected = compute_digest(nonce, secret);
    if expected.len() != digest.len() {
        return false;
    }
    expected
        .bytes()
        .zip(digest.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
