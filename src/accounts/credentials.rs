//! Credential digests
//!
//! Secrets are stored as hex SHA-256 of a random 16-byte salt followed by the secret.

use sha2::{Digest, Sha256};

/// Salted digest ready to be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretDigest {
    pub hash: String,
    pub salt: String,
}

impl SecretDigest {
    /// Digest a new secret under a fresh random salt
    pub fn new(secret: &str) -> Self {
        let salt = hex::encode(rand::random::<[u8; 16]>());
        let hash = digest(secret, &salt);
        Self { hash, salt }
    }

    /// Check a candidate secret against this digest
    pub fn verify(&self, secret: &str) -> bool {
        constant_time_eq(digest(secret, &self.salt).as_bytes(), self.hash.as_bytes())
    }
}

fn digest(secret: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
