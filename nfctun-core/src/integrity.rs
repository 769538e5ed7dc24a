//! Integrity: SHA-256 digest of each relayed payload, reported with the delivery.

use sha2::{Digest, Sha256};

/// Hash a payload. Returns 32-byte digest.
pub fn payload_digest(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}
