//! Identity keys for callers that must not be stored in the clear.
//!
//! Error reports can arrive without a session. Their quota is keyed by a salted
//! SHA-256 of the user id when one is known, otherwise of the remote address.

use sha2::{Digest, Sha256};

const UNKNOWN_ADDR: &str = "unknown";

fn salted_hash(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Irreversible rate limit identity for an anonymous caller.
pub fn anonymous_identity(salt: &str, user_id: Option<&str>, remote_addr: Option<&str>) -> String {
    match (user_id.filter(|u| !u.is_empty()), remote_addr.filter(|a| !a.is_empty())) {
        (Some(user_id), _) => format!("user:{}", salted_hash(salt, user_id)),
        (None, Some(addr)) => format!("ip:{}", salted_hash(salt, addr)),
        (None, None) => format!("ip:{}", salted_hash(salt, UNKNOWN_ADDR)),
    }
}
