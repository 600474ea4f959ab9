//! Identity hash derivation.
//!
//! Identities are keyed on-ledger by the keccak-256 of their UTF-8 string
//! form; the mirror uses the same key so pointers line up with ledger state.

use tiny_keccak::{Hasher, Keccak};

/// Compute the `0x`-prefixed keccak-256 identity hash of `identity`.
pub fn identity_hash(identity: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(identity.as_bytes());
    hasher.finalize(&mut out);
    format!("0x{}", hex::encode(out))
}

/// Normalize a user-supplied hash (case, optional `0x`) to the stored form.
pub fn normalize_hash(hash: &str) -> String {
    let stripped = hash
        .strip_prefix("0x")
        .or_else(|| hash.strip_prefix("0X"))
        .unwrap_or(hash);
    format!("0x{}", stripped.to_ascii_lowercase())
}
