use crate::Hash32;
use sha2::{Digest, Sha256};

/// Compute a deterministic SHA-256 hash of a byte slice.
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash32(hasher.finalize().into())
}

/// Compute a domain-separated SHA-256 hash: `H(domain || data)`.
pub fn sha256_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    Hash32(hasher.finalize().into())
}

/// Domain separation tag for hashing canonical system state.
pub const STATE_HASH_DOMAIN_V1: &[u8] = b"VE_CORE_STATE_V1";

/// Domain separation tag for hashing action traces.
pub const TRACE_HASH_DOMAIN_V1: &[u8] = b"VE_CORE_TRACE_V1";

/// Hash canonical v1 state bytes into a commitment.
pub fn hash_state_v1(state_bytes: &[u8]) -> Hash32 {
    sha256_domain(STATE_HASH_DOMAIN_V1, state_bytes)
}
