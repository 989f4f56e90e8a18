//! Content hash used to name cached certificates on the wire.
//!
//! This is plain 64-bit FNV-1a. It only addresses certificates the peer already holds, so it makes
//! no collision-resistance claims.

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Hash a certificate's bytes.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Hash every certificate in a list, keeping order.
pub(crate) fn hash_all<C: AsRef<[u8]>>(certs: &[C]) -> Vec<u64> {
    certs.iter().map(|c| fnv1a_64(c.as_ref())).collect()
}
