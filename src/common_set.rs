//! Registry of well-known certificate sets.
//!
//! Both peers compile in the same sets, each named by a 64-bit hash. A chain entry can then refer
//! to a certificate as `(set hash, index)` instead of carrying its bytes. The client advertises
//! which sets it holds by sending the concatenation of their hashes, see
//! [`CommonCertSets::advertised_hashes`].

use byteorder::{ByteOrder, LittleEndian};
use std::sync::OnceLock;

/// Identifier of the second generation of the well-known common certificate set.
pub const COMMON_SET_2_HASH: u64 = 0xe81a92926081e801;
/// Identifier of the third generation of the well-known common certificate set.
pub const COMMON_SET_3_HASH: u64 = 0x918215a28680ed7e;

/// A single compiled-in set of DER certificates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommonCertSet {
    hash: u64,
    certs: &'static [&'static [u8]],
}

impl CommonCertSet {
    pub const fn new(hash: u64, certs: &'static [&'static [u8]]) -> Self {
        Self { hash, certs }
    }

    /// The hash naming this set on the wire.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn certs(&self) -> &'static [&'static [u8]] {
        self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Fetch a certificate by index.
    pub fn get(&self, index: u32) -> Option<&'static [u8]> {
        self.certs.get(index as usize).copied()
    }

    /// Find the index of a certificate with exactly these bytes.
    pub fn position(&self, cert: &[u8]) -> Option<u32> {
        self.certs
            .iter()
            .position(|c| *c == cert)
            .and_then(|i| u32::try_from(i).ok())
    }
}

/// The full registry. Immutable once constructed, and can live in a `static`:
///
/// ```
/// use quic_cert_compress::{CommonCertSet, CommonCertSets};
///
/// static CERTS: [&[u8]; 2] = [b"first DER cert", b"second DER cert"];
/// static SETS: [CommonCertSet; 1] = [CommonCertSet::new(0x1122334455667788, &CERTS)];
/// static REGISTRY: CommonCertSets = CommonCertSets::new(&SETS);
///
/// assert_eq!(REGISTRY.lookup(0x1122334455667788, 1), Some(&b"second DER cert"[..]));
/// assert_eq!(REGISTRY.lookup(0x1122334455667788, 2), None);
/// ```
#[derive(Debug)]
pub struct CommonCertSets {
    sets: &'static [CommonCertSet],
    advertised: OnceLock<Vec<u8>>,
}

impl CommonCertSets {
    /// Build a registry over the given sets. Sets keep their registration order.
    pub const fn new(sets: &'static [CommonCertSet]) -> Self {
        Self {
            sets,
            advertised: OnceLock::new(),
        }
    }

    /// A registry with no sets. Every common reference fails to resolve against it.
    pub const fn empty() -> Self {
        Self::new(&[])
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommonCertSet> {
        self.sets.iter()
    }

    fn set(&self, set_hash: u64) -> Option<&CommonCertSet> {
        self.sets.iter().find(|s| s.hash == set_hash)
    }

    /// Look up a certificate by set hash and index. An unknown set and an out-of-range index are
    /// both just `None`.
    pub fn lookup(&self, set_hash: u64, index: u32) -> Option<&'static [u8]> {
        self.set(set_hash)?.get(index)
    }

    /// The hashes of every registered set, concatenated in registration order as 8-byte
    /// little-endian values. Built on first use and kept until
    /// [`clear_advertised_hashes`][Self::clear_advertised_hashes].
    pub fn advertised_hashes(&self) -> &[u8] {
        self.advertised.get_or_init(|| {
            let mut buf = vec![0u8; self.sets.len() * 8];
            for (chunk, set) in buf.chunks_exact_mut(8).zip(self.sets.iter()) {
                LittleEndian::write_u64(chunk, set.hash);
            }
            buf
        })
    }

    /// Release the cached hash blob. The next call to `advertised_hashes` rebuilds it.
    pub fn clear_advertised_hashes(&mut self) {
        self.advertised.take();
    }

    /// Match a certificate against the sets a client advertised.
    ///
    /// `client_set_hashes` is the client's concatenated 8-byte hash list. Sets are tried in the
    /// client's order, skipping any we don't have. A list whose length isn't a multiple of 8
    /// matches nothing.
    pub fn find(&self, client_set_hashes: &[u8], cert: &[u8]) -> Option<(u64, u32)> {
        if client_set_hashes.len() % 8 != 0 {
            return None;
        }
        client_set_hashes
            .chunks_exact(8)
            .map(LittleEndian::read_u64)
            .filter_map(|hash| self.set(hash))
            .find_map(|set| set.position(cert).map(|index| (set.hash, index)))
    }
}

/// The empty registry.
///
/// The standard sets named by [`COMMON_SET_2_HASH`] and [`COMMON_SET_3_HASH`] are not bundled.
/// A decoder built on the default registry rejects every common entry with
/// [`Error::UnknownCommonCert`](crate::Error::UnknownCommonCert), which is most real traffic.
/// Register the DER payloads with [`CommonCertSets::new`] to accept them.
impl Default for CommonCertSets {
    fn default() -> Self {
        Self::empty()
    }
}
