//! Compression of QUIC certificate chains.
//!
//! A server sends its certificate chain as a short list of entries followed by an optional zlib
//! stream. Each entry tells the peer where to find one certificate:
//!
//! - Compressed: the certificate's bytes are in the zlib stream
//! - Cached: the peer already holds it, named by its 64-bit FNV-1a hash
//! - Common: it's in a well-known set both peers compiled in, named by set hash and index
//!
//! The zlib stream is primed with a preset dictionary built from the certificates the peer
//! already knows, plus a fixed block of substrings common to X.509 certificates. This makes the
//! literal certificates compress far better than they would alone.
//!
//! Decoding is the part that faces untrusted input. [`Decompressor`] checks every count, length,
//! and reference against fixed limits and returns an [`Error`] rather than panicking.
//! [`Compressor`] produces the same format from a chain and the peer's advertised state.
//!
//! ```
//! use quic_cert_compress::{cached_cert_hashes, compress_chain, decompress_chain, CommonCertSets};
//!
//! let sets = CommonCertSets::empty();
//! let leaf = b"leaf certificate DER".to_vec();
//! let intermediate = b"intermediate certificate DER".to_vec();
//! let chain = vec![leaf, intermediate.clone()];
//!
//! // The peer has the intermediate cached
//! let peer_cache = vec![intermediate];
//! let encoded = compress_chain(&chain, &[], &cached_cert_hashes(&peer_cache), &sets).unwrap();
//! let decoded = decompress_chain(&encoded, &peer_cache, &sets).unwrap();
//! assert_eq!(decoded, chain);
//! ```
//!
//! All multi-byte integers on the wire are little-endian.

#![forbid(unsafe_code)]

pub mod common_set;
pub mod compress;
pub mod decompress;
pub mod dictionary;
pub mod entry;
pub mod error;
mod hash;

pub use self::common_set::{CommonCertSet, CommonCertSets, COMMON_SET_2_HASH, COMMON_SET_3_HASH};
pub use self::compress::{cached_cert_hashes, compress_chain, CompressOptions, Compressor};
pub use self::decompress::{decompress_chain, CacheMissPolicy, DecodeOptions, Decompressor};
pub use self::dictionary::{build_dictionary, dictionary_for, COMMON_SUBSTRINGS};
pub use self::entry::{
    count_entries, parse_entries, serialize_entries, serialized_len, ChainEntry, EntryType,
    ResolvedEntry,
};
pub use self::error::{Error, Result};
pub use self::hash::fnv1a_64;

/// The maximum number of entries a chain may hold. Anything larger is rejected before the entry
/// list is parsed.
pub const MAX_ENTRIES: usize = 10_000;
/// The maximum declared size of the uncompressed certificate data. This bounds the allocation a
/// peer can force with a single length field.
pub const MAX_UNCOMPRESSED_SIZE: usize = 128 * 1024; // 128 kiB
