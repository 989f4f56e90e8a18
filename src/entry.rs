//! The entry list that leads every compressed chain.
//!
//! Each certificate in the chain gets one entry: a tag byte, followed by a payload that depends on
//! the tag. The list ends with a zero byte.
//!
//! | Tag | Entry        | Payload                                  |
//! | --- | ------------ | ---------------------------------------- |
//! | 0   | (terminator) | none                                     |
//! | 1   | `Compressed` | none, bytes come from the deflate stream |
//! | 2   | `Cached`     | 8-byte FNV-1a hash                       |
//! | 3   | `Common`     | 8-byte set hash, 4-byte index            |
//!
//! All integers are little-endian.

use crate::common_set::CommonCertSets;
use crate::decompress::{CacheMissPolicy, DecodeOptions};
use crate::error::{Error, Result};
use crate::hash;
use crate::MAX_ENTRIES;
use byteorder::{ByteOrder, LittleEndian};
use log::warn;
use std::convert::TryFrom;

const CACHED_PAYLOAD_LEN: usize = 8;
const COMMON_PAYLOAD_LEN: usize = 8 + 4;

/// The tag byte at the start of each entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    /// Ends the entry list.
    Terminator,
    Compressed,
    Cached,
    Common,
}

impl EntryType {
    /// Bytes that follow the tag byte.
    pub fn payload_len(self) -> usize {
        match self {
            EntryType::Terminator | EntryType::Compressed => 0,
            EntryType::Cached => CACHED_PAYLOAD_LEN,
            EntryType::Common => COMMON_PAYLOAD_LEN,
        }
    }
}

impl From<EntryType> for u8 {
    fn from(val: EntryType) -> u8 {
        match val {
            EntryType::Terminator => 0,
            EntryType::Compressed => 1,
            EntryType::Cached => 2,
            EntryType::Common => 3,
        }
    }
}

impl TryFrom<u8> for EntryType {
    type Error = u8;
    fn try_from(val: u8) -> Result<EntryType, u8> {
        match val {
            0 => Ok(EntryType::Terminator),
            1 => Ok(EntryType::Compressed),
            2 => Ok(EntryType::Cached),
            3 => Ok(EntryType::Common),
            _ => Err(val),
        }
    }
}

/// Where one certificate of the chain comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainEntry {
    /// Bytes are carried in the deflate stream.
    Compressed,
    /// The peer already has this certificate; `hash` is its FNV-1a hash.
    Cached { hash: u64 },
    /// Certificate `index` of the common set named `set_hash`.
    Common { set_hash: u64, index: u32 },
}

impl ChainEntry {
    pub fn entry_type(&self) -> EntryType {
        match self {
            ChainEntry::Compressed => EntryType::Compressed,
            ChainEntry::Cached { .. } => EntryType::Cached,
            ChainEntry::Common { .. } => EntryType::Common,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, ChainEntry::Compressed)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.entry_type().into());
        match *self {
            ChainEntry::Compressed => (),
            ChainEntry::Cached { hash } => {
                buf.extend_from_slice(&hash.to_le_bytes());
            }
            ChainEntry::Common { set_hash, index } => {
                buf.extend_from_slice(&set_hash.to_le_bytes());
                buf.extend_from_slice(&index.to_le_bytes());
            }
        }
    }
}

/// An entry together with its certificate bytes. For `Compressed` entries the bytes stay empty
/// until the deflate stream has been unpacked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub entry: ChainEntry,
    pub cert: Vec<u8>,
}

/// Exact length of the encoded entry list, terminator included.
pub fn serialized_len(entries: &[ChainEntry]) -> usize {
    entries
        .iter()
        .map(|e| 1 + e.entry_type().payload_len())
        .sum::<usize>()
        + 1
}

/// Append the encoded entry list, terminator included, to `buf`.
pub fn serialize_entries(entries: &[ChainEntry], buf: &mut Vec<u8>) {
    buf.reserve(serialized_len(entries));
    for entry in entries {
        entry.encode(buf);
    }
    buf.push(EntryType::Terminator.into());
}

/// Read one tag byte, failing on end of input or an unknown tag.
fn read_tag(buf: &mut &[u8], start_len: usize) -> Result<EntryType> {
    let offset = start_len - buf.len();
    let (&tag, rest) = buf.split_first().ok_or(Error::MissingTerminator)?;
    *buf = rest;
    EntryType::try_from(tag).map_err(|tag| Error::UnknownTag { tag, offset })
}

/// Split off the fixed-width payload that follows a tag byte.
fn take_payload<'a>(buf: &mut &'a [u8], ty: EntryType) -> Result<&'a [u8]> {
    let expected = ty.payload_len();
    if buf.len() < expected {
        return Err(Error::LengthTooShort {
            step: match ty {
                EntryType::Cached => "get cached certificate hash",
                _ => "get common set hash and index",
            },
            actual: buf.len(),
            expected,
        });
    }
    let (payload, rest) = buf.split_at(expected);
    *buf = rest;
    Ok(payload)
}

/// Walk the entry list without resolving anything and return how many entries it holds.
///
/// This checks only structure: every tag is known, every payload is complete, and the terminator
/// arrives before the input runs out. Any input this accepts can be walked by [`parse_entries`]
/// without overrunning.
pub fn count_entries(buf: &[u8]) -> Result<usize> {
    let start_len = buf.len();
    let mut buf = buf;
    let mut count = 0;
    loop {
        let ty = read_tag(&mut buf, start_len)?;
        if ty == EntryType::Terminator {
            return Ok(count);
        }
        take_payload(&mut buf, ty)?;
        count += 1;
    }
}

/// Parse the entry list and resolve every cached and common reference.
///
/// Counts the entries first, rejecting lists that are empty or longer than [`MAX_ENTRIES`], then
/// resolves into storage of exactly that size. On success `buf` is left just past the terminator.
///
/// Cached entries are matched by FNV-1a hash against `cached`. A miss resolves to an empty
/// certificate unless `options` asks for [`CacheMissPolicy::Strict`].
pub fn parse_entries<C: AsRef<[u8]>>(
    buf: &mut &[u8],
    cached: &[C],
    sets: &CommonCertSets,
    options: &DecodeOptions,
) -> Result<Vec<ResolvedEntry>> {
    let capacity = count_entries(buf)?;
    if capacity == 0 || capacity > MAX_ENTRIES {
        return Err(Error::BadEntryCount {
            max: MAX_ENTRIES,
            actual: capacity,
        });
    }

    let start_len = buf.len();
    let mut resolved = Vec::with_capacity(capacity);
    let mut cached_hashes: Option<Vec<u64>> = None;
    loop {
        let ty = read_tag(buf, start_len)?;
        let resolved_entry = match ty {
            EntryType::Terminator => break,
            EntryType::Compressed => ResolvedEntry {
                entry: ChainEntry::Compressed,
                cert: Vec::new(),
            },
            EntryType::Cached => {
                let hash = LittleEndian::read_u64(take_payload(buf, ty)?);
                let hashes = cached_hashes.get_or_insert_with(|| hash::hash_all(cached));
                let cert = match hashes.iter().position(|h| *h == hash) {
                    Some(i) => cached[i].as_ref().to_vec(),
                    None => match options.cache_miss {
                        CacheMissPolicy::Strict => return Err(Error::CacheMiss { hash }),
                        CacheMissPolicy::Permissive => {
                            warn!("cached certificate {:016x} not found, using empty", hash);
                            Vec::new()
                        }
                    },
                };
                ResolvedEntry {
                    entry: ChainEntry::Cached { hash },
                    cert,
                }
            }
            EntryType::Common => {
                let payload = take_payload(buf, ty)?;
                let set_hash = LittleEndian::read_u64(&payload[..8]);
                let index = LittleEndian::read_u32(&payload[8..]);
                let cert = sets
                    .lookup(set_hash, index)
                    .ok_or(Error::UnknownCommonCert { set_hash, index })?;
                ResolvedEntry {
                    entry: ChainEntry::Common { set_hash, index },
                    cert: cert.to_vec(),
                }
            }
        };
        if resolved.len() >= capacity {
            return Err(Error::EntryCapacity { capacity });
        }
        resolved.push(resolved_entry);
    }
    Ok(resolved)
}
