//! Building a compressed certificate chain.
//!
//! The sending side looks at what the peer said it already has, both the hashes of certificates it
//! has cached and the common sets it holds, and picks the cheapest entry for each certificate.
//! Whatever is left goes into a single zlib stream, primed with the dictionary from
//! [`dictionary_for`].

use crate::common_set::CommonCertSets;
use crate::dictionary::dictionary_for;
use crate::entry::{serialize_entries, serialized_len, ChainEntry};
use crate::error::{Error, Result};
use crate::hash::fnv1a_64;
use crate::{MAX_ENTRIES, MAX_UNCOMPRESSED_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use flate2::{Compress, Compression, FlushCompress, Status};
use log::trace;
use serde::{Deserialize, Serialize};

/// Encoder settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CompressOptions {
    /// zlib compression level, 0 through 9. Larger values are clamped to 9.
    pub level: u8,
    /// Prime the stream with the chain's preset dictionary. Decoders handle either choice.
    pub use_dictionary: bool,
}

impl std::default::Default for CompressOptions {
    fn default() -> Self {
        CompressOptions {
            level: 6,
            use_dictionary: true,
        }
    }
}

/// Encodes certificate chains against a common-set registry.
#[derive(Clone, Debug)]
pub struct Compressor<'s> {
    sets: &'s CommonCertSets,
    options: CompressOptions,
}

impl<'s> Compressor<'s> {
    pub fn new(sets: &'s CommonCertSets) -> Self {
        Self::with_options(sets, CompressOptions::default())
    }

    pub fn with_options(sets: &'s CommonCertSets, options: CompressOptions) -> Self {
        Self { sets, options }
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    /// Compress a certificate chain for a peer.
    ///
    /// `client_common_set_hashes` is the peer's advertised common-set list and
    /// `client_cached_cert_hashes` the FNV-1a hashes of certificates it has cached, both as
    /// concatenated 8-byte little-endian values. Either may be empty. A list whose length isn't a
    /// multiple of 8 is ignored.
    ///
    /// # Errors
    ///
    /// Fails if the chain is empty, has more than [`MAX_ENTRIES`] certificates, or its
    /// uncompressed certificates would exceed [`MAX_UNCOMPRESSED_SIZE`], since no decoder would
    /// accept the result.
    pub fn compress<C: AsRef<[u8]>>(
        &self,
        certs: &[C],
        client_common_set_hashes: &[u8],
        client_cached_cert_hashes: &[u8],
    ) -> Result<Vec<u8>> {
        if certs.is_empty() || certs.len() > MAX_ENTRIES {
            return Err(Error::BadEntryCount {
                max: MAX_ENTRIES,
                actual: certs.len(),
            });
        }
        let entries = self.match_entries(certs, client_common_set_hashes, client_cached_cert_hashes);

        let uncompressed_size: usize = entries
            .iter()
            .zip(certs.iter())
            .filter(|(entry, _)| entry.is_compressed())
            .map(|(_, cert)| 4 + cert.as_ref().len())
            .sum();
        if uncompressed_size > MAX_UNCOMPRESSED_SIZE {
            return Err(Error::LengthTooLong {
                max: MAX_UNCOMPRESSED_SIZE,
                actual: uncompressed_size,
            });
        }

        let mut out = Vec::with_capacity(serialized_len(&entries) + 4 + uncompressed_size);
        serialize_entries(&entries, &mut out);
        if !entries.iter().any(ChainEntry::is_compressed) {
            trace!("certificate chain fully referenced: {} entries", entries.len());
            return Ok(out);
        }

        let mut payload = Vec::with_capacity(uncompressed_size);
        for (_, cert) in entries
            .iter()
            .zip(certs.iter())
            .filter(|(entry, _)| entry.is_compressed())
        {
            let cert = cert.as_ref();
            payload.extend_from_slice(&(cert.len() as u32).to_le_bytes());
            payload.extend_from_slice(cert);
        }
        let dict = if self.options.use_dictionary {
            Some(dictionary_for(&entries, certs))
        } else {
            None
        };

        out.extend_from_slice(&(uncompressed_size as u32).to_le_bytes());
        let compressed = deflate(&payload, dict.as_deref(), self.options.level)?;
        trace!(
            "certificate chain: {} entries, {} bytes deflated to {}",
            entries.len(),
            uncompressed_size,
            compressed.len()
        );
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Choose an entry for each certificate: cached if the peer has it, then common if it's in one
    /// of the peer's sets, otherwise compressed.
    fn match_entries<C: AsRef<[u8]>>(
        &self,
        certs: &[C],
        client_common_set_hashes: &[u8],
        client_cached_cert_hashes: &[u8],
    ) -> Vec<ChainEntry> {
        let cached_hashes: Vec<u64> = if client_cached_cert_hashes.len() % 8 == 0 {
            client_cached_cert_hashes
                .chunks_exact(8)
                .map(LittleEndian::read_u64)
                .collect()
        } else {
            Vec::new()
        };

        certs
            .iter()
            .map(|cert| {
                let cert = cert.as_ref();
                if !cached_hashes.is_empty() {
                    let hash = fnv1a_64(cert);
                    if cached_hashes.contains(&hash) {
                        return ChainEntry::Cached { hash };
                    }
                }
                match self.sets.find(client_common_set_hashes, cert) {
                    Some((set_hash, index)) => ChainEntry::Common { set_hash, index },
                    None => ChainEntry::Compressed,
                }
            })
            .collect()
    }
}

/// Compress a certificate chain with default options. See [`Compressor::compress`].
pub fn compress_chain<C: AsRef<[u8]>>(
    certs: &[C],
    client_common_set_hashes: &[u8],
    client_cached_cert_hashes: &[u8],
    sets: &CommonCertSets,
) -> Result<Vec<u8>> {
    Compressor::new(sets).compress(certs, client_common_set_hashes, client_cached_cert_hashes)
}

/// The cached-hash list a peer sends to advertise the certificates it holds.
pub fn cached_cert_hashes<C: AsRef<[u8]>>(certs: &[C]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(certs.len() * 8);
    for cert in certs {
        buf.extend_from_slice(&fnv1a_64(cert.as_ref()).to_le_bytes());
    }
    buf
}

/// Run `input` through zlib, optionally primed with a preset dictionary.
pub(crate) fn deflate(input: &[u8], dict: Option<&[u8]>, level: u8) -> Result<Vec<u8>> {
    let mut z = Compress::new(Compression::new(u32::from(level.min(9))), true);
    if let Some(dict) = dict {
        z.set_dictionary(dict)?;
    }

    let mut output = Vec::with_capacity(input.len() / 2 + 64);
    loop {
        let consumed = z.total_in() as usize;
        match z.compress_vec(&input[consumed..], &mut output, FlushCompress::Finish)? {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => output.reserve(output.capacity().max(64)),
        }
    }
    Ok(output)
}
