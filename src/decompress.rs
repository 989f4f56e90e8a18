//! Rebuilding a certificate chain from its compressed form.
//!
//! A compressed chain is the entry list, then optionally a 4-byte uncompressed size and a zlib
//! stream. The stream unpacks to one `length || bytes` record per compressed entry, in chain
//! order. If the stream was built against a preset dictionary, zlib asks for it partway through
//! and we build it from the entries resolved so far.

use crate::common_set::CommonCertSets;
use crate::dictionary::build_dictionary;
use crate::entry::{parse_entries, ResolvedEntry};
use crate::error::{Error, Result};
use crate::MAX_UNCOMPRESSED_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use flate2::{Decompress, FlushDecompress, Status};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// What to do with a cached entry whose hash matches none of the caller's certificates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMissPolicy {
    /// Resolve the entry to an empty certificate and carry on.
    #[default]
    Permissive,
    /// Fail the decode.
    Strict,
}

/// Decoder settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DecodeOptions {
    pub cache_miss: CacheMissPolicy,
}

/// Decodes compressed certificate chains against a common-set registry.
#[derive(Clone, Debug)]
pub struct Decompressor<'s> {
    sets: &'s CommonCertSets,
    options: DecodeOptions,
}

impl<'s> Decompressor<'s> {
    pub fn new(sets: &'s CommonCertSets) -> Self {
        Self::with_options(sets, DecodeOptions::default())
    }

    pub fn with_options(sets: &'s CommonCertSets, options: DecodeOptions) -> Self {
        Self { sets, options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Decode a compressed chain into its certificates, in chain order.
    ///
    /// `cached` holds the certificates this peer has seen before; cached entries are matched
    /// against them by FNV-1a hash.
    ///
    /// # Errors
    ///
    /// Fails on any malformed, truncated, or inconsistent input. No certificates are returned
    /// unless the whole message decodes.
    pub fn decompress<C: AsRef<[u8]>>(&self, input: &[u8], cached: &[C]) -> Result<Vec<Vec<u8>>> {
        let result = self.decompress_inner(input, cached);
        if let Err(ref e) = result {
            debug!("rejected compressed certificate chain ({} bytes): {}", input.len(), e);
        }
        result
    }

    fn decompress_inner<C: AsRef<[u8]>>(&self, input: &[u8], cached: &[C]) -> Result<Vec<Vec<u8>>> {
        let mut buf = input;
        let mut entries = parse_entries(&mut buf, cached, self.sets, &self.options)?;

        let uncompressed = if buf.is_empty() {
            Vec::new()
        } else {
            if buf.len() < 4 {
                return Err(Error::LengthTooShort {
                    step: "get uncompressed size",
                    actual: buf.len(),
                    expected: 4,
                });
            }
            let size = LittleEndian::read_u32(buf) as usize;
            if size > MAX_UNCOMPRESSED_SIZE {
                return Err(Error::LengthTooLong {
                    max: MAX_UNCOMPRESSED_SIZE,
                    actual: size,
                });
            }
            inflate(&buf[4..], size, &entries)?
        };
        trace!(
            "certificate chain: {} entries, {} bytes uncompressed",
            entries.len(),
            uncompressed.len()
        );

        fill_literals(&mut entries, &uncompressed)?;
        Ok(entries.into_iter().map(|e| e.cert).collect())
    }
}

/// Decode a compressed chain with default options. See [`Decompressor::decompress`].
pub fn decompress_chain<C: AsRef<[u8]>>(
    input: &[u8],
    cached: &[C],
    sets: &CommonCertSets,
) -> Result<Vec<Vec<u8>>> {
    Decompressor::new(sets).decompress(input, cached)
}

/// Inflate `input` into exactly `size` bytes, supplying the preset dictionary if the stream asks
/// for one. The stream must end, use all of `input`, and fill all `size` bytes.
fn inflate(input: &[u8], size: usize, entries: &[ResolvedEntry]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; size];
    let mut z = Decompress::new(true);
    let mut dict_supplied = false;
    loop {
        let in_pos = z.total_in() as usize;
        let out_pos = z.total_out() as usize;
        match z.decompress(&input[in_pos..], &mut out[out_pos..], FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => break,
            Ok(Status::Ok) | Ok(Status::BufError) => {
                let stalled = z.total_in() as usize == in_pos && z.total_out() as usize == out_pos;
                if !stalled {
                    continue;
                }
                if in_pos < input.len() {
                    return Err(Error::FailDecompress(format!(
                        "stream holds more than the declared {} bytes",
                        size
                    )));
                }
                return Err(Error::FailDecompress(format!(
                    "stream truncated after {} of {} bytes",
                    out_pos, size
                )));
            }
            Err(e) => match e.needs_dictionary() {
                Some(_) if !dict_supplied => {
                    let dict = build_dictionary(entries);
                    trace!("inflate asked for a dictionary, supplying {} bytes", dict.len());
                    z.set_dictionary(&dict)
                        .map_err(|_| Error::DictionaryMismatch)?;
                    dict_supplied = true;
                }
                _ => return Err(e.into()),
            },
        }
    }

    let consumed = z.total_in() as usize;
    if consumed != input.len() {
        return Err(Error::TrailingCompressed {
            remaining: input.len() - consumed,
        });
    }
    let produced = z.total_out() as usize;
    if produced != size {
        return Err(Error::ShortDecompress {
            expected: size,
            actual: produced,
        });
    }
    Ok(out)
}

/// Hand out the unpacked `length || bytes` records to the compressed entries, in order. Every
/// byte must be claimed.
fn fill_literals(entries: &mut [ResolvedEntry], mut data: &[u8]) -> Result<()> {
    for entry in entries.iter_mut().filter(|e| e.entry.is_compressed()) {
        if data.len() < 4 {
            return Err(Error::LengthTooShort {
                step: "get literal certificate length",
                actual: data.len(),
                expected: 4,
            });
        }
        let len = LittleEndian::read_u32(data) as usize;
        data = &data[4..];
        if len > data.len() {
            return Err(Error::LiteralOverrun {
                needed: len,
                remaining: data.len(),
            });
        }
        let (cert, rest) = data.split_at(len);
        entry.cert = cert.to_vec();
        data = rest;
    }
    if !data.is_empty() {
        return Err(Error::TrailingLiteralData {
            remaining: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common_set::test::{SET_A_HASH, SET_B_HASH, TEST_SETS};
    use crate::compress::deflate;
    use crate::dictionary::dictionary_for;
    use crate::entry::{serialize_entries, ChainEntry};
    use crate::hash::fnv1a_64;
    use crate::MAX_ENTRIES;
    use rand::Rng;

    const NO_CACHE: [&[u8]; 0] = [];

    fn entries_only(entries: &[ChainEntry]) -> Vec<u8> {
        let mut buf = Vec::new();
        serialize_entries(entries, &mut buf);
        buf
    }

    fn literal_payload(certs: &[&[u8]]) -> Vec<u8> {
        let mut payload = Vec::new();
        for cert in certs {
            payload.extend_from_slice(&(cert.len() as u32).to_le_bytes());
            payload.extend_from_slice(cert);
        }
        payload
    }

    fn message(entries: &[ChainEntry], payload: &[u8], dict: Option<&[u8]>) -> Vec<u8> {
        let mut buf = entries_only(entries);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&deflate(payload, dict, 6).unwrap());
        buf
    }

    #[test]
    fn common_only() {
        let input = entries_only(&[ChainEntry::Common {
            set_hash: SET_A_HASH,
            index: 0,
        }]);
        let certs = decompress_chain(&input, &NO_CACHE, &TEST_SETS).unwrap();
        assert_eq!(certs, vec![TEST_SETS.lookup(SET_A_HASH, 0).unwrap().to_vec()]);
    }

    #[test]
    fn single_literal_without_dictionary() {
        let payload = literal_payload(&[b"DERCERTBYTES"]);
        assert_eq!(payload.len(), 16);
        let input = message(&[ChainEntry::Compressed], &payload, None);
        let certs = decompress_chain(&input, &NO_CACHE, &TEST_SETS).unwrap();
        assert_eq!(certs, vec![b"DERCERTBYTES".to_vec()]);
    }

    #[test]
    fn cache_miss_is_empty() {
        let cached: [&[u8]; 1] = [b"some other certificate"];
        let input = entries_only(&[ChainEntry::Cached { hash: 0x1234 }]);
        let certs = decompress_chain(&input, &cached, &TEST_SETS).unwrap();
        assert_eq!(certs, vec![Vec::<u8>::new()]);

        let strict = Decompressor::with_options(
            &TEST_SETS,
            DecodeOptions {
                cache_miss: CacheMissPolicy::Strict,
            },
        );
        assert_eq!(
            strict.decompress(&input, &cached),
            Err(Error::CacheMiss { hash: 0x1234 })
        );
    }

    #[test]
    fn common_index_out_of_range() {
        let input = entries_only(&[ChainEntry::Common {
            set_hash: SET_A_HASH,
            index: 999,
        }]);
        assert_eq!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::UnknownCommonCert {
                set_hash: SET_A_HASH,
                index: 999
            })
        );
    }

    #[test]
    fn default_registry_rejects_standard_sets() {
        let sets = CommonCertSets::default();
        let input = entries_only(&[ChainEntry::Common {
            set_hash: crate::COMMON_SET_3_HASH,
            index: 0,
        }]);
        assert_eq!(
            Decompressor::new(&sets).decompress(&input, &NO_CACHE),
            Err(Error::UnknownCommonCert {
                set_hash: crate::COMMON_SET_3_HASH,
                index: 0
            })
        );
    }

    #[test]
    fn mixed_chain_with_dictionary() {
        let leaf = b"\x30\x82\x03\x00leaf certificate for example.com, issued by set A cert one";
        let cached_cert = b"\x30\x82\x02\x00a cached intermediate";
        let cached: [&[u8]; 2] = [b"unrelated", cached_cert];
        let entries = [
            ChainEntry::Compressed,
            ChainEntry::Cached {
                hash: fnv1a_64(cached_cert),
            },
            ChainEntry::Common {
                set_hash: SET_B_HASH,
                index: 0,
            },
            ChainEntry::Compressed,
        ];
        let set_b_0 = TEST_SETS.lookup(SET_B_HASH, 0).unwrap();
        let other = b"second literal certificate";
        let certs: [&[u8]; 4] = [leaf, cached_cert, set_b_0, other];
        let dict = dictionary_for(&entries, &certs);
        let input = message(&entries, &literal_payload(&[leaf, other]), Some(dict.as_slice()));

        let out = decompress_chain(&input, &cached, &TEST_SETS).unwrap();
        let expected: Vec<Vec<u8>> = certs.iter().map(|c| c.to_vec()).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn wrong_dictionary() {
        let entries = [
            ChainEntry::Common {
                set_hash: SET_A_HASH,
                index: 1,
            },
            ChainEntry::Compressed,
        ];
        let input = message(
            &entries,
            &literal_payload(&[b"literal"]),
            Some(&b"a dictionary the decoder won't build"[..]),
        );
        assert_eq!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::DictionaryMismatch)
        );
    }

    #[test]
    fn uncompressed_size_bounds() {
        // Exactly at the limit: one literal filling the whole buffer
        let big: Vec<u8> = (0..MAX_UNCOMPRESSED_SIZE - 4).map(|i| (i % 251) as u8).collect();
        let payload = literal_payload(&[&big]);
        assert_eq!(payload.len(), MAX_UNCOMPRESSED_SIZE);
        let input = message(&[ChainEntry::Compressed], &payload, None);
        let certs = decompress_chain(&input, &NO_CACHE, &TEST_SETS).unwrap();
        assert_eq!(certs, vec![big]);

        // One over: rejected before inflating anything
        let mut input = entries_only(&[ChainEntry::Compressed]);
        input.extend_from_slice(&(MAX_UNCOMPRESSED_SIZE as u32 + 1).to_le_bytes());
        input.extend_from_slice(&[0x78, 0x9c]);
        assert_eq!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::LengthTooLong {
                max: MAX_UNCOMPRESSED_SIZE,
                actual: MAX_UNCOMPRESSED_SIZE + 1
            })
        );
    }

    #[test]
    fn entry_count_bounds() {
        let entries = vec![
            ChainEntry::Common {
                set_hash: SET_A_HASH,
                index: 2,
            };
            MAX_ENTRIES
        ];
        let certs = decompress_chain(&entries_only(&entries), &NO_CACHE, &TEST_SETS).unwrap();
        assert_eq!(certs.len(), MAX_ENTRIES);

        let mut entries = entries;
        entries.push(ChainEntry::Compressed);
        assert!(matches!(
            decompress_chain(&entries_only(&entries), &NO_CACHE, &TEST_SETS),
            Err(Error::BadEntryCount { .. })
        ));
        assert!(matches!(
            decompress_chain(&[0u8], &NO_CACHE, &TEST_SETS),
            Err(Error::BadEntryCount { actual: 0, .. })
        ));
    }

    #[test]
    fn declared_size_mismatch() {
        let payload = literal_payload(&[b"certificate"]);
        let compressed = deflate(&payload, None, 6).unwrap();

        // Declared size smaller than the stream
        let mut input = entries_only(&[ChainEntry::Compressed]);
        input.extend_from_slice(&(payload.len() as u32 - 1).to_le_bytes());
        input.extend_from_slice(&compressed);
        assert!(matches!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::FailDecompress(_))
        ));

        // Declared size larger than the stream
        let mut input = entries_only(&[ChainEntry::Compressed]);
        input.extend_from_slice(&(payload.len() as u32 + 1).to_le_bytes());
        input.extend_from_slice(&compressed);
        assert_eq!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::ShortDecompress {
                expected: payload.len() + 1,
                actual: payload.len()
            })
        );
    }

    #[test]
    fn trailing_compressed_input() {
        let payload = literal_payload(&[b"certificate"]);
        let mut input = message(&[ChainEntry::Compressed], &payload, None);
        input.extend_from_slice(&[0, 0, 0]);
        assert_eq!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::TrailingCompressed { remaining: 3 })
        );
    }

    #[test]
    fn literal_framing() {
        // Length prefix claims more than remains
        let mut payload = 100u32.to_le_bytes().to_vec();
        payload.extend_from_slice(b"short");
        let input = message(&[ChainEntry::Compressed], &payload, None);
        assert_eq!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::LiteralOverrun {
                needed: 100,
                remaining: 5
            })
        );

        // Extra bytes after the last literal
        let mut payload = literal_payload(&[b"cert"]);
        payload.extend_from_slice(b"junk");
        let input = message(&[ChainEntry::Compressed], &payload, None);
        assert_eq!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::TrailingLiteralData { remaining: 4 })
        );

        // Two literals, only one record
        let payload = literal_payload(&[b"cert"]);
        let input = message(
            &[ChainEntry::Compressed, ChainEntry::Compressed],
            &payload,
            None,
        );
        assert!(matches!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::LengthTooShort { actual: 0, .. })
        ));
    }

    #[test]
    fn literal_without_payload() {
        let input = entries_only(&[ChainEntry::Compressed]);
        assert!(matches!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::LengthTooShort { actual: 0, .. })
        ));
    }

    #[test]
    fn truncated_size_field() {
        let mut input = entries_only(&[ChainEntry::Compressed]);
        input.extend_from_slice(&[1, 0]);
        assert!(matches!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::LengthTooShort {
                actual: 2,
                expected: 4,
                ..
            })
        ));
    }

    #[test]
    fn corrupt_stream() {
        let mut input = entries_only(&[ChainEntry::Compressed]);
        input.extend_from_slice(&8u32.to_le_bytes());
        input.extend_from_slice(b"not a zlib stream");
        assert!(matches!(
            decompress_chain(&input, &NO_CACHE, &TEST_SETS),
            Err(Error::FailDecompress(_))
        ));
    }

    #[test]
    fn every_truncation_fails() {
        let leaf = b"\x30\x82\x01\x00truncation test leaf";
        let entries = [
            ChainEntry::Compressed,
            ChainEntry::Common {
                set_hash: SET_A_HASH,
                index: 1,
            },
        ];
        let certs: [&[u8]; 2] = [leaf, TEST_SETS.lookup(SET_A_HASH, 1).unwrap()];
        let dict = dictionary_for(&entries, &certs);
        let input = message(&entries, &literal_payload(&[leaf]), Some(dict.as_slice()));
        assert!(decompress_chain(&input, &NO_CACHE, &TEST_SETS).is_ok());
        for len in 0..input.len() {
            assert!(
                decompress_chain(&input[..len], &NO_CACHE, &TEST_SETS).is_err(),
                "prefix of length {} decoded",
                len
            );
        }
    }

    #[test]
    fn random_corruption_never_panics() {
        let mut rng = rand::thread_rng();
        let entries = [
            ChainEntry::Compressed,
            ChainEntry::Cached { hash: 7 },
            ChainEntry::Common {
                set_hash: SET_B_HASH,
                index: 1,
            },
        ];
        let input = message(&entries, &literal_payload(&[b"random leaf"]), None);
        for _ in 0..2000 {
            let mut bad = input.clone();
            let flips = rng.gen_range(1..4);
            for _ in 0..flips {
                let i = rng.gen_range(0..bad.len());
                bad[i] = rng.gen();
            }
            let _ = decompress_chain(&bad, &NO_CACHE, &TEST_SETS);
        }
    }

    #[test]
    fn options_from_config() {
        let options: DecodeOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, DecodeOptions::default());

        let options: DecodeOptions = serde_json::from_str(r#"{"cache_miss":"Strict"}"#).unwrap();
        assert_eq!(options.cache_miss, CacheMissPolicy::Strict);

        assert!(serde_json::from_str::<DecodeOptions>(r#"{"cache_mis":"Strict"}"#).is_err());
        assert!(serde_json::from_str::<DecodeOptions>(r#"{"cache_miss":"Lenient"}"#).is_err());
    }

    #[test]
    fn options_accessor() {
        let d = Decompressor::new(&TEST_SETS);
        assert_eq!(d.options(), &DecodeOptions::default());
        assert_eq!(d.options().cache_miss, CacheMissPolicy::Permissive);
    }
}
