use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An entry tag byte that isn't compressed, cached, common, or the terminator.
    UnknownTag { tag: u8, offset: usize },
    /// A fixed-width field ran past the end of the input.
    LengthTooShort {
        step: &'static str,
        actual: usize,
        expected: usize,
    },
    /// The entry list ended without a terminator byte.
    MissingTerminator,
    /// Entry list was empty or had more entries than allowed.
    BadEntryCount { max: usize, actual: usize },
    /// Declared uncompressed size was greater than the maximum allowed size.
    LengthTooLong { max: usize, actual: usize },
    /// A common-set reference named an unregistered set or an out-of-range index.
    UnknownCommonCert { set_hash: u64, index: u32 },
    /// A cached reference matched none of the supplied certificates. Only raised in strict mode.
    CacheMiss { hash: u64 },
    /// The resolving pass produced more entries than the counting pass admitted.
    EntryCapacity { capacity: usize },
    /// Occurs when inflate fails, the stream is corrupt, or it asks for a second dictionary.
    FailDecompress(String),
    /// The preset dictionary we built was rejected by the stream.
    DictionaryMismatch,
    /// Compressed input was left over once the stream ended.
    TrailingCompressed { remaining: usize },
    /// The stream ended before filling the declared uncompressed size.
    ShortDecompress { expected: usize, actual: usize },
    /// A literal certificate's length prefix ran past the decompressed data.
    LiteralOverrun { needed: usize, remaining: usize },
    /// Decompressed bytes were left over after every literal was assigned.
    TrailingLiteralData { remaining: usize },
    /// Deflate failed while building a compressed chain.
    FailCompress(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::UnknownTag { tag, offset } => {
                write!(f, "Unknown entry tag 0x{:02x} at offset {}", tag, offset)
            }
            Error::LengthTooShort {
                step,
                actual,
                expected,
            } => write!(
                f,
                "Expected data length {}, but got {} on step [{}]",
                expected, actual, step
            ),
            Error::MissingTerminator => f.write_str("Entry list has no terminator"),
            Error::BadEntryCount { max, actual } => write!(
                f,
                "Entry list has {} entries, must be between 1 and {}",
                actual, max
            ),
            Error::LengthTooLong { max, actual } => write!(
                f,
                "Data too long: was {} bytes, maximum allowed is {}",
                actual, max
            ),
            Error::UnknownCommonCert { set_hash, index } => write!(
                f,
                "No common certificate at index {} of set {:016x}",
                index, set_hash
            ),
            Error::CacheMiss { hash } => {
                write!(f, "No cached certificate has hash {:016x}", hash)
            }
            Error::EntryCapacity { capacity } => write!(
                f,
                "Entry list exceeded its counted capacity of {}",
                capacity
            ),
            Error::FailDecompress(ref err) => write!(f, "Failed decompression step: {}", err),
            Error::DictionaryMismatch => f.write_str("Preset dictionary rejected by stream"),
            Error::TrailingCompressed { remaining } => write!(
                f,
                "{} bytes of compressed data left after end of stream",
                remaining
            ),
            Error::ShortDecompress { expected, actual } => write!(
                f,
                "Decompressed {} bytes, but {} were declared",
                actual, expected
            ),
            Error::LiteralOverrun { needed, remaining } => write!(
                f,
                "Literal certificate needs {} bytes, only {} remain",
                needed, remaining
            ),
            Error::TrailingLiteralData { remaining } => write!(
                f,
                "{} decompressed bytes left after the last literal certificate",
                remaining
            ),
            Error::FailCompress(ref err) => write!(f, "Failed compression step: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl std::convert::From<flate2::DecompressError> for Error {
    fn from(e: flate2::DecompressError) -> Self {
        Self::FailDecompress(e.to_string())
    }
}

impl std::convert::From<flate2::CompressError> for Error {
    fn from(e: flate2::CompressError) -> Self {
        Self::FailCompress(e.to_string())
    }
}
