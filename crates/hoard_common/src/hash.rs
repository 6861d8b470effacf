//! Content fingerprinting using XXH3-128.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use xxhash_rust::xxh3::Xxh3;

/// Read buffer size used when streaming file contents through the hasher.
const READ_BUF_SIZE: usize = 64 * 1024;

/// A 128-bit content fingerprint computed with XXH3-128.
///
/// Two blobs with the same `Fingerprint` are assumed to have identical content.
/// Fingerprints key every object in the cache store and every entry in a
/// manifest. They display and serialize as 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Computes a fingerprint from a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Streams a reader to the end and fingerprints everything it yields.
    ///
    /// Returns the fingerprint together with the number of bytes consumed.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<(Self, u64)> {
        let mut hasher = FingerprintHasher::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let len = hasher.len();
        Ok((hasher.finish(), len))
    }

    /// Returns the raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns the first 8 hex characters, for human-facing summaries.
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(8);
        s
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Error type for parsing fingerprint strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFingerprintError {
    /// The input string that failed to parse.
    pub input: String,
}

impl fmt::Display for ParseFingerprintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid fingerprint: '{}'", self.input)
    }
}

impl std::error::Error for ParseFingerprintError {}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseFingerprintError {
            input: s.to_string(),
        };
        if s.len() != 32 || !s.is_ascii() {
            return Err(err());
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental fingerprint computation for data that arrives in chunks.
///
/// Produces exactly the same fingerprint as [`Fingerprint::from_bytes`] over
/// the concatenation of every chunk passed to [`update`](Self::update).
pub struct FingerprintHasher {
    inner: Xxh3,
    len: u64,
}

impl FingerprintHasher {
    /// Creates a hasher with no input yet.
    pub fn new() -> Self {
        Self {
            inner: Xxh3::new(),
            len: 0,
        }
    }

    /// Feeds another chunk of input.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Returns the number of bytes fed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if no bytes have been fed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consumes the hasher and returns the fingerprint.
    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.inner.digest128().to_le_bytes())
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::new()
    }
}
