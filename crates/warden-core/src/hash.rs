//! Digest selection and canonical byte encoding.
//!
//! Everything the kernel hashes goes through [`CanonicalBytes`]: an
//! explicit, length-prefixed field encoding with a domain separator per
//! hash purpose. Canonical bytes are the wire contract for audit
//! portability; serde field ordering is never relied on.
//!
//! # Encoding rules
//!
//! - The domain separator (a NUL-terminated ASCII tag) comes first.
//! - Strings and byte fields are prefixed with their length as a
//!   big-endian `u32`.
//! - Integers are written as raw big-endian bytes (`u64`: 8 bytes,
//!   `u32`: 4 bytes) without a length prefix.
//! - Booleans are a single byte, `0x01`/`0x00`.
//! - UUIDs are written as their hyphenated lowercase string form.
//!
//! Digest output is lowercase hex.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use uuid::Uuid;

/// Hash function used for the audit chain and evidence digests.
///
/// The algorithm is fixed per orchestrator instance and recorded in the
/// genesis hash, so a trail verifies only with the algorithm it was
/// written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (default).
    #[default]
    #[serde(rename = "SHA-256")]
    Sha256,
    /// SHA-384.
    #[serde(rename = "SHA-384")]
    Sha384,
    /// SHA-512.
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl HashAlgorithm {
    /// Canonical name, as it appears in configuration and the audit
    /// export.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Digest length in hex characters.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    /// Hashes `bytes` and returns the lowercase hex digest.
    #[must_use]
    pub fn digest_hex(self, bytes: &[u8]) -> String {
        match self {
            Self::Sha256 => hex::encode(Sha256::digest(bytes)),
            Self::Sha384 => hex::encode(Sha384::digest(bytes)),
            Self::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for domain-separated, length-prefixed canonical bytes.
///
/// Length prefixes prevent canonicalization collisions between adjacent
/// fields (`"ab" + "c"` vs `"a" + "bc"`).
#[derive(Debug, Clone)]
pub struct CanonicalBytes {
    buf: Vec<u8>,
}

impl CanonicalBytes {
    /// Starts an encoding with the given domain separator.
    #[must_use]
    pub fn with_domain(domain: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(domain.len() + 256);
        buf.extend_from_slice(domain);
        Self { buf }
    }

    /// Appends a length-prefixed string field.
    ///
    /// # Panics
    ///
    /// Panics if the string length exceeds `u32::MAX`.
    pub fn push_str(&mut self, value: &str) {
        self.buf.extend_from_slice(
            &u32::try_from(value.len())
                .expect("canonical string length fits into u32")
                .to_be_bytes(),
        );
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Appends a UUID as its hyphenated lowercase string form.
    pub fn push_uuid(&mut self, value: &Uuid) {
        let mut encode_buf = Uuid::encode_buffer();
        let s: &str = value.hyphenated().encode_lower(&mut encode_buf);
        self.push_str(s);
    }

    /// Appends a raw big-endian `u64`.
    pub fn push_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a raw big-endian `u32`.
    pub fn push_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a boolean as a single byte.
    pub fn push_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Consumes the builder and returns the encoded bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
