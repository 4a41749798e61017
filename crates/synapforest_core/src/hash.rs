//! Content addressing.
//!
//! # Invariants
//! - A `ContentId` is always 64 lowercase hex characters.
//! - Identical byte streams always map to the same `ContentId`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

static CONTENT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid content id regex"));

/// Rejected textual content identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed content id `{0}`: expected 64 lowercase hex characters")]
pub struct InvalidContentId(pub String);

/// Hex SHA-256 digest identifying an item by its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Validates a caller-supplied identifier.
    pub fn parse(value: &str) -> Result<Self, InvalidContentId> {
        if CONTENT_ID_RE.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidContentId(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest of an in-memory buffer.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentId {
    type Error = InvalidContentId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentId> for String {
    fn from(value: ContentId) -> Self {
        value.0
    }
}

/// Streams `reader` to the end and returns the digest of everything read.
pub fn content_id_of_reader(mut reader: impl Read) -> io::Result<ContentId> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(ContentId(hex::encode(hasher.finalize())))
}

/// Hashes the full contents of the file at `path`.
pub fn content_id_of_file(path: &Path) -> io::Result<ContentId> {
    content_id_of_reader(File::open(path)?)
}
