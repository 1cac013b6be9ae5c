// Copyright 2025 KohakuHub (https://github.com/KohakuBlueleaf/KohakuHub)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! LFS content-address primitives.
//!
//! Large files are identified by the SHA-256 of their bytes and stored
//! once, globally, at `lfs/{sha[:2]}/{sha[2:4]}/{sha}`. Git checkouts see
//! a three-line pointer file instead of the content; its exact byte
//! sequence defines the Git blob SHA, so `encode` must never change.

use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// LFS specification version advertised in pointer files.
pub const LFS_SPEC_V1: &str = "https://git-lfs.github.com/spec/v1";

/// Upper bound for content that can possibly be a pointer file.
pub const MAX_POINTER_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum LfsParseError {
    #[error("invalid oid: {0}")]
    InvalidOid(String),
    #[error("invalid pointer: {0}")]
    InvalidPointer(String),
}

/// A SHA-256 content address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid([u8; 32]);

impl Oid {
    /// Compute the OID of a byte slice.
    pub fn from_content(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Oid(bytes)
    }

    /// Parse a 64-character lowercase/uppercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, LfsParseError> {
        if s.len() != 64 {
            return Err(LfsParseError::InvalidOid(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| LfsParseError::InvalidOid(s.to_string()))?;
        Ok(Oid(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

/// S3 key for an LFS blob: two-level fanout keeps listings shallow.
pub fn lfs_key(oid_hex: &str) -> String {
    format!("lfs/{}/{}/{}", &oid_hex[..2], &oid_hex[2..4], oid_hex)
}

/// An LFS pointer: `(oid, size)` standing in for the real content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsPointer {
    pub oid: Oid,
    pub size: u64,
}

impl LfsPointer {
    pub fn new(oid: Oid, size: u64) -> Self {
        Self { oid, size }
    }

    /// Canonical pointer text. The byte sequence is normative: it is what
    /// gets hashed into the Git blob id.
    pub fn encode(&self) -> String {
        format!(
            "version {}\noid sha256:{}\nsize {}\n",
            LFS_SPEC_V1,
            self.oid.to_hex(),
            self.size
        )
    }

    /// Parse a pointer from blob content.
    pub fn parse(content: &[u8]) -> Result<Self, LfsParseError> {
        if content.len() > MAX_POINTER_SIZE {
            return Err(LfsParseError::InvalidPointer(
                "content too large to be a pointer".into(),
            ));
        }
        let text = std::str::from_utf8(content)
            .map_err(|_| LfsParseError::InvalidPointer("invalid UTF-8".into()))?;

        let mut version_found = false;
        let mut oid: Option<Oid> = None;
        let mut size: Option<u64> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(ver) = line.strip_prefix("version ") {
                if ver.trim() != LFS_SPEC_V1 {
                    return Err(LfsParseError::InvalidPointer(format!(
                        "unsupported version: {}",
                        ver
                    )));
                }
                version_found = true;
            } else if let Some(rest) = line.strip_prefix("oid sha256:") {
                oid = Some(Oid::from_hex(rest.trim())?);
            } else if let Some(rest) = line.strip_prefix("size ") {
                size = Some(
                    rest.trim()
                        .parse()
                        .map_err(|_| LfsParseError::InvalidPointer("invalid size".into()))?,
                );
            }
        }

        if !version_found {
            return Err(LfsParseError::InvalidPointer("missing version".into()));
        }
        match (oid, size) {
            (Some(oid), Some(size)) => Ok(Self { oid, size }),
            (None, _) => Err(LfsParseError::InvalidPointer("missing oid".into())),
            (_, None) => Err(LfsParseError::InvalidPointer("missing size".into())),
        }
    }

    /// Cheap check whether blob content looks like a pointer.
    pub fn is_pointer(content: &[u8]) -> bool {
        content.len() <= MAX_POINTER_SIZE
            && content.starts_with(b"version https://git-lfs.github.com/spec/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn oid_from_content_matches_known_vector() {
        let oid = Oid::from_content(b"hello");
        assert_eq!(oid.to_hex(), HELLO_SHA);
    }

    #[test]
    fn oid_hex_round_trip() {
        let oid = Oid::from_hex(HELLO_SHA).unwrap();
        assert_eq!(oid.to_hex(), HELLO_SHA);
        assert!(Oid::from_hex("abc").is_err());
        assert!(Oid::from_hex(&"g".repeat(64)).is_err());
    }

    #[test]
    fn fanout_key_layout() {
        assert_eq!(
            lfs_key(HELLO_SHA),
            format!("lfs/2c/f2/{}", HELLO_SHA)
        );
    }

    #[test]
    fn pointer_encode_is_byte_exact() {
        let ptr = LfsPointer::new(Oid::from_hex(HELLO_SHA).unwrap(), 12_582_912);
        let text = ptr.encode();
        assert_eq!(
            text,
            format!(
                "version https://git-lfs.github.com/spec/v1\noid sha256:{}\nsize 12582912\n",
                HELLO_SHA
            )
        );
        // single trailing newline, no more
        assert!(!text.ends_with("\n\n"));
    }

    #[test]
    fn pointer_parse_round_trip() {
        let ptr = LfsPointer::new(Oid::from_content(b"data"), 4);
        let parsed = LfsPointer::parse(ptr.encode().as_bytes()).unwrap();
        assert_eq!(parsed, ptr);
        assert!(LfsPointer::is_pointer(ptr.encode().as_bytes()));
        assert!(!LfsPointer::is_pointer(b"regular file content"));
    }

    #[test]
    fn pointer_parse_rejects_garbage() {
        assert!(LfsPointer::parse(b"version https://git-lfs.github.com/spec/v1\n").is_err());
        assert!(LfsPointer::parse(&[0u8; 2048]).is_err());
    }
}
