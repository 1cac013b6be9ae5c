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

//! NDJSON commit payload parsing.
//!
//! The first line must be the header; every following line is one
//! operation. Anything the parser does not recognize is a hard 400 —
//! silently dropping an operation a client asked for would corrupt the
//! commit's meaning.

use base64::Engine;
use serde::Deserialize;

use kohakuhub_core::Oid;

use crate::error::{ApiError, Result};

#[derive(Debug, Clone)]
pub struct CommitHeader {
    pub summary: String,
    pub description: String,
}

/// One operation of a multi-op commit.
#[derive(Debug, Clone)]
pub enum CommitOp {
    File {
        path: String,
        content: Vec<u8>,
    },
    LfsFile {
        path: String,
        oid: Oid,
        size: i64,
    },
    DeletedFile {
        path: String,
    },
    DeletedFolder {
        path: String,
    },
    CopyFile {
        path: String,
        src_path: String,
        src_revision: Option<String>,
    },
}

impl CommitOp {
    /// Destination path the op acts on; used for per-path serialization.
    pub fn path(&self) -> &str {
        match self {
            CommitOp::File { path, .. }
            | CommitOp::LfsFile { path, .. }
            | CommitOp::DeletedFile { path }
            | CommitOp::DeletedFolder { path }
            | CommitOp::CopyFile { path, .. } => path,
        }
    }
}

#[derive(Deserialize)]
struct RawLine {
    key: String,
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct RawHeader {
    summary: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct RawFile {
    path: String,
    content: String,
    #[serde(default = "default_encoding")]
    encoding: String,
}

fn default_encoding() -> String {
    "base64".to_string()
}

#[derive(Deserialize)]
struct RawLfsFile {
    path: String,
    #[serde(default = "default_algo")]
    algo: String,
    oid: String,
    size: i64,
}

fn default_algo() -> String {
    "sha256".to_string()
}

#[derive(Deserialize)]
struct RawDeleted {
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCopy {
    path: String,
    src_path: String,
    #[serde(default)]
    src_revision: Option<String>,
}

/// Parse a complete NDJSON body.
pub fn parse_commit_payload(
    body: &str,
    inline_threshold: u64,
) -> Result<(CommitHeader, Vec<CommitOp>)> {
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());

    let header_line = lines
        .next()
        .ok_or_else(|| ApiError::BadRequest("empty commit payload".into()))?;
    let header_raw: RawLine = serde_json::from_str(header_line)
        .map_err(|e| ApiError::BadRequest(format!("malformed commit line 1: {e}")))?;
    if header_raw.key != "header" {
        return Err(ApiError::BadRequest(format!(
            "first line must be the commit header, got key {:?}",
            header_raw.key
        )));
    }
    let header: RawHeader = serde_json::from_value(header_raw.value)
        .map_err(|e| ApiError::BadRequest(format!("malformed commit header: {e}")))?;
    if header.summary.trim().is_empty() {
        return Err(ApiError::BadRequest("commit summary must not be empty".into()));
    }

    let mut ops = Vec::new();
    for (idx, line) in lines.enumerate() {
        let raw: RawLine = serde_json::from_str(line)
            .map_err(|e| ApiError::BadRequest(format!("malformed commit line {}: {e}", idx + 2)))?;
        ops.push(parse_op(raw, inline_threshold)?);
    }

    if ops.is_empty() {
        return Err(ApiError::BadRequest(
            "commit must contain at least one operation".into(),
        ));
    }

    Ok((
        CommitHeader {
            summary: header.summary,
            description: header.description,
        },
        ops,
    ))
}

fn parse_op(raw: RawLine, inline_threshold: u64) -> Result<CommitOp> {
    match raw.key.as_str() {
        "file" => {
            let file: RawFile = serde_json::from_value(raw.value)
                .map_err(|e| ApiError::BadRequest(format!("malformed file op: {e}")))?;
            if file.encoding != "base64" {
                return Err(ApiError::BadRequest(format!(
                    "unsupported file encoding: {}",
                    file.encoding
                )));
            }
            let content = base64::engine::general_purpose::STANDARD
                .decode(file.content.as_bytes())
                .map_err(|e| ApiError::BadRequest(format!("invalid base64 content: {e}")))?;
            if content.len() as u64 > inline_threshold {
                return Err(ApiError::BadRequest(format!(
                    "inline file {} exceeds {} bytes; use the LFS upload path",
                    file.path, inline_threshold
                )));
            }
            validate_path(&file.path)?;
            Ok(CommitOp::File {
                path: file.path,
                content,
            })
        }
        "lfsFile" => {
            let lfs: RawLfsFile = serde_json::from_value(raw.value)
                .map_err(|e| ApiError::BadRequest(format!("malformed lfsFile op: {e}")))?;
            if lfs.algo != "sha256" {
                return Err(ApiError::BadRequest(format!(
                    "unsupported lfs oid algorithm: {}",
                    lfs.algo
                )));
            }
            if lfs.size < 0 {
                return Err(ApiError::BadRequest("negative lfs size".into()));
            }
            let oid = Oid::from_hex(&lfs.oid)
                .map_err(|e| ApiError::BadRequest(format!("invalid lfs oid: {e}")))?;
            validate_path(&lfs.path)?;
            Ok(CommitOp::LfsFile {
                path: lfs.path,
                oid,
                size: lfs.size,
            })
        }
        "deletedFile" => {
            let del: RawDeleted = serde_json::from_value(raw.value)
                .map_err(|e| ApiError::BadRequest(format!("malformed deletedFile op: {e}")))?;
            validate_path(&del.path)?;
            Ok(CommitOp::DeletedFile { path: del.path })
        }
        "deletedFolder" => {
            let del: RawDeleted = serde_json::from_value(raw.value)
                .map_err(|e| ApiError::BadRequest(format!("malformed deletedFolder op: {e}")))?;
            let mut path = del.path;
            if !path.ends_with('/') {
                path.push('/');
            }
            Ok(CommitOp::DeletedFolder { path })
        }
        "copyFile" => {
            let copy: RawCopy = serde_json::from_value(raw.value)
                .map_err(|e| ApiError::BadRequest(format!("malformed copyFile op: {e}")))?;
            validate_path(&copy.path)?;
            validate_path(&copy.src_path)?;
            Ok(CommitOp::CopyFile {
                path: copy.path,
                src_path: copy.src_path,
                src_revision: copy.src_revision,
            })
        }
        other => Err(ApiError::BadRequest(format!(
            "unknown commit operation: {other:?}"
        ))),
    }
}

/// Reject escapes and absolute paths before they reach the version store.
fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.len() > 4096 {
        return Err(ApiError::BadRequest("invalid path length".into()));
    }
    if path.starts_with('/') || path.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty())
    {
        return Err(ApiError::BadRequest(format!("invalid path: {path}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    const INLINE: u64 = 10 * 1024 * 1024;

    fn b64(data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    fn header() -> String {
        r#"{"key":"header","value":{"summary":"init","description":"first"}}"#.to_string()
    }

    #[test]
    fn parses_mixed_ops() {
        let oid = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let body = format!(
            "{}\n{}\n{}\n{}\n",
            header(),
            format!(
                r#"{{"key":"file","value":{{"path":"config.json","content":"{}","encoding":"base64"}}}}"#,
                b64(br#"{"a":1}"#)
            ),
            format!(
                r#"{{"key":"lfsFile","value":{{"path":"model.bin","algo":"sha256","oid":"{oid}","size":12582912}}}}"#
            ),
            r#"{"key":"deletedFolder","value":{"path":"old"}}"#,
        );
        let (header, ops) = parse_commit_payload(&body, INLINE).unwrap();
        assert_eq!(header.summary, "init");
        assert_eq!(header.description, "first");
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], CommitOp::File { path, content }
            if path == "config.json" && content == br#"{"a":1}"#));
        assert!(matches!(&ops[1], CommitOp::LfsFile { size: 12_582_912, .. }));
        // Folder deletes are normalized to a trailing slash.
        assert!(matches!(&ops[2], CommitOp::DeletedFolder { path } if path == "old/"));
    }

    #[test]
    fn header_must_come_first() {
        let body = format!(
            "{}\n{}",
            r#"{"key":"deletedFile","value":{"path":"x"}}"#,
            header()
        );
        assert!(parse_commit_payload(&body, INLINE).is_err());
    }

    #[test]
    fn header_only_is_rejected() {
        assert!(parse_commit_payload(&header(), INLINE).is_err());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let body = format!("{}\n{}", header(), r#"{"key":"renameFile","value":{}}"#);
        assert!(parse_commit_payload(&body, INLINE).is_err());
    }

    #[test]
    fn inline_threshold_is_enforced() {
        let body = format!(
            "{}\n{}",
            header(),
            format!(
                r#"{{"key":"file","value":{{"path":"big.bin","content":"{}"}}}}"#,
                b64(&vec![0u8; 17])
            )
        );
        // Exactly at the threshold passes...
        assert!(parse_commit_payload(&body, 17).is_ok());
        // ...one byte under it fails.
        assert!(parse_commit_payload(&body, 16).is_err());
    }

    #[test]
    fn path_traversal_is_rejected() {
        for path in ["../up", "/abs", "a//b", "a/./b"] {
            let body = format!(
                "{}\n{}",
                header(),
                format!(r#"{{"key":"deletedFile","value":{{"path":"{path}"}}}}"#)
            );
            assert!(parse_commit_payload(&body, INLINE).is_err(), "{path}");
        }
    }

    #[test]
    fn copy_accepts_optional_revision() {
        let body = format!(
            "{}\n{}",
            header(),
            r#"{"key":"copyFile","value":{"path":"b.txt","srcPath":"a.txt"}}"#
        );
        let (_, ops) = parse_commit_payload(&body, INLINE).unwrap();
        assert!(matches!(&ops[0], CommitOp::CopyFile { src_revision: None, .. }));
    }
}
