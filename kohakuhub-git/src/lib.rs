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

//! KohakuHub Git Bridge Primitives
//!
//! A native, dependency-on-libgit2-free toolkit for serving `git clone`
//! and `git fetch`: pkt-line framing, on-the-fly commit/tree/blob object
//! synthesis, non-delta version-2 packfiles, and the upload-pack
//! request/response grammar. The bridge above this crate walks the
//! version store's commit graph and feeds it through these types.

pub mod object;
pub mod pack;
pub mod pkt;
pub mod protocol;

pub use object::{object_id, CommitBuilder, GitOid, ObjectKind, TreeBuilder, TreeEntry};
pub use pack::{sideband_chunks, PackWriter, SIDEBAND_DATA, SIDEBAND_ERROR, SIDEBAND_PROGRESS};
pub use pkt::{pkt_line, Pkt, PktParser, DELIM_PKT, FLUSH_PKT};
pub use protocol::{advertisement, parse_upload_pack_request, RefAdvert, UploadPackRequest};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("malformed pkt-line: {0}")]
    MalformedPkt(String),

    #[error("malformed upload-pack request: {0}")]
    MalformedRequest(String),

    #[error("unknown object kind: {0}")]
    UnknownKind(String),
}

pub type Result<T> = std::result::Result<T, GitError>;
