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

//! KohakuHub Core
//!
//! Fundamental types shared by every KohakuHub crate: the typed
//! configuration record, the HuggingFace-compatible error taxonomy,
//! repository identifiers with their normalization rules, and the LFS
//! content-address primitives (OID + pointer file format).

pub mod config;
pub mod error;
pub mod lfs;
pub mod repo;

pub use config::HubConfig;
pub use error::HfErrorCode;
pub use lfs::{lfs_key, LfsPointer, Oid};
pub use repo::{normalize_name, valid_name, RepoId, RepoType};
