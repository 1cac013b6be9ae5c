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

//! Wire types of the version store API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryInfo {
    pub id: String,
    pub storage_namespace: String,
    pub default_branch: String,
    #[serde(default)]
    pub creation_date: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchInfo {
    pub id: String,
    pub commit_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagInfo {
    pub id: String,
    pub commit_id: String,
}

/// One object at a ref. `physical_address` points into S3; for LFS
/// links it lands under the global `lfs/` prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStats {
    pub path: String,
    #[serde(default)]
    pub path_type: String,
    #[serde(default)]
    pub physical_address: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl ObjectStats {
    pub fn is_common_prefix(&self) -> bool {
        self.path_type == "common_prefix"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub committer: String,
    #[serde(default)]
    pub creation_date: i64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiffEntry {
    #[serde(rename = "type")]
    pub change_type: String,
    pub path: String,
    #[serde(default)]
    pub path_type: String,
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_offset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// Request body for linking an externally uploaded blob to a path.
#[derive(Debug, Clone, Serialize)]
pub struct StagingMetadata {
    pub staging: StagingLocation,
    pub checksum: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StagingLocation {
    pub physical_address: String,
}
