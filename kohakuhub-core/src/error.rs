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

//! HuggingFace-compatible error codes.
//!
//! Every API error response carries one of these codes in the
//! `X-Error-Code` header so that huggingface_hub clients can map failures
//! back to their own exception types.

use serde::{Deserialize, Serialize};

/// Error codes understood by huggingface_hub clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HfErrorCode {
    RepoNotFound,
    RepoExists,
    RevisionNotFound,
    EntryNotFound,
    GatedRepo,
    BadRequest,
    QuotaExceeded,
    ServerError,
}

impl HfErrorCode {
    /// Wire name carried in the `X-Error-Code` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            HfErrorCode::RepoNotFound => "RepoNotFound",
            HfErrorCode::RepoExists => "RepoExists",
            HfErrorCode::RevisionNotFound => "RevisionNotFound",
            HfErrorCode::EntryNotFound => "EntryNotFound",
            HfErrorCode::GatedRepo => "GatedRepo",
            HfErrorCode::BadRequest => "BadRequest",
            // Quota failures are surfaced to HF clients as BadRequest;
            // the HTTP status (413) carries the real meaning.
            HfErrorCode::QuotaExceeded => "BadRequest",
            HfErrorCode::ServerError => "ServerError",
        }
    }

    /// HTTP status the code maps to.
    pub fn status(&self) -> u16 {
        match self {
            HfErrorCode::RepoNotFound
            | HfErrorCode::RevisionNotFound
            | HfErrorCode::EntryNotFound => 404,
            HfErrorCode::RepoExists | HfErrorCode::BadRequest => 400,
            HfErrorCode::GatedRepo => 403,
            HfErrorCode::QuotaExceeded => 413,
            HfErrorCode::ServerError => 500,
        }
    }
}

impl std::fmt::Display for HfErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_collapses_to_bad_request_code() {
        assert_eq!(HfErrorCode::QuotaExceeded.as_str(), "BadRequest");
        assert_eq!(HfErrorCode::QuotaExceeded.status(), 413);
    }

    #[test]
    fn not_found_family_is_404() {
        for code in [
            HfErrorCode::RepoNotFound,
            HfErrorCode::RevisionNotFound,
            HfErrorCode::EntryNotFound,
        ] {
            assert_eq!(code.status(), 404);
        }
    }
}
