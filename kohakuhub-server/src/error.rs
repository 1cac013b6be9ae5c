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

//! API error type and its HTTP mapping.
//!
//! Every failure leaving the router carries an `X-Error-Code` header
//! huggingface_hub understands. Private repositories are never revealed
//! to callers without read access: `hide_existence` collapses permission
//! failures into `RepoNotFound` before they reach the wire.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use kohakuhub_core::HfErrorCode;
use kohakuhub_lakefs::LakeFsError;
use kohakuhub_meta::MetaError;
use kohakuhub_storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    RepoNotFound(String),

    #[error("{0}")]
    RevisionNotFound(String),

    #[error("{0}")]
    EntryNotFound(String),

    #[error("{0}")]
    RepoExists(String),

    #[error("{0}")]
    GatedRepo(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    QuotaExceeded(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn code(&self) -> HfErrorCode {
        match self {
            ApiError::RepoNotFound(_) => HfErrorCode::RepoNotFound,
            ApiError::RevisionNotFound(_) => HfErrorCode::RevisionNotFound,
            ApiError::EntryNotFound(_) => HfErrorCode::EntryNotFound,
            ApiError::RepoExists(_) => HfErrorCode::RepoExists,
            ApiError::GatedRepo(_) => HfErrorCode::GatedRepo,
            ApiError::BadRequest(_) => HfErrorCode::BadRequest,
            ApiError::Forbidden(_) => HfErrorCode::GatedRepo,
            ApiError::Conflict(_) => HfErrorCode::BadRequest,
            ApiError::QuotaExceeded(_) => HfErrorCode::QuotaExceeded,
            ApiError::Internal(_) => HfErrorCode::ServerError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            other => StatusCode::from_u16(other.code().status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }

        let mut response = (status, Json(ErrorBody { error: message.clone() })).into_response();
        let headers = response.headers_mut();
        headers.insert("X-Error-Code", HeaderValue::from_static(code.as_str()));
        if let Ok(value) = HeaderValue::from_str(&message) {
            headers.insert("X-Error-Message", value);
        }
        response
    }
}

impl From<MetaError> for ApiError {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::NotFound(msg) => ApiError::EntryNotFound(msg),
            MetaError::Conflict(msg) => ApiError::Conflict(msg),
            MetaError::InvalidInput(msg) => ApiError::BadRequest(msg),
            MetaError::QuotaExceeded(msg) => ApiError::QuotaExceeded(msg),
            MetaError::Database(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<LakeFsError> for ApiError {
    fn from(err: LakeFsError) -> Self {
        match err {
            LakeFsError::RefNotFound(msg) => ApiError::RevisionNotFound(msg),
            LakeFsError::NotFound(msg) => ApiError::EntryNotFound(msg),
            LakeFsError::Conflict(msg) => ApiError::Conflict(msg),
            LakeFsError::PreconditionFailed(msg) => ApiError::BadRequest(msg),
            LakeFsError::Transient(msg) | LakeFsError::Api { message: msg, .. } => {
                ApiError::Internal(msg)
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => ApiError::EntryNotFound(msg),
            StorageError::Transient(msg) | StorageError::S3(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<kohakuhub_git::GitError> for ApiError {
    fn from(err: kohakuhub_git::GitError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(ApiError::RepoNotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::RepoExists("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::QuotaExceeded("x".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ApiError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn quota_code_presents_as_bad_request() {
        assert_eq!(ApiError::QuotaExceeded("x".into()).code().as_str(), "BadRequest");
    }
}
