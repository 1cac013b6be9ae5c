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

//! Git Smart HTTP endpoints: advertisement, upload-pack, HEAD.
//!
//! Push is not served here — clients publish through the HF commit API
//! and the LFS batch endpoint — so `receive-pack` answers 501.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use kohakuhub_git::parse_upload_pack_request;

use crate::api::rtype_from_uri;
use crate::auth::identify;
use crate::error::{ApiError, Result};
use crate::gitbridge;
use crate::permission::{parse_repo_path, require_read, resolve_repo, AccessGranted};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ServiceQuery {
    #[serde(default)]
    pub service: Option<String>,
}

async fn read_repo(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    namespace: &str,
    name: &str,
) -> Result<AccessGranted> {
    let rtype = rtype_from_uri(uri);
    let id = parse_repo_path(rtype.plural(), namespace, name)?;
    let identity = identify(state, headers).await?;
    let repo = resolve_repo(state, &id).await?;
    require_read(state, repo, &identity).await
}

/// `GET /{repo}.git/info/refs?service=git-upload-pack`
pub async fn info_refs(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<ServiceQuery>,
) -> Result<Response> {
    match query.service.as_deref() {
        Some("git-upload-pack") => {}
        Some("git-receive-pack") => {
            return Ok(StatusCode::NOT_IMPLEMENTED.into_response());
        }
        _ => {
            // Dumb-protocol clients are not supported.
            return Err(ApiError::BadRequest(
                "smart protocol required: pass ?service=git-upload-pack".into(),
            ));
        }
    }

    let access = read_repo(&state, &uri, &headers, &namespace, &name).await?;
    let snapshot = gitbridge::build_snapshot(&state, &access.repo).await?;
    let body = snapshot.advertisement_body();

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                "application/x-git-upload-pack-advertisement",
            ),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// `POST /{repo}.git/git-upload-pack`
pub async fn upload_pack(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Path((namespace, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response> {
    let access = read_repo(&state, &uri, &headers, &namespace, &name).await?;

    let request = parse_upload_pack_request(&body)?;
    let snapshot = gitbridge::build_snapshot(&state, &access.repo).await?;
    let response = snapshot.upload_pack_response(&request)?;

    tracing::info!(
        repo = %access.repo.full_id,
        wants = request.wants.len(),
        haves = request.haves.len(),
        bytes = response.len(),
        "served upload-pack"
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/x-git-upload-pack-result"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        response,
    )
        .into_response())
}

/// Pushing goes through the HF commit API.
pub async fn receive_pack() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        "push is not supported; use the hub commit API",
    )
        .into_response()
}

/// `GET /{repo}.git/HEAD`
pub async fn head_ref(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response> {
    read_repo(&state, &uri, &headers, &namespace, &name).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        format!("ref: refs/heads/{}\n", crate::lifecycle::DEFAULT_BRANCH),
    )
        .into_response())
}
