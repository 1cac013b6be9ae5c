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

//! File resolution: `GET/HEAD /{repo_id}/resolve/{revision}/{path}`.
//!
//! Content never streams through the hub. GET answers 302 to a
//! pre-signed S3 URL; HEAD carries the same metadata headers with no
//! redirect so huggingface_hub can cheaply probe for changes.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use kohakuhub_core::lfs_key;

use crate::api::rtype_from_uri;
use crate::auth::identify;
use crate::error::{ApiError, Result};
use crate::permission::{parse_repo_path, require_read, resolve_repo};
use crate::pipeline::lfs_oid_from_physical;
use crate::state::AppState;

struct Resolved {
    redirect_url: String,
    headers: HeaderMap,
}

async fn resolve(
    state: &AppState,
    uri: &Uri,
    request_headers: &HeaderMap,
    namespace: &str,
    name: &str,
    revision: &str,
    path: &str,
) -> Result<Resolved> {
    let rtype = rtype_from_uri(uri);
    let id = parse_repo_path(rtype.plural(), namespace, name)?;
    let identity = identify(state, request_headers).await?;
    let repo = resolve_repo(state, &id).await?;
    let access = require_read(state, repo, &identity).await?;
    let repo = access.repo;
    let lakefs_name = repo.repo_id().lakefs_name();

    let stats = state
        .lakefs
        .stat_object(&lakefs_name, revision, path)
        .await
        .map_err(|e| match e {
            kohakuhub_lakefs::LakeFsError::RefNotFound(_) => {
                ApiError::RevisionNotFound(format!("revision not found: {revision}"))
            }
            kohakuhub_lakefs::LakeFsError::NotFound(_) => {
                ApiError::EntryNotFound(format!("entry not found: {path}"))
            }
            other => other.into(),
        })?;

    // The tip commit anchors client-side caching.
    let commit_id = match state.lakefs.get_branch(&lakefs_name, revision).await {
        Ok(branch) => branch.commit_id,
        // A commit sha used directly as the revision.
        Err(e) if e.is_not_found() => revision.to_string(),
        Err(e) => return Err(e.into()),
    };

    let lfs_oid = lfs_oid_from_physical(&stats.physical_address);
    let (key, etag) = match &lfs_oid {
        Some(oid) => (lfs_key(oid), format!("\"{oid}\"")),
        None => {
            let key = stats
                .physical_address
                .strip_prefix(&format!("s3://{}/", state.store.bucket()))
                .map(str::to_string)
                .ok_or_else(|| {
                    ApiError::Internal(format!(
                        "physical address outside managed bucket: {}",
                        stats.physical_address
                    ))
                })?;
            (key, format!("\"{}\"", stats.checksum))
        }
    };

    let redirect_url = state
        .store
        .presign_get(&key, state.download_expiry())
        .await?;

    let mut headers = HeaderMap::new();
    let put = |headers: &mut HeaderMap, name: &'static str, value: &str| {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(name, v);
        }
    };
    put(&mut headers, "X-Repo-Commit", &commit_id);
    put(&mut headers, "ETag", &etag);
    if let Some(oid) = &lfs_oid {
        put(&mut headers, "X-Linked-Etag", &format!("\"sha256:{oid}\""));
    }
    put(
        &mut headers,
        "X-Linked-Size",
        &stats.size_bytes.to_string(),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(stats.size_bytes.max(0) as u64),
    );

    Ok(Resolved { redirect_url, headers })
}

pub async fn get_file(
    State(state): State<AppState>,
    uri: Uri,
    request_headers: HeaderMap,
    Path((namespace, name, revision, path)): Path<(String, String, String, String)>,
) -> Result<Response> {
    let resolved = resolve(
        &state,
        &uri,
        &request_headers,
        &namespace,
        &name,
        &revision,
        &path,
    )
    .await?;

    let mut response = StatusCode::FOUND.into_response();
    *response.headers_mut() = resolved.headers;
    response.headers_mut().insert(
        header::LOCATION,
        HeaderValue::from_str(&resolved.redirect_url)
            .map_err(|_| ApiError::Internal("unencodable redirect".into()))?,
    );
    // Redirects carry no body; the length header describes the target.
    response.headers_mut().remove(header::CONTENT_LENGTH);
    Ok(response)
}

pub async fn head_file(
    State(state): State<AppState>,
    uri: Uri,
    request_headers: HeaderMap,
    Path((namespace, name, revision, path)): Path<(String, String, String, String)>,
) -> Result<Response> {
    let resolved = resolve(
        &state,
        &uri,
        &request_headers,
        &namespace,
        &name,
        &revision,
        &path,
    )
    .await?;

    let mut response = StatusCode::OK.into_response();
    *response.headers_mut() = resolved.headers;
    Ok(response)
}
