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

//! Preupload and the commit endpoint.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use kohakuhub_core::RepoType;

use crate::auth::identify;
use crate::error::{ApiError, Result};
use crate::ndjson::parse_commit_payload;
use crate::permission::{parse_repo_path, repo_namespace, require_write, resolve_repo};
use crate::pipeline::run_commit;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PreuploadRequest {
    pub files: Vec<PreuploadFile>,
}

#[derive(Deserialize)]
pub struct PreuploadFile {
    pub path: String,
    pub size: i64,
    #[serde(default)]
    pub sha256: Option<String>,
    /// Sent by huggingface_hub for small files; unused here.
    #[serde(default)]
    pub sample: Option<String>,
}

#[derive(Serialize)]
pub struct PreuploadResponse {
    pub files: Vec<PreuploadDecision>,
}

#[derive(Serialize)]
pub struct PreuploadDecision {
    pub path: String,
    #[serde(rename = "uploadMode")]
    pub upload_mode: &'static str,
    #[serde(rename = "shouldIgnore")]
    pub should_ignore: bool,
}

/// Tell the client which path each file takes and whether the content is
/// already on the tip (dedup short-circuit).
pub async fn preupload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name, _revision)): Path<(String, String, String, String)>,
    Json(req): Json<PreuploadRequest>,
) -> Result<Json<PreuploadResponse>> {
    let id = parse_repo_path(&rtype, &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let repo = resolve_repo(&state, &id).await?;
    let access = require_write(&state, repo, &identity).await?;
    let repo = access.repo;

    let threshold = state.config.app.inline_threshold_bytes as i64;
    let mut decisions = Vec::with_capacity(req.files.len());
    for file in req.files {
        let upload_mode = if file.size > threshold { "lfs" } else { "regular" };
        let should_ignore = match &file.sha256 {
            Some(sha) => {
                state
                    .meta
                    .file_matches(&repo.full_id, repo.repo_type, &file.path, sha, file.size)
                    .await?
            }
            None => false,
        };
        decisions.push(PreuploadDecision {
            path: file.path,
            upload_mode,
            should_ignore,
        });
    }

    Ok(Json(PreuploadResponse { files: decisions }))
}

#[derive(Serialize)]
pub struct CommitResponse {
    #[serde(rename = "commitUrl")]
    pub commit_url: String,
    #[serde(rename = "commitOid")]
    pub commit_oid: String,
    #[serde(rename = "pullRequestUrl")]
    pub pull_request_url: Option<String>,
}

/// `POST /api/{type}s/{ns}/{name}/commit/{revision}` with an NDJSON body.
pub async fn create_commit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name, revision)): Path<(String, String, String, String)>,
    body: String,
) -> Result<Json<CommitResponse>> {
    let id = parse_repo_path(&rtype, &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let repo = resolve_repo(&state, &id).await?;
    let access = require_write(&state, repo, &identity).await?;
    let namespace_row = repo_namespace(&state, &access.repo).await?;

    if state.config.app.debug_log_payloads {
        tracing::debug!(
            repo = %access.repo.full_id,
            revision,
            bytes = body.len(),
            lines = body.lines().count(),
            "commit payload received"
        );
    }

    let (header, ops) =
        parse_commit_payload(&body, state.config.app.inline_threshold_bytes)?;

    let outcome = run_commit(
        &state,
        &access,
        &namespace_row,
        identity.username(),
        &revision,
        header,
        ops,
    )
    .await?;

    let base = state.config.app.base_url.trim_end_matches('/');
    let type_prefix = match access.repo.repo_type {
        RepoType::Model => String::new(),
        RepoType::Dataset => "datasets/".to_string(),
        RepoType::Space => "spaces/".to_string(),
    };
    Ok(Json(CommitResponse {
        commit_url: format!(
            "{base}/{type_prefix}{}/commit/{}",
            access.repo.full_id, outcome.commit_id
        ),
        commit_oid: outcome.commit_id,
        pull_request_url: None,
    }))
}
