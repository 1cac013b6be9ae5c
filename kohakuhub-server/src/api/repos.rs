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

//! Repository CRUD endpoints.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use kohakuhub_core::{RepoId, RepoType};

use crate::auth::{identify, Identity};
use crate::error::{ApiError, Result};
use crate::lifecycle;
use crate::permission::{
    self, parse_repo_path, repo_namespace, require_read, resolve_repo,
};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateRepoRequest {
    #[serde(rename = "type", default = "default_type")]
    pub repo_type: String,
    pub name: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub private: bool,
}

fn default_type() -> String {
    "model".to_string()
}

#[derive(Serialize)]
pub struct CreateRepoResponse {
    pub url: String,
    pub repo_id: String,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRepoRequest>,
) -> Result<Json<CreateRepoResponse>> {
    let identity = identify(&state, &headers).await?;
    let repo_type = RepoType::parse(&req.repo_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown repo type: {}", req.repo_type)))?;

    let namespace = match &req.organization {
        Some(org) => org.clone(),
        None => match &identity {
            Identity::User(user) => user.username.clone(),
            _ => return Err(ApiError::Forbidden("authentication required".into())),
        },
    };
    let id = RepoId::new(repo_type, namespace, req.name.clone());
    let repo = lifecycle::create_repo(&state, &identity, &id, req.private).await?;

    let url = repo_url(&state, &repo.repo_id());
    Ok(Json(CreateRepoResponse {
        url,
        repo_id: repo.full_id,
    }))
}

#[derive(Deserialize)]
pub struct DeleteRepoRequest {
    #[serde(rename = "type", default = "default_type")]
    pub repo_type: String,
    pub name: String,
    #[serde(default)]
    pub organization: Option<String>,
}

pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteRepoRequest>,
) -> Result<Json<serde_json::Value>> {
    let identity = identify(&state, &headers).await?;
    let repo_type = RepoType::parse(&req.repo_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown repo type: {}", req.repo_type)))?;

    let (namespace, name) = match &req.organization {
        Some(org) => (org.clone(), req.name.clone()),
        None => match req.name.split_once('/') {
            Some((ns, n)) => (ns.to_string(), n.to_string()),
            None => match &identity {
                Identity::User(user) => (user.username.clone(), req.name.clone()),
                _ => return Err(ApiError::Forbidden("authentication required".into())),
            },
        },
    };
    let id = RepoId::new(repo_type, namespace, name);
    lifecycle::delete_repo(&state, &identity, &id).await?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRepoRequest {
    pub from_repo: String,
    pub to_repo: String,
    #[serde(rename = "type", default = "default_type")]
    pub repo_type: String,
}

pub async fn relocate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MoveRepoRequest>,
) -> Result<Json<serde_json::Value>> {
    let identity = identify(&state, &headers).await?;
    let repo_type = RepoType::parse(&req.repo_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown repo type: {}", req.repo_type)))?;

    let from = RepoId::from_full_id(repo_type, &req.from_repo)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid fromRepo: {}", req.from_repo)))?;
    let to = RepoId::from_full_id(repo_type, &req.to_repo)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid toRepo: {}", req.to_repo)))?;

    let moved = lifecycle::move_repo(&state, &identity, &from, &to).await?;
    Ok(Json(serde_json::json!({ "url": repo_url(&state, &moved.repo_id()) })))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(rtype): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RepoSummary>>> {
    let repo_type = RepoType::parse(&rtype)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown repo type: {rtype}")))?;
    let identity = identify(&state, &headers).await?;

    // An authenticated caller also sees private repos in namespaces they
    // belong to.
    let mut viewer_namespaces = Vec::new();
    if let Some(user) = identity.user() {
        viewer_namespaces.push(user.username.clone());
        for org in state.meta.list_user_orgs(user.id).await? {
            viewer_namespaces.push(org.name);
        }
    }

    let limit = query.limit.clamp(1, 1000);
    let repos = state
        .meta
        .list_repos(repo_type, query.author.as_deref(), &viewer_namespaces, limit)
        .await?;

    Ok(Json(
        repos
            .into_iter()
            .map(|r| RepoSummary {
                id: r.full_id.clone(),
                author: r.namespace.clone(),
                private: r.private,
                gated: r.gated,
                created_at: r.created_at,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
pub struct RepoSummary {
    pub id: String,
    pub author: String,
    pub private: bool,
    pub gated: bool,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[derive(Serialize)]
pub struct RepoInfoResponse {
    pub id: String,
    pub author: String,
    pub private: bool,
    pub gated: bool,
    pub sha: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "lastModified")]
    pub last_modified: Option<i64>,
    pub siblings: Vec<Sibling>,
}

#[derive(Serialize)]
pub struct Sibling {
    pub rfilename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

pub async fn info(
    state: State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name)): Path<(String, String, String)>,
) -> Result<Json<RepoInfoResponse>> {
    repo_info(state, headers, rtype, namespace, name, None).await
}

pub async fn info_at_revision(
    state: State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name, revision)): Path<(String, String, String, String)>,
) -> Result<Json<RepoInfoResponse>> {
    repo_info(state, headers, rtype, namespace, name, Some(revision)).await
}

async fn repo_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    rtype: String,
    namespace: String,
    name: String,
    revision: Option<String>,
) -> Result<Json<RepoInfoResponse>> {
    let id = parse_repo_path(&rtype, &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let repo = resolve_repo(&state, &id).await?;
    let access = require_read(&state, repo, &identity).await?;
    let repo = access.repo;

    let revision = revision.as_deref().unwrap_or(lifecycle::DEFAULT_BRANCH);
    let lakefs_name = repo.repo_id().lakefs_name();
    let sha = match state.lakefs.get_branch(&lakefs_name, revision).await {
        Ok(branch) => Some(branch.commit_id),
        Err(e) if e.is_not_found() => {
            return Err(ApiError::RevisionNotFound(format!(
                "revision not found: {revision}"
            )))
        }
        Err(e) => return Err(e.into()),
    };

    let files = state.meta.list_files(&repo.full_id, repo.repo_type).await?;
    let last_modified = files.iter().map(|f| f.updated_at).max();
    let siblings = files
        .into_iter()
        .map(|f| Sibling {
            rfilename: f.path_in_repo,
            size: Some(f.size),
        })
        .collect();

    Ok(Json(RepoInfoResponse {
        id: repo.full_id.clone(),
        author: repo.namespace.clone(),
        private: repo.private,
        gated: repo.gated,
        sha,
        created_at: repo.created_at,
        last_modified,
        siblings,
    }))
}

#[derive(Deserialize)]
pub struct SettingsRequest {
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default)]
    pub gated: Option<bool>,
}

pub async fn settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name)): Path<(String, String, String)>,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<serde_json::Value>> {
    let id = parse_repo_path(&rtype, &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let repo = resolve_repo(&state, &id).await?;
    let access = permission::require_delete(&state, repo, &identity).await?;
    let repo = access.repo;

    // Privacy flips migrate the repo's bytes between quota buckets, with
    // a pre-check on the destination bucket.
    if let Some(new_private) = req.private {
        if new_private != repo.private {
            let ns = repo_namespace(&state, &repo).await?;
            state
                .meta
                .quota_visibility_change(&repo, &ns, new_private)
                .await?;
        }
    }
    state
        .meta
        .update_repo_settings(repo.id, None, req.gated)
        .await?;

    Ok(Json(serde_json::json!({})))
}

pub async fn squash(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>> {
    let id = parse_repo_path(&rtype, &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let commit_id = lifecycle::squash_repo(&state, &identity, &id).await?;
    Ok(Json(serde_json::json!({ "commit": commit_id })))
}

fn repo_url(state: &AppState, id: &RepoId) -> String {
    let base = state.config.app.base_url.trim_end_matches('/');
    match id.repo_type {
        RepoType::Model => format!("{base}/{}", id.full_id()),
        RepoType::Dataset => format!("{base}/datasets/{}", id.full_id()),
        RepoType::Space => format!("{base}/spaces/{}", id.full_id()),
    }
}
