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

//! Tree listings, bulk stat, the commit log and ref management.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use kohakuhub_lakefs::ObjectStats;
use kohakuhub_meta::Repository;

use crate::auth::identify;
use crate::error::{ApiError, Result};
use crate::permission::{parse_repo_path, require_read, require_write, resolve_repo, AccessGranted};
use crate::pipeline::lfs_oid_from_physical;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct TreeQuery {
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub expand: bool,
}

/// One entry of a tree listing, HF-shaped.
#[derive(Serialize)]
pub struct TreeEntryOut {
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    pub path: String,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lfs: Option<LfsMeta>,
}

#[derive(Serialize)]
pub struct LfsMeta {
    pub oid: String,
    pub size: i64,
    #[serde(rename = "pointerSize")]
    pub pointer_size: i64,
}

async fn read_access(
    state: &AppState,
    headers: &HeaderMap,
    rtype: &str,
    namespace: &str,
    name: &str,
) -> Result<AccessGranted> {
    let id = parse_repo_path(rtype, namespace, name)?;
    let identity = identify(state, headers).await?;
    let repo = resolve_repo(state, &id).await?;
    require_read(state, repo, &identity).await
}

pub async fn list_root(
    state: State<AppState>,
    headers: HeaderMap,
    path: Path<(String, String, String, String)>,
    query: Query<TreeQuery>,
) -> Result<Json<Vec<TreeEntryOut>>> {
    let Path((rtype, namespace, name, revision)) = path;
    list_tree(state, headers, rtype, namespace, name, revision, String::new(), query.0).await
}

pub async fn list_path(
    state: State<AppState>,
    headers: HeaderMap,
    path: Path<(String, String, String, String, String)>,
    query: Query<TreeQuery>,
) -> Result<Json<Vec<TreeEntryOut>>> {
    let Path((rtype, namespace, name, revision, subpath)) = path;
    list_tree(state, headers, rtype, namespace, name, revision, subpath, query.0).await
}

#[allow(clippy::too_many_arguments)]
async fn list_tree(
    State(state): State<AppState>,
    headers: HeaderMap,
    rtype: String,
    namespace: String,
    name: String,
    revision: String,
    subpath: String,
    query: TreeQuery,
) -> Result<Json<Vec<TreeEntryOut>>> {
    let access = read_access(&state, &headers, &rtype, &namespace, &name).await?;
    let repo = access.repo;
    let lakefs_name = repo.repo_id().lakefs_name();

    let mut prefix = subpath.trim_start_matches('/').to_string();
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix.push('/');
    }

    let page = state
        .lakefs
        .list_objects(&lakefs_name, &revision, &prefix, query.recursive, None, 1000)
        .await
        .map_err(revision_error(&revision))?;

    let mut out = Vec::with_capacity(page.results.len());
    for stats in page.results {
        out.push(tree_entry(&state, &repo, stats, query.expand).await?);
    }
    Ok(Json(out))
}

async fn tree_entry(
    state: &AppState,
    repo: &Repository,
    stats: ObjectStats,
    expand: bool,
) -> Result<TreeEntryOut> {
    if stats.is_common_prefix() {
        return Ok(TreeEntryOut {
            entry_type: "directory",
            path: stats.path.trim_end_matches('/').to_string(),
            size: 0,
            oid: None,
            lfs: None,
        });
    }

    let lfs_oid = lfs_oid_from_physical(&stats.physical_address);
    let lfs = match (&lfs_oid, expand) {
        (Some(oid), true) => Some(LfsMeta {
            oid: oid.clone(),
            size: stats.size_bytes,
            pointer_size: pointer_size(oid, stats.size_bytes),
        }),
        _ => None,
    };

    // The dedup index knows the content sha; fall back to the version
    // store checksum for revisions that predate the index.
    let oid = if let Some(oid) = &lfs_oid {
        Some(oid.clone())
    } else {
        match state
            .meta
            .get_file(&repo.full_id, repo.repo_type, &stats.path)
            .await?
        {
            Some(row) if row.size == stats.size_bytes => Some(row.sha256),
            _ => (!stats.checksum.is_empty()).then(|| stats.checksum.clone()),
        }
    };

    Ok(TreeEntryOut {
        entry_type: "file",
        path: stats.path,
        size: stats.size_bytes,
        oid,
        lfs,
    })
}

fn pointer_size(oid_hex: &str, size: i64) -> i64 {
    // version line + oid line + size line, exactly as encoded.
    ("version https://git-lfs.github.com/spec/v1\n".len()
        + "oid sha256:".len()
        + oid_hex.len()
        + 1
        + "size ".len()
        + size.to_string().len()
        + 1) as i64
}

#[derive(Deserialize)]
pub struct PathsInfoRequest {
    pub paths: Vec<String>,
    #[serde(default)]
    pub expand: bool,
}

pub async fn paths_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name, revision)): Path<(String, String, String, String)>,
    Json(req): Json<PathsInfoRequest>,
) -> Result<Json<Vec<TreeEntryOut>>> {
    let access = read_access(&state, &headers, &rtype, &namespace, &name).await?;
    let repo = access.repo;
    let lakefs_name = repo.repo_id().lakefs_name();

    let mut out = Vec::new();
    for path in req.paths {
        match state.lakefs.stat_object(&lakefs_name, &revision, &path).await {
            Ok(stats) => out.push(tree_entry(&state, &repo, stats, req.expand).await?),
            Err(e) if e.is_not_found() => {
                // Bulk stat skips missing paths rather than failing the
                // whole request; the HF client diffs the result.
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Json(out))
}

#[derive(Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub p: i64,
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

fn default_log_limit() -> i64 {
    20
}

#[derive(Serialize)]
pub struct CommitOut {
    pub id: String,
    pub title: String,
    pub message: String,
    pub authors: Vec<String>,
    pub date: i64,
}

pub async fn commit_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name, revision)): Path<(String, String, String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<CommitOut>>> {
    let access = read_access(&state, &headers, &rtype, &namespace, &name).await?;
    let repo = access.repo;

    let limit = query.limit.clamp(1, 100);
    let offset = query.p.max(0) * limit;
    let commits = state
        .meta
        .list_commits(&repo.full_id, repo.repo_type, &revision, limit, offset)
        .await?;

    Ok(Json(
        commits
            .into_iter()
            .map(|c| CommitOut {
                id: c.commit_id,
                title: c.message,
                message: c.description,
                authors: vec![c.username],
                date: c.created_at,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
pub struct RefOut {
    pub name: String,
    #[serde(rename = "ref")]
    pub ref_path: String,
    #[serde(rename = "targetCommit")]
    pub target_commit: String,
}

#[derive(Serialize)]
pub struct RefsResponse {
    pub branches: Vec<RefOut>,
    pub tags: Vec<RefOut>,
}

pub async fn refs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name)): Path<(String, String, String)>,
) -> Result<Json<RefsResponse>> {
    let access = read_access(&state, &headers, &rtype, &namespace, &name).await?;
    let lakefs_name = access.repo.repo_id().lakefs_name();

    let branches = state
        .lakefs
        .list_branches(&lakefs_name)
        .await?
        .into_iter()
        .map(|b| RefOut {
            ref_path: format!("refs/heads/{}", b.id),
            name: b.id,
            target_commit: b.commit_id,
        })
        .collect();
    let tags = state
        .lakefs
        .list_tags(&lakefs_name)
        .await?
        .into_iter()
        .map(|t| RefOut {
            ref_path: format!("refs/tags/{}", t.id),
            name: t.id,
            target_commit: t.commit_id,
        })
        .collect();

    Ok(Json(RefsResponse { branches, tags }))
}

#[derive(Deserialize, Default)]
pub struct BranchFrom {
    #[serde(default)]
    pub starting_point: Option<String>,
}

pub async fn create_branch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name, branch)): Path<(String, String, String, String)>,
    body: Option<Json<BranchFrom>>,
) -> Result<Json<serde_json::Value>> {
    let id = parse_repo_path(&rtype, &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let repo = resolve_repo(&state, &id).await?;
    let access = require_write(&state, repo, &identity).await?;
    let lakefs_name = access.repo.repo_id().lakefs_name();

    let source = body
        .and_then(|b| b.0.starting_point)
        .unwrap_or_else(|| crate::lifecycle::DEFAULT_BRANCH.to_string());
    state
        .lakefs
        .create_branch(&lakefs_name, &branch, &source)
        .await
        .map_err(revision_error(&source))?;
    Ok(Json(serde_json::json!({})))
}

pub async fn delete_branch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name, branch)): Path<(String, String, String, String)>,
) -> Result<Json<serde_json::Value>> {
    let id = parse_repo_path(&rtype, &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let repo = resolve_repo(&state, &id).await?;
    let access = require_write(&state, repo, &identity).await?;

    if branch == crate::lifecycle::DEFAULT_BRANCH {
        return Err(ApiError::BadRequest("cannot delete the default branch".into()));
    }
    state
        .lakefs
        .delete_branch(&access.repo.repo_id().lakefs_name(), &branch)
        .await
        .map_err(revision_error(&branch))?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Deserialize, Default)]
pub struct TagBody {
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn create_tag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name, tag)): Path<(String, String, String, String)>,
    body: Option<Json<TagBody>>,
) -> Result<Json<serde_json::Value>> {
    let id = parse_repo_path(&rtype, &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let repo = resolve_repo(&state, &id).await?;
    let access = require_write(&state, repo, &identity).await?;

    let target = body
        .and_then(|b| b.0.revision)
        .unwrap_or_else(|| crate::lifecycle::DEFAULT_BRANCH.to_string());
    state
        .lakefs
        .create_tag(&access.repo.repo_id().lakefs_name(), &tag, &target)
        .await
        .map_err(revision_error(&target))?;
    Ok(Json(serde_json::json!({})))
}

pub async fn delete_tag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((rtype, namespace, name, tag)): Path<(String, String, String, String)>,
) -> Result<Json<serde_json::Value>> {
    let id = parse_repo_path(&rtype, &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let repo = resolve_repo(&state, &id).await?;
    let access = require_write(&state, repo, &identity).await?;

    state
        .lakefs
        .delete_tag(&access.repo.repo_id().lakefs_name(), &tag)
        .await
        .map_err(revision_error(&tag))?;
    Ok(Json(serde_json::json!({})))
}

/// Map version-store 404s on a ref to `RevisionNotFound`.
fn revision_error(revision: &str) -> impl Fn(kohakuhub_lakefs::LakeFsError) -> ApiError + '_ {
    move |err| {
        if err.is_not_found() {
            ApiError::RevisionNotFound(format!("revision not found: {revision}"))
        } else {
            err.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_size_matches_encoded_pointer() {
        let oid = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let encoded = kohakuhub_core::LfsPointer::new(
            kohakuhub_core::Oid::from_hex(oid).unwrap(),
            12_582_912,
        )
        .encode();
        assert_eq!(pointer_size(oid, 12_582_912), encoded.len() as i64);
    }
}
