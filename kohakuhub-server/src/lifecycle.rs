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

//! Repository lifecycle: create / delete / move / squash across the
//! metadata store, the version store and the object store.
//!
//! These operations are best-effort atomic. The rule everywhere: make
//! the destination state visible before tearing the source down, and
//! when teardown fails, log and keep going — a stale prefix costs disk,
//! a lost repo costs users.

use kohakuhub_core::{lfs_key, valid_name, RepoId};
use kohakuhub_meta::{Namespace, QuotaDecision, QuotaDelta, Repository};

use crate::auth::Identity;
use crate::error::{ApiError, Result};
use crate::gc;
use crate::ndjson::{CommitHeader, CommitOp};
use crate::permission::{
    self, namespace_write_access, require_delete, AccessGranted, Rights,
};
use crate::pipeline;
use crate::state::AppState;

/// Seeded into every new repository so `git lfs` clients treat the usual
/// large-weight formats as LFS from the first push.
const GITATTRIBUTES: &str = "\
*.7z filter=lfs diff=lfs merge=lfs -text
*.arrow filter=lfs diff=lfs merge=lfs -text
*.bin filter=lfs diff=lfs merge=lfs -text
*.ckpt filter=lfs diff=lfs merge=lfs -text
*.gguf filter=lfs diff=lfs merge=lfs -text
*.gz filter=lfs diff=lfs merge=lfs -text
*.h5 filter=lfs diff=lfs merge=lfs -text
*.npy filter=lfs diff=lfs merge=lfs -text
*.npz filter=lfs diff=lfs merge=lfs -text
*.onnx filter=lfs diff=lfs merge=lfs -text
*.parquet filter=lfs diff=lfs merge=lfs -text
*.pickle filter=lfs diff=lfs merge=lfs -text
*.pkl filter=lfs diff=lfs merge=lfs -text
*.pt filter=lfs diff=lfs merge=lfs -text
*.pth filter=lfs diff=lfs merge=lfs -text
*.safetensors filter=lfs diff=lfs merge=lfs -text
*.tar filter=lfs diff=lfs merge=lfs -text
*.tflite filter=lfs diff=lfs merge=lfs -text
*.zip filter=lfs diff=lfs merge=lfs -text
";

pub const DEFAULT_BRANCH: &str = "main";

/// Create the repository everywhere and seed its default files.
pub async fn create_repo(
    state: &AppState,
    identity: &Identity,
    id: &RepoId,
    private: bool,
) -> Result<Repository> {
    if !valid_name(&id.name) {
        return Err(ApiError::BadRequest(format!(
            "invalid repository name: {}",
            id.name
        )));
    }

    let namespace = namespace_write_access(state, &id.namespace, identity).await?;

    if state.meta.get_repo(id).await?.is_some() {
        return Err(ApiError::RepoExists(format!(
            "repository already exists: {id}"
        )));
    }

    let lakefs_name = id.lakefs_name();
    let storage_uri = format!("s3://{}/{}", state.store.bucket(), lakefs_name);
    state
        .lakefs
        .create_repo(&lakefs_name, &storage_uri, DEFAULT_BRANCH)
        .await
        .map_err(|e| match e {
            kohakuhub_lakefs::LakeFsError::Conflict(msg) => ApiError::RepoExists(msg),
            other => other.into(),
        })?;

    let repo = state.meta.create_repo(id, private, &namespace).await?;

    // Seed through the regular pipeline under the creator's name so the
    // quota and commit bookkeeping are exercised from commit one.
    let access = AccessGranted {
        repo: repo.clone(),
        rights: Rights { read: true, write: true, delete: true, admin: true },
    };
    let seed = CommitOp::File {
        path: ".gitattributes".to_string(),
        content: GITATTRIBUTES.as_bytes().to_vec(),
    };
    let header = CommitHeader {
        summary: "initial commit".to_string(),
        description: String::new(),
    };
    pipeline::run_commit(
        state,
        &access,
        &namespace,
        identity.username(),
        DEFAULT_BRANCH,
        header,
        vec![seed],
    )
    .await?;

    tracing::info!(repo = %repo.full_id, repo_type = %repo.repo_type, "repository created");
    Ok(repo)
}

/// Tear the repository down everywhere.
pub async fn delete_repo(state: &AppState, identity: &Identity, id: &RepoId) -> Result<()> {
    let repo = permission::resolve_repo(state, id).await?;
    let access = require_delete(state, repo, identity).await?;
    let repo = access.repo;
    let namespace = permission::repo_namespace(state, &repo).await?;

    let used = state
        .meta
        .repo_used_bytes(&repo.full_id, repo.repo_type)
        .await?;

    // Fence off new operations first.
    state.meta.mark_repo_deleted(repo.id).await?;

    // Reclaim LFS blobs nobody else references.
    if let Err(err) = gc::collect_repo(state, &repo).await {
        tracing::warn!(repo = %repo.full_id, error = %err, "lfs cleanup failed during delete");
    }

    let lakefs_name = repo.repo_id().lakefs_name();
    if let Err(err) = state.lakefs.delete_repo(&lakefs_name).await {
        tracing::warn!(repo = %repo.full_id, error = %err, "version store delete failed");
    }
    if let Err(err) = state.store.delete_prefix(&repo.repo_id().storage_prefix()).await {
        tracing::warn!(repo = %repo.full_id, error = %err, "storage prefix delete failed");
    }

    state.meta.purge_repo_rows(&repo).await?;

    state
        .meta
        .quota_update(&QuotaDelta {
            is_org: namespace.is_org(),
            namespace_id: namespace_id(&namespace),
            private: repo.private,
            delta: -used,
        })
        .await?;

    tracing::info!(repo = %repo.full_id, freed_bytes = used, "repository deleted");
    Ok(())
}

/// Move (rename or reparent). The version store cannot rename in place,
/// so the tip is restaged at the destination as one synthetic commit;
/// the HF-visible commit log rows move with the repository.
pub async fn move_repo(
    state: &AppState,
    identity: &Identity,
    from: &RepoId,
    to: &RepoId,
) -> Result<Repository> {
    if from.repo_type != to.repo_type {
        return Err(ApiError::BadRequest("cannot change repo type in a move".into()));
    }
    if !valid_name(&to.name) {
        return Err(ApiError::BadRequest(format!("invalid name: {}", to.name)));
    }

    let src_repo = permission::resolve_repo(state, from).await?;
    let access = require_delete(state, src_repo, identity).await?;
    let src_repo = access.repo;
    let src_ns = permission::repo_namespace(state, &src_repo).await?;
    let dest_ns = namespace_write_access(state, &to.namespace, identity).await?;

    if state.meta.get_repo(to).await?.is_some() {
        return Err(ApiError::RepoExists(format!("destination exists: {to}")));
    }

    let used = state
        .meta
        .repo_used_bytes(&src_repo.full_id, src_repo.repo_type)
        .await?;

    let same_namespace = namespace_id(&src_ns) == namespace_id(&dest_ns)
        && src_ns.is_org() == dest_ns.is_org();
    if !same_namespace {
        let decision = state
            .meta
            .quota_check(&dest_ns, used, src_repo.private)
            .await?;
        if let QuotaDecision::Denied { used, quota, requested } = decision {
            return Err(ApiError::QuotaExceeded(format!(
                "destination namespace over quota: {used} + {requested} > {quota}"
            )));
        }
    }

    // Build the destination before touching the source.
    let src_lakefs = src_repo.repo_id().lakefs_name();
    let dest_lakefs = to.lakefs_name();
    let storage_uri = format!("s3://{}/{}", state.store.bucket(), dest_lakefs);
    state
        .lakefs
        .create_repo(&dest_lakefs, &storage_uri, DEFAULT_BRANCH)
        .await?;

    restage_tip(state, &src_repo, &src_lakefs, &dest_lakefs).await?;
    state
        .lakefs
        .commit(
            &dest_lakefs,
            DEFAULT_BRANCH,
            &format!("Move from {}", src_repo.full_id),
            None,
        )
        .await?;

    state.meta.move_repo_rows(&src_repo, to, &dest_ns).await?;

    if !same_namespace {
        state
            .meta
            .quota_update(&QuotaDelta {
                is_org: src_ns.is_org(),
                namespace_id: namespace_id(&src_ns),
                private: src_repo.private,
                delta: -used,
            })
            .await?;
        state
            .meta
            .quota_update(&QuotaDelta {
                is_org: dest_ns.is_org(),
                namespace_id: namespace_id(&dest_ns),
                private: src_repo.private,
                delta: used,
            })
            .await?;
    }

    // Source teardown is cleanup, not correctness: the new location is
    // already live, so failures are logged for a later sweep.
    if let Err(err) = state.lakefs.delete_repo(&src_lakefs).await {
        tracing::warn!(repo = %src_repo.full_id, error = %err, "source repo cleanup failed");
    }
    if let Err(err) = state
        .store
        .delete_prefix(&src_repo.repo_id().storage_prefix())
        .await
    {
        tracing::warn!(repo = %src_repo.full_id, error = %err, "source prefix cleanup failed");
    }

    let moved = state
        .meta
        .get_repo(to)
        .await?
        .ok_or_else(|| ApiError::Internal("repo vanished during move".into()))?;
    tracing::info!(from = %src_repo.full_id, to = %moved.full_id, "repository moved");
    Ok(moved)
}

/// Collapse a branch's history into one synthetic commit whose tree
/// matches the tip. Old history is dropped; retained-LFS policy applies.
pub async fn squash_repo(state: &AppState, identity: &Identity, id: &RepoId) -> Result<String> {
    let repo = permission::resolve_repo(state, id).await?;
    let access = require_delete(state, repo, identity).await?;
    let repo = access.repo;
    let lakefs_name = repo.repo_id().lakefs_name();

    // Inline contents must survive the teardown; pull them into memory
    // first. LFS blobs live under the global prefix and stay put.
    let files = state.meta.list_files(&repo.full_id, repo.repo_type).await?;
    let mut inline: Vec<(String, bytes::Bytes)> = Vec::new();
    for file in files.iter().filter(|f| !f.lfs) {
        let content = state
            .lakefs
            .get_object(&lakefs_name, DEFAULT_BRANCH, &file.path_in_repo)
            .await?;
        inline.push((file.path_in_repo.clone(), content));
    }

    let storage_uri = format!("s3://{}/{}", state.store.bucket(), lakefs_name);
    state.lakefs.delete_repo(&lakefs_name).await?;
    state
        .store
        .delete_prefix(&repo.repo_id().storage_prefix())
        .await?;
    state
        .lakefs
        .create_repo(&lakefs_name, &storage_uri, DEFAULT_BRANCH)
        .await?;

    for (path, content) in inline {
        state
            .lakefs
            .upload_object(&lakefs_name, DEFAULT_BRANCH, &path, content)
            .await?;
    }
    for file in files.iter().filter(|f| f.lfs) {
        let key = lfs_key(&file.sha256);
        state
            .lakefs
            .link_physical_address(
                &lakefs_name,
                DEFAULT_BRANCH,
                &file.path_in_repo,
                &state.store.s3_uri(&key),
                &file.sha256,
                file.size,
            )
            .await?;
    }
    let commit = state
        .lakefs
        .commit(&lakefs_name, DEFAULT_BRANCH, "Squash history", None)
        .await?;

    // The old commit rows point at commits that no longer exist.
    state
        .meta
        .delete_commits_for_repo(&repo.full_id, repo.repo_type)
        .await?;
    state
        .meta
        .apply_commit(kohakuhub_meta::CommitApply {
            repo_full_id: repo.full_id.clone(),
            repo_type: repo.repo_type,
            branch: DEFAULT_BRANCH.to_string(),
            commit_id: commit.id.clone(),
            username: identity.username().to_string(),
            message: "Squash history".to_string(),
            description: String::new(),
            upserts: Vec::new(),
            deletes: Vec::new(),
            folder_deletes: Vec::new(),
            lfs_refs: Vec::new(),
            quota: None,
        })
        .await?;

    // Trim historical LFS versions beyond policy for every path that
    // ever carried one.
    let keep = state.config.app.lfs_history_keep;
    for file in files.iter().filter(|f| f.lfs) {
        if let Err(err) = gc::collect_path(
            state,
            &repo.full_id,
            repo.repo_type,
            &file.path_in_repo,
            keep,
        )
        .await
        {
            tracing::warn!(repo = %repo.full_id, error = %err, "post-squash gc failed");
        }
    }

    tracing::info!(repo = %repo.full_id, commit = %commit.id, "history squashed");
    Ok(commit.id)
}

/// Restage the source tip onto a fresh destination repository: LFS files
/// re-link to their global blobs, inline files are copied through.
async fn restage_tip(
    state: &AppState,
    src_repo: &Repository,
    src_lakefs: &str,
    dest_lakefs: &str,
) -> Result<()> {
    let files = state
        .meta
        .list_files(&src_repo.full_id, src_repo.repo_type)
        .await?;
    for file in files {
        if file.lfs {
            let key = lfs_key(&file.sha256);
            state
                .lakefs
                .link_physical_address(
                    dest_lakefs,
                    DEFAULT_BRANCH,
                    &file.path_in_repo,
                    &state.store.s3_uri(&key),
                    &file.sha256,
                    file.size,
                )
                .await?;
        } else {
            let content = state
                .lakefs
                .get_object(src_lakefs, DEFAULT_BRANCH, &file.path_in_repo)
                .await?;
            state
                .lakefs
                .upload_object(dest_lakefs, DEFAULT_BRANCH, &file.path_in_repo, content)
                .await?;
        }
    }
    Ok(())
}

fn namespace_id(ns: &Namespace) -> i64 {
    match ns {
        Namespace::User(u) => u.id,
        Namespace::Org(o) => o.id,
    }
}
