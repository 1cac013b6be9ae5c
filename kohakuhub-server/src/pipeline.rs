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

//! The commit pipeline.
//!
//! Order of operations is load-bearing:
//!   1. quota pre-check from the net byte delta (optimistic reservation),
//!   2. stage every op into the version store, fanned out across paths
//!      but serialized per path,
//!   3. one version-store commit,
//!   4. one metadata transaction (file rows, commit row, LFS ledger,
//!      quota delta).
//! A failure before step 3 resets the branch staging area; a failure
//! before step 4 leaves no metadata behind. Partial success cannot be
//! observed.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use sha2::{Digest, Sha256};

use kohakuhub_core::{lfs_key, Oid};
use kohakuhub_meta::{CommitApply, FileEntry, FileUpsert, LfsRef, Namespace, QuotaDelta};

use crate::error::{ApiError, Result};
use crate::gc;
use crate::ndjson::{CommitHeader, CommitOp};
use crate::permission::AccessGranted;
use crate::state::AppState;

pub struct CommitOutcome {
    pub commit_id: String,
}

/// Net effect of staging one operation.
#[derive(Debug, Default)]
struct StageEffect {
    upsert: Option<FileUpsert>,
    delete: Option<String>,
    delete_folder: Option<String>,
    lfs_ref: Option<LfsRef>,
    delta_bytes: i64,
    /// Set when the LFS blob behind a path changed; triggers GC.
    lfs_changed_path: Option<String>,
}

pub async fn run_commit(
    state: &AppState,
    access: &AccessGranted,
    namespace: &Namespace,
    username: &str,
    branch: &str,
    header: CommitHeader,
    ops: Vec<CommitOp>,
) -> Result<CommitOutcome> {
    let repo = &access.repo;
    let lakefs_repo = repo.repo_id().lakefs_name();

    // Snapshot the tip state of every touched path once; both the quota
    // pre-check and the per-op deltas read from it.
    let mut tip: HashMap<String, Option<FileEntry>> = HashMap::new();
    for op in &ops {
        let path = op.path().to_string();
        if !tip.contains_key(&path) {
            let entry = state
                .meta
                .get_file(&repo.full_id, repo.repo_type, &path)
                .await?;
            tip.insert(path, entry);
        }
        if let CommitOp::CopyFile { src_path, .. } = op {
            if !tip.contains_key(src_path) {
                let entry = state
                    .meta
                    .get_file(&repo.full_id, repo.repo_type, src_path)
                    .await?;
                tip.insert(src_path.clone(), entry);
            }
        }
    }

    // File rows and quota counters track the tip of the primary branch;
    // side-branch commits still stage and land but leave them alone.
    let on_default = branch == crate::lifecycle::DEFAULT_BRANCH;

    if on_default {
        let net_delta = estimate_delta(state, repo, &ops, &tip).await?;
        let decision = state
            .meta
            .quota_check(namespace, net_delta, repo.private)
            .await?;
        if let kohakuhub_meta::QuotaDecision::Denied { used, quota, requested } = decision {
            return Err(ApiError::QuotaExceeded(format!(
                "storage quota exceeded for {}: {used} + {requested} > {quota} bytes",
                namespace.name()
            )));
        }
    }

    // Fan out staging, serialized per destination path via hash
    // partitioning so same-path ops keep their payload order.
    let fanout = state.config.server.fanout.max(1);
    let mut buckets: Vec<Vec<CommitOp>> = (0..fanout).map(|_| Vec::new()).collect();
    for op in ops {
        let mut hasher = DefaultHasher::new();
        op.path().hash(&mut hasher);
        buckets[(hasher.finish() as usize) % fanout].push(op);
    }

    let staged = futures::future::try_join_all(buckets.into_iter().map(|bucket| {
        let tip = &tip;
        let lakefs_repo = lakefs_repo.as_str();
        async move {
            let mut effects = Vec::with_capacity(bucket.len());
            for op in bucket {
                effects.push(stage_op(state, repo, lakefs_repo, branch, op, tip).await?);
            }
            Ok::<_, ApiError>(effects)
        }
    }))
    .await;

    let effects: Vec<StageEffect> = match staged {
        Ok(nested) => nested.into_iter().flatten().collect(),
        Err(err) => {
            // Roll the staging area back to the tip; if that fails too,
            // the next commit on the branch normalizes it.
            if let Err(reset_err) = state.lakefs.reset_branch(&lakefs_repo, branch).await {
                tracing::warn!(
                    repo = %repo.full_id,
                    branch,
                    error = %reset_err,
                    "staging rollback failed after aborted commit"
                );
            }
            return Err(err);
        }
    };

    let commit_message = if header.description.is_empty() {
        header.summary.clone()
    } else {
        format!("{}\n\n{}", header.summary, header.description)
    };
    let commit = state
        .lakefs
        .commit(
            &lakefs_repo,
            branch,
            &commit_message,
            Some(serde_json::json!({ "author": username })),
        )
        .await?;

    let mut apply = CommitApply {
        repo_full_id: repo.full_id.clone(),
        repo_type: repo.repo_type,
        branch: branch.to_string(),
        commit_id: commit.id.clone(),
        username: username.to_string(),
        message: header.summary,
        description: header.description,
        upserts: Vec::new(),
        deletes: Vec::new(),
        folder_deletes: Vec::new(),
        lfs_refs: Vec::new(),
        quota: None,
    };

    let mut applied_delta = 0i64;
    let mut gc_paths = Vec::new();
    for effect in effects {
        applied_delta += effect.delta_bytes;
        if let Some(upsert) = effect.upsert {
            apply.upserts.push(upsert);
        }
        if let Some(path) = effect.delete {
            apply.deletes.push(path);
        }
        if let Some(prefix) = effect.delete_folder {
            apply.folder_deletes.push(prefix);
        }
        if let Some(lfs_ref) = effect.lfs_ref {
            apply.lfs_refs.push(lfs_ref);
        }
        if let Some(path) = effect.lfs_changed_path {
            gc_paths.push(path);
        }
    }
    if on_default {
        apply.quota = Some(QuotaDelta {
            is_org: namespace.is_org(),
            namespace_id: match namespace {
                Namespace::User(u) => u.id,
                Namespace::Org(o) => o.id,
            },
            private: repo.private,
            delta: applied_delta,
        });
    } else {
        apply.upserts.clear();
        apply.deletes.clear();
        apply.folder_deletes.clear();
    }

    // Metadata transaction only runs after the version store accepted
    // the commit; DB updates for the commit are applied atomically.
    state.meta.apply_commit(apply).await?;

    tracing::info!(
        repo = %repo.full_id,
        branch,
        commit = %commit.id,
        delta_bytes = applied_delta,
        "commit applied"
    );

    // Historical LFS versions beyond policy are collected out of band;
    // failures are logged and the next commit retries.
    for path in gc_paths {
        let state = state.clone();
        let repo_full_id = repo.full_id.clone();
        let repo_type = repo.repo_type;
        let keep = state.config.app.lfs_history_keep;
        tokio::spawn(async move {
            if let Err(err) =
                gc::collect_path(&state, &repo_full_id, repo_type, &path, keep).await
            {
                tracing::warn!(
                    repo = %repo_full_id,
                    path,
                    error = %err,
                    "post-commit lfs gc failed"
                );
            }
        });
    }

    Ok(CommitOutcome { commit_id: commit.id })
}

/// Net storage delta of the payload against the tip snapshot.
async fn estimate_delta(
    state: &AppState,
    repo: &kohakuhub_meta::Repository,
    ops: &[CommitOp],
    tip: &HashMap<String, Option<FileEntry>>,
) -> Result<i64> {
    let mut delta = 0i64;
    for op in ops {
        let old_size = tip
            .get(op.path())
            .and_then(|e| e.as_ref())
            .map(|e| e.size)
            .unwrap_or(0);
        match op {
            CommitOp::File { content, .. } => {
                delta += content.len() as i64 - old_size;
            }
            CommitOp::LfsFile { size, .. } => {
                delta += size - old_size;
            }
            CommitOp::DeletedFile { .. } => {
                delta -= old_size;
            }
            CommitOp::DeletedFolder { path } => {
                let files = state.meta.list_files(&repo.full_id, repo.repo_type).await?;
                delta -= files
                    .iter()
                    .filter(|f| f.path_in_repo.starts_with(path.as_str()))
                    .map(|f| f.size)
                    .sum::<i64>();
            }
            CommitOp::CopyFile { src_path, .. } => {
                let src_size = tip
                    .get(src_path)
                    .and_then(|e| e.as_ref())
                    .map(|e| e.size)
                    .unwrap_or(0);
                delta += src_size - old_size;
            }
        }
    }
    Ok(delta)
}

async fn stage_op(
    state: &AppState,
    repo: &kohakuhub_meta::Repository,
    lakefs_repo: &str,
    branch: &str,
    op: CommitOp,
    tip: &HashMap<String, Option<FileEntry>>,
) -> Result<StageEffect> {
    let old = |path: &str| tip.get(path).and_then(|e| e.clone());

    match op {
        CommitOp::File { path, content } => {
            let sha256 = hex::encode(Sha256::digest(&content));
            let size = content.len() as i64;
            let previous = old(&path);
            let unchanged = previous
                .as_ref()
                .map(|p| p.sha256 == sha256 && p.size == size)
                .unwrap_or(false);
            if !unchanged {
                state
                    .lakefs
                    .upload_object(lakefs_repo, branch, &path, content.into())
                    .await?;
            }
            let delta = size - previous.map(|p| p.size).unwrap_or(0);
            Ok(StageEffect {
                upsert: Some(FileUpsert {
                    path,
                    size,
                    sha256,
                    lfs: false,
                }),
                delta_bytes: delta,
                ..StageEffect::default()
            })
        }
        CommitOp::LfsFile { path, oid, size } => {
            stage_lfs_link(state, lakefs_repo, branch, path, oid, size, tip).await
        }
        CommitOp::DeletedFile { path } => {
            state.lakefs.delete_object(lakefs_repo, branch, &path).await?;
            let previous = old(&path);
            Ok(StageEffect {
                delete: Some(path),
                delta_bytes: -previous.map(|p| p.size).unwrap_or(0),
                ..StageEffect::default()
            })
        }
        CommitOp::DeletedFolder { path } => {
            let objects = state
                .lakefs
                .list_all_objects(lakefs_repo, branch, &path)
                .await?;
            for object in &objects {
                state
                    .lakefs
                    .delete_object(lakefs_repo, branch, &object.path)
                    .await?;
            }
            let files = state.meta.list_files(&repo.full_id, repo.repo_type).await?;
            let removed: i64 = files
                .iter()
                .filter(|f| f.path_in_repo.starts_with(path.as_str()))
                .map(|f| f.size)
                .sum();
            Ok(StageEffect {
                delete_folder: Some(path),
                delta_bytes: -removed,
                ..StageEffect::default()
            })
        }
        CommitOp::CopyFile {
            path,
            src_path,
            src_revision,
        } => {
            let src_ref = src_revision.as_deref().unwrap_or(branch);
            let stats = state
                .lakefs
                .stat_object(lakefs_repo, src_ref, &src_path)
                .await
                .map_err(|e| match e {
                    kohakuhub_lakefs::LakeFsError::NotFound(_)
                    | kohakuhub_lakefs::LakeFsError::RefNotFound(_) => {
                        ApiError::EntryNotFound(format!("copy source not found: {src_path}"))
                    }
                    other => other.into(),
                })?;

            // Content-addressed reuse: an LFS-backed source is re-linked,
            // an inline source is re-uploaded from its bytes.
            if let Some(oid_hex) = lfs_oid_from_physical(&stats.physical_address) {
                let oid = Oid::from_hex(&oid_hex)
                    .map_err(|e| ApiError::Internal(format!("bad lfs address: {e}")))?;
                stage_lfs_link(state, lakefs_repo, branch, path, oid, stats.size_bytes, tip).await
            } else {
                let content = state
                    .lakefs
                    .get_object(lakefs_repo, src_ref, &src_path)
                    .await?;
                let sha256 = hex::encode(Sha256::digest(&content));
                let size = content.len() as i64;
                state
                    .lakefs
                    .upload_object(lakefs_repo, branch, &path, content)
                    .await?;
                let delta = size - old(&path).map(|p| p.size).unwrap_or(0);
                Ok(StageEffect {
                    upsert: Some(FileUpsert {
                        path,
                        size,
                        sha256,
                        lfs: false,
                    }),
                    delta_bytes: delta,
                    ..StageEffect::default()
                })
            }
        }
    }
}

async fn stage_lfs_link(
    state: &AppState,
    lakefs_repo: &str,
    branch: &str,
    path: String,
    oid: Oid,
    size: i64,
    tip: &HashMap<String, Option<FileEntry>>,
) -> Result<StageEffect> {
    let oid_hex = oid.to_hex();
    let key = lfs_key(&oid_hex);

    // The blob must already sit in the object store; the batch API put
    // it there (or an earlier upload of the same content did).
    let head = state.store.head(&key).await?;
    match head {
        Some(info) if info.size == size => {}
        Some(info) => {
            return Err(ApiError::BadRequest(format!(
                "lfs object {oid_hex} size mismatch: expected {size}, stored {}",
                info.size
            )));
        }
        None => {
            return Err(ApiError::BadRequest(format!(
                "lfs object {oid_hex} has not been uploaded"
            )));
        }
    }

    state
        .lakefs
        .link_physical_address(
            lakefs_repo,
            branch,
            &path,
            &state.store.s3_uri(&key),
            &oid_hex,
            size,
        )
        .await?;

    let previous = tip.get(&path).and_then(|e| e.clone());
    let changed = previous
        .as_ref()
        .map(|p| p.sha256 != oid_hex)
        .unwrap_or(true);
    let delta = size - previous.map(|p| p.size).unwrap_or(0);

    Ok(StageEffect {
        upsert: Some(FileUpsert {
            path: path.clone(),
            size,
            sha256: oid_hex.clone(),
            lfs: true,
        }),
        lfs_ref: Some(LfsRef {
            path: path.clone(),
            sha256: oid_hex,
            size,
        }),
        delta_bytes: delta,
        lfs_changed_path: changed.then_some(path),
        ..StageEffect::default()
    })
}

/// Extract the OID from a physical address under the global LFS prefix.
pub fn lfs_oid_from_physical(address: &str) -> Option<String> {
    let (_, tail) = address.split_once("/lfs/")?;
    let oid = tail.rsplit('/').next()?;
    (oid.len() == 64 && oid.bytes().all(|b| b.is_ascii_hexdigit())).then(|| oid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfs_oid_extraction() {
        let sha = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let addr = format!("s3://bucket/lfs/2c/f2/{sha}");
        assert_eq!(lfs_oid_from_physical(&addr).as_deref(), Some(sha));
        assert_eq!(
            lfs_oid_from_physical("s3://bucket/hf-model-a-b/data/x"),
            None
        );
        assert_eq!(lfs_oid_from_physical("s3://bucket/lfs/2c/f2/short"), None);
    }
}
