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

//! Garbage collection of unreferenced LFS blobs.
//!
//! A blob dies only when (a) it has fallen out of the per-path retention
//! window, (b) no ledger row anywhere else mentions it, and (c) no File
//! row anywhere mentions it. All S3 deletes are idempotent, so re-running
//! after a crash is harmless.

use kohakuhub_core::lfs_key;
use kohakuhub_core::RepoType;
use kohakuhub_meta::{LfsHistoryRow, Repository};

use crate::error::Result;
use crate::state::AppState;

/// Split a path's ledger (newest first) into the retained distinct SHAs
/// and the rows past the retention window.
fn partition_history(
    history: &[LfsHistoryRow],
    keep: usize,
) -> (Vec<String>, Vec<&LfsHistoryRow>) {
    let mut retained: Vec<String> = Vec::new();
    let mut candidates = Vec::new();
    for row in history {
        if retained.contains(&row.sha256) {
            continue;
        }
        if retained.len() < keep {
            retained.push(row.sha256.clone());
        } else {
            candidates.push(row);
        }
    }
    (retained, candidates)
}

/// Collect one mutated `(repo, path)`: keep the `keep` most recent
/// distinct SHAs, try to reclaim everything older.
pub async fn collect_path(
    state: &AppState,
    repo_full_id: &str,
    repo_type: RepoType,
    path: &str,
    keep: usize,
) -> Result<usize> {
    let history = state.meta.lfs_history_for_path(repo_full_id, path).await?;
    let (retained, candidate_rows) = partition_history(&history, keep);

    let mut deleted_blobs = 0usize;
    let mut dead_row_ids = Vec::new();
    for row in candidate_rows {
        dead_row_ids.push(row.id);
        if retained.contains(&row.sha256) {
            continue;
        }

        // Rows for this same path are about to die; references that keep
        // the blob alive must come from elsewhere.
        let same_path_rows = history
            .iter()
            .filter(|r| r.sha256 == row.sha256)
            .count() as i64;
        let ledger_refs = state.meta.count_history_refs(&row.sha256).await?;
        let file_refs = state.meta.count_file_refs(&row.sha256).await?;

        if ledger_refs - same_path_rows <= 0 && file_refs == 0 {
            state.store.delete_object(&lfs_key(&row.sha256)).await?;
            deleted_blobs += 1;
            tracing::info!(
                repo = repo_full_id,
                path,
                sha256 = %row.sha256,
                "collected historical lfs blob"
            );
        }
    }

    if !dead_row_ids.is_empty() {
        state.meta.delete_lfs_history_rows(&dead_row_ids).await?;
    }
    Ok(deleted_blobs)
}

/// Full cleanup when a repository goes away: reclaim every blob only
/// this repo ever referenced, then drop its ledger.
pub async fn collect_repo(state: &AppState, repo: &Repository) -> Result<usize> {
    let shas = state
        .meta
        .lfs_history_shas_for_repo(&repo.full_id, repo.repo_type)
        .await?;

    let mut deleted = 0usize;
    for sha in shas {
        let elsewhere = state
            .meta
            .count_history_refs_elsewhere(&sha, &repo.full_id)
            .await?;
        let file_refs = state
            .meta
            .count_file_refs_elsewhere(&sha, &repo.full_id)
            .await?;
        if elsewhere == 0 && file_refs == 0 {
            state.store.delete_object(&lfs_key(&sha)).await?;
            deleted += 1;
        }
    }

    state
        .meta
        .delete_lfs_history_for_repo(&repo.full_id, repo.repo_type)
        .await?;

    tracing::info!(
        repo = %repo.full_id,
        reclaimed = deleted,
        "repository lfs cleanup finished"
    );
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, sha: &str, created_at: i64) -> LfsHistoryRow {
        LfsHistoryRow {
            id,
            repo_full_id: "alice/m1".into(),
            path_in_repo: "model.bin".into(),
            sha256: sha.into(),
            size: 10,
            commit_id: "c".into(),
            created_at,
        }
    }

    #[test]
    fn retention_window_keeps_k_distinct_shas() {
        // Newest first: s7..s1.
        let history: Vec<LfsHistoryRow> = (1..=7)
            .rev()
            .map(|i| row(i, &format!("s{i}"), i))
            .collect();
        let (retained, candidates) = partition_history(&history, 5);
        assert_eq!(retained, vec!["s7", "s6", "s5", "s4", "s3"]);
        let old: Vec<&str> = candidates.iter().map(|r| r.sha256.as_str()).collect();
        assert_eq!(old, vec!["s2", "s1"]);
    }

    #[test]
    fn duplicate_shas_count_once() {
        // s3 committed twice; the replay must not burn a retention slot.
        let history = vec![
            row(5, "s3", 5),
            row(4, "s3", 4),
            row(3, "s2", 3),
            row(2, "s1", 2),
            row(1, "s0", 1),
        ];
        let (retained, candidates) = partition_history(&history, 3);
        assert_eq!(retained, vec!["s3", "s2", "s1"]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sha256, "s0");
    }

    #[test]
    fn short_history_has_no_candidates() {
        let history = vec![row(2, "b", 2), row(1, "a", 1)];
        let (retained, candidates) = partition_history(&history, 5);
        assert_eq!(retained.len(), 2);
        assert!(candidates.is_empty());
    }
}
