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

//! LFS history ledger and staging uploads.
//!
//! The ledger is append-only and time-indexed; the garbage collector
//! reads it newest-first to decide which historical blobs fall outside
//! the retention window. It is never a lifecycle edge on its own — the
//! File table and other repos' ledgers are always consulted before an
//! S3 blob dies.

use std::collections::HashSet;

use kohakuhub_core::RepoType;

use crate::error::Result;
use crate::models::{LfsHistoryRow, StagingUpload};
use crate::{now_epoch, MetaStore};

impl MetaStore {
    /// Ledger rows for one path, newest first.
    pub async fn lfs_history_for_path(
        &self,
        repo_full_id: &str,
        path: &str,
    ) -> Result<Vec<LfsHistoryRow>> {
        let rows = sqlx::query(
            "SELECT * FROM lfs_object_history
             WHERE repo_full_id = $1 AND path_in_repo = $2
             ORDER BY created_at DESC, id DESC",
        )
        .bind(repo_full_id)
        .bind(path)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| LfsHistoryRow::from_row(r).map_err(Into::into))
            .collect()
    }

    /// Every distinct SHA a repository ever referenced.
    pub async fn lfs_history_shas_for_repo(
        &self,
        repo_full_id: &str,
        repo_type: RepoType,
    ) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT sha256 FROM lfs_object_history
             WHERE repo_full_id = $1 AND repo_type = $2",
        )
        .bind(repo_full_id)
        .bind(repo_type.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Ledger references to a blob outside one repository.
    pub async fn count_history_refs_elsewhere(
        &self,
        sha256: &str,
        exclude_repo_full_id: &str,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM lfs_object_history
             WHERE sha256 = $1 AND repo_full_id <> $2",
        )
        .bind(sha256)
        .bind(exclude_repo_full_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// Ledger references to a blob anywhere.
    pub async fn count_history_refs(&self, sha256: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM lfs_object_history WHERE sha256 = $1")
                .bind(sha256)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    pub async fn delete_lfs_history_rows(&self, ids: &[i64]) -> Result<()> {
        for id in ids {
            sqlx::query("DELETE FROM lfs_object_history WHERE id = $1")
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    pub async fn delete_lfs_history_for_repo(
        &self,
        repo_full_id: &str,
        repo_type: RepoType,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM lfs_object_history WHERE repo_full_id = $1 AND repo_type = $2",
        )
        .bind(repo_full_id)
        .bind(repo_type.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Bytes of retained historical blobs for a namespace, split by the
    /// owning repo's privacy, excluding blobs already counted through
    /// File rows. Drives `quota_recompute`.
    pub async fn retained_history_bytes(
        &self,
        namespace_norm: &str,
        keep: usize,
    ) -> Result<(i64, i64)> {
        let rows = sqlx::query(
            "SELECT h.*, r.private AS repo_private FROM lfs_object_history h
             JOIN repositories r
               ON r.full_id = h.repo_full_id AND r.repo_type = h.repo_type
             WHERE r.namespace_norm = $1 AND r.deleted = 0
             ORDER BY h.repo_full_id, h.path_in_repo, h.created_at DESC, h.id DESC",
        )
        .bind(namespace_norm)
        .fetch_all(self.pool())
        .await?;

        use sqlx::Row;
        let mut private = 0_i64;
        let mut public = 0_i64;
        let mut counted: HashSet<String> = HashSet::new();
        let mut per_path: HashSet<String> = HashSet::new();
        let mut current_path: Option<(String, String)> = None;
        let mut kept_in_path = 0usize;

        for row in &rows {
            let hist = LfsHistoryRow::from_row(row)?;
            let is_private: i64 = row.try_get("repo_private")?;
            let key = (hist.repo_full_id.clone(), hist.path_in_repo.clone());
            if current_path.as_ref() != Some(&key) {
                current_path = Some(key);
                per_path.clear();
                kept_in_path = 0;
            }
            if kept_in_path >= keep || per_path.contains(&hist.sha256) {
                continue;
            }
            per_path.insert(hist.sha256.clone());
            kept_in_path += 1;

            // Tip versions are already in the File totals.
            if self.count_file_refs(&hist.sha256).await? > 0 {
                continue;
            }
            if !counted.insert(hist.sha256.clone()) {
                continue;
            }
            if is_private != 0 {
                private += hist.size;
            } else {
                public += hist.size;
            }
        }
        Ok((private, public))
    }

    // Staging uploads ---------------------------------------------------

    pub async fn create_staging_upload(
        &self,
        repo_full_id: &str,
        repo_type: RepoType,
        revision: &str,
        path: &str,
        sha256: &str,
        size: i64,
        storage_key: &str,
        created_by: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO staging_uploads
                (repo_full_id, repo_type, revision, path_in_repo, sha256, size,
                 storage_key, created_by, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(repo_full_id)
        .bind(repo_type.as_str())
        .bind(revision)
        .bind(path)
        .bind(sha256)
        .bind(size)
        .bind(storage_key)
        .bind(created_by)
        .bind(now_epoch())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Delete staging rows for a verified OID; only the creating user may
    /// finalize them.
    pub async fn finish_staging_upload(&self, sha256: &str, created_by: i64) -> Result<()> {
        sqlx::query("DELETE FROM staging_uploads WHERE sha256 = $1 AND created_by = $2")
            .bind(sha256)
            .bind(created_by)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Rows older than the TTL, for the background sweeper.
    pub async fn expired_staging_uploads(&self, ttl_seconds: i64) -> Result<Vec<StagingUpload>> {
        let cutoff = now_epoch() - ttl_seconds;
        let rows = sqlx::query("SELECT * FROM staging_uploads WHERE created_at < $1")
            .bind(cutoff)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| StagingUpload::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn delete_staging_upload(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM staging_uploads WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MetaStore {
        MetaStore::connect("sqlite::memory:").await.unwrap()
    }

    async fn insert_history(
        store: &MetaStore,
        repo: &str,
        path: &str,
        sha: &str,
        size: i64,
        created_at: i64,
    ) {
        sqlx::query(
            "INSERT INTO lfs_object_history
                (repo_full_id, repo_type, path_in_repo, sha256, size, commit_id, created_at)
             VALUES ($1, 'model', $2, $3, $4, 'c', $5)",
        )
        .bind(repo)
        .bind(path)
        .bind(sha)
        .bind(size)
        .bind(created_at)
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = store().await;
        for (i, sha) in ["s1", "s2", "s3"].iter().enumerate() {
            insert_history(&store, "alice/m1", "model.bin", sha, 10, i as i64).await;
        }
        let rows = store
            .lfs_history_for_path("alice/m1", "model.bin")
            .await
            .unwrap();
        let shas: Vec<&str> = rows.iter().map(|r| r.sha256.as_str()).collect();
        assert_eq!(shas, vec!["s3", "s2", "s1"]);
    }

    #[tokio::test]
    async fn cross_repo_reference_counting() {
        let store = store().await;
        insert_history(&store, "alice/m1", "a.bin", "shared", 10, 0).await;
        insert_history(&store, "bob/m2", "b.bin", "shared", 10, 1).await;

        assert_eq!(
            store
                .count_history_refs_elsewhere("shared", "alice/m1")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count_history_refs_elsewhere("shared", "bob/m2")
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.count_history_refs("shared").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn staging_rows_expire_by_ttl() {
        let store = store().await;
        store
            .create_staging_upload("alice/m1", RepoType::Model, "main", "w.bin", "abc", 10, "lfs/ab/cd/abc", 1)
            .await
            .unwrap();

        // Fresh row is not expired.
        assert!(store.expired_staging_uploads(3600).await.unwrap().is_empty());

        // Backdate it past the TTL.
        sqlx::query("UPDATE staging_uploads SET created_at = created_at - 7200")
            .execute(store.pool())
            .await
            .unwrap();
        let expired = store.expired_staging_uploads(3600).await.unwrap();
        assert_eq!(expired.len(), 1);

        store.delete_staging_upload(expired[0].id).await.unwrap();
        assert!(store.expired_staging_uploads(0).await.unwrap().is_empty());
    }
}
