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

//! Commit records and the post-commit metadata transaction.
//!
//! After the Version Store accepts a commit, the pipeline hands the
//! resulting state over as one `CommitApply`; everything in it lands in a
//! single database transaction so a crash can never leave files, history
//! and quota out of step with each other.

use kohakuhub_core::RepoType;

use crate::error::Result;
use crate::models::CommitRecord;
use crate::quota::QuotaDelta;
use crate::{now_epoch, MetaStore};

/// One file row to upsert at the branch tip.
#[derive(Debug, Clone)]
pub struct FileUpsert {
    pub path: String,
    pub size: i64,
    pub sha256: String,
    pub lfs: bool,
}

/// One new LFS reference to append to the history ledger.
#[derive(Debug, Clone)]
pub struct LfsRef {
    pub path: String,
    pub sha256: String,
    pub size: i64,
}

/// Everything a successful Version Store commit changes in the metadata
/// database.
#[derive(Debug, Clone)]
pub struct CommitApply {
    pub repo_full_id: String,
    pub repo_type: RepoType,
    pub branch: String,
    pub commit_id: String,
    pub username: String,
    pub message: String,
    pub description: String,
    pub upserts: Vec<FileUpsert>,
    pub deletes: Vec<String>,
    /// Prefixes; every file row underneath goes away.
    pub folder_deletes: Vec<String>,
    pub lfs_refs: Vec<LfsRef>,
    pub quota: Option<QuotaDelta>,
}

impl MetaStore {
    /// Apply a commit's metadata atomically.
    pub async fn apply_commit(&self, apply: CommitApply) -> Result<()> {
        let now = now_epoch();
        let mut tx = self.pool().begin().await?;

        for path in &apply.deletes {
            sqlx::query(
                "DELETE FROM files
                 WHERE repo_full_id = $1 AND repo_type = $2 AND path_in_repo = $3",
            )
            .bind(&apply.repo_full_id)
            .bind(apply.repo_type.as_str())
            .bind(path)
            .execute(&mut *tx)
            .await?;
        }

        for prefix in &apply.folder_deletes {
            let like = format!("{}%", escape_like(prefix));
            sqlx::query(
                "DELETE FROM files
                 WHERE repo_full_id = $1 AND repo_type = $2
                   AND path_in_repo LIKE $3 ESCAPE '\\'",
            )
            .bind(&apply.repo_full_id)
            .bind(apply.repo_type.as_str())
            .bind(like)
            .execute(&mut *tx)
            .await?;
        }

        for file in &apply.upserts {
            sqlx::query(
                "INSERT INTO files
                    (repo_full_id, repo_type, path_in_repo, size, sha256, lfs,
                     created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                 ON CONFLICT (repo_full_id, repo_type, path_in_repo) DO UPDATE SET
                    size = excluded.size,
                    sha256 = excluded.sha256,
                    lfs = excluded.lfs,
                    updated_at = excluded.updated_at",
            )
            .bind(&apply.repo_full_id)
            .bind(apply.repo_type.as_str())
            .bind(&file.path)
            .bind(file.size)
            .bind(&file.sha256)
            .bind(file.lfs as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO commits
                (commit_id, repo_full_id, repo_type, branch, username,
                 message, description, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&apply.commit_id)
        .bind(&apply.repo_full_id)
        .bind(apply.repo_type.as_str())
        .bind(&apply.branch)
        .bind(&apply.username)
        .bind(&apply.message)
        .bind(&apply.description)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for lfs in &apply.lfs_refs {
            sqlx::query(
                "INSERT INTO lfs_object_history
                    (repo_full_id, repo_type, path_in_repo, sha256, size,
                     commit_id, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(&apply.repo_full_id)
            .bind(apply.repo_type.as_str())
            .bind(&lfs.path)
            .bind(&lfs.sha256)
            .bind(lfs.size)
            .bind(&apply.commit_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(quota) = &apply.quota {
            quota.execute(&mut tx, self.backend()).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_commits(
        &self,
        repo_full_id: &str,
        repo_type: RepoType,
        branch: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CommitRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM commits
             WHERE repo_full_id = $1 AND repo_type = $2 AND branch = $3
             ORDER BY created_at DESC, id DESC
             LIMIT $4 OFFSET $5",
        )
        .bind(repo_full_id)
        .bind(repo_type.as_str())
        .bind(branch)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| CommitRecord::from_row(r).map_err(Into::into))
            .collect()
    }

    /// Drop the recorded history of a repository (squash keeps only the
    /// synthetic commit inserted afterwards).
    pub async fn delete_commits_for_repo(
        &self,
        repo_full_id: &str,
        repo_type: RepoType,
    ) -> Result<()> {
        sqlx::query("DELETE FROM commits WHERE repo_full_id = $1 AND repo_type = $2")
            .bind(repo_full_id)
            .bind(repo_type.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_commit(
        &self,
        repo_full_id: &str,
        repo_type: RepoType,
        commit_id: &str,
    ) -> Result<Option<CommitRecord>> {
        let row = sqlx::query(
            "SELECT * FROM commits
             WHERE repo_full_id = $1 AND repo_type = $2 AND commit_id = $3",
        )
        .bind(repo_full_id)
        .bind(repo_type.as_str())
        .bind(commit_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| CommitRecord::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }
}

/// Escape `%`, `_` and the escape char itself for a LIKE pattern.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::QuotaDelta;
    use crate::users::Namespace;
    use kohakuhub_core::{RepoId, RepoType};

    async fn seeded() -> MetaStore {
        let store = MetaStore::connect("sqlite::memory:").await.unwrap();
        let alice = Namespace::User(
            store
                .create_user("alice", "", "x", None, None)
                .await
                .unwrap(),
        );
        store
            .create_repo(&RepoId::new(RepoType::Model, "alice", "m1"), false, &alice)
            .await
            .unwrap();
        store
    }

    fn apply_template() -> CommitApply {
        CommitApply {
            repo_full_id: "alice/m1".into(),
            repo_type: RepoType::Model,
            branch: "main".into(),
            commit_id: "c0ffee".into(),
            username: "alice".into(),
            message: "init".into(),
            description: String::new(),
            upserts: vec![],
            deletes: vec![],
            folder_deletes: vec![],
            lfs_refs: vec![],
            quota: None,
        }
    }

    #[tokio::test]
    async fn apply_upserts_and_replays_are_idempotent() {
        let store = seeded().await;
        let mut apply = apply_template();
        apply.upserts = vec![FileUpsert {
            path: "config.json".into(),
            size: 8,
            sha256: "aaa".into(),
            lfs: false,
        }];
        store.apply_commit(apply.clone()).await.unwrap();

        // Replay with a new commit id: same file row, second commit row.
        apply.commit_id = "c0ffee2".into();
        store.apply_commit(apply).await.unwrap();

        let files = store.list_files("alice/m1", RepoType::Model).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].sha256, "aaa");

        let commits = store
            .list_commits("alice/m1", RepoType::Model, "main", 10, 0)
            .await
            .unwrap();
        assert_eq!(commits.len(), 2);
    }

    #[tokio::test]
    async fn folder_delete_does_not_cross_prefix_boundaries() {
        let store = seeded().await;
        let mut apply = apply_template();
        apply.upserts = vec![
            FileUpsert { path: "data/a.txt".into(), size: 1, sha256: "a".into(), lfs: false },
            FileUpsert { path: "data/b.txt".into(), size: 1, sha256: "b".into(), lfs: false },
            FileUpsert { path: "data_other/c.txt".into(), size: 1, sha256: "c".into(), lfs: false },
        ];
        store.apply_commit(apply).await.unwrap();

        let mut apply = apply_template();
        apply.commit_id = "second".into();
        apply.folder_deletes = vec!["data/".into()];
        store.apply_commit(apply).await.unwrap();

        let files = store.list_files("alice/m1", RepoType::Model).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path_in_repo.as_str()).collect();
        assert_eq!(paths, vec!["data_other/c.txt"]);
    }

    #[tokio::test]
    async fn quota_delta_lands_in_same_transaction() {
        let store = seeded().await;
        let user = store.get_user_by_name("alice").await.unwrap().unwrap();

        let mut apply = apply_template();
        apply.upserts = vec![FileUpsert {
            path: "model.bin".into(),
            size: 100,
            sha256: "fff".into(),
            lfs: true,
        }];
        apply.lfs_refs = vec![LfsRef {
            path: "model.bin".into(),
            sha256: "fff".into(),
            size: 100,
        }];
        apply.quota = Some(QuotaDelta {
            is_org: false,
            namespace_id: user.id,
            private: false,
            delta: 100,
        });
        store.apply_commit(apply).await.unwrap();

        let user = store.get_user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(user.public_used_bytes, 100);
        assert_eq!(user.private_used_bytes, 0);
    }
}
