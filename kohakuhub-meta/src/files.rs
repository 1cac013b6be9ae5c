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

//! File rows: the dedup index and the authority for storage accounting
//! on the tip of the primary branch.

use kohakuhub_core::RepoType;

use crate::error::Result;
use crate::models::FileEntry;
use crate::MetaStore;

impl MetaStore {
    pub async fn get_file(
        &self,
        repo_full_id: &str,
        repo_type: RepoType,
        path: &str,
    ) -> Result<Option<FileEntry>> {
        let row = sqlx::query(
            "SELECT * FROM files
             WHERE repo_full_id = $1 AND repo_type = $2 AND path_in_repo = $3",
        )
        .bind(repo_full_id)
        .bind(repo_type.as_str())
        .bind(path)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| FileEntry::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list_files(
        &self,
        repo_full_id: &str,
        repo_type: RepoType,
    ) -> Result<Vec<FileEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM files
             WHERE repo_full_id = $1 AND repo_type = $2
             ORDER BY path_in_repo",
        )
        .bind(repo_full_id)
        .bind(repo_type.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| FileEntry::from_row(r).map_err(Into::into))
            .collect()
    }

    /// Preupload dedup: does this exact `(path, sha256, size)` already sit
    /// at the branch tip?
    pub async fn file_matches(
        &self,
        repo_full_id: &str,
        repo_type: RepoType,
        path: &str,
        sha256: &str,
        size: i64,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files
             WHERE repo_full_id = $1 AND repo_type = $2 AND path_in_repo = $3
               AND sha256 = $4 AND size = $5",
        )
        .bind(repo_full_id)
        .bind(repo_type.as_str())
        .bind(path)
        .bind(sha256)
        .bind(size)
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }

    /// How many File rows anywhere still reference a blob. Consulted by
    /// the garbage collector before deleting from S3.
    pub async fn count_file_refs(&self, sha256: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE sha256 = $1")
            .bind(sha256)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// File rows outside one repository that reference a blob.
    pub async fn count_file_refs_elsewhere(
        &self,
        sha256: &str,
        exclude_repo_full_id: &str,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE sha256 = $1 AND repo_full_id <> $2",
        )
        .bind(sha256)
        .bind(exclude_repo_full_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// Per-privacy-bucket byte totals for a namespace, straight from File
    /// rows. The recompute path of the quota engine.
    pub async fn namespace_file_bytes(&self, namespace_norm: &str) -> Result<(i64, i64)> {
        let private: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(f.size) FROM files f
             JOIN repositories r
               ON r.full_id = f.repo_full_id AND r.repo_type = f.repo_type
             WHERE r.namespace_norm = $1 AND r.private = 1 AND r.deleted = 0",
        )
        .bind(namespace_norm)
        .fetch_one(self.pool())
        .await?;
        let public: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(f.size) FROM files f
             JOIN repositories r
               ON r.full_id = f.repo_full_id AND r.repo_type = f.repo_type
             WHERE r.namespace_norm = $1 AND r.private = 0 AND r.deleted = 0",
        )
        .bind(namespace_norm)
        .fetch_one(self.pool())
        .await?;
        Ok((private.unwrap_or(0), public.unwrap_or(0)))
    }

    /// Bytes currently accounted to one repository.
    pub async fn repo_used_bytes(&self, repo_full_id: &str, repo_type: RepoType) -> Result<i64> {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(size) FROM files WHERE repo_full_id = $1 AND repo_type = $2",
        )
        .bind(repo_full_id)
        .bind(repo_type.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(sum.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::Namespace;
    use kohakuhub_core::RepoId;

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
            .create_repo(&RepoId::new(RepoType::Model, "alice", "secret"), true, &alice)
            .await
            .unwrap();
        for (repo, path, size, sha) in [
            ("alice/m1", "config.json", 8_i64, "aaa"),
            ("alice/m1", "model.bin", 100, "bbb"),
            ("alice/secret", "weights.bin", 50, "ccc"),
        ] {
            sqlx::query(
                "INSERT INTO files (repo_full_id, repo_type, path_in_repo, size, sha256, lfs, created_at, updated_at)
                 VALUES ($1, 'model', $2, $3, $4, 0, 0, 0)",
            )
            .bind(repo)
            .bind(path)
            .bind(size)
            .bind(sha)
            .execute(store.pool())
            .await
            .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn dedup_lookup_matches_exact_triple() {
        let store = seeded().await;
        assert!(store
            .file_matches("alice/m1", RepoType::Model, "config.json", "aaa", 8)
            .await
            .unwrap());
        // Different sha or size is not a match.
        assert!(!store
            .file_matches("alice/m1", RepoType::Model, "config.json", "zzz", 8)
            .await
            .unwrap());
        assert!(!store
            .file_matches("alice/m1", RepoType::Model, "config.json", "aaa", 9)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn namespace_totals_split_by_privacy() {
        let store = seeded().await;
        let (private, public) = store.namespace_file_bytes("alice").await.unwrap();
        assert_eq!(private, 50);
        assert_eq!(public, 108);
        assert_eq!(
            store.repo_used_bytes("alice/m1", RepoType::Model).await.unwrap(),
            108
        );
    }
}
