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

//! Repository rows, redirects and the move cascade.

use kohakuhub_core::{normalize_name, RepoId, RepoType};

use crate::error::{MetaError, Result};
use crate::models::Repository;
use crate::users::Namespace;
use crate::{now_epoch, MetaStore};

impl MetaStore {
    pub async fn create_repo(
        &self,
        id: &RepoId,
        private: bool,
        owner: &Namespace,
    ) -> Result<Repository> {
        if self.get_repo(id).await?.is_some() {
            return Err(MetaError::Conflict(format!("repo exists: {id}")));
        }

        let (owner_user_id, owner_org_id) = match owner {
            Namespace::User(u) => (Some(u.id), None),
            Namespace::Org(o) => (None, Some(o.id)),
        };

        let result = sqlx::query(
            "INSERT INTO repositories
                (repo_type, namespace, name, namespace_norm, name_norm, full_id,
                 private, owner_user_id, owner_org_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(id.repo_type.as_str())
        .bind(&id.namespace)
        .bind(&id.name)
        .bind(normalize_name(&id.namespace))
        .bind(normalize_name(&id.name))
        .bind(id.full_id())
        .bind(private as i64)
        .bind(owner_user_id)
        .bind(owner_org_id)
        .bind(now_epoch())
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => {}
            Err(e) => {
                let err = MetaError::Database(e);
                if err.is_unique_violation() {
                    return Err(MetaError::Conflict(format!("repo exists: {id}")));
                }
                return Err(err);
            }
        }

        self.get_repo(id)
            .await?
            .ok_or_else(|| MetaError::NotFound(format!("repo just created: {id}")))
    }

    /// Resolve `(type, namespace, name)` to a live repository row.
    pub async fn get_repo(&self, id: &RepoId) -> Result<Option<Repository>> {
        let row = sqlx::query(
            "SELECT * FROM repositories
             WHERE repo_type = $1 AND namespace_norm = $2 AND name_norm = $3
               AND deleted = 0",
        )
        .bind(id.repo_type.as_str())
        .bind(normalize_name(&id.namespace))
        .bind(normalize_name(&id.name))
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| Repository::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Follow a rename trail left by `move_repo`, if any.
    pub async fn get_redirect(&self, id: &RepoId) -> Result<Option<String>> {
        let from_norm = format!(
            "{}/{}",
            normalize_name(&id.namespace),
            normalize_name(&id.name)
        );
        let row: Option<String> = sqlx::query_scalar(
            "SELECT to_full_id FROM repo_redirects
             WHERE repo_type = $1 AND from_norm = $2",
        )
        .bind(id.repo_type.as_str())
        .bind(from_norm)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// List live repos of one type; `author` filters by namespace,
    /// `viewer_namespaces` widens visibility beyond public.
    pub async fn list_repos(
        &self,
        repo_type: RepoType,
        author: Option<&str>,
        viewer_namespaces: &[String],
        limit: i64,
    ) -> Result<Vec<Repository>> {
        // Visibility filter composed in SQL; viewer namespaces are bound
        // one by one since Any has no array binds.
        let mut sql = String::from(
            "SELECT * FROM repositories WHERE repo_type = $1 AND deleted = 0",
        );
        let mut arg = 2;
        if author.is_some() {
            sql.push_str(&format!(" AND namespace_norm = ${arg}"));
            arg += 1;
        }
        if viewer_namespaces.is_empty() {
            sql.push_str(" AND private = 0");
        } else {
            let placeholders: Vec<String> = (0..viewer_namespaces.len())
                .map(|i| format!("${}", arg + i))
                .collect();
            sql.push_str(&format!(
                " AND (private = 0 OR namespace_norm IN ({}))",
                placeholders.join(", ")
            ));
            arg += viewer_namespaces.len();
        }
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ${arg}"));

        let mut query = sqlx::query(&sql).bind(repo_type.as_str());
        if let Some(author) = author {
            query = query.bind(normalize_name(author));
        }
        for ns in viewer_namespaces {
            query = query.bind(normalize_name(ns));
        }
        query = query.bind(limit);

        let rows = query.fetch_all(self.pool()).await?;
        rows.iter()
            .map(|r| Repository::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn list_repos_by_namespace(&self, namespace: &str) -> Result<Vec<Repository>> {
        let rows = sqlx::query(
            "SELECT * FROM repositories WHERE namespace_norm = $1 AND deleted = 0",
        )
        .bind(normalize_name(namespace))
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| Repository::from_row(r).map_err(Into::into))
            .collect()
    }

    /// Fence off a repo while its teardown runs.
    pub async fn mark_repo_deleted(&self, repo_id: i64) -> Result<()> {
        sqlx::query("UPDATE repositories SET deleted = 1 WHERE id = $1")
            .bind(repo_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_repo_settings(
        &self,
        repo_id: i64,
        private: Option<bool>,
        gated: Option<bool>,
    ) -> Result<()> {
        if let Some(private) = private {
            sqlx::query("UPDATE repositories SET private = $1 WHERE id = $2")
                .bind(private as i64)
                .bind(repo_id)
                .execute(self.pool())
                .await?;
        }
        if let Some(gated) = gated {
            sqlx::query("UPDATE repositories SET gated = $1 WHERE id = $2")
                .bind(gated as i64)
                .bind(repo_id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    /// Remove every row belonging to a repository. Used by the delete
    /// orchestration after external stores are cleaned up.
    pub async fn purge_repo_rows(&self, repo: &Repository) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        for table in ["files", "commits", "lfs_object_history", "staging_uploads"] {
            let sql = format!(
                "DELETE FROM {table} WHERE repo_full_id = $1 AND repo_type = $2"
            );
            sqlx::query(&sql)
                .bind(&repo.full_id)
                .bind(repo.repo_type.as_str())
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM repositories WHERE id = $1")
            .bind(repo.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Rename/reparent in one transaction: the repository row, every
    /// dependent row keyed by `repo_full_id`, and a redirect from the old
    /// normalized id.
    pub async fn move_repo_rows(
        &self,
        repo: &Repository,
        dest: &RepoId,
        dest_owner: &Namespace,
    ) -> Result<()> {
        let old_full_id = repo.full_id.clone();
        let new_full_id = dest.full_id();
        let (owner_user_id, owner_org_id) = match dest_owner {
            Namespace::User(u) => (Some(u.id), None),
            Namespace::Org(o) => (None, Some(o.id)),
        };

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE repositories SET
                namespace = $1, name = $2,
                namespace_norm = $3, name_norm = $4,
                full_id = $5, owner_user_id = $6, owner_org_id = $7
             WHERE id = $8",
        )
        .bind(&dest.namespace)
        .bind(&dest.name)
        .bind(normalize_name(&dest.namespace))
        .bind(normalize_name(&dest.name))
        .bind(&new_full_id)
        .bind(owner_user_id)
        .bind(owner_org_id)
        .bind(repo.id)
        .execute(&mut *tx)
        .await?;

        for table in ["files", "commits", "lfs_object_history", "staging_uploads"] {
            let sql = format!(
                "UPDATE {table} SET repo_full_id = $1
                 WHERE repo_full_id = $2 AND repo_type = $3"
            );
            sqlx::query(&sql)
                .bind(&new_full_id)
                .bind(&old_full_id)
                .bind(repo.repo_type.as_str())
                .execute(&mut *tx)
                .await?;
        }

        let from_norm = format!(
            "{}/{}",
            normalize_name(&repo.namespace),
            normalize_name(&repo.name)
        );
        sqlx::query(
            "INSERT INTO repo_redirects (repo_type, from_norm, to_full_id, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (repo_type, from_norm) DO UPDATE SET to_full_id = excluded.to_full_id",
        )
        .bind(repo.repo_type.as_str())
        .bind(&from_norm)
        .bind(&new_full_id)
        .bind(now_epoch())
        .execute(&mut *tx)
        .await?;

        // Moving back over an old redirect makes it stale; drop it.
        let new_norm = format!(
            "{}/{}",
            normalize_name(&dest.namespace),
            normalize_name(&dest.name)
        );
        sqlx::query("DELETE FROM repo_redirects WHERE repo_type = $1 AND from_norm = $2")
            .bind(repo.repo_type.as_str())
            .bind(&new_norm)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::Namespace;

    async fn store() -> MetaStore {
        MetaStore::connect("sqlite::memory:").await.unwrap()
    }

    async fn user_ns(store: &MetaStore, name: &str) -> Namespace {
        Namespace::User(
            store
                .create_user(name, "", "x", None, None)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn create_resolves_case_insensitively() {
        let store = store().await;
        let alice = user_ns(&store, "alice").await;
        let id = RepoId::new(RepoType::Model, "alice", "My_Model");
        store.create_repo(&id, false, &alice).await.unwrap();

        let found = store
            .get_repo(&RepoId::new(RepoType::Model, "ALICE", "my-model"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.full_id, "alice/My_Model");

        // Same normalized tuple is a conflict.
        let dup = RepoId::new(RepoType::Model, "Alice", "my_model");
        assert!(matches!(
            store.create_repo(&dup, false, &alice).await.unwrap_err(),
            MetaError::Conflict(_)
        ));

        // Different type is fine.
        let ds = RepoId::new(RepoType::Dataset, "alice", "My_Model");
        store.create_repo(&ds, false, &alice).await.unwrap();
    }

    #[tokio::test]
    async fn move_rewrites_dependents_and_leaves_redirect() {
        let store = store().await;
        let alice = user_ns(&store, "alice").await;
        let bob = user_ns(&store, "bob").await;

        let src = RepoId::new(RepoType::Model, "alice", "m1");
        let repo = store.create_repo(&src, false, &alice).await.unwrap();

        // Seed a dependent row.
        sqlx::query(
            "INSERT INTO files (repo_full_id, repo_type, path_in_repo, size, sha256, lfs, created_at, updated_at)
             VALUES ('alice/m1', 'model', 'a.txt', 3, 'abc', 0, 0, 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let dest = RepoId::new(RepoType::Model, "bob", "m1");
        store.move_repo_rows(&repo, &dest, &bob).await.unwrap();

        assert!(store.get_repo(&src).await.unwrap().is_none());
        let moved = store.get_repo(&dest).await.unwrap().unwrap();
        assert_eq!(moved.full_id, "bob/m1");
        assert_eq!(moved.owner_user_id, match &bob {
            Namespace::User(u) => Some(u.id),
            _ => None,
        });

        let redirected = store.get_redirect(&src).await.unwrap();
        assert_eq!(redirected.as_deref(), Some("bob/m1"));

        let file_repo: String =
            sqlx::query_scalar("SELECT repo_full_id FROM files WHERE path_in_repo = 'a.txt'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(file_repo, "bob/m1");

        // Move back; redirect chain collapses (R4).
        let moved = store.get_repo(&dest).await.unwrap().unwrap();
        store.move_repo_rows(&moved, &src, &alice).await.unwrap();
        assert!(store.get_redirect(&dest).await.unwrap().is_some());
        assert!(store.get_redirect(&src).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_everything() {
        let store = store().await;
        let alice = user_ns(&store, "alice").await;
        let id = RepoId::new(RepoType::Model, "alice", "m1");
        let repo = store.create_repo(&id, false, &alice).await.unwrap();

        sqlx::query(
            "INSERT INTO commits (commit_id, repo_full_id, repo_type, branch, username, message, created_at)
             VALUES ('deadbeef', 'alice/m1', 'model', 'main', 'alice', 'init', 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        store.purge_repo_rows(&repo).await.unwrap();
        assert!(store.get_repo(&id).await.unwrap().is_none());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commits")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
