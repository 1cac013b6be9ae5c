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

//! Quota engine: dual private/public storage accounting per namespace.
//!
//! Counters never go through read-modify-write; every change is an
//! additive `UPDATE … SET used = used + $n` so concurrent commits cannot
//! lose increments. The pre-check is an optimistic reservation: the delta
//! is only applied inside the commit's own transaction.

use sqlx::any::Any;
use sqlx::Transaction;

use crate::error::{MetaError, Result};
use crate::Backend;
use crate::models::Repository;
use crate::users::Namespace;
use crate::MetaStore;

/// Which privacy bucket a repository's bytes land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaBucket {
    Private,
    Public,
}

impl QuotaBucket {
    pub fn from_private(private: bool) -> Self {
        if private {
            QuotaBucket::Private
        } else {
            QuotaBucket::Public
        }
    }

    fn used_col(&self) -> &'static str {
        match self {
            QuotaBucket::Private => "private_used_bytes",
            QuotaBucket::Public => "public_used_bytes",
        }
    }
}

/// Outcome of an admission pre-check.
#[derive(Debug, Clone)]
pub enum QuotaDecision {
    Allowed,
    Denied { used: i64, quota: i64, requested: i64 },
}

impl QuotaDecision {
    pub fn allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }
}

/// An additive counter change, executed inside a caller-owned
/// transaction (normally the commit transaction).
#[derive(Debug, Clone)]
pub struct QuotaDelta {
    pub is_org: bool,
    pub namespace_id: i64,
    pub private: bool,
    pub delta: i64,
}

impl QuotaDelta {
    pub(crate) async fn execute(
        &self,
        tx: &mut Transaction<'_, Any>,
        backend: Backend,
    ) -> Result<()> {
        if self.delta == 0 {
            return Ok(());
        }
        let table = if self.is_org { "organizations" } else { "users" };
        let col = QuotaBucket::from_private(self.private).used_col();
        // Floor at zero: recompute fixes drift, a negative counter never helps.
        let floor = floor_fn(backend);
        let sql = format!(
            "UPDATE {table} SET {col} = {floor}(0, {col} + $1) WHERE id = $2"
        );
        sqlx::query(&sql)
            .bind(self.delta)
            .bind(self.namespace_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

/// SQLite spells two-argument max `MAX`, Postgres `GREATEST`.
fn floor_fn(backend: Backend) -> &'static str {
    match backend {
        Backend::Sqlite => "MAX",
        Backend::Postgres => "GREATEST",
    }
}

impl MetaStore {
    /// Admission control: would `delta_bytes` more in this bucket exceed
    /// the namespace quota? NULL quota means unlimited.
    pub async fn quota_check(
        &self,
        namespace: &Namespace,
        delta_bytes: i64,
        private: bool,
    ) -> Result<QuotaDecision> {
        if delta_bytes <= 0 {
            return Ok(QuotaDecision::Allowed);
        }
        let (used, quota) = match (namespace, private) {
            (Namespace::User(u), true) => (u.private_used_bytes, u.private_quota_bytes),
            (Namespace::User(u), false) => (u.public_used_bytes, u.public_quota_bytes),
            (Namespace::Org(o), true) => (o.private_used_bytes, o.private_quota_bytes),
            (Namespace::Org(o), false) => (o.public_used_bytes, o.public_quota_bytes),
        };
        match quota {
            Some(quota) if used + delta_bytes > quota => Ok(QuotaDecision::Denied {
                used,
                quota,
                requested: delta_bytes,
            }),
            _ => Ok(QuotaDecision::Allowed),
        }
    }

    /// Standalone counter update (deletes, moves). Commits use
    /// `CommitApply.quota` instead so the delta shares the commit
    /// transaction.
    pub async fn quota_update(&self, delta: &QuotaDelta) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        delta.execute(&mut tx, self.backend()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Authoritative recount from File rows plus the retained portion of
    /// the LFS history ledger, written back to the namespace row.
    pub async fn quota_recompute(
        &self,
        namespace: &Namespace,
        lfs_history_keep: usize,
    ) -> Result<(i64, i64)> {
        let norm = kohakuhub_core::normalize_name(namespace.name());
        let (mut private, mut public) = self.namespace_file_bytes(&norm).await?;

        // Historical LFS versions still retained by policy occupy storage
        // beyond the branch tip; count each distinct blob once, in the
        // bucket of the repo that referenced it.
        let (hist_private, hist_public) = self
            .retained_history_bytes(&norm, lfs_history_keep)
            .await?;
        private += hist_private;
        public += hist_public;

        let (table, id) = match namespace {
            Namespace::User(u) => ("users", u.id),
            Namespace::Org(o) => ("organizations", o.id),
        };
        let sql = format!(
            "UPDATE {table} SET private_used_bytes = $1, public_used_bytes = $2 WHERE id = $3"
        );
        sqlx::query(&sql)
            .bind(private)
            .bind(public)
            .bind(id)
            .execute(self.pool())
            .await?;

        tracing::info!(
            namespace = namespace.name(),
            private_used = private,
            public_used = public,
            "quota recomputed"
        );
        Ok((private, public))
    }

    /// Overwrite a namespace's quota grants. `None` means unlimited.
    pub async fn set_namespace_quota(
        &self,
        namespace: &Namespace,
        private_quota: Option<i64>,
        public_quota: Option<i64>,
    ) -> Result<()> {
        let (table, id) = match namespace {
            Namespace::User(u) => ("users", u.id),
            Namespace::Org(o) => ("organizations", o.id),
        };
        let sql = format!(
            "UPDATE {table} SET private_quota_bytes = $1, public_quota_bytes = $2 WHERE id = $3"
        );
        sqlx::query(&sql)
            .bind(private_quota)
            .bind(public_quota)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Flip a repository between buckets: move its current bytes over and
    /// update the flag, after a pre-check against the destination bucket.
    pub async fn quota_visibility_change(
        &self,
        repo: &Repository,
        namespace: &Namespace,
        new_private: bool,
    ) -> Result<()> {
        if repo.private == new_private {
            return Ok(());
        }
        let used = self.repo_used_bytes(&repo.full_id, repo.repo_type).await?;

        let decision = self.quota_check(namespace, used, new_private).await?;
        if let QuotaDecision::Denied { used, quota, requested } = decision {
            return Err(MetaError::QuotaExceeded(format!(
                "destination bucket full: used {used} + {requested} > quota {quota}"
            )));
        }

        let (table, id) = match namespace {
            Namespace::User(u) => ("users", u.id),
            Namespace::Org(o) => ("organizations", o.id),
        };
        let (from_col, to_col) = if new_private {
            ("public_used_bytes", "private_used_bytes")
        } else {
            ("private_used_bytes", "public_used_bytes")
        };

        let mut tx = self.pool().begin().await?;
        let floor = floor_fn(self.backend());
        let sql = format!(
            "UPDATE {table} SET {from_col} = {floor}(0, {from_col} - $1),
                                {to_col} = {to_col} + $1
             WHERE id = $2"
        );
        sqlx::query(&sql)
            .bind(used)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE repositories SET private = $1 WHERE id = $2")
            .bind(new_private as i64)
            .bind(repo.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kohakuhub_core::{RepoId, RepoType};

    async fn store() -> MetaStore {
        MetaStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn check_respects_null_as_unlimited() {
        let store = store().await;
        let user = store
            .create_user("alice", "", "x", None, Some(10))
            .await
            .unwrap();
        let ns = Namespace::User(user);

        // Private quota is NULL: anything goes.
        assert!(store.quota_check(&ns, i64::MAX / 2, true).await.unwrap().allowed());
        // Public quota is 10.
        assert!(store.quota_check(&ns, 10, false).await.unwrap().allowed());
        assert!(!store.quota_check(&ns, 11, false).await.unwrap().allowed());
        // Frees are always admitted.
        assert!(store.quota_check(&ns, -5, false).await.unwrap().allowed());
    }

    #[tokio::test]
    async fn update_is_additive_and_floored() {
        let store = store().await;
        let user = store.create_user("alice", "", "x", None, None).await.unwrap();

        let delta = |d: i64| QuotaDelta {
            is_org: false,
            namespace_id: user.id,
            private: false,
            delta: d,
        };
        store.quota_update(&delta(100)).await.unwrap();
        store.quota_update(&delta(-30)).await.unwrap();
        let user = store.get_user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(user.public_used_bytes, 70);

        store.quota_update(&delta(-1000)).await.unwrap();
        let user = store.get_user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(user.public_used_bytes, 0);
    }

    #[tokio::test]
    async fn visibility_change_moves_bytes_and_prechecks() {
        let store = store().await;
        let user = store
            .create_user("alice", "", "x", Some(50), None)
            .await
            .unwrap();
        let ns = Namespace::User(user.clone());
        let repo = store
            .create_repo(&RepoId::new(RepoType::Model, "alice", "m1"), false, &ns)
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO files (repo_full_id, repo_type, path_in_repo, size, sha256, lfs, created_at, updated_at)
             VALUES ('alice/m1', 'model', 'big.bin', 100, 'abc', 1, 0, 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();
        store
            .quota_update(&QuotaDelta { is_org: false, namespace_id: user.id, private: false, delta: 100 })
            .await
            .unwrap();

        // 100 bytes do not fit in the 50-byte private bucket.
        let err = store
            .quota_visibility_change(&repo, &ns, true)
            .await
            .unwrap_err();
        assert!(matches!(err, MetaError::QuotaExceeded(_)));

        // Raise the quota and flip.
        sqlx::query("UPDATE users SET private_quota_bytes = 200 WHERE id = $1")
            .bind(user.id)
            .execute(store.pool())
            .await
            .unwrap();
        let ns = Namespace::User(store.get_user_by_name("alice").await.unwrap().unwrap());
        store.quota_visibility_change(&repo, &ns, true).await.unwrap();

        let user = store.get_user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(user.public_used_bytes, 0);
        assert_eq!(user.private_used_bytes, 100);
        let repo = store
            .get_repo(&RepoId::new(RepoType::Model, "alice", "m1"))
            .await
            .unwrap()
            .unwrap();
        assert!(repo.private);
    }

    #[tokio::test]
    async fn recompute_matches_file_rows() {
        let store = store().await;
        let user = store.create_user("alice", "", "x", None, None).await.unwrap();
        let ns = Namespace::User(user.clone());
        store
            .create_repo(&RepoId::new(RepoType::Model, "alice", "m1"), false, &ns)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO files (repo_full_id, repo_type, path_in_repo, size, sha256, lfs, created_at, updated_at)
             VALUES ('alice/m1', 'model', 'a', 40, 'abc', 0, 0, 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        // Drift the counter on purpose.
        store
            .quota_update(&QuotaDelta { is_org: false, namespace_id: user.id, private: false, delta: 999 })
            .await
            .unwrap();

        let (private, public) = store.quota_recompute(&ns, 5).await.unwrap();
        assert_eq!((private, public), (0, 40));
        let user = store.get_user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(user.public_used_bytes, 40);
    }
}
