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

//! Users, organizations, memberships and access tokens.

use kohakuhub_core::normalize_name;
use sha2::{Digest, Sha256};

use crate::error::{MetaError, Result};
use crate::models::{Membership, OrgRole, Organization, User};
use crate::{now_epoch, MetaStore};

/// A namespace is either a user or an organization.
#[derive(Debug, Clone)]
pub enum Namespace {
    User(User),
    Org(Organization),
}

impl Namespace {
    pub fn name(&self) -> &str {
        match self {
            Namespace::User(u) => &u.username,
            Namespace::Org(o) => &o.name,
        }
    }

    pub fn is_org(&self) -> bool {
        matches!(self, Namespace::Org(_))
    }
}

impl MetaStore {
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        private_quota: Option<i64>,
        public_quota: Option<i64>,
    ) -> Result<User> {
        let norm = normalize_name(username);
        if self.find_namespace(&norm).await?.is_some() {
            return Err(MetaError::Conflict(format!(
                "namespace already taken: {username}"
            )));
        }

        sqlx::query(
            "INSERT INTO users
                (username, username_norm, email, password_hash,
                 private_quota_bytes, public_quota_bytes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(username)
        .bind(&norm)
        .bind(email)
        .bind(password_hash)
        .bind(private_quota)
        .bind(public_quota)
        .bind(now_epoch())
        .execute(self.pool())
        .await?;

        self.get_user_by_name(username)
            .await?
            .ok_or_else(|| MetaError::NotFound(format!("user just created: {username}")))
    }

    pub async fn get_user_by_name(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username_norm = $1")
            .bind(normalize_name(username))
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| User::from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| User::from_row(&r)).transpose().map_err(Into::into)
    }

    /// Soft-deactivate; the core never hard-deletes users.
    pub async fn deactivate_user(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET is_active = 0 WHERE id = $1")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn create_org(
        &self,
        name: &str,
        description: &str,
        creator: &User,
        private_quota: Option<i64>,
        public_quota: Option<i64>,
    ) -> Result<Organization> {
        let norm = normalize_name(name);
        if self.find_namespace(&norm).await?.is_some() {
            return Err(MetaError::Conflict(format!("namespace already taken: {name}")));
        }

        sqlx::query(
            "INSERT INTO organizations
                (name, name_norm, description,
                 private_quota_bytes, public_quota_bytes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(name)
        .bind(&norm)
        .bind(description)
        .bind(private_quota)
        .bind(public_quota)
        .bind(now_epoch())
        .execute(self.pool())
        .await?;

        let org = self
            .get_org_by_name(name)
            .await?
            .ok_or_else(|| MetaError::NotFound(format!("org just created: {name}")))?;

        // The creator is the initial super-admin.
        sqlx::query(
            "INSERT INTO memberships (user_id, org_id, role, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(creator.id)
        .bind(org.id)
        .bind(OrgRole::SuperAdmin.as_str())
        .bind(now_epoch())
        .execute(self.pool())
        .await?;

        Ok(org)
    }

    pub async fn get_org_by_name(&self, name: &str) -> Result<Option<Organization>> {
        let row = sqlx::query("SELECT * FROM organizations WHERE name_norm = $1")
            .bind(normalize_name(name))
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| Organization::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    /// Resolve a normalized name to whichever namespace owns it.
    pub async fn find_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        if let Some(user) = self.get_user_by_name(name).await? {
            return Ok(Some(Namespace::User(user)));
        }
        if let Some(org) = self.get_org_by_name(name).await? {
            return Ok(Some(Namespace::Org(org)));
        }
        Ok(None)
    }

    pub async fn get_membership(&self, org_id: i64, user_id: i64) -> Result<Option<Membership>> {
        let row = sqlx::query("SELECT * FROM memberships WHERE org_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| Membership::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn add_member(&self, org_id: i64, user_id: i64, role: OrgRole) -> Result<()> {
        sqlx::query(
            "INSERT INTO memberships (user_id, org_id, role, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, org_id) DO UPDATE SET role = excluded.role",
        )
        .bind(user_id)
        .bind(org_id)
        .bind(role.as_str())
        .bind(now_epoch())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Remove a member. Removing the last super-admin is forbidden.
    pub async fn remove_member(&self, org_id: i64, user_id: i64) -> Result<()> {
        let member = self
            .get_membership(org_id, user_id)
            .await?
            .ok_or_else(|| MetaError::NotFound("membership".into()))?;

        if member.role == OrgRole::SuperAdmin {
            let remaining: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM memberships WHERE org_id = $1 AND role = $2",
            )
            .bind(org_id)
            .bind(OrgRole::SuperAdmin.as_str())
            .fetch_one(self.pool())
            .await?;
            if remaining <= 1 {
                return Err(MetaError::Conflict(
                    "cannot remove the last super-admin of an organization".into(),
                ));
            }
        }

        sqlx::query("DELETE FROM memberships WHERE org_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn list_members(&self, org_id: i64) -> Result<Vec<Membership>> {
        let rows = sqlx::query("SELECT * FROM memberships WHERE org_id = $1")
            .bind(org_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|r| Membership::from_row(r).map_err(Into::into))
            .collect()
    }

    pub async fn list_user_orgs(&self, user_id: i64) -> Result<Vec<Organization>> {
        let rows = sqlx::query(
            "SELECT o.* FROM organizations o
             JOIN memberships m ON m.org_id = o.id
             WHERE m.user_id = $1
             ORDER BY o.name_norm",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| Organization::from_row(r).map_err(Into::into))
            .collect()
    }

    /// Register an access token for a user. Only the SHA-256 of the token
    /// is stored.
    pub async fn create_token(&self, user_id: i64, token: &str, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO tokens (user_id, token_hash, name, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(token_hash(token))
        .bind(name)
        .bind(now_epoch())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Resolve a bearer token to its active user, updating `last_used`.
    pub async fn lookup_token(&self, token: &str) -> Result<Option<User>> {
        let hash = token_hash(token);
        let row = sqlx::query(
            "SELECT u.* FROM users u
             JOIN tokens t ON t.user_id = u.id
             WHERE t.token_hash = $1 AND u.is_active = 1",
        )
        .bind(&hash)
        .fetch_optional(self.pool())
        .await?;

        let user = row.map(|r| User::from_row(&r)).transpose()?;
        if user.is_some() {
            sqlx::query("UPDATE tokens SET last_used = $1 WHERE token_hash = $2")
                .bind(now_epoch())
                .bind(&hash)
                .execute(self.pool())
                .await?;
        }
        Ok(user)
    }
}

fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MetaStore {
        MetaStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn user_and_org_share_one_namespace_pool() {
        let store = store().await;
        let alice = store
            .create_user("Alice", "a@example.com", "x", None, None)
            .await
            .unwrap();
        assert_eq!(alice.username, "Alice");

        // Normalized collision: "alice" is taken by the user.
        let err = store
            .create_org("ALICE", "", &alice, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MetaError::Conflict(_)));

        // Lookup is case-insensitive, display case preserved.
        let found = store.get_user_by_name("ALICE").await.unwrap().unwrap();
        assert_eq!(found.username, "Alice");
    }

    #[tokio::test]
    async fn last_super_admin_is_protected() {
        let store = store().await;
        let alice = store
            .create_user("alice", "", "x", None, None)
            .await
            .unwrap();
        let bob = store.create_user("bob", "", "x", None, None).await.unwrap();
        let org = store
            .create_org("acme", "", &alice, None, None)
            .await
            .unwrap();

        store.add_member(org.id, bob.id, OrgRole::Member).await.unwrap();

        let err = store.remove_member(org.id, alice.id).await.unwrap_err();
        assert!(matches!(err, MetaError::Conflict(_)));

        // A second super-admin unblocks removal.
        store
            .add_member(org.id, bob.id, OrgRole::SuperAdmin)
            .await
            .unwrap();
        store.remove_member(org.id, alice.id).await.unwrap();
    }

    #[tokio::test]
    async fn token_lookup_round_trip() {
        let store = store().await;
        let user = store
            .create_user("carol", "", "x", None, None)
            .await
            .unwrap();
        store.create_token(user.id, "hf_secret", "cli").await.unwrap();

        let found = store.lookup_token("hf_secret").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(store.lookup_token("wrong").await.unwrap().is_none());

        store.deactivate_user(user.id).await.unwrap();
        assert!(store.lookup_token("hf_secret").await.unwrap().is_none());
    }
}
