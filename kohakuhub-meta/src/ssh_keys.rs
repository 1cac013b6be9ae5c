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

//! SSH key registry. Cryptographic verification happens upstream; this
//! module only stores validated keys and their fingerprints.

use crate::error::{MetaError, Result};
use crate::models::SshKey;
use crate::{now_epoch, MetaStore};

impl MetaStore {
    pub async fn add_ssh_key(
        &self,
        user_id: i64,
        key_type: &str,
        public_key: &str,
        fingerprint: &str,
        title: &str,
    ) -> Result<SshKey> {
        let result = sqlx::query(
            "INSERT INTO ssh_keys (user_id, key_type, public_key, fingerprint, title, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user_id)
        .bind(key_type)
        .bind(public_key)
        .bind(fingerprint)
        .bind(title)
        .bind(now_epoch())
        .execute(self.pool())
        .await;

        if let Err(e) = result {
            let err = MetaError::Database(e);
            if err.is_unique_violation() {
                return Err(MetaError::Conflict(format!(
                    "ssh key already registered: {fingerprint}"
                )));
            }
            return Err(err);
        }

        self.get_ssh_key_by_fingerprint(fingerprint)
            .await?
            .ok_or_else(|| MetaError::NotFound("ssh key just created".into()))
    }

    pub async fn get_ssh_key_by_fingerprint(&self, fingerprint: &str) -> Result<Option<SshKey>> {
        let row = sqlx::query("SELECT * FROM ssh_keys WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| SshKey::from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list_ssh_keys(&self, user_id: i64) -> Result<Vec<SshKey>> {
        let rows = sqlx::query(
            "SELECT * FROM ssh_keys WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| SshKey::from_row(r).map_err(Into::into))
            .collect()
    }

    /// Delete a key owned by `user_id`. Deleting someone else's key is
    /// NotFound, not Forbidden, so key ids do not leak.
    pub async fn delete_ssh_key(&self, user_id: i64, key_id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM ssh_keys WHERE id = $1 AND user_id = $2")
            .bind(key_id)
            .bind(user_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetaError::NotFound("ssh key".into()));
        }
        Ok(())
    }

    pub async fn touch_ssh_key(&self, fingerprint: &str) -> Result<()> {
        sqlx::query("UPDATE ssh_keys SET last_used = $1 WHERE fingerprint = $2")
            .bind(now_epoch())
            .bind(fingerprint)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fingerprint_is_unique_and_deletion_scoped() {
        let store = MetaStore::connect("sqlite::memory:").await.unwrap();
        let alice = store.create_user("alice", "", "x", None, None).await.unwrap();
        let bob = store.create_user("bob", "", "x", None, None).await.unwrap();

        let key = store
            .add_ssh_key(alice.id, "ssh-ed25519", "AAAA...", "SHA256:abcdef", "laptop")
            .await
            .unwrap();

        let dup = store
            .add_ssh_key(bob.id, "ssh-ed25519", "AAAA...", "SHA256:abcdef", "other")
            .await
            .unwrap_err();
        assert!(matches!(dup, MetaError::Conflict(_)));

        // Bob cannot delete Alice's key.
        assert!(matches!(
            store.delete_ssh_key(bob.id, key.id).await.unwrap_err(),
            MetaError::NotFound(_)
        ));
        store.delete_ssh_key(alice.id, key.id).await.unwrap();
        assert!(store.list_ssh_keys(alice.id).await.unwrap().is_empty());
    }
}
