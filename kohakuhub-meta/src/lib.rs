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

//! KohakuHub Metadata Store
//!
//! Relational persistence for users, organizations, repositories, files,
//! commits, the LFS history ledger, staging uploads and SSH keys. This
//! crate is the sole authority for quota accounting and the SHA-256 dedup
//! index.
//!
//! Backed by `sqlx` over the `Any` driver so a deployment can point
//! `db.url` at SQLite (self-hosted default) or Postgres without a code
//! change. All SQL sticks to the `$n` placeholder form and the common
//! `ON CONFLICT` upsert dialect both backends accept; only the DDL
//! differs per backend (see `migrations`).

pub mod commits;
pub mod error;
pub mod files;
pub mod lfs;
pub mod migrations;
pub mod models;
pub mod quota;
pub mod repos;
pub mod ssh_keys;
pub mod users;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

pub use commits::{CommitApply, FileUpsert, LfsRef};
pub use error::{MetaError, Result};
pub use models::*;
pub use quota::{QuotaBucket, QuotaDecision, QuotaDelta};
pub use users::Namespace;

/// Which SQL backend `db.url` selected. Only affects DDL generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

/// Handle to the metadata database. Cheap to clone; all methods take
/// `&self` and go through the connection pool.
#[derive(Clone)]
pub struct MetaStore {
    pool: AnyPool,
    backend: Backend,
}

impl MetaStore {
    /// Connect and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let backend = if url.starts_with("postgres") {
            Backend::Postgres
        } else {
            Backend::Sqlite
        };

        // In-memory SQLite gives every pooled connection its own database;
        // clamp the pool so the schema and the data share one connection.
        let max_connections = if url.contains(":memory:") { 1 } else { 16 };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool, backend };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        for statement in migrations::ddl(self.backend) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        tracing::debug!("metadata schema up to date");
        Ok(())
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }
}

/// Seconds since the Unix epoch. All `created_at`-style columns use this.
pub fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
