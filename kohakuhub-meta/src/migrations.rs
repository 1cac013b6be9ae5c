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

//! Embedded schema.
//!
//! Everything is `CREATE … IF NOT EXISTS` so startup migration is
//! idempotent. The only per-backend difference is the auto-increment
//! primary key spelling; all data columns use types both SQLite and
//! Postgres accept.

use crate::Backend;

fn pk(backend: Backend) -> &'static str {
    match backend {
        Backend::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        Backend::Postgres => "BIGSERIAL PRIMARY KEY",
    }
}

/// DDL statements in application order.
pub fn ddl(backend: Backend) -> Vec<String> {
    let pk = pk(backend);
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS users (
                id {pk},
                username TEXT NOT NULL,
                username_norm TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL DEFAULT '',
                password_hash TEXT NOT NULL DEFAULT '',
                email_verified BIGINT NOT NULL DEFAULT 0,
                is_active BIGINT NOT NULL DEFAULT 1,
                private_quota_bytes BIGINT,
                private_used_bytes BIGINT NOT NULL DEFAULT 0,
                public_quota_bytes BIGINT,
                public_used_bytes BIGINT NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS organizations (
                id {pk},
                name TEXT NOT NULL,
                name_norm TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                private_quota_bytes BIGINT,
                private_used_bytes BIGINT NOT NULL DEFAULT 0,
                public_quota_bytes BIGINT,
                public_used_bytes BIGINT NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS memberships (
                id {pk},
                user_id BIGINT NOT NULL,
                org_id BIGINT NOT NULL,
                role TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                UNIQUE (user_id, org_id)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS repositories (
                id {pk},
                repo_type TEXT NOT NULL,
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                namespace_norm TEXT NOT NULL,
                name_norm TEXT NOT NULL,
                full_id TEXT NOT NULL,
                private BIGINT NOT NULL DEFAULT 0,
                gated BIGINT NOT NULL DEFAULT 0,
                deleted BIGINT NOT NULL DEFAULT 0,
                owner_user_id BIGINT,
                owner_org_id BIGINT,
                created_at BIGINT NOT NULL,
                UNIQUE (repo_type, namespace_norm, name_norm)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS files (
                id {pk},
                repo_full_id TEXT NOT NULL,
                repo_type TEXT NOT NULL,
                path_in_repo TEXT NOT NULL,
                size BIGINT NOT NULL,
                sha256 TEXT NOT NULL,
                lfs BIGINT NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                UNIQUE (repo_full_id, repo_type, path_in_repo)
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_files_sha256 ON files (sha256)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_files_repo ON files (repo_full_id, repo_type)".to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS commits (
                id {pk},
                commit_id TEXT NOT NULL,
                repo_full_id TEXT NOT NULL,
                repo_type TEXT NOT NULL,
                branch TEXT NOT NULL,
                username TEXT NOT NULL,
                message TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at BIGINT NOT NULL
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_commits_repo_branch
            ON commits (repo_full_id, repo_type, branch, created_at)"
            .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS lfs_object_history (
                id {pk},
                repo_full_id TEXT NOT NULL,
                repo_type TEXT NOT NULL,
                path_in_repo TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                size BIGINT NOT NULL,
                commit_id TEXT NOT NULL,
                created_at BIGINT NOT NULL
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_lfs_history_path
            ON lfs_object_history (repo_full_id, path_in_repo, created_at)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_lfs_history_sha ON lfs_object_history (sha256)"
            .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS staging_uploads (
                id {pk},
                repo_full_id TEXT NOT NULL,
                repo_type TEXT NOT NULL,
                revision TEXT NOT NULL,
                path_in_repo TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                size BIGINT NOT NULL,
                upload_id TEXT NOT NULL DEFAULT '',
                storage_key TEXT NOT NULL,
                lfs BIGINT NOT NULL DEFAULT 1,
                created_by BIGINT NOT NULL,
                created_at BIGINT NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS ssh_keys (
                id {pk},
                user_id BIGINT NOT NULL,
                key_type TEXT NOT NULL,
                public_key TEXT NOT NULL,
                fingerprint TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL DEFAULT '',
                last_used BIGINT,
                created_at BIGINT NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS tokens (
                id {pk},
                user_id BIGINT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                last_used BIGINT,
                created_at BIGINT NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS repo_redirects (
                id {pk},
                repo_type TEXT NOT NULL,
                from_norm TEXT NOT NULL,
                to_full_id TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                UNIQUE (repo_type, from_norm)
            )"
        ),
    ]
}
