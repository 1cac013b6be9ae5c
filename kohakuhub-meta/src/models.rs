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

//! Row types.
//!
//! The `Any` driver has no derive support, so each row maps by hand.
//! Booleans are stored as BIGINT 0/1 to stay dialect-neutral.

use kohakuhub_core::{RepoId, RepoType};
use serde::Serialize;
use sqlx::any::AnyRow;
use sqlx::Row;

fn flag(row: &AnyRow, col: &str) -> sqlx::Result<bool> {
    Ok(row.try_get::<i64, _>(col)? != 0)
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub email_verified: bool,
    pub is_active: bool,
    pub private_quota_bytes: Option<i64>,
    pub private_used_bytes: i64,
    pub public_quota_bytes: Option<i64>,
    pub public_used_bytes: i64,
    pub created_at: i64,
}

impl User {
    pub fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            email_verified: flag(row, "email_verified")?,
            is_active: flag(row, "is_active")?,
            private_quota_bytes: row.try_get("private_quota_bytes")?,
            private_used_bytes: row.try_get("private_used_bytes")?,
            public_quota_bytes: row.try_get("public_quota_bytes")?,
            public_used_bytes: row.try_get("public_used_bytes")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub private_quota_bytes: Option<i64>,
    pub private_used_bytes: i64,
    pub public_quota_bytes: Option<i64>,
    pub public_used_bytes: i64,
    pub created_at: i64,
}

impl Organization {
    pub fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            private_quota_bytes: row.try_get("private_quota_bytes")?,
            private_used_bytes: row.try_get("private_used_bytes")?,
            public_quota_bytes: row.try_get("public_quota_bytes")?,
            public_used_bytes: row.try_get("public_used_bytes")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Role of a user inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrgRole {
    SuperAdmin,
    Admin,
    Member,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::SuperAdmin => "super-admin",
            OrgRole::Admin => "admin",
            OrgRole::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "super-admin" => Some(OrgRole::SuperAdmin),
            "admin" => Some(OrgRole::Admin),
            "member" => Some(OrgRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Membership {
    pub id: i64,
    pub user_id: i64,
    pub org_id: i64,
    pub role: OrgRole,
    pub created_at: i64,
}

impl Membership {
    pub fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            org_id: row.try_get("org_id")?,
            role: OrgRole::parse(&role).ok_or_else(|| sqlx::Error::Decode(
                format!("unknown org role: {role}").into(),
            ))?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub id: i64,
    pub repo_type: RepoType,
    pub namespace: String,
    pub name: String,
    pub full_id: String,
    pub private: bool,
    pub gated: bool,
    pub deleted: bool,
    pub owner_user_id: Option<i64>,
    pub owner_org_id: Option<i64>,
    pub created_at: i64,
}

impl Repository {
    pub fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        let repo_type: String = row.try_get("repo_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            repo_type: RepoType::parse(&repo_type).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown repo type: {repo_type}").into())
            })?,
            namespace: row.try_get("namespace")?,
            name: row.try_get("name")?,
            full_id: row.try_get("full_id")?,
            private: flag(row, "private")?,
            gated: flag(row, "gated")?,
            deleted: flag(row, "deleted")?,
            owner_user_id: row.try_get("owner_user_id")?,
            owner_org_id: row.try_get("owner_org_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub fn repo_id(&self) -> RepoId {
        RepoId::new(self.repo_type, self.namespace.clone(), self.name.clone())
    }

    /// True when the namespace is an organization rather than a user.
    pub fn org_owned(&self) -> bool {
        self.owner_org_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub id: i64,
    pub repo_full_id: String,
    pub repo_type: RepoType,
    pub path_in_repo: String,
    pub size: i64,
    pub sha256: String,
    pub lfs: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FileEntry {
    pub fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        let repo_type: String = row.try_get("repo_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            repo_full_id: row.try_get("repo_full_id")?,
            repo_type: RepoType::parse(&repo_type).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown repo type: {repo_type}").into())
            })?,
            path_in_repo: row.try_get("path_in_repo")?,
            size: row.try_get("size")?,
            sha256: row.try_get("sha256")?,
            lfs: flag(row, "lfs")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitRecord {
    pub id: i64,
    pub commit_id: String,
    pub repo_full_id: String,
    pub repo_type: RepoType,
    pub branch: String,
    pub username: String,
    pub message: String,
    pub description: String,
    pub created_at: i64,
}

impl CommitRecord {
    pub fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        let repo_type: String = row.try_get("repo_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            commit_id: row.try_get("commit_id")?,
            repo_full_id: row.try_get("repo_full_id")?,
            repo_type: RepoType::parse(&repo_type).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown repo type: {repo_type}").into())
            })?,
            branch: row.try_get("branch")?,
            username: row.try_get("username")?,
            message: row.try_get("message")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LfsHistoryRow {
    pub id: i64,
    pub repo_full_id: String,
    pub path_in_repo: String,
    pub sha256: String,
    pub size: i64,
    pub commit_id: String,
    pub created_at: i64,
}

impl LfsHistoryRow {
    pub fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            repo_full_id: row.try_get("repo_full_id")?,
            path_in_repo: row.try_get("path_in_repo")?,
            sha256: row.try_get("sha256")?,
            size: row.try_get("size")?,
            commit_id: row.try_get("commit_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StagingUpload {
    pub id: i64,
    pub repo_full_id: String,
    pub repo_type: RepoType,
    pub revision: String,
    pub path_in_repo: String,
    pub sha256: String,
    pub size: i64,
    pub upload_id: String,
    pub storage_key: String,
    pub lfs: bool,
    pub created_by: i64,
    pub created_at: i64,
}

impl StagingUpload {
    pub fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        let repo_type: String = row.try_get("repo_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            repo_full_id: row.try_get("repo_full_id")?,
            repo_type: RepoType::parse(&repo_type).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown repo type: {repo_type}").into())
            })?,
            revision: row.try_get("revision")?,
            path_in_repo: row.try_get("path_in_repo")?,
            sha256: row.try_get("sha256")?,
            size: row.try_get("size")?,
            upload_id: row.try_get("upload_id")?,
            storage_key: row.try_get("storage_key")?,
            lfs: flag(row, "lfs")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SshKey {
    pub id: i64,
    pub user_id: i64,
    pub key_type: String,
    pub public_key: String,
    pub fingerprint: String,
    pub title: String,
    pub last_used: Option<i64>,
    pub created_at: i64,
}

impl SshKey {
    pub fn from_row(row: &AnyRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            key_type: row.try_get("key_type")?,
            public_key: row.try_get("public_key")?,
            fingerprint: row.try_get("fingerprint")?,
            title: row.try_get("title")?,
            last_used: row.try_get("last_used")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
