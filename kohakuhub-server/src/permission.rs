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

//! Permission & namespace service.
//!
//! Resolution follows rename redirects transparently. Permission checks
//! return `AccessGranted` or an `ApiError` that already hides the
//! existence of private repositories from callers without read access —
//! the collapse to `RepoNotFound` happens here, once, not in every
//! handler.

use kohakuhub_core::{normalize_name, RepoId, RepoType};
use kohakuhub_meta::{Namespace, OrgRole, Repository};

use crate::auth::Identity;
use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Effective rights of one identity on one repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rights {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub admin: bool,
}

/// Proof that a permission check passed, carrying what every caller
/// needs next.
#[derive(Debug, Clone)]
pub struct AccessGranted {
    pub repo: Repository,
    pub rights: Rights,
}

/// Resolve a repo id to its row, following one redirect hop.
pub async fn resolve_repo(state: &AppState, id: &RepoId) -> Result<Repository> {
    if let Some(repo) = state.meta.get_repo(id).await? {
        return Ok(repo);
    }
    if let Some(target) = state.meta.get_redirect(id).await? {
        if let Some(target_id) = RepoId::from_full_id(id.repo_type, &target) {
            if let Some(repo) = state.meta.get_repo(&target_id).await? {
                return Ok(repo);
            }
        }
    }
    Err(ApiError::RepoNotFound(format!(
        "Repository not found: {}/{}",
        id.namespace, id.name
    )))
}

/// Compute the rights matrix. Org roles: every member may write;
/// admin and super-admin may also delete and administer.
pub async fn effective_rights(
    state: &AppState,
    repo: &Repository,
    identity: &Identity,
) -> Result<Rights> {
    if matches!(identity, Identity::Admin) {
        return Ok(Rights { read: true, write: true, delete: true, admin: true });
    }

    let mut rights = Rights {
        read: !repo.private,
        ..Rights::default()
    };

    let Some(user) = identity.user() else {
        if repo.gated {
            rights.read = false;
        }
        return Ok(rights);
    };

    if let Some(owner_user_id) = repo.owner_user_id {
        if owner_user_id == user.id {
            return Ok(Rights { read: true, write: true, delete: true, admin: true });
        }
    }

    if let Some(org_id) = repo.owner_org_id {
        if let Some(membership) = state.meta.get_membership(org_id, user.id).await? {
            rights.read = true;
            rights.write = true;
            if matches!(membership.role, OrgRole::Admin | OrgRole::SuperAdmin) {
                rights.delete = true;
                rights.admin = true;
            }
            return Ok(rights);
        }
    }

    // Gated repos require an explicit affiliation for reads; the grant
    // machinery lives outside the core, so non-members are refused.
    if repo.gated {
        rights.read = false;
    }
    Ok(rights)
}

fn denied(repo: &Repository, identity: &Identity, action: &str) -> ApiError {
    if repo.private {
        // Never confirm a private repo exists to someone who cannot read it.
        ApiError::RepoNotFound(format!("Repository not found: {}", repo.full_id))
    } else if repo.gated && action == "read" {
        ApiError::GatedRepo(format!("Access to {} is restricted", repo.full_id))
    } else if identity.is_anonymous() {
        ApiError::Forbidden(format!("authentication required to {action} {}", repo.full_id))
    } else {
        ApiError::Forbidden(format!("not allowed to {action} {}", repo.full_id))
    }
}

pub async fn require_read(
    state: &AppState,
    repo: Repository,
    identity: &Identity,
) -> Result<AccessGranted> {
    let rights = effective_rights(state, &repo, identity).await?;
    if !rights.read {
        return Err(denied(&repo, identity, "read"));
    }
    Ok(AccessGranted { repo, rights })
}

pub async fn require_write(
    state: &AppState,
    repo: Repository,
    identity: &Identity,
) -> Result<AccessGranted> {
    let rights = effective_rights(state, &repo, identity).await?;
    if !rights.write {
        return Err(if rights.read {
            denied(&repo, identity, "write")
        } else {
            denied(&repo, identity, "read")
        });
    }
    Ok(AccessGranted { repo, rights })
}

pub async fn require_delete(
    state: &AppState,
    repo: Repository,
    identity: &Identity,
) -> Result<AccessGranted> {
    let rights = effective_rights(state, &repo, identity).await?;
    if !rights.delete {
        return Err(if rights.read {
            denied(&repo, identity, "delete")
        } else {
            denied(&repo, identity, "read")
        });
    }
    Ok(AccessGranted { repo, rights })
}

/// May `identity` create repositories under `namespace`?
pub async fn namespace_write_access(
    state: &AppState,
    namespace: &str,
    identity: &Identity,
) -> Result<Namespace> {
    let ns = state
        .meta
        .find_namespace(&normalize_name(namespace))
        .await?
        .ok_or_else(|| ApiError::RepoNotFound(format!("Namespace not found: {namespace}")))?;

    if matches!(identity, Identity::Admin) {
        return Ok(ns);
    }
    let user = identity
        .user()
        .ok_or_else(|| ApiError::Forbidden("authentication required".into()))?;

    match &ns {
        Namespace::User(owner) if owner.id == user.id => Ok(ns),
        Namespace::User(_) => Err(ApiError::Forbidden(format!(
            "cannot write to namespace {namespace}"
        ))),
        Namespace::Org(org) => {
            let membership = state.meta.get_membership(org.id, user.id).await?;
            if membership.is_some() {
                Ok(ns)
            } else {
                Err(ApiError::Forbidden(format!(
                    "not a member of organization {namespace}"
                )))
            }
        }
    }
}

/// Owning namespace of a repository row.
pub async fn repo_namespace(state: &AppState, repo: &Repository) -> Result<Namespace> {
    state
        .meta
        .find_namespace(&normalize_name(&repo.namespace))
        .await?
        .ok_or_else(|| ApiError::Internal(format!("orphan namespace: {}", repo.namespace)))
}

/// Parse and validate route params into a `RepoId`.
pub fn parse_repo_path(rtype: &str, namespace: &str, name: &str) -> Result<RepoId> {
    let repo_type = RepoType::parse(rtype)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown repo type: {rtype}")))?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    Ok(RepoId::new(repo_type, namespace, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_repo_path_strips_git_suffix() {
        let id = parse_repo_path("models", "alice", "m1.git").unwrap();
        assert_eq!(id.name, "m1");
        assert_eq!(id.repo_type, RepoType::Model);
        assert!(parse_repo_path("weights", "a", "b").is_err());
    }
}
