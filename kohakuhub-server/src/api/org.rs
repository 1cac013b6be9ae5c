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

//! Organization management: creation, membership, the super-admin rule.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use kohakuhub_core::valid_name;
use kohakuhub_meta::OrgRole;

use crate::auth::require_user;
use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateOrgRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize)]
pub struct OrgResponse {
    pub name: String,
    pub description: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrgRequest>,
) -> Result<Json<OrgResponse>> {
    let user = require_user(&state, &headers).await?;
    if !valid_name(&req.name) {
        return Err(ApiError::BadRequest(format!(
            "invalid organization name: {}",
            req.name
        )));
    }

    let quota = &state.config.quota;
    let org = state
        .meta
        .create_org(
            &req.name,
            &req.description,
            &user,
            quota.default_org_private_quota_bytes,
            quota.default_org_public_quota_bytes,
        )
        .await?;

    Ok(Json(OrgResponse {
        name: org.name,
        description: org.description,
        created_at: org.created_at,
    }))
}

#[derive(Serialize)]
pub struct MemberOut {
    pub user_id: i64,
    pub role: &'static str,
}

#[derive(Serialize)]
pub struct OrgInfoResponse {
    pub name: String,
    pub description: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    pub members: Vec<MemberOut>,
}

pub async fn info(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<OrgInfoResponse>> {
    let org = state
        .meta
        .get_org_by_name(&name)
        .await?
        .ok_or_else(|| ApiError::EntryNotFound(format!("organization not found: {name}")))?;

    let members = state
        .meta
        .list_members(org.id)
        .await?
        .into_iter()
        .map(|m| MemberOut {
            user_id: m.user_id,
            role: m.role.as_str(),
        })
        .collect();

    Ok(Json(OrgInfoResponse {
        name: org.name,
        description: org.description,
        created_at: org.created_at,
        members,
    }))
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub username: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "member".to_string()
}

/// Only org admins may manage membership.
async fn require_org_admin(
    state: &AppState,
    headers: &HeaderMap,
    org_name: &str,
) -> Result<kohakuhub_meta::Organization> {
    let user = require_user(state, headers).await?;
    let org = state
        .meta
        .get_org_by_name(org_name)
        .await?
        .ok_or_else(|| ApiError::EntryNotFound(format!("organization not found: {org_name}")))?;
    let membership = state.meta.get_membership(org.id, user.id).await?;
    match membership.map(|m| m.role) {
        Some(OrgRole::Admin) | Some(OrgRole::SuperAdmin) => Ok(org),
        _ => Err(ApiError::Forbidden(format!(
            "not an admin of organization {org_name}"
        ))),
    }
}

pub async fn add_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<serde_json::Value>> {
    let org = require_org_admin(&state, &headers, &name).await?;

    let role = OrgRole::parse(&req.role)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown role: {}", req.role)))?;
    let member = state
        .meta
        .get_user_by_name(&req.username)
        .await?
        .ok_or_else(|| ApiError::EntryNotFound(format!("user not found: {}", req.username)))?;

    state.meta.add_member(org.id, member.id, role).await?;
    Ok(Json(serde_json::json!({})))
}

pub async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((name, username)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    let org = require_org_admin(&state, &headers, &name).await?;

    let member = state
        .meta
        .get_user_by_name(&username)
        .await?
        .ok_or_else(|| ApiError::EntryNotFound(format!("user not found: {username}")))?;

    // The store refuses to drop the last super-admin.
    state.meta.remove_member(org.id, member.id).await?;
    Ok(Json(serde_json::json!({})))
}
