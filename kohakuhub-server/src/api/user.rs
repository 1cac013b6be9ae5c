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

//! Identity (`whoami-v2`) and the SSH key registry.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::{identify, require_user, Identity};
use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Serialize)]
pub struct WhoamiResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub email: Option<String>,
    pub orgs: Vec<WhoamiOrg>,
    pub auth: WhoamiAuth,
}

#[derive(Serialize)]
pub struct WhoamiOrg {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Serialize)]
pub struct WhoamiAuth {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

pub async fn whoami(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WhoamiResponse>> {
    match identify(&state, &headers).await? {
        Identity::User(user) => {
            let orgs = state
                .meta
                .list_user_orgs(user.id)
                .await?
                .into_iter()
                .map(|o| WhoamiOrg {
                    name: o.name,
                    kind: "org",
                })
                .collect();
            Ok(Json(WhoamiResponse {
                kind: "user",
                name: user.username,
                email: Some(user.email),
                orgs,
                auth: WhoamiAuth { kind: "access_token" },
            }))
        }
        Identity::Admin => Ok(Json(WhoamiResponse {
            kind: "user",
            name: "admin".into(),
            email: None,
            orgs: vec![],
            auth: WhoamiAuth { kind: "access_token" },
        })),
        Identity::Anonymous => Err(ApiError::Forbidden("authentication required".into())),
    }
}

#[derive(Serialize)]
pub struct SshKeyOut {
    pub id: i64,
    #[serde(rename = "type")]
    pub key_type: String,
    pub title: String,
    pub fingerprint: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "lastUsed")]
    pub last_used: Option<i64>,
}

pub async fn list_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SshKeyOut>>> {
    let user = require_user(&state, &headers).await?;
    let keys = state
        .meta
        .list_ssh_keys(user.id)
        .await?
        .into_iter()
        .map(|k| SshKeyOut {
            id: k.id,
            key_type: k.key_type,
            title: k.title,
            fingerprint: k.fingerprint,
            created_at: k.created_at,
            last_used: k.last_used,
        })
        .collect();
    Ok(Json(keys))
}

#[derive(Deserialize)]
pub struct AddKeyRequest {
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Fingerprint computed by the validating front-end; the core only
    /// consumes it.
    pub fingerprint: String,
    #[serde(default)]
    pub title: String,
}

pub async fn add_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddKeyRequest>,
) -> Result<Json<SshKeyOut>> {
    let user = require_user(&state, &headers).await?;
    if req.fingerprint.is_empty() || req.public_key.is_empty() {
        return Err(ApiError::BadRequest("missing key material".into()));
    }

    let key = state
        .meta
        .add_ssh_key(
            user.id,
            &req.key_type,
            &req.public_key,
            &req.fingerprint,
            &req.title,
        )
        .await?;

    Ok(Json(SshKeyOut {
        id: key.id,
        key_type: key.key_type,
        title: key.title,
        fingerprint: key.fingerprint,
        created_at: key.created_at,
        last_used: key.last_used,
    }))
}

pub async fn delete_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key_id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let user = require_user(&state, &headers).await?;
    state.meta.delete_ssh_key(user.id, key_id).await?;
    Ok(Json(serde_json::json!({})))
}
