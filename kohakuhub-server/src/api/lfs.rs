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

//! Git-LFS Batch API and the verify callback.
//!
//! Uploads never touch the hub: the batch response hands out pre-signed
//! PUT URLs into the global content-addressed store, and a second
//! request for a SHA that already exists omits `actions` entirely — the
//! client skips the transfer. That omission IS the dedup mechanism.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Uri};
use axum::Json;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use kohakuhub_core::lfs_key;

use crate::api::rtype_from_uri;
use crate::auth::identify;
use crate::error::{ApiError, Result};
use crate::permission::{parse_repo_path, require_read, require_write, resolve_repo};
use crate::state::AppState;

const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

#[derive(Deserialize)]
pub struct BatchRequest {
    pub operation: String,
    pub objects: Vec<ObjectSpec>,
    #[serde(default)]
    pub transfers: Vec<String>,
}

#[derive(Deserialize)]
pub struct ObjectSpec {
    pub oid: String,
    pub size: i64,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub transfer: &'static str,
    pub objects: Vec<ObjectResponse>,
}

#[derive(Serialize)]
pub struct ObjectResponse {
    pub oid: String,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Actions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectError>,
}

#[derive(Serialize)]
pub struct Actions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<Action>,
}

#[derive(Serialize)]
pub struct Action {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

#[derive(Serialize)]
pub struct ObjectError {
    pub code: u16,
    pub message: String,
}

fn valid_oid(oid: &str) -> bool {
    oid.len() == 64 && oid.bytes().all(|b| b.is_ascii_hexdigit())
}

pub async fn batch(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<BatchRequest>,
) -> Result<([(&'static str, &'static str); 1], Json<BatchResponse>)> {
    let rtype = rtype_from_uri(&uri);
    let id = parse_repo_path(rtype.plural(), &namespace, &name)?;
    let identity = identify(&state, &headers).await?;
    let repo = resolve_repo(&state, &id).await?;

    if !req.transfers.is_empty() && !req.transfers.iter().any(|t| t == "basic") {
        return Err(ApiError::BadRequest(
            "only the basic transfer adapter is supported".into(),
        ));
    }

    let objects = match req.operation.as_str() {
        "upload" => {
            let access = require_write(&state, repo, &identity).await?;
            let user = identity.user().map(|u| u.id).unwrap_or(0);
            batch_upload(&state, &access.repo.full_id, access.repo.repo_type, user, req.objects)
                .await?
        }
        "download" => {
            require_read(&state, repo, &identity).await?;
            batch_download(&state, req.objects).await?
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown lfs operation: {other}"
            )))
        }
    };

    Ok((
        [("Content-Type", LFS_MEDIA_TYPE)],
        Json(BatchResponse {
            transfer: "basic",
            objects,
        }),
    ))
}

async fn batch_upload(
    state: &AppState,
    repo_full_id: &str,
    repo_type: kohakuhub_core::RepoType,
    user_id: i64,
    objects: Vec<ObjectSpec>,
) -> Result<Vec<ObjectResponse>> {
    let fanout = state.config.server.fanout.max(1);
    let expiry = state.upload_expiry();
    let verify_href = format!(
        "{}/api/{repo_full_id}.git/info/lfs/verify",
        state.config.app.base_url.trim_end_matches('/')
    );

    let results = stream::iter(objects.into_iter().map(|object| {
        let verify_href = verify_href.clone();
        async move {
            if !valid_oid(&object.oid) || object.size < 0 {
                return Ok(ObjectResponse {
                    oid: object.oid,
                    size: object.size,
                    authenticated: None,
                    actions: None,
                    error: Some(ObjectError {
                        code: 422,
                        message: "invalid oid or size".into(),
                    }),
                });
            }
            let key = lfs_key(&object.oid);

            // Content-addressed dedup: an existing blob of the right
            // size needs no transfer at all.
            match state.store.head(&key).await? {
                Some(info) if info.size == object.size => {
                    tracing::debug!(oid = %object.oid, "lfs dedup hit");
                    return Ok(ObjectResponse {
                        oid: object.oid,
                        size: object.size,
                        authenticated: Some(true),
                        actions: None,
                        error: None,
                    });
                }
                _ => {}
            }

            let href = state.store.presign_put(&key, object.size, expiry).await?;
            state
                .meta
                .create_staging_upload(
                    repo_full_id,
                    repo_type,
                    "main",
                    "",
                    &object.oid,
                    object.size,
                    &key,
                    user_id,
                )
                .await?;

            Ok::<_, ApiError>(ObjectResponse {
                oid: object.oid,
                size: object.size,
                authenticated: Some(true),
                actions: Some(Actions {
                    upload: Some(Action {
                        href,
                        expires_in: Some(expiry.as_secs()),
                    }),
                    verify: Some(Action {
                        href: verify_href,
                        expires_in: Some(expiry.as_secs()),
                    }),
                    download: None,
                }),
                error: None,
            })
        }
    }))
    .buffer_unordered(fanout)
    .collect::<Vec<_>>()
    .await;

    results.into_iter().collect()
}

async fn batch_download(
    state: &AppState,
    objects: Vec<ObjectSpec>,
) -> Result<Vec<ObjectResponse>> {
    let fanout = state.config.server.fanout.max(1);
    let expiry = state.download_expiry();

    let results = stream::iter(objects.into_iter().map(|object| async move {
        if !valid_oid(&object.oid) {
            return Ok(ObjectResponse {
                oid: object.oid,
                size: object.size,
                authenticated: None,
                actions: None,
                error: Some(ObjectError {
                    code: 422,
                    message: "invalid oid".into(),
                }),
            });
        }
        let key = lfs_key(&object.oid);
        match state.store.head(&key).await? {
            Some(_) => {
                let href = state.store.presign_get(&key, expiry).await?;
                Ok::<_, ApiError>(ObjectResponse {
                    oid: object.oid,
                    size: object.size,
                    authenticated: Some(true),
                    actions: Some(Actions {
                        upload: None,
                        verify: None,
                        download: Some(Action {
                            href,
                            expires_in: Some(expiry.as_secs()),
                        }),
                    }),
                    error: None,
                })
            }
            None => Ok(ObjectResponse {
                oid: object.oid,
                size: object.size,
                authenticated: None,
                actions: None,
                error: Some(ObjectError {
                    code: 404,
                    message: "object does not exist".into(),
                }),
            }),
        }
    }))
    .buffer_unordered(fanout)
    .collect::<Vec<_>>()
    .await;

    results.into_iter().collect()
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub oid: String,
    pub size: i64,
}

/// Post-upload verification: the blob must exist with the agreed size.
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((_namespace, _name)): Path<(String, String)>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>> {
    let identity = identify(&state, &headers).await?;
    if !valid_oid(&req.oid) {
        return Err(ApiError::BadRequest("invalid oid".into()));
    }

    let key = lfs_key(&req.oid);
    match state.store.head(&key).await? {
        Some(info) if info.size == req.size => {
            if let Some(user) = identity.user() {
                state.meta.finish_staging_upload(&req.oid, user.id).await?;
            }
            tracing::info!(oid = %req.oid, size = req.size, "lfs upload verified");
            Ok(Json(serde_json::json!({})))
        }
        Some(info) => Err(ApiError::BadRequest(format!(
            "size mismatch for {}: expected {}, stored {}",
            req.oid, req.size, info.size
        ))),
        None => Err(ApiError::BadRequest(format!(
            "object {} was not uploaded",
            req.oid
        ))),
    }
}
