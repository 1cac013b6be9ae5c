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

//! Admin quota surface, guarded by the static admin token.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use kohakuhub_core::normalize_name;

use crate::auth::require_admin;
use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Serialize)]
pub struct QuotaReport {
    pub namespace: String,
    #[serde(rename = "privateUsedBytes")]
    pub private_used: i64,
    #[serde(rename = "publicUsedBytes")]
    pub public_used: i64,
}

/// Authoritative recount for one namespace.
pub async fn recompute_quota(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(namespace): Path<String>,
) -> Result<Json<QuotaReport>> {
    require_admin(&state, &headers).await?;

    let ns = state
        .meta
        .find_namespace(&normalize_name(&namespace))
        .await?
        .ok_or_else(|| ApiError::EntryNotFound(format!("namespace not found: {namespace}")))?;

    let (private_used, public_used) = state
        .meta
        .quota_recompute(&ns, state.config.app.lfs_history_keep)
        .await?;

    Ok(Json(QuotaReport {
        namespace: ns.name().to_string(),
        private_used,
        public_used,
    }))
}

#[derive(Deserialize)]
pub struct SetQuotaRequest {
    /// NULL clears to unlimited.
    #[serde(rename = "privateQuotaBytes")]
    pub private_quota_bytes: Option<i64>,
    #[serde(rename = "publicQuotaBytes")]
    pub public_quota_bytes: Option<i64>,
}

pub async fn set_quota(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(namespace): Path<String>,
    Json(req): Json<SetQuotaRequest>,
) -> Result<Json<serde_json::Value>> {
    require_admin(&state, &headers).await?;

    let ns = state
        .meta
        .find_namespace(&normalize_name(&namespace))
        .await?
        .ok_or_else(|| ApiError::EntryNotFound(format!("namespace not found: {namespace}")))?;

    state
        .meta
        .set_namespace_quota(&ns, req.private_quota_bytes, req.public_quota_bytes)
        .await?;

    tracing::info!(
        namespace = ns.name(),
        private_quota = ?req.private_quota_bytes,
        public_quota = ?req.public_quota_bytes,
        "quota updated by admin"
    );
    Ok(Json(serde_json::json!({})))
}
