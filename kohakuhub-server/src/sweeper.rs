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

//! Background sweeper for expired staging uploads.
//!
//! A client that obtained a pre-signed PUT URL and never called verify
//! leaves a StagingUpload row (and possibly a blob nothing references).
//! The sweeper deletes rows past the TTL and reclaims blobs no File row
//! or ledger row mentions.

use std::time::Duration;

use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep_once(&state).await {
                tracing::warn!(error = %err, "staging sweep failed");
            }
        }
    });
}

pub async fn sweep_once(state: &AppState) -> crate::error::Result<usize> {
    let ttl = state.config.app.staging_upload_ttl_seconds as i64;
    let expired = state.meta.expired_staging_uploads(ttl).await?;
    let count = expired.len();

    for upload in expired {
        // The blob may have landed without a verify call; reclaim it
        // only when nothing references the content.
        let file_refs = state.meta.count_file_refs(&upload.sha256).await?;
        let ledger_refs = state.meta.count_history_refs(&upload.sha256).await?;
        if file_refs == 0 && ledger_refs == 0 {
            if let Err(err) = state.store.delete_object(&upload.storage_key).await {
                tracing::warn!(
                    key = %upload.storage_key,
                    error = %err,
                    "orphan staging blob delete failed"
                );
            }
        }
        state.meta.delete_staging_upload(upload.id).await?;
    }

    if count > 0 {
        tracing::info!(swept = count, "expired staging uploads removed");
    }
    Ok(count)
}
