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

use std::sync::Arc;
use std::time::Duration;

use kohakuhub_core::HubConfig;
use kohakuhub_lakefs::LakeFsClient;
use kohakuhub_meta::MetaStore;
use kohakuhub_storage::ObjectStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    pub meta: MetaStore,
    pub store: ObjectStore,
    pub lakefs: LakeFsClient,
}

impl AppState {
    pub async fn from_config(config: HubConfig) -> anyhow::Result<Self> {
        let meta = MetaStore::connect(&config.db.url).await?;
        let store = ObjectStore::new(&config.s3);
        let lakefs = LakeFsClient::new(
            &config.lakefs,
            Duration::from_secs(config.server.outbound_timeout_secs),
        )?;
        Ok(Self {
            config: Arc::new(config),
            meta,
            store,
            lakefs,
        })
    }

    pub fn upload_expiry(&self) -> Duration {
        Duration::from_secs(self.config.app.presign_upload_expiry_seconds)
    }

    pub fn download_expiry(&self) -> Duration {
        Duration::from_secs(self.config.app.presign_download_expiry_seconds)
    }
}
