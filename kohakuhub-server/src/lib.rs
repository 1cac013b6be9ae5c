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

//! KohakuHub Server
//!
//! Self-hosted, HuggingFace-wire-compatible hub for versioned ML
//! artifacts. Content lives in S3, versions in a LakeFS-style store,
//! metadata in a relational database; this crate ties them together
//! behind three protocol surfaces: the HF JSON/NDJSON API, Git Smart
//! HTTP + LFS, and a thin admin API.

pub mod api;
pub mod auth;
pub mod error;
pub mod gc;
pub mod gitbridge;
pub mod lifecycle;
pub mod ndjson;
pub mod permission;
pub mod pipeline;
pub mod state;
pub mod sweeper;

use anyhow::Result;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kohakuhub_core::HubConfig;

pub use state::AppState;

pub async fn run_server(config: HubConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kohakuhub=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting KohakuHub");
    config.validate()?;

    let addr = config.socket_addr()?;
    let enable_cors = config.server.enable_cors;
    let state = AppState::from_config(config).await?;

    // Abandoned uploads are swept for as long as the process lives.
    sweeper::spawn(state.clone());

    let mut app = api::router(state).layer(TraceLayer::new_for_http());
    if enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    tracing::info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
