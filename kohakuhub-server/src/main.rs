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

use anyhow::Result;
use clap::Parser;
use kohakuhub_core::HubConfig;
use kohakuhub_server::run_server;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config file)
    #[arg(long, env = "KOHAKU_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Database URL (overrides config file)
    #[arg(long, env = "KOHAKU_DB_URL")]
    db_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = HubConfig::load(args.config.as_deref())?;

    // CLI overrides
    if let Some(addr) = args.listen_addr {
        config.server.listen_addr = addr;
    }
    if let Some(url) = args.db_url {
        config.db.url = url;
    }

    run_server(config).await
}
