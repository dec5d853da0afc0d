// Copyright 2025 AgentReplay (https://github.com/agentreplay)
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
use std::path::PathBuf;
use tracejudge_server::{
    config::{LogFormat, ServerConfig},
    run_server,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config file)
    #[arg(long, env = "TRACEJUDGE_HTTP_ADDR")]
    http_addr: Option<String>,

    /// Data directory path (overrides config file)
    #[arg(long, env = "TRACEJUDGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable authentication
    #[arg(long, env = "TRACEJUDGE_AUTH_ENABLED")]
    auth_enabled: bool,

    /// Judge calls in flight per provider
    #[arg(long, env = "TRACEJUDGE_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Judge call timeout in seconds
    #[arg(long, env = "TRACEJUDGE_CALL_TIMEOUT")]
    call_timeout: Option<u64>,

    /// Emit JSON logs
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ServerConfig::load(args.config)?;

    // Apply CLI overrides
    if let Some(addr) = args.http_addr {
        config.server.listen_addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    if args.auth_enabled {
        config.auth.enabled = true;
    }
    if let Some(n) = args.max_concurrency {
        config.evaluation.max_concurrent_per_provider = n;
    }
    if let Some(secs) = args.call_timeout {
        config.evaluation.call_timeout_secs = secs;
    }
    if args.log_json {
        config.server.log_format = LogFormat::Json;
    }

    run_server(config).await
}
