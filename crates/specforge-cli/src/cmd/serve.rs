use anyhow::{Context, Result};
use std::path::Path;

use specforge_core::config::ServerConfig;

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let config = ServerConfig::load(config_file).context("invalid server configuration")?;
    tracing::info!(
        database = %config.database_path.display(),
        port = config.port,
        mcp_port = config.mcp_port,
        "starting SpecForge"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(specforge_server::serve(config))
}
