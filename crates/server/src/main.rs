//! stowaway MCP server entry point.
//!
//! Loads configuration, opens the cache store, installs the first worker
//! generation and serves it over stdio. Logging goes to stderr to avoid
//! interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use stowaway_core::{AppConfig, CacheDb};
use stowaway_worker::{FetchConfig, HttpNetwork};
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod host;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(app = %config.app_name, version = %config.cache_version, db = %config.db_path.display(), "Starting stowaway on stdio transport");

    let db = CacheDb::open(&config.db_path).await?;
    let network = Arc::new(HttpNetwork::new(&FetchConfig { user_agent: config.user_agent.clone(), ..Default::default() })?);
    let host = host::WorkerHost::start(config, db, network).await?;

    let handler = handler::StowawayServer::new(Arc::new(host));
    let server = serve_server(handler, stdio()).await?;

    server.waiting().await?;

    Ok(())
}
