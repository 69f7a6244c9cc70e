//! Code block server: the live session WebSocket server and the catalog
//! REST API in one process.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use codeblock_catalog::{CatalogConfig, CatalogStore, StoreConfig};
use codeblock_collab::{CollabServer, ServerConfig, SessionRegistry};

#[derive(Parser, Debug)]
#[command(name = "codeblock-server", about = "Mentor/student live code sessions")]
#[command(version)]
struct Args {
    /// Address for the session WebSocket server
    #[arg(long, env = "CODEBLOCK_BIND", default_value = "127.0.0.1:4001")]
    bind: String,

    /// Address for the catalog REST API
    #[arg(long, env = "CODEBLOCK_CATALOG_BIND", default_value = "127.0.0.1:4000")]
    catalog_bind: String,

    /// RocksDB directory for the catalog
    #[arg(long, env = "CODEBLOCK_DATA_DIR", default_value = "codeblock_data")]
    data_dir: PathBuf,

    /// Skip seeding the starter exercises into an empty catalog
    #[arg(long, env = "CODEBLOCK_NO_SEED")]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("Starting code block server...");

    let catalog_config = CatalogConfig {
        bind_addr: args.catalog_bind,
        store: StoreConfig {
            path: args.data_dir,
            ..StoreConfig::default()
        },
    };
    let store = Arc::new(CatalogStore::open(catalog_config.store.clone())?);
    if !args.no_seed {
        let seeded = store.seed_defaults()?;
        if seeded > 0 {
            info!("Seeded {seeded} starter code blocks");
        }
    }

    let catalog = tokio::spawn(async move {
        if let Err(e) = codeblock_catalog::serve(&catalog_config.bind_addr, store).await {
            error!("Catalog API stopped: {e}");
        }
    });

    let registry = Arc::new(SessionRegistry::new());
    let server = CollabServer::new(ServerConfig { bind_addr: args.bind }, registry.clone());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Session server stopped: {e}");
            }
            catalog.abort();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = registry.stats().await;
            info!(
                "Shutting down with {} active sessions and {} joined connections",
                stats.active_sessions, stats.joined_connections
            );
            catalog.abort();
        }
    }

    Ok(())
}
