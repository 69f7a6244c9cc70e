//! # codeblock-catalog — Exercise catalog and ratings
//!
//! The catalog of code blocks (name, starter code, model solution) and their
//! rating aggregate, stored in RocksDB and served as JSON over HTTP. The
//! session core never reads from it: a session id is only conventionally the
//! string form of a [`CodeBlock`] id.
//!
//! ## Modules
//!
//! - [`model`] — `CodeBlock`, rating aggregate, starter exercises
//! - [`store`] — RocksDB persistence
//! - [`api`] — axum REST routes

pub mod api;
pub mod error;
pub mod model;
pub mod store;

use std::sync::Arc;

use tokio::net::TcpListener;

pub use api::{create_router, RatingRequest};
pub use error::CatalogError;
pub use model::{default_code_blocks, CodeBlock, NewCodeBlock, RatingSummary};
pub use store::{CatalogStore, StoreConfig};

/// Catalog HTTP configuration.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Address to bind the REST API to
    pub bind_addr: String,
    pub store: StoreConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".to_string(),
            store: StoreConfig::default(),
        }
    }
}

/// Serve the REST API on `bind_addr` until the listener fails.
pub async fn serve(bind_addr: &str, store: Arc<CatalogStore>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    log::info!("Catalog API listening on {bind_addr}");
    axum::serve(listener, create_router(store)).await
}
