//! Medical document ingestion and question routing.
//!
//! Two workflows share one set of capabilities and domain handlers:
//! document processing (extract, classify, structure, store or analyze)
//! and the customer-request coordinator (intent analysis, single- or
//! multi-domain retrieval, consultation answers). [`AgentSystem`] is the
//! entry point.

pub mod capabilities;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod system;

pub use system::{AgentSystem, SystemError};

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. The filter comes from
/// `RUST_LOG`, falling back to [`config::default_log_filter`]. Calling it
/// twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok() {
        tracing::info!("{} v{} logging initialized", config::APP_NAME, config::APP_VERSION);
    }
}
