//! # fiscal-dl
//!
//! Unattended acquisition of Brazilian fiscal document bundles.
//!
//! Every cycle, for each company enrolled in the registry, fiscal-dl:
//!
//! - reconciles the download portal's request catalog against the
//!   previous reporting month, downloads the bundles that are ready
//!   (solving the captcha gate through an external service), and files
//!   creation requests for the document kinds that have none
//! - walks the national service-invoice distribution feed, decodes the
//!   embedded XML documents, and packages the ones issued inside the
//!   period into a single archive
//!
//! Finished artifacts land in a remote object store under deterministic
//! names, which makes every cycle idempotent: work already stored is
//! skipped, so the loop can crash and restart at any point.
//!
//! ## Example
//!
//! ```no_run
//! use fiscal_dl::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> fiscal_dl::error::Result<()> {
//!     let config = Config::from_env()?;
//!     fiscal_dl::run(config).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod archive;
pub mod captcha;
pub mod config;
pub mod creation;
pub mod error;
pub mod feed;
pub mod orchestrator;
pub mod page;
pub mod period;
pub mod portal;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod types;
pub mod utils;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::orchestrator::Orchestrator;
pub use crate::scheduler::CycleScheduler;

/// Run the acquisition loop until the process receives a shutdown
/// signal.
pub async fn run(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });
    run_with_shutdown(config, shutdown).await
}

/// Run the acquisition loop until `shutdown` is cancelled.
pub async fn run_with_shutdown(config: Config, shutdown: CancellationToken) -> Result<()> {
    let service = session::service_client(config.request_timeout)?;
    let registry = registry::CompanyRegistry::new(&config.registry, service.clone());
    let store = Arc::new(store::HttpArtifactStore::new(&config.store, service));

    let interval = config.cycle_interval;
    let orchestrator = Orchestrator::new(config, store)?;
    let scheduler = CycleScheduler::new(registry, orchestrator, interval, shutdown);
    scheduler.run().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
