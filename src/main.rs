//! fiscal-dl binary entry point

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fiscal_dl::config::Config;
use fiscal_dl::error::Result;

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Check the endpoints the enabled flows will talk to, first by DNS and
/// then with a plain GET. Failures are logged, never fatal, so a network
/// hiccup does not stop the loop from starting.
async fn check_endpoints(config: &Config) {
    let mut targets = Vec::new();
    if config.requests.enabled {
        targets.push(config.requests.base_url.clone());
        targets.push(config.solver.api_url.clone());
    }
    if config.feed.enabled {
        targets.push(config.feed.base_url.clone());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .ok();

    for target in targets {
        let Some(host) = host_of(&target) else {
            warn!(%target, "endpoint URL has no host");
            continue;
        };
        match tokio::net::lookup_host((host.as_str(), 443)).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => info!(%host, address = %addr.ip(), "host resolves"),
                None => warn!(%host, "host resolved to no addresses"),
            },
            Err(e) => warn!(%host, error = %e, "host does not resolve"),
        }
        if let Some(client) = &client {
            match client.get(&target).send().await {
                Ok(response) => {
                    info!(%host, status = response.status().as_u16(), "endpoint answers")
                }
                Err(e) => warn!(%host, error = %e, "endpoint does not answer"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real deployments use environment variables
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fiscal_dl=debug")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "fiscal-dl starting"
    );

    let config = Config::from_env()?;
    info!(
        cycle_secs = config.cycle_interval.as_secs(),
        requests = config.requests.enabled,
        feed = config.feed.enabled,
        "configuration loaded"
    );
    check_endpoints(&config).await;

    fiscal_dl::run(config).await
}
