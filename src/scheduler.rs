//! Cycle scheduler
//!
//! Fixed-interval loop around the orchestrator. Each tick reloads the
//! registry and runs one full cycle; a failing tick logs and waits for
//! the next one. Cancellation is observed between cycles, never inside
//! one, so a shut-down cycle always leaves the store consistent.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::period::today_reference;
use crate::registry::CompanyRegistry;

/// Runs acquisition cycles until cancelled
pub struct CycleScheduler {
    registry: CompanyRegistry,
    orchestrator: Orchestrator,
    interval: Duration,
    shutdown: CancellationToken,
}

impl CycleScheduler {
    /// Build a scheduler over an already-configured registry and
    /// orchestrator.
    pub fn new(
        registry: CompanyRegistry,
        orchestrator: Orchestrator,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            interval,
            shutdown,
        }
    }

    /// Run one cycle: reload the registry, process every company.
    pub async fn run_once(&self) -> Result<()> {
        let companies = self.registry.load_companies().await?;
        self.orchestrator
            .run_cycle(&companies, today_reference())
            .await;
        Ok(())
    }

    /// Loop until the cancellation token fires.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "cycle failed");
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::{Config, RegistryConfig};
    use crate::store::memory::MemoryStore;

    fn scheduler_for(server: &MockServer, interval: Duration) -> CycleScheduler {
        let registry_config = RegistryConfig {
            base_url: server.uri(),
            api_key: "k".to_string(),
            table: "certifica_dfe".to_string(),
        };
        let registry = CompanyRegistry::new(&registry_config, reqwest::Client::new());

        let mut config = Config::default();
        config.requests.enabled = false;
        config.feed.enabled = false;
        let orchestrator = Orchestrator::new(config, Arc::new(MemoryStore::default())).unwrap();

        CycleScheduler::new(registry, orchestrator, interval, CancellationToken::new())
    }

    #[tokio::test]
    async fn a_single_cycle_loads_the_registry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/certifica_dfe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        scheduler_for(&server, Duration::from_secs(900))
            .run_once()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_between_cycles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/certifica_dfe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let scheduler = scheduler_for(&server, Duration::from_secs(3600));
        scheduler.shutdown.cancel();

        // a pre-cancelled token lets exactly one cycle run
        tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn a_failing_cycle_does_not_end_the_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/certifica_dfe"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let scheduler = scheduler_for(&server, Duration::from_millis(10));
        let shutdown = scheduler.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .unwrap();
    }
}
