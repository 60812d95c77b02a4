//! Per-company acquisition orchestration
//!
//! One orchestrator drives both flows for every enrolled company: the
//! portal request flow (reconcile the catalog, download ready bundles,
//! create missing requests) and the service-invoice feed flow. Failures
//! never cross a company boundary; a broken certificate in one profile
//! cannot stall the rest of the cycle.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::captcha::CaptchaSolver;
use crate::config::Config;
use crate::error::Result;
use crate::feed::FeedScanner;
use crate::period::ReportingPeriod;
use crate::portal::BundlePortal;
use crate::reconcile::{Reconciliation, reconcile};
use crate::retry::{FixedRetry, with_fixed_retry};
use crate::session;
use crate::store::{ArtifactStore, artifact_name, deliver};
use crate::types::{CompanyProfile, DocumentRequest, RequestDetail};

/// Minimum length of a usable company tax document, in digits
const MIN_TAX_DIGITS: usize = 11;

/// Why a company was left out of a cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The certificate expiry date is in the past
    Expired,
    /// The profile carries the opt-out marker
    OptedOut,
}

/// Decide whether a profile sits this cycle out.
pub fn skip_reason(profile: &CompanyProfile, today: NaiveDate) -> Option<SkipReason> {
    if profile.is_opted_out() {
        return Some(SkipReason::OptedOut);
    }
    if profile.is_expired(today) {
        return Some(SkipReason::Expired);
    }
    None
}

/// Drives both acquisition flows across all companies
pub struct Orchestrator {
    config: Config,
    solver: CaptchaSolver,
    store: Arc<dyn ArtifactStore>,
}

impl Orchestrator {
    /// Build an orchestrator writing to the given store.
    pub fn new(config: Config, store: Arc<dyn ArtifactStore>) -> Result<Self> {
        let solver = CaptchaSolver::new(&config.solver)?;
        Ok(Self {
            config,
            solver,
            store,
        })
    }

    /// Run one full cycle over the given companies.
    ///
    /// Per-company failures are logged and contained; the cycle always
    /// visits every non-skipped company.
    pub async fn run_cycle(&self, companies: &[CompanyProfile], today: NaiveDate) {
        let period = ReportingPeriod::previous_month(today);
        info!(
            period = %period.label(),
            companies = companies.len(),
            "cycle started"
        );

        for profile in companies {
            if let Some(reason) = skip_reason(profile, today) {
                info!(company = %profile.name, ?reason, "company skipped");
                continue;
            }
            if let Err(e) = self.process_company(profile, &period).await {
                warn!(company = %profile.name, error = %e, "company failed");
            }
        }
        info!(period = %period.label(), "cycle finished");
    }

    /// Run both flows for one company.
    ///
    /// The portal flow and the feed flow fail independently; an error in
    /// one is logged and the other still runs. Only setup failures that
    /// make both flows impossible propagate.
    pub async fn process_company(
        &self,
        profile: &CompanyProfile,
        period: &ReportingPeriod,
    ) -> Result<()> {
        let tax_digits = profile.tax_digits();
        info!(company = %profile.name, document = %tax_digits, "processing company");

        if self.config.requests.enabled {
            if let Err(e) = self.run_request_flow(profile, period, &tax_digits).await {
                warn!(company = %profile.name, error = %e, "request flow failed");
            }
        }
        if self.config.feed.enabled {
            if let Err(e) = self.run_feed_flow(profile, period, &tax_digits).await {
                warn!(company = %profile.name, error = %e, "feed flow failed");
            }
        }
        Ok(())
    }

    async fn run_request_flow(
        &self,
        profile: &CompanyProfile,
        period: &ReportingPeriod,
        tax_digits: &str,
    ) -> Result<()> {
        let identity = session::identity_from_profile(profile)?;
        let portal = BundlePortal::new(
            &self.config.requests,
            identity,
            &self.config.user_agent,
            self.config.request_timeout,
            self.solver.clone(),
        )?;

        let requests = portal.list_requests().await?;
        let mut detailed: Vec<(DocumentRequest, RequestDetail)> =
            Vec::with_capacity(requests.len());
        for request in requests {
            match portal.request_detail(request.id).await {
                Ok(detail) => detailed.push((request, detail)),
                Err(e) => {
                    warn!(request = request.id, error = %e, "detail unavailable, skipping");
                }
            }
        }

        let reconciliation = reconcile(&detailed, period, tax_digits);
        self.download_ready(profile, period, tax_digits, &portal, &reconciliation)
            .await;
        if !reconciliation.missing.is_empty() {
            portal.create_missing(&reconciliation.missing, period).await;
        }
        Ok(())
    }

    async fn download_ready(
        &self,
        profile: &CompanyProfile,
        period: &ReportingPeriod,
        tax_digits: &str,
        portal: &BundlePortal,
        reconciliation: &Reconciliation,
    ) {
        let retry = FixedRetry {
            attempts: self.config.requests.download_attempts,
            delay: self.config.requests.download_retry_delay,
        };

        for request in reconciliation.downloadable() {
            let name = artifact_name(
                &period.code(),
                profile.code,
                tax_digits,
                &profile.user_tag,
                &request.file_name,
            );
            // the existence check runs before any captcha is spent
            if self.store.exists(&name).await {
                info!(%name, "bundle already stored, skipping download");
                continue;
            }

            let downloaded =
                with_fixed_retry(retry, |_| portal.download_bundle(request)).await;
            match downloaded {
                Ok(bytes) => {
                    if let Err(e) =
                        deliver(self.store.as_ref(), &name, bytes, "application/zip").await
                    {
                        warn!(%name, error = %e, "bundle delivery failed");
                    }
                }
                Err(e) => {
                    warn!(request = request.id, error = %e, "bundle download failed");
                }
            }
        }
    }

    async fn run_feed_flow(
        &self,
        profile: &CompanyProfile,
        period: &ReportingPeriod,
        tax_digits: &str,
    ) -> Result<()> {
        if tax_digits.len() < MIN_TAX_DIGITS {
            warn!(
                company = %profile.name,
                document = %tax_digits,
                "tax document too short for the feed, skipping"
            );
            return Ok(());
        }

        let name = artifact_name(
            &period.code(),
            profile.code,
            tax_digits,
            &profile.user_tag,
            &format!("NFSE_{}.zip", period.code()),
        );
        if self.store.exists(&name).await {
            info!(%name, "feed archive already stored, skipping scan");
            return Ok(());
        }

        let identity = session::identity_from_profile(profile)?;
        let client = session::feed_session(
            identity,
            &self.config.user_agent,
            self.config.request_timeout,
        )?;
        let scanner = FeedScanner::new(&self.config.feed, client)?;

        let outcome = scanner.scan(tax_digits, period).await?;
        if outcome.entries.is_empty() {
            info!(company = %profile.name, "feed scan produced nothing to store");
            return Ok(());
        }

        let archive = crate::archive::build_zip(&outcome.entries)?;
        deliver(self.store.as_ref(), &name, archive, "application/zip").await?;
        Ok(())
    }
}
