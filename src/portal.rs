//! Bundle portal client
//!
//! All traffic against the fiscal download portal for one company:
//! listing the request catalog, loading detail pages, creating missing
//! requests, and downloading ready bundles behind their captcha gate.
//! Two certificate-bound clients exist per company because the creation
//! POST must see the redirect answer instead of following it.

use std::time::Duration;

use reqwest::{Client, Identity, StatusCode, header};
use tracing::{debug, info, warn};
use url::Url;

use crate::captcha::CaptchaSolver;
use crate::config::RequestFlowConfig;
use crate::creation::{CreationOutcome, classify_creation_response};
use crate::error::{Error, Result};
use crate::page;
use crate::period::ReportingPeriod;
use crate::retry::{FixedRetry, with_fixed_retry};
use crate::session;
use crate::types::{DocumentKind, DocumentRequest, ListingRow, RequestDetail, RequestState};

/// Client for one company's session on the bundle portal
pub struct BundlePortal {
    /// Follows redirects; used for every GET
    browse: Client,
    /// Never follows redirects; used for the creation POST
    post: Client,
    base: Url,
    solver: CaptchaSolver,
    creation_retry: FixedRetry,
    inter_kind_delay: Duration,
}

impl BundlePortal {
    /// Build a portal client bound to one company's certificate.
    pub fn new(
        config: &RequestFlowConfig,
        identity: Option<Identity>,
        user_agent: &str,
        timeout: Duration,
        solver: CaptchaSolver,
    ) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid portal base url: {e}"),
            key: None,
        })?;
        Ok(Self {
            browse: session::portal_session(identity.clone(), user_agent, timeout, true)?,
            post: session::portal_session(identity, user_agent, timeout, false)?,
            base,
            solver,
            creation_retry: FixedRetry {
                attempts: config.creation_attempts,
                delay: config.creation_retry_delay,
            },
            inter_kind_delay: config.inter_kind_delay,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Other(format!("invalid portal path {path:?}: {e}")))
    }

    /// List the request catalog.
    ///
    /// A missing table or an unexpected status yields an empty catalog
    /// with a warning; every kind then looks missing and gets a creation
    /// attempt, which the portal tolerates.
    pub async fn list_requests(&self) -> Result<Vec<DocumentRequest>> {
        let response = self.browse.get(self.url("/solicitacoes")?).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "request listing unavailable");
            return Ok(Vec::new());
        }
        let html = response.text().await?;
        let rows = match page::extract_listing(&html) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "request listing unparseable");
                return Ok(Vec::new());
            }
        };
        Ok(rows.iter().filter_map(normalize_row).collect())
    }

    /// Load the detail fields of one request.
    pub async fn request_detail(&self, id: u64) -> Result<RequestDetail> {
        let url = self.url(&format!("/solicitacoes/detalhes/{id}"))?;
        let response = self.browse.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                context: format!("detail page for request {id}"),
            });
        }
        let html = response.text().await?;
        let (period, tax_document) = page::extract_detail(&html)?;
        Ok(RequestDetail {
            period,
            tax_document,
        })
    }

    /// Create one missing request, retrying fresh challenges on wrong
    /// captcha answers until the attempt budget runs out.
    pub async fn create_request(
        &self,
        kind: DocumentKind,
        period: &ReportingPeriod,
    ) -> Result<()> {
        with_fixed_retry(self.creation_retry, |_| self.try_create(kind, period)).await
    }

    async fn try_create(&self, kind: DocumentKind, period: &ReportingPeriod) -> Result<()> {
        let response = self
            .browse
            .get(self.url("/solicitacoes/novo")?)
            .send()
            .await?;
        let html = response.text().await?;
        let form = page::extract_creation_form(&html)?;
        let answer = self.solver.solve(&form.captcha_image_b64).await?;

        let payload = [
            ("authenticity_token", form.csrf_token.as_str()),
            ("token", form.form_token.as_str()),
            ("captcha_resposta", answer.as_str()),
            ("id_pessoa", form.person_id.as_str()),
            ("tp_solicitacao", "1"),
            ("dfe_documento", kind.form_code()),
            ("dfe_status[ativo]", "1"),
            ("dfe_status[cancelado]", "1"),
            ("periodo_inicial", &period.start_label()),
            ("periodo_final", &period.end_label()),
            ("dfes", ""),
        ];

        let response = self
            .post
            .post(self.url(&form.action)?)
            .header(header::REFERER, self.url("/solicitacoes/novo")?.as_str())
            .header("X-CSRF-Token", &form.csrf_token)
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&payload)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        match classify_creation_response(status, &body) {
            CreationOutcome::Accepted => {
                info!(kind = kind.label(), "bundle request created");
                Ok(())
            }
            CreationOutcome::InvalidChallenge => {
                Err(Error::Other("captcha answer rejected".to_string()))
            }
            CreationOutcome::Unexpected {
                status,
                body_snippet,
            } => Err(Error::Other(format!(
                "creation answered {status}: {body_snippet}"
            ))),
        }
    }

    /// Create requests for every kind in `kinds`, in catalog order, with
    /// a fixed pause between kinds. Per-kind failures are logged and do
    /// not stop the remaining kinds.
    pub async fn create_missing(&self, kinds: &[DocumentKind], period: &ReportingPeriod) {
        for (i, kind) in kinds.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.inter_kind_delay).await;
            }
            if let Err(e) = self.create_request(*kind, period).await {
                warn!(kind = kind.label(), error = %e, "request creation failed");
            }
        }
    }

    /// Download one ready bundle through its captcha gate.
    pub async fn download_bundle(&self, request: &DocumentRequest) -> Result<Vec<u8>> {
        let detail_url = self.url(&format!("/solicitacoes/detalhes/{}", request.id))?;
        let response = self.browse.get(detail_url).send().await?;
        let html = response.text().await?;

        let link = page::extract_download_link(&html)?
            .ok_or(Error::Other("detail page has no download link".to_string()))?;
        let response = self.browse.get(self.url(&link)?).send().await?;
        let body = response.text().await?;

        let fragment = page::extract_modal_fragment(&body)?;
        let challenge = page::extract_download_challenge(&fragment)?;
        let answer = self.solver.solve(&challenge.captcha_image_b64).await?;

        let mut url = self.url(&challenge.action)?;
        url.query_pairs_mut()
            .append_pair("token", &challenge.token)
            .append_pair("captcha_resposta", &answer);
        let response = self.browse.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                context: format!("bundle download for request {}", request.id),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.contains("zip") && !content_type.contains("octet-stream") {
            return Err(Error::Other(format!(
                "bundle download answered {content_type:?} instead of an archive"
            )));
        }

        let bytes = response.bytes().await?.to_vec();
        debug!(
            request = request.id,
            size = bytes.len(),
            "bundle downloaded"
        );
        Ok(bytes)
    }
}

fn normalize_row(row: &ListingRow) -> Option<DocumentRequest> {
    let kind = DocumentKind::normalize(&row.kind_label)?;
    Some(DocumentRequest {
        id: row.id,
        kind,
        state: RequestState::parse(&row.state_label),
        state_label: row.state_label.clone(),
        file_name: row.file_name(),
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_with_unknown_kinds_are_dropped() {
        let known = ListingRow {
            id: 12,
            kind_label: "NF-e".to_string(),
            state_label: "Download Disponível".to_string(),
            issued_label: "01/02/2025".to_string(),
        };
        let unknown = ListingRow {
            kind_label: "MDF-e".to_string(),
            ..known.clone()
        };
        let normalized = normalize_row(&known).unwrap();
        assert_eq!(normalized.kind, DocumentKind::Nfe);
        assert_eq!(normalized.state, RequestState::Downloadable);
        assert!(normalize_row(&unknown).is_none());
    }
}
