//! Company registry
//!
//! Company profiles live in one table of a hosted REST database. Each
//! cycle reloads the full table so enrollments, renewals, and opt-outs
//! take effect without a restart.

use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::types::CompanyProfile;

// Field names mirror the table columns, including the slash in the
// tax document one.
#[derive(Debug, Deserialize)]
struct RegistryRow {
    #[serde(rename = "empresa")]
    name: Option<String>,
    #[serde(rename = "user")]
    user_tag: Option<String>,
    #[serde(rename = "codi")]
    code: Option<i64>,
    #[serde(rename = "pem")]
    cert_pem_b64: Option<String>,
    #[serde(rename = "key")]
    key_pem_b64: Option<String>,
    #[serde(rename = "cnpj/cpf")]
    tax_document: Option<String>,
    #[serde(rename = "vencimento")]
    expires_on: Option<String>,
    #[serde(rename = "fazer")]
    process_flag: Option<String>,
}

fn parse_expiry(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%d/%m/%Y"))
        .ok()
}

impl From<RegistryRow> for CompanyProfile {
    fn from(row: RegistryRow) -> Self {
        CompanyProfile {
            name: row.name.unwrap_or_default(),
            user_tag: row.user_tag.unwrap_or_default(),
            code: row.code,
            cert_pem_b64: row.cert_pem_b64.unwrap_or_default(),
            key_pem_b64: row.key_pem_b64.unwrap_or_default(),
            tax_document: row.tax_document.unwrap_or_default(),
            expires_on: row.expires_on.as_deref().and_then(parse_expiry),
            process_flag: row.process_flag,
        }
    }
}

/// Read-only client for the company registry table
pub struct CompanyRegistry {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
}

impl CompanyRegistry {
    /// Build a registry client over a plain service client.
    pub fn new(config: &RegistryConfig, client: Client) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            table: config.table.clone(),
        }
    }

    /// Load every enrolled company.
    ///
    /// Skip decisions (expired certificate, opt-out flag) stay with the
    /// orchestrator; the registry returns rows as stored.
    pub async fn load_companies(&self) -> Result<Vec<CompanyProfile>> {
        let url = format!("{}/rest/v1/{}", self.base_url, self.table);
        let response = self
            .client
            .get(&url)
            .query(&[("select", "*")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Registry(format!(
                "registry answered {}: {body}",
                status.as_u16()
            )));
        }

        let rows: Vec<RegistryRow> = response
            .json()
            .await
            .map_err(|e| Error::Registry(format!("registry rows unparseable: {e}")))?;
        let profiles: Vec<CompanyProfile> = rows.into_iter().map(CompanyProfile::from).collect();

        if profiles.is_empty() {
            warn!(table = %self.table, "registry returned no companies");
        } else {
            info!(companies = profiles.len(), "registry loaded");
        }
        Ok(profiles)
    }
}
