//! Artifact delivery
//!
//! Bundles end up as objects in a remote storage bucket. The store is
//! the idempotency boundary of the whole system: an artifact name that
//! already exists is never fetched or uploaded again, so a cycle can be
//! re-run after any partial failure without duplicating work. Names are
//! fully deterministic for a given period, company, and bundle.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Destination for finished bundle artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether an artifact with this name already exists.
    ///
    /// Implementations answer `false` when they cannot tell; a duplicate
    /// upload is cheaper than a silently skipped bundle.
    async fn exists(&self, name: &str) -> bool;

    /// Upload one artifact. Must not be called for an existing name.
    async fn put(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
}

/// Build the canonical artifact name.
///
/// Shape: `{period}-{company code}-{tax document digits}-{user}-{base}`,
/// with fixed fallbacks for absent parts so names stay parseable. The
/// user tag may be an e-mail address; path separators in it would break
/// the bucket layout and are replaced.
pub fn artifact_name(
    period_code: &str,
    company_code: Option<i64>,
    tax_digits: &str,
    user_tag: &str,
    base_name: &str,
) -> String {
    let code = company_code.map_or_else(|| "0".to_string(), |c| c.to_string());
    let document = if tax_digits.is_empty() {
        "sem-doc"
    } else {
        tax_digits
    };
    let user = if user_tag.trim().is_empty() {
        "sem-user".to_string()
    } else {
        user_tag.trim().replace('/', "_")
    };
    format!("{period_code}-{code}-{document}-{user}-{base_name}")
}

/// Upload an artifact unless it is already stored.
///
/// Returns `true` when an upload happened, `false` on a skip.
pub async fn deliver(
    store: &dyn ArtifactStore,
    name: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<bool> {
    if store.exists(name).await {
        info!(name, "artifact already stored, skipping");
        return Ok(false);
    }
    store.put(name, bytes, content_type).await?;
    info!(name, "artifact stored");
    Ok(true)
}

/// Store backed by a bucket-style HTTP object API
pub struct HttpArtifactStore {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: String,
    folder: String,
}

impl HttpArtifactStore {
    /// Build a store over a plain service client.
    pub fn new(config: &StoreConfig, client: Client) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            bucket: config.bucket.clone(),
            folder: config.folder.clone(),
        }
    }

    fn object_path(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}/{name}",
            self.base_url, self.bucket, self.folder
        )
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn exists(&self, name: &str) -> bool {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let payload = json!({
            "prefix": self.folder,
            "search": name,
            "limit": 1,
        });
        let sent = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .json(&payload)
            .send()
            .await;
        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                warn!(name, error = %e, "store listing failed, assuming absent");
                return false;
            }
        };
        if !response.status().is_success() {
            warn!(
                name,
                status = response.status().as_u16(),
                "store listing rejected, assuming absent"
            );
            return false;
        }
        match response.json::<serde_json::Value>().await {
            Ok(serde_json::Value::Array(items)) => {
                let found = items
                    .iter()
                    .filter_map(|item| item.get("name").and_then(|n| n.as_str()))
                    .any(|stored| stored == name);
                debug!(name, found, "store listing answered");
                found
            }
            Ok(_) => false,
            Err(e) => {
                warn!(name, error = %e, "store listing unparseable, assuming absent");
                false
            }
        }
    }

    async fn put(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let response = self
            .client
            .post(self.object_path(name))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Store(format!(
            "upload of {name} answered {}: {body}",
            status.as_u16()
        )))
    }
}
