//! HTTP session construction
//!
//! Three kinds of client exist: certificate-bound portal/feed sessions
//! (mutual TLS with the company's credential bundle), the solver client
//! (long connect timeout, the third-party service is slow to accept), and
//! plain service clients for the registry and the store. Connection pools
//! are per-client and reused across a whole cycle.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Identity, redirect};

use crate::error::{Error, Result};
use crate::types::CompanyProfile;

/// Connect timeout for the solver service; it is slow to accept
const SOLVER_CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

/// Build the mutual-TLS identity from a profile's certificate material.
///
/// The registry stores the certificate and key as two base64-encoded PEM
/// blobs; both are concatenated into one PEM bundle. Profiles without
/// certificate material yield `None` (sessions fall back to plain TLS,
/// which the portals will reject but tests rely on).
pub fn identity_from_profile(profile: &CompanyProfile) -> Result<Option<Identity>> {
    if profile.cert_pem_b64.trim().is_empty() && profile.key_pem_b64.trim().is_empty() {
        return Ok(None);
    }

    let cert = BASE64
        .decode(profile.cert_pem_b64.trim())
        .map_err(|e| Error::Certificate(format!("certificate blob is not base64: {e}")))?;
    let key = BASE64
        .decode(profile.key_pem_b64.trim())
        .map_err(|e| Error::Certificate(format!("key blob is not base64: {e}")))?;

    let mut bundle = Vec::with_capacity(cert.len() + key.len() + 1);
    bundle.extend_from_slice(&cert);
    bundle.push(b'\n');
    bundle.extend_from_slice(&key);

    Identity::from_pem(&bundle)
        .map(Some)
        .map_err(|e| Error::Certificate(format!("could not load identity: {e}")))
}

fn browser_headers(user_agent: &str, accept: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_str(user_agent).map_err(|e| Error::Config {
            message: format!("invalid user agent: {e}"),
            key: Some("user_agent".to_string()),
        })?,
    );
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_str(accept).map_err(|e| Error::Config {
            message: format!("invalid accept header: {e}"),
            key: None,
        })?,
    );
    Ok(headers)
}

/// Certificate-bound session for the bundle portal.
///
/// `follow_redirects` is disabled for the client used on the creation
/// POST, where a redirect response is itself the success signal.
pub fn portal_session(
    identity: Option<Identity>,
    user_agent: &str,
    timeout: Duration,
    follow_redirects: bool,
) -> Result<Client> {
    let headers = browser_headers(
        user_agent,
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    )?;

    let mut builder = Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .cookie_store(true);
    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }
    if !follow_redirects {
        builder = builder.redirect(redirect::Policy::none());
    }
    Ok(builder.build()?)
}

/// Certificate-bound session for the service-invoice feed.
pub fn feed_session(
    identity: Option<Identity>,
    user_agent: &str,
    timeout: Duration,
) -> Result<Client> {
    let headers = browser_headers(user_agent, "application/json")?;

    let mut builder = Client::builder().default_headers(headers).timeout(timeout);
    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }
    Ok(builder.build()?)
}

/// Client for the captcha-solving service.
///
/// No overall timeout; the solver calls set long per-request timeouts
/// because the create-task endpoint routinely takes tens of seconds.
pub fn solver_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(SOLVER_CONNECT_TIMEOUT)
        .build()?)
}

/// Plain client for the registry and the artifact store.
pub fn service_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}
