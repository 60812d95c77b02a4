//! Configuration types for fiscal-dl
//!
//! All settings are environment-sourced with stated defaults; there are no
//! CLI arguments. `Config::from_env` reads the deployment's environment
//! variables (the names match the hosted deployment contract), while the
//! struct itself stays an explicit immutable value handed to the scheduler
//! at startup.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_cycle_interval() -> Duration {
    Duration::from_secs(900)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    // The portal rejects obviously non-browser agents
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

fn default_true() -> bool {
    true
}

/// Company registry connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry base URL
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    /// API key sent as both `apikey` and bearer token
    #[serde(default)]
    pub api_key: String,

    /// Table holding company profiles (default: "certifica_dfe")
    #[serde(default = "default_registry_table")]
    pub table: String,
}

fn default_registry_url() -> String {
    "https://hysrxadnigzqadnlkynq.supabase.co".to_string()
}

fn default_registry_table() -> String {
    "certifica_dfe".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            api_key: String::new(),
            table: default_registry_table(),
        }
    }
}

/// Artifact store connection and addressing settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store base URL (default: same service as the registry)
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    /// API key sent as both `apikey` and bearer token
    #[serde(default)]
    pub api_key: String,

    /// Bucket name (default: "imagens")
    #[serde(default = "default_store_bucket")]
    pub bucket: String,

    /// Folder prefix inside the bucket (default: "notas")
    #[serde(default = "default_store_folder")]
    pub folder: String,
}

fn default_store_bucket() -> String {
    "imagens".to_string()
}

fn default_store_folder() -> String {
    "notas".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            api_key: String::new(),
            bucket: default_store_bucket(),
            folder: default_store_folder(),
        }
    }
}

/// Captcha solver settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Solver API base URL
    #[serde(default = "default_solver_url")]
    pub api_url: String,

    /// Client credential; absence disables automatic solving entirely
    #[serde(default)]
    pub client_key: Option<String>,

    /// Interval between result polls (default: 3 s)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Poll budget before giving up (default: 14, ~42 s total)
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_solver_url() -> String {
    "https://api.anti-captcha.com".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_max_polls() -> u32 {
    14
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            api_url: default_solver_url(),
            client_key: None,
            poll_interval: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

/// Request-based flow settings (bundle portal)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestFlowConfig {
    /// Whether the request-based flow runs at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Portal base URL
    #[serde(default = "default_portal_url")]
    pub base_url: String,

    /// Creation attempts per missing kind (default: 5)
    #[serde(default = "default_creation_attempts")]
    pub creation_attempts: u32,

    /// Fixed delay before each creation retry (default: 2 s)
    #[serde(default = "default_creation_delay")]
    pub creation_retry_delay: Duration,

    /// Pacing delay after a successful creation, before the next kind
    /// (default: 2 s)
    #[serde(default = "default_creation_delay")]
    pub inter_kind_delay: Duration,

    /// Download attempts per ready bundle (default: 3)
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,

    /// Fixed backoff between download attempts (default: 10 s)
    #[serde(default = "default_download_delay")]
    pub download_retry_delay: Duration,
}

fn default_portal_url() -> String {
    "https://download.dfe.sefin.ro.gov.br".to_string()
}

fn default_creation_attempts() -> u32 {
    5
}

fn default_creation_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_download_attempts() -> u32 {
    3
}

fn default_download_delay() -> Duration {
    Duration::from_secs(10)
}

impl Default for RequestFlowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_portal_url(),
            creation_attempts: default_creation_attempts(),
            creation_retry_delay: default_creation_delay(),
            inter_kind_delay: default_creation_delay(),
            download_attempts: default_download_attempts(),
            download_retry_delay: default_download_delay(),
        }
    }
}

/// Feed-scan flow settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedFlowConfig {
    /// Whether the feed-scan flow runs at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Feed base URL
    #[serde(default = "default_feed_url")]
    pub base_url: String,

    /// First cursor value of the scan window (default: 0)
    #[serde(default)]
    pub start_cursor: u64,

    /// Maximum cursor steps per pass (default: 400)
    #[serde(default = "default_max_count")]
    pub max_count: u64,
}

fn default_feed_url() -> String {
    "https://adn.nfse.gov.br".to_string()
}

fn default_max_count() -> u64 {
    400
}

impl Default for FeedFlowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_feed_url(),
            start_cursor: 0,
            max_count: default_max_count(),
        }
    }
}

/// Main configuration for the acquisition robot
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Company registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Artifact store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Captcha solver settings
    #[serde(default)]
    pub solver: SolverConfig,

    /// Request-based flow settings
    #[serde(default)]
    pub requests: RequestFlowConfig,

    /// Feed-scan flow settings
    #[serde(default)]
    pub feed: FeedFlowConfig,

    /// Wait between full cycles (default: 900 s)
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval: Duration,

    /// Timeout for ordinary HTTP calls (default: 30 s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// User agent presented to the portal and feed
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            store: StoreConfig::default(),
            solver: SolverConfig::default(),
            requests: RequestFlowConfig::default(),
            feed: FeedFlowConfig::default(),
            cycle_interval: default_cycle_interval(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match env_string(key) {
        None => Ok(None),
        Some(v) => v.parse::<u64>().map(Some).map_err(|e| Error::Config {
            message: format!("invalid integer for {key}: {e}"),
            key: Some(key.to_string()),
        }),
    }
}

fn env_flag(key: &str) -> bool {
    flag_from(env_string(key))
}

// A flow stays enabled when the variable is absent; once set, only the
// literal "1" enables it
fn flag_from(value: Option<String>) -> bool {
    value.map(|v| v == "1").unwrap_or(true)
}

impl Config {
    /// Build the configuration from environment variables.
    ///
    /// Recognized variables (all optional, defaults in the field docs):
    /// `RUN_DFE`, `RUN_NFSE`, `ANTI_CAPTCHA_KEY`, `START_NSU`, `MAX_NSU`,
    /// `INTERVALO_LOOP_SEGUNDOS`, `SUPABASE_URL`, `SUPABASE_KEY`,
    /// `TABELA_CERTS`, `BUCKET_IMAGENS`, `PASTA_NOTAS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(url) = env_string("SUPABASE_URL") {
            config.registry.base_url = url.clone();
            config.store.base_url = url;
        }
        if let Some(key) = env_string("SUPABASE_KEY") {
            config.registry.api_key = key.clone();
            config.store.api_key = key;
        }
        if let Some(table) = env_string("TABELA_CERTS") {
            config.registry.table = table;
        }
        if let Some(bucket) = env_string("BUCKET_IMAGENS") {
            config.store.bucket = bucket;
        }
        if let Some(folder) = env_string("PASTA_NOTAS") {
            config.store.folder = folder;
        }

        config.solver.client_key = env_string("ANTI_CAPTCHA_KEY");

        config.requests.enabled = env_flag("RUN_DFE");
        config.feed.enabled = env_flag("RUN_NFSE");

        if let Some(start) = env_u64("START_NSU")? {
            config.feed.start_cursor = start;
        }
        if let Some(count) = env_u64("MAX_NSU")? {
            config.feed.max_count = count;
        }
        if let Some(secs) = env_u64("INTERVALO_LOOP_SEGUNDOS")? {
            config.cycle_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
