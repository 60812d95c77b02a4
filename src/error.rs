//! Error types for fiscal-dl
//!
//! Failures are caught at the smallest unit of work (one poll, one cursor,
//! one creation attempt, one company) and never allowed to escape the
//! company-level boundary; the error taxonomy mirrors that layering with
//! domain sub-enums for the captcha solver and page extraction.

use thiserror::Error;

/// Result type alias for fiscal-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fiscal-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "SUPABASE_URL")
        key: Option<String>,
    },

    /// Network / HTTP transport error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Captcha solving failed
    #[error("captcha error: {0}")]
    Captcha(#[from] CaptchaError),

    /// A remote page was missing an expected element or token
    #[error("page extraction error: {0}")]
    Page(#[from] PageError),

    /// Company registry returned an unusable response
    #[error("registry error: {0}")]
    Registry(String),

    /// Certificate material could not be decoded or loaded
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Artifact store rejected an operation
    #[error("artifact store error: {0}")]
    Store(String),

    /// Remote endpoint answered with an unexpected HTTP status
    #[error("unexpected status {status} from {context}")]
    UnexpectedStatus {
        /// The HTTP status code received
        status: u16,
        /// What was being requested when the status arrived
        context: String,
    },

    /// Building the result archive failed
    #[error("archive error: {0}")]
    Archive(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Failures of the external captcha-solving service
///
/// All of these are non-fatal to the caller: the current unit of work is
/// abandoned and the surrounding flow moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptchaError {
    /// No solver credential configured; short-circuits without a network call
    #[error("no solver credential configured")]
    NotConfigured,

    /// The create-task call succeeded but carried no task identifier
    #[error("create-task response carried no task id")]
    MissingTaskId,

    /// The solver reported `ready` but the solution text was empty
    #[error("solver reported ready with an empty solution")]
    EmptySolution,

    /// The solver reported a terminal non-processing status
    #[error("solver reported failure: {0}")]
    Solver(String),

    /// The poll budget was exhausted without a terminal status
    #[error("solver polling exhausted without a terminal status")]
    Timeout,

    /// Transport failure on the initial submit call
    #[error("solver transport error: {0}")]
    Transport(String),
}

/// Failures extracting structured results from remote markup
///
/// The portal's pages are third-party markup; when an expected element is
/// absent the attempt that needed it fails, never the whole cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    /// An expected element or attribute was not found
    #[error("missing expected element: {0}")]
    MissingElement(&'static str),

    /// The listing table did not expose the expected column headers
    #[error("listing table headers not recognized")]
    MissingHeaders,

    /// The pseudo-JSON download modal could not be unwrapped into markup
    #[error("could not unwrap challenge modal markup")]
    MalformedModal,

    /// A CSS selector failed to parse (programming error surfaced as data)
    #[error("invalid selector: {0}")]
    Selector(String),
}
