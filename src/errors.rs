/*!
 * Error types for the epubtrans application.
 *
 * This module contains custom error types for the different layers of the
 * translation pipeline, using the thiserror crate for ergonomic definitions.
 */

use thiserror::Error;

/// Status codes the remote policy treats as transient.
pub const TRANSIENT_STATUS_CODES: [u16; 7] = [408, 409, 429, 500, 502, 503, 504];

/// Errors that can occur when working with provider APIs
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
        /// Server-provided Retry-After hint in seconds
        retry_after: Option<f64>,
    },

    /// The request did not complete within its per-attempt timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// No usable model could be resolved
    #[error("No usable model: {0}")]
    ModelUnavailable(String),
}

impl ProviderError {
    /// HTTP status carried by the error, when there is one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Timeouts, connection failures, rate limits and 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::ConnectionError(_) => true,
            Self::ApiError { status_code, .. } => {
                TRANSIENT_STATUS_CODES.contains(status_code) || (500..600).contains(status_code)
            }
            _ => false,
        }
    }

    /// Whether the provider rejected the request because of its size
    pub fn is_payload_too_large(&self) -> bool {
        if matches!(self.status_code(), Some(400) | Some(413)) {
            return true;
        }

        let message = self.to_string().to_lowercase();
        message.contains("request entity too large")
            || (message.contains("payload") && message.contains("too large"))
            || (message.contains("exceeds") && message.contains("limit"))
    }
}

/// Errors raised while reading or writing EPUB containers and chapter markup
#[derive(Error, Debug)]
pub enum DocumentError {
    /// The zip container could not be read or written
    #[error("Archive error: {0}")]
    Archive(String),

    /// A required entry is not present in the container
    #[error("Missing archive entry: {0}")]
    MissingEntry(String),

    /// container.xml or the package document is unusable
    #[error("Invalid package structure: {0}")]
    Structure(String),

    /// Markup could not be parsed
    #[error("Markup parse error: {0}")]
    Xml(String),

    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for DocumentError {
    fn from(error: zip::result::ZipError) -> Self {
        match error {
            zip::result::ZipError::FileNotFound => Self::MissingEntry("file not found".to_string()),
            zip::result::ZipError::Io(e) => Self::Io(e),
            other => Self::Archive(other.to_string()),
        }
    }
}

impl From<quick_xml::Error> for DocumentError {
    fn from(error: quick_xml::Error) -> Self {
        Self::Xml(error.to_string())
    }
}

/// Errors that can occur during translation
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Error from the provider API
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The provider answered but the batch wrapper could not be recovered
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// A segment stayed untranslated after every fallback
    #[error("Segment {segment_id} could not be translated: {reason}")]
    SegmentFailed {
        /// Identifier of the failing segment
        segment_id: String,
        /// Last failure observed for it
        reason: String,
    },

    /// Output kept looking like the source language after a forced retry
    #[error("Segment {segment_id} is not in target language '{target_language}'")]
    LanguageGuard {
        /// Identifier of the failing segment
        segment_id: String,
        /// Expected output language
        target_language: String,
    },

    /// Cache, ledger or translation memory failure
    #[error("State store error: {0}")]
    State(String),

    /// Container or chapter failure that cannot be skipped
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

impl TranslationError {
    /// Parse failures are retried the same way as transient provider errors
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            Self::MalformedResponse(_) => true,
            _ => false,
        }
    }

    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_payload_too_large())
    }
}

impl From<anyhow::Error> for TranslationError {
    fn from(error: anyhow::Error) -> Self {
        Self::State(format!("{:#}", error))
    }
}
