/*!
 * Error types for the subrelay application.
 *
 * Domain failures are modelled with thiserror enums so the worker pipeline
 * can tell retryable backend hiccups from terminal conditions. Infrastructure
 * code (database, artifacts, config loading) keeps using anyhow with context.
 */

use thiserror::Error;

/// Errors that can occur when talking to a remote provider
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
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl ProviderError {
    /// Whether a retry with backoff may succeed
    ///
    /// Network, parsing and throttling problems are transient. Credential
    /// problems and client-side HTTP errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_)
            | Self::ParseError(_)
            | Self::ConnectionError(_)
            | Self::RateLimitExceeded(_) => true,
            Self::ApiError { status_code, .. } => {
                matches!(status_code, 408 | 425 | 429) || *status_code >= 500
            }
            Self::AuthenticationError(_) => false,
        }
    }

    /// Map an HTTP error status to the matching variant
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => Self::AuthenticationError(message),
            429 => Self::RateLimitExceeded(message),
            _ => Self::ApiError { status_code, message },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            Self::ConnectionError(error.to_string())
        } else if error.is_decode() {
            Self::ParseError(error.to_string())
        } else {
            Self::RequestFailed(error.to_string())
        }
    }
}

/// Errors that can occur during subtitle processing
#[derive(Error, Debug)]
pub enum SubtitleError {
    /// The document did not contain a single well-formed block
    #[error("Malformed subtitle document: {0}")]
    Format(String),

    /// Reading or writing a subtitle file failed
    #[error("Subtitle I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a translation job
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Error from the provider API
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The daily request ceiling is reached, retry tomorrow
    #[error("Daily request limit of {limit} reached")]
    DailyLimitExceeded {
        /// Configured requests per day
        limit: u32,
    },

    /// The backend rejected the request in a way retries cannot fix
    #[error("Permanent backend error: {0}")]
    PermanentBackend(ProviderError),

    /// The job was cancelled or superseded
    #[error("Translation job cancelled")]
    Cancelled,

    /// The job ran past its deadline
    #[error("Translation job timed out after {0} seconds")]
    TimedOut(u64),

    /// Error with subtitle processing
    #[error("Subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),

    /// Persisting progress failed
    #[error("Progress store error: {0}")]
    Store(String),
}

impl TranslationError {
    /// Whether the caller may retry the same job later
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, Self::DailyLimitExceeded { .. } | Self::TimedOut(_) | Self::Store(_))
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from subtitle processing
    #[error("Subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),

    /// Error from translation
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(format!("{:#}", error))
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
