use std::fmt;

/// Fatal configuration problems detected while building a
/// [`DeliveryService`](crate::service::DeliveryService).
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Username and password are required for basic authentication")]
    MissingBasicCredentials,

    #[error("Client certificate and key are required for mTLS authentication")]
    MissingMtlsCredentials,

    #[error("unknown log level: {0}")]
    InvalidLevel(String),

    #[error("invalid TLS material: {0}")]
    InvalidTls(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Non-fatal configuration findings. Resolution proceeds and the
/// warning is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No ingest endpoint for the selected authentication mode; records
    /// will only reach the fallback path.
    MissingEndpoint,
    /// An environment variable held a value that could not be parsed.
    InvalidEnvValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::MissingEndpoint => f.write_str(
                "BTP_LOGGING_INGEST_ENDPOINT is not configured. Logging may fallback to console if enabled.",
            ),
            ConfigWarning::InvalidEnvValue { key, value } => {
                write!(f, "ignoring invalid value {value:?} for {key}")
            }
        }
    }
}

/// Failure of a single delivery attempt.
///
/// Never returned to callers of `log`/`log_batch`; it flows into the
/// retry and fallback path and is handed to the error callback.
#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("Cloud logging ingest endpoint is not configured.")]
    EndpointNotConfigured,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("failed to serialize log payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Raised by custom transports that refuse a payload.
    #[error("{0}")]
    Rejected(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else {
            DeliveryError::Network(err)
        }
    }
}
