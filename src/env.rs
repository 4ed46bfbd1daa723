//! Environment variable names read during configuration resolution.
//!
//! Resolution reads them through [`EnvSource`] so the merge logic can be
//! exercised with an in-memory map instead of the process environment.

use std::collections::HashMap;

/// Plain (basic auth) ingest endpoint URL.
pub const INGEST_ENDPOINT_ENV: &str = "BTP_LOGGING_INGEST_ENDPOINT";

/// Dedicated ingest endpoint URL for mutual-TLS clients.
pub const INGEST_MTLS_ENDPOINT_ENV: &str = "BTP_LOGGING_INGEST_MTLS_ENDPOINT";

/// Dashboard URL, informational only.
pub const DASHBOARD_ENDPOINT_ENV: &str = "BTP_LOGGING_DASHBOARD_ENDPOINT";

pub const USERNAME_ENV: &str = "BTP_LOGGING_USERNAME";
pub const PASSWORD_ENV: &str = "BTP_LOGGING_PASSWORD";

/// PEM-encoded client certificate.
pub const CLIENT_CERT_ENV: &str = "BTP_LOGGING_CLIENT_CERT";

/// PEM-encoded client private key.
pub const CLIENT_KEY_ENV: &str = "BTP_LOGGING_CLIENT_KEY";

/// PEM-encoded CA used to verify the ingest server.
pub const SERVER_CA_ENV: &str = "BTP_LOGGING_SERVER_CA";

pub const SUBACCOUNT_ID_ENV: &str = "BTP_SUBACCOUNT_ID";
pub const APPLICATION_NAME_ENV: &str = "BTP_APPLICATION_NAME";

/// Runtime environment name, e.g. `production`.
pub const RUNTIME_ENVIRONMENT_ENV: &str = "APP_ENV";

pub const LOG_LEVEL_ENV: &str = "BTP_LOGGING_LOG_LEVEL";

/// Retries stay enabled unless this is `false`.
pub const ENABLE_RETRY_ENV: &str = "BTP_LOGGING_ENABLE_RETRY";
pub const MAX_RETRIES_ENV: &str = "BTP_LOGGING_MAX_RETRIES";
pub const MAX_PENDING_RETRIES_ENV: &str = "BTP_LOGGING_MAX_PENDING_RETRIES";

/// Request timeout in milliseconds.
pub const TIMEOUT_ENV: &str = "BTP_LOGGING_TIMEOUT";

/// Stack traces are attached to ERROR records only when this is `true`.
pub const INCLUDE_STACK_TRACE_ENV: &str = "BTP_LOGGING_INCLUDE_STACK_TRACE";
pub const CORRELATION_HEADER_ENV: &str = "BTP_LOGGING_CORRELATION_HEADER";

/// Console fallback stays enabled unless this is `false`.
pub const FALLBACK_CONSOLE_ENV: &str = "BTP_LOGGING_FALLBACK_CONSOLE";

/// Service key JSON bundling endpoints and credentials. Takes precedence
/// over the individual variables above.
pub const SERVICE_KEY_ENV: &str = "BTP_LOGGING_SRV_KEY_CRED";

/// Read-only view of environment variables.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;

    /// Value of `key`, treating an empty string as unset.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key).filter(|v| !v.is_empty())
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvSource for HashMap<&str, &str> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }
}
