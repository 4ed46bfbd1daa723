//! Configuration resolution.
//!
//! A [`LoggingConfig`] is produced by merging, lowest to highest
//! precedence: built-in defaults, individual environment variables, the
//! service key blob from [`SERVICE_KEY_ENV`](crate::env::SERVICE_KEY_ENV),
//! and the caller's [`ConfigOverrides`]. Each source is turned into a
//! `ConfigOverrides` fragment first so the merge itself is a pure
//! function over fragments.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::env::{self, EnvSource, ProcessEnv};
use crate::error::{ConfigError, ConfigWarning};
use crate::fallback::{ErrorCallback, FallbackSink};
use crate::json::parse_env_object;
use crate::level::LogLevel;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_PENDING_RETRIES: usize = 256;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_CORRELATION_HEADER: &str = "x-correlation-id";
pub const DEFAULT_SUBACCOUNT_ID: &str = "PAYG_DEVELOPMENT";
pub const DEFAULT_APPLICATION_NAME: &str = "unknown-app";
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// How the client authenticates against the ingest endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AuthMode {
    #[default]
    None,
    Basic,
    Mtls,
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(AuthMode::None),
            "basic" => Ok(AuthMode::Basic),
            "mtls" | "mutual-tls" => Ok(AuthMode::Mtls),
            other => Err(format!("unknown auth mode: {other}")),
        }
    }
}

/// Partially specified configuration.
///
/// Used both as the caller-facing override object and as the fragment
/// each configuration source produces before merging. `None` means
/// "not specified by this source".
#[derive(Clone, Default)]
pub struct ConfigOverrides {
    pub ingest_endpoint: Option<String>,
    pub ingest_mtls_endpoint: Option<String>,
    pub dashboard_endpoint: Option<String>,
    pub auth_mode: Option<AuthMode>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub server_ca: Option<String>,
    pub subaccount_id: Option<String>,
    pub application_name: Option<String>,
    pub environment: Option<String>,
    pub log_level: Option<LogLevel>,
    pub enable_retry: Option<bool>,
    pub max_retries: Option<u32>,
    pub max_pending_retries: Option<usize>,
    pub timeout: Option<Duration>,
    pub include_stack_trace: Option<bool>,
    pub correlation_header: Option<String>,
    pub fallback_to_console: Option<bool>,
    pub fallback_sink: Option<Arc<dyn FallbackSink>>,
    pub on_error: Option<ErrorCallback>,
}

macro_rules! take_higher {
    ($low:ident, $high:ident; $($field:ident),+ $(,)?) => {
        ConfigOverrides {
            $($field: $high.$field.or($low.$field),)+
        }
    };
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `higher` on top of `self`; fields set in `higher` win.
    pub fn merge(self, higher: ConfigOverrides) -> ConfigOverrides {
        let low = self;
        take_higher!(low, higher;
            ingest_endpoint,
            ingest_mtls_endpoint,
            dashboard_endpoint,
            auth_mode,
            username,
            password,
            client_cert,
            client_key,
            server_ca,
            subaccount_id,
            application_name,
            environment,
            log_level,
            enable_retry,
            max_retries,
            max_pending_retries,
            timeout,
            include_stack_trace,
            correlation_header,
            fallback_to_console,
            fallback_sink,
            on_error,
        )
    }

    pub fn ingest_endpoint(mut self, url: impl Into<String>) -> Self {
        self.ingest_endpoint = Some(url.into());
        self
    }

    pub fn ingest_mtls_endpoint(mut self, url: impl Into<String>) -> Self {
        self.ingest_mtls_endpoint = Some(url.into());
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth_mode = Some(AuthMode::Basic);
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn mtls_auth(
        mut self,
        client_cert: impl Into<String>,
        client_key: impl Into<String>,
        server_ca: Option<String>,
    ) -> Self {
        self.auth_mode = Some(AuthMode::Mtls);
        self.client_cert = Some(client_cert.into());
        self.client_key = Some(client_key.into());
        self.server_ca = server_ca;
        self
    }

    pub fn auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = Some(mode);
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn subaccount_id(mut self, id: impl Into<String>) -> Self {
        self.subaccount_id = Some(id.into());
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn retry(mut self, enabled: bool, max_retries: u32) -> Self {
        self.enable_retry = Some(enabled);
        self.max_retries = Some(max_retries);
        self
    }

    pub fn max_pending_retries(mut self, max: usize) -> Self {
        self.max_pending_retries = Some(max);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn include_stack_trace(mut self, include: bool) -> Self {
        self.include_stack_trace = Some(include);
        self
    }

    pub fn correlation_header(mut self, header: impl Into<String>) -> Self {
        self.correlation_header = Some(header.into());
        self
    }

    pub fn fallback_to_console(mut self, enabled: bool) -> Self {
        self.fallback_to_console = Some(enabled);
        self
    }

    pub fn fallback_sink(mut self, sink: Arc<dyn FallbackSink>) -> Self {
        self.fallback_sink = Some(sink);
        self
    }

    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }
}

impl fmt::Debug for ConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOverrides")
            .field("ingest_endpoint", &self.ingest_endpoint)
            .field("ingest_mtls_endpoint", &self.ingest_mtls_endpoint)
            .field("auth_mode", &self.auth_mode)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

/// Service key JSON as issued for a cloud logging instance.
///
/// Endpoint values are host names; an `https://` scheme is added when
/// missing.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceKey {
    pub ingest_endpoint: Option<String>,
    pub ingest_mtls_endpoint: Option<String>,
    pub dashboards_endpoint: Option<String>,
    pub ingest_username: Option<String>,
    pub ingest_password: Option<String>,
    pub ingest_mtls_cert: Option<String>,
    pub ingest_mtls_key: Option<String>,
    pub server_ca: Option<String>,
}

impl ServiceKey {
    /// Convert into a configuration fragment, inferring the auth mode:
    /// mTLS when certificate and key are both present, else basic when
    /// username and password are, else unspecified.
    pub fn into_overrides(self) -> ConfigOverrides {
        let has_mtls = self.ingest_mtls_cert.is_some() && self.ingest_mtls_key.is_some();
        let has_basic = self.ingest_username.is_some() && self.ingest_password.is_some();
        let auth_mode = if has_mtls {
            Some(AuthMode::Mtls)
        } else if has_basic {
            Some(AuthMode::Basic)
        } else {
            None
        };

        ConfigOverrides {
            ingest_endpoint: self.ingest_endpoint.as_deref().map(with_https),
            ingest_mtls_endpoint: self.ingest_mtls_endpoint.as_deref().map(with_https),
            dashboard_endpoint: self.dashboards_endpoint.as_deref().map(with_https),
            auth_mode,
            username: self.ingest_username,
            password: self.ingest_password,
            client_cert: self.ingest_mtls_cert,
            client_key: self.ingest_mtls_key,
            server_ca: self.server_ca,
            ..ConfigOverrides::default()
        }
    }
}

fn with_https(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Fully resolved, immutable configuration.
#[derive(Clone)]
pub struct LoggingConfig {
    pub ingest_endpoint: Option<String>,
    pub ingest_mtls_endpoint: Option<String>,
    pub dashboard_endpoint: Option<String>,
    pub auth_mode: AuthMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub server_ca: Option<String>,
    pub subaccount_id: String,
    pub application_name: String,
    pub environment: String,
    pub log_level: LogLevel,
    pub enable_retry: bool,
    pub max_retries: u32,
    pub max_pending_retries: usize,
    pub timeout: Duration,
    pub include_stack_trace: bool,
    pub correlation_header: String,
    pub fallback_to_console: bool,
    pub fallback_sink: Option<Arc<dyn FallbackSink>>,
    pub on_error: Option<ErrorCallback>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            ingest_endpoint: None,
            ingest_mtls_endpoint: None,
            dashboard_endpoint: None,
            auth_mode: AuthMode::None,
            username: None,
            password: None,
            client_cert: None,
            client_key: None,
            server_ca: None,
            subaccount_id: DEFAULT_SUBACCOUNT_ID.to_string(),
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            log_level: LogLevel::Debug,
            enable_retry: true,
            max_retries: DEFAULT_MAX_RETRIES,
            max_pending_retries: DEFAULT_MAX_PENDING_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            include_stack_trace: false,
            correlation_header: DEFAULT_CORRELATION_HEADER.to_string(),
            fallback_to_console: true,
            fallback_sink: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("ingest_endpoint", &self.ingest_endpoint)
            .field("ingest_mtls_endpoint", &self.ingest_mtls_endpoint)
            .field("dashboard_endpoint", &self.dashboard_endpoint)
            .field("auth_mode", &self.auth_mode)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_cert", &self.client_cert.is_some())
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("server_ca", &self.server_ca.is_some())
            .field("subaccount_id", &self.subaccount_id)
            .field("application_name", &self.application_name)
            .field("environment", &self.environment)
            .field("log_level", &self.log_level)
            .field("enable_retry", &self.enable_retry)
            .field("max_retries", &self.max_retries)
            .field("max_pending_retries", &self.max_pending_retries)
            .field("timeout", &self.timeout)
            .field("include_stack_trace", &self.include_stack_trace)
            .field("correlation_header", &self.correlation_header)
            .field("fallback_to_console", &self.fallback_to_console)
            .field("fallback_sink", &self.fallback_sink.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl LoggingConfig {
    /// Resolve against the process environment, logging any warnings.
    pub fn resolve(overrides: ConfigOverrides) -> Result<LoggingConfig, ConfigError> {
        ConfigResolver::new(&ProcessEnv)
            .resolve(overrides)
            .map(|resolution| resolution.config)
    }

    /// Endpoint used by the configured authentication mode.
    pub fn active_endpoint(&self) -> Option<&str> {
        match self.auth_mode {
            AuthMode::Mtls => self.ingest_mtls_endpoint.as_deref(),
            AuthMode::Basic | AuthMode::None => self.ingest_endpoint.as_deref(),
        }
    }

    /// Apply a merged fragment over the built-in defaults.
    fn from_fragment(fragment: ConfigOverrides) -> LoggingConfig {
        let defaults = LoggingConfig::default();
        let auth_mode = fragment
            .auth_mode
            .unwrap_or_else(|| infer_auth_mode(&fragment));

        LoggingConfig {
            ingest_endpoint: fragment.ingest_endpoint.filter(|s| !s.is_empty()),
            ingest_mtls_endpoint: fragment.ingest_mtls_endpoint.filter(|s| !s.is_empty()),
            dashboard_endpoint: fragment.dashboard_endpoint.filter(|s| !s.is_empty()),
            auth_mode,
            username: fragment.username,
            password: fragment.password,
            client_cert: fragment.client_cert,
            client_key: fragment.client_key,
            server_ca: fragment.server_ca,
            subaccount_id: fragment.subaccount_id.unwrap_or(defaults.subaccount_id),
            application_name: fragment.application_name.unwrap_or(defaults.application_name),
            environment: fragment.environment.unwrap_or(defaults.environment),
            log_level: fragment.log_level.unwrap_or(defaults.log_level),
            enable_retry: fragment.enable_retry.unwrap_or(defaults.enable_retry),
            max_retries: fragment.max_retries.unwrap_or(defaults.max_retries),
            max_pending_retries: fragment
                .max_pending_retries
                .unwrap_or(defaults.max_pending_retries),
            timeout: fragment.timeout.unwrap_or(defaults.timeout),
            include_stack_trace: fragment
                .include_stack_trace
                .unwrap_or(defaults.include_stack_trace),
            correlation_header: fragment
                .correlation_header
                .unwrap_or(defaults.correlation_header),
            fallback_to_console: fragment
                .fallback_to_console
                .unwrap_or(defaults.fallback_to_console),
            fallback_sink: fragment.fallback_sink,
            on_error: fragment.on_error,
        }
    }

    /// Check mode-specific credentials. Missing endpoints are returned
    /// as warnings; missing credentials are fatal.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        match self.auth_mode {
            AuthMode::Basic if !present(&self.username) || !present(&self.password) => {
                return Err(ConfigError::MissingBasicCredentials);
            }
            AuthMode::Mtls if !present(&self.client_cert) || !present(&self.client_key) => {
                return Err(ConfigError::MissingMtlsCredentials);
            }
            _ => {}
        }

        let mut warnings = Vec::new();
        if self.active_endpoint().is_none() {
            warnings.push(ConfigWarning::MissingEndpoint);
        }
        Ok(warnings)
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// mTLS wins when its credentials are present, then basic, then none.
fn infer_auth_mode(fragment: &ConfigOverrides) -> AuthMode {
    if present(&fragment.client_cert) && present(&fragment.client_key) {
        AuthMode::Mtls
    } else if present(&fragment.username) && present(&fragment.password) {
        AuthMode::Basic
    } else {
        AuthMode::None
    }
}

/// A resolved configuration plus the non-fatal findings of validation.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: LoggingConfig,
    pub warnings: Vec<ConfigWarning>,
}

/// Builds a [`LoggingConfig`] from an [`EnvSource`] and caller overrides.
pub struct ConfigResolver<'a> {
    env: &'a dyn EnvSource,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(env: &'a dyn EnvSource) -> Self {
        Self { env }
    }

    /// Fragment built from the individual `BTP_LOGGING_*` variables.
    pub fn env_fragment(&self, warnings: &mut Vec<ConfigWarning>) -> ConfigOverrides {
        let source = self.env;
        let text = |key: &str| source.non_empty(key);

        let mut fragment = ConfigOverrides {
            ingest_endpoint: text(env::INGEST_ENDPOINT_ENV),
            ingest_mtls_endpoint: text(env::INGEST_MTLS_ENDPOINT_ENV),
            dashboard_endpoint: text(env::DASHBOARD_ENDPOINT_ENV),
            username: text(env::USERNAME_ENV),
            password: text(env::PASSWORD_ENV),
            client_cert: text(env::CLIENT_CERT_ENV),
            client_key: text(env::CLIENT_KEY_ENV),
            server_ca: text(env::SERVER_CA_ENV),
            subaccount_id: text(env::SUBACCOUNT_ID_ENV),
            application_name: text(env::APPLICATION_NAME_ENV),
            environment: text(env::RUNTIME_ENVIRONMENT_ENV),
            correlation_header: text(env::CORRELATION_HEADER_ENV),
            enable_retry: text(env::ENABLE_RETRY_ENV).map(|v| v != "false"),
            include_stack_trace: text(env::INCLUDE_STACK_TRACE_ENV).map(|v| v == "true"),
            fallback_to_console: text(env::FALLBACK_CONSOLE_ENV).map(|v| v != "false"),
            ..ConfigOverrides::default()
        };

        fragment.log_level = parse_var(source, env::LOG_LEVEL_ENV, warnings);
        fragment.max_retries = parse_var(source, env::MAX_RETRIES_ENV, warnings);
        fragment.max_pending_retries = parse_var(source, env::MAX_PENDING_RETRIES_ENV, warnings);
        fragment.timeout =
            parse_var::<u64>(source, env::TIMEOUT_ENV, warnings).map(Duration::from_millis);
        fragment
    }

    /// Fragment built from the service key blob, if one is set.
    pub fn service_key_fragment(&self) -> Option<ConfigOverrides> {
        let raw = self.env.non_empty(env::SERVICE_KEY_ENV)?;
        let object = parse_env_object(&raw);
        if object.is_empty() {
            return None;
        }
        match serde_json::from_value::<ServiceKey>(Value::Object(object)) {
            Ok(key) => Some(key.into_overrides()),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed {}", env::SERVICE_KEY_ENV);
                None
            }
        }
    }

    /// Merge every source in precedence order and validate the result.
    pub fn resolve(&self, overrides: ConfigOverrides) -> Result<Resolution, ConfigError> {
        let mut warnings = Vec::new();
        let mut merged = self.env_fragment(&mut warnings);
        if let Some(service_key) = self.service_key_fragment() {
            merged = merged.merge(service_key);
        }
        merged = merged.merge(overrides);

        let config = LoggingConfig::from_fragment(merged);
        warnings.extend(config.validate()?);
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }
        Ok(Resolution { config, warnings })
    }
}

fn parse_var<T: FromStr>(
    source: &dyn EnvSource,
    key: &'static str,
    warnings: &mut Vec<ConfigWarning>,
) -> Option<T> {
    let value = source.non_empty(key)?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warnings.push(ConfigWarning::InvalidEnvValue { key, value });
            None
        }
    }
}
