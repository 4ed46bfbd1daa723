use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity};
use serde::Serialize;
use std::future::Future;

use crate::auth::AuthStrategy;
use crate::config::LoggingConfig;
use crate::error::{ConfigError, DeliveryError};
use crate::record::FormattedLogEntry;

/// Body of one ingest request: a single record or an array of records.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum Payload<'a> {
    Single(&'a FormattedLogEntry),
    Batch(&'a [FormattedLogEntry]),
}

impl Payload<'_> {
    pub fn len(&self) -> usize {
        match self {
            Payload::Single(_) => 1,
            Payload::Batch(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

tokio::task_local! {
    static DELIVERING: ();
}

/// Whether the current task is inside a transport send.
///
/// Events raised by the HTTP stack while a record is in flight must not
/// be forwarded back into the service.
pub fn delivery_in_progress() -> bool {
    DELIVERING.try_with(|_| ()).is_ok()
}

/// Run `send` with [`delivery_in_progress`] reporting `true`.
pub(crate) async fn delivering<F: Future>(send: F) -> F::Output {
    DELIVERING.scope((), send).await
}

/// Asynchronous delivery of formatted records to the ingest endpoint.
///
/// Implementations perform exactly one attempt per call; retries are
/// driven by [`DeliveryService`](crate::service::DeliveryService).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload`.
    ///
    /// **Returns**
    /// - `Ok(())` if the endpoint accepted the request (status < 400).
    /// - `Err(..)` on a missing endpoint, network failure, timeout or
    ///   an error status.
    async fn send(&self, payload: Payload<'_>) -> Result<(), DeliveryError>;
}

/// [`Transport`] that POSTs JSON to the endpoint of its [`AuthStrategy`].
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    endpoint: Option<String>,
    strategy: AuthStrategy,
}

impl HttpTransport {
    /// Build the HTTP client for `strategy`.
    ///
    /// For mutual TLS the client identity and optional server CA are
    /// loaded here, so malformed PEM material fails construction.
    pub fn new(config: &LoggingConfig, strategy: AuthStrategy) -> Result<Self, ConfigError> {
        let mut builder = Client::builder().use_rustls_tls().timeout(config.timeout);

        if let Some(tls) = strategy.tls_context() {
            let identity = Identity::from_pem(&tls.identity_pem())
                .map_err(|e| ConfigError::InvalidTls(e.to_string()))?;
            builder = builder.identity(identity);
            if let Some(ca) = &tls.server_ca {
                let ca = Certificate::from_pem(ca.as_bytes())
                    .map_err(|e| ConfigError::InvalidTls(e.to_string()))?;
                builder = builder.add_root_certificate(ca);
            }
        }

        let client = builder.build().map_err(ConfigError::HttpClient)?;
        let endpoint = strategy.endpoint(config).map(str::to_string);

        Ok(Self {
            client,
            endpoint,
            strategy,
        })
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn strategy(&self) -> &AuthStrategy {
        &self.strategy
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: Payload<'_>) -> Result<(), DeliveryError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(DeliveryError::EndpointNotConfigured)?;

        let body = serde_json::to_vec(&payload)?;
        let mut request = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        for (name, value) in self.strategy.headers() {
            request = request.header(name, value);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.as_u16() < 400 {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthMode;

    #[test]
    fn payload_len() {
        let entries: Vec<FormattedLogEntry> = Vec::new();
        assert!(Payload::Batch(&entries).is_empty());
    }

    #[test]
    fn rejects_malformed_client_identity() {
        let config = LoggingConfig {
            auth_mode: AuthMode::Mtls,
            ingest_mtls_endpoint: Some("https://ingest-mtls.example".into()),
            client_cert: Some("not a certificate".into()),
            client_key: Some("not a key".into()),
            ..LoggingConfig::default()
        };
        let err = HttpTransport::new(&config, AuthStrategy::select(&config)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTls(_)));
    }

    #[test]
    fn endpoint_follows_strategy() {
        let config = LoggingConfig {
            ingest_endpoint: Some("https://ingest.example".into()),
            ..LoggingConfig::default()
        };
        let none = HttpTransport::new(&config, AuthStrategy::None).unwrap();
        assert_eq!(none.endpoint(), None);
        let basic = HttpTransport::new(&config, AuthStrategy::basic("u", "p")).unwrap();
        assert_eq!(basic.endpoint(), Some("https://ingest.example"));
    }
}
