use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{AuthMode, LoggingConfig};

/// Client certificate material for mutual TLS. The server certificate is
/// always verified.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterials {
    pub client_cert: String,
    pub client_key: String,
    pub server_ca: Option<String>,
}

impl TlsMaterials {
    /// Certificate and key concatenated into a single PEM bundle.
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut pem = self.client_cert.trim_end().as_bytes().to_vec();
        pem.push(b'\n');
        pem.extend_from_slice(self.client_key.trim_end().as_bytes());
        pem.push(b'\n');
        pem
    }
}

impl fmt::Debug for TlsMaterials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterials")
            .field("client_key", &"<redacted>")
            .field("server_ca", &self.server_ca.is_some())
            .finish_non_exhaustive()
    }
}

/// Authentication strategy chosen once when the service is built.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// No credentials; there is no endpoint to send to.
    None,
    /// `Authorization: Basic <base64(username:password)>` against the
    /// plain ingest endpoint.
    Basic { authorization: String },
    /// Client-certificate handshake against the dedicated mTLS endpoint.
    MutualTls(TlsMaterials),
}

impl AuthStrategy {
    pub fn basic(username: &str, password: &str) -> Self {
        let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
        AuthStrategy::Basic {
            authorization: format!("Basic {encoded}"),
        }
    }

    /// Pick the strategy for a resolved configuration.
    ///
    /// The resolved [`AuthMode`] already encodes precedence (mTLS over
    /// basic over none); a mode whose credentials are absent degrades
    /// to [`AuthStrategy::None`].
    pub fn select(config: &LoggingConfig) -> Self {
        match config.auth_mode {
            AuthMode::Mtls => match (&config.client_cert, &config.client_key) {
                (Some(cert), Some(key)) => AuthStrategy::MutualTls(TlsMaterials {
                    client_cert: cert.clone(),
                    client_key: key.clone(),
                    server_ca: config.server_ca.clone(),
                }),
                _ => AuthStrategy::None,
            },
            AuthMode::Basic => match (&config.username, &config.password) {
                (Some(user), Some(pass)) => AuthStrategy::basic(user, pass),
                _ => AuthStrategy::None,
            },
            AuthMode::None => AuthStrategy::None,
        }
    }

    pub fn mode(&self) -> AuthMode {
        match self {
            AuthStrategy::None => AuthMode::None,
            AuthStrategy::Basic { .. } => AuthMode::Basic,
            AuthStrategy::MutualTls(_) => AuthMode::Mtls,
        }
    }

    pub fn endpoint<'c>(&self, config: &'c LoggingConfig) -> Option<&'c str> {
        match self {
            AuthStrategy::None => None,
            AuthStrategy::Basic { .. } => config.ingest_endpoint.as_deref(),
            AuthStrategy::MutualTls(_) => config.ingest_mtls_endpoint.as_deref(),
        }
    }

    pub fn headers(&self) -> BTreeMap<&'static str, String> {
        let mut headers = BTreeMap::new();
        if let AuthStrategy::Basic { authorization } = self {
            headers.insert("Authorization", authorization.clone());
        }
        headers
    }

    pub fn tls_context(&self) -> Option<&TlsMaterials> {
        match self {
            AuthStrategy::MutualTls(materials) => Some(materials),
            _ => None,
        }
    }
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::None => f.write_str("None"),
            AuthStrategy::Basic { .. } => f.write_str("Basic { authorization: <redacted> }"),
            AuthStrategy::MutualTls(materials) => f.debug_tuple("MutualTls").field(materials).finish(),
        }
    }
}
