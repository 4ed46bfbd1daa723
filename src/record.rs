use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::level::LogLevel;

/// Open key/value metadata attached to a log call.
pub type LogMetadata = Map<String, Value>;

/// Metadata key under which an [`InboundRequest`] is attached.
pub const REQUEST_KEY: &str = "req";

/// One record as handed to [`DeliveryService::log_batch`](crate::service::DeliveryService::log_batch).
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: Value,
    pub metadata: LogMetadata,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<Value>) -> Self {
        Self {
            level,
            message: message.into(),
            metadata: LogMetadata::new(),
        }
    }

    /// Attach metadata. Non-object values are ignored.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata_from(metadata);
        self
    }
}

/// Convert a JSON value into metadata; anything but an object yields an
/// empty map.
pub fn metadata_from(value: Value) -> LogMetadata {
    match value {
        Value::Object(map) => map,
        _ => LogMetadata::new(),
    }
}

/// Inbound HTTP request as seen by request-logging middleware.
///
/// Only the fields listed in [`RequestSummary`] ever reach the wire; the
/// remaining headers stay local to the formatter.
#[derive(Debug, Clone, Default, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub path: String,
    /// Header names are stored lowercased.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub ip: Option<String>,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let path = url.split('?').next().unwrap_or_default().to_string();
        Self {
            method: method.into(),
            url,
            path,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Allow-listed summary of an inbound request embedded in a wire record.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Canonical wire record produced by [`LogFormatter`](crate::formatter::LogFormatter).
///
/// `fields` carries the context fields (application, environment,
/// subaccount, hostname, pid) with caller metadata merged over them.
/// [`RESERVED_KEYS`] and `correlationId` never appear in `fields`.
/// Caller-supplied `stack` and `request` stay in `fields` unless the
/// formatter derives its own value for that key.
#[derive(Debug, Clone, Serialize)]
pub struct FormattedLogEntry {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSummary>,
}

/// Keys a formatted record always recomputes, whatever the metadata says.
pub const RESERVED_KEYS: [&str; 3] = ["timestamp", "level", "message"];

impl FormattedLogEntry {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

fn serialize_timestamp<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
