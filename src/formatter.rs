use chrono::Utc;
use serde_json::{Map, Value};
use std::backtrace::Backtrace;

use crate::config::LoggingConfig;
use crate::level::LogLevel;
use crate::record::{
    FormattedLogEntry, InboundRequest, LogMetadata, RequestSummary, REQUEST_KEY, RESERVED_KEYS,
};

/// Host name and process id stamped on every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    pub pid: u32,
}

impl HostIdentity {
    /// Identity of the running process. The host name comes from
    /// `HOSTNAME`/`COMPUTERNAME`, then `/etc/hostname`, then `localhost`.
    pub fn current() -> Self {
        let hostname = ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            hostname,
            pid: std::process::id(),
        }
    }
}

/// Turns a log call into a [`FormattedLogEntry`].
#[derive(Debug, Clone)]
pub struct LogFormatter {
    application: String,
    environment: String,
    subaccount: String,
    include_stack_trace: bool,
    correlation_header: String,
    host: HostIdentity,
}

impl LogFormatter {
    pub fn new(config: &LoggingConfig) -> Self {
        Self::with_host(config, HostIdentity::current())
    }

    pub fn with_host(config: &LoggingConfig, host: HostIdentity) -> Self {
        Self {
            application: config.application_name.clone(),
            environment: config.environment.clone(),
            subaccount: config.subaccount_id.clone(),
            include_stack_trace: config.include_stack_trace,
            correlation_header: config.correlation_header.clone(),
            host,
        }
    }

    /// Build the wire record.
    ///
    /// Metadata is merged over the context fields; `timestamp`, `level`
    /// and `message` are always recomputed, and so is `correlationId`. A
    /// derived `stack` or `request` replaces the caller's value. An
    /// attached inbound request is reduced to its [`RequestSummary`].
    pub fn format(&self, level: LogLevel, message: &Value, metadata: &LogMetadata) -> FormattedLogEntry {
        let mut fields = Map::new();
        fields.insert("application".into(), Value::from(self.application.clone()));
        fields.insert("environment".into(), Value::from(self.environment.clone()));
        fields.insert("subaccount".into(), Value::from(self.subaccount.clone()));
        fields.insert("hostname".into(), Value::from(self.host.hostname.clone()));
        fields.insert("pid".into(), Value::from(self.host.pid));

        for (key, value) in metadata {
            if key == REQUEST_KEY || RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }

        let correlation_id = text_field(metadata, "correlationId")
            .or_else(|| text_field(metadata, "requestId"));
        fields.remove("correlationId");

        let stack = (level == LogLevel::Error && self.include_stack_trace)
            .then(|| Backtrace::force_capture().to_string());
        if stack.is_some() {
            fields.remove("stack");
        }

        let request = metadata
            .get(REQUEST_KEY)
            .and_then(|value| serde_json::from_value::<InboundRequest>(value.clone()).ok())
            .map(|req| self.summarize(&req));
        if request.is_some() {
            fields.remove("request");
        }

        FormattedLogEntry {
            timestamp: Utc::now(),
            level,
            message: message_text(message),
            fields,
            correlation_id,
            stack,
            request,
        }
    }

    fn summarize(&self, req: &InboundRequest) -> RequestSummary {
        RequestSummary {
            method: req.method.clone(),
            url: req.url.clone(),
            user_agent: req.header("user-agent").map(str::to_string),
            ip: req.ip.clone(),
            correlation_id: req.header(&self.correlation_header).map(str::to_string),
        }
    }
}

/// Strings pass through; anything else becomes compact JSON text.
pub fn message_text(message: &Value) -> String {
    match message {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text_field(metadata: &LogMetadata, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOverrides, ConfigResolver};
    use crate::record::metadata_from;
    use serde_json::json;
    use std::collections::HashMap;

    fn formatter(include_stack_trace: bool) -> LogFormatter {
        let mut config = LoggingConfig::default();
        config.application_name = "orders".into();
        config.environment = "test".into();
        config.subaccount_id = "sub-1".into();
        config.include_stack_trace = include_stack_trace;
        LogFormatter::with_host(
            &config,
            HostIdentity {
                hostname: "host-a".into(),
                pid: 4242,
            },
        )
    }

    #[test]
    fn includes_context_fields() {
        let entry = formatter(false).format(LogLevel::Info, &json!("hello"), &LogMetadata::new());
        let wire = serde_json::to_value(&entry).unwrap();
        assert_eq!(wire["level"], "INFO");
        assert_eq!(wire["message"], "hello");
        assert_eq!(wire["application"], "orders");
        assert_eq!(wire["environment"], "test");
        assert_eq!(wire["subaccount"], "sub-1");
        assert_eq!(wire["hostname"], "host-a");
        assert_eq!(wire["pid"], 4242);
        assert!(wire["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(wire.get("correlationId").is_none());
        assert!(wire.get("stack").is_none());
    }

    #[test]
    fn metadata_overrides_context_but_not_reserved_keys() {
        let metadata = metadata_from(json!({
            "application": "override-app",
            "level": "DEBUG",
            "message": "spoofed",
            "timestamp": "yesterday",
            "userId": "42",
        }));
        let entry = formatter(false).format(LogLevel::Warn, &json!("real"), &metadata);
        let wire = serde_json::to_value(&entry).unwrap();
        assert_eq!(wire["application"], "override-app");
        assert_eq!(wire["level"], "WARN");
        assert_eq!(wire["message"], "real");
        assert_ne!(wire["timestamp"], "yesterday");
        assert_eq!(wire["userId"], "42");
    }

    #[test]
    fn correlation_id_prefers_correlation_over_request_id() {
        let f = formatter(false);
        let both = metadata_from(json!({"correlationId": "c-1", "requestId": "r-1"}));
        assert_eq!(f.format(LogLevel::Info, &json!("m"), &both).correlation_id.as_deref(), Some("c-1"));

        let request_only = metadata_from(json!({"requestId": "r-1"}));
        let entry = f.format(LogLevel::Info, &json!("m"), &request_only);
        assert_eq!(entry.correlation_id.as_deref(), Some("r-1"));
        assert_eq!(entry.field_str("requestId"), Some("r-1"));
    }

    #[test]
    fn non_string_messages_become_json_text() {
        let f = formatter(false);
        let entry = f.format(LogLevel::Info, &json!({"a": 1, "b": [true]}), &LogMetadata::new());
        assert_eq!(entry.message, r#"{"a":1,"b":[true]}"#);
        assert_eq!(f.format(LogLevel::Info, &json!(7), &LogMetadata::new()).message, "7");
    }

    #[test]
    fn stack_trace_only_for_errors_when_enabled() {
        let with = formatter(true);
        assert!(with.format(LogLevel::Error, &json!("boom"), &LogMetadata::new()).stack.is_some());
        assert!(with.format(LogLevel::Fatal, &json!("boom"), &LogMetadata::new()).stack.is_none());
        let without = formatter(false);
        assert!(without.format(LogLevel::Error, &json!("boom"), &LogMetadata::new()).stack.is_none());
    }

    #[test]
    fn inbound_request_is_reduced_to_allow_listed_fields() {
        let req = InboundRequest::new("POST", "/orders?id=1")
            .with_header("User-Agent", "curl/8")
            .with_header("Authorization", "Basic c2VjcmV0")
            .with_header("x-correlation-id", "corr-9")
            .with_ip("10.0.0.1");
        let mut metadata = LogMetadata::new();
        metadata.insert(REQUEST_KEY.into(), serde_json::to_value(&req).unwrap());

        let entry = formatter(false).format(LogLevel::Info, &json!("Incoming request"), &metadata);
        let wire = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            wire["request"],
            json!({
                "method": "POST",
                "url": "/orders?id=1",
                "userAgent": "curl/8",
                "ip": "10.0.0.1",
                "correlationId": "corr-9",
            })
        );
        assert!(wire.get("req").is_none());
        assert!(!wire.to_string().contains("c2VjcmV0"));
    }

    #[test]
    fn caller_stack_and_request_pass_through_when_not_derived() {
        let metadata = metadata_from(json!({
            "error": "x",
            "stack": "Error: x\n at f",
            "request": {"route": "/orders"},
        }));
        let entry = formatter(false).format(LogLevel::Error, &json!("boom"), &metadata);
        let wire = serde_json::to_value(&entry).unwrap();
        assert_eq!(wire["error"], "x");
        assert_eq!(wire["stack"], "Error: x\n at f");
        assert_eq!(wire["request"], json!({"route": "/orders"}));
    }

    #[test]
    fn derived_stack_replaces_caller_stack() {
        let metadata = metadata_from(json!({"stack": "caller stack"}));
        let entry = formatter(true).format(LogLevel::Error, &json!("boom"), &metadata);
        assert!(entry.field("stack").is_none());
        assert_ne!(entry.stack.as_deref(), Some("caller stack"));

        let text = serde_json::to_string(&entry).unwrap();
        assert_eq!(text.matches("\"stack\"").count(), 1);
    }

    #[test]
    fn correlation_id_from_request_id_replaces_empty_caller_value() {
        let metadata = metadata_from(json!({"correlationId": "", "requestId": "r-2"}));
        let entry = formatter(false).format(LogLevel::Info, &json!("m"), &metadata);
        assert!(entry.field("correlationId").is_none());
        let wire = serde_json::to_value(&entry).unwrap();
        assert_eq!(wire["correlationId"], "r-2");

        let blank = metadata_from(json!({"correlationId": null}));
        let wire = serde_json::to_value(formatter(false).format(LogLevel::Info, &json!("m"), &blank)).unwrap();
        assert!(wire.get("correlationId").is_none());
    }

    #[test]
    fn uses_configured_context() {
        let env: HashMap<String, String> = HashMap::new();
        let config = ConfigResolver::new(&env)
            .resolve(
                ConfigOverrides::new()
                    .ingest_endpoint("https://e")
                    .application_name("billing"),
            )
            .unwrap()
            .config;
        let entry = LogFormatter::new(&config).format(LogLevel::Debug, &json!("x"), &LogMetadata::new());
        assert_eq!(entry.field_str("application"), Some("billing"));
        assert_eq!(entry.field("pid"), Some(&json!(std::process::id())));
    }
}
