use serde_json::Value;
use std::sync::Arc;

use crate::error::DeliveryError;
use crate::level::LogLevel;
use crate::record::LogMetadata;

/// The call that failed to deliver, as handed to fallback consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct LogContext {
    pub level: LogLevel,
    pub message: Value,
    pub metadata: LogMetadata,
}

/// Local destination that receives records the ingest endpoint refused.
///
/// Installed via [`ConfigOverrides::fallback_sink`](crate::config::ConfigOverrides::fallback_sink);
/// only consulted while console fallback is enabled. `metadata` carries
/// an extra `error` key with the delivery failure message.
pub trait FallbackSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &Value, metadata: &LogMetadata);
}

/// Callback invoked once for every failed delivery attempt.
pub type ErrorCallback = Arc<dyn Fn(&DeliveryError, &LogContext) + Send + Sync>;

/// Render the diagnostic line written to stderr when no fallback sink
/// is configured.
pub fn console_line(error: &DeliveryError, context: &LogContext) -> String {
    let message = match &context.message {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!(
        "Cloud Logging failed: {}. Log: level={} message={} metadata={}",
        error,
        context.level,
        message,
        Value::Object(context.metadata.clone())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn console_line_names_error_and_record() {
        let context = LogContext {
            level: LogLevel::Error,
            message: json!("db down"),
            metadata: crate::record::metadata_from(json!({"userId": "42"})),
        };
        let line = console_line(&DeliveryError::EndpointNotConfigured, &context);
        assert!(line.starts_with("Cloud Logging failed: Cloud logging ingest endpoint is not configured."));
        assert!(line.contains("level=ERROR"));
        assert!(line.contains("message=db down"));
        assert!(line.contains(r#""userId":"42""#));
    }
}
