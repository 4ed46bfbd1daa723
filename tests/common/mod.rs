#![allow(dead_code)]

use async_trait::async_trait;
use cloud_logging_client::config::{ConfigOverrides, ConfigResolver, LoggingConfig};
use cloud_logging_client::error::DeliveryError;
use cloud_logging_client::fallback::FallbackSink;
use cloud_logging_client::transport::{Payload, Transport};
use cloud_logging_client::LogLevel;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;

/// Resolve without reading the process environment.
pub fn resolve(overrides: ConfigOverrides) -> LoggingConfig {
    let env: HashMap<String, String> = HashMap::new();
    ConfigResolver::new(&env)
        .resolve(overrides)
        .expect("valid config")
        .config
}

/// Transport that records every payload and succeeds or fails on demand.
#[derive(Default)]
pub struct RecordingTransport {
    fail: bool,
    sent: Mutex<Vec<(Instant, Value)>>,
}

impl RecordingTransport {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.sent.lock().unwrap().iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.sent.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, payload: Payload<'_>) -> Result<(), DeliveryError> {
        let value = serde_json::to_value(payload)?;
        self.sent.lock().unwrap().push((Instant::now(), value));
        if self.fail {
            Err(DeliveryError::Status {
                status: 503,
                body: "ingest unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Fallback sink that keeps what it receives.
#[derive(Default)]
pub struct CapturingSink {
    pub records: Mutex<Vec<(LogLevel, Value, Value)>>,
}

impl FallbackSink for CapturingSink {
    fn log(&self, level: LogLevel, message: &Value, metadata: &serde_json::Map<String, Value>) {
        self.records
            .lock()
            .unwrap()
            .push((level, message.clone(), Value::Object(metadata.clone())));
    }
}
