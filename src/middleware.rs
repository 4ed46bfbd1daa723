//! Request logging for HTTP servers.
//!
//! Framework neutral: adapt the server's request into an
//! [`InboundRequest`], call [`RequestLogger::begin`] when it arrives and
//! [`RequestScope::finish`] once the response status is known. Both log
//! calls run on spawned tasks so they never hold up the response.

use serde_json::{json, Value};
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DEFAULT_CORRELATION_HEADER;
use crate::record::{metadata_from, InboundRequest, LogMetadata, REQUEST_KEY};
use crate::service::DeliveryService;

#[derive(Debug, Clone)]
pub struct RequestLoggerOptions {
    pub correlation_header: String,
    pub log_requests: bool,
    pub log_responses: bool,
    /// Exact paths, or prefixes when ending in `*`.
    pub exclude_paths: Vec<String>,
}

impl Default for RequestLoggerOptions {
    fn default() -> Self {
        Self {
            correlation_header: DEFAULT_CORRELATION_HEADER.to_string(),
            log_requests: true,
            log_responses: true,
            exclude_paths: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct RequestLogger {
    service: DeliveryService,
    options: RequestLoggerOptions,
}

impl RequestLogger {
    pub fn new(service: DeliveryService, options: RequestLoggerOptions) -> Self {
        Self { service, options }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.options.exclude_paths.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => path.starts_with(prefix),
                None => path == pattern,
            }
        })
    }

    /// Start tracking a request.
    ///
    /// Returns `None` for excluded paths. Otherwise a correlation id is
    /// assigned when the request has none, and the request start is
    /// logged at INFO.
    pub fn begin(&self, mut request: InboundRequest) -> Option<RequestScope> {
        if self.is_excluded(&request.path) {
            return None;
        }

        let header = self.options.correlation_header.as_str();
        let existing = request
            .header(header)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let correlation_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                request = request.with_header(header, id.clone());
                id
            }
        };

        let start_log = self.options.log_requests.then(|| {
            let mut metadata = LogMetadata::new();
            metadata.insert(
                REQUEST_KEY.to_string(),
                serde_json::to_value(&request).unwrap_or(Value::Null),
            );
            let service = self.service.clone();
            tokio::spawn(async move { service.info("Incoming request", metadata).await })
        });

        Some(RequestScope {
            service: self.service.clone(),
            request,
            correlation_id,
            started: Instant::now(),
            start_log,
            log_response: self.options.log_responses,
        })
    }
}

/// An in-flight request started by [`RequestLogger::begin`].
pub struct RequestScope {
    service: DeliveryService,
    request: InboundRequest,
    correlation_id: String,
    started: Instant,
    start_log: Option<JoinHandle<()>>,
    log_response: bool,
}

impl RequestScope {
    /// Value to echo back in the correlation response header.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn request(&self) -> &InboundRequest {
        &self.request
    }

    /// Log request completion after the start record. The returned
    /// handle may be awaited or dropped.
    pub fn finish(self, status_code: u16) -> JoinHandle<()> {
        let start_log = self.start_log;
        if !self.log_response {
            return tokio::spawn(join_start_log(start_log));
        }
        let duration = self.started.elapsed().as_millis();
        let metadata = metadata_from(json!({
            "method": self.request.method,
            "url": self.request.url,
            "statusCode": status_code,
            "duration": format!("{duration}ms"),
            "correlationId": self.correlation_id,
        }));
        let service = self.service;
        tokio::spawn(async move {
            join_start_log(start_log).await;
            service.info("Request completed", metadata).await
        })
    }
}

async fn join_start_log(start_log: Option<JoinHandle<()>>) {
    if let Some(handle) = start_log {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "request start log did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn failed_start_log_is_reported() {
        let handle = tokio::spawn(async { panic!("start log failed") });
        join_start_log(Some(handle)).await;
        assert!(logs_contain("request start log did not complete"));
    }

    #[tokio::test]
    #[traced_test]
    async fn completed_start_log_is_silent() {
        join_start_log(Some(tokio::spawn(async {}))).await;
        join_start_log(None).await;
        assert!(!logs_contain("did not complete"));
    }
}
