use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::auth::AuthStrategy;
use crate::config::{ConfigOverrides, LoggingConfig};
use crate::error::{ConfigError, DeliveryError};
use crate::fallback::{console_line, LogContext};
use crate::formatter::LogFormatter;
use crate::level::LogLevel;
use crate::record::{LogEntry, LogMetadata};
use crate::retry::{RetryPolicy, RetryScheduler, RetryTicket};
use crate::transport::{delivering, HttpTransport, Payload, Transport};

const NOT_CONFIGURED: &str = "Not configured";

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Live summary of delivery health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub healthy: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub endpoint: String,
    pub mtls_endpoint: String,
}

/// Counters accumulated over the lifetime of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Records handed to the transport, retries included.
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Records dropped by the minimum level.
    pub filtered: u64,
    pub retries_scheduled: u64,
    /// Retries skipped because too many were already outstanding.
    pub retries_dropped: u64,
    pub fallback_emitted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    attempted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    filtered: AtomicU64,
    retries_scheduled: AtomicU64,
    retries_dropped: AtomicU64,
    fallback_emitted: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

struct Inner {
    config: LoggingConfig,
    formatter: LogFormatter,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    retries: RetryScheduler,
    healthy: AtomicBool,
    retry_count: AtomicU32,
    counters: Counters,
}

/// Filters, formats and delivers log records, retrying failed sends in
/// the background.
///
/// Cloning is cheap; clones share configuration, health and retry state.
/// Delivery failures never reach the caller: they are retried per the
/// configured policy, mirrored to the fallback path and reported to the
/// error callback.
#[derive(Clone)]
pub struct DeliveryService {
    inner: Arc<Inner>,
}

impl DeliveryService {
    /// Resolve configuration from the environment plus `overrides` and
    /// build an HTTP-backed service.
    pub fn new(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::from_config(LoggingConfig::resolve(overrides)?)
    }

    /// Build from an already resolved configuration.
    pub fn from_config(config: LoggingConfig) -> Result<Self, ConfigError> {
        let strategy = AuthStrategy::select(&config);
        let transport = HttpTransport::new(&config, strategy)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build around a custom [`Transport`].
    pub fn with_transport(config: LoggingConfig, transport: Arc<dyn Transport>) -> Self {
        let formatter = LogFormatter::new(&config);
        let policy = RetryPolicy::from_config(&config);
        Self {
            inner: Arc::new(Inner {
                formatter,
                transport,
                policy,
                retries: RetryScheduler::new(policy.max_pending),
                healthy: AtomicBool::new(true),
                retry_count: AtomicU32::new(0),
                counters: Counters::default(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.inner.config
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level.priority() >= self.inner.config.log_level.priority()
    }

    /// Log one record. Records below the minimum level are dropped.
    pub async fn log(&self, level: LogLevel, message: impl Into<Value>, metadata: LogMetadata) {
        self.deliver_one(LogEntry {
            level,
            message: message.into(),
            metadata,
        })
        .await
    }

    pub async fn debug(&self, message: impl Into<Value>, metadata: LogMetadata) {
        self.log(LogLevel::Debug, message, metadata).await
    }

    pub async fn info(&self, message: impl Into<Value>, metadata: LogMetadata) {
        self.log(LogLevel::Info, message, metadata).await
    }

    pub async fn warn(&self, message: impl Into<Value>, metadata: LogMetadata) {
        self.log(LogLevel::Warn, message, metadata).await
    }

    pub async fn error(&self, message: impl Into<Value>, metadata: LogMetadata) {
        self.log(LogLevel::Error, message, metadata).await
    }

    pub async fn fatal(&self, message: impl Into<Value>, metadata: LogMetadata) {
        self.log(LogLevel::Fatal, message, metadata).await
    }

    /// Send several records in one request.
    ///
    /// Entries are filtered individually; an empty result is a no-op. If
    /// the request fails, every remaining entry goes through the single
    /// record failure path on its own.
    pub async fn log_batch(&self, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        let total = entries.len();
        let kept: Vec<LogEntry> = entries
            .into_iter()
            .filter(|entry| self.should_log(entry.level))
            .collect();
        Counters::add(&self.inner.counters.filtered, total - kept.len());
        if kept.is_empty() {
            return;
        }

        let formatted: Vec<_> = kept
            .iter()
            .map(|entry| {
                self.inner
                    .formatter
                    .format(entry.level, &entry.message, &entry.metadata)
            })
            .collect();

        Counters::add(&self.inner.counters.attempted, kept.len());
        match delivering(self.inner.transport.send(Payload::Batch(&formatted))).await {
            Ok(()) => self.record_success(kept.len()),
            Err(e) => {
                for entry in kept {
                    self.handle_failure(&e, entry);
                }
            }
        }
    }

    pub fn health_status(&self) -> HealthStatus {
        let config = &self.inner.config;
        HealthStatus {
            healthy: self.inner.healthy.load(Ordering::SeqCst),
            retry_count: self.inner.retry_count.load(Ordering::SeqCst),
            max_retries: self.inner.policy.max_retries,
            endpoint: config
                .ingest_endpoint
                .clone()
                .unwrap_or_else(|| NOT_CONFIGURED.to_string()),
            mtls_endpoint: config
                .ingest_mtls_endpoint
                .clone()
                .unwrap_or_else(|| NOT_CONFIGURED.to_string()),
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        let c = &self.inner.counters;
        DeliveryStats {
            attempted: c.attempted.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            filtered: c.filtered.load(Ordering::Relaxed),
            retries_scheduled: c.retries_scheduled.load(Ordering::Relaxed),
            retries_dropped: c.retries_dropped.load(Ordering::Relaxed),
            fallback_emitted: c.fallback_emitted.load(Ordering::Relaxed),
        }
    }

    /// Retries scheduled but not yet fired.
    pub fn pending_retries(&self) -> Vec<RetryTicket> {
        self.inner.retries.pending()
    }

    /// Wait until no retry is outstanding.
    pub async fn wait_for_retries(&self) {
        self.inner.retries.wait_idle().await
    }

    /// Release resources. Pending retries are neither cancelled nor
    /// awaited.
    pub async fn shutdown(&self) {
        tracing::info!(
            pending_retries = self.inner.retries.pending_count(),
            "Cloud Logging Service shutting down..."
        );
    }

    async fn deliver_one(&self, entry: LogEntry) {
        if !self.should_log(entry.level) {
            Counters::add(&self.inner.counters.filtered, 1);
            return;
        }

        let formatted = self
            .inner
            .formatter
            .format(entry.level, &entry.message, &entry.metadata);
        Counters::add(&self.inner.counters.attempted, 1);
        let result = delivering(self.inner.transport.send(Payload::Single(&formatted))).await;
        match result {
            Ok(()) => self.record_success(1),
            Err(e) => self.handle_failure(&e, entry),
        }
    }

    /// Boxed so the retry task does not make `deliver_one` recursive.
    fn retry_task(&self, id: u64, entry: LogEntry) -> BoxFuture {
        let svc = self.clone();
        Box::pin(async move {
            svc.inner.retries.fire(id);
            svc.deliver_one(entry).await;
        })
    }

    fn record_success(&self, delivered: usize) {
        Counters::add(&self.inner.counters.delivered, delivered);
        self.inner.retry_count.store(0, Ordering::SeqCst);
        self.inner.healthy.store(true, Ordering::SeqCst);
    }

    fn handle_failure(&self, error: &DeliveryError, entry: LogEntry) {
        let inner = &self.inner;
        inner.healthy.store(false, Ordering::SeqCst);
        Counters::add(&inner.counters.failed, 1);

        let context = LogContext {
            level: entry.level,
            message: entry.message.clone(),
            metadata: entry.metadata.clone(),
        };

        let policy = inner.policy;
        let next = inner
            .retry_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                policy.next_attempt(count)
            });
        if let Ok(previous) = next {
            let attempt = previous + 1;
            let delay = RetryPolicy::delay_for(attempt);
            let level = entry.level;
            let message = entry.message.clone();
            let scheduled = inner
                .retries
                .schedule(attempt, delay, level, message, |id| self.retry_task(id, entry));
            match scheduled {
                Some(ticket) => {
                    Counters::add(&inner.counters.retries_scheduled, 1);
                    tracing::debug!(
                        retry_id = ticket.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "scheduled log delivery retry"
                    );
                }
                None => {
                    Counters::add(&inner.counters.retries_dropped, 1);
                    tracing::warn!(
                        max_pending = policy.max_pending,
                        "too many pending retries, not retrying log record"
                    );
                }
            }
        }

        if inner.config.fallback_to_console {
            match &inner.config.fallback_sink {
                Some(sink) => {
                    let mut metadata = context.metadata.clone();
                    metadata.insert("error".to_string(), Value::from(error.to_string()));
                    sink.log(context.level, &context.message, &metadata);
                }
                None => eprintln!("{}", console_line(error, &context)),
            }
            Counters::add(&inner.counters.fallback_emitted, 1);
        }

        if let Some(on_error) = &inner.config.on_error {
            on_error(error, &context);
        }
    }
}
