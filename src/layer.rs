use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::level::LogLevel;
use crate::record::{LogEntry, LogMetadata};
use crate::service::DeliveryService;
use crate::transport::delivery_in_progress;

/// Targets never forwarded: the client's own diagnostics and the HTTP
/// stack it sends through. The latter also log from connection tasks
/// spawned outside any delivery.
const SUPPRESSED_TARGETS: &[&str] = &[
    "cloud_logging_client",
    "reqwest",
    "hyper",
    "h2",
    "rustls",
    "tokio_rustls",
    "want",
    "tower",
    "mio",
];

fn is_suppressed(target: &str) -> bool {
    SUPPRESSED_TARGETS.iter().any(|prefix| {
        target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// `tracing_subscriber` layer that turns events into [`LogEntry`]s and
/// hands them to a [`DeliveryService`] through a bounded channel.
///
/// A background task drains the channel and ships records with
/// [`DeliveryService::log_batch`], so application threads never wait on
/// the network.
pub struct CloudLogLayer {
    sender: mpsc::Sender<LogEntry>,
    /// Total events seen by the layer (before filtering).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full or closed.
    pub dropped_events: Arc<AtomicU64>,
}

impl CloudLogLayer {
    /// Create the layer and spawn its forwarding task.
    ///
    /// Minimal thresholds are enforced for `buffer`, `batch_size` and
    /// `flush_interval`. The task ends once the layer is dropped and the
    /// channel is drained.
    pub fn new(
        service: DeliveryService,
        buffer: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> (Self, JoinHandle<()>) {
        let buffer = buffer.max(16);
        let batch_size = batch_size.max(1);
        let flush_interval = flush_interval.max(Duration::from_millis(10));

        let (tx, mut rx) = mpsc::channel::<LogEntry>(buffer);

        let total_events = Arc::new(AtomicU64::new(0));
        let enqueued_events = Arc::new(AtomicU64::new(0));
        let dropped_events = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(batch_size);
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(entry) => {
                            batch.push(entry);
                            if batch.len() >= batch_size {
                                service.log_batch(std::mem::take(&mut batch)).await;
                            }
                        }
                        None => {
                            if !batch.is_empty() {
                                service.log_batch(std::mem::take(&mut batch)).await;
                            }
                            break;
                        }
                    },
                    _ = sleep(flush_interval) => {
                        if !batch.is_empty() {
                            service.log_batch(std::mem::take(&mut batch)).await;
                        }
                    }
                }
            }
        });

        (
            Self {
                sender: tx,
                total_events,
                enqueued_events,
                dropped_events,
            },
            handle,
        )
    }
}

impl<S> Layer<S> for CloudLogLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if is_suppressed(meta.target()) || delivery_in_progress() {
            return;
        }

        let mut metadata = LogMetadata::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor {
            fields: &mut metadata,
            message: &mut message,
        };
        event.record(&mut visitor);
        metadata.insert("target".to_string(), Value::from(meta.target()));

        let entry = LogEntry {
            level: LogLevel::from(*meta.level()),
            message: Value::from(message.unwrap_or_default()),
            metadata,
        };

        match self.sender.try_send(entry) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                eprintln!("log channel full, dropping log record");
            }
        }
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut LogMetadata,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_stack_targets_are_suppressed() {
        assert!(is_suppressed("hyper::proto::h1::io"));
        assert!(is_suppressed("h2"));
        assert!(is_suppressed("rustls::client::hs"));
        assert!(is_suppressed("cloud_logging_client::service"));
        assert!(!is_suppressed("h2o_app"));
        assert!(!is_suppressed("orders::api"));
    }

    #[tokio::test]
    async fn delivery_scope_is_visible_only_inside_send() {
        assert!(!delivery_in_progress());
        let inside = crate::transport::delivering(async { delivery_in_progress() }).await;
        assert!(inside);
        assert!(!delivery_in_progress());
    }
}
