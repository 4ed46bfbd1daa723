use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::layer::CloudLogLayer;
use crate::service::DeliveryService;

/// Settings for the `tracing` bridge.
///
/// **Fields**
/// - `channel_buffer`: queued entries before new events are dropped.
/// - `batch_size`: entries per `log_batch` call.
/// - `flush_interval`: longest wait before a partial batch is sent.
/// - `enable_stdout`: also install `tracing_subscriber::fmt` so events
///   show up on the console.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            batch_size: 64,
            flush_interval: Duration::from_secs(1),
            enable_stdout: true,
        }
    }
}

/// Install a global subscriber that forwards every `tracing` event to
/// `service`.
///
/// Must be called from within a Tokio runtime. Returns the handle of the
/// forwarding task.
pub fn init_tracing_with_config(
    service: DeliveryService,
    config: LayerConfig,
) -> Result<JoinHandle<()>, SetGlobalDefaultError> {
    let (layer, handle) = CloudLogLayer::new(
        service,
        config.channel_buffer,
        config.batch_size,
        config.flush_interval,
    );

    if config.enable_stdout {
        let subscriber = Registry::default()
            .with(layer)
            .with(tracing_subscriber::fmt::layer());
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(handle)
}

/// [`init_tracing_with_config`] with [`LayerConfig::default`].
pub fn init_tracing(service: DeliveryService) -> Result<JoinHandle<()>, SetGlobalDefaultError> {
    init_tracing_with_config(service, LayerConfig::default())
}
