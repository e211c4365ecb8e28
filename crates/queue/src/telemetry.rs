// Logging setup for binaries embedding the queue
//
// Library code only emits `tracing` events; installing a subscriber is left
// to the application. This module offers the default fmt + EnvFilter setup.
// Events are written to stderr.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log filter (e.g., "info", "debug", "pgqueue=debug")
    pub log_filter: Option<String>,
    /// Whether to print the event target (module path)
    pub with_target: bool,
    /// Whether to use ANSI colors
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            with_target: true,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `NO_COLOR`: Disable ANSI colors when set
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            ansi: std::env::var_os("NO_COLOR").is_none(),
            ..Default::default()
        }
    }

    /// Filter to use, falling back to `info` when unset or unparsable
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

/// Install the global tracing subscriber
///
/// Fails if a global subscriber is already set.
///
/// # Example
///
/// ```ignore
/// use pgqueue::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     init_telemetry(TelemetryConfig::from_env())?;
///     // ... your application code
///     Ok(())
/// }
/// ```
pub fn init_telemetry(
    config: TelemetryConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr)
        .with_filter(config.env_filter());

    tracing_subscriber::registry().with(console_layer).try_init()?;

    tracing::debug!(filter = ?config.log_filter, "Logging initialized");
    Ok(())
}
