//! Logging initialization using the `tracing` ecosystem.
//!
//! Console output is always on; a daily-rotating file is added when a log
//! directory is given. `RUST_LOG` overrides the level passed in.

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogMeta;

/// Initialize the global tracing subscriber.
///
/// Call once at program start. Returns an error if a global subscriber is
/// already installed.
///
/// - `log_level`: default level when `RUST_LOG` is unset (e.g. `"info"`)
/// - `meta`: optional file settings; `log_path` enables the file layer and
///   `module_name` becomes the file prefix
pub fn init_logging(log_level: &str, meta: Option<&LogMeta>) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true);

    let file_layer = meta.and_then(|m| {
        let dir = m.log_path.as_deref()?;
        let prefix = m.module_name.as_deref().unwrap_or("odx");
        let appender = tracing_appender::rolling::daily(dir, prefix);
        let layer = if m.json {
            fmt::layer().json().with_writer(appender).with_target(true).boxed()
        } else {
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .boxed()
        };
        Some(layer)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;
    Ok(())
}
