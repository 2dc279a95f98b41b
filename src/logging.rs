use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOG_FILE: &str = "worker.log";

/// Log to stderr and to a daily rotated file under the configured log
/// directory. `RUST_LOG` wins over `verbose`.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(config: &Config, verbose: bool) -> Result<WorkerGuard> {
  let log_dir = config.log_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(&log_dir, LOG_FILE));

  let default_level = if verbose { "debug" } else { "info" };
  let env_filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(format!("libsys_worker={}", default_level)));

  let file_layer = fmt::layer()
    .with_writer(file_writer)
    .with_ansi(false)
    .with_target(false);

  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .compact();

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
