//! Logging setup for binaries embedding this crate.

use std::path::Path;

use lcow_shared::LcowResult;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// File name used when logging to a directory.
pub const LOG_FILE_NAME: &str = "lcow.log";

/// Initialize tracing.
///
/// With `log_dir`, logs go to `{log_dir}/lcow.log`; otherwise to stderr.
/// The filter comes from `RUST_LOG` and defaults to `info`. If the host
/// process already installed a global subscriber, that one is left in place.
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init_logging(log_dir: Option<&Path>) -> LcowResult<WorkerGuard> {
    let (writer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE_NAME))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Module targets tell scratch, archive and diagnostics events apart.
    let layer = fmt::layer().with_writer(writer).with_target(true).with_ansi(false);

    if tracing_subscriber::registry().with(env_filter).with(layer).try_init().is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }

    Ok(guard)
}
