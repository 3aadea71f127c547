//! Logging setup for the worker binary.
//!
//! Console output goes to stderr. When a log folder is configured, the same
//! events are also written to a daily rolling file through a non-blocking
//! writer. `RUST_LOG` overrides the configured level.

use crate::config::LoggingSettings;
use std::fs;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "tq-worker.log";

/// Level used when `RUST_LOG` is unset.
pub fn default_directive(settings: &LoggingSettings, verbose: bool) -> &str {
    if verbose {
        "debug"
    } else {
        &settings.level
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for as long as logging is needed.
pub fn init(settings: &LoggingSettings, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let directive = default_directive(settings, verbose);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directive))?;

    let (file_layer, guard) = match &settings.folder {
        Some(folder) => {
            fs::create_dir_all(folder)?;
            let appender = tracing_appender::rolling::daily(folder, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console = fmt::layer().with_writer(io::stderr).with_target(false);
    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if settings.json {
        registry.with(console.json()).try_init()?;
    } else {
        registry.with(console).try_init()?;
    }

    Ok(guard)
}
