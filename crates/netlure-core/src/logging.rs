use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writers alive. Dropping this flushes and
/// stops file logging, so the binary holds it for its whole lifetime.
pub struct LoggingGuards {
    _file_guards: Vec<WorkerGuard>,
}

/// Console plus daily-rolled file logging under `<state_dir>/logs`.
///
/// The filter honors `NETLURE_LOG` and falls back to `info`. When the
/// log directory cannot be created the appliance still runs with
/// console logging only.
pub fn init_logging(state_dir: &Path) -> Result<LoggingGuards> {
    let filter = EnvFilter::try_from_env("NETLURE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .compact();

    let base = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer);

    let mut guards = Vec::new();
    let log_dir = state_dir.join("logs");

    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        base.try_init().ok();
        tracing::warn!("File logging disabled ({}): {}", log_dir.display(), err);
        return Ok(LoggingGuards {
            _file_guards: guards,
        });
    }

    let appender = tracing_appender::rolling::daily(&log_dir, "netlure.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(false)
        .compact()
        .with_writer(writer);
    guards.push(guard);

    base.with(file_layer).try_init().ok();

    Ok(LoggingGuards {
        _file_guards: guards,
    })
}
