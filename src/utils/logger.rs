use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt, fmt::time::UtcTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::error::{AppError, AppResult};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();
static LOGGER_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

const DEFAULT_LOG_DIRECTIVES: &str =
    "info,engine::optimizer=info,engine::suggest=info,engine::cache=warn,engine::scoring=info";
const LOG_FILE_PREFIX: &str = "therapy-scheduler.log";

fn directives() -> AppResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES))
        .map_err(|err| AppError::other(format!("invalid log directives: {err}")))
}

/// Installs the global subscriber: a daily rolling file under `log_dir` plus
/// stderr. Later calls are no-ops once installation has succeeded; a failed
/// attempt (another subscriber already installed) can be retried.
pub fn init_logging(log_dir: &Path) -> AppResult<()> {
    LOGGER_INIT
        .get_or_try_init(|| {
            std::fs::create_dir_all(log_dir)?;

            let (file_writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX));
            let file_layer = fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339());
            let console_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_timer(UtcTime::rfc_3339());

            tracing_subscriber::registry()
                .with(directives()?)
                .with(file_layer)
                .with(console_layer)
                .try_init()
                .map_err(|err| AppError::other(format!("failed to install subscriber: {err}")))?;

            // The writer thread lives as long as the guard; keep it for the process.
            if LOGGER_GUARD.set(guard).is_err() {
                tracing::warn!(target: "engine::logging", "log writer guard was already stored");
            }
            tracing::info!(target: "engine::logging", log_dir = %log_dir.display(), "logging initialized");
            Ok(())
        })
        .map(|_| ())
}
