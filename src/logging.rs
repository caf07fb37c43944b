use std::fs;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::Subscriber;
use tracing_subscriber::EnvFilter;

use crate::errors::{LauncherError, Result};

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

const LOG_FILE_NAME: &str = "pipeline.log";

/// Daily rolling `pipeline.log` under `log_dir`. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME));
    let _ = LOG_GUARD.set(guard);

    install(writer, true)?;
    tracing::info!("logging to dir={}", log_dir.display());
    Ok(())
}

pub fn init_stderr() -> Result<()> {
    install(std::io::stderr, false)
}

fn install<W>(writer: W, with_location: bool) -> Result<()>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(with_location)
        .with_file(with_location)
        .with_line_number(with_location)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| LauncherError::Config(format!("logger already installed: {}", err)))
}
