//! Logging setup.
//!
//! Installs a tracing subscriber writing to stderr, systemd's journal or a
//! daily rolling file, depending on the configured target.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogTarget, LoggingConfig};

/// Initialize the logging system.
///
/// Log level can be controlled via the `FACEGATHER_LOG` environment variable:
/// - `FACEGATHER_LOG=debug` to see every candidate decision
/// - `FACEGATHER_LOG=info` for run milestones (default)
/// - `FACEGATHER_LOG=warn` for skipped items and errors only
pub fn init(config: &LoggingConfig, default_dir: PathBuf) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("FACEGATHER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    match config.target {
        LogTarget::Stderr => init_stderr(env_filter),
        LogTarget::Journald => {
            #[cfg(target_os = "linux")]
            {
                if let Ok(journald_layer) = tracing_journald::layer() {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(journald_layer)
                        .init();

                    tracing::info!("Logging initialized with journald backend");
                    return Ok(());
                }
            }

            init_stderr(env_filter)?;
            tracing::warn!("journald unavailable, logging to stderr");
            Ok(())
        }
        LogTarget::File => {
            let log_dir = config.dir.clone().unwrap_or(default_dir);
            std::fs::create_dir_all(&log_dir)?;

            let file_appender = tracing_appender::rolling::daily(&log_dir, "facegather.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // The guard flushes on drop, so it has to outlive every log call
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();

            tracing::info!("Logging initialized with file backend at {:?}", log_dir);
            Ok(())
        }
    }
}

fn init_stderr(env_filter: EnvFilter) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}
