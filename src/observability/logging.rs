use crate::constants;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes logging: console output on stderr plus, when `log_dir` is set,
/// JSON lines in a daily rolling file.
///
/// The returned guard must be held until exit so buffered file logs are flushed.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            // Ensure logs directory exists
            let _ = fs::create_dir_all(dir);

            let file_appender = tracing_appender::rolling::daily(dir, constants::LOG_FILE_NAME);
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
            (Some(fmt::layer().json().with_writer(non_blocking_writer)), Some(guard))
        }
        None => (None, None),
    };

    // Stdout is reserved for the run summary
    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    // Respect RUST_LOG if set; otherwise info for our crates, warn for dependencies
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("swath_dispatch=info,dispatch=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}
