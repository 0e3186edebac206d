use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, SegGraphError};

/// Installs a stderr `fmt` subscriber.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| SegGraphError::Config(format!("invalid log level: {e}")))?,
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| SegGraphError::Config("logging already initialized".into()))
}
