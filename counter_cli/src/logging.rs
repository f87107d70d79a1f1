//! Console and file logging bootstrap.

use std::path::Path;

use eyre::WrapErr;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::FILE_GUARD;

fn rotation(policy: Option<&str>) -> rolling::Rotation {
    match policy {
        Some("daily") => rolling::Rotation::DAILY,
        Some("hourly") => rolling::Rotation::HOURLY,
        _ => rolling::Rotation::NEVER,
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
///
/// When `cfg.file` is set, a second JSON layer writes to that file through a
/// non-blocking appender whose guard is kept in [`FILE_GUARD`].
pub fn init(json: bool, level: &str, cfg: &counter_config::Logging) -> eyre::Result<()> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // console goes to stderr so stdout stays clean for replies
    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .boxed()
    };

    let file_layer = match cfg.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("creating log directory {}", dir.display()))?;
            let appender =
                rolling::RollingFileAppender::new(rotation(cfg.rotation.as_deref()), dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console.with_filter(filter()))
        .with(file_layer)
        .try_init()
        .map_err(|e| eyre::eyre!("installing log subscriber: {e}"))
}
