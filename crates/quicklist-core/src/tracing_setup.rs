use std::fs::OpenOptions;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_VAR: &str = "QUICKLIST_LOG_FILE";

pub fn init_tracing() {
    init_tracing_with_service("quicklist");
}

/// Stderr logging filtered by `RUST_LOG` (default `info`), plus a DEBUG file
/// layer when `QUICKLIST_LOG_FILE` names a writable path.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing_with_service(service_name: &str) {
    let file_logging = std::env::var(LOG_FILE_VAR).ok();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let registry = tracing_subscriber::registry().with(stderr_layer);

    let file = file_logging.as_deref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("Could not open log file {}: {}", path, e))
            .ok()
    });

    let installed = match file {
        Some(file) => {
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG);
            registry.with(file_layer).try_init()
        }
        None => registry.try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(service = service_name, "tracing initialized");
    }
}
