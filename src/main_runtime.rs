use strategos::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,strategos=debug,sqlx=warn";

/// Full logging for the long-running engine: console plus a daily rolling
/// file when the log directory is writable.
pub fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // Prefer STRATEGOS_LOG_DIR, then logging.dir
    let log_dir = std::env::var("STRATEGOS_LOG_DIR")
        .ok()
        .or_else(|| cfg.dir.clone());

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial file, so writability is checked first.
    let file_layer = log_dir.as_deref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("Warning: Could not create log directory {log_dir} ({e}), file logging disabled");
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".strategos_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(log_dir, "strategos.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Guard lives for the rest of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {log_dir} ({e}), file logging disabled"
                );
                None
            }
        }
    });

    let (console_plain, console_json) = if cfg.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_plain)
        .with(console_json)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {dir}/strategos.log");
    }
}

/// Minimal logging for one-shot CLI commands
pub fn init_logging_simple(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,strategos={}", cfg.level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
