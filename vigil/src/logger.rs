use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "vigil=info";
const DEBUG_FILTER: &str = "vigil=debug";

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `debug` picks between the info and
/// debug defaults. The returned guard must be held until exit so buffered
/// lines get flushed.
pub fn init(debug: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let default = if debug { DEBUG_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_line_number(true)
                .with_writer(non_blocking_writer),
        )
        .with(filter)
        .init();

    guard
}
