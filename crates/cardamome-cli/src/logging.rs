//! Tracing setup for the command line

use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Log to stderr, filtered by `RUST_LOG` (default `info`). Set
/// `CARDAMOME_LOG_TIME=none` to drop timestamps.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_time = std::env::var("CARDAMOME_LOG_TIME")
        .unwrap_or_default()
        .to_lowercase();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();
    match log_time.as_str() {
        "none" => {
            tracing_subscriber::registry()
                .with(fmt_layer.without_time().with_filter(filter))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(
                    fmt_layer
                        .with_timer(tracing_subscriber::fmt::time::uptime())
                        .with_filter(filter),
                )
                .init();
        }
    }
}
