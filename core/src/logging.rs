//! Log subscriber setup for binaries and tests embedding the crawler.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application. `init` is a convenience that prints
//! `time level [thread id] target: message` lines to stderr.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (e.g.
/// `"crawler_core=debug"`) is used. Fails if a global subscriber is already
/// installed.
pub fn init(default_filter: &str) -> Result<(), TryInitError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_error() {
        // The first call may lose to another test in this process; the
        // second always finds a subscriber in place.
        let _ = init("crawler_core=debug");
        assert!(init("crawler_core=debug").is_err());
    }
}
