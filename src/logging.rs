//! Installs the process-wide `tracing` subscriber.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Builds the filter: `RUST_LOG` wins, then the configured level, then `info`.
pub fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(crate::defaults::LOG_LEVEL))
}

/// Installs a stderr fmt subscriber.
///
/// Returns false if a subscriber was already installed; the existing one is kept.
pub fn init(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(filter(config));
    let result = match config.format {
        LogFormat::Full => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig::default();
        init(&config);
        assert!(!init(&config));
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let config = LoggingConfig {
            level: "not a [valid filter".to_string(),
            format: LogFormat::Compact,
        };
        // Must not panic
        let _filter = filter(&config);
    }
}
