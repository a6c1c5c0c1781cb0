//! Process-wide tracing subscriber, installed once.

use crate::prop::SystemProp;
use crate::resolver::ConfigResolver;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOGGING: OnceLock<bool> = OnceLock::new();

/// Installs the global tracing subscriber from `LOG_LEVEL` and `LOG_PRETTY`.
///
/// `RUST_LOG` takes precedence over `LOG_LEVEL` when set. Only the first call
/// does any work; it returns whether a subscriber was installed by us (false
/// if one was already registered elsewhere, e.g. by a test harness).
pub fn init(config: &ConfigResolver) -> bool {
    *LOGGING.get_or_init(|| {
        let level = config
            .get(SystemProp::LogLevel)
            .unwrap_or_else(|| "info".to_string());
        let pretty = config.get_boolean(SystemProp::LogPretty).unwrap_or(false);

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        tracing_subscriber::registry()
            .with(filter)
            .with(pretty.then(|| tracing_subscriber::fmt::layer().pretty()))
            .with((!pretty).then(|| tracing_subscriber::fmt::layer().compact()))
            .try_init()
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_stable() {
        let config = ConfigResolver::from_overrides([(SystemProp::LogLevel, "debug")])
            .expect("resolver");
        let first = init(&config);
        let second = init(&config);
        assert_eq!(first, second);
    }
}
