//! Process-wide tracing setup for the library and the `agentix-run` binary.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::ObservabilityConfig;

/// Environment switch for JSON output when no configuration is at hand.
pub const LOG_FORMAT_ENV: &str = "AGENTIX_LOG_FORMAT";

static SUBSCRIBER: OnceLock<bool> = OnceLock::new();

/// Install the subscriber with default settings.
///
/// `AGENTIX_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() -> bool {
    let config = ObservabilityConfig {
        json_logs: std::env::var(LOG_FORMAT_ENV)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false),
        ..ObservabilityConfig::default()
    };
    init_tracing_with(&config)
}

/// Install the subscriber once per process.
///
/// `RUST_LOG` overrides `log_level`. Later calls are no-ops; the return value
/// tells whether this process owns the global subscriber.
pub fn init_tracing_with(config: &ObservabilityConfig) -> bool {
    *SUBSCRIBER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let json = config.json_logs;

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(json.then(|| fmt::layer().json()))
            .with((!json).then(|| fmt::layer().compact()))
            .try_init();

        match installed {
            Ok(()) => true,
            Err(err) => {
                eprintln!("tracing init skipped: {err}");
                false
            }
        }
    })
}
