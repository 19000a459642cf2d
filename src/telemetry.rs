//! Tracing setup. Honors `RUST_LOG` for filtering and `GT_LOG_FORMAT=json`
//! for machine-readable output (agents scrape their own logs).

use tracing_subscriber::EnvFilter;

/// Guard returned from [`init`]; kept alive for the process lifetime.
pub struct Telemetry;

/// Install the global subscriber. Call once, first thing in `main`.
pub fn init() -> Telemetry {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let json = std::env::var("GT_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    Telemetry
}
