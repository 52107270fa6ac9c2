//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Map a verbosity count to a default filter directive.
///
/// 0 = info, 1 = debug for this crate, 2+ = trace for this crate.
pub fn filter_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "info,incident_intake=debug",
        _ => "debug,incident_intake=trace",
    }
}

/// Install a global fmt subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `verbosity`. Calling this twice is
/// harmless; the second install is ignored.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for_verbosity(verbosity)));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}
