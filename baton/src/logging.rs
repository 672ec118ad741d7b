//! Logging setup
//!
//! Library code only emits `tracing` events; embedding applications decide
//! where they go. These helpers install the subscriber the way the service
//! binaries do.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

fn build_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("baton=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("baton=info,warn"))
    }
}

/// Install the global subscriber, returning an error if one is already set
pub fn try_init_logging(verbose: bool, format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(build_filter(verbose));

    match format {
        LogFormat::Human => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }

    Ok(())
}

/// Initialize logging based on verbosity level.
///
/// A second call is a no-op.
pub fn init_logging(verbose: bool) {
    let _ = try_init_logging(verbose, LogFormat::Human);
}
