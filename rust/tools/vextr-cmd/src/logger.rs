//! Log output for the command-line driver.
//!
//! The libraries log through the `log` facade; the subscriber's `tracing-log` bridge
//! forwards those records to stderr.

use tracing_subscriber::{EnvFilter, filter::LevelFilter};

/// Maps the number of `-v` flags to the most verbose level shown. Warnings and
/// errors are always shown.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber. `RUST_LOG` directives, when set, refine the level
/// chosen by `verbosity`.
pub fn init(verbosity: u8) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_for(verbosity).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for(0), LevelFilter::WARN);
        assert_eq!(level_for(1), LevelFilter::INFO);
        assert_eq!(level_for(2), LevelFilter::DEBUG);
        assert_eq!(level_for(3), LevelFilter::TRACE);
        assert_eq!(level_for(u8::MAX), LevelFilter::TRACE);
    }
}
