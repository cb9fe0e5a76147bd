//! Console logging for the binaries.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Builds the filter: `RUST_LOG` when it is set and valid, otherwise every
/// target at `fallback_level`.
fn build_filter(rust_log: Option<&str>, fallback_level: &str) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(parse_level(fallback_level).into()))
}

/// Installs the global subscriber. Calling it a second time is a no-op.
pub fn init(fallback_level: &str) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref(), fallback_level);

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_is_case_insensitive_and_defaults_to_info() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level(" warning "), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn rust_log_takes_precedence_over_fallback() {
        let filter = build_filter(Some("subfeed=trace"), "error");
        assert!(filter.to_string().contains("subfeed=trace"));

        let filter = build_filter(Some("  "), "debug");
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init("info");
        init("debug");
    }
}
