//! Logging initialization.
//!
//! Diagnostics always go to stderr: stdout carries nothing but the
//! startup port line.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither the configuration nor `RUST_LOG` names one.
pub const DEFAULT_FILTER: &str = "pty_server=info";

fn build_filter(filter: &str) -> EnvFilter {
    if filter.is_empty() {
        return EnvFilter::new(DEFAULT_FILTER);
    }
    // A bare level ("debug") applies to this crate only; full directives pass through.
    let directive = if filter.contains('=') || filter.contains(',') {
        filter.to_string()
    } else {
        format!("pty_server={}", filter)
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the logging system.
///
/// # Panics
///
/// Panics if a global tracing subscriber has already been set.
pub fn init(filter: &str, color: bool) {
    tracing_subscriber::registry()
        .with(build_filter(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(color)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Try to initialize the logging system.
///
/// Returns `Err` if logging has already been initialized.
pub fn try_init(filter: &str, color: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(build_filter(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(color)
                .with_writer(std::io::stderr),
        )
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_scoped_to_crate() {
        let filter = build_filter("debug");
        assert_eq!(filter.to_string(), "pty_server=debug");
    }

    #[test]
    fn test_directives_pass_through() {
        let filter = build_filter("pty_server=trace,tower_http=debug");
        let rendered = filter.to_string();
        assert!(rendered.contains("pty_server=trace"));
        assert!(rendered.contains("tower_http=debug"));
    }

    #[test]
    fn test_empty_uses_default() {
        assert_eq!(build_filter("").to_string(), DEFAULT_FILTER);
    }

    #[test]
    fn test_try_init_idempotent() {
        let _ = try_init("info", false);
        // Second call reports the existing subscriber instead of panicking.
        let _ = try_init("info", false);
        tracing::info!("logging initialized for tests");
    }
}
