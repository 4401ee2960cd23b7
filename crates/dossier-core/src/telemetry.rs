//! Centralised tracing initialisation for dossier binaries.
//!
//! Call [`init_tracing`] once at program start. Logs always go to stderr so
//! the rendered dossier can be piped from stdout.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// HTTP plumbing is chatty at debug; keep it at warn unless `RUST_LOG` asks.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

fn default_directives(level: Level) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Initialise the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. With `json`, every line is a JSON
/// object carrying the structured fields (`event`, `run_id`, ...).
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    // Already installed by an earlier call or a test harness.
    installed.ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_http_stack() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
    }

    #[test]
    fn test_init_tracing_twice_does_not_panic() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
