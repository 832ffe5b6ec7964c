//! Tracing subscriber setup for the patch-tracker binary.
//!
//! [`init_tracing`] installs a global subscriber with an `EnvFilter` and
//! either human-readable or JSON output. Later calls are ignored because a
//! process can only have one global subscriber.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Dependencies that are noisy at `debug` and below.
const QUIET_TARGETS: &[&str] = &["surrealdb", "surrealkv", "hyper", "hyper_util", "reqwest", "rustls"];

/// Filter directives used when `RUST_LOG` is unset: `level` for our own
/// crates, `warn` for chatty dependencies.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Install the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON, one object per event.
/// * `level`: default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(false)).try_init().ok();
    }
}
