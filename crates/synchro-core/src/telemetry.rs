//! Tracing initialisation for synchro binaries.
//!
//! Call [`init_tracing`] once at startup. Later calls are ignored because the
//! global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` applies to every target.
/// With `json`, each event is written as one JSON line including the
/// enclosing pass span, so `pass_id` is searchable in log pipelines.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(true)).try_init().ok();
    }
}
