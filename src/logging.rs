//! Logging sink and payload redaction
//!
//! All adapter logging goes through [`log`], which strips inline
//! `base64://` payloads so encoded file contents never reach the log output.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Replacement emitted in place of a redacted payload
pub const REDACTED_PLACEHOLDER: &str = "base64://...";

fn base64_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"base64://[^,"\]]+"#).expect("valid redaction pattern"))
}

/// Replace every inline `base64://` payload with [`REDACTED_PLACEHOLDER`]
pub fn redact(text: &str) -> Cow<'_, str> {
    base64_pattern().replace_all(text, REDACTED_PLACEHOLDER)
}

/// Emit `message` at `level`, tagged with `source`, after redaction
pub fn log(level: Level, message: &str, source: &str) {
    let message = redact(message);
    match level {
        Level::ERROR => tracing::error!(source, "{}", message),
        Level::WARN => tracing::warn!(source, "{}", message),
        Level::INFO => tracing::info!(source, "{}", message),
        Level::DEBUG => tracing::debug!(source, "{}", message),
        Level::TRACE => tracing::trace!(source, "{}", message),
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `verbose` when set.
pub fn init(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tasker={},tower_http=info", log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
