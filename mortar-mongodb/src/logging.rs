//! Logging setup.
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! application installs a subscriber. With the `tracing-subscriber` feature,
//! [`init`] installs one driven by environment variables:
//!
//! - `MORTAR_DEBUG=true|1|yes` - log at debug level
//! - `MORTAR_LOG_LEVEL=trace|debug|info|warn|error` - explicit level
//! - `MORTAR_LOG_FORMAT=json|pretty|compact` - output format (default: json)
//!
//! ```rust,no_run
//! use mortar_mongodb::logging;
//!
//! logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "MORTAR_DEBUG";
const LEVEL_VAR: &str = "MORTAR_LOG_LEVEL";
const FORMAT_VAR: &str = "MORTAR_LOG_FORMAT";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line, human oriented.
    Pretty,
    /// Single line per event.
    Compact,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("pretty") => Self::Pretty,
            Some("compact") => Self::Compact,
            _ => Self::Json,
        }
    }
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Level directive applied to the mortar crates.
    pub level: &'static str,
    /// Output format.
    pub format: LogFormat,
    /// Whether logging was requested at all.
    pub enabled: bool,
}

impl LogSettings {
    /// Read `MORTAR_DEBUG`, `MORTAR_LOG_LEVEL` and `MORTAR_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::resolve(
            env::var(DEBUG_VAR).ok().as_deref(),
            env::var(LEVEL_VAR).ok().as_deref(),
            env::var(FORMAT_VAR).ok().as_deref(),
        )
    }

    fn resolve(debug: Option<&str>, level: Option<&str>, format: Option<&str>) -> Self {
        let debug = debug
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        let fallback = if debug { "debug" } else { "warn" };
        let requested = level.is_some();

        let level = match level.map(str::to_lowercase).as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => fallback,
        };

        Self {
            level,
            format: LogFormat::parse(format),
            enabled: debug || requested,
        }
    }
}

/// Check if `MORTAR_DEBUG` asks for debug logging.
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Install a subscriber configured from the environment.
///
/// Does nothing unless `MORTAR_DEBUG` or `MORTAR_LOG_LEVEL` is set. Only the
/// first call has an effect.
pub fn init() {
    let settings = LogSettings::from_env();
    if settings.enabled {
        install(settings);
    }
}

/// Install a subscriber at `level`, ignoring the level variables.
pub fn init_with_level(level: &str) {
    let settings = LogSettings::resolve(None, Some(level), env::var(FORMAT_VAR).ok().as_deref());
    install(LogSettings {
        enabled: true,
        ..settings
    });
}

/// Install a debug-level subscriber.
pub fn init_debug() {
    init_with_level("debug");
}

#[cfg(feature = "tracing-subscriber")]
fn install(settings: LogSettings) {
    INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = EnvFilter::try_new(format!(
            "mortar={level},mortar_mongodb={level}",
            level = settings.level
        ))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

        let registry = tracing_subscriber::registry().with(filter);
        match settings.format {
            LogFormat::Json => registry.with(fmt::layer().json()).init(),
            LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
        }

        tracing::info!(level = settings.level, format = ?settings.format, "mortar logging initialized");
    });
}

#[cfg(not(feature = "tracing-subscriber"))]
fn install(_settings: LogSettings) {
    // Without the subscriber feature the application brings its own.
    INIT.call_once(|| {});
}
