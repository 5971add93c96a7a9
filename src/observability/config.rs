//! Logging Configuration
//!
//! All settings are loaded from environment variables for 12-factor compliance.

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for terminals
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Logging configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Line format (AUDIT_ARCHIVE_LOG_FORMAT, default: pretty)
    pub format: LogFormat,
    /// `EnvFilter` directives (RUST_LOG, default: info)
    pub filter: String,
    /// Include the module path of each event (default: true)
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        LoggingConfig {
            format: std::env::var("AUDIT_ARCHIVE_LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(LogFormat::Pretty),
            filter: std::env::var("RUST_LOG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "info".to_string()),
            with_target: std::env::var("AUDIT_ARCHIVE_LOG_TARGET")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }

    /// Configuration for tests: everything from this crate at debug
    pub fn test() -> Self {
        LoggingConfig {
            format: LogFormat::Pretty,
            filter: "audit_archive=debug".to_string(),
            with_target: true,
        }
    }
}
