//! Logging utilities for structured tracing

use std::time::Instant;

/// Track operation timing and log on drop
pub struct Timer {
    start: Instant,
    operation: String,
}

impl Timer {
    /// Create a new timer for an operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.into(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        tracing::debug!(
            operation = %self.operation,
            duration_ms = duration_ms,
            "Operation completed"
        );
    }
}

/// Log an error with structured context
pub fn log_error(operation: &str, error: &crate::RelayError) {
    tracing::error!(
        operation = %operation,
        error = %error,
        error_kind = error.kind(),
        "Operation failed"
    );
}

/// Mask a secret token so it can appear in logs
///
/// Tokens of 8 characters or fewer are fully hidden.
pub fn mask_token(token: &str) -> String {
    if token.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Map a configured log level onto a default `EnvFilter` directive
pub fn filter_directive(level: &str) -> String {
    let level = match level.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    format!("gotify_telegram_relay={level},warn")
}
