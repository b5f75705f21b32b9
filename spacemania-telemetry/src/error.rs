use thiserror::Error;

/// Errors raised while installing the global tracing subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The `RUST_LOG` filter directive could not be parsed.
    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter {
        /// The directive that was rejected.
        directive: String,
        /// Why it was rejected.
        message: String,
    },

    /// Another global subscriber was installed outside this crate.
    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}
