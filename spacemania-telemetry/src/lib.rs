//! Logging and tracing setup for Spacemania.
//!
//! - [`init_telemetry`] / [`init_json_telemetry`] install a global
//!   `tracing-subscriber` with an `EnvFilter` read from `RUST_LOG`.
//! - [`InMemoryTraceLayer`] stores closed spans in a [`SharedTraceStorage`]
//!   keyed by the `build.id` / `query.id` field of the pipeline run they
//!   belong to, so tests can check which stages ran.

mod error;
mod init;
pub mod memory;

pub use error::TelemetryError;
pub use init::{
    capture_subscriber, init_json_telemetry, init_telemetry, init_with_storage, installed_service,
};
pub use memory::{DEFAULT_KEY_FIELDS, InMemoryTraceLayer, SharedTraceStorage, SpanData};

// Re-export tracing for convenience
pub use tracing::{debug, error, info, instrument, trace, warn};

#[cfg(test)]
mod test_inmemory;
#[cfg(test)]
mod test_serialization;
