use std::sync::{Arc, Mutex};

use tracing::{Subscriber, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::TelemetryError;
use crate::memory::{InMemoryTraceLayer, SharedTraceStorage};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Service that installed the global subscriber, if any.
static INSTALLED: Mutex<Option<String>> = Mutex::new(None);

fn env_filter() -> Result<EnvFilter, TelemetryError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::try_new(&directive)
            .map_err(|e| TelemetryError::InvalidFilter { directive, message: e.to_string() }),
        _ => Ok(EnvFilter::new(DEFAULT_FILTER)),
    }
}

/// Run `install` once per process; later calls are no-ops.
fn install_once(
    service_name: &str,
    install: impl FnOnce() -> Result<(), TelemetryError>,
) -> Result<(), TelemetryError> {
    let mut installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    if installed.is_some() {
        return Ok(());
    }
    install()?;
    *installed = Some(service_name.to_string());
    info!(service.name = service_name, "telemetry initialized");
    Ok(())
}

/// Install human-readable logging to stderr, filtered by `RUST_LOG`
/// (default `info`).
///
/// Calling it again, or after another `init_*` function, does nothing.
pub fn init_telemetry(service_name: &str) -> Result<(), TelemetryError> {
    install_once(service_name, || {
        tracing_subscriber::registry()
            .with(env_filter()?)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init()
            .map_err(|e| TelemetryError::Init(e.to_string()))
    })
}

/// Install JSON-lines logging to stderr, one object per event with the
/// current span list.
pub fn init_json_telemetry(service_name: &str) -> Result<(), TelemetryError> {
    install_once(service_name, || {
        tracing_subscriber::registry()
            .with(env_filter()?)
            .with(fmt::layer().json().with_current_span(true).with_span_list(true).with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| TelemetryError::Init(e.to_string()))
    })
}

/// Install stderr logging plus an [`InMemoryTraceLayer`] writing to `storage`.
pub fn init_with_storage(
    service_name: &str,
    storage: Arc<SharedTraceStorage>,
) -> Result<(), TelemetryError> {
    install_once(service_name, || {
        tracing_subscriber::registry()
            .with(InMemoryTraceLayer::new(storage))
            .with(env_filter()?)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| TelemetryError::Init(e.to_string()))
    })
}

/// A subscriber that only captures spans into `storage`.
///
/// Meant for scoped use with [`tracing::subscriber::set_default`] or
/// [`tracing::subscriber::with_default`], so tests don't compete for the
/// global subscriber.
pub fn capture_subscriber(storage: Arc<SharedTraceStorage>) -> impl Subscriber + Send + Sync {
    tracing_subscriber::registry().with(InMemoryTraceLayer::new(storage))
}

/// The service name passed to the `init_*` call that installed logging.
pub fn installed_service() -> Option<String> {
    INSTALLED.lock().unwrap_or_else(|e| e.into_inner()).clone()
}
