//! Bounding external calls in time.

use std::future::Future;
use std::time::Duration;

use crate::error::{RagError, Result};

/// Await `future`, turning an elapsed `limit` into the error built by `on_elapsed`.
pub(crate) async fn with_timeout<T, F>(
    limit: Duration,
    future: F,
    on_elapsed: impl FnOnce() -> RagError,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, future).await.unwrap_or_else(|_| Err(on_elapsed()))
}
