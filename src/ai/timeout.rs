//! Caller-Side Deadlines
//!
//! The orchestrator itself never times out a request: an in-flight call is
//! never aborted, so rate accounting stays in step with remote usage. Callers
//! that need a hard deadline wrap their call here.
//!
//! ```ignore
//! let report = with_timeout(
//!     Duration::from_secs(300),
//!     orchestrator.complete(system, user, kind, true),
//!     "report generation",
//! ).await?;
//! ```
//!
//! An expired deadline only drops the caller's interest; a chunk already
//! handed to the queue still runs to completion.

use std::future::Future;
use std::time::Duration;

use crate::types::{RelayError, Result};

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::timeout(operation_name, timeout)),
    }
}

/// Like `with_timeout`, when no deadline means waiting indefinitely
pub async fn with_optional_timeout<T, F>(
    timeout: Option<Duration>,
    future: F,
    operation_name: &str,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(timeout) => with_timeout(timeout, future, operation_name).await,
        None => future.await,
    }
}
