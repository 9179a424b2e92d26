//! Cancellation plumbing.
//!
//! A single `CancellationToken` is created at process start and cancelled by
//! the signal listener; every blocking await in command bodies races against
//! it so that SIGINT/SIGTERM unwinds through normal error propagation and
//! cleanup guards run.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, TraceError};

/// Race `fut` against the token; a cancellation wins and surfaces as
/// [`TraceError::Cancelled`].
pub async fn with_cancel<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = token.cancelled() => Err(TraceError::Cancelled),
        result = fut => result,
    }
}
