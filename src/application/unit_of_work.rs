use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::storage::Unit;

use super::LedgerError;

/// The instant a unit started now must finish its work by, if it has a limit.
/// Time spent waiting for a pooled connection counts against it.
pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|limit| Instant::now() + limit)
}

/// End a unit according to the outcome of the work done in it: commit on
/// success, roll back on failure. The work's own error always wins over a
/// failed rollback.
///
/// Must not run under a deadline: a COMMIT already sent lands even if the
/// caller stops waiting for it.
pub(crate) async fn settle<T>(
    mut unit: Unit,
    result: Result<T, LedgerError>,
) -> Result<T, LedgerError> {
    match result {
        Ok(value) => {
            unit.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = unit.rollback().await {
                tracing::warn!(error = %format!("{rollback_err:#}"), "rollback failed");
            }
            Err(err)
        }
    }
}

/// Run the work of a unit (lock waits included) until `deadline`. When the
/// deadline passes the work future is dropped and `StorageUnavailable` is
/// returned; the caller still owns the unit and rolls it back with `settle`.
///
/// Only wrap work that runs inside an open unit. BEGIN and COMMIT are not
/// cancellable here.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Instant>,
    work: F,
) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, work).await.map_err(|_| {
            LedgerError::StorageUnavailable(anyhow::anyhow!(
                "unit of work ran past its deadline"
            ))
        })?,
        None => work.await,
    }
}
