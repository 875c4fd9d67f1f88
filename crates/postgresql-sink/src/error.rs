//! Mapping of driver and pool failures onto [`SyncError`].

use std::future::Future;
use std::time::Duration;

use sync_core::{SyncError, SyncResult};
use tokio_postgres::error::SqlState;

/// SQLSTATEs worth retrying: the same statement may succeed on a fresh attempt.
const TRANSIENT_STATES: &[SqlState] = &[
    SqlState::T_R_SERIALIZATION_FAILURE,
    SqlState::T_R_DEADLOCK_DETECTED,
    SqlState::ADMIN_SHUTDOWN,
    SqlState::CRASH_SHUTDOWN,
    SqlState::CANNOT_CONNECT_NOW,
    SqlState::TOO_MANY_CONNECTIONS,
    SqlState::CONNECTION_EXCEPTION,
    SqlState::CONNECTION_FAILURE,
    SqlState::QUERY_CANCELED,
];

pub(crate) fn pg_error(context: &str, e: tokio_postgres::Error) -> SyncError {
    let message = match e.as_db_error() {
        Some(db) => format!("{context}: {} ({})", db.message(), db.code().code()),
        None => format!("{context}: {e}"),
    };
    match e.code() {
        Some(code) if TRANSIENT_STATES.contains(code) => SyncError::transient_destination(message),
        Some(_) => SyncError::destination(message),
        // No SQLSTATE means the failure happened below the protocol (socket, TLS, closed connection)
        None => SyncError::transient_destination(message),
    }
}

pub(crate) fn pool_error(e: deadpool_postgres::PoolError) -> SyncError {
    SyncError::transient_destination(format!("Failed to check out PostgreSQL connection: {e}"))
}

/// Run one round trip under the operation deadline.
pub(crate) async fn with_deadline<T, F>(operation: &str, deadline: Duration, fut: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(operation.to_string())),
    }
}
