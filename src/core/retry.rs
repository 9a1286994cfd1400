//! Bounded retry of atomic units.
//!
//! [`atomic!`] runs a block inside a database transaction, commits on
//! success and rolls back (by dropping the transaction) on error. Lock waits,
//! busy databases and handover-key collisions are retried up to
//! `max_attempts` times before surfacing as
//! [`Error::ConcurrencyConflict`].
//!
//! On `SQLite` every unit claims the write lock with its first statement.
//! Units then queue on the busy timeout behind the current writer; none of
//! them holds a read snapshot that would have to be upgraded later.

use crate::errors::{Error, Result};
use sea_orm::{ConnectionTrait, DbBackend};
use std::time::Duration;
use tracing::warn;

/// Outcome of one attempt.
pub(crate) enum Attempt<T> {
    Done(Result<T>),
    Retry,
}

/// Decides whether a finished attempt is final.
pub(crate) fn settle<T>(
    outcome: Result<T>,
    attempt: u32,
    max_attempts: u32,
    operation: &str,
) -> Attempt<T> {
    let outcome = outcome.map_err(|err| match err {
        Error::Database(db_err) => Error::classify_db(db_err),
        other => other,
    });

    match outcome {
        Err(err) if err.is_retryable() => {
            if attempt < max_attempts {
                warn!(operation, attempt, error = %err, "Conflict, retrying atomic unit");
                Attempt::Retry
            } else {
                warn!(operation, attempt, "Conflict persisted, giving up");
                Attempt::Done(Err(Error::ConcurrencyConflict { attempts: attempt }))
            }
        }
        other => Attempt::Done(other),
    }
}

/// Takes the `SQLite` write lock without changing any row.
pub(crate) async fn claim_writer<C>(conn: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    if conn.get_database_backend() == DbBackend::Sqlite {
        conn.execute_unprepared("UPDATE tags SET id = id WHERE 0").await?;
    }
    Ok(())
}

/// Pause before the next attempt; grows linearly with the attempt number.
pub(crate) fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(10 * u64::from(attempt))
}

/// Run a block inside a DB transaction, committing on success and rolling
/// back on error, retrying transient conflicts.
///
/// `atomic!(ledger, "operation", |txn| body)` where `body` evaluates to a
/// `Result<T>` and may borrow `txn`.
macro_rules! atomic {
    ($ledger:expr, $operation:expr, |$tx:ident| $body:expr) => {{
        let mut attempt: u32 = 1;
        loop {
            let outcome = async {
                let $tx = sea_orm::TransactionTrait::begin($ledger.database()).await?;
                $crate::core::retry::claim_writer(&$tx).await?;
                let value = $body?;
                $tx.commit().await?;
                Ok::<_, $crate::errors::Error>(value)
            }
            .await;

            match $crate::core::retry::settle(
                outcome,
                attempt,
                $ledger.settings().max_attempts,
                $operation,
            ) {
                $crate::core::retry::Attempt::Done(result) => break result,
                $crate::core::retry::Attempt::Retry => {
                    tokio::time::sleep($crate::core::retry::backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use atomic;
