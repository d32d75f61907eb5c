//! Commit-or-rollback gate around one relational transaction.
//!
//! Callers run every write of a logical operation against the transaction,
//! collect the combined result, and hand both to [`TransactionGate::settle`].
//! A successful result commits; anything else rolls back. The returned
//! [`TxOutcome`] decides which blob cleanup branch the caller runs.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use atelier_core::{Error, Result};

/// Terminal state of a gated transaction.
#[derive(Debug)]
pub enum TxOutcome<T> {
    /// Every write succeeded and the commit went through.
    Committed(T),
    /// Rolled back. Carries the error that caused it.
    Aborted(Error),
}

impl<T> TxOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed(_))
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            TxOutcome::Committed(value) => Ok(value),
            TxOutcome::Aborted(err) => Err(err),
        }
    }
}

/// Opens transactions on the shared pool and settles them.
#[derive(Clone)]
pub struct TransactionGate {
    pool: SqlitePool,
}

impl TransactionGate {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Commit when `staged` is `Ok`, roll back otherwise.
    ///
    /// A failed commit becomes `Aborted` with the commit error. A failed
    /// rollback is logged and the original error is kept; SQLite discards
    /// the uncommitted writes when the connection drops them anyway.
    pub async fn settle<T>(tx: Transaction<'_, Sqlite>, staged: Result<T>) -> TxOutcome<T> {
        match staged {
            Ok(value) => match tx.commit().await {
                Ok(()) => {
                    debug!(subsystem = "db", component = "gate", outcome = "committed", "Transaction committed");
                    TxOutcome::Committed(value)
                }
                Err(e) => {
                    warn!(subsystem = "db", component = "gate", error = %e, "Commit failed");
                    TxOutcome::Aborted(Error::Database(e))
                }
            },
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        subsystem = "db",
                        component = "gate",
                        error = %rollback_err,
                        cause = %err,
                        "Rollback failed"
                    );
                }
                debug!(subsystem = "db", component = "gate", outcome = "aborted", cause = %err, "Transaction rolled back");
                TxOutcome::Aborted(err)
            }
        }
    }
}
