//! The storage interface the relation engine runs against.
//!
//! The engine never talks SQL directly. It needs a minimal CRUD surface
//! (bulk insert, filtered delete, filtered/projected/ordered query), a way to
//! create tables once, and transactions. Hosts implement [`Store`] on top of
//! their own connection type; `polylink-memory` ships an in-memory one.
//!
//! All calls are synchronous. Cancellation and timeouts are whatever the
//! implementation's underlying calls do; errors are propagated unchanged.

use crate::error::Result;
use crate::filter::{Filter, Query};
use crate::row::Row;
use crate::table::TableDef;

/// A relational store reachable through a minimal CRUD interface.
///
/// Implementations use interior mutability so a store can be shared by
/// reference between managers and coordinators.
pub trait Store {
    /// Create a table. Creating a table that already exists with the same
    /// definition is not an error.
    fn create_table(&self, table: &TableDef) -> Result<()>;

    /// Insert all rows in one statement and return the number inserted.
    ///
    /// Either every row is inserted or none is (a unique violation on any row
    /// fails the whole call).
    fn insert_many(&self, table: &str, rows: Vec<Row>) -> Result<u64>;

    /// Delete every row matching `filter` and return the number deleted.
    fn delete_where(&self, table: &str, filter: &Filter) -> Result<u64>;

    /// Run a read.
    fn query(&self, query: &Query) -> Result<Vec<Row>>;

    /// Begin a transaction. Nested calls open nested scopes.
    fn begin(&self) -> Result<()>;

    /// Commit the innermost transaction scope.
    fn commit(&self) -> Result<()>;

    /// Roll back the innermost transaction scope.
    fn rollback(&self) -> Result<()>;
}

/// Run `f` as one atomic unit against `store`.
///
/// Commits when `f` succeeds; rolls back and returns the original error
/// when it fails. A rollback failure is logged, not returned, so the caller
/// sees the error that caused it.
pub fn atomic<S, T, F>(store: &S, f: F) -> Result<T>
where
    S: Store + ?Sized,
    F: FnOnce() -> Result<T>,
{
    store.begin()?;
    match f() {
        Ok(value) => match store.commit() {
            Ok(()) => Ok(value),
            Err(err) => {
                if let Err(rollback_err) = store.rollback() {
                    tracing::warn!(error = %rollback_err, "Rollback after failed commit failed");
                }
                Err(err)
            }
        },
        Err(err) => {
            if let Err(rollback_err) = store.rollback() {
                tracing::warn!(error = %rollback_err, "Rollback after failed atomic block failed");
            }
            Err(err)
        }
    }
}
