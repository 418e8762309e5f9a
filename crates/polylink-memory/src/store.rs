//! In-memory store implementing `polylink_core::Store`.
//!
//! Tables keep rows in insertion order behind a mutex. Primary keys and
//! unique constraints from the table definition are enforced per insert
//! call; transactions are snapshot-based and nest like savepoints.

use polylink_core::{
    AnyModel, Error, Filter, Query, Result, Row, Store, StoreErrorKind, TableDef, Value,
    model_row,
};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Statement counters, for asserting round-trip counts in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `query` calls
    pub queries: u64,
    /// `insert_many` calls
    pub inserts: u64,
    /// `delete_where` calls
    pub deletes: u64,
    /// `begin` calls
    pub transactions: u64,
}

impl StoreStats {
    /// Reads and writes issued, excluding transaction control.
    pub fn statements(&self) -> u64 {
        self.queries + self.inserts + self.deletes
    }
}

/// Which call an injected failure hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Insert,
    Delete,
    Query,
    Commit,
}

#[derive(Debug, Clone)]
struct MemTable {
    def: TableDef,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemTable {
    fn new(def: TableDef) -> Self {
        Self {
            def,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    /// Column sets whose values must be unique, primary key first.
    fn unique_sets(&self) -> Vec<Vec<String>> {
        let mut sets = Vec::new();
        if let Some(pk) = self.def.primary_key() {
            sets.push(vec![pk.name.clone()]);
        }
        sets.extend(self.def.unique.iter().cloned());
        sets
    }
}

/// Key of `row` over `columns`; `None` when any part is NULL (never conflicts).
fn unique_key(row: &Row, columns: &[String]) -> Option<Vec<Value>> {
    columns
        .iter()
        .map(|c| match row.get_by_name(c) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.clone()),
        })
        .collect()
}

#[derive(Debug, Default)]
struct MemoryInner {
    tables: HashMap<String, MemTable>,
    /// One saved copy of `tables` per open transaction scope
    snapshots: Vec<HashMap<String, MemTable>>,
    stats: StoreStats,
    fail_next: Option<FailPoint>,
}

impl MemoryInner {
    fn take_failure(&mut self, point: FailPoint) -> Result<()> {
        if self.fail_next == Some(point) {
            self.fail_next = None;
            tracing::debug!(point = ?point, "Injected store failure");
            return Err(Error::store(
                StoreErrorKind::Backend,
                None,
                format!("injected {:?} failure", point),
            ));
        }
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemTable> {
        self.tables.get_mut(name).ok_or_else(|| no_such_table(name))
    }
}

fn no_such_table(name: &str) -> Error {
    Error::store(
        StoreErrorKind::NotFound,
        Some(name),
        format!("no such table: {}", name),
    )
}

/// An embedded store holding all tables in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert one model object into its table.
    pub fn insert_object(&self, object: &dyn AnyModel) -> Result<()> {
        self.insert_many(object.table_name(), vec![model_row(object)])?;
        Ok(())
    }

    /// All rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of rows in `table` (0 if it does not exist).
    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    /// Counters since creation or the last reset.
    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    pub fn reset_stats(&self) {
        self.lock().stats = StoreStats::default();
    }

    /// Make the next call of the given kind fail with a backend error.
    pub fn fail_next(&self, point: FailPoint) {
        self.lock().fail_next = Some(point);
    }

    /// Number of open transaction scopes.
    pub fn transaction_depth(&self) -> usize {
        self.lock().snapshots.len()
    }
}

impl Store for MemoryStore {
    fn create_table(&self, table: &TableDef) -> Result<()> {
        let mut inner = self.lock();
        match inner.tables.get(&table.name) {
            Some(existing) if existing.def == *table => Ok(()),
            Some(_) => Err(Error::store(
                StoreErrorKind::Constraint,
                Some(&table.name),
                format!("table {} already exists with another definition", table.name),
            )),
            None => {
                tracing::debug!(table = %table.name, columns = table.columns.len(), "Creating table");
                inner
                    .tables
                    .insert(table.name.clone(), MemTable::new(table.clone()));
                Ok(())
            }
        }
    }

    fn insert_many(&self, table: &str, rows: Vec<Row>) -> Result<u64> {
        let mut inner = self.lock();
        inner.stats.inserts += 1;
        inner.take_failure(FailPoint::Insert)?;
        let mem = inner.table_mut(table)?;

        let auto_column = mem
            .def
            .columns
            .iter()
            .find(|c| c.auto_increment)
            .map(|c| c.name.clone());
        let mut next_id = mem.next_id;
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let row = match &auto_column {
                Some(col) if row.get_by_name(col).is_none_or(Value::is_null) => {
                    let row = row.with_value(col, Value::BigInt(next_id));
                    next_id += 1;
                    row
                }
                _ => row,
            };
            prepared.push(row);
        }

        for columns in mem.unique_sets() {
            let mut seen: HashSet<Vec<Value>> = mem
                .rows
                .iter()
                .filter_map(|r| unique_key(r, &columns))
                .collect();
            for row in &prepared {
                if let Some(key) = unique_key(row, &columns) {
                    if !seen.insert(key) {
                        tracing::debug!(table = %table, columns = ?columns, "Unique constraint violated");
                        return Err(Error::store(
                            StoreErrorKind::Constraint,
                            Some(table),
                            format!("UNIQUE constraint failed: {}.({})", table, columns.join(", ")),
                        ));
                    }
                }
            }
        }

        if let Some(col) = &auto_column {
            let max = prepared
                .iter()
                .filter_map(|r| r.get_by_name(col).and_then(Value::as_i64))
                .max()
                .unwrap_or(0);
            next_id = next_id.max(max + 1);
        }

        let count = prepared.len() as u64;
        mem.rows.extend(prepared);
        mem.next_id = next_id;
        tracing::debug!(table = %table, rows = count, "Inserted rows");
        Ok(count)
    }

    fn delete_where(&self, table: &str, filter: &Filter) -> Result<u64> {
        let mut inner = self.lock();
        inner.stats.deletes += 1;
        inner.take_failure(FailPoint::Delete)?;
        let mem = inner.table_mut(table)?;
        let before = mem.rows.len();
        mem.rows.retain(|row| !filter.matches(row));
        let deleted = (before - mem.rows.len()) as u64;
        tracing::debug!(table = %table, rows = deleted, "Deleted rows");
        Ok(deleted)
    }

    fn query(&self, query: &Query) -> Result<Vec<Row>> {
        let mut inner = self.lock();
        inner.stats.queries += 1;
        inner.take_failure(FailPoint::Query)?;
        let mem = inner
            .tables
            .get(&query.table)
            .ok_or_else(|| no_such_table(&query.table))?;

        tracing::trace!(table = %query.table, filter = ?query.filter, "Running query");

        let mut rows: Vec<&Row> = if query.filter.is_empty_match() {
            Vec::new()
        } else {
            mem.rows.iter().filter(|r| query.filter.matches(r)).collect()
        };

        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .order_by
                    .iter()
                    .map(|o| {
                        let left = a.get_by_name(&o.column).unwrap_or(&Value::Null);
                        let right = b.get_by_name(&o.column).unwrap_or(&Value::Null);
                        if o.descending {
                            right.cmp(left)
                        } else {
                            left.cmp(right)
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        let out: Vec<Row> = match &query.projection {
            Some(columns) => rows.into_iter().map(|r| r.project(columns)).collect(),
            None => rows.into_iter().cloned().collect(),
        };
        tracing::debug!(table = %query.table, rows = out.len(), "Query returned rows");
        Ok(out)
    }

    fn begin(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.stats.transactions += 1;
        let snapshot = inner.tables.clone();
        inner.snapshots.push(snapshot);
        tracing::trace!(depth = inner.snapshots.len(), "Begin transaction scope");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.take_failure(FailPoint::Commit)?;
        if inner.snapshots.pop().is_none() {
            return Err(Error::store(
                StoreErrorKind::Transaction,
                None,
                "commit without an open transaction",
            ));
        }
        tracing::trace!(depth = inner.snapshots.len(), "Commit transaction scope");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.lock();
        let Some(snapshot) = inner.snapshots.pop() else {
            return Err(Error::store(
                StoreErrorKind::Transaction,
                None,
                "rollback without an open transaction",
            ));
        };
        inner.tables = snapshot;
        tracing::debug!(depth = inner.snapshots.len(), "Rolled back transaction scope");
        Ok(())
    }
}
