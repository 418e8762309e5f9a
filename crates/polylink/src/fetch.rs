//! Turning join rows back into objects.
//!
//! Join rows reference targets of many types. [`PolymorphicIter`] groups
//! them by type tag, loads each group with one query and yields the
//! objects either in the original row order or group by group.
//! Rows whose target no longer exists are skipped.

use crate::registry::{TypeRegistry, TypeTag};
use polylink_core::{ModelRef, Result, Row, Store, Value};
use polylink_schema::ThroughColumns;
use std::collections::{HashMap, HashSet, VecDeque};

/// The target reference of one join row, plus any projected extra columns.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRow {
    pub tag: TypeTag,
    /// The target key as stored in the join table.
    pub key: String,
    pub extras: Row,
}

impl JoinRow {
    /// Read the target reference out of a join-table row.
    ///
    /// Returns `None` for rows with a NULL or malformed reference.
    pub fn from_row(row: &Row, columns: &ThroughColumns, extras: &[String]) -> Option<Self> {
        let tag = row.get_by_name(&columns.tgt_ct)?.as_i64()?;
        let key = row.get_by_name(&columns.tgt_fk)?.as_str()?.to_string();
        Some(Self {
            tag: TypeTag(tag),
            key,
            extras: row.project(extras),
        })
    }
}

/// A fetched object and the extra join-table columns of its row.
#[derive(Debug, Clone)]
pub struct Linked {
    pub object: ModelRef,
    pub extras: Row,
}

enum Mode {
    /// Resolve everything up front, yield in row order
    Ordered,
    /// Resolve one type group at a time
    Grouped,
}

/// Iterator over the targets of a sequence of join rows.
///
/// Issues one query per distinct type tag. In ordered mode every group is
/// loaded on the first call to `next`; in grouped mode each group is loaded
/// when the iterator reaches it, and objects come out group by group (in
/// row order within a group).
pub struct PolymorphicIter<'a, S: Store + ?Sized> {
    store: &'a S,
    registry: &'a TypeRegistry,
    rows: Vec<JoinRow>,
    /// Row indices per tag, in order of first appearance
    groups: Vec<(TypeTag, Vec<usize>)>,
    mode: Mode,
    next_group: usize,
    buffer: VecDeque<Linked>,
    failed: bool,
}

impl<'a, S: Store + ?Sized> PolymorphicIter<'a, S> {
    /// Yield objects in the order of `rows`.
    pub fn ordered(store: &'a S, registry: &'a TypeRegistry, rows: Vec<JoinRow>) -> Self {
        Self::new(store, registry, rows, Mode::Ordered)
    }

    /// Yield objects one type group at a time.
    pub fn grouped(store: &'a S, registry: &'a TypeRegistry, rows: Vec<JoinRow>) -> Self {
        Self::new(store, registry, rows, Mode::Grouped)
    }

    fn new(store: &'a S, registry: &'a TypeRegistry, rows: Vec<JoinRow>, mode: Mode) -> Self {
        let mut groups: Vec<(TypeTag, Vec<usize>)> = Vec::new();
        let mut slot: HashMap<TypeTag, usize> = HashMap::new();
        for (index, row) in rows.iter().enumerate() {
            let group = *slot.entry(row.tag).or_insert_with(|| {
                groups.push((row.tag, Vec::new()));
                groups.len() - 1
            });
            groups[group].1.push(index);
        }
        Self {
            store,
            registry,
            rows,
            groups,
            mode,
            next_group: 0,
            buffer: VecDeque::new(),
            failed: false,
        }
    }

    /// Number of join rows (not all of them may resolve).
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Distinct type tags, in order of first appearance.
    pub fn tags(&self) -> Vec<TypeTag> {
        self.groups.iter().map(|(tag, _)| *tag).collect()
    }

    /// Load one group: row index to object, for rows whose target exists.
    fn resolve_group(&self, tag: TypeTag, indices: &[usize]) -> Result<Vec<(usize, ModelRef)>> {
        let Some(entry) = self.registry.entry(tag) else {
            tracing::warn!(tag = %tag, rows = indices.len(), "Skipping join rows of unregistered type");
            return Ok(Vec::new());
        };

        let mut parsed: Vec<(usize, Value)> = Vec::with_capacity(indices.len());
        let mut keys: Vec<Value> = Vec::new();
        let mut seen: HashSet<Value> = HashSet::new();
        for &index in indices {
            let raw = &self.rows[index].key;
            let Some(key) = entry.info.key_kind.parse_key(raw) else {
                tracing::warn!(type_name = %entry.name, key = %raw, "Skipping join row with unparsable key");
                continue;
            };
            if seen.insert(key.clone()) {
                keys.push(key.clone());
            }
            parsed.push((index, key));
        }

        let resolved = self.registry.resolve_keys(self.store, tag, &keys)?;
        let mut out = Vec::with_capacity(parsed.len());
        for (index, key) in parsed {
            match resolved.get(&key) {
                Some(object) => out.push((index, object.clone())),
                None => tracing::warn!(
                    type_name = %entry.name,
                    key = %key,
                    "Skipping join row whose target no longer exists"
                ),
            }
        }
        Ok(out)
    }

    fn linked(&self, index: usize, object: ModelRef) -> Linked {
        Linked {
            object,
            extras: self.rows[index].extras.clone(),
        }
    }

    fn fill_ordered(&mut self) -> Result<()> {
        let mut slots: Vec<Option<ModelRef>> = vec![None; self.rows.len()];
        for (tag, indices) in &self.groups {
            for (index, object) in self.resolve_group(*tag, indices)? {
                slots[index] = Some(object);
            }
        }
        self.next_group = self.groups.len();
        for (index, slot) in slots.into_iter().enumerate() {
            if let Some(object) = slot {
                let linked = self.linked(index, object);
                self.buffer.push_back(linked);
            }
        }
        Ok(())
    }

    fn fill_next_group(&mut self) -> Result<()> {
        let (tag, indices) = &self.groups[self.next_group];
        let resolved = self.resolve_group(*tag, indices)?;
        self.next_group += 1;
        for (index, object) in resolved {
            let linked = self.linked(index, object);
            self.buffer.push_back(linked);
        }
        Ok(())
    }
}

impl<S: Store + ?Sized> Iterator for PolymorphicIter<'_, S> {
    type Item = Result<Linked>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(linked) = self.buffer.pop_front() {
                return Some(Ok(linked));
            }
            if self.failed || self.next_group >= self.groups.len() {
                return None;
            }
            let filled = match self.mode {
                Mode::Ordered => self.fill_ordered(),
                Mode::Grouped => self.fill_next_group(),
            };
            if let Err(err) = filled {
                self.failed = true;
                return Some(Err(err));
            }
        }
    }
}

/// Resolve `rows` in row order and collect the objects.
#[tracing::instrument(level = "debug", skip_all, fields(rows = rows.len()))]
pub fn fetch_ordered<S: Store + ?Sized>(
    store: &S,
    registry: &TypeRegistry,
    rows: Vec<JoinRow>,
) -> Result<Vec<Linked>> {
    PolymorphicIter::ordered(store, registry, rows).collect()
}
