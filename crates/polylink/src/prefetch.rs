//! Batched loading of a relation for many objects at once.
//!
//! Forward prefetch costs one join-table scan plus one load per distinct
//! target type, however many sources are involved. Reverse prefetch costs
//! one scan plus one load of the source table.

use crate::descriptor::Relation;
use crate::fetch::{JoinRow, Linked, PolymorphicIter};
use crate::registry::TypeTag;
use polylink_core::{AnyModel, Filter, ModelRef, OrderBy, Query, Result, Store, Value};
use std::collections::{HashMap, HashSet};

fn default_ordering(relation: &Relation) -> Vec<OrderBy> {
    let through = relation.through();
    if !through.ordering().is_empty() {
        return through.ordering().to_vec();
    }
    through
        .table()
        .primary_key()
        .map(|pk| vec![OrderBy::asc(pk.name.as_str())])
        .unwrap_or_default()
}

fn distinct_keys<'o>(objects: impl Iterator<Item = &'o dyn AnyModel>) -> Vec<Value> {
    let mut seen: HashSet<Value> = HashSet::new();
    objects
        .map(|object| object.key_value())
        .filter(|key| !key.is_null() && seen.insert(key.clone()))
        .collect()
}

/// Targets of many sources, grouped by source key.
#[derive(Debug, Default)]
pub struct ForwardPrefetch {
    by_source: HashMap<Value, Vec<Linked>>,
}

impl ForwardPrefetch {
    /// The related objects of `source`, in join-table order.
    pub fn get(&self, source: &dyn AnyModel) -> Vec<ModelRef> {
        self.linked(source)
            .iter()
            .map(|linked| linked.object.clone())
            .collect()
    }

    /// Like `get`, with each join row's source column and extra columns.
    pub fn linked(&self, source: &dyn AnyModel) -> &[Linked] {
        self.by_source
            .get(&source.key_value())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of resolved join rows across all sources.
    pub fn len(&self) -> usize {
        self.by_source.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Load the targets of every object in `sources`.
///
/// Objects that are not sources of `relation` are ignored.
#[tracing::instrument(
    level = "debug",
    skip(store, relation, sources),
    fields(relation = %relation.qualified_name(), sources = sources.len())
)]
pub fn prefetch_forward<S: Store + ?Sized>(
    store: &S,
    relation: &Relation,
    sources: &[&dyn AnyModel],
) -> Result<ForwardPrefetch> {
    let keys = distinct_keys(
        sources
            .iter()
            .copied()
            .filter(|object| relation.is_source(*object)),
    );
    if keys.is_empty() {
        return Ok(ForwardPrefetch::default());
    }

    let through = relation.through();
    let columns = through.columns();
    let query = Query::table(through.name())
        .filter(Filter::in_list(columns.src.as_str(), keys))
        .order_by(default_ordering(relation));
    let rows = store.query(&query)?;

    let mut carried = vec![columns.src.clone()];
    carried.extend(through.extra_columns().into_iter().map(str::to_string));
    let joined: Vec<JoinRow> = rows
        .iter()
        .filter_map(|row| JoinRow::from_row(row, columns, &carried))
        .collect();

    let mut by_source: HashMap<Value, Vec<Linked>> = HashMap::new();
    for linked in PolymorphicIter::ordered(store, relation.registry(), joined) {
        let linked = linked?;
        let Some(source_key) = linked.extras.get_by_name(&columns.src).cloned() else {
            continue;
        };
        by_source.entry(source_key).or_default().push(linked);
    }
    tracing::debug!(
        rows = rows.len(),
        sources = by_source.len(),
        "Prefetched related objects"
    );
    Ok(ForwardPrefetch { by_source })
}

/// Sources linking to many targets, grouped by target reference.
#[derive(Debug, Default)]
pub struct ReversePrefetch {
    by_target: HashMap<(TypeTag, String), Vec<Linked>>,
}

impl ReversePrefetch {
    /// The sources linking to `target`, in join-table order.
    pub fn get(&self, relation: &Relation, target: &dyn AnyModel) -> Vec<ModelRef> {
        let Some(tag) = relation.registry().tag_for(target) else {
            return Vec::new();
        };
        let Ok(key) = relation.key_of(target) else {
            return Vec::new();
        };
        self.by_target
            .get(&(tag, key))
            .map(|linked| linked.iter().map(|l| l.object.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_target.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Load the sources linking to every object in `targets`.
#[tracing::instrument(
    level = "debug",
    skip(store, relation, targets),
    fields(relation = %relation.qualified_name(), targets = targets.len())
)]
pub fn prefetch_reverse<S: Store + ?Sized>(
    store: &S,
    relation: &Relation,
    targets: &[&dyn AnyModel],
) -> Result<ReversePrefetch> {
    let through = relation.through();
    let columns = through.columns();

    let mut by_tag: Vec<(TypeTag, Vec<Value>)> = Vec::new();
    let mut seen: HashSet<(TypeTag, Value)> = HashSet::new();
    for target in targets {
        let Some(tag) = relation.registry().tag_for(*target) else {
            continue;
        };
        let Ok(key) = relation.key_of(*target) else {
            continue;
        };
        let key = Value::Text(key);
        if !seen.insert((tag, key.clone())) {
            continue;
        }
        match by_tag.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, keys)) => keys.push(key),
            None => by_tag.push((tag, vec![key])),
        }
    }
    if by_tag.is_empty() {
        return Ok(ReversePrefetch::default());
    }

    let filter = Filter::any(
        by_tag
            .into_iter()
            .map(|(tag, keys)| {
                Filter::eq(columns.tgt_ct.as_str(), tag.value())
                    .and(Filter::in_list(columns.tgt_fk.as_str(), keys))
            })
            .collect(),
    );
    let query = Query::table(through.name())
        .filter(filter)
        .order_by(default_ordering(relation));
    let rows = store.query(&query)?;

    let source = relation.source();
    let mut source_keys: Vec<Value> = Vec::new();
    let mut seen: HashSet<&Value> = HashSet::new();
    for row in &rows {
        if let Some(key) = row.get_by_name(&columns.src) {
            if !key.is_null() && seen.insert(key) {
                source_keys.push(key.clone());
            }
        }
    }
    if source_keys.is_empty() {
        return Ok(ReversePrefetch::default());
    }
    let query = Query::table(source.table).filter(Filter::in_list(source.primary_key, source_keys));
    let mut sources: HashMap<Value, ModelRef> = HashMap::new();
    for row in store.query(&query)? {
        if let Some(key) = row.get_by_name(source.primary_key).cloned() {
            sources.insert(key, source.load(&row)?);
        }
    }

    let extras: Vec<String> = through
        .extra_columns()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut by_target: HashMap<(TypeTag, String), Vec<Linked>> = HashMap::new();
    for row in &rows {
        let Some(join) = JoinRow::from_row(row, columns, &extras) else {
            continue;
        };
        let Some(object) = row.get_by_name(&columns.src).and_then(|k| sources.get(k)) else {
            continue;
        };
        by_target.entry((join.tag, join.key)).or_default().push(Linked {
            object: object.clone(),
            extras: join.extras,
        });
    }
    tracing::debug!(
        rows = rows.len(),
        sources = sources.len(),
        "Prefetched reverse relation"
    );
    Ok(ReversePrefetch { by_target })
}
