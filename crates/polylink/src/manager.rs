//! Instance-bound relation managers.
//!
//! An [`InstanceManager`] is created on each relation access and bound to
//! one object: a source instance (its related targets, of any type) or a
//! target instance (the source objects that link to it). Writes compute
//! the minimal set of join rows to insert or delete and run as one atomic
//! unit against the store.

use crate::descriptor::Relation;
use crate::fetch::{JoinRow, Linked, PolymorphicIter};
use crate::registry::TypeTag;
use polylink_core::{
    AnyModel, Error, Filter, Model, ModelRef, OrderBy, Query, Result, Row, Store, TypeName, Value,
    atomic,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Which end of the relation a manager is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Bound to a source object; reads and writes targets.
    Source { key: Value },
    /// Bound to a target object; reads and writes sources.
    Target { tag: TypeTag, key: String },
}

/// One join row's endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Link {
    src: Value,
    tag: TypeTag,
    key: String,
}

/// Rows written by [`InstanceManager::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOutcome {
    pub inserted: u64,
    pub deleted: u64,
}

/// Relation access bound to one object.
pub struct InstanceManager<'a, S: Store + ?Sized> {
    store: &'a S,
    relation: Arc<Relation>,
    binding: Binding,
}

impl<'a, S: Store + ?Sized> InstanceManager<'a, S> {
    /// Bind to a source object.
    pub fn for_source(store: &'a S, relation: Arc<Relation>, instance: &dyn AnyModel) -> Result<Self> {
        relation.check_source(instance)?;
        let key = saved_key(instance)?;
        Ok(Self {
            store,
            relation,
            binding: Binding::Source { key },
        })
    }

    /// Bind to a target object.
    ///
    /// Fails with `UnknownType` when the relation does not accept the
    /// object's type.
    pub fn for_target(store: &'a S, relation: Arc<Relation>, instance: &dyn AnyModel) -> Result<Self> {
        let tag = relation
            .registry()
            .tag_for(instance)
            .filter(|tag| relation.accepts(*tag))
            .ok_or_else(|| {
                Error::unknown_type(
                    instance.model_type().to_string(),
                    Some(&relation.qualified_name()),
                )
            })?;
        saved_key(instance)?;
        let key = relation.key_of(instance)?;
        Ok(Self {
            store,
            relation,
            binding: Binding::Target { tag, key },
        })
    }

    pub fn relation(&self) -> &Arc<Relation> {
        &self.relation
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// The filter selecting the bound object's join rows.
    pub fn scope(&self) -> Filter {
        let columns = self.relation.through().columns();
        match &self.binding {
            Binding::Source { key } => Filter::eq(columns.src.as_str(), key.clone()),
            Binding::Target { tag, key } => Filter::eq(columns.tgt_ct.as_str(), tag.value())
                .and(Filter::eq(columns.tgt_fk.as_str(), key.as_str())),
        }
    }

    fn through_name(&self) -> &str {
        self.relation.through().name()
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<()> {
        if self.relation.through().is_auto_created() {
            Ok(())
        } else {
            Err(Error::unsupported(operation, self.relation.qualified_name()))
        }
    }

    /// A query over the related objects.
    pub fn all(&self) -> RelatedQuery<'_, 'a, S> {
        RelatedQuery {
            manager: self,
            types: None,
            order_by: None,
            ordered: true,
            extras: false,
        }
    }

    /// The related objects, in join-table order.
    pub fn list(&self) -> Result<Vec<ModelRef>> {
        self.all().fetch()
    }

    /// Number of join rows for the bound object.
    pub fn count(&self) -> Result<usize> {
        self.all().count()
    }

    /// The link an object would have with the bound object, resolving
    /// (and on open relations registering) target types.
    fn link_for(&self, object: &dyn AnyModel) -> Result<Link> {
        match &self.binding {
            Binding::Source { key } => Ok(Link {
                src: key.clone(),
                tag: self.relation.resolve_target(object)?,
                key: self.relation.key_of(object)?,
            }),
            Binding::Target { tag, key } => {
                self.relation.check_source(object)?;
                Ok(Link {
                    src: saved_key(object)?,
                    tag: *tag,
                    key: key.clone(),
                })
            }
        }
    }

    /// Like `link_for`, but `None` for objects that cannot be linked.
    fn existing_link_for(&self, object: &dyn AnyModel) -> Option<Link> {
        match &self.binding {
            Binding::Source { key } => {
                let tag = self.relation.registry().tag_for(object)?;
                if !self.relation.accepts(tag) {
                    return None;
                }
                Some(Link {
                    src: key.clone(),
                    tag,
                    key: self.relation.key_of(object).ok()?,
                })
            }
            Binding::Target { tag, key } => {
                if !self.relation.is_source(object) {
                    return None;
                }
                let src = object.key_value();
                (!src.is_null()).then(|| Link {
                    src,
                    tag: *tag,
                    key: key.clone(),
                })
            }
        }
    }

    fn links_for(&self, objects: &[&dyn AnyModel]) -> Result<Vec<Link>> {
        let mut seen = HashSet::with_capacity(objects.len());
        let mut links = Vec::with_capacity(objects.len());
        for object in objects {
            let link = self.link_for(*object)?;
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
        Ok(links)
    }

    /// The filter selecting exactly `links`' rows within the scope.
    fn links_filter(&self, links: &[Link]) -> Filter {
        let columns = self.relation.through().columns();
        let narrowing = match &self.binding {
            Binding::Source { .. } => {
                let mut by_tag: Vec<(TypeTag, Vec<Value>)> = Vec::new();
                for link in links {
                    match by_tag.iter_mut().find(|(tag, _)| *tag == link.tag) {
                        Some((_, keys)) => keys.push(Value::from(link.key.as_str())),
                        None => by_tag.push((link.tag, vec![Value::from(link.key.as_str())])),
                    }
                }
                Filter::any(
                    by_tag
                        .into_iter()
                        .map(|(tag, keys)| {
                            Filter::eq(columns.tgt_ct.as_str(), tag.value())
                                .and(Filter::in_list(columns.tgt_fk.as_str(), keys))
                        })
                        .collect(),
                )
            }
            Binding::Target { .. } => Filter::in_list(
                columns.src.as_str(),
                links.iter().map(|link| link.src.clone()),
            ),
        };
        self.scope().and(narrowing)
    }

    /// Read the links currently stored for the bound object, restricted by
    /// `filter`.
    fn read_links(&self, filter: Filter) -> Result<Vec<Link>> {
        if filter.is_empty_match() {
            return Ok(Vec::new());
        }
        let columns = self.relation.through().columns();
        let query = Query::table(self.through_name()).filter(filter).project([
            columns.src.as_str(),
            columns.tgt_ct.as_str(),
            columns.tgt_fk.as_str(),
        ]);
        let rows = self.store.query(&query)?;
        Ok(rows.iter().filter_map(|row| self.link_from_row(row)).collect())
    }

    fn link_from_row(&self, row: &Row) -> Option<Link> {
        let columns = self.relation.through().columns();
        Some(Link {
            src: row.get_by_name(&columns.src)?.clone(),
            tag: TypeTag(row.get_by_name(&columns.tgt_ct)?.as_i64()?),
            key: row.get_by_name(&columns.tgt_fk)?.as_str()?.to_string(),
        })
    }

    fn insert_links(&self, links: Vec<Link>) -> Result<u64> {
        if links.is_empty() {
            return Ok(0);
        }
        let through = self.relation.through();
        let rows = links
            .into_iter()
            .map(|link| through.link_row(link.src, link.tag.0, link.key))
            .collect();
        self.store.insert_many(through.name(), rows)
    }

    fn delete_links(&self, links: &[Link]) -> Result<u64> {
        if links.is_empty() {
            return Ok(0);
        }
        let filter = self.links_filter(links);
        tracing::trace!(filter = ?filter, "Deleting join rows");
        self.store.delete_where(self.through_name(), &filter)
    }

    /// Link `objects` to the bound object. Objects already linked are
    /// skipped. Returns the number of join rows inserted.
    #[tracing::instrument(
        level = "debug",
        skip(self, objects),
        fields(relation = %self.relation.qualified_name(), objects = objects.len())
    )]
    pub fn add(&self, objects: &[&dyn AnyModel]) -> Result<u64> {
        self.ensure_writable("add")?;
        let links = self.links_for(objects)?;
        if links.is_empty() {
            return Ok(0);
        }
        atomic(self.store, || {
            let existing: HashSet<Link> = self
                .read_links(self.links_filter(&links))?
                .into_iter()
                .collect();
            let missing: Vec<Link> = links
                .into_iter()
                .filter(|link| !existing.contains(link))
                .collect();
            let inserted = self.insert_links(missing)?;
            tracing::debug!(existing = existing.len(), inserted, "Added related objects");
            Ok(inserted)
        })
    }

    /// Unlink `objects`. Objects that are not linked are ignored. Returns
    /// the number of join rows deleted.
    #[tracing::instrument(
        level = "debug",
        skip(self, objects),
        fields(relation = %self.relation.qualified_name(), objects = objects.len())
    )]
    pub fn remove(&self, objects: &[&dyn AnyModel]) -> Result<u64> {
        self.ensure_writable("remove")?;
        let mut seen = HashSet::new();
        let links: Vec<Link> = objects
            .iter()
            .filter_map(|object| self.existing_link_for(*object))
            .filter(|link| seen.insert(link.clone()))
            .collect();
        let deleted = self.delete_links(&links)?;
        tracing::debug!(deleted, "Removed related objects");
        Ok(deleted)
    }

    /// Make `objects` the exact set of related objects.
    ///
    /// With `clear`, every join row is deleted first and all objects are
    /// re-added. Otherwise only the difference is written.
    #[tracing::instrument(
        level = "debug",
        skip(self, objects),
        fields(relation = %self.relation.qualified_name(), objects = objects.len())
    )]
    pub fn set(&self, objects: &[&dyn AnyModel], clear: bool) -> Result<SetOutcome> {
        self.ensure_writable("set")?;
        let links = self.links_for(objects)?;
        atomic(self.store, || {
            if clear {
                let deleted = self.store.delete_where(self.through_name(), &self.scope())?;
                let inserted = self.insert_links(links)?;
                return Ok(SetOutcome { inserted, deleted });
            }

            let current: HashSet<Link> = self.read_links(self.scope())?.into_iter().collect();
            let wanted: HashSet<&Link> = links.iter().collect();
            let stale: Vec<Link> = current
                .iter()
                .filter(|link| !wanted.contains(link))
                .cloned()
                .collect();
            let fresh: Vec<Link> = links
                .iter()
                .filter(|link| !current.contains(*link))
                .cloned()
                .collect();

            let deleted = self.delete_links(&stale)?;
            let inserted = self.insert_links(fresh)?;
            tracing::debug!(
                current = current.len(),
                deleted,
                inserted,
                "Set related objects"
            );
            Ok(SetOutcome { inserted, deleted })
        })
    }

    /// Unlink everything. Returns the number of join rows deleted.
    #[tracing::instrument(
        level = "debug",
        skip(self),
        fields(relation = %self.relation.qualified_name())
    )]
    pub fn clear(&self) -> Result<u64> {
        self.ensure_writable("clear")?;
        let deleted = self.store.delete_where(self.through_name(), &self.scope())?;
        tracing::debug!(deleted, "Cleared related objects");
        Ok(deleted)
    }
}

fn saved_key(object: &dyn AnyModel) -> Result<Value> {
    let key = object.key_value();
    if key.is_null() {
        return Err(Error::Custom(format!(
            "{} object has no primary key value; save it before using its relations",
            object.model_type()
        )));
    }
    Ok(key)
}

/// A read over a manager's related objects.
///
/// Defaults to row order with the join table's ordering (or its primary
/// key), no type filter and no extra columns.
pub struct RelatedQuery<'m, 'a, S: Store + ?Sized> {
    manager: &'m InstanceManager<'a, S>,
    types: Option<Vec<TypeTag>>,
    order_by: Option<Vec<OrderBy>>,
    ordered: bool,
    extras: bool,
}

impl<'m, 'a, S: Store + ?Sized> RelatedQuery<'m, 'a, S> {
    /// Only objects of model type `M`.
    #[must_use]
    pub fn of_type<M: Model>(self) -> Self {
        let tag = self.manager.relation.registry().tag_of::<M>();
        self.narrow(tag.into_iter().collect())
    }

    /// Only objects whose type is one of `tags`.
    #[must_use]
    pub fn of_types(self, tags: &[TypeTag]) -> Self {
        self.narrow(tags.to_vec())
    }

    /// Only objects of the type named `"app.Model"`.
    #[must_use]
    pub fn of_type_name(self, name: &str) -> Self {
        let tag = TypeName::parse(name).and_then(|n| self.manager.relation.registry().tag_of_name(&n));
        self.narrow(tag.into_iter().collect())
    }

    fn narrow(mut self, tags: Vec<TypeTag>) -> Self {
        self.types = Some(match self.types.take() {
            Some(current) => current.into_iter().filter(|t| tags.contains(t)).collect(),
            None => tags,
        });
        self
    }

    /// Order by join-table columns instead of the default ordering.
    #[must_use]
    pub fn order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = Some(order_by);
        self
    }

    /// Yield objects type group by type group, without buffering the whole
    /// result.
    #[must_use]
    pub fn unordered(mut self) -> Self {
        self.ordered = false;
        self
    }

    /// Carry the join table's extra columns with each object.
    #[must_use]
    pub fn with_extras(mut self) -> Self {
        self.extras = true;
        self
    }

    fn relation(&self) -> &Relation {
        &self.manager.relation
    }

    fn filter(&self) -> Filter {
        let scope = self.manager.scope();
        match (&self.types, &self.manager.binding) {
            (None, _) => scope,
            (Some(tags), Binding::Source { .. }) => scope.and(Filter::in_list(
                self.relation().through().columns().tgt_ct.as_str(),
                tags.iter().map(|t| t.value()),
            )),
            (Some(tags), Binding::Target { .. }) => {
                let source = self.relation().registry().tag_of_name(&self.relation().source_type());
                if source.is_some_and(|tag| tags.contains(&tag)) {
                    scope
                } else {
                    Filter::in_list(
                        self.relation().through().columns().src.as_str(),
                        Vec::<Value>::new(),
                    )
                }
            }
        }
    }

    fn ordering(&self) -> Vec<OrderBy> {
        if let Some(order_by) = &self.order_by {
            return order_by.clone();
        }
        let through = self.relation().through();
        if !through.ordering().is_empty() {
            return through.ordering().to_vec();
        }
        through
            .table()
            .primary_key()
            .map(|pk| vec![OrderBy::asc(pk.name.as_str())])
            .unwrap_or_default()
    }

    fn extra_columns(&self) -> Vec<String> {
        if !self.extras {
            return Vec::new();
        }
        self.relation()
            .through()
            .extra_columns()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn scan(&self) -> Result<Vec<Row>> {
        let filter = self.filter();
        if filter.is_empty_match() {
            tracing::debug!("Type filter matches nothing; skipping scan");
            return Ok(Vec::new());
        }
        let query = Query::table(self.relation().through().name())
            .filter(filter)
            .order_by(self.ordering());
        self.manager.store.query(&query)
    }

    /// Number of matching join rows.
    pub fn count(&self) -> Result<usize> {
        let filter = self.filter();
        if filter.is_empty_match() {
            return Ok(0);
        }
        let pk = self
            .relation()
            .through()
            .table()
            .primary_key()
            .map_or_else(|| self.relation().through().columns().src.clone(), |c| c.name.clone());
        let query = Query::table(self.relation().through().name())
            .filter(filter)
            .project([pk]);
        Ok(self.manager.store.query(&query)?.len())
    }

    /// Iterate over the related targets. The join-table scan happens here;
    /// targets are loaded as the iterator advances.
    ///
    /// A target-bound manager has no polymorphic targets and yields nothing.
    pub fn iter(&self) -> Result<PolymorphicIter<'m, S>> {
        let manager: &'m InstanceManager<'a, S> = self.manager;
        let rows = match manager.binding {
            Binding::Source { .. } => self.join_rows()?,
            Binding::Target { .. } => Vec::new(),
        };
        let registry = manager.relation.registry().as_ref();
        Ok(if self.ordered {
            PolymorphicIter::ordered(manager.store, registry, rows)
        } else {
            PolymorphicIter::grouped(manager.store, registry, rows)
        })
    }

    fn join_rows(&self) -> Result<Vec<JoinRow>> {
        let columns = self.relation().through().columns();
        let extras = self.extra_columns();
        let rows = self.scan()?;
        let joined: Vec<JoinRow> = rows
            .iter()
            .filter_map(|row| JoinRow::from_row(row, columns, &extras))
            .collect();
        if joined.len() < rows.len() {
            tracing::warn!(
                skipped = rows.len() - joined.len(),
                "Skipping join rows with a NULL target reference"
            );
        }
        Ok(joined)
    }

    /// The related objects.
    pub fn fetch(&self) -> Result<Vec<ModelRef>> {
        Ok(self
            .fetch_with_extras()?
            .into_iter()
            .map(|linked| linked.object)
            .collect())
    }

    /// The related objects with their join rows' extra columns.
    #[tracing::instrument(
        level = "debug",
        skip(self),
        fields(relation = %self.relation().qualified_name())
    )]
    pub fn fetch_with_extras(&self) -> Result<Vec<Linked>> {
        match &self.manager.binding {
            Binding::Source { .. } => {
                let rows = self.join_rows()?;
                let registry = self.relation().registry();
                let store = self.manager.store;
                if self.ordered {
                    PolymorphicIter::ordered(store, registry, rows).collect()
                } else {
                    PolymorphicIter::grouped(store, registry, rows).collect()
                }
            }
            Binding::Target { .. } => self.fetch_sources(),
        }
    }

    /// Reverse read: the join-table scan, then one load of the sources.
    fn fetch_sources(&self) -> Result<Vec<Linked>> {
        let relation = self.relation();
        let source = relation.source();
        let src_column = relation.through().columns().src.as_str();
        let extras = self.extra_columns();

        let rows = self.scan()?;
        let mut keys: Vec<Value> = Vec::new();
        let mut seen: HashSet<&Value> = HashSet::new();
        for row in &rows {
            if let Some(key) = row.get_by_name(src_column) {
                if !key.is_null() && seen.insert(key) {
                    keys.push(key.clone());
                }
            }
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::table(source.table).filter(Filter::in_list(source.primary_key, keys));
        let mut loaded: HashMap<Value, ModelRef> = HashMap::new();
        for row in self.manager.store.query(&query)? {
            if let Some(key) = row.get_by_name(source.primary_key).cloned() {
                loaded.insert(key, source.load(&row)?);
            }
        }

        Ok(rows
            .iter()
            .filter_map(|row| {
                let object = loaded.get(row.get_by_name(src_column)?)?;
                Some(Linked {
                    object: object.clone(),
                    extras: row.project(&extras),
                })
            })
            .collect())
    }
}
