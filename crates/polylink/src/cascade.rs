//! Deletion cascades and deletion signals.
//!
//! When objects are deleted, every relation they take part in (as source,
//! or as target through the registry's reverse index) applies its cascade
//! policy for that side: join rows are deleted, left alone, or handed to
//! listeners first. Listeners can veto the cascade on relations that allow
//! it; a vetoed cascade leaves its join rows in place while the objects
//! themselves are still deleted.

use crate::descriptor::{CascadePolicy, Relation, RelationId};
use crate::registry::{TypeRegistry, TypeTag};
use polylink_core::{AnyModel, Filter, ModelInfo, Query, Result, Row, Store, TypeName, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Which endpoint of a link was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionSide {
    Source,
    Target,
}

impl fmt::Display for DeletionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Payload of a deletion signal.
///
/// Sent once per relation and side for a whole deletion batch, before any
/// join row is deleted.
pub struct DeletionEvent<'e> {
    pub relation: &'e Relation,
    pub side: DeletionSide,
    pub policy: CascadePolicy,
    /// The objects being deleted on this side.
    pub deleted: &'e [&'e dyn AnyModel],
    /// The join rows the cascade would delete.
    pub rows: &'e [Row],
}

impl fmt::Debug for DeletionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionEvent")
            .field("relation", &self.relation.qualified_name())
            .field("side", &self.side)
            .field("policy", &self.policy)
            .field("deleted", &self.deleted.len())
            .field("rows", &self.rows.len())
            .finish()
    }
}

/// A deletion listener. Returning `Ok(true)` asks for a veto.
pub type Listener = Arc<dyn Fn(&DeletionEvent<'_>) -> Result<bool> + Send + Sync>;

/// Handle for disconnecting a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

struct Connection {
    id: ListenerId,
    relation: Option<RelationId>,
    listener: Listener,
}

/// What listeners answered to one emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalOutcome {
    /// Listeners called
    pub listeners: usize,
    /// At least one listener returned `true`
    pub vetoed: bool,
    /// Listeners that returned an error
    pub failed: usize,
}

/// Deletion listeners, called synchronously in registration order.
#[derive(Default)]
pub struct Signals {
    connections: RwLock<Vec<Connection>>,
    next_id: AtomicUsize,
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        f.debug_struct("Signals").field("listeners", &count).finish()
    }
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, relation: Option<RelationId>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Connection {
                id,
                relation,
                listener,
            });
        id
    }

    /// Listen to deletions on every relation.
    pub fn connect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DeletionEvent<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        self.add(None, Arc::new(listener))
    }

    /// Listen to deletions on one relation.
    pub fn connect_to<F>(&self, relation: RelationId, listener: F) -> ListenerId
    where
        F: Fn(&DeletionEvent<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        self.add(Some(relation), Arc::new(listener))
    }

    /// Remove a listener. Returns whether it was connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        let before = connections.len();
        connections.retain(|c| c.id != id);
        connections.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Call every listener interested in `event`'s relation.
    ///
    /// All listeners are called even after one vetoes or fails. Listener
    /// errors are logged and counted, never returned.
    pub fn emit(&self, event: &DeletionEvent<'_>) -> SignalOutcome {
        // Listeners run without the lock held so they may connect others
        let listeners: Vec<Listener> = self
            .connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.relation.is_none_or(|r| r == event.relation.id()))
            .map(|c| Arc::clone(&c.listener))
            .collect();

        let mut outcome = SignalOutcome {
            listeners: listeners.len(),
            ..SignalOutcome::default()
        };
        for listener in listeners {
            match listener(event) {
                Ok(true) => outcome.vetoed = true,
                Ok(false) => {}
                Err(err) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        relation = %event.relation.qualified_name(),
                        side = %event.side,
                        error = %err,
                        "Deletion listener failed"
                    );
                }
            }
        }
        outcome
    }
}

/// Result of a deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Objects deleted from their own tables
    pub deleted_objects: u64,
    /// Join rows deleted by cascades
    pub cascaded_rows: u64,
    /// Relation sides whose cascade was vetoed
    pub vetoed: Vec<(RelationId, DeletionSide)>,
    /// Signal emissions
    pub signals_emitted: usize,
}

/// Applies cascade policies for a batch of deleted objects.
pub struct CascadeCoordinator<'c> {
    registry: &'c TypeRegistry,
    relations: &'c [Arc<Relation>],
    signals: &'c Signals,
}

impl<'c> CascadeCoordinator<'c> {
    pub fn new(
        registry: &'c TypeRegistry,
        relations: &'c [Arc<Relation>],
        signals: &'c Signals,
    ) -> Self {
        Self {
            registry,
            relations,
            signals,
        }
    }

    fn relation(&self, id: RelationId) -> Option<&'c Arc<Relation>> {
        self.relations.iter().find(|r| r.id() == id)
    }

    /// Apply every relation's cascade for `objects`, then delete the
    /// objects. The caller runs this inside a transaction.
    #[tracing::instrument(level = "debug", skip_all, fields(objects = objects.len()))]
    pub fn delete<S: Store + ?Sized>(
        &self,
        store: &S,
        objects: &[&dyn AnyModel],
    ) -> Result<DeletionReport> {
        let mut report = DeletionReport::default();

        for relation in self.relations {
            let sources: Vec<&dyn AnyModel> = objects
                .iter()
                .copied()
                .filter(|o| relation.is_source(*o))
                .collect();
            if !sources.is_empty() {
                let keys: Vec<Value> = sources.iter().map(|o| o.key_value()).collect();
                let filter =
                    Filter::in_list(relation.through().columns().src.as_str(), keys);
                self.apply(
                    store,
                    relation,
                    DeletionSide::Source,
                    relation.on_delete_src(),
                    &sources,
                    filter,
                    &mut report,
                )?;
            }
        }

        for (relation, policy, targets) in self.target_groups(objects) {
            let filter = self.target_filter(relation, &targets);
            self.apply(
                store,
                relation,
                DeletionSide::Target,
                policy,
                &targets,
                filter,
                &mut report,
            )?;
        }

        report.deleted_objects = delete_objects(store, objects)?;
        tracing::info!(
            deleted = report.deleted_objects,
            cascaded = report.cascaded_rows,
            vetoed = report.vetoed.len(),
            signals = report.signals_emitted,
            "Deletion finished"
        );
        Ok(report)
    }

    /// Deleted targets grouped by relation and effective policy, in
    /// relation order.
    fn target_groups<'o>(
        &self,
        objects: &[&'o dyn AnyModel],
    ) -> Vec<(&'c Arc<Relation>, CascadePolicy, Vec<&'o dyn AnyModel>)> {
        let mut groups: Vec<(&'c Arc<Relation>, CascadePolicy, Vec<&'o dyn AnyModel>)> =
            Vec::new();
        for object in objects {
            let Some(tag) = self.registry.tag_for(*object) else {
                continue;
            };
            for id in self.registry.relations_targeting(tag) {
                let Some(relation) = self.relation(id).filter(|r| r.accepts(tag)) else {
                    continue;
                };
                let policy = relation.target_policy(tag);
                match groups
                    .iter_mut()
                    .find(|(r, p, _)| r.id() == id && *p == policy)
                {
                    Some((_, _, targets)) => targets.push(*object),
                    None => groups.push((relation, policy, vec![*object])),
                }
            }
        }
        groups.sort_by_key(|(r, _, _)| r.id());
        groups
    }

    fn target_filter(&self, relation: &Relation, targets: &[&dyn AnyModel]) -> Filter {
        let columns = relation.through().columns();
        let mut by_tag: Vec<(TypeTag, Vec<Value>)> = Vec::new();
        for target in targets {
            let (Some(tag), Some(key)) = (
                self.registry.tag_for(*target),
                target.key_value().encode_key(),
            ) else {
                continue;
            };
            match by_tag.iter_mut().find(|(t, _)| *t == tag) {
                Some((_, keys)) => keys.push(Value::Text(key)),
                None => by_tag.push((tag, vec![Value::Text(key)])),
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

    #[allow(clippy::too_many_arguments)]
    fn apply<S: Store + ?Sized>(
        &self,
        store: &S,
        relation: &Relation,
        side: DeletionSide,
        policy: CascadePolicy,
        deleted: &[&dyn AnyModel],
        filter: Filter,
        report: &mut DeletionReport,
    ) -> Result<()> {
        if policy == CascadePolicy::NoOp {
            return Ok(());
        }
        let table = relation.through().name();

        let mut veto = false;
        if policy.emits_signal() {
            let rows = if filter.is_empty_match() {
                Vec::new()
            } else {
                store.query(&Query::table(table).filter(filter.clone()))?
            };
            let outcome = self.signals.emit(&DeletionEvent {
                relation,
                side,
                policy,
                deleted,
                rows: &rows,
            });
            report.signals_emitted += 1;
            veto = (policy.vetoable() && outcome.vetoed)
                || (policy.cascades() && outcome.failed > 0);
            tracing::debug!(
                relation = %relation.qualified_name(),
                side = %side,
                rows = rows.len(),
                listeners = outcome.listeners,
                vetoed = outcome.vetoed,
                failed = outcome.failed,
                "Emitted deletion signal"
            );
        }

        if veto {
            tracing::info!(
                relation = %relation.qualified_name(),
                side = %side,
                "Cascade vetoed; join rows left in place"
            );
            report.vetoed.push((relation.id(), side));
            return Ok(());
        }
        if policy.cascades() && !filter.is_empty_match() {
            let deleted_rows = store.delete_where(table, &filter)?;
            report.cascaded_rows += deleted_rows;
            tracing::debug!(
                relation = %relation.qualified_name(),
                side = %side,
                rows = deleted_rows,
                "Cascaded join rows"
            );
        }
        Ok(())
    }
}

/// Delete objects from their tables, one statement per type.
fn delete_objects<S: Store + ?Sized>(store: &S, objects: &[&dyn AnyModel]) -> Result<u64> {
    let mut by_type: Vec<(TypeName, ModelInfo, Vec<Value>)> = Vec::new();
    for object in objects {
        let key = object.key_value();
        if key.is_null() {
            tracing::warn!(type_name = %object.model_type(), "Skipping unsaved object in deletion");
            continue;
        }
        let name = object.model_type();
        match by_type.iter_mut().find(|(n, _, _)| *n == name) {
            Some((_, _, keys)) if keys.contains(&key) => {}
            Some((_, _, keys)) => keys.push(key),
            None => by_type.push((name, object.model_info(), vec![key])),
        }
    }

    let mut deleted = 0;
    for (_, info, keys) in by_type {
        deleted += store.delete_where(info.table, &Filter::in_list(info.primary_key, keys))?;
    }
    Ok(deleted)
}
