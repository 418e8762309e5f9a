//! The catalog of declared relations.
//!
//! A [`Catalog`] owns the type registry, every declared relation and the
//! deletion signals. It is the entry point for declaring relations,
//! finding reverse accessors and deleting objects with cascades.

use crate::cascade::{CascadeCoordinator, DeletionEvent, DeletionReport, ListenerId, Signals};
use crate::descriptor::{Relation, RelationBuilder, RelationDescription, RelationId};
use crate::field::{PolyField, ReverseAccessor};
use crate::registry::{TypeRegistry, TypeTag};
use polylink_core::{AnyModel, Error, Model, Result, Store, TypeName, atomic};
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Owns the relations of one application.
#[derive(Debug, Default)]
pub struct Catalog {
    registry: Arc<TypeRegistry>,
    relations: RwLock<Vec<Arc<Relation>>>,
    signals: Signals,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog sharing an existing registry.
    pub fn with_registry(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            relations: RwLock::default(),
            signals: Signals::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Relation>>> {
        self.relations.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Register a model type.
    pub fn register<M: Model>(&self) -> TypeTag {
        self.registry.register::<M>()
    }

    /// Declare a relation and create its join table when it is generated.
    ///
    /// Configuration problems (conflicting settings, an unusable through
    /// table, a duplicate field) fail here rather than on first use.
    #[tracing::instrument(level = "debug", skip(self, store, builder), fields(field = builder.name()))]
    pub fn declare<S: Store + ?Sized>(
        &self,
        store: &S,
        builder: RelationBuilder,
    ) -> Result<PolyField> {
        builder.validate()?;
        let mut relations = self.relations.write().unwrap_or_else(|e| e.into_inner());

        let source = builder.source().type_name();
        if relations
            .iter()
            .any(|r| r.source_type() == source && r.name() == builder.name())
        {
            return Err(Error::config(format!(
                "relation {}.{} is already declared",
                source,
                builder.name()
            )));
        }

        let id = self.registry.next_relation_id();
        let relation = builder.build(id, Arc::clone(&self.registry))?;
        if relations
            .iter()
            .any(|r| r.through().name() == relation.through().name())
        {
            return Err(Error::config(format!(
                "join table '{}' of {} is used by another relation",
                relation.through().name(),
                relation.qualified_name()
            )));
        }
        self.registry.register_info(*relation.source());

        if relation.through().is_auto_created() {
            store.create_table(relation.through().table())?;
        }

        tracing::info!(
            relation = %relation.qualified_name(),
            through = %relation.through().name(),
            targets = relation.targets().len(),
            open = relation.is_open(),
            "Declared relation"
        );
        let relation = Arc::new(relation);
        relations.push(Arc::clone(&relation));
        Ok(PolyField::new(relation))
    }

    /// Declare a relation from its description.
    ///
    /// The source and target types must already be registered.
    pub fn rehydrate<S: Store + ?Sized>(
        &self,
        store: &S,
        description: &RelationDescription,
    ) -> Result<PolyField> {
        let builder = RelationBuilder::from_description(description, &self.registry)?;
        self.declare(store, builder)
    }

    pub fn relation(&self, id: RelationId) -> Option<Arc<Relation>> {
        self.read().iter().find(|r| r.id() == id).cloned()
    }

    /// The field handle of `source`'s relation `name`.
    pub fn field(&self, source: &TypeName, name: &str) -> Option<PolyField> {
        self.read()
            .iter()
            .find(|r| r.source_type() == *source && r.name() == name)
            .cloned()
            .map(PolyField::new)
    }

    pub fn relations(&self) -> Vec<Arc<Relation>> {
        self.read().clone()
    }

    /// Relations declared on model type `source`.
    pub fn relations_for_source(&self, source: &TypeName) -> Vec<Arc<Relation>> {
        self.read()
            .iter()
            .filter(|r| r.source_type() == *source)
            .cloned()
            .collect()
    }

    /// Relations that accept objects of type `target`.
    pub fn relations_targeting(&self, target: &TypeName) -> Vec<Arc<Relation>> {
        let Some(tag) = self.registry.tag_of_name(target) else {
            return Vec::new();
        };
        let ids = self.registry.relations_targeting(tag);
        self.read()
            .iter()
            .filter(|r| ids.contains(&r.id()) && r.accepts(tag))
            .cloned()
            .collect()
    }

    /// The reverse accessors published on type `target`.
    ///
    /// Relations with a hidden related name publish none.
    pub fn reverse_accessors(&self, target: &TypeName) -> Vec<ReverseAccessor> {
        self.relations_targeting(target)
            .into_iter()
            .filter_map(|relation| {
                let name = relation.accessor_name()?;
                Some(ReverseAccessor::new(relation, name, target.clone()))
            })
            .collect()
    }

    /// The reverse accessor named `name` on type `target`.
    pub fn reverse_accessor(&self, target: &TypeName, name: &str) -> Option<ReverseAccessor> {
        self.reverse_accessors(target)
            .into_iter()
            .find(|accessor| accessor.name() == name)
    }

    /// Listen to deletions on every relation.
    pub fn connect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DeletionEvent<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        self.signals.connect(listener)
    }

    /// Listen to deletions on one relation.
    pub fn connect_to<F>(&self, relation: RelationId, listener: F) -> ListenerId
    where
        F: Fn(&DeletionEvent<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        self.signals.connect_to(relation, listener)
    }

    pub fn disconnect(&self, id: ListenerId) -> bool {
        self.signals.disconnect(id)
    }

    /// Delete `objects`, applying every relation's cascade policy.
    ///
    /// Runs as one atomic unit: a store failure at any step leaves
    /// neither the objects deleted nor any join row removed. A vetoed
    /// cascade is not a failure; it shows up in the report.
    pub fn delete<S: Store + ?Sized>(
        &self,
        store: &S,
        objects: &[&dyn AnyModel],
    ) -> Result<DeletionReport> {
        let relations = self.relations();
        let coordinator = CascadeCoordinator::new(&self.registry, &relations, &self.signals);
        atomic(store, || coordinator.delete(store, objects))
    }

    /// Descriptions of every declared relation, in declaration order.
    pub fn describe_all(&self) -> Vec<RelationDescription> {
        self.read().iter().map(|r| r.describe()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_models::{Label, Links, Project, Task, memory_store};

    #[test]
    fn test_declare_creates_join_table() {
        let store = memory_store();
        let catalog = Catalog::new();
        let field = catalog
            .declare(
                &store,
                RelationBuilder::new::<Links>("related").target::<Project>(),
            )
            .unwrap();
        assert!(store.has_table("app_links_related"));
        assert_eq!(field.id(), RelationId(1));
        assert!(catalog.registry().tag_of::<Links>().is_some());
        assert!(catalog.field(&Links::type_name(), "related").is_some());
    }

    #[test]
    fn test_duplicate_declaration_fails() {
        let store = memory_store();
        let catalog = Catalog::new();
        catalog
            .declare(&store, RelationBuilder::new::<Links>("related"))
            .unwrap();
        let err = catalog
            .declare(&store, RelationBuilder::new::<Links>("related"))
            .unwrap_err();
        assert!(err.is_configuration_error());
        assert_eq!(catalog.relations().len(), 1);
    }

    #[test]
    fn test_reverse_accessor_lookup() {
        let store = memory_store();
        let catalog = Catalog::new();
        catalog
            .declare(
                &store,
                RelationBuilder::new::<Links>("related")
                    .target::<Project>()
                    .target::<Task>(),
            )
            .unwrap();
        catalog
            .declare(
                &store,
                RelationBuilder::new::<Links>("hidden")
                    .target::<Project>()
                    .related_name("+"),
            )
            .unwrap();

        let accessors = catalog.reverse_accessors(&Project::type_name());
        assert_eq!(accessors.len(), 1);
        assert_eq!(accessors[0].name(), "links_set");
        assert!(catalog
            .reverse_accessor(&Task::type_name(), "links_set")
            .is_some());
        assert!(catalog
            .reverse_accessor(&Label::type_name(), "links_set")
            .is_none());
        assert_eq!(catalog.relations_targeting(&Project::type_name()).len(), 2);
    }

    #[test]
    fn test_rehydrate_round_trip() {
        let store = memory_store();
        let catalog = Catalog::new();
        let field = catalog
            .declare(
                &store,
                RelationBuilder::new::<Links>("related")
                    .target::<Project>()
                    .db_table("links_objects"),
            )
            .unwrap();
        let description = field.describe();

        let other = Catalog::with_registry(Arc::clone(catalog.registry()));
        let rebuilt = other.rehydrate(&store, &description).unwrap();
        assert_eq!(rebuilt.describe(), description);
        assert_eq!(rebuilt.relation().through().name(), "links_objects");
    }
}
