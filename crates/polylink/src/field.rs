//! Field-like handles on relations.
//!
//! A [`PolyField`] is what a model holds for a declared relation: it hands
//! out managers bound to source instances. A [`ReverseAccessor`] is the
//! mirror image published on each target type.

use crate::descriptor::{CascadePolicy, Relation, RelationDescription, RelationId};
use crate::manager::{InstanceManager, SetOutcome};
use crate::prefetch::{ForwardPrefetch, ReversePrefetch, prefetch_forward, prefetch_reverse};
use crate::registry::TypeTag;
use polylink_core::{AnyModel, Error, Model, ModelInfo, Result, Store, TypeName};
use polylink_schema::{MigrationStep, alter_through, create_through, drop_through};
use std::sync::Arc;

/// The source-side handle of a relation.
#[derive(Debug, Clone)]
pub struct PolyField {
    relation: Arc<Relation>,
}

impl PolyField {
    pub(crate) fn new(relation: Arc<Relation>) -> Self {
        Self { relation }
    }

    pub fn relation(&self) -> &Arc<Relation> {
        &self.relation
    }

    pub fn id(&self) -> RelationId {
        self.relation.id()
    }

    pub fn name(&self) -> &str {
        self.relation.name()
    }

    /// The manager for `instance`'s related objects.
    pub fn get<'a, S: Store + ?Sized>(
        &self,
        store: &'a S,
        instance: &dyn AnyModel,
    ) -> Result<InstanceManager<'a, S>> {
        InstanceManager::for_source(store, Arc::clone(&self.relation), instance)
    }

    /// Replace `instance`'s related objects with `objects`.
    pub fn set<S: Store + ?Sized>(
        &self,
        store: &S,
        instance: &dyn AnyModel,
        objects: &[&dyn AnyModel],
    ) -> Result<SetOutcome> {
        self.get(store, instance)?.set(objects, false)
    }

    /// Accept another target type at runtime.
    pub fn add_target_type<M: Model>(&self, on_delete: Option<CascadePolicy>, auto: bool) -> TypeTag {
        self.relation
            .add_target_type(ModelInfo::of::<M>(), on_delete, auto)
    }

    pub fn related_models(&self, include_auto: bool) -> Vec<TypeName> {
        self.relation.related_models(include_auto)
    }

    pub fn describe(&self) -> RelationDescription {
        self.relation.describe()
    }

    /// Load the related objects of many sources at once.
    pub fn prefetch<S: Store + ?Sized>(
        &self,
        store: &S,
        sources: &[&dyn AnyModel],
    ) -> Result<ForwardPrefetch> {
        prefetch_forward(store, &self.relation, sources)
    }

    /// The migration creating this relation's join table.
    pub fn create_migration(&self) -> MigrationStep {
        create_through(self.relation.through())
    }

    /// The migration dropping this relation's join table.
    pub fn drop_migration(&self) -> MigrationStep {
        drop_through(self.relation.through())
    }

    /// The migration turning this relation's join table into `to`'s.
    pub fn alter_migration(&self, to: &PolyField) -> MigrationStep {
        alter_through(self.relation.through(), to.relation.through())
    }
}

/// The target-side handle of a relation, for one target type.
#[derive(Debug, Clone)]
pub struct ReverseAccessor {
    relation: Arc<Relation>,
    name: String,
    target: TypeName,
}

impl ReverseAccessor {
    pub(crate) fn new(relation: Arc<Relation>, name: String, target: TypeName) -> Self {
        Self {
            relation,
            name,
            target,
        }
    }

    /// The accessor name on the target type.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_type(&self) -> &TypeName {
        &self.target
    }

    pub fn relation(&self) -> &Arc<Relation> {
        &self.relation
    }

    /// The manager for the sources linking to `target`.
    pub fn get<'a, S: Store + ?Sized>(
        &self,
        store: &'a S,
        target: &dyn AnyModel,
    ) -> Result<InstanceManager<'a, S>> {
        if target.model_type() != self.target {
            return Err(Error::unknown_type(
                target.model_type().to_string(),
                Some(&self.relation.qualified_name()),
            ));
        }
        InstanceManager::for_target(store, Arc::clone(&self.relation), target)
    }

    /// Load the sources of many targets at once.
    pub fn prefetch<S: Store + ?Sized>(
        &self,
        store: &S,
        targets: &[&dyn AnyModel],
    ) -> Result<ReversePrefetch> {
        prefetch_reverse(store, &self.relation, targets)
    }
}
