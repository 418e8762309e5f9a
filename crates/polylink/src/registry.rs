//! The type registry: stable tags for model types.
//!
//! Join tables never store type names. Each model type gets a small integer
//! tag the first time it is registered, and the registry maps tags back to
//! the model's table, key column and row loader so join rows can be turned
//! back into objects. It also keeps the reverse index from a target type to
//! every relation that may reference it, which target-side cascades need.

use crate::descriptor::RelationId;
use polylink_core::{
    AnyModel, Error, Filter, KeyTooLongError, Model, ModelInfo, ModelRef, Query, Result, Store,
    TypeName, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Opaque identifier of a model type inside join tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(pub i64);

impl TypeTag {
    /// The value stored in type-tag columns.
    pub fn value(self) -> Value {
        Value::BigInt(self.0)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered model type.
#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub tag: TypeTag,
    pub name: TypeName,
    pub info: ModelInfo,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Entry for tag `n` lives at index `n - 1`
    entries: Vec<Arc<TypeEntry>>,
    by_name: HashMap<TypeName, TypeTag>,
    /// Relations that may hold join rows pointing at each type
    targeted_by: HashMap<TypeTag, Vec<RelationId>>,
    /// Last relation id handed out
    relations_declared: usize,
}

/// Maps model types to tags and back.
///
/// Registration takes a write lock; lookups only read.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register model type `M`, returning its tag. Idempotent.
    pub fn register<M: Model>(&self) -> TypeTag {
        self.register_info(ModelInfo::of::<M>())
    }

    /// Register the type of a type-erased object.
    pub fn register_object(&self, object: &dyn AnyModel) -> TypeTag {
        self.register_info(object.model_info())
    }

    /// Register a model type from its static info. Idempotent.
    pub fn register_info(&self, info: ModelInfo) -> TypeTag {
        let name = info.type_name();
        if let Some(tag) = self.read().by_name.get(&name) {
            return *tag;
        }

        let mut inner = self.write();
        // Another writer may have registered it between the two locks
        if let Some(tag) = inner.by_name.get(&name) {
            return *tag;
        }
        let tag = TypeTag(inner.entries.len() as i64 + 1);
        tracing::debug!(type_name = %name, tag = tag.0, table = info.table, "Registered type");
        inner.by_name.insert(name.clone(), tag);
        inner.entries.push(Arc::new(TypeEntry { tag, name, info }));
        tag
    }

    /// Tag of a registered type name.
    pub fn tag_of_name(&self, name: &TypeName) -> Option<TypeTag> {
        self.read().by_name.get(name).copied()
    }

    /// Tag of model type `M`, if registered.
    pub fn tag_of<M: Model>(&self) -> Option<TypeTag> {
        self.tag_of_name(&M::type_name())
    }

    /// Tag of an object's type, if registered.
    pub fn tag_for(&self, object: &dyn AnyModel) -> Option<TypeTag> {
        self.tag_of_name(&object.model_type())
    }

    /// Tag of an object's type, or `UnknownType`.
    pub fn require_tag(&self, object: &dyn AnyModel) -> Result<TypeTag> {
        self.tag_for(object)
            .ok_or_else(|| Error::unknown_type(object.model_type().to_string(), None))
    }

    pub fn entry(&self, tag: TypeTag) -> Option<Arc<TypeEntry>> {
        let index = usize::try_from(tag.0).ok()?.checked_sub(1)?;
        self.read().entries.get(index).cloned()
    }

    pub fn entry_by_name(&self, name: &TypeName) -> Option<Arc<TypeEntry>> {
        let tag = self.tag_of_name(name)?;
        self.entry(tag)
    }

    /// All registered types, in tag order.
    pub fn entries(&self) -> Vec<Arc<TypeEntry>> {
        self.read().entries.clone()
    }

    /// Record that `relation` may reference objects of type `tag`.
    pub fn link_relation(&self, tag: TypeTag, relation: RelationId) {
        let mut inner = self.write();
        let relations = inner.targeted_by.entry(tag).or_default();
        if !relations.contains(&relation) {
            relations.push(relation);
        }
    }

    /// A relation id unique among every catalog sharing this registry.
    pub fn next_relation_id(&self) -> RelationId {
        let mut inner = self.write();
        inner.relations_declared += 1;
        RelationId(inner.relations_declared)
    }

    /// Relations that may reference objects of type `tag`.
    pub fn relations_targeting(&self, tag: TypeTag) -> Vec<RelationId> {
        self.read()
            .targeted_by
            .get(&tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Encode an object's primary key for a target-key column.
    ///
    /// Fails with `KeyTooLong` when the encoded key is wider than
    /// `max_length` characters.
    pub fn key_of(
        &self,
        object: &dyn AnyModel,
        max_length: Option<u32>,
        relation: &str,
    ) -> Result<String> {
        let key = object.key_value().encode_key().ok_or_else(|| {
            Error::Custom(format!(
                "{} object has no primary key value and cannot be linked",
                object.model_type()
            ))
        })?;
        if let Some(max) = max_length {
            let max = max as usize;
            if key.chars().count() > max {
                return Err(Error::KeyTooLong(KeyTooLongError {
                    key,
                    max_length: max,
                    relation: Some(relation.to_string()),
                }));
            }
        }
        Ok(key)
    }

    /// Load all objects of type `tag` whose keys are in `keys`, in one query.
    ///
    /// Keys with no matching row are absent from the result.
    #[tracing::instrument(level = "debug", skip(self, store, keys), fields(keys = keys.len()))]
    pub fn resolve_keys<S: Store + ?Sized>(
        &self,
        store: &S,
        tag: TypeTag,
        keys: &[Value],
    ) -> Result<HashMap<Value, ModelRef>> {
        let entry = self
            .entry(tag)
            .ok_or_else(|| Error::unknown_type(tag.to_string(), None))?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let query = Query::table(entry.info.table)
            .filter(Filter::in_list(entry.info.primary_key, keys.iter().cloned()));
        let rows = store.query(&query)?;

        let mut resolved = HashMap::with_capacity(rows.len());
        for row in &rows {
            let Some(key) = row.get_by_name(entry.info.primary_key).cloned() else {
                continue;
            };
            resolved.insert(key, entry.info.load(row)?);
        }
        tracing::debug!(
            type_name = %entry.name,
            requested = keys.len(),
            resolved = resolved.len(),
            "Resolved keys"
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_models::{Label, Project, Task, memory_store};
    use polylink_core::KeyKind;

    #[test]
    fn test_register_is_idempotent() {
        let registry = TypeRegistry::new();
        let project = registry.register::<Project>();
        let task = registry.register::<Task>();
        assert_ne!(project, task);
        assert_eq!(registry.register::<Project>(), project);
        assert_eq!(registry.tag_of::<Task>(), Some(task));
        assert_eq!(registry.entries().len(), 2);

        let entry = registry.entry(project).unwrap();
        assert_eq!(entry.name.to_string(), "app.Project");
        assert!(registry.entry(TypeTag(0)).is_none());
        assert!(registry.entry(TypeTag(99)).is_none());
    }

    #[test]
    fn test_tag_for_object() {
        let registry = TypeRegistry::new();
        let task = Task::new(20, "t");
        assert!(registry.tag_for(&task).is_none());
        assert!(matches!(registry.require_tag(&task), Err(Error::UnknownType(_))));
        let tag = registry.register_object(&task);
        assert_eq!(registry.tag_for(&task), Some(tag));
    }

    #[test]
    fn test_key_of_checks_width() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry.key_of(&Project::new(10, "p"), Some(16), "rel").unwrap(),
            "10"
        );
        let long = Label::new(&"k".repeat(17));
        assert_eq!(long.model_info().key_kind, KeyKind::Text);
        let err = registry.key_of(&long, Some(16), "rel").unwrap_err();
        match err {
            Error::KeyTooLong(e) => {
                assert_eq!(e.max_length, 16);
                assert_eq!(e.relation.as_deref(), Some("rel"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.key_of(&long, None, "rel").is_ok());
    }

    #[test]
    fn test_resolve_keys_is_one_query() {
        let store = memory_store();
        let registry = TypeRegistry::new();
        let tag = registry.register::<Project>();
        for id in 1..=5 {
            store.insert_object(&Project::new(id, "p")).unwrap();
        }
        store.reset_stats();

        let keys = vec![Value::BigInt(1), Value::BigInt(3), Value::BigInt(42)];
        let resolved = registry.resolve_keys(&store, tag, &keys).unwrap();
        assert_eq!(store.stats().queries, 1);
        assert_eq!(resolved.len(), 2);
        assert!(resolved.contains_key(&Value::BigInt(3)));
        assert!(!resolved.contains_key(&Value::BigInt(42)));

        assert!(registry.resolve_keys(&store, tag, &[]).unwrap().is_empty());
        assert_eq!(store.stats().queries, 1);
    }

    #[test]
    fn test_reverse_index() {
        let registry = TypeRegistry::new();
        let tag = registry.register::<Project>();
        registry.link_relation(tag, RelationId(1));
        registry.link_relation(tag, RelationId(1));
        registry.link_relation(tag, RelationId(2));
        assert_eq!(registry.relations_targeting(tag), vec![RelationId(1), RelationId(2)]);
        assert!(registry.relations_targeting(TypeTag(7)).is_empty());
        assert_eq!(registry.next_relation_id(), RelationId(1));
        assert_eq!(registry.next_relation_id(), RelationId(2));
    }
}
