//! Model traits for mapping structs to tables.
//!
//! [`Model`] is the static, per-type contract (table name, key column,
//! row conversion). Generic relations hold objects of many different types
//! at once, so every model is also usable through the object-safe
//! [`AnyModel`] trait and shared as a [`ModelRef`].

use crate::Result;
use crate::row::Row;
use crate::table::{ColumnDef, SqlType, TableDef};
use crate::value::{KeyKind, Value};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The qualified name of a model type: `app_label.ModelName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeName {
    pub app_label: String,
    pub model: String,
}

impl TypeName {
    pub fn new(app_label: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model: model.into(),
        }
    }

    /// Parse `"app.Model"`.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (app, model) = qualified.split_once('.')?;
        if app.is_empty() || model.is_empty() || model.contains('.') {
            return None;
        }
        Some(Self::new(app, model))
    }

    /// The lowercased model name, used for default accessor names.
    pub fn model_lower(&self) -> String {
        self.model.to_lowercase()
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model)
    }
}

/// Trait for types that map to a table with a single-column primary key.
pub trait Model: Sized + Send + Sync + fmt::Debug + 'static {
    /// The name of the table.
    const TABLE_NAME: &'static str;

    /// The primary key column name.
    const PRIMARY_KEY: &'static str;

    /// Application label, the first half of the qualified type name.
    const APP_LABEL: &'static str;

    /// Model name, the second half of the qualified type name.
    const MODEL_NAME: &'static str;

    /// Kind of the primary key.
    const KEY_KIND: KeyKind = KeyKind::Integer;

    /// Convert this model instance to a row of values.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct a model instance from a row.
    fn from_row(row: &Row) -> Result<Self>;

    /// Get the value of the primary key.
    fn primary_key_value(&self) -> Value;

    /// The qualified type name.
    fn type_name() -> TypeName {
        TypeName::new(Self::APP_LABEL, Self::MODEL_NAME)
    }

    /// Table definition used when a store needs to create the table.
    ///
    /// The default declares only the primary key; stores keep any other
    /// columns they are given.
    fn table_def() -> TableDef {
        TableDef::new(Self::TABLE_NAME)
            .column(ColumnDef::new(Self::PRIMARY_KEY, SqlType::for_key(Self::KEY_KIND)).primary_key())
    }
}

/// Object-safe view of any [`Model`].
///
/// Implemented for every model; do not implement it by hand.
pub trait AnyModel: Any + Send + Sync + fmt::Debug {
    /// The qualified type name.
    fn model_type(&self) -> TypeName;

    /// The table this object lives in.
    fn table_name(&self) -> &'static str;

    /// The primary key column of that table.
    fn primary_key_column(&self) -> &'static str;

    /// Kind of the primary key.
    fn key_kind(&self) -> KeyKind;

    /// The primary key value.
    fn key_value(&self) -> Value;

    /// Row representation of this object.
    fn to_values(&self) -> Vec<(&'static str, Value)>;

    /// Static information about this object's model type.
    fn model_info(&self) -> ModelInfo;

    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<M: Model> AnyModel for M {
    fn model_type(&self) -> TypeName {
        M::type_name()
    }

    fn table_name(&self) -> &'static str {
        M::TABLE_NAME
    }

    fn primary_key_column(&self) -> &'static str {
        M::PRIMARY_KEY
    }

    fn key_kind(&self) -> KeyKind {
        M::KEY_KIND
    }

    fn key_value(&self) -> Value {
        self.primary_key_value()
    }

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        self.to_row()
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo::of::<M>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A shared, type-erased model instance.
pub type ModelRef = Arc<dyn AnyModel>;

/// Builds a type-erased object from a row of its table.
pub type RowLoader = fn(&Row) -> Result<ModelRef>;

fn load_row<M: Model>(row: &Row) -> Result<ModelRef> {
    Ok(Arc::new(M::from_row(row)?))
}

/// Everything needed to find and load objects of one model type without
/// knowing the type statically.
#[derive(Clone, Copy)]
pub struct ModelInfo {
    pub app_label: &'static str,
    pub model_name: &'static str,
    pub table: &'static str,
    pub primary_key: &'static str,
    pub key_kind: KeyKind,
    pub loader: RowLoader,
    pub table_def: fn() -> TableDef,
}

impl ModelInfo {
    pub fn of<M: Model>() -> Self {
        Self {
            app_label: M::APP_LABEL,
            model_name: M::MODEL_NAME,
            table: M::TABLE_NAME,
            primary_key: M::PRIMARY_KEY,
            key_kind: M::KEY_KIND,
            loader: load_row::<M>,
            table_def: M::table_def,
        }
    }

    pub fn type_name(&self) -> TypeName {
        TypeName::new(self.app_label, self.model_name)
    }

    /// Load an object from a row of this model's table.
    pub fn load(&self, row: &Row) -> Result<ModelRef> {
        (self.loader)(row)
    }
}

impl fmt::Debug for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInfo")
            .field("type", &format_args!("{}.{}", self.app_label, self.model_name))
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("key_kind", &self.key_kind)
            .finish_non_exhaustive()
    }
}

impl<'a> dyn AnyModel + 'a {
    /// Borrow as a concrete model type.
    pub fn downcast_ref<M: Model>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    /// Is this object of model type `M`?
    pub fn is<M: Model>(&self) -> bool {
        self.as_any().is::<M>()
    }

    /// Same type and same primary key.
    pub fn same_object(&self, other: &dyn AnyModel) -> bool {
        self.model_type() == other.model_type() && self.key_value() == other.key_value()
    }
}

/// Convert a shared object to its concrete type.
pub fn downcast_arc<M: Model>(object: ModelRef) -> Option<Arc<M>> {
    object.into_any_arc().downcast::<M>().ok()
}

/// Build a row ready for insertion from a model instance.
pub fn model_row(object: &dyn AnyModel) -> Row {
    Row::from_pairs(object.to_values())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Project {
        id: i64,
        name: String,
    }

    impl Model for Project {
        const TABLE_NAME: &'static str = "app_project";
        const PRIMARY_KEY: &'static str = "id";
        const APP_LABEL: &'static str = "app";
        const MODEL_NAME: &'static str = "Project";

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::BigInt(self.id)), ("name", Value::from(self.name.as_str()))]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
                name: row.get_named("name")?,
            })
        }

        fn primary_key_value(&self) -> Value {
            Value::BigInt(self.id)
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Project::type_name().to_string(), "app.Project");
        assert_eq!(TypeName::parse("app.Project"), Some(Project::type_name()));
        assert_eq!(TypeName::parse("Project"), None);
        assert_eq!(TypeName::parse("a.b.c"), None);
        assert_eq!(Project::type_name().model_lower(), "project");
    }

    #[test]
    fn test_erased_access_and_downcast() {
        let project = Project {
            id: 10,
            name: "p".to_string(),
        };
        let erased: ModelRef = Arc::new(project.clone());
        assert!(erased.is::<Project>());
        assert_eq!(erased.downcast_ref::<Project>(), Some(&project));
        assert_eq!(erased.key_value(), Value::BigInt(10));
        assert_eq!(erased.table_name(), "app_project");
        assert!(erased.same_object(&project));

        let row = model_row(erased.as_ref());
        assert_eq!(Project::from_row(&row).unwrap(), project);

        let info = erased.model_info();
        assert_eq!(info.type_name(), Project::type_name());
        let loaded = info.load(&row).unwrap();
        assert!(loaded.same_object(erased.as_ref()));

        let back = downcast_arc::<Project>(erased).unwrap();
        assert_eq!(back.name, "p");
        assert_eq!(Project::table_def().primary_key().map(|c| c.name.as_str()), Some("id"));
    }
}
