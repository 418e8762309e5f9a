//! Table definitions consumed by stores and schema generators.
//!
//! A [`TableDef`] describes columns, keys and constraints independently of
//! any SQL dialect. Join tables and model tables are both described this way,
//! so an in-memory store and a DDL generator can work from the same value.

use crate::filter::OrderBy;
use crate::value::KeyKind;
use serde::{Deserialize, Serialize};

/// Column data types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Integer,
    BigInt,
    Boolean,
    VarChar(u32),
    Text,
    Blob,
    Date,
    Time,
    Timestamp,
    Uuid,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Uuid => "UUID".to_string(),
        }
    }

    /// The column type that stores keys of the given kind natively.
    pub const fn for_key(kind: KeyKind) -> Self {
        match kind {
            KeyKind::Integer => SqlType::BigInt,
            KeyKind::Text => SqlType::Text,
            KeyKind::Uuid => SqlType::Uuid,
            KeyKind::Date => SqlType::Date,
            KeyKind::Time => SqlType::Time,
            KeyKind::Timestamp => SqlType::Timestamp,
            KeyKind::Bytes => SqlType::Blob,
        }
    }
}

/// A foreign-key reference from a column to a model table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub references: Option<ForeignKeyRef>,
}

impl ColumnDef {
    /// Create a non-null column.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            references: None,
        }
    }

    /// Mark this column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark this column as auto-incrementing (stores assign values on insert).
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Allow NULL values.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Reference a model table's column.
    #[must_use]
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKeyRef {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

/// A polymorphic reference made of a type-tag column and a target-key column.
///
/// The two columns always move together: they are declared, renamed and
/// altered as one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericKeyDef {
    /// Logical name of the reference (e.g. `"target"`)
    pub name: String,
    pub type_column: String,
    pub key_column: String,
}

impl GenericKeyDef {
    pub fn new(
        name: impl Into<String>,
        type_column: impl Into<String>,
        key_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            type_column: type_column.into(),
            key_column: key_column.into(),
        }
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Unique constraints (each a list of column names)
    pub unique: Vec<Vec<String>>,
    /// Polymorphic references declared on this table
    pub generic_keys: Vec<GenericKeyDef>,
    /// Default ordering for reads
    pub ordering: Vec<OrderBy>,
}

impl TableDef {
    /// Create an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            unique: Vec::new(),
            generic_keys: Vec::new(),
            ordering: Vec::new(),
        }
    }

    /// Add a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a unique constraint.
    #[must_use]
    pub fn unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique
            .push(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Declare a polymorphic reference.
    #[must_use]
    pub fn generic_key(mut self, key: GenericKeyDef) -> Self {
        self.generic_keys.push(key);
        self
    }

    /// Set the default ordering.
    #[must_use]
    pub fn ordering(mut self, ordering: Vec<OrderBy>) -> Self {
        self.ordering = ordering;
        self
    }

    /// Look up a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The primary key column, if any.
    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns that reference the given model table.
    pub fn columns_referencing(&self, table: &str) -> Vec<&ColumnDef> {
        self.columns
            .iter()
            .filter(|c| c.references.as_ref().is_some_and(|r| r.table == table))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_lookups() {
        let table = TableDef::new("rel_links")
            .column(ColumnDef::new("id", SqlType::BigInt).primary_key().auto_increment())
            .column(ColumnDef::new("links_id", SqlType::BigInt).references("links", "id"))
            .column(ColumnDef::new("other_id", SqlType::BigInt).nullable().references("links", "id"))
            .column(ColumnDef::new("target_ct", SqlType::BigInt))
            .column(ColumnDef::new("target_fk", SqlType::VarChar(255)))
            .generic_key(GenericKeyDef::new("target", "target_ct", "target_fk"))
            .unique(["links_id", "target_ct", "target_fk"]);

        assert_eq!(table.primary_key().map(|c| c.name.as_str()), Some("id"));
        assert_eq!(table.columns_referencing("links").len(), 2);
        assert!(table.get_column("target_fk").is_some());
        assert_eq!(table.unique[0].len(), 3);
        assert_eq!(SqlType::VarChar(16).sql_name(), "VARCHAR(16)");
        assert_eq!(SqlType::for_key(KeyKind::Uuid), SqlType::Uuid);
    }
}
