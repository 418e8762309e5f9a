//! Join-table ("through") schema for generic relations.
//!
//! Every relation stores its links in one join table with four roles:
//! the link id, the source foreign key, and a generic key made of a type-tag
//! column and a target-key column. The table is either generated from the
//! relation's settings or supplied by the user, in which case the roles are
//! detected from its foreign keys and generic keys.

use polylink_core::{
    ColumnDef, Error, GenericKeyDef, KeyKind, OrderBy, Result, Row, SqlType, TableDef,
    ThroughSchemaError, ThroughSchemaErrorKind, Value,
};
use serde::{Deserialize, Serialize};

/// Source foreign-key column of generated join tables.
pub const SRC_COLUMN: &str = "gm2m_src";
/// Name of the generic key of generated join tables.
pub const TGT_NAME: &str = "gm2m_tgt";
/// Type-tag column of generated join tables.
pub const CT_COLUMN: &str = "gm2m_ct";
/// Target-key column of generated join tables.
pub const PK_COLUMN: &str = "gm2m_pk";
/// Link id column of generated join tables.
pub const ID_COLUMN: &str = "id";

/// Default width of the target-key column.
pub const DEFAULT_KEY_MAX_LENGTH: u32 = 16;
/// Default limit for generated table names.
pub const DEFAULT_MAX_NAME_LENGTH: usize = 63;

const HASH_LEN: usize = 4;

/// Shorten `name` to at most `max_length` characters.
///
/// Long names keep their prefix and get a 4-hex-digit md5 suffix so that
/// distinct long names stay distinct.
pub fn truncate_name(name: &str, max_length: usize) -> String {
    if name.chars().count() <= max_length || max_length <= HASH_LEN {
        return name.to_string();
    }
    let digest = format!("{:x}", md5::compute(name.as_bytes()));
    let prefix: String = name.chars().take(max_length - HASH_LEN).collect();
    format!("{}{}", prefix, &digest[..HASH_LEN])
}

/// The source model a generated join table points to.
#[derive(Debug, Clone, Copy)]
pub struct SourceTable<'a> {
    pub table: &'a str,
    pub primary_key: &'a str,
    pub key_kind: KeyKind,
}

/// Which join-table column plays which role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughColumns {
    /// Foreign key to the source model
    pub src: String,
    /// Name of the generic key grouping `tgt_ct` and `tgt_fk`
    pub tgt: String,
    /// Type-tag column
    pub tgt_ct: String,
    /// Target-key column
    pub tgt_fk: String,
}

impl Default for ThroughColumns {
    fn default() -> Self {
        Self {
            src: SRC_COLUMN.to_string(),
            tgt: TGT_NAME.to_string(),
            tgt_ct: CT_COLUMN.to_string(),
            tgt_fk: PK_COLUMN.to_string(),
        }
    }
}

/// A relation's join table and its column roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughSchema {
    table: TableDef,
    columns: ThroughColumns,
    auto_created: bool,
}

impl ThroughSchema {
    /// Generate the join table for a relation field.
    ///
    /// The table is named `<source table>_<field>` (or `db_table`), truncated
    /// to `max_name_length`.
    pub fn auto(
        source: SourceTable<'_>,
        field_name: &str,
        db_table: Option<&str>,
        key_max_length: u32,
        max_name_length: usize,
    ) -> Self {
        let name = match db_table {
            Some(name) => name.to_string(),
            None => truncate_name(&format!("{}_{}", source.table, field_name), max_name_length),
        };
        let columns = ThroughColumns::default();
        let table = TableDef::new(name)
            .column(
                ColumnDef::new(ID_COLUMN, SqlType::BigInt)
                    .primary_key()
                    .auto_increment(),
            )
            .column(
                ColumnDef::new(&columns.src, SqlType::for_key(source.key_kind))
                    .references(source.table, source.primary_key),
            )
            .column(ColumnDef::new(&columns.tgt_ct, SqlType::BigInt))
            .column(ColumnDef::new(&columns.tgt_fk, SqlType::VarChar(key_max_length)))
            .unique([&columns.src, &columns.tgt_ct, &columns.tgt_fk])
            .generic_key(GenericKeyDef::new(
                &columns.tgt,
                &columns.tgt_ct,
                &columns.tgt_fk,
            ));

        tracing::debug!(
            table = %table.name,
            source = %source.table,
            key_max_length,
            "Generated join table"
        );

        Self {
            table,
            columns,
            auto_created: true,
        }
    }

    /// Use a user-supplied join table.
    ///
    /// The source role is the column referencing `source_table`; the target
    /// role is the table's generic key. When either is ambiguous,
    /// `through_fields` (`(source column, generic key name)`) picks one.
    pub fn from_table(
        table: TableDef,
        source_table: &str,
        through_fields: Option<(&str, &str)>,
    ) -> Result<Self> {
        let src = match through_fields {
            Some((src, _)) => {
                let column = table
                    .get_column(src)
                    .ok_or_else(|| unknown_column(&table, src))?;
                if !column
                    .references
                    .as_ref()
                    .is_some_and(|r| r.table == source_table)
                {
                    return Err(schema_error(
                        ThroughSchemaErrorKind::MissingRole,
                        &table,
                        format!("column '{}' does not reference '{}'", src, source_table),
                    ));
                }
                column.name.clone()
            }
            None => {
                let candidates = table.columns_referencing(source_table);
                match candidates.as_slice() {
                    [only] => only.name.clone(),
                    [] => {
                        return Err(schema_error(
                            ThroughSchemaErrorKind::MissingRole,
                            &table,
                            format!("no column references source table '{}'", source_table),
                        ));
                    }
                    _ => {
                        return Err(schema_error(
                            ThroughSchemaErrorKind::AmbiguousRole,
                            &table,
                            format!(
                                "{} columns reference source table '{}'; use through_fields",
                                candidates.len(),
                                source_table
                            ),
                        ));
                    }
                }
            }
        };

        let tgt = match through_fields {
            Some((_, tgt)) => table
                .generic_keys
                .iter()
                .find(|k| k.name == tgt)
                .ok_or_else(|| unknown_column(&table, tgt))?
                .clone(),
            None => match table.generic_keys.as_slice() {
                [only] => only.clone(),
                [] => {
                    return Err(schema_error(
                        ThroughSchemaErrorKind::MissingRole,
                        &table,
                        "no generic key to target objects",
                    ));
                }
                keys => {
                    return Err(schema_error(
                        ThroughSchemaErrorKind::AmbiguousRole,
                        &table,
                        format!("{} generic keys; use through_fields", keys.len()),
                    ));
                }
            },
        };

        for column in [&tgt.type_column, &tgt.key_column] {
            if table.get_column(column).is_none() {
                return Err(unknown_column(&table, column));
            }
        }

        tracing::debug!(
            table = %table.name,
            src = %src,
            tgt = %tgt.name,
            "Detected join table roles"
        );

        Ok(Self {
            columns: ThroughColumns {
                src,
                tgt: tgt.name,
                tgt_ct: tgt.type_column,
                tgt_fk: tgt.key_column,
            },
            table,
            auto_created: false,
        })
    }

    /// The join table name.
    pub fn name(&self) -> &str {
        &self.table.name
    }

    pub fn table(&self) -> &TableDef {
        &self.table
    }

    pub fn columns(&self) -> &ThroughColumns {
        &self.columns
    }

    /// Was the table generated (as opposed to supplied by the user)?
    pub fn is_auto_created(&self) -> bool {
        self.auto_created
    }

    /// Default ordering for reads through this table.
    pub fn ordering(&self) -> &[OrderBy] {
        &self.table.ordering
    }

    /// Declared width of the target-key column, if it has one.
    pub fn key_max_length(&self) -> Option<u32> {
        match self.table.get_column(&self.columns.tgt_fk)?.sql_type {
            SqlType::VarChar(len) => Some(len),
            _ => None,
        }
    }

    /// Columns that play no role (user payload such as `linked_as`).
    pub fn extra_columns(&self) -> Vec<&str> {
        let primary = self.table.primary_key().map(|c| c.name.as_str());
        self.table
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| {
                Some(*name) != primary
                    && *name != self.columns.src
                    && *name != self.columns.tgt_ct
                    && *name != self.columns.tgt_fk
            })
            .collect()
    }

    /// Build a join row for the generated layout.
    pub fn link_row(&self, source_key: Value, type_tag: i64, target_key: String) -> Row {
        Row::new(
            vec![
                self.columns.src.clone(),
                self.columns.tgt_ct.clone(),
                self.columns.tgt_fk.clone(),
            ],
            vec![source_key, Value::BigInt(type_tag), Value::Text(target_key)],
        )
    }

    /// A copy of this schema with a different join table name.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut out = self.clone();
        out.table.name = name.into();
        out
    }
}

fn schema_error(
    kind: ThroughSchemaErrorKind,
    table: &TableDef,
    message: impl Into<String>,
) -> Error {
    Error::BadThroughSchema(ThroughSchemaError {
        kind,
        table: table.name.clone(),
        message: message.into(),
    })
}

fn unknown_column(table: &TableDef, column: &str) -> Error {
    schema_error(
        ThroughSchemaErrorKind::UnknownColumn,
        table,
        format!("no column or generic key named '{}'", column),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceTable<'static> {
        SourceTable {
            table: "app_links",
            primary_key: "id",
            key_kind: KeyKind::Integer,
        }
    }

    fn rel_links() -> TableDef {
        TableDef::new("app_rellinks")
            .column(ColumnDef::new("id", SqlType::BigInt).primary_key().auto_increment())
            .column(ColumnDef::new("links", SqlType::BigInt).references("app_links", "id"))
            .column(ColumnDef::new("target_ct", SqlType::BigInt))
            .column(ColumnDef::new("target_fk", SqlType::VarChar(255)))
            .column(ColumnDef::new("linked_as", SqlType::VarChar(255)))
            .generic_key(GenericKeyDef::new("target", "target_ct", "target_fk"))
    }

    #[test]
    fn test_auto_layout() {
        let schema = ThroughSchema::auto(source(), "related_objects", None, 16, 63);
        assert_eq!(schema.name(), "app_links_related_objects");
        assert!(schema.is_auto_created());
        assert_eq!(schema.columns(), &ThroughColumns::default());
        assert_eq!(schema.key_max_length(), Some(16));
        assert_eq!(schema.table().unique, vec![vec![
            "gm2m_src".to_string(),
            "gm2m_ct".to_string(),
            "gm2m_pk".to_string()
        ]]);
        assert!(schema.extra_columns().is_empty());
        let src = schema.table().get_column("gm2m_src").unwrap();
        assert_eq!(src.references.as_ref().unwrap().table, "app_links");
    }

    #[test]
    fn test_auto_db_table_override() {
        let schema = ThroughSchema::auto(source(), "related_objects", Some("custom"), 32, 63);
        assert_eq!(schema.name(), "custom");
        assert_eq!(schema.key_max_length(), Some(32));
    }

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("short", 63), "short");
        let long = "a".repeat(80);
        let truncated = truncate_name(&long, 63);
        assert_eq!(truncated.len(), 63);
        assert!(truncated.starts_with(&"a".repeat(59)));
        assert_ne!(truncate_name(&format!("{}x", long), 63), truncated);
        assert_eq!(truncate_name(&long, 63), truncated);
    }

    #[test]
    fn test_from_table_detects_roles() {
        let schema = ThroughSchema::from_table(rel_links(), "app_links", None).unwrap();
        assert!(!schema.is_auto_created());
        assert_eq!(schema.columns().src, "links");
        assert_eq!(schema.columns().tgt, "target");
        assert_eq!(schema.columns().tgt_ct, "target_ct");
        assert_eq!(schema.columns().tgt_fk, "target_fk");
        assert_eq!(schema.extra_columns(), vec!["linked_as"]);
    }

    #[test]
    fn test_from_table_missing_source() {
        let err = ThroughSchema::from_table(rel_links(), "app_other", None).unwrap_err();
        match err {
            Error::BadThroughSchema(e) => assert_eq!(e.kind, ThroughSchemaErrorKind::MissingRole),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_table_ambiguous_needs_through_fields() {
        let table = rel_links()
            .column(
                ColumnDef::new("other_fk", SqlType::BigInt)
                    .nullable()
                    .references("app_links", "id"),
            )
            .column(ColumnDef::new("other_gfk_ct", SqlType::BigInt).nullable())
            .column(ColumnDef::new("other_gfk_fk", SqlType::VarChar(255)))
            .generic_key(GenericKeyDef::new("other_gfk", "other_gfk_ct", "other_gfk_fk"));

        let err = ThroughSchema::from_table(table.clone(), "app_links", None).unwrap_err();
        assert!(err.is_configuration_error());
        match err {
            Error::BadThroughSchema(e) => {
                assert_eq!(e.kind, ThroughSchemaErrorKind::AmbiguousRole);
            }
            other => panic!("unexpected error: {other}"),
        }

        let schema =
            ThroughSchema::from_table(table.clone(), "app_links", Some(("links", "target")))
                .unwrap();
        assert_eq!(schema.columns().src, "links");
        assert_eq!(schema.columns().tgt_fk, "target_fk");

        let err = ThroughSchema::from_table(table, "app_links", Some(("links", "nope")))
            .unwrap_err();
        match err {
            Error::BadThroughSchema(e) => {
                assert_eq!(e.kind, ThroughSchemaErrorKind::UnknownColumn);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_link_row() {
        let schema = ThroughSchema::auto(source(), "rel", None, 16, 63);
        let row = schema.link_row(Value::BigInt(1), 3, "42".to_string());
        assert_eq!(row.get_by_name("gm2m_ct"), Some(&Value::BigInt(3)));
        assert_eq!(row.get_by_name("gm2m_pk"), Some(&Value::from("42")));
    }
}
