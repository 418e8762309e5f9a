//! Schema operations and join-table diffing.
//!
//! Comparing two versions of a relation's join table yields the ordered list
//! of operations that turns one into the other. The generic key's two columns
//! (type tag and target key) are always handled as one group, followed by the
//! source column, so a migration never leaves the polymorphic reference half
//! altered.

use crate::through::ThroughSchema;
use polylink_core::{ColumnDef, ForeignKeyRef, SqlType, TableDef};

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOperation {
    /// Create a new table.
    CreateTable(TableDef),
    /// Drop an existing table.
    DropTable(String),
    /// Rename a table.
    RenameTable { from: String, to: String },
    /// Rename a column.
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    /// Change a column's type.
    ///
    /// SQLite cannot alter column types in place; when `table_def` is present
    /// its generator rebuilds the table from it.
    AlterColumnType {
        table: String,
        column: String,
        from_type: SqlType,
        to_type: SqlType,
        table_def: Option<TableDef>,
    },
    /// Point a column's foreign key at another table.
    AlterColumnReference {
        table: String,
        column: String,
        from: Option<ForeignKeyRef>,
        to: Option<ForeignKeyRef>,
        table_def: Option<TableDef>,
    },
}

impl SchemaOperation {
    /// The table this operation touches (its new name for renames).
    pub fn table(&self) -> &str {
        match self {
            SchemaOperation::CreateTable(table) => &table.name,
            SchemaOperation::DropTable(name) => name,
            SchemaOperation::RenameTable { to, .. } => to,
            SchemaOperation::RenameColumn { table, .. }
            | SchemaOperation::AlterColumnType { table, .. }
            | SchemaOperation::AlterColumnReference { table, .. } => table,
        }
    }

    /// The operation that undoes this one, if there is one.
    pub fn inverse(&self) -> Option<Self> {
        match self {
            SchemaOperation::CreateTable(table) => {
                Some(SchemaOperation::DropTable(table.name.clone()))
            }
            SchemaOperation::DropTable(_) => None,
            SchemaOperation::RenameTable { from, to } => Some(SchemaOperation::RenameTable {
                from: to.clone(),
                to: from.clone(),
            }),
            SchemaOperation::RenameColumn { table, from, to } => {
                Some(SchemaOperation::RenameColumn {
                    table: table.clone(),
                    from: to.clone(),
                    to: from.clone(),
                })
            }
            SchemaOperation::AlterColumnType {
                table,
                column,
                from_type,
                to_type,
                table_def,
            } => Some(SchemaOperation::AlterColumnType {
                table: table.clone(),
                column: column.clone(),
                from_type: to_type.clone(),
                to_type: from_type.clone(),
                table_def: table_def
                    .as_ref()
                    .map(|t| with_column(t, column, |c| c.sql_type = from_type.clone())),
            }),
            SchemaOperation::AlterColumnReference {
                table,
                column,
                from,
                to,
                table_def,
            } => Some(SchemaOperation::AlterColumnReference {
                table: table.clone(),
                column: column.clone(),
                from: to.clone(),
                to: from.clone(),
                table_def: table_def
                    .as_ref()
                    .map(|t| with_column(t, column, |c| c.references = from.clone())),
            }),
        }
    }
}

fn with_column(table: &TableDef, column: &str, edit: impl Fn(&mut ColumnDef)) -> TableDef {
    let mut out = table.clone();
    for col in &mut out.columns {
        if col.name == column {
            edit(col);
        }
    }
    out
}

/// Operations turning join table `old` into `new`.
///
/// Order: table rename, then the generic key group (target key, then type
/// tag), then the source column.
pub fn diff_through(old: &ThroughSchema, new: &ThroughSchema) -> Vec<SchemaOperation> {
    let mut ops = Vec::new();
    let table = new.name().to_string();

    if old.name() != new.name() {
        ops.push(SchemaOperation::RenameTable {
            from: old.name().to_string(),
            to: table.clone(),
        });
    }

    let roles = [
        (&old.columns().tgt_fk, &new.columns().tgt_fk),
        (&old.columns().tgt_ct, &new.columns().tgt_ct),
        (&old.columns().src, &new.columns().src),
    ];

    for (old_name, new_name) in roles {
        let (Some(old_col), Some(new_col)) = (
            old.table().get_column(old_name),
            new.table().get_column(new_name),
        ) else {
            continue;
        };

        if old_name != new_name {
            ops.push(SchemaOperation::RenameColumn {
                table: table.clone(),
                from: old_name.clone(),
                to: new_name.clone(),
            });
        }
        if old_col.sql_type != new_col.sql_type {
            ops.push(SchemaOperation::AlterColumnType {
                table: table.clone(),
                column: new_name.clone(),
                from_type: old_col.sql_type.clone(),
                to_type: new_col.sql_type.clone(),
                table_def: Some(new.table().clone()),
            });
        }
        if old_col.references != new_col.references {
            ops.push(SchemaOperation::AlterColumnReference {
                table: table.clone(),
                column: new_name.clone(),
                from: old_col.references.clone(),
                to: new_col.references.clone(),
                table_def: Some(new.table().clone()),
            });
        }
    }

    tracing::debug!(
        from = %old.name(),
        to = %new.name(),
        operations = ops.len(),
        "Diffed join tables"
    );
    ops
}
