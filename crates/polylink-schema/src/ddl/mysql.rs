//! MySQL DDL generator.

use super::{
    DdlGenerator, column_type, fk_constraint_name, format_fk_constraint, generate_create_table,
    generate_drop_table, generate_rename_column, generate_rename_table,
};
use crate::diff::SchemaOperation;
use polylink_core::{ColumnDef, Dialect};

/// DDL generator for MySQL.
pub struct MysqlDdlGenerator;

impl DdlGenerator for MysqlDdlGenerator {
    fn dialect(&self) -> &'static str {
        "mysql"
    }

    fn generate(&self, op: &SchemaOperation) -> Vec<String> {
        tracing::debug!(dialect = "mysql", op = ?op, "Generating DDL");
        let d = Dialect::Mysql;

        let statements = match op {
            SchemaOperation::CreateTable(table) => vec![generate_create_table(table, d)],
            SchemaOperation::DropTable(name) => vec![generate_drop_table(name, d)],
            SchemaOperation::RenameTable { from, to } => {
                vec![generate_rename_table(from, to, d)]
            }
            SchemaOperation::RenameColumn { table, from, to } => {
                vec![generate_rename_column(table, from, to, d)]
            }
            SchemaOperation::AlterColumnType {
                table,
                column,
                to_type,
                table_def,
                ..
            } => {
                // MODIFY restates the whole column; keep its nullability
                let nullable = table_def
                    .as_ref()
                    .and_then(|t| t.get_column(column))
                    .is_some_and(|c| c.nullable);
                vec![format!(
                    "ALTER TABLE {} MODIFY {} {}{}",
                    d.quote_identifier(table),
                    d.quote_identifier(column),
                    column_type(&ColumnDef::new(column, to_type.clone()), d),
                    if nullable { "" } else { " NOT NULL" }
                )]
            }
            SchemaOperation::AlterColumnReference {
                table,
                column,
                from,
                to,
                ..
            } => {
                let mut stmts = Vec::new();
                if from.is_some() {
                    stmts.push(format!(
                        "ALTER TABLE {} DROP FOREIGN KEY {}",
                        d.quote_identifier(table),
                        d.quote_identifier(&fk_constraint_name(table, column))
                    ));
                }
                if let Some(fk) = to {
                    stmts.push(format!(
                        "ALTER TABLE {} ADD {}",
                        d.quote_identifier(table),
                        format_fk_constraint(table, column, fk, d)
                    ));
                }
                stmts
            }
        };

        for stmt in &statements {
            tracing::trace!(sql = %stmt, "Generated MySQL DDL statement");
        }

        statements
    }
}
