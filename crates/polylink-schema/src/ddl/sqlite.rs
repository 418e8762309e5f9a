//! SQLite cannot alter a column in place, so column changes copy the table.

use super::{
    DdlGenerator, generate_create_table, generate_create_table_with_if_not_exists,
    generate_drop_table, generate_rename_column, generate_rename_table,
};
use crate::diff::SchemaOperation;
use polylink_core::{Dialect, SqlType, TableDef};

/// SQLite rendering. Column changes rebuild the table.
pub struct SqliteDdlGenerator;

impl DdlGenerator for SqliteDdlGenerator {
    fn dialect(&self) -> &'static str {
        "sqlite"
    }

    fn generate(&self, op: &SchemaOperation) -> Vec<String> {
        tracing::debug!(dialect = "sqlite", op = ?op, "Generating DDL");

        let statements = match op {
            SchemaOperation::CreateTable(table) => {
                vec![generate_create_table(table, Dialect::Sqlite)]
            }
            SchemaOperation::DropTable(name) => {
                vec![generate_drop_table(name, Dialect::Sqlite)]
            }
            SchemaOperation::RenameTable { from, to } => {
                vec![generate_rename_table(from, to, Dialect::Sqlite)]
            }
            SchemaOperation::RenameColumn { table, from, to } => {
                vec![generate_rename_column(table, from, to, Dialect::Sqlite)]
            }
            SchemaOperation::AlterColumnType {
                table,
                column,
                to_type,
                table_def,
                ..
            } => match table_def {
                Some(table_def) => sqlite_alter_column_type_recreate(table_def, column, to_type),
                None => vec![format!(
                    "SELECT __polylink_error__('SQLite ALTER COLUMN TYPE requires table_def: {}.{}')",
                    sanitize_temp_ident(table),
                    sanitize_temp_ident(column)
                )],
            },
            SchemaOperation::AlterColumnReference {
                table,
                column,
                table_def,
                ..
            } => match table_def {
                Some(table_def) => sqlite_alter_reference_recreate(table_def, column),
                None => vec![format!(
                    "SELECT __polylink_error__('SQLite ALTER FOREIGN KEY requires table_def: {}.{}')",
                    sanitize_temp_ident(table),
                    sanitize_temp_ident(column)
                )],
            },
        };

        for stmt in &statements {
            tracing::trace!(sql = %stmt, "Generated SQLite DDL statement");
        }

        statements
    }
}

fn sanitize_temp_ident(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        out.push_str("tmp");
    }
    out
}

/// Rename the table aside, recreate it from `new_table`, copy the rows and
/// drop the old copy.
fn sqlite_recreate_table(new_table: &TableDef, tmp_old: &str, select_exprs: &[String]) -> Vec<String> {
    let table_name = new_table.name.as_str();
    let insert_cols: Vec<String> = new_table
        .columns
        .iter()
        .map(|c| Dialect::Sqlite.quote_identifier(&c.name))
        .collect();

    vec![
        "PRAGMA foreign_keys=OFF".to_string(),
        "BEGIN".to_string(),
        generate_rename_table(table_name, tmp_old, Dialect::Sqlite),
        generate_create_table_with_if_not_exists(new_table, Dialect::Sqlite, false),
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            Dialect::Sqlite.quote_identifier(table_name),
            insert_cols.join(", "),
            select_exprs.join(", "),
            Dialect::Sqlite.quote_identifier(tmp_old)
        ),
        generate_drop_table(tmp_old, Dialect::Sqlite),
        "COMMIT".to_string(),
        "PRAGMA foreign_keys=ON".to_string(),
    ]
}

fn sqlite_alter_column_type_recreate(table: &TableDef, column: &str, to_type: &SqlType) -> Vec<String> {
    let tmp_old = format!(
        "__polylink_old_{}_type_{}",
        sanitize_temp_ident(&table.name),
        sanitize_temp_ident(column)
    );

    let mut new_table = table.clone();
    for col in &mut new_table.columns {
        if col.name == column {
            col.sql_type = to_type.clone();
        }
    }

    let select_exprs: Vec<String> = new_table
        .columns
        .iter()
        .map(|c| {
            let q = Dialect::Sqlite.quote_identifier(&c.name);
            if c.name == column {
                format!("CAST({} AS {})", q, super::column_type(c, Dialect::Sqlite))
            } else {
                q
            }
        })
        .collect();

    sqlite_recreate_table(&new_table, &tmp_old, &select_exprs)
}

fn sqlite_alter_reference_recreate(table: &TableDef, column: &str) -> Vec<String> {
    let tmp_old = format!(
        "__polylink_old_{}_fk_{}",
        sanitize_temp_ident(&table.name),
        sanitize_temp_ident(column)
    );
    let cols: Vec<String> = table
        .columns
        .iter()
        .map(|c| Dialect::Sqlite.quote_identifier(&c.name))
        .collect();
    sqlite_recreate_table(table, &tmp_old, &cols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polylink_core::{ColumnDef, SqlType};

    fn join_table(key_len: u32) -> TableDef {
        TableDef::new("links_rel")
            .column(ColumnDef::new("id", SqlType::BigInt).primary_key().auto_increment())
            .column(ColumnDef::new("gm2m_src", SqlType::BigInt).references("links", "id"))
            .column(ColumnDef::new("gm2m_ct", SqlType::BigInt))
            .column(ColumnDef::new("gm2m_pk", SqlType::VarChar(key_len)))
            .unique(["gm2m_src", "gm2m_ct", "gm2m_pk"])
    }

    #[test]
    fn test_alter_type_recreates_table() {
        let op = SchemaOperation::AlterColumnType {
            table: "links_rel".to_string(),
            column: "gm2m_pk".to_string(),
            from_type: SqlType::VarChar(16),
            to_type: SqlType::VarChar(64),
            table_def: Some(join_table(16)),
        };
        let stmts = SqliteDdlGenerator.generate(&op);
        assert_eq!(stmts.first().map(String::as_str), Some("PRAGMA foreign_keys=OFF"));
        assert!(stmts.iter().any(|s| s.contains("RENAME TO \"__polylink_old_links_rel_type_gm2m_pk\"")));
        assert!(stmts.iter().any(|s| s.contains("\"gm2m_pk\" VARCHAR(64) NOT NULL")));
        assert!(stmts.iter().any(|s| s.contains("CAST(\"gm2m_pk\" AS VARCHAR(64))")));
        assert!(stmts.iter().any(|s| s.starts_with("DROP TABLE IF EXISTS \"__polylink_old_")));
        assert_eq!(stmts.last().map(String::as_str), Some("PRAGMA foreign_keys=ON"));
    }

    #[test]
    fn test_alter_type_without_table_def() {
        let op = SchemaOperation::AlterColumnType {
            table: "links rel".to_string(),
            column: "gm2m_pk".to_string(),
            from_type: SqlType::VarChar(16),
            to_type: SqlType::VarChar(64),
            table_def: None,
        };
        let stmts = SqliteDdlGenerator.generate(&op);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("links_rel.gm2m_pk"));
    }

    #[test]
    fn test_simple_operations() {
        let stmts = SqliteDdlGenerator.generate_all(&[
            SchemaOperation::RenameTable {
                from: "a".to_string(),
                to: "b".to_string(),
            },
            SchemaOperation::DropTable("b".to_string()),
        ]);
        assert_eq!(stmts, vec![
            "ALTER TABLE \"a\" RENAME TO \"b\"".to_string(),
            "DROP TABLE IF EXISTS \"b\"".to_string(),
        ]);
    }
}
