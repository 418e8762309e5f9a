//! SQL rendering of schema operations, one generator per dialect.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MysqlDdlGenerator;
pub use postgres::PostgresDdlGenerator;
pub use sqlite::SqliteDdlGenerator;

use crate::diff::SchemaOperation;
use polylink_core::{ColumnDef, Dialect, ForeignKeyRef, SqlType, TableDef};

/// Renders [`SchemaOperation`]s as SQL for one dialect.
pub trait DdlGenerator {
    fn dialect(&self) -> &'static str;

    /// SQL for one operation. A SQLite column change is several statements.
    fn generate(&self, op: &SchemaOperation) -> Vec<String>;

    fn generate_all(&self, ops: &[SchemaOperation]) -> Vec<String> {
        ops.iter().flat_map(|op| self.generate(op)).collect()
    }

    /// SQL undoing `ops`, last operation first. A dropped table has no inverse
    /// and is skipped.
    fn generate_rollback(&self, ops: &[SchemaOperation]) -> Vec<String> {
        ops.iter()
            .rev()
            .filter_map(SchemaOperation::inverse)
            .flat_map(|op| self.generate(&op))
            .collect()
    }
}

/// The generator for `dialect`.
pub fn generator_for_dialect(dialect: Dialect) -> Box<dyn DdlGenerator> {
    match dialect {
        Dialect::Sqlite => Box::new(SqliteDdlGenerator),
        Dialect::Mysql => Box::new(MysqlDdlGenerator),
        Dialect::Postgres => Box::new(PostgresDdlGenerator),
    }
}


fn dialect_name(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => "sqlite",
        Dialect::Mysql => "mysql",
        Dialect::Postgres => "postgres",
    }
}

/// Column type as spelled by each dialect.
fn column_type(col: &ColumnDef, dialect: Dialect) -> String {
    match (dialect, &col.sql_type) {
        (Dialect::Sqlite, SqlType::Integer | SqlType::BigInt | SqlType::Boolean) => {
            "INTEGER".to_string()
        }
        (Dialect::Sqlite, SqlType::Uuid) => "BLOB".to_string(),
        (Dialect::Postgres, SqlType::BigInt) if col.auto_increment => "BIGSERIAL".to_string(),
        (Dialect::Postgres, SqlType::Integer) if col.auto_increment => "SERIAL".to_string(),
        (Dialect::Postgres, SqlType::Blob) => "BYTEA".to_string(),
        (Dialect::Mysql, SqlType::Uuid) => "CHAR(36)".to_string(),
        (Dialect::Mysql, SqlType::Timestamp) => "DATETIME(6)".to_string(),
        (_, other) => other.sql_name(),
    }
}

/// Format a column definition for CREATE TABLE.
fn format_column_def(col: &ColumnDef, dialect: Dialect) -> String {
    let mut parts = vec![dialect.quote_identifier(&col.name), column_type(col, dialect)];

    if col.primary_key {
        parts.push("PRIMARY KEY".to_string());
    }

    match dialect {
        Dialect::Sqlite => {
            if col.auto_increment && col.primary_key {
                parts.push("AUTOINCREMENT".to_string());
            }
        }
        Dialect::Mysql => {
            if col.auto_increment {
                parts.push("AUTO_INCREMENT".to_string());
            }
        }
        // BIGSERIAL/SERIAL already carry the sequence
        Dialect::Postgres => {}
    }

    if !col.nullable && !col.primary_key {
        parts.push("NOT NULL".to_string());
    }

    parts.join(" ")
}

/// Name of the foreign key constraint on `table.column`.
fn fk_constraint_name(table: &str, column: &str) -> String {
    format!("{}_{}_fkey", table, column)
}

fn format_fk_constraint(table: &str, column: &str, fk: &ForeignKeyRef, dialect: Dialect) -> String {
    format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE",
        dialect.quote_identifier(&fk_constraint_name(table, column)),
        dialect.quote_identifier(column),
        dialect.quote_identifier(&fk.table),
        dialect.quote_identifier(&fk.column),
    )
}

fn format_unique_constraint(columns: &[String], dialect: Dialect) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect();
    format!("UNIQUE ({})", cols.join(", "))
}

/// `CREATE TABLE IF NOT EXISTS` with inline constraints.
fn generate_create_table(table: &TableDef, dialect: Dialect) -> String {
    generate_create_table_with_if_not_exists(table, dialect, true)
}

fn generate_create_table_with_if_not_exists(
    table: &TableDef,
    dialect: Dialect,
    if_not_exists: bool,
) -> String {
    tracing::debug!(
        dialect = dialect_name(dialect),
        table = %table.name,
        columns = table.columns.len(),
        "Generating CREATE TABLE DDL"
    );

    let mut parts = Vec::new();

    for col in &table.columns {
        parts.push(format!("  {}", format_column_def(col, dialect)));
    }

    for unique in &table.unique {
        parts.push(format!("  {}", format_unique_constraint(unique, dialect)));
    }

    for col in &table.columns {
        if let Some(fk) = &col.references {
            parts.push(format!(
                "  {}",
                format_fk_constraint(&table.name, &col.name, fk, dialect)
            ));
        }
    }

    let sql = format!(
        "CREATE TABLE {}{} (\n{}\n)",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        dialect.quote_identifier(&table.name),
        parts.join(",\n")
    );

    tracing::trace!(sql = %sql, "Generated CREATE TABLE statement");
    sql
}

fn generate_drop_table(table_name: &str, dialect: Dialect) -> String {
    tracing::debug!(table = %table_name, "Generating DROP TABLE DDL");
    format!("DROP TABLE IF EXISTS {}", dialect.quote_identifier(table_name))
}

fn generate_rename_table(from: &str, to: &str, dialect: Dialect) -> String {
    tracing::debug!(from = %from, to = %to, "Generating RENAME TABLE DDL");
    match dialect {
        Dialect::Mysql => format!(
            "RENAME TABLE {} TO {}",
            dialect.quote_identifier(from),
            dialect.quote_identifier(to)
        ),
        Dialect::Sqlite | Dialect::Postgres => format!(
            "ALTER TABLE {} RENAME TO {}",
            dialect.quote_identifier(from),
            dialect.quote_identifier(to)
        ),
    }
}

fn generate_rename_column(table: &str, from: &str, to: &str, dialect: Dialect) -> String {
    tracing::debug!(table = %table, from = %from, to = %to, "Generating RENAME COLUMN DDL");
    format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        dialect.quote_identifier(table),
        dialect.quote_identifier(from),
        dialect.quote_identifier(to)
    )
}
