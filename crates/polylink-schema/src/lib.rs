//! Join-table schema and migration support for Polylink.
//!
//! This crate provides:
//! - Through schemas: generated join tables and role detection for user tables
//! - Generated-name truncation
//! - Join-table diffing into schema operations
//! - DDL generation for SQLite, MySQL, PostgreSQL
//! - Migration steps for adding, dropping and altering relations

pub mod ddl;
pub mod diff;
pub mod migrate;
pub mod through;

pub use ddl::{
    DdlGenerator, MysqlDdlGenerator, PostgresDdlGenerator, SqliteDdlGenerator,
    generator_for_dialect,
};
pub use diff::{SchemaOperation, diff_through};
pub use migrate::{MigrationStep, alter_through, create_through, drop_through};
pub use through::{
    CT_COLUMN, DEFAULT_KEY_MAX_LENGTH, DEFAULT_MAX_NAME_LENGTH, ID_COLUMN, PK_COLUMN, SRC_COLUMN,
    SourceTable, TGT_NAME, ThroughColumns, ThroughSchema, truncate_name,
};
