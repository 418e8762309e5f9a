//! Core types and traits for Polylink.
//!
//! This crate provides the foundations the relation engine is built on:
//!
//! - `Model` / `AnyModel` for mapping structs to tables and handling them type-erased
//! - `Value` and `Row` for dynamically-typed data
//! - `Filter` and `Query` for describing reads and deletes without SQL text
//! - `TableDef` for dialect-independent table definitions
//! - `Store` for the minimal CRUD + transaction surface a backend provides

pub mod error;
pub mod filter;
pub mod identifiers;
pub mod model;
pub mod row;
pub mod store;
pub mod table;
pub mod value;

pub use error::{
    ConfigError, Error, KeyTooLongError, Result, StoreError, StoreErrorKind, ThroughSchemaError,
    ThroughSchemaErrorKind, TypeError, UnknownTypeError, UnsupportedOperationError,
};
pub use filter::{Dialect, Filter, OrderBy, Query, delete_sql, insert_sql};
pub use identifiers::{is_valid_identifier, quote_ident};
pub use model::{
    AnyModel, Model, ModelInfo, ModelRef, RowLoader, TypeName, downcast_arc, model_row,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use store::{Store, atomic};
pub use table::{ColumnDef, ForeignKeyRef, GenericKeyDef, SqlType, TableDef};
pub use value::{KeyKind, Value};
