//! In-memory store for Polylink.
//!
//! `MemoryStore` implements `polylink_core::Store` without any database:
//! tables, unique constraints, auto-increment ids and nested transactions
//! are all kept in process. It also counts statements and can inject
//! failures, which makes it the store of choice for tests.

pub mod store;

pub use store::{FailPoint, MemoryStore, StoreStats};
