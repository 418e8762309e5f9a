//! Migration steps for relation join tables.
//!
//! A step bundles the operations for one relation change (adding the
//! relation, removing it, or altering it) and renders them for a dialect,
//! forwards and backwards.

use crate::ddl::generator_for_dialect;
use crate::diff::{SchemaOperation, diff_through};
use crate::through::ThroughSchema;
use polylink_core::Dialect;

/// One migration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    /// Human-readable description
    pub description: String,
    pub operations: Vec<SchemaOperation>,
}

impl MigrationStep {
    pub fn new(description: impl Into<String>, operations: Vec<SchemaOperation>) -> Self {
        Self {
            description: description.into(),
            operations,
        }
    }

    /// Does this step change nothing?
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// SQL applying this step.
    pub fn up(&self, dialect: Dialect) -> Vec<String> {
        generator_for_dialect(dialect).generate_all(&self.operations)
    }

    /// SQL reverting this step.
    pub fn down(&self, dialect: Dialect) -> Vec<String> {
        generator_for_dialect(dialect).generate_rollback(&self.operations)
    }
}

/// Step creating a relation's join table.
///
/// User-supplied join tables are managed by their owner; the step is empty.
pub fn create_through(schema: &ThroughSchema) -> MigrationStep {
    let operations = if schema.is_auto_created() {
        vec![SchemaOperation::CreateTable(schema.table().clone())]
    } else {
        Vec::new()
    };
    MigrationStep::new(format!("Create join table {}", schema.name()), operations)
}

/// Step dropping a relation's generated join table.
pub fn drop_through(schema: &ThroughSchema) -> MigrationStep {
    let operations = if schema.is_auto_created() {
        vec![SchemaOperation::DropTable(schema.name().to_string())]
    } else {
        Vec::new()
    };
    MigrationStep::new(format!("Drop join table {}", schema.name()), operations)
}

/// Step altering a relation from `old` to `new` (field rename, key width,
/// source model rename).
pub fn alter_through(old: &ThroughSchema, new: &ThroughSchema) -> MigrationStep {
    let operations = diff_through(old, new);
    tracing::info!(
        from = %old.name(),
        to = %new.name(),
        operations = operations.len(),
        "Planned join table alteration"
    );
    MigrationStep::new(
        format!("Alter join table {} -> {}", old.name(), new.name()),
        operations,
    )
}
