//! Generic many-to-many relations for Polylink.
//!
//! A generic relation links objects of one source model to objects of any
//! number of target models through a single join table. Each join row
//! stores the source key, a type tag and the target key, so targets of
//! different types can sit side by side in one relation.
//!
//! # Components
//!
//! - [`TypeRegistry`] assigns type tags and loads objects back by key
//! - [`RelationBuilder`] / [`Relation`] describe one relation field
//! - [`InstanceManager`] adds, removes, sets and lists related objects of
//!   one instance, writing only the rows that change
//! - [`PolymorphicIter`] turns join rows into objects with one query per
//!   target type
//! - [`CascadeCoordinator`] and [`Signals`] apply cascade policies when
//!   either end of a link is deleted
//! - [`Catalog`] owns all of the above
//!
//! # Example
//!
//! ```ignore
//! use polylink::prelude::*;
//!
//! let catalog = Catalog::new();
//! let related = catalog.declare(
//!     &store,
//!     RelationBuilder::new::<Links>("related_objects")
//!         .target::<Project>()
//!         .target::<Task>(),
//! )?;
//!
//! let links = related.get(&store, &my_links)?;
//! links.add(&[&project, &task])?;
//! let tasks = links.all().of_type::<Task>().fetch()?;
//! ```

pub mod cascade;
pub mod catalog;
pub mod descriptor;
pub mod fetch;
pub mod field;
pub mod manager;
pub mod prefetch;
pub mod registry;

#[cfg(test)]
mod test_models;

pub use cascade::{
    CascadeCoordinator, DeletionEvent, DeletionReport, DeletionSide, Listener, ListenerId,
    SignalOutcome, Signals,
};
pub use catalog::Catalog;
pub use descriptor::{
    CascadePolicy, Relation, RelationBuilder, RelationDescription, RelationId, TargetDescription,
    TargetType,
};
pub use fetch::{JoinRow, Linked, PolymorphicIter, fetch_ordered};
pub use field::{PolyField, ReverseAccessor};
pub use manager::{Binding, InstanceManager, RelatedQuery, SetOutcome};
pub use prefetch::{ForwardPrefetch, ReversePrefetch, prefetch_forward, prefetch_reverse};
pub use registry::{TypeEntry, TypeRegistry, TypeTag};

pub use polylink_core::{
    AnyModel, Error, Filter, KeyKind, Model, ModelInfo, ModelRef, OrderBy, Query, Result, Row,
    Store, TableDef, TypeName, Value, downcast_arc,
};
pub use polylink_schema::{MigrationStep, ThroughSchema};

/// Commonly used items.
pub mod prelude {
    pub use crate::{
        AnyModel, CascadePolicy, Catalog, DeletionEvent, DeletionSide, Error, Model, ModelRef,
        PolyField, RelationBuilder, Result, ReverseAccessor, Row, Store, TypeTag, Value,
        downcast_arc,
    };
}
