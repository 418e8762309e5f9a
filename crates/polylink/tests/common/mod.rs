//! Models and fixtures shared by the scenario tests.
#![allow(dead_code)]

use polylink::prelude::*;
use polylink::{KeyKind, TypeName};
use polylink_memory::MemoryStore;

macro_rules! int_model {
    ($name:ident, $table:literal, $app:literal, $label:ident) => {
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            pub id: i64,
            pub $label: String,
        }

        impl $name {
            pub fn new(id: i64, $label: &str) -> Self {
                Self {
                    id,
                    $label: $label.to_string(),
                }
            }
        }

        impl Model for $name {
            const TABLE_NAME: &'static str = $table;
            const PRIMARY_KEY: &'static str = "id";
            const APP_LABEL: &'static str = $app;
            const MODEL_NAME: &'static str = stringify!($name);

            fn to_row(&self) -> Vec<(&'static str, Value)> {
                vec![
                    ("id", Value::BigInt(self.id)),
                    (stringify!($label), Value::from(self.$label.as_str())),
                ]
            }

            fn from_row(row: &Row) -> Result<Self> {
                Ok(Self {
                    id: row.get_named("id")?,
                    $label: row.get_named(stringify!($label))?,
                })
            }

            fn primary_key_value(&self) -> Value {
                Value::BigInt(self.id)
            }
        }
    };
}

int_model!(Links, "app_links", "app", name);
int_model!(Project, "app_project", "app", name);
int_model!(Task, "app_task", "app", title);
// A model whose table is never created
int_model!(Ghost, "app_ghost", "app", name);

/// A model keyed by text.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub slug: String,
}

impl Note {
    pub fn new(slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
        }
    }
}

impl Model for Note {
    const TABLE_NAME: &'static str = "notes_note";
    const PRIMARY_KEY: &'static str = "slug";
    const APP_LABEL: &'static str = "notes";
    const MODEL_NAME: &'static str = "Note";
    const KEY_KIND: KeyKind = KeyKind::Text;

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![("slug", Value::from(self.slug.as_str()))]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            slug: row.get_named("slug")?,
        })
    }

    fn primary_key_value(&self) -> Value {
        Value::from(self.slug.as_str())
    }
}

/// A store with every model table created (except `Ghost`'s).
pub fn store() -> MemoryStore {
    let store = MemoryStore::new();
    for table in [
        Links::table_def(),
        Project::table_def(),
        Task::table_def(),
        Note::table_def(),
    ] {
        store.create_table(&table).expect("create model table");
    }
    store
}

/// The objects most scenarios use, already inserted.
pub struct World {
    pub links1: Links,
    pub links2: Links,
    pub p10: Project,
    pub p11: Project,
    pub t20: Task,
    pub t21: Task,
    pub note: Note,
}

pub fn seed(store: &MemoryStore) -> World {
    let world = World {
        links1: Links::new(1, "first"),
        links2: Links::new(2, "second"),
        p10: Project::new(10, "apollo"),
        p11: Project::new(11, "gemini"),
        t20: Task::new(20, "design"),
        t21: Task::new(21, "build"),
        note: Note::new("alpha"),
    };
    store.insert_object(&world.links1).expect("insert");
    store.insert_object(&world.links2).expect("insert");
    store.insert_object(&world.p10).expect("insert");
    store.insert_object(&world.p11).expect("insert");
    store.insert_object(&world.t20).expect("insert");
    store.insert_object(&world.t21).expect("insert");
    store.insert_object(&world.note).expect("insert");
    store.reset_stats();
    world
}

/// A catalog with one relation `Links.related` declared from `builder`.
pub fn declare(store: &MemoryStore, builder: RelationBuilder) -> (Catalog, PolyField) {
    let catalog = Catalog::new();
    let field = catalog.declare(store, builder).expect("declare relation");
    store.reset_stats();
    (catalog, field)
}

/// The default relation: Links.related -> {Project, Task}.
pub fn related() -> RelationBuilder {
    RelationBuilder::new::<Links>("related")
        .target::<Project>()
        .target::<Task>()
}

/// `Model:key` labels, for order-sensitive comparisons.
pub fn labels(objects: &[ModelRef]) -> Vec<String> {
    objects
        .iter()
        .map(|o| format!("{}:{}", o.model_type().model, o.key_value()))
        .collect()
}

/// Sorted `Model:key` labels, for set comparisons.
pub fn sorted_labels(objects: &[ModelRef]) -> Vec<String> {
    let mut out = labels(objects);
    out.sort();
    out
}

pub fn type_name<M: Model>() -> TypeName {
    M::type_name()
}
