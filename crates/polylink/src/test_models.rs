//! Models shared by unit tests.

use polylink_core::{KeyKind, Model, Result, Row, Store, Value};
use polylink_memory::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Links {
    pub id: i64,
    pub name: String,
}

impl Links {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

impl Model for Links {
    const TABLE_NAME: &'static str = "app_links";
    const PRIMARY_KEY: &'static str = "id";
    const APP_LABEL: &'static str = "app";
    const MODEL_NAME: &'static str = "Links";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![("id", Value::BigInt(self.id)), ("name", Value::from(self.name.as_str()))]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
        })
    }

    fn primary_key_value(&self) -> Value {
        Value::BigInt(self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
}

impl Project {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

impl Model for Project {
    const TABLE_NAME: &'static str = "app_project";
    const PRIMARY_KEY: &'static str = "id";
    const APP_LABEL: &'static str = "app";
    const MODEL_NAME: &'static str = "Project";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![("id", Value::BigInt(self.id)), ("name", Value::from(self.name.as_str()))]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
        })
    }

    fn primary_key_value(&self) -> Value {
        Value::BigInt(self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub title: String,
}

impl Task {
    pub fn new(id: i64, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
        }
    }
}

impl Model for Task {
    const TABLE_NAME: &'static str = "app_task";
    const PRIMARY_KEY: &'static str = "id";
    const APP_LABEL: &'static str = "app";
    const MODEL_NAME: &'static str = "Task";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![("id", Value::BigInt(self.id)), ("title", Value::from(self.title.as_str()))]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            title: row.get_named("title")?,
        })
    }

    fn primary_key_value(&self) -> Value {
        Value::BigInt(self.id)
    }
}

/// A model keyed by text.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub slug: String,
}

impl Label {
    pub fn new(slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
        }
    }
}

impl Model for Label {
    const TABLE_NAME: &'static str = "tags_label";
    const PRIMARY_KEY: &'static str = "slug";
    const APP_LABEL: &'static str = "tags";
    const MODEL_NAME: &'static str = "Label";
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

/// A memory store with every test model table created.
pub fn memory_store() -> MemoryStore {
    let store = MemoryStore::new();
    for table in [
        Links::table_def(),
        Project::table_def(),
        Task::table_def(),
        Label::table_def(),
    ] {
        store
            .create_table(&table)
            .expect("create test table");
    }
    store
}
