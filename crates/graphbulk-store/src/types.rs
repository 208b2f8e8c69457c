//! Entities stored in the graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An entity instantiating a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Twin {
    pub id: String,
    pub model_id: String,
    #[serde(default)]
    pub contents: Map<String, Value>,
}

impl Twin {
    pub fn new(id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model_id: model_id.into(),
            contents: Map::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.contents.insert(key.into(), value.into());
        self
    }
}

/// A typed edge between two twins.
///
/// Incoming relationships may omit `id`; the engine resolves one before
/// writing. Stored relationships always carry an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source_id: String,
    pub target_id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        name: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            source_id: source_id.into(),
            target_id: target_id.into(),
            name: name.into(),
            properties: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Id if one has been assigned, empty ids count as unassigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Twin search filter used by "delete all" style operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinQuery {
    /// Restrict to twins of these models; empty means any model.
    #[serde(default)]
    pub model_ids: Vec<String>,
    /// Case-insensitive substring over the twin id and its `name` property.
    #[serde(default)]
    pub search: Option<String>,
}

/// One page of a paginated read.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Token to pass back for the next page; `None` on the last page.
    pub continuation: Option<String>,
}
