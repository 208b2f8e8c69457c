//! Model definitions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Globally unique model identifier (e.g. `dtmi:com:acme:Building;1`).
pub type ModelId = String;

/// A schema definition stored in the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    /// Opaque serialized definition document.
    pub definition: String,
    /// Models this one structurally references (inheritance, components,
    /// relationship endpoint typing).
    #[serde(default)]
    pub dependency_ids: BTreeSet<ModelId>,
}

impl Model {
    pub fn new(id: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            definition: definition.into(),
            dependency_ids: BTreeSet::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependency_ids.extend(deps.into_iter().map(Into::into));
        self
    }

    /// True when both definitions describe the same document.
    ///
    /// JSON definitions are compared structurally so that key order and
    /// whitespace do not count as a change; anything else is compared
    /// literally.
    pub fn exact_match(&self, other: &Model) -> bool {
        if self.id != other.id {
            return false;
        }
        match (
            serde_json::from_str::<serde_json::Value>(&self.definition),
            serde_json::from_str::<serde_json::Value>(&other.definition),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.definition == other.definition,
        }
    }
}

/// Merge an incoming batch with the store's current models.
///
/// Incoming definitions take precedence over a same-id existing model. The
/// incoming batch comes first, followed by the untouched existing models in
/// their original order.
pub fn merge_models(incoming: &[Model], existing: &[Model]) -> Vec<Model> {
    let incoming_ids: HashSet<&str> = incoming.iter().map(|m| m.id.as_str()).collect();
    incoming
        .iter()
        .cloned()
        .chain(
            existing
                .iter()
                .filter(|m| !incoming_ids.contains(m.id.as_str()))
                .cloned(),
        )
        .collect()
}
