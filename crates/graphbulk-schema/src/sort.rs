//! Dependency ordering for model sets.
//!
//! The sort is Kahn's algorithm with a deterministic tie-break: among the
//! models whose dependencies are all placed, the one that appeared first in the
//! input goes next. Re-sorting an already-sorted list therefore returns it
//! unchanged.

use crate::model::{Model, ModelId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// The model set cannot be ordered.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("error parsing models: {message}{}", render_errors(.errors))]
pub struct SchemaError {
    pub message: String,
    /// Structured messages reported by the parser.
    pub errors: Vec<String>,
}

fn render_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(" - {}", errors.join(" | "))
    }
}

impl SchemaError {
    pub fn new(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            message: message.into(),
            errors,
        }
    }
}

// ============================================================================
// Sorted model map
// ============================================================================

/// A model together with the ids of every model that (transitively) depends
/// on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedEntry {
    pub model: Model,
    pub dependents: BTreeSet<ModelId>,
}

/// Models in dependency order: for any B depending on A, A comes first.
///
/// Produced once per operation and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct SortedModels {
    entries: Vec<SortedEntry>,
    positions: HashMap<ModelId, usize>,
}

impl SortedModels {
    fn from_entries(entries: Vec<SortedEntry>) -> Self {
        let positions = entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.model.id.clone(), idx))
            .collect();
        Self { entries, positions }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SortedEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SortedEntry> {
        self.entries.iter()
    }

    pub fn models(&self) -> impl DoubleEndedIterator<Item = &Model> {
        self.entries.iter().map(|e| &e.model)
    }

    pub fn ids(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.entries.iter().map(|e| e.model.id.as_str())
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Model> {
        self.position(id).map(|idx| &self.entries[idx].model)
    }

    /// Direct dependencies of a model.
    pub fn dependencies_of(&self, id: &str) -> Option<&BTreeSet<ModelId>> {
        self.get(id).map(|m| &m.dependency_ids)
    }

    /// Every model that transitively depends on `id`.
    pub fn dependents_of(&self, id: &str) -> Option<&BTreeSet<ModelId>> {
        self.position(id).map(|idx| &self.entries[idx].dependents)
    }
}

// ============================================================================
// Parser seam
// ============================================================================

/// Turns a set of model definitions into a dependency order.
pub trait SchemaParser: Send + Sync {
    fn topological_sort(&self, models: &[Model]) -> Result<SortedModels, SchemaError>;
}

/// Parser that trusts the dependency ids declared on each model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredDependencyParser;

impl SchemaParser for DeclaredDependencyParser {
    fn topological_sort(&self, models: &[Model]) -> Result<SortedModels, SchemaError> {
        topological_sort(models)
    }
}

/// Sort models so that dependencies precede dependents.
pub fn topological_sort(models: &[Model]) -> Result<SortedModels, SchemaError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(models.len());
    let mut problems = Vec::new();

    for (idx, model) in models.iter().enumerate() {
        if index.insert(model.id.as_str(), idx).is_some() {
            problems.push(format!("duplicate model id {}", model.id));
        }
    }

    // dependents_direct[i] = models that list i as a dependency
    let mut dependents_direct: Vec<Vec<usize>> = vec![Vec::new(); models.len()];
    let mut pending: Vec<usize> = vec![0; models.len()];

    for (idx, model) in models.iter().enumerate() {
        for dep in &model.dependency_ids {
            match index.get(dep.as_str()) {
                Some(&dep_idx) => {
                    dependents_direct[dep_idx].push(idx);
                    pending[idx] += 1;
                }
                None => problems.push(format!(
                    "{} references undefined model {}",
                    model.id, dep
                )),
            }
        }
    }

    if !problems.is_empty() {
        return Err(SchemaError::new("invalid model references", problems));
    }

    let mut ready: BTreeSet<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(idx, _)| idx)
        .collect();
    let mut order = Vec::with_capacity(models.len());

    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &dependent in &dependents_direct[idx] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != models.len() {
        let stuck: Vec<String> = pending
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(idx, _)| models[idx].id.clone())
            .collect();
        return Err(SchemaError::new(
            "dependency cycle detected",
            stuck
                .into_iter()
                .map(|id| format!("{id} is part of a cycle"))
                .collect(),
        ));
    }

    // Transitive dependents, filled from the back so every dependent's own
    // set is complete before it is folded in.
    let mut transitive: Vec<BTreeSet<ModelId>> = vec![BTreeSet::new(); models.len()];
    for &idx in order.iter().rev() {
        let mut acc = BTreeSet::new();
        for &dependent in &dependents_direct[idx] {
            acc.insert(models[dependent].id.clone());
            acc.extend(transitive[dependent].iter().cloned());
        }
        transitive[idx] = acc;
    }

    let entries = order
        .into_iter()
        .map(|idx| SortedEntry {
            model: models[idx].clone(),
            dependents: std::mem::take(&mut transitive[idx]),
        })
        .collect();

    Ok(SortedModels::from_entries(entries))
}
