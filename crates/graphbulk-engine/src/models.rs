//! Model import and deletion.
//!
//! A model cannot be replaced in place while other models depend on it, so
//! replacing model `M` means deleting every model from `M`'s position in the
//! dependency order onwards (dependents first), creating the new models in
//! dependency order, and then recreating whatever was deleted but not
//! re-imported. The recreate step always runs, even after cancellation, so
//! an import never leaves the store with fewer models than it started with.
//!
//! ```text
//!   merge + sort ──► diff ──► cascade delete ──► create ──► recreate ──► refresh, notify
//!                                 (reverse)      (forward)   (always)
//! ```

use crate::cancel::CancelSignal;
use crate::error::BulkError;
use crate::progress::ProgressTracker;
use crate::Collaborators;
use graphbulk_schema::{cascade_range, merge_models, Model, ModelId, SortedModels};
use graphbulk_store::SyncEvent;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Informational entry recorded for incoming models identical to the stored
/// ones.
pub const SKIPPED_EXACT_MATCH: &str = "Skipped model as it has a matching one in target instance";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportModels {
    pub models: Vec<Model>,
    /// Replace every incoming model, even ones identical to the stored copy.
    #[serde(default)]
    pub full_overlay: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteModels {
    #[serde(default)]
    pub model_ids: Vec<ModelId>,
    #[serde(default)]
    pub delete_all: bool,
    /// Also delete every model that depends on a requested one.
    #[serde(default)]
    pub include_dependencies: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelImportReport {
    pub created: Vec<ModelId>,
    pub deleted: Vec<ModelId>,
    pub recreated: Vec<ModelId>,
    pub skipped: Vec<ModelId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelDeleteReport {
    pub deleted: Vec<ModelId>,
}

// ============================================================================
// Recreate manifest
// ============================================================================

/// Models deleted during an import that have not been restored yet.
#[derive(Debug, Clone, Default)]
pub struct RecreateManifest {
    captured: BTreeMap<ModelId, Model>,
    failed: BTreeSet<ModelId>,
}

impl RecreateManifest {
    /// Remember `model` as it was before deletion.
    pub fn capture(&mut self, model: Model) {
        self.captured.insert(model.id.clone(), model);
    }

    /// `id` exists in the store again.
    pub fn restored(&mut self, id: &str) {
        self.captured.remove(id);
        self.failed.remove(id);
    }

    /// The incoming definition of `id` could not be created.
    pub fn mark_failed(&mut self, id: &str) {
        self.failed.insert(id.to_string());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.captured.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }

    pub fn len(&self) -> usize {
        self.captured.len()
    }

    pub fn captured(&self, id: &str) -> Option<&Model> {
        self.captured.get(id)
    }

    /// Definition to recreate `id` from: the merged definition, unless the
    /// merged definition is the one that failed, in which case the captured
    /// original.
    pub fn definition_for<'a>(&'a self, id: &str, merged: &'a SortedModels) -> Option<&'a Model> {
        let captured = self.captured.get(id)?;
        if self.failed.contains(id) {
            return Some(captured);
        }
        merged.get(id).or(Some(captured))
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct ModelOrchestrator {
    ctx: Collaborators,
}

impl ModelOrchestrator {
    pub fn new(ctx: Collaborators) -> Self {
        Self { ctx }
    }

    /// Import `request.models`, replacing stored models as needed.
    ///
    /// Fails only on schema errors, on failure to read the current models,
    /// or on cancellation; per-model failures are recorded on the tracker.
    pub async fn import(
        &self,
        tracker: &Arc<ProgressTracker>,
        request: ImportModels,
        cancel: &CancelSignal,
    ) -> Result<ModelImportReport, BulkError> {
        let mut report = ModelImportReport::default();
        tracker.begin(request.models.len()).await;
        if request.models.is_empty() {
            return Ok(report);
        }

        tracing::info!(count = request.models.len(), "parsing models");
        let existing = self.ctx.reader.get_models().await?;
        let merged = merge_models(&request.models, &existing);
        let sorted = self.ctx.parser.topological_sort(&merged)?;

        let (to_process, skipped) = plan_replacements(
            &request.models,
            &existing,
            &sorted,
            request.full_overlay,
        );
        for id in &skipped {
            tracker
                .advance(1, Some((id.clone(), SKIPPED_EXACT_MATCH.to_string())))
                .await;
        }
        report.skipped = skipped;

        if to_process.is_empty() {
            tracing::info!("all incoming models match the stored ones");
            tracker.set_status("Imported 0 Models").await;
            tracker.flush().await;
            return Ok(report);
        }
        if cancel.is_cancelled() {
            return Err(BulkError::Cancelled);
        }

        let mut manifest = RecreateManifest::default();
        let phase = self
            .replace(&existing, &to_process, &mut manifest, &mut report, tracker, cancel)
            .await;
        report.recreated = self.recreate(&manifest, &sorted, tracker).await;

        tracker
            .set_status(format!("Imported {} Models", report.created.len()))
            .await;
        tracker
            .set_outputs(json!({
                "created": report.created,
                "deleted": report.deleted,
                "recreated": report.recreated,
                "skipped": report.skipped,
            }))
            .await;
        tracker.flush().await;

        let finalized = self.finalize(&report.created).await;
        match phase {
            Ok(()) => finalized.map(|()| report),
            Err(e) => {
                if let Err(refresh) = finalized {
                    tracing::warn!(error = %refresh, "post-import refresh failed");
                }
                Err(e)
            }
        }
    }

    /// Cascade delete then create, recording everything deleted in
    /// `manifest`.
    async fn replace(
        &self,
        existing: &[Model],
        to_process: &[Model],
        manifest: &mut RecreateManifest,
        report: &mut ModelImportReport,
        tracker: &Arc<ProgressTracker>,
        cancel: &CancelSignal,
    ) -> Result<(), BulkError> {
        let existing_ids: BTreeSet<&str> = existing.iter().map(|m| m.id.as_str()).collect();
        let replaced: Vec<&str> = to_process
            .iter()
            .map(|m| m.id.as_str())
            .filter(|id| existing_ids.contains(id))
            .collect();

        if !replaced.is_empty() {
            let sorted_existing = self.ctx.parser.topological_sort(existing)?;
            if let Some(range) = cascade_range(&sorted_existing, replaced.iter().copied()) {
                tracing::info!(
                    replaced = replaced.len(),
                    cascade = range.len(),
                    "deleting models to be replaced"
                );
                for entry in sorted_existing.entries()[range].iter().rev() {
                    if cancel.is_cancelled() {
                        return Err(BulkError::Cancelled);
                    }
                    let id = entry.model.id.clone();
                    manifest.capture(entry.model.clone());
                    match self.ctx.writer.delete_model(&id).await {
                        Ok(()) => report.deleted.push(id),
                        Err(e) => {
                            tracing::error!(model = %id, error = %e, "failed to delete model");
                            tracker.note_error(id, e.to_string()).await;
                        }
                    }
                }
            }
        }

        tracing::info!(count = to_process.len(), "creating models");
        for model in to_process {
            if cancel.is_cancelled() {
                return Err(BulkError::Cancelled);
            }
            match self.ctx.writer.create_model(model).await {
                Ok(()) => {
                    manifest.restored(&model.id);
                    report.created.push(model.id.clone());
                    tracker.advance(1, None).await;
                }
                Err(e) => {
                    tracing::error!(model = %model.id, error = %e, "failed to create model");
                    manifest.mark_failed(&model.id);
                    tracker
                        .advance(1, Some((model.id.clone(), e.to_string())))
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Recreate every manifest model missing from the store, dependencies
    /// first. Ignores cancellation.
    async fn recreate(
        &self,
        manifest: &RecreateManifest,
        sorted: &SortedModels,
        tracker: &Arc<ProgressTracker>,
    ) -> Vec<ModelId> {
        let mut recreated = Vec::new();
        if manifest.is_empty() {
            return recreated;
        }

        let present: BTreeSet<ModelId> = match self.ctx.reader.get_models().await {
            Ok(models) => models.into_iter().map(|m| m.id).collect(),
            Err(e) => {
                tracing::error!(error = %e, "could not read models before recreating, recreating all");
                BTreeSet::new()
            }
        };

        tracing::info!(pending = manifest.len(), "recreating deleted models");
        for id in sorted.ids().filter(|id| manifest.contains(id)) {
            if present.contains(id) {
                continue;
            }
            let Some(model) = manifest.definition_for(id, sorted) else {
                continue;
            };
            let mut result = self.ctx.writer.create_model(model).await;
            if result.is_err() {
                if let Some(original) = manifest.captured(id).filter(|o| *o != model) {
                    tracing::warn!(model = %id, "recreating from the original definition");
                    result = self.ctx.writer.create_model(original).await;
                }
            }
            match result {
                Ok(()) => recreated.push(id.to_string()),
                Err(e) => {
                    tracing::error!(model = %id, error = %e, "failed to recreate model");
                    tracker.note_error(id, e.to_string()).await;
                }
            }
        }
        recreated
    }

    async fn finalize(&self, created: &[ModelId]) -> Result<(), BulkError> {
        self.ctx.cache.refresh().await?;
        if !created.is_empty() {
            self.ctx
                .sync
                .notify(SyncEvent::ModelsCreated {
                    model_ids: created.to_vec(),
                })
                .await?;
        }
        Ok(())
    }

    /// Delete the requested models, dependents before their dependencies.
    pub async fn delete(
        &self,
        tracker: &Arc<ProgressTracker>,
        request: DeleteModels,
        cancel: &CancelSignal,
    ) -> Result<ModelDeleteReport, BulkError> {
        let mut report = ModelDeleteReport::default();
        if !request.delete_all && request.model_ids.is_empty() {
            tracker.begin(0).await;
            return Ok(report);
        }

        let existing = self.ctx.reader.get_models().await?;
        let by_id: HashMap<&str, &Model> = existing.iter().map(|m| (m.id.as_str(), m)).collect();
        let sorted = self.ctx.parser.topological_sort(&existing)?;

        let mut targets: BTreeSet<ModelId> = if request.delete_all {
            sorted.ids().map(str::to_string).collect()
        } else {
            request.model_ids.iter().cloned().collect()
        };
        if request.include_dependencies {
            let requested = request.model_ids.iter().map(String::as_str);
            if let Some(range) = cascade_range(&sorted, requested) {
                targets.extend(sorted.entries()[range].iter().map(|e| e.model.id.clone()));
            }
        }

        // Unknown ids first, then reverse dependency order.
        let mut ordered: Vec<ModelId> = targets.into_iter().collect();
        ordered.sort_by_key(|id| match sorted.position(id) {
            None => (0, 0),
            Some(p) => (1, sorted.len() - p),
        });

        tracker.begin(ordered.len()).await;
        tracing::info!(count = ordered.len(), "deleting models");
        let mut cancelled = false;
        for id in ordered {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match self.ctx.writer.delete_model(&id).await {
                Ok(()) => {
                    if let Some(model) = by_id.get(id.as_str()) {
                        if let Err(e) = self
                            .ctx
                            .sync
                            .notify(SyncEvent::ModelDeleted {
                                model: (*model).clone(),
                            })
                            .await
                        {
                            tracing::warn!(model = %id, error = %e, "failed to notify model deletion");
                        }
                    }
                    report.deleted.push(id);
                    tracker.advance(1, None).await;
                }
                Err(e) => {
                    tracing::error!(model = %id, error = %e, "failed to delete model");
                    tracker.advance(1, Some((id, e.to_string()))).await;
                }
            }
        }

        tracker
            .set_status(format!("Deleted {} Models", report.deleted.len()))
            .await;
        tracker.set_outputs(json!({ "deleted": report.deleted })).await;
        tracker.flush().await;
        let refreshed = self.ctx.cache.refresh().await;

        if cancelled {
            if let Err(e) = refreshed {
                tracing::warn!(error = %e, "post-delete refresh failed");
            }
            Err(BulkError::Cancelled)
        } else {
            refreshed?;
            Ok(report)
        }
    }
}

/// Split incoming models into those that need writing, in dependency order,
/// and ids skipped because the store already holds an identical copy.
fn plan_replacements(
    incoming: &[Model],
    existing: &[Model],
    sorted: &SortedModels,
    full_overlay: bool,
) -> (Vec<Model>, Vec<ModelId>) {
    let incoming_ids: BTreeSet<&str> = incoming.iter().map(|m| m.id.as_str()).collect();
    let stored: HashMap<&str, &Model> = existing.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut to_process = Vec::new();
    let mut skipped = Vec::new();
    for model in sorted.models().filter(|m| incoming_ids.contains(m.id.as_str())) {
        let unchanged = stored
            .get(model.id.as_str())
            .is_some_and(|s| s.exact_match(model));
        if unchanged && !full_overlay {
            skipped.push(model.id.clone());
        } else {
            to_process.push(model.clone());
        }
    }
    (to_process, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(models: &[Model]) -> SortedModels {
        graphbulk_schema::topological_sort(models).unwrap()
    }

    #[test]
    fn test_plan_skips_exact_matches_unless_overlay() {
        let existing = vec![Model::new("a", r#"{"v":1}"#), Model::new("b", "{}")];
        let incoming = vec![
            Model::new("a", r#"{ "v": 1 }"#),
            Model::new("b", r#"{"v":2}"#),
            Model::new("c", "{}"),
        ];
        let merged = merge_models(&incoming, &existing);
        let order = sorted(&merged);

        let (process, skipped) = plan_replacements(&incoming, &existing, &order, false);
        let ids: Vec<&str> = process.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(skipped, vec!["a"]);

        let (process, skipped) = plan_replacements(&incoming, &existing, &order, true);
        assert_eq!(process.len(), 3);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_plan_follows_dependency_order() {
        let incoming = vec![
            Model::new("b", "{}").with_dependencies(["a"]),
            Model::new("a", "{}"),
        ];
        let order = sorted(&incoming);
        let (process, _) = plan_replacements(&incoming, &[], &order, false);
        let ids: Vec<&str> = process.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_manifest_prefers_merged_definition() {
        let merged = sorted(&[Model::new("a", "new")]);
        let mut manifest = RecreateManifest::default();
        manifest.capture(Model::new("a", "old"));

        assert_eq!(manifest.definition_for("a", &merged).unwrap().definition, "new");

        manifest.mark_failed("a");
        assert_eq!(manifest.definition_for("a", &merged).unwrap().definition, "old");

        manifest.restored("a");
        assert!(manifest.is_empty());
        assert!(manifest.definition_for("a", &merged).is_none());
    }
}
