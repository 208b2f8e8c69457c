//! Twin and relationship import and deletion.
//!
//! Imports upsert twins, optionally remove stored relationships the batch no
//! longer describes, then upsert relationships in random order so that
//! writes fan out over many source twins. Deletes remove every relationship
//! touching the targeted twins before the twins themselves.

use crate::cancel::CancelSignal;
use crate::config::BulkConfig;
use crate::error::{BulkError, ItemError};
use crate::executor::{BoundedExecutor, Summary};
use crate::identity::{canonical_id, describes, RelationshipResolver};
use crate::progress::ProgressTracker;
use crate::Collaborators;
use graphbulk_store::{Relationship, SyncEvent, Twin, TwinQuery};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportTwins {
    #[serde(default)]
    pub twins: Vec<Twin>,
    /// `None` leaves relationships untouched.
    #[serde(default)]
    pub relationships: Option<Vec<Relationship>>,
    /// Delete stored outgoing relationships of the imported twins that the
    /// batch does not describe.
    #[serde(default)]
    pub replace_relationships: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTwins {
    #[serde(default)]
    pub twin_ids: Vec<String>,
    #[serde(default)]
    pub delete_all: bool,
    /// Narrows `delete_all`.
    #[serde(default)]
    pub query: TwinQuery,
    /// Dotted path into the twin → required value.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

/// Per-key counts of entities written or deleted.
///
/// Twins count under their model id, relationships under `-> {name}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TwinReport {
    pub counts: BTreeMap<String, usize>,
    pub twin_ids: Vec<String>,
    pub relationships_removed: usize,
}

impl TwinReport {
    fn outputs(&self) -> Value {
        json!(self.counts)
    }
}

type Shared<T> = Arc<Mutex<T>>;

pub struct TwinOrchestrator {
    ctx: Collaborators,
    config: BulkConfig,
    executor: BoundedExecutor,
}

impl TwinOrchestrator {
    pub fn new(ctx: Collaborators, config: BulkConfig) -> Self {
        let executor = BoundedExecutor::new(config.worker_count());
        Self {
            ctx,
            config,
            executor,
        }
    }

    // ------------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------------

    pub async fn import(
        &self,
        tracker: &Arc<ProgressTracker>,
        request: ImportTwins,
        cancel: &CancelSignal,
    ) -> Result<TwinReport, BulkError> {
        let relationships = request.relationships.clone().unwrap_or_default();
        tracker
            .begin(request.twins.len() + relationships.len())
            .await;

        let counts: Shared<BTreeMap<String, usize>> = Arc::default();
        let upserted: Shared<Vec<String>> = Arc::default();
        let result = self
            .import_phases(tracker, request, relationships, &counts, &upserted, cancel)
            .await;

        let mut report = TwinReport {
            counts: std::mem::take(&mut *counts.lock()),
            twin_ids: std::mem::take(&mut *upserted.lock()),
            relationships_removed: 0,
        };
        tracker.set_outputs(report.outputs()).await;
        tracker.flush().await;
        report.relationships_removed = result?;

        if !report.twin_ids.is_empty() {
            self.notify(SyncEvent::TwinsChanged {
                upserted: report.twin_ids.clone(),
                deleted: Vec::new(),
            })
            .await;
        }
        Ok(report)
    }

    /// Returns how many relationships were removed by the replace step.
    async fn import_phases(
        &self,
        tracker: &Arc<ProgressTracker>,
        request: ImportTwins,
        mut relationships: Vec<Relationship>,
        counts: &Shared<BTreeMap<String, usize>>,
        upserted: &Shared<Vec<String>>,
        cancel: &CancelSignal,
    ) -> Result<usize, BulkError> {
        let mut removed = 0;
        let twin_ids: BTreeSet<String> = request.twins.iter().map(|t| t.id.clone()).collect();

        if !request.twins.is_empty() {
            tracing::info!(count = request.twins.len(), "upserting twins");
            tracker
                .append_status(&format!("Updated {} twins... ", request.twins.len()))
                .await;
            let writer = Arc::clone(&self.ctx.writer);
            let (counts, upserted) = (Arc::clone(counts), Arc::clone(upserted));
            self.executor
                .run(
                    request.twins,
                    Some(Arc::clone(tracker)),
                    cancel,
                    |twin: &Twin| Some(twin.id.clone()),
                    move |twin: Twin, cancel: CancelSignal| {
                        let writer = Arc::clone(&writer);
                        let counts = Arc::clone(&counts);
                        let upserted = Arc::clone(&upserted);
                        async move {
                            cancel.check()?;
                            writer.create_or_replace_twin(&twin).await?;
                            *counts.lock().entry(twin.model_id).or_default() += 1;
                            upserted.lock().push(twin.id);
                            Ok::<(), ItemError>(())
                        }
                    },
                )
                .await
                .into_result()?;
        }

        // Without an incoming set every outgoing relationship is unreferenced.
        if request.replace_relationships && !twin_ids.is_empty() {
            removed = self
                .remove_unreferenced(tracker, twin_ids, &relationships, cancel)
                .await?;
        }

        if request.relationships.is_none() {
            return Ok(removed);
        }

        if !relationships.is_empty() {
            tracing::info!(count = relationships.len(), "upserting relationships");
            tracker
                .append_status(&format!("Updated {} relationships... ", relationships.len()))
                .await;
            relationships.shuffle(&mut rand::thread_rng());

            let resolver = Arc::new(RelationshipResolver::new(
                Arc::clone(&self.ctx.reader),
                self.config.distinguishing_properties.clone(),
            ));
            let writer = Arc::clone(&self.ctx.writer);
            let counts = Arc::clone(counts);
            let distinguishing = self.config.distinguishing_properties.clone();
            self.executor
                .run(
                    relationships,
                    Some(Arc::clone(tracker)),
                    cancel,
                    move |rel: &Relationship| {
                        Some(
                            rel.id()
                                .map(str::to_string)
                                .unwrap_or_else(|| canonical_id(rel, &distinguishing)),
                        )
                    },
                    move |mut rel: Relationship, cancel: CancelSignal| {
                        let resolver = Arc::clone(&resolver);
                        let writer = Arc::clone(&writer);
                        let counts = Arc::clone(&counts);
                        async move {
                            cancel.check()?;
                            rel.id = Some(resolver.resolve(&rel).await.id);
                            cancel.check()?;
                            writer.create_or_replace_relationship(&rel).await?;
                            *counts.lock().entry(format!("-> {}", rel.name)).or_default() += 1;
                            Ok::<(), ItemError>(())
                        }
                    },
                )
                .await
                .into_result()?;
        }
        Ok(removed)
    }

    /// Delete stored outgoing relationships of `twin_ids` that no incoming
    /// relationship describes.
    async fn remove_unreferenced(
        &self,
        tracker: &Arc<ProgressTracker>,
        twin_ids: BTreeSet<String>,
        incoming: &[Relationship],
        cancel: &CancelSignal,
    ) -> Result<usize, BulkError> {
        let stored: Shared<Vec<Relationship>> = Arc::default();
        let reader = Arc::clone(&self.ctx.reader);
        let sink = Arc::clone(&stored);
        let summary = self
            .executor
            .run(
                twin_ids.into_iter().collect(),
                None,
                cancel,
                |id: &String| Some(id.clone()),
                move |id: String, cancel: CancelSignal| {
                    let reader = Arc::clone(&reader);
                    let sink = Arc::clone(&sink);
                    async move {
                        cancel.check()?;
                        let rels = reader.get_outgoing_relationships(&id).await?;
                        sink.lock().extend(rels);
                        Ok::<(), ItemError>(())
                    }
                },
            )
            .await
            .into_result()?;
        log_untracked_failures("list relationships", &summary);

        let distinguishing = &self.config.distinguishing_properties;
        let unreferenced: Vec<Relationship> = std::mem::take(&mut *stored.lock())
            .into_iter()
            .filter(|s| !incoming.iter().any(|i| describes(i, s, distinguishing)))
            .collect();
        if unreferenced.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = unreferenced.len(), "deleting unreferenced relationships");
        tracker
            .append_status(&format!(
                "Deleting {} unreferenced relationships... ",
                unreferenced.len()
            ))
            .await;
        tracker.flush().await;

        let writer = Arc::clone(&self.ctx.writer);
        let summary = self
            .executor
            .run(
                unreferenced,
                None,
                cancel,
                |rel: &Relationship| rel.id().map(str::to_string),
                move |rel: Relationship, cancel: CancelSignal| {
                    let writer = Arc::clone(&writer);
                    async move {
                        cancel.check()?;
                        let id = rel.id().unwrap_or_default();
                        match writer.delete_relationship(&rel.source_id, id).await {
                            Err(e) if !e.is_not_found() => Err(ItemError::from(e)),
                            _ => Ok(()),
                        }
                    }
                },
            )
            .await
            .into_result()?;
        log_untracked_failures("delete relationship", &summary);
        Ok(summary.succeeded)
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    pub async fn delete(
        &self,
        tracker: &Arc<ProgressTracker>,
        request: DeleteTwins,
        cancel: &CancelSignal,
    ) -> Result<TwinReport, BulkError> {
        let mut report = TwinReport::default();
        let result = if request.delete_all {
            self.delete_all(tracker, &request, &mut report, cancel).await
        } else {
            self.delete_by_ids(tracker, &request, &mut report, cancel).await
        };

        tracker.set_outputs(report.outputs()).await;
        tracker.flush().await;
        result?;

        if !report.twin_ids.is_empty() {
            self.notify(SyncEvent::TwinsChanged {
                upserted: Vec::new(),
                deleted: report.twin_ids.clone(),
            })
            .await;
        }
        Ok(report)
    }

    async fn delete_by_ids(
        &self,
        tracker: &Arc<ProgressTracker>,
        request: &DeleteTwins,
        report: &mut TwinReport,
        cancel: &CancelSignal,
    ) -> Result<(), BulkError> {
        let ids: BTreeSet<String> = request.twin_ids.iter().cloned().collect();
        tracker.begin(0).await;
        if ids.is_empty() {
            return Ok(());
        }

        let found: Shared<Vec<Twin>> = Arc::default();
        let reader = Arc::clone(&self.ctx.reader);
        let sink = Arc::clone(&found);
        let filters = request.filters.clone();
        self.executor
            .run(
                ids.into_iter().collect(),
                None,
                cancel,
                |id: &String| Some(id.clone()),
                move |id: String, cancel: CancelSignal| {
                    let reader = Arc::clone(&reader);
                    let sink = Arc::clone(&sink);
                    let filters = filters.clone();
                    async move {
                        cancel.check()?;
                        match reader.get_twin(&id).await {
                            Ok(twin) if twin_matches(&twin, &filters) => sink.lock().push(twin),
                            Ok(_) => {}
                            Err(e) if e.is_not_found() => {
                                tracing::debug!(twin = %id, "twin already gone");
                            }
                            Err(e) => return Err(ItemError::from(e)),
                        }
                        Ok::<(), ItemError>(())
                    }
                },
            )
            .await
            .into_result()?;

        let twins = std::mem::take(&mut *found.lock());
        tracker.add_to_total(twins.len()).await;
        self.delete_twin_set(tracker, twins, report, cancel).await
    }

    /// Page through every twin matching the query and delete the pages one by
    /// one.
    async fn delete_all(
        &self,
        tracker: &Arc<ProgressTracker>,
        request: &DeleteTwins,
        report: &mut TwinReport,
        cancel: &CancelSignal,
    ) -> Result<(), BulkError> {
        tracker.begin(0).await;
        let mut continuation = None;
        let mut page_no = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(BulkError::Cancelled);
            }
            let page = self
                .ctx
                .reader
                .query_twins(&request.query, continuation.take())
                .await?;
            page_no += 1;

            let twins: Vec<Twin> = page
                .items
                .into_iter()
                .filter(|t| twin_matches(t, &request.filters))
                .collect();
            tracing::debug!(page = page_no, twins = twins.len(), "deleting page of twins");
            tracker.add_to_total(twins.len()).await;
            self.delete_twin_set(tracker, twins, report, cancel).await?;
            tracker.set_outputs(report.outputs()).await;
            tracker.flush().await;

            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
        Ok(())
    }

    /// Delete all relationships touching `twins`, then the twins.
    async fn delete_twin_set(
        &self,
        tracker: &Arc<ProgressTracker>,
        twins: Vec<Twin>,
        report: &mut TwinReport,
        cancel: &CancelSignal,
    ) -> Result<(), BulkError> {
        if twins.is_empty() {
            return Ok(());
        }

        let touching: Shared<BTreeMap<String, Relationship>> = Arc::default();
        let reader = Arc::clone(&self.ctx.reader);
        let sink = Arc::clone(&touching);
        let summary = self
            .executor
            .run(
                twins.iter().map(|t| t.id.clone()).collect(),
                None,
                cancel,
                |id: &String| Some(id.clone()),
                move |id: String, cancel: CancelSignal| {
                    let reader = Arc::clone(&reader);
                    let sink = Arc::clone(&sink);
                    async move {
                        cancel.check()?;
                        let mut rels = reader.get_incoming_relationships(&id).await?;
                        rels.extend(reader.get_outgoing_relationships(&id).await?);
                        let mut sink = sink.lock();
                        for rel in rels {
                            if let Some(rel_id) = rel.id().map(str::to_string) {
                                sink.entry(rel_id).or_insert(rel);
                            }
                        }
                        Ok::<(), ItemError>(())
                    }
                },
            )
            .await
            .into_result()?;
        log_untracked_failures("list relationships", &summary);

        let relationships: Vec<Relationship> =
            std::mem::take(&mut *touching.lock()).into_values().collect();
        report.relationships_removed += self
            .delete_relationships(tracker, relationships, cancel)
            .await?;

        let writer = Arc::clone(&self.ctx.writer);
        let counts: Shared<BTreeMap<String, usize>> = Arc::new(Mutex::new(std::mem::take(&mut report.counts)));
        let deleted: Shared<Vec<String>> = Arc::default();
        let (count_sink, deleted_sink) = (Arc::clone(&counts), Arc::clone(&deleted));
        let result = self
            .executor
            .run(
                twins,
                Some(Arc::clone(tracker)),
                cancel,
                |twin: &Twin| Some(twin.id.clone()),
                move |twin: Twin, cancel: CancelSignal| {
                    let writer = Arc::clone(&writer);
                    let counts = Arc::clone(&count_sink);
                    let deleted = Arc::clone(&deleted_sink);
                    async move {
                        cancel.check()?;
                        match writer.delete_twin(&twin.id).await {
                            Err(e) if !e.is_not_found() => return Err(ItemError::from(e)),
                            _ => {}
                        }
                        *counts.lock().entry(twin.model_id).or_default() += 1;
                        deleted.lock().push(twin.id);
                        Ok::<(), ItemError>(())
                    }
                },
            )
            .await
            .into_result();

        report.counts = std::mem::take(&mut *counts.lock());
        report.twin_ids.extend(std::mem::take(&mut *deleted.lock()));
        result.map(|_| ())
    }

    /// Delete relationships chunk by chunk, concurrently within a chunk.
    /// Already-missing relationships count as deleted.
    async fn delete_relationships(
        &self,
        tracker: &Arc<ProgressTracker>,
        relationships: Vec<Relationship>,
        cancel: &CancelSignal,
    ) -> Result<usize, BulkError> {
        if relationships.is_empty() {
            return Ok(0);
        }
        tracing::info!(count = relationships.len(), "deleting relationships");

        let chunk_size = self.config.relationship_delete_chunk.max(1);
        let mut deleted = 0;
        for chunk in relationships.chunks(chunk_size) {
            if cancel.is_cancelled() {
                return Err(BulkError::Cancelled);
            }
            let mut set = JoinSet::new();
            for rel in chunk.iter().cloned() {
                let writer = Arc::clone(&self.ctx.writer);
                set.spawn(async move {
                    let id = rel.id().unwrap_or_default().to_string();
                    let outcome = writer.delete_relationship(&rel.source_id, &id).await;
                    (id, outcome)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => deleted += 1,
                    Ok((_, Err(e))) if e.is_not_found() => deleted += 1,
                    Ok((id, Err(e))) => {
                        tracing::warn!(relationship = %id, error = %e, "failed to delete relationship");
                        tracker.note_error(id, e.to_string()).await;
                    }
                    Err(e) => tracing::error!(error = %e, "relationship delete task aborted"),
                }
            }
        }
        Ok(deleted)
    }

    async fn notify(&self, event: SyncEvent) {
        if let Err(e) = self.ctx.sync.notify(event).await {
            tracing::warn!(error = %e, "failed to send twin sync notification");
        }
    }
}

fn log_untracked_failures(phase: &str, summary: &Summary) {
    for (id, error) in &summary.errors {
        tracing::warn!(phase, item = %id, error = %error, "untracked item failed");
    }
}

/// Whether `twin` satisfies every filter.
///
/// Filter keys are dotted paths into the twin's JSON form (`model_id`,
/// `contents.siteID`). Strings compare as-is, other values by their JSON
/// rendering. A missing path never matches.
pub fn twin_matches(twin: &Twin, filters: &BTreeMap<String, String>) -> bool {
    if filters.is_empty() {
        return true;
    }
    let Ok(value) = serde_json::to_value(twin) else {
        return false;
    };
    filters.iter().all(|(path, expected)| {
        let found = path
            .split('.')
            .try_fold(&value, |node, key| node.as_object()?.get(key));
        match found {
            Some(Value::String(s)) => s == expected,
            Some(other) => other.to_string() == *expected,
            None => false,
        }
    })
}
