//! In-memory graph store with referential integrity.
//!
//! Besides serving as the reference implementation of [`GraphReader`] and
//! [`GraphWriter`], the store records every call it receives and can inject
//! failures, latency and callbacks so orchestration logic can be exercised
//! deterministically.

use crate::error::StoreError;
use crate::traits::{GraphReader, GraphWriter};
use crate::types::{Page, Relationship, Twin, TwinQuery};
use async_trait::async_trait;
use graphbulk_schema::Model;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Call recording
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreOp {
    GetModels,
    GetTwin,
    QueryTwins,
    GetRelationships,
    CreateModel,
    DeleteModel,
    UpsertTwin,
    DeleteTwin,
    UpsertRelationship,
    DeleteRelationship,
}

impl StoreOp {
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            Self::GetModels | Self::GetTwin | Self::QueryTwins | Self::GetRelationships
        )
    }
}

/// A call received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub id: String,
}

type CallHook = Arc<dyn Fn(&StoreCall) + Send + Sync>;

/// Wildcard id for [`MemoryGraphStore::fail_on`].
pub const ANY_ID: &str = "*";

// ============================================================================
// Snapshot
// ============================================================================

/// Serializable contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub twins: Vec<Twin>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Creation order is preserved so `get_models` is deterministic.
    models: Vec<Model>,
    twins: BTreeMap<String, Twin>,
    /// Keyed by (source id, relationship id).
    relationships: BTreeMap<(String, String), Relationship>,
}

impl StoreState {
    fn model_index(&self, id: &str) -> Option<usize> {
        self.models.iter().position(|m| m.id == id)
    }
}

// ============================================================================
// Store
// ============================================================================

pub struct MemoryGraphStore {
    state: RwLock<StoreState>,
    calls: Mutex<Vec<StoreCall>>,
    failures: Mutex<HashMap<(StoreOp, String), String>>,
    hook: RwLock<Option<CallHook>>,
    latency: Mutex<Option<Duration>>,
    page_size: usize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryGraphStore")
            .field("models", &state.models.len())
            .field("twins", &state.twins.len())
            .field("relationships", &state.relationships.len())
            .finish()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            hook: RwLock::new(None),
            latency: Mutex::new(None),
            page_size: 100,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Load a snapshot as-is, without integrity checks.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write();
            state.models = snapshot.models;
            state.twins = snapshot
                .twins
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect();
            state.relationships = snapshot
                .relationships
                .into_iter()
                .filter_map(|r| {
                    let id = r.id()?.to_string();
                    Some(((r.source_id.clone(), id), r))
                })
                .collect();
        }
        store
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            models: state.models.clone(),
            twins: state.twins.values().cloned().collect(),
            relationships: state.relationships.values().cloned().collect(),
        }
    }

    // ------------------------------------------------------------------------
    // Seeding (bypasses call recording and integrity checks)
    // ------------------------------------------------------------------------

    pub fn seed_models(&self, models: impl IntoIterator<Item = Model>) {
        self.state.write().models.extend(models);
    }

    pub fn seed_twins(&self, twins: impl IntoIterator<Item = Twin>) {
        let mut state = self.state.write();
        for twin in twins {
            state.twins.insert(twin.id.clone(), twin);
        }
    }

    pub fn seed_relationships(&self, relationships: impl IntoIterator<Item = Relationship>) {
        let mut state = self.state.write();
        for rel in relationships {
            if let Some(id) = rel.id().map(str::to_string) {
                state
                    .relationships
                    .insert((rel.source_id.clone(), id), rel);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn model(&self, id: &str) -> Option<Model> {
        self.state.read().models.iter().find(|m| m.id == id).cloned()
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.state.read().models.iter().map(|m| m.id.clone()).collect()
    }

    pub fn twin(&self, id: &str) -> Option<Twin> {
        self.state.read().twins.get(id).cloned()
    }

    pub fn twin_count(&self) -> usize {
        self.state.read().twins.len()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.state.read().relationships.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Ids of recorded calls for one operation, in call order.
    pub fn calls_for(&self, op: StoreOp) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Highest number of calls observed in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------------

    /// Make `op` on `id` (or on any id with [`ANY_ID`]) fail as unavailable.
    pub fn fail_on(&self, op: StoreOp, id: impl Into<String>, message: impl Into<String>) {
        self.failures.lock().insert((op, id.into()), message.into());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Run `hook` before every call is served.
    pub fn on_call(&self, hook: impl Fn(&StoreCall) + Send + Sync + 'static) {
        *self.hook.write() = Some(Arc::new(hook));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    async fn enter(&self, op: StoreOp, id: &str) -> Result<InFlight<'_>, StoreError> {
        let call = StoreCall {
            op,
            id: id.to_string(),
        };
        self.calls.lock().push(call.clone());

        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            hook(&call);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = {
            let failures = self.failures.lock();
            failures
                .get(&(op, id.to_string()))
                .or_else(|| failures.get(&(op, ANY_ID.to_string())))
                .cloned()
        };
        match failure {
            Some(message) => Err(StoreError::Unavailable(message)),
            None => Ok(guard),
        }
    }

    fn matches_query(twin: &Twin, query: &TwinQuery) -> bool {
        if !query.model_ids.is_empty() && !query.model_ids.contains(&twin.model_id) {
            return false;
        }
        match query.search.as_deref().map(str::to_lowercase) {
            Some(needle) if !needle.is_empty() => {
                let name = twin
                    .contents
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_lowercase();
                twin.id.to_lowercase().contains(&needle) || name.contains(&needle)
            }
            _ => true,
        }
    }
}

#[async_trait]
impl GraphReader for MemoryGraphStore {
    async fn get_models(&self) -> Result<Vec<Model>, StoreError> {
        let _guard = self.enter(StoreOp::GetModels, ANY_ID).await?;
        Ok(self.state.read().models.clone())
    }

    async fn get_twin(&self, id: &str) -> Result<Twin, StoreError> {
        let _guard = self.enter(StoreOp::GetTwin, id).await?;
        self.state
            .read()
            .twins
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("twin", id))
    }

    async fn query_twins(
        &self,
        query: &TwinQuery,
        continuation: Option<String>,
    ) -> Result<Page<Twin>, StoreError> {
        let _guard = self
            .enter(StoreOp::QueryTwins, continuation.as_deref().unwrap_or(""))
            .await?;
        let state = self.state.read();

        let mut matching = state
            .twins
            .values()
            .filter(|t| continuation.as_deref().map_or(true, |after| t.id.as_str() > after))
            .filter(|t| Self::matches_query(t, query));

        let items: Vec<Twin> = matching.by_ref().take(self.page_size).cloned().collect();
        let continuation = match (items.last(), matching.next()) {
            (Some(last), Some(_)) => Some(last.id.clone()),
            _ => None,
        };
        Ok(Page {
            items,
            continuation,
        })
    }

    async fn get_outgoing_relationships(
        &self,
        twin_id: &str,
    ) -> Result<Vec<Relationship>, StoreError> {
        let _guard = self.enter(StoreOp::GetRelationships, twin_id).await?;
        let state = self.state.read();
        Ok(state
            .relationships
            .values()
            .filter(|r| r.source_id == twin_id)
            .cloned()
            .collect())
    }

    async fn get_incoming_relationships(
        &self,
        twin_id: &str,
    ) -> Result<Vec<Relationship>, StoreError> {
        let _guard = self.enter(StoreOp::GetRelationships, twin_id).await?;
        let state = self.state.read();
        Ok(state
            .relationships
            .values()
            .filter(|r| r.target_id == twin_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GraphWriter for MemoryGraphStore {
    async fn create_model(&self, model: &Model) -> Result<(), StoreError> {
        let _guard = self.enter(StoreOp::CreateModel, &model.id).await?;
        let mut state = self.state.write();

        if state.model_index(&model.id).is_some() {
            return Err(StoreError::Conflict(format!(
                "model {} already exists",
                model.id
            )));
        }
        if let Some(missing) = model
            .dependency_ids
            .iter()
            .find(|dep| state.model_index(dep).is_none())
        {
            return Err(StoreError::Conflict(format!(
                "model {} references undefined model {}",
                model.id, missing
            )));
        }
        state.models.push(model.clone());
        Ok(())
    }

    async fn delete_model(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.enter(StoreOp::DeleteModel, id).await?;
        let mut state = self.state.write();

        let idx = state
            .model_index(id)
            .ok_or_else(|| StoreError::not_found("model", id))?;
        if let Some(dependent) = state
            .models
            .iter()
            .find(|m| m.dependency_ids.contains(id))
        {
            return Err(StoreError::Conflict(format!(
                "model {} is referenced by {}",
                id, dependent.id
            )));
        }
        state.models.remove(idx);
        Ok(())
    }

    async fn create_or_replace_twin(&self, twin: &Twin) -> Result<Twin, StoreError> {
        let _guard = self.enter(StoreOp::UpsertTwin, &twin.id).await?;
        let mut state = self.state.write();

        if twin.id.is_empty() {
            return Err(StoreError::Invalid("twin id is required".to_string()));
        }
        if state.model_index(&twin.model_id).is_none() {
            return Err(StoreError::Conflict(format!(
                "twin {} uses undefined model {}",
                twin.id, twin.model_id
            )));
        }
        state.twins.insert(twin.id.clone(), twin.clone());
        Ok(twin.clone())
    }

    async fn delete_twin(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.enter(StoreOp::DeleteTwin, id).await?;
        let mut state = self.state.write();

        if !state.twins.contains_key(id) {
            return Err(StoreError::not_found("twin", id));
        }
        if let Some(rel) = state
            .relationships
            .values()
            .find(|r| r.source_id == id || r.target_id == id)
        {
            return Err(StoreError::Conflict(format!(
                "twin {} still has relationship {}",
                id,
                rel.id().unwrap_or_default()
            )));
        }
        state.twins.remove(id);
        Ok(())
    }

    async fn create_or_replace_relationship(
        &self,
        relationship: &Relationship,
    ) -> Result<Relationship, StoreError> {
        let id = relationship
            .id()
            .ok_or_else(|| StoreError::Invalid("relationship id is required".to_string()))?
            .to_string();
        let _guard = self.enter(StoreOp::UpsertRelationship, &id).await?;
        let mut state = self.state.write();

        for endpoint in [&relationship.source_id, &relationship.target_id] {
            if !state.twins.contains_key(endpoint) {
                return Err(StoreError::not_found("twin", endpoint.clone()));
            }
        }
        state
            .relationships
            .insert((relationship.source_id.clone(), id), relationship.clone());
        Ok(relationship.clone())
    }

    async fn delete_relationship(&self, source_id: &str, id: &str) -> Result<(), StoreError> {
        let _guard = self.enter(StoreOp::DeleteRelationship, id).await?;
        self.state
            .write()
            .relationships
            .remove(&(source_id.to_string(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("relationship", id))
    }
}
