//! Collaborator traits consumed by the bulk engine.

use crate::error::StoreError;
use crate::jobs::JobRecord;
use crate::types::{Page, Relationship, Twin, TwinQuery};
use async_trait::async_trait;
use graphbulk_schema::{Model, ModelId};
use serde::{Deserialize, Serialize};

/// Read side of the graph store.
#[async_trait]
pub trait GraphReader: Send + Sync {
    /// Every model currently defined.
    async fn get_models(&self) -> Result<Vec<Model>, StoreError>;

    async fn get_twin(&self, id: &str) -> Result<Twin, StoreError>;

    /// Page through twins matching `query`.
    async fn query_twins(
        &self,
        query: &TwinQuery,
        continuation: Option<String>,
    ) -> Result<Page<Twin>, StoreError>;

    /// Relationships whose source is `twin_id`.
    async fn get_outgoing_relationships(
        &self,
        twin_id: &str,
    ) -> Result<Vec<Relationship>, StoreError>;

    /// Relationships whose target is `twin_id`.
    async fn get_incoming_relationships(
        &self,
        twin_id: &str,
    ) -> Result<Vec<Relationship>, StoreError>;
}

/// Write side of the graph store.
#[async_trait]
pub trait GraphWriter: Send + Sync {
    /// Create a single model. Multi-model submission is not offered: the
    /// store's reference resolver does not commit multi-model batches
    /// correctly.
    async fn create_model(&self, model: &Model) -> Result<(), StoreError>;

    async fn delete_model(&self, id: &str) -> Result<(), StoreError>;

    async fn create_or_replace_twin(&self, twin: &Twin) -> Result<Twin, StoreError>;

    async fn delete_twin(&self, id: &str) -> Result<(), StoreError>;

    /// The relationship must carry an id.
    async fn create_or_replace_relationship(
        &self,
        relationship: &Relationship,
    ) -> Result<Relationship, StoreError>;

    async fn delete_relationship(&self, source_id: &str, id: &str) -> Result<(), StoreError>;
}

/// Persistent job-record store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Read-modify-write of a job record. Records without an id are created
    /// and returned with their assigned id.
    async fn create_or_update(&self, record: &JobRecord) -> Result<JobRecord, StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;
}

/// Cache invalidation issued once after a model-affecting operation.
#[async_trait]
pub trait CacheRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), StoreError>;
}

/// Downstream change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    ModelsCreated { model_ids: Vec<ModelId> },
    ModelDeleted { model: Model },
    TwinsChanged {
        upserted: Vec<String>,
        deleted: Vec<String>,
    },
}

#[async_trait]
pub trait SyncNotifier: Send + Sync {
    async fn notify(&self, event: SyncEvent) -> Result<(), StoreError>;
}
