//! Graphbulk bulk-mutation engine
//!
//! Applies large batches of models, twins and relationships to a graph store
//! as long-running, cancellable jobs.
//!
//! ```text
//!                      ┌─────────────┐
//!   BulkRequest ──────►│  JobRunner  │── status / timestamps ──► JobStore
//!                      └──────┬──────┘
//!               ┌─────────────┴──────────────┐
//!      ┌────────▼─────────┐        ┌─────────▼────────┐
//!      │ModelOrchestrator │        │ TwinOrchestrator │
//!      │ sort, diff,      │        │ twins, then      │
//!      │ cascade delete,  │        │ relationships,   │
//!      │ recreate         │        │ cleanup          │
//!      └────────┬─────────┘        └─────────┬────────┘
//!               │     ┌──────────────────┐   │
//!               └────►│ BoundedExecutor  │◄──┘
//!                     │ + ProgressTracker│
//!                     └────────┬─────────┘
//!                              ▼
//!                    GraphReader / GraphWriter
//! ```
//!
//! Individual item failures never abort a job; they are recorded on the job
//! record by item id. Only schema errors, failed reads that precede any
//! mutation, and cancellation end an operation early. Model imports always
//! restore every model they deleted, even when cancelled.

pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod identity;
pub mod models;
pub mod progress;
pub mod runner;
pub mod twins;

pub use cancel::CancelSignal;
pub use config::{worker_count, BulkConfig};
pub use error::{BulkError, ItemError};
pub use executor::{BoundedExecutor, Summary};
pub use identity::{
    canonical_id, describes, is_equivalent, reconcile, IdSource, RelationshipResolver,
    ResolvedId,
};
pub use models::{
    DeleteModels, ImportModels, ModelDeleteReport, ModelImportReport, ModelOrchestrator,
    RecreateManifest, SKIPPED_EXACT_MATCH,
};
pub use progress::ProgressTracker;
pub use runner::{BulkRequest, JobRunner};
pub use twins::{twin_matches, DeleteTwins, ImportTwins, TwinOrchestrator, TwinReport};

use graphbulk_schema::{DeclaredDependencyParser, SchemaParser};
use graphbulk_store::{
    CacheRefresher, GraphReader, GraphWriter, JobStore, MemoryGraphStore, MemoryJobStore,
    SyncNotifier,
};
use std::sync::Arc;

/// External services a bulk operation talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub reader: Arc<dyn GraphReader>,
    pub writer: Arc<dyn GraphWriter>,
    pub jobs: Arc<dyn JobStore>,
    pub cache: Arc<dyn CacheRefresher>,
    pub sync: Arc<dyn SyncNotifier>,
    pub parser: Arc<dyn SchemaParser>,
}

impl Collaborators {
    /// Wire everything to in-memory implementations.
    pub fn in_memory<S>(store: Arc<MemoryGraphStore>, jobs: Arc<MemoryJobStore>, signals: Arc<S>) -> Self
    where
        S: CacheRefresher + SyncNotifier + 'static,
    {
        Self {
            reader: store.clone(),
            writer: store,
            jobs,
            cache: signals.clone(),
            sync: signals,
            parser: Arc::new(DeclaredDependencyParser),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
