//! Graphbulk collaborator interfaces
//!
//! The bulk engine never talks to a concrete graph store. It consumes the
//! traits in this crate:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      BULK ENGINE                                 │
//! └───────┬──────────────┬──────────────┬─────────────┬──────────────┘
//!         │              │              │             │
//!   ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐ ┌─────▼──────┐
//!   │GraphReader│  │GraphWriter│  │ JobStore  │ │Cache/Sync  │
//!   │ models,   │  │ one model │  │ progress  │ │ signals    │
//!   │ twins,    │  │ per call, │  │ record    │ │ after the  │
//!   │ edges     │  │ upserts   │  │ r-m-w     │ │ operation  │
//!   └───────────┘  └───────────┘  └───────────┘ └────────────┘
//! ```
//!
//! [`MemoryGraphStore`] and [`MemoryJobStore`] implement the store traits in
//! memory with the same referential-integrity rules as a real graph store:
//! models cannot be created before their dependencies or deleted while other
//! models depend on them, twins need their model, relationships need both
//! endpoints, and twins cannot be deleted while relationships reference them.

pub mod error;
pub mod jobs;
pub mod memory;
pub mod signals;
pub mod traits;
pub mod types;


pub use error::StoreError;
pub use jobs::{JobRecord, JobStatus, MemoryJobStore};
pub use memory::{MemoryGraphStore, StoreCall, StoreOp, StoreSnapshot, ANY_ID};
pub use signals::{NoopSignals, RecordingSignals, Signal};
pub use traits::{CacheRefresher, GraphReader, GraphWriter, JobStore, SyncEvent, SyncNotifier};
pub use types::{Page, Relationship, Twin, TwinQuery};
