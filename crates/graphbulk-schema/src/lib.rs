//! Graphbulk model definitions and dependency ordering
//!
//! A graph store enforces referential integrity over its schema: a model can
//! only be created once everything it references exists, and it can only be
//! removed once nothing references it. This crate provides the pieces the
//! bulk engine needs to respect that:
//!
//! ```text
//!   incoming models ──┐
//!                     ├──► merge (incoming wins) ──► topological sort ──► SortedModels
//!   store models ─────┘                                                     │
//!                                                                           ├──► forward order: create
//!                                                                           ├──► reverse order: delete
//!                                                                           └──► cascade_range: what must
//!                                                                                 be removed transiently
//! ```
//!
//! Parsing a schema language into a dependency list is the job of a
//! [`SchemaParser`]. [`DeclaredDependencyParser`] trusts the dependency ids
//! carried on each [`Model`].

pub mod cascade;
pub mod model;
pub mod sort;

pub use cascade::cascade_range;
pub use model::{merge_models, Model, ModelId};
pub use sort::{
    topological_sort, DeclaredDependencyParser, SchemaError, SchemaParser, SortedEntry,
    SortedModels,
};
