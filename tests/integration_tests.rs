//! Integration tests for complete bulk jobs
//!
//! These tests drive the engine end to end against the in-memory store:
//! - Model import → cascade delete → recreate
//! - Twin and relationship import under reduced concurrency
//! - Cancellation and recovery
//!
//! Run with: cargo test --test integration_tests

use graphbulk_engine::{
    BulkConfig, BulkRequest, CancelSignal, Collaborators, DeleteTwins, ImportModels,
    ImportTwins, JobRunner,
};
use graphbulk_schema::Model;
use graphbulk_store::{
    JobStatus, MemoryGraphStore, MemoryJobStore, RecordingSignals, Relationship, Signal,
    StoreOp, StoreSnapshot, SyncEvent, Twin,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn runner_for(
    store: &Arc<MemoryGraphStore>,
    config: BulkConfig,
) -> (JobRunner, Arc<MemoryJobStore>, Arc<RecordingSignals>) {
    let jobs = Arc::new(MemoryJobStore::new());
    let signals = Arc::new(RecordingSignals::new());
    let ctx = Collaborators::in_memory(Arc::clone(store), Arc::clone(&jobs), Arc::clone(&signals));
    (JobRunner::new(ctx, config), jobs, signals)
}

fn building_models() -> Vec<Model> {
    vec![
        Model::new("dtmi:space;1", r#"{"@type":"Interface"}"#),
        Model::new("dtmi:building;1", r#"{"@type":"Interface","extends":"dtmi:space;1"}"#)
            .with_dependencies(["dtmi:space;1"]),
        Model::new("dtmi:floor;1", r#"{"@type":"Interface","extends":"dtmi:space;1"}"#)
            .with_dependencies(["dtmi:space;1"]),
        Model::new("dtmi:room;1", r#"{"@type":"Interface","extends":"dtmi:floor;1"}"#)
            .with_dependencies(["dtmi:floor;1"]),
    ]
}

// ============================================================================
// Models
// ============================================================================

#[tokio::test]
async fn test_model_lifecycle_keeps_store_complete() {
    let store = Arc::new(MemoryGraphStore::new());
    let (runner, _, signals) = runner_for(&store, BulkConfig::default());

    let first = runner
        .submit(
            "ops",
            BulkRequest::ImportModels(ImportModels {
                models: building_models(),
                full_overlay: false,
            }),
            CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.status, JobStatus::Done);
    assert_eq!(store.model_ids().len(), 4);

    // Changing the root model rebuilds everything below it.
    store.clear_calls();
    let second = runner
        .submit(
            "ops",
            BulkRequest::ImportModels(ImportModels {
                models: vec![Model::new("dtmi:space;1", r#"{"@type":"Interface","v":2}"#)],
                full_overlay: false,
            }),
            CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(second.status, JobStatus::Done);

    let deletes = store.calls_for(StoreOp::DeleteModel);
    assert_eq!(deletes.len(), 4);
    assert_eq!(deletes.last().map(String::as_str), Some("dtmi:space;1"));
    assert_eq!(
        store.calls_for(StoreOp::CreateModel).first().map(String::as_str),
        Some("dtmi:space;1")
    );
    let ids: BTreeSet<String> = store.model_ids().into_iter().collect();
    assert_eq!(ids.len(), 4);
    assert!(store.model("dtmi:space;1").unwrap().definition.contains("\"v\":2"));

    // One refresh per import, each followed by its sync notification.
    let refreshes = signals
        .log()
        .iter()
        .filter(|s| matches!(s, Signal::Refresh))
        .count();
    assert_eq!(refreshes, 2);
    assert!(matches!(
        signals.log().last(),
        Some(Signal::Sync(SyncEvent::ModelsCreated { model_ids })) if model_ids == &vec!["dtmi:space;1".to_string()]
    ));
}

#[tokio::test]
async fn test_job_timeout_cancels_and_restores_models() {
    let store = Arc::new(MemoryGraphStore::new());
    store.seed_models(building_models());
    store.set_latency(Duration::from_millis(300));

    let config = BulkConfig {
        job_timeout_secs: Some(1),
        ..BulkConfig::default()
    };
    let (runner, _, _) = runner_for(&store, config);

    let record = runner
        .submit(
            "ops",
            BulkRequest::ImportModels(ImportModels {
                models: building_models(),
                full_overlay: true,
            }),
            CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(record.status, JobStatus::Canceled);
    let ids: BTreeSet<String> = store.model_ids().into_iter().collect();
    let expected: BTreeSet<String> = building_models().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, expected);
}

// ============================================================================
// Twins and relationships
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reduced_concurrency_bounds_in_flight_calls() {
    let store = Arc::new(MemoryGraphStore::new());
    store.seed_models([Model::new("dtmi:room;1", "{}")]);
    let twins: Vec<Twin> = (0..50)
        .map(|i| Twin::new(format!("room-{i:02}"), "dtmi:room;1"))
        .collect();
    store.seed_twins(twins.clone());

    let relationships: Vec<Relationship> = (0..2_000)
        .map(|i| {
            Relationship::new(format!("room-{:02}", i % 50), "adjacentTo", format!("room-{:02}", (i / 50) % 50))
                .with_property("slot", i)
        })
        .collect();

    let config = BulkConfig::default()
        .with_concurrency_percent(15)
        .with_distinguishing_properties(["slot"]);
    assert_eq!(config.worker_count(), 2);
    let (runner, _, _) = runner_for(&store, config);

    let record = runner
        .submit(
            "ops",
            BulkRequest::ImportTwins(ImportTwins {
                twins: Vec::new(),
                relationships: Some(relationships),
                replace_relationships: false,
            }),
            CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.current_count, 2_000);
    assert!(record.errors_by_id.is_empty());
    assert_eq!(store.relationships().len(), 2_000);
    assert!(store.max_in_flight() <= 2);
}

#[tokio::test]
async fn test_twin_import_then_delete_all() {
    let store = Arc::new(MemoryGraphStore::new().with_page_size(7));
    store.seed_models([Model::new("dtmi:room;1", "{}")]);
    let (runner, _, _) = runner_for(&store, BulkConfig::default());

    let twins: Vec<Twin> = (0..30)
        .map(|i| Twin::new(format!("r{i:02}"), "dtmi:room;1").with_property("name", format!("Room {i}")))
        .collect();
    let relationships: Vec<Relationship> = (0..29)
        .map(|i| Relationship::new(format!("r{i:02}"), "next", format!("r{:02}", i + 1)))
        .collect();

    let imported = runner
        .submit(
            "ops",
            BulkRequest::ImportTwins(ImportTwins {
                twins,
                relationships: Some(relationships),
                replace_relationships: true,
            }),
            CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(imported.status, JobStatus::Done);
    assert_eq!(store.twin_count(), 30);
    assert_eq!(store.relationships().len(), 29);

    let deleted = runner
        .submit(
            "ops",
            BulkRequest::DeleteTwins(DeleteTwins {
                delete_all: true,
                ..DeleteTwins::default()
            }),
            CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status, JobStatus::Done);
    assert_eq!(deleted.current_count, 30);
    assert_eq!(store.twin_count(), 0);
    assert!(store.relationships().is_empty());
}

#[tokio::test]
async fn test_legacy_relationships_are_not_duplicated() {
    let store = Arc::new(MemoryGraphStore::new());
    store.seed_models([Model::new("dtmi:room;1", "{}")]);
    store.seed_twins([Twin::new("a", "dtmi:room;1"), Twin::new("b", "dtmi:room;1")]);
    store.seed_relationships([
        Relationship::new("a", "adjacentTo", "b").with_id("adjacentTo-9c1e"),
        Relationship::new("a", "adjacentTo", "b").with_id("adjacentTo-04aa"),
    ]);
    let (runner, _, _) = runner_for(&store, BulkConfig::default());

    runner
        .submit(
            "ops",
            BulkRequest::ImportTwins(ImportTwins {
                twins: Vec::new(),
                relationships: Some(vec![Relationship::new("a", "adjacentTo", "b")]),
                replace_relationships: false,
            }),
            CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(store.relationships().len(), 2);
    assert_eq!(
        store.calls_for(StoreOp::UpsertRelationship),
        vec!["adjacentTo-04aa"]
    );
}

// ============================================================================
// Snapshots
// ============================================================================

#[tokio::test]
async fn test_snapshot_file_survives_a_job() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.json");

    let seeded = MemoryGraphStore::new();
    seeded.seed_models(building_models());
    std::fs::write(&path, serde_json::to_vec(&seeded.snapshot()).unwrap()).unwrap();

    let snapshot: StoreSnapshot =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let store = Arc::new(MemoryGraphStore::from_snapshot(snapshot));
    let (runner, _, _) = runner_for(&store, BulkConfig::default());

    runner
        .submit(
            "ops",
            BulkRequest::ImportTwins(ImportTwins {
                twins: vec![Twin::new("r1", "dtmi:room;1")],
                relationships: None,
                replace_relationships: false,
            }),
            CancelSignal::new(),
        )
        .await
        .unwrap();

    std::fs::write(&path, serde_json::to_vec(&store.snapshot()).unwrap()).unwrap();
    let reloaded: StoreSnapshot =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(reloaded.models.len(), 4);
    assert_eq!(reloaded.twins.len(), 1);
}
