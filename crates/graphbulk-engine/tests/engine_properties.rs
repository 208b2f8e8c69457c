//! Property tests for executor accounting and relationship identity

use graphbulk_engine::{
    canonical_id, reconcile, worker_count, BoundedExecutor, CancelSignal, IdSource, ItemError,
    ProgressTracker,
};
use graphbulk_store::{JobRecord, JobStore, MemoryJobStore, Relationship};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Executor
// ============================================================================

proptest! {
    #[test]
    fn prop_every_item_has_exactly_one_outcome(
        failing in prop::collection::vec(any::<bool>(), 0..120),
        workers in 1usize..20,
    ) {
        let items: Vec<(usize, bool)> = failing.iter().copied().enumerate().collect();
        let summary = runtime().block_on(BoundedExecutor::new(workers).run(
            items,
            None,
            &CancelSignal::new(),
            |(i, _)| Some(format!("i{i}")),
            |(i, fail), _| async move {
                if fail {
                    Err(ItemError::Failed(format!("item {i}")))
                } else {
                    Ok(())
                }
            },
        ));

        let expected_failures = failing.iter().filter(|f| **f).count();
        prop_assert_eq!(summary.processed, failing.len());
        prop_assert_eq!(summary.errors.len(), expected_failures);
        prop_assert_eq!(summary.succeeded + summary.errors.len(), summary.processed);
        prop_assert!(!summary.cancelled);
    }

    #[test]
    fn prop_cancellation_never_overcounts(
        len in 1usize..80,
        cancel_at in 0usize..80,
        workers in 1usize..8,
    ) {
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        let summary = runtime().block_on(BoundedExecutor::new(workers).run(
            (0..len).collect::<Vec<_>>(),
            None,
            &cancel,
            |i| Some(i.to_string()),
            move |i, _| {
                let trigger = trigger.clone();
                async move {
                    if i == cancel_at {
                        trigger.cancel();
                    }
                    Ok::<(), ItemError>(())
                }
            },
        ));

        prop_assert!(summary.processed <= len);
        prop_assert_eq!(summary.succeeded, summary.processed);
        prop_assert_eq!(summary.cancelled, cancel_at < len);
    }

    #[test]
    fn prop_record_accounts_for_repeated_ids(
        items in prop::collection::vec((0u8..4, any::<bool>()), 0..60),
        workers in 1usize..6,
    ) {
        let (record, succeeded) = runtime().block_on(async {
            let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
            let tracker = Arc::new(ProgressTracker::new(
                JobRecord::new("ImportTwins", "prop"),
                jobs,
                Duration::from_secs(20),
            ));
            tracker.begin(items.len()).await;
            BoundedExecutor::new(workers)
                .run(
                    items.clone(),
                    Some(Arc::clone(&tracker)),
                    &CancelSignal::new(),
                    |(id, _)| Some(format!("twin-{id}")),
                    |(_, fail), _| async move {
                        if fail {
                            Err(ItemError::Failed("rejected".to_string()))
                        } else {
                            Ok(())
                        }
                    },
                )
                .await;
            (tracker.snapshot().await, tracker.succeeded().await)
        });

        let failures = items.iter().filter(|(_, fail)| *fail).count();
        prop_assert_eq!(record.current_count, items.len());
        prop_assert_eq!(record.errors_by_id.len(), failures);
        prop_assert_eq!(record.errors_by_id.len() + succeeded, record.current_count);
    }

    #[test]
    fn prop_worker_count_in_bounds(base in 0usize..10_000, percent in 0u32..300) {
        let n = worker_count(base, percent);
        prop_assert!((1..=100).contains(&n));
    }
}

// ============================================================================
// Relationship identity
// ============================================================================

fn relationship() -> impl Strategy<Value = Relationship> {
    ("[a-c]", "(feeds|powers)", "[a-c]", prop::option::of("L[1-3]")).prop_map(
        |(source, name, target, phase)| {
            let rel = Relationship::new(source, name, target);
            match phase {
                Some(p) => rel.with_property("phase", p),
                None => rel,
            }
        },
    )
}

proptest! {
    #[test]
    fn prop_reconcile_is_idempotent_and_order_free(
        rel in relationship(),
        stored in prop::collection::vec((relationship(), "[0-9a-f]{6}"), 0..12),
    ) {
        let distinguishing = vec!["phase".to_string()];
        let existing: Vec<Relationship> = stored
            .into_iter()
            .map(|(r, suffix)| { let id = format!("{}-{suffix}", r.name); r.with_id(id) })
            .collect();

        let first = reconcile(&rel, &existing, &distinguishing);
        let again = reconcile(&rel, &existing, &distinguishing);
        prop_assert_eq!(&first, &again);

        let reversed: Vec<_> = existing.iter().rev().cloned().collect();
        prop_assert_eq!(&first, &reconcile(&rel, &reversed, &distinguishing));

        // Writing under the resolved id and reconciling again is stable.
        let mut after = existing.clone();
        after.push(rel.clone().with_id(first.id.clone()));
        prop_assert_eq!(reconcile(&rel, &after, &distinguishing).id, first.id.clone());

        let legacy: BTreeSet<&str> = existing.iter().filter_map(|r| r.id()).collect();
        match first.source {
            IdSource::Legacy => prop_assert!(legacy.contains(first.id.as_str())),
            IdSource::Canonical => prop_assert_eq!(first.id, canonical_id(&rel, &distinguishing)),
            IdSource::Explicit => prop_assert!(false, "no explicit id was given"),
        }
    }
}
