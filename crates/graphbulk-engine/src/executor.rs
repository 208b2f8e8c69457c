//! Bounded parallel execution over a finite item set.
//!
//! A fixed pool of workers pulls items from a shared queue, so at most
//! `workers` operations are in flight at once. Every item yields exactly one
//! outcome: success, a per-item error, or "not started" when cancellation is
//! observed first. A failing item never stops the others.

use crate::cancel::CancelSignal;
use crate::error::{BulkError, ItemError};
use crate::progress::{distinct_key, ProgressTracker};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Aggregate outcome of one executor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Items whose operation ran to completion, successfully or not.
    pub processed: usize,
    pub succeeded: usize,
    /// Item id → error text for failed items.
    pub errors: BTreeMap<String, String>,
    /// Cancellation was observed; unstarted items were skipped.
    pub cancelled: bool,
}

impl Summary {
    pub fn failed(&self) -> usize {
        self.processed - self.succeeded
    }

    /// `Err(BulkError::Cancelled)` if the run observed cancellation.
    pub fn into_result(self) -> Result<Self, BulkError> {
        if self.cancelled {
            Err(BulkError::Cancelled)
        } else {
            Ok(self)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    workers: usize,
}

impl BoundedExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `op` over every item with bounded concurrency.
    ///
    /// `id_of` names an item for error reporting; items it cannot name are
    /// reported as `item-{index}`, and a name that already carries an error
    /// gets a `#n` suffix. With a tracker, each completed item advances it by
    /// one, carrying the error when the item failed. A panicking operation is
    /// a failure of its item.
    pub async fn run<T, I, F, Fut>(
        &self,
        items: Vec<T>,
        tracker: Option<Arc<ProgressTracker>>,
        cancel: &CancelSignal,
        id_of: I,
        op: F,
    ) -> Summary
    where
        T: Send + 'static,
        I: Fn(&T) -> Option<String> + Send + Sync + 'static,
        F: Fn(T, CancelSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ItemError>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Summary {
                cancelled: cancel.is_cancelled(),
                ..Summary::default()
            };
        }

        let queue = Arc::new(Mutex::new(items.into_iter().enumerate()));
        let summary = Arc::new(Mutex::new(Summary::default()));
        let interrupted = Arc::new(AtomicBool::new(false));
        let id_of = Arc::new(id_of);
        let op = Arc::new(op);

        let mut set = JoinSet::new();
        for worker in 0..self.workers.min(total) {
            let queue = Arc::clone(&queue);
            let summary = Arc::clone(&summary);
            let interrupted = Arc::clone(&interrupted);
            let id_of = Arc::clone(&id_of);
            let op = Arc::clone(&op);
            let tracker = tracker.clone();
            let cancel = cancel.clone();

            set.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().next();
                    let Some((index, item)) = next else {
                        break;
                    };
                    let id = id_of(&item)
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| format!("item-{index}"));

                    let outcome = match tokio::spawn(op(item, cancel.clone())).await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(ItemError::Failed(format!("operation aborted: {e}"))),
                    };
                    match outcome {
                        Ok(()) => {
                            {
                                let mut s = summary.lock();
                                s.processed += 1;
                                s.succeeded += 1;
                            }
                            if let Some(tracker) = &tracker {
                                tracker.advance(1, None).await;
                            }
                        }
                        Err(ItemError::Cancelled) => {
                            tracing::debug!(worker, item = %id, "item observed cancellation");
                            interrupted.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(ItemError::Failed(message)) => {
                            tracing::warn!(item = %id, error = %message, "item failed");
                            {
                                let mut s = summary.lock();
                                s.processed += 1;
                                let key = distinct_key(&s.errors, &id);
                                s.errors.insert(key, message.clone());
                            }
                            if let Some(tracker) = &tracker {
                                tracker.advance(1, Some((id, message))).await;
                            }
                        }
                    }
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "executor worker aborted");
            }
        }

        let mut summary = std::mem::take(&mut *summary.lock());
        summary.cancelled = cancel.is_cancelled()
            || interrupted.load(Ordering::SeqCst);
        tracing::debug!(
            total,
            processed = summary.processed,
            failed = summary.failed(),
            cancelled = summary.cancelled,
            "executor run finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphbulk_store::{JobRecord, JobStore, MemoryJobStore};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_items_processed_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let summary = BoundedExecutor::new(4)
            .run(
                (0..50).collect::<Vec<u32>>(),
                None,
                &CancelSignal::new(),
                |n| Some(n.to_string()),
                move |n, _| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().push(n);
                        Ok::<(), ItemError>(())
                    }
                },
            )
            .await;

        assert_eq!(summary.processed, 50);
        assert_eq!(summary.succeeded, 50);
        assert!(!summary.cancelled);
        let mut seen = seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failures_recorded_and_do_not_stop_others() {
        let summary = BoundedExecutor::new(3)
            .run(
                vec!["a", "bad", "c", "worse"],
                None,
                &CancelSignal::new(),
                |s| Some(s.to_string()),
                |s, _| async move {
                    if s.len() > 2 {
                        Err(ItemError::Failed(format!("{s} failed")))
                    } else {
                        Ok(())
                    }
                },
            )
            .await;

        assert_eq!(summary.processed, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.errors["bad"], "bad failed");
        assert_eq!(summary.errors["worse"], "worse failed");
    }

    #[tokio::test]
    async fn test_unnamed_items_get_index_ids() {
        let summary = BoundedExecutor::new(1)
            .run(
                vec![1, 2],
                None,
                &CancelSignal::new(),
                |_| None,
                |n, _| async move { Err(ItemError::Failed(format!("no {n}"))) },
            )
            .await;

        assert_eq!(summary.errors["item-0"], "no 1");
        assert_eq!(summary.errors["item-1"], "no 2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (gauge, high) = (Arc::clone(&in_flight), Arc::clone(&peak));

        let summary = BoundedExecutor::new(3)
            .run(
                (0..30).collect::<Vec<u32>>(),
                None,
                &CancelSignal::new(),
                |n| Some(n.to_string()),
                move |_, _| {
                    let gauge = Arc::clone(&gauge);
                    let high = Arc::clone(&high);
                    async move {
                        let now = gauge.fetch_add(1, Ordering::SeqCst) + 1;
                        high.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        gauge.fetch_sub(1, Ordering::SeqCst);
                        Ok::<(), ItemError>(())
                    }
                },
            )
            .await;

        assert_eq!(summary.processed, 30);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_unstarted_items() {
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        let summary = BoundedExecutor::new(1)
            .run(
                (0..10).collect::<Vec<u32>>(),
                None,
                &cancel,
                |n| Some(n.to_string()),
                move |n, _| {
                    let trigger = trigger.clone();
                    async move {
                        if n == 3 {
                            trigger.cancel();
                        }
                        Ok::<(), ItemError>(())
                    }
                },
            )
            .await;

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 4);
        assert!(summary.into_result().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_item_reported_cancellation_is_not_an_error() {
        let summary = BoundedExecutor::new(1)
            .run(
                vec![1, 2, 3],
                None,
                &CancelSignal::new(),
                |n| Some(n.to_string()),
                |n, _| async move {
                    if n == 2 {
                        Err(ItemError::Cancelled)
                    } else {
                        Ok(())
                    }
                },
            )
            .await;

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 1);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_tracker_advanced_per_item() {
        let jobs = Arc::new(MemoryJobStore::new());
        let store: Arc<dyn JobStore> = jobs.clone();
        let tracker = Arc::new(ProgressTracker::new(
            JobRecord::new("ImportTwins", "tester"),
            store,
            Duration::from_secs(20),
        ));
        tracker.begin(5).await;

        BoundedExecutor::new(2)
            .run(
                vec![1, 2, 3, 4, 5],
                Some(Arc::clone(&tracker)),
                &CancelSignal::new(),
                |n| Some(format!("n{n}")),
                |n, _| async move {
                    if n % 2 == 0 {
                        Err(ItemError::Failed("even".to_string()))
                    } else {
                        Ok(())
                    }
                },
            )
            .await;

        let record = tracker.snapshot().await;
        assert_eq!(record.current_count, 5);
        assert_eq!(record.errors_by_id.len(), 2);
        assert_eq!(tracker.succeeded().await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_ids_keep_one_error_each() {
        let summary = BoundedExecutor::new(2)
            .run(
                vec!["x", "x", "x"],
                None,
                &CancelSignal::new(),
                |s| Some(s.to_string()),
                |_, _| async { Err::<(), _>(ItemError::Failed("throttled".to_string())) },
            )
            .await;

        assert_eq!(summary.processed, 3);
        let keys: Vec<&str> = summary.errors.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["x", "x#2", "x#3"]);
    }

    #[tokio::test]
    async fn test_panicking_item_is_a_failure_not_a_cancellation() {
        let summary = BoundedExecutor::new(1)
            .run(
                vec![1, 2, 3],
                None,
                &CancelSignal::new(),
                |n| Some(format!("n{n}")),
                |n, _| async move {
                    if n == 2 {
                        panic!("boom");
                    }
                    Ok::<(), ItemError>(())
                },
            )
            .await;

        assert!(!summary.cancelled);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 2);
        assert!(summary.errors["n2"].starts_with("operation aborted"));
    }

    #[tokio::test]
    async fn test_empty_input_is_a_no_op() {
        let summary = BoundedExecutor::new(4)
            .run(
                Vec::<u32>::new(),
                None,
                &CancelSignal::new(),
                |n| Some(n.to_string()),
                |_, _| async { Ok::<(), ItemError>(()) },
            )
            .await;
        assert_eq!(summary, Summary::default());
    }
}
