//! Job progress tracking with throttled persistence.
//!
//! Every mutation of the job record happens under one async lock, and
//! persistence happens while that lock is held, so concurrent workers can
//! never interleave partial updates or write a stale record over a newer one.
//! The record is written on the first advance and then at most once per
//! checkpoint interval; [`ProgressTracker::flush`] writes unconditionally and
//! must be called when an operation ends.

use graphbulk_store::{JobRecord, JobStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct TrackerState {
    record: JobRecord,
    last_persisted: Option<Instant>,
    /// Advances since the last `begin`.
    advanced: usize,
    succeeded: usize,
}

pub struct ProgressTracker {
    state: Mutex<TrackerState>,
    jobs: Arc<dyn JobStore>,
    interval: Duration,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub fn new(record: JobRecord, jobs: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                record,
                last_persisted: None,
                advanced: 0,
                succeeded: 0,
            }),
            jobs,
            interval,
        }
    }

    /// Start a counted phase of `total` items.
    pub async fn begin(&self, total: usize) {
        let mut state = self.state.lock().await;
        state.record.total_count = total;
        state.record.current_count = 0;
        state.advanced = 0;
    }

    /// Grow the expected total, for phases whose size is discovered while
    /// paging.
    pub async fn add_to_total(&self, n: usize) {
        let mut state = self.state.lock().await;
        state.record.total_count += n;
    }

    /// Count `n` processed items. A failed item is recorded against `id`,
    /// or `id#2`, `id#3`, ... when that id already carries an error, so every
    /// counted failure keeps its own entry.
    pub async fn advance(&self, n: usize, error: Option<(String, String)>) {
        let mut state = self.state.lock().await;
        state.record.current_count += n;
        match error {
            Some((id, message)) => {
                let key = distinct_key(&state.record.errors_by_id, &id);
                state.record.errors_by_id.insert(key, message);
            }
            None => state.succeeded += n,
        }
        state.advanced += 1;

        let due = state.advanced == 1
            || state
                .last_persisted
                .map_or(true, |at| at.elapsed() >= self.interval);
        if due {
            self.persist(&mut state).await;
        }
    }

    /// Record an error without counting progress.
    pub async fn note_error(&self, id: impl Into<String>, message: impl Into<String>) {
        let mut state = self.state.lock().await;
        state
            .record
            .errors_by_id
            .entry(id.into())
            .or_insert_with(|| message.into());
    }

    pub async fn set_status(&self, message: impl Into<String>) {
        self.state.lock().await.record.status_message = message.into();
    }

    pub async fn append_status(&self, message: &str) {
        self.state.lock().await.record.status_message.push_str(message);
    }

    pub async fn set_outputs(&self, outputs: serde_json::Value) {
        self.state.lock().await.record.outputs = outputs;
    }

    /// Persist now, regardless of the checkpoint interval.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        self.persist(&mut state).await;
    }

    pub async fn snapshot(&self) -> JobRecord {
        self.state.lock().await.record.clone()
    }

    /// Items counted without an error since the tracker was created.
    pub async fn succeeded(&self) -> usize {
        self.state.lock().await.succeeded
    }

    async fn persist(&self, state: &mut TrackerState) {
        match self.jobs.create_or_update(&state.record).await {
            Ok(stored) => {
                state.record.job_id = stored.job_id;
                state.record.created_at = stored.created_at;
                state.record.last_updated_at = stored.last_updated_at;
            }
            Err(e) => {
                // Progress is advisory; the next checkpoint retries.
                tracing::warn!(job_id = %state.record.job_id, error = %e, "failed to persist job progress");
            }
        }
        state.last_persisted = Some(Instant::now());
    }
}

/// `id` if `errors` has no entry for it, otherwise the first free `id#n`.
pub(crate) fn distinct_key(errors: &BTreeMap<String, String>, id: &str) -> String {
    if !errors.contains_key(id) {
        return id.to_string();
    }
    (2..)
        .map(|n| format!("{id}#{n}"))
        .find(|key| !errors.contains_key(key))
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphbulk_store::MemoryJobStore;

    fn tracker(jobs: &Arc<MemoryJobStore>) -> ProgressTracker {
        let jobs: Arc<dyn JobStore> = jobs.clone();
        ProgressTracker::new(
            JobRecord::new("ImportTwins", "tester"),
            jobs,
            Duration::from_secs(20),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_advance_persists_then_throttles() {
        let jobs = Arc::new(MemoryJobStore::new());
        let tracker = tracker(&jobs);
        tracker.begin(10).await;

        tracker.advance(1, None).await;
        assert_eq!(jobs.write_count(), 1);

        for _ in 0..5 {
            tracker.advance(1, None).await;
        }
        assert_eq!(jobs.write_count(), 1);

        tokio::time::advance(Duration::from_secs(21)).await;
        tracker.advance(1, None).await;
        assert_eq!(jobs.write_count(), 2);
        assert_eq!(jobs.history()[1].current_count, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_always_writes_latest_counts() {
        let jobs = Arc::new(MemoryJobStore::new());
        let tracker = tracker(&jobs);
        tracker.begin(3).await;
        for _ in 0..3 {
            tracker.advance(1, None).await;
        }
        tracker.flush().await;

        let last = jobs.history().pop().unwrap();
        assert_eq!(last.current_count, 3);
        assert_eq!(last.total_count, 3);
        assert!(!last.job_id.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_failures_of_one_id_are_all_kept() {
        let jobs = Arc::new(MemoryJobStore::new());
        let tracker = tracker(&jobs);
        tracker.begin(2).await;
        tracker
            .advance(1, Some(("x".to_string(), "first".to_string())))
            .await;
        tracker
            .advance(1, Some(("x".to_string(), "second".to_string())))
            .await;
        tracker.note_error("y", "side note").await;

        let record = tracker.snapshot().await;
        assert_eq!(record.errors_by_id["x"], "first");
        assert_eq!(record.errors_by_id["x#2"], "second");
        assert_eq!(record.errors_by_id["y"], "side note");
        assert_eq!(record.current_count, 2);
        assert_eq!(tracker.succeeded().await, 0);
    }

    #[tokio::test]
    async fn test_job_id_assigned_on_first_persist_is_kept() {
        let jobs = Arc::new(MemoryJobStore::new());
        let tracker = tracker(&jobs);
        tracker.flush().await;
        let id = tracker.snapshot().await.job_id;
        assert!(id.starts_with("ImportTwins.tester."));

        tracker.set_status("Updated 1 twins... ").await;
        tracker.flush().await;
        assert_eq!(tracker.snapshot().await.job_id, id);
        assert_eq!(jobs.get(&id).await.unwrap().unwrap().status_message, "Updated 1 twins... ");
    }

    #[tokio::test]
    async fn test_concurrent_advances_are_not_lost() {
        let jobs = Arc::new(MemoryJobStore::new());
        let tracker = Arc::new(tracker(&jobs));
        tracker.begin(200).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    tracker.advance(1, None).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.snapshot().await.current_count, 200);
        assert_eq!(tracker.succeeded().await, 200);
    }
}
