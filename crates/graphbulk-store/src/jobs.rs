//! Job progress records and an in-memory job store.

use crate::error::StoreError;
use crate::traits::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Canceled,
    Error,
}

/// Progress of one bulk job.
///
/// Owned by a single running operation at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Assigned by the job store on first write.
    #[serde(default)]
    pub job_id: String,
    pub job_type: String,
    #[serde(default)]
    pub job_subtype: Option<String>,
    pub user_id: String,
    pub status: JobStatus,
    pub total_count: usize,
    pub current_count: usize,
    #[serde(default)]
    pub status_message: String,
    /// Failed item id → error text.
    #[serde(default)]
    pub errors_by_id: BTreeMap<String, String>,
    /// Shape depends on the entity kind processed.
    #[serde(default)]
    pub outputs: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_ended_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_type: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            job_id: String::new(),
            job_type: job_type.into(),
            job_subtype: None,
            user_id: user_id.into(),
            status: JobStatus::Queued,
            total_count: 0,
            current_count: 0,
            status_message: String::new(),
            errors_by_id: BTreeMap::new(),
            outputs: serde_json::Value::Null,
            created_at: None,
            last_updated_at: None,
            processing_started_at: None,
            processing_ended_at: None,
        }
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.job_subtype = Some(subtype.into());
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Done | JobStatus::Canceled | JobStatus::Error
        )
    }
}

/// Job store keeping records in memory, serializing writers behind one lock.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<BTreeMap<String, JobRecord>>,
    /// Every record as written, in write order.
    history: Mutex<Vec<JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes so far.
    pub fn write_count(&self) -> usize {
        self.history.lock().len()
    }

    pub fn history(&self) -> Vec<JobRecord> {
        self.history.lock().clone()
    }

    fn new_job_id(record: &JobRecord, now: DateTime<Utc>) -> String {
        let subtype = record
            .job_subtype
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| format!(".{s}"))
            .unwrap_or_default();
        format!(
            "{}{}.{}.{}",
            record.job_type,
            subtype,
            record.user_id,
            timestamp_suffix(now)
        )
    }
}

/// `yyyy.MM.dd.HH.mm.ss.ffff`, with the fraction in tenths of a millisecond.
fn timestamp_suffix(now: DateTime<Utc>) -> String {
    format!(
        "{}.{:04}",
        now.format("%Y.%m.%d.%H.%M.%S"),
        (now.timestamp_subsec_micros() / 100).min(9_999)
    )
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_or_update(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let now = Utc::now();
        let mut stored = record.clone();
        let mut records = self.records.lock();

        if stored.job_id.is_empty() || !records.contains_key(&stored.job_id) {
            if stored.job_id.is_empty() {
                stored.job_id = Self::new_job_id(&stored, now);
            }
            stored.created_at = Some(now);
            tracing::info!(
                job_id = %stored.job_id,
                job_type = %stored.job_type,
                user = %stored.user_id,
                "created job entry"
            );
        } else if let Some(existing) = records.get(&stored.job_id) {
            stored.created_at = existing.created_at;
        }
        stored.last_updated_at = Some(now);

        records.insert(stored.job_id.clone(), stored.clone());
        drop(records);
        self.history.lock().push(stored.clone());

        tracing::trace!(
            job_id = %stored.job_id,
            status = ?stored.status,
            current = stored.current_count,
            total = stored.total_count,
            "updated job entry"
        );
        Ok(stored)
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.lock().get(job_id).cloned())
    }
}
