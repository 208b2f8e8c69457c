//! Job lifecycle around a bulk operation.

use crate::cancel::CancelSignal;
use crate::config::BulkConfig;
use crate::error::BulkError;
use crate::models::{DeleteModels, ImportModels, ModelOrchestrator};
use crate::progress::ProgressTracker;
use crate::twins::{DeleteTwins, ImportTwins, TwinOrchestrator};
use crate::Collaborators;
use chrono::Utc;
use graphbulk_store::{JobRecord, JobStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A unit of bulk work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BulkRequest {
    ImportModels(ImportModels),
    DeleteModels(DeleteModels),
    ImportTwins(ImportTwins),
    DeleteTwins(DeleteTwins),
}

impl BulkRequest {
    /// Job type recorded on the job record.
    pub fn job_type(&self) -> &'static str {
        match self {
            Self::ImportModels(_) => "ImportModels",
            Self::DeleteModels(_) => "DeleteModels",
            Self::ImportTwins(_) => "ImportTwins",
            Self::DeleteTwins(_) => "DeleteTwins",
        }
    }

    /// Job record for this request, queued under `user_id`.
    pub fn new_job(&self, user_id: &str) -> JobRecord {
        let record = JobRecord::new(self.job_type(), user_id);
        match self {
            Self::ImportModels(r) if r.full_overlay => record.with_subtype("FullOverlay"),
            Self::ImportTwins(r) if r.replace_relationships => {
                record.with_subtype("ReplaceRelationships")
            }
            Self::DeleteModels(r) if r.delete_all => record.with_subtype("All"),
            Self::DeleteTwins(r) if r.delete_all => record.with_subtype("All"),
            _ => record,
        }
    }
}

pub const STATUS_DONE: &str = "Done";
pub const STATUS_CANCELLED: &str = "Operation cancelled by User";
pub const STATUS_FAILED: &str = "Operation resulted in error";

/// Runs bulk requests as tracked jobs.
pub struct JobRunner {
    ctx: Collaborators,
    config: BulkConfig,
    models: ModelOrchestrator,
    twins: TwinOrchestrator,
}

impl JobRunner {
    pub fn new(ctx: Collaborators, config: BulkConfig) -> Self {
        Self {
            models: ModelOrchestrator::new(ctx.clone()),
            twins: TwinOrchestrator::new(ctx.clone(), config.clone()),
            ctx,
            config,
        }
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Run `request` under `record` to completion and return the final
    /// record.
    ///
    /// Operation failures end up on the record as status `Error`; only a
    /// failure to write the record itself is returned as an error.
    pub async fn run(
        &self,
        mut record: JobRecord,
        request: BulkRequest,
        cancel: CancelSignal,
    ) -> Result<JobRecord, BulkError> {
        record.status = JobStatus::Processing;
        record.processing_started_at = Some(Utc::now());
        let record = self.ctx.jobs.create_or_update(&record).await?;
        let job_id = record.job_id.clone();
        tracing::info!(job_id = %job_id, job_type = %record.job_type, "job started");

        let tracker = Arc::new(ProgressTracker::new(
            record,
            Arc::clone(&self.ctx.jobs),
            self.config.checkpoint_interval(),
        ));
        let timeout = self.config.job_timeout().map(|d| cancel.cancel_after(d));

        let outcome = match request {
            BulkRequest::ImportModels(r) => self.models.import(&tracker, r, &cancel).await.map(drop),
            BulkRequest::DeleteModels(r) => self.models.delete(&tracker, r, &cancel).await.map(drop),
            BulkRequest::ImportTwins(r) => self.twins.import(&tracker, r, &cancel).await.map(drop),
            BulkRequest::DeleteTwins(r) => self.twins.delete(&tracker, r, &cancel).await.map(drop),
        };
        if let Some(handle) = timeout {
            handle.abort();
        }

        let mut record = tracker.snapshot().await;
        match outcome {
            Ok(()) => {
                record.status = JobStatus::Done;
                append_status(&mut record, STATUS_DONE);
                tracing::info!(job_id = %job_id, current = record.current_count, errors = record.errors_by_id.len(), "job done");
            }
            Err(BulkError::Cancelled) => {
                record.status = JobStatus::Canceled;
                append_status(&mut record, STATUS_CANCELLED);
                tracing::warn!(job_id = %job_id, "job cancelled");
            }
            Err(e) => {
                record.status = JobStatus::Error;
                append_status(&mut record, STATUS_FAILED);
                record.errors_by_id.insert("job".to_string(), e.to_string());
                tracing::error!(job_id = %job_id, error = %e, "job failed");
            }
        }
        record.processing_ended_at = Some(Utc::now());
        Ok(self.ctx.jobs.create_or_update(&record).await?)
    }

    /// Queue and run `request` for `user_id`.
    pub async fn submit(
        &self,
        user_id: &str,
        request: BulkRequest,
        cancel: CancelSignal,
    ) -> Result<JobRecord, BulkError> {
        let record = request.new_job(user_id);
        self.run(record, request, cancel).await
    }
}

fn append_status(record: &mut JobRecord, message: &str) {
    if !record.status_message.is_empty() && !record.status_message.ends_with(' ') {
        record.status_message.push(' ');
    }
    record.status_message.push_str(message);
}
