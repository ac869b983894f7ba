//! Dead-letter store: snapshots of terminally-failed jobs.
//!
//! A job that fails terminally is snapshotted here exactly once, payload
//! and last error included, for manual inspection. Reprocessing creates a
//! brand-new job pointing back at the snapshot; the original record is a
//! permanent audit trail and is never resurrected in place.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::EngineError;
use crate::types::{DeadLetterRecord, Job, JobId};

#[derive(Default)]
struct DlqState {
    /// Insertion order, oldest first.
    order: VecDeque<Uuid>,
    records: HashMap<Uuid, DeadLetterRecord>,
    /// Guards the one-snapshot-per-job invariant.
    by_job: HashMap<JobId, Uuid>,
}

pub struct DeadLetterStore {
    state: RwLock<DlqState>,
}

impl Default for DeadLetterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadLetterStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DlqState::default()),
        }
    }

    /// Snapshot a terminally-failed job. Idempotent per job id: a second
    /// call for the same job returns the existing record.
    pub async fn record(&self, job: &Job) -> DeadLetterRecord {
        let mut state = self.state.write().await;
        if let Some(existing) = state.by_job.get(&job.id) {
            if let Some(record) = state.records.get(existing) {
                return record.clone();
            }
        }
        let record = DeadLetterRecord::from_job(job);
        state.order.push_back(record.id);
        state.by_job.insert(job.id, record.id);
        state.records.insert(record.id, record.clone());
        record
    }

    pub async fn get(&self, id: Uuid) -> Result<DeadLetterRecord, EngineError> {
        let state = self.state.read().await;
        state
            .records
            .get(&id)
            .cloned()
            .ok_or(EngineError::DeadLetterNotFound(id))
    }

    /// Most recent first.
    pub async fn list(&self, limit: usize, offset: usize) -> (Vec<DeadLetterRecord>, usize) {
        let state = self.state.read().await;
        let total = state.records.len();
        let items = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.records.get(id))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (items, total)
    }

    /// Link a snapshot to the replacement job created by reprocessing.
    /// Each snapshot can be reprocessed once.
    pub async fn mark_reprocessed(
        &self,
        id: Uuid,
        new_job_id: JobId,
    ) -> Result<DeadLetterRecord, EngineError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&id)
            .ok_or(EngineError::DeadLetterNotFound(id))?;
        if let Some(existing) = record.reprocessed_as {
            return Err(EngineError::AlreadyReprocessed(id, existing));
        }
        record.reprocessed_as = Some(new_job_id);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorClass, JobError, JobType};
    use serde_json::json;

    fn failed_job() -> Job {
        let mut job = Job::new(
            JobType::Convert,
            json!({"documentId": "doc-1"}),
            "user-1",
            3,
        );
        job.attempts = 3;
        job.error = Some(JobError::new(
            "transient_storage",
            "storage kept timing out",
            ErrorClass::Transient,
        ));
        job
    }

    #[tokio::test]
    async fn exactly_one_record_per_job() {
        let dlq = DeadLetterStore::new();
        let job = failed_job();

        let first = dlq.record(&job).await;
        let second = dlq.record(&job).await;
        assert_eq!(first.id, second.id);

        let (items, total) = dlq.list(10, 0).await;
        assert_eq!(total, 1);
        assert_eq!(items[0].job_id, job.id);
        assert_eq!(items[0].attempts, 3);
    }

    #[tokio::test]
    async fn reprocess_links_once() {
        let dlq = DeadLetterStore::new();
        let record = dlq.record(&failed_job()).await;
        let replacement = Uuid::new_v4();

        let updated = dlq.mark_reprocessed(record.id, replacement).await.unwrap();
        assert_eq!(updated.reprocessed_as, Some(replacement));

        let err = dlq
            .mark_reprocessed(record.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyReprocessed(_, prev) if prev == replacement));
    }

    #[tokio::test]
    async fn get_unknown_record_is_not_found() {
        let dlq = DeadLetterStore::new();
        assert!(matches!(
            dlq.get(Uuid::new_v4()).await,
            Err(EngineError::DeadLetterNotFound(_))
        ));
    }
}
