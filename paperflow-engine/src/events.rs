//! Append-only, TTL-retained event log with live fan-out.
//!
//! Every job-store mutation appends one event here. Subscribers (the SSE
//! relay in the server) replay the persisted snapshot and then follow the
//! live broadcast channel, so a consumer can always reconstruct the stream
//! within the retention window.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::types::{JobEvent, JobId};

/// Capacity of each per-job live channel. Slow subscribers that fall more
/// than this far behind miss events and must re-replay.
const BROADCAST_CAPACITY: usize = 64;

/// Fields of an event that the caller controls; id, seq and timestamp are
/// assigned at append time.
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub stage: Option<String>,
    pub progress: u8,
    pub message: Option<String>,
    pub attempt: u32,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Default)]
struct EventLogState {
    events: HashMap<JobId, Vec<JobEvent>>,
    next_seq: HashMap<JobId, u64>,
    senders: HashMap<JobId, broadcast::Sender<JobEvent>>,
}

/// In-memory event log with a 24h (configurable) retention window.
pub struct EventLog {
    state: RwLock<EventLogState>,
    retention: ChronoDuration,
}

impl EventLog {
    pub fn new(retention: std::time::Duration) -> Self {
        Self {
            state: RwLock::new(EventLogState::default()),
            retention: ChronoDuration::from_std(retention)
                .unwrap_or_else(|_| ChronoDuration::hours(24)),
        }
    }

    /// Append an event for `job_id`, assigning its sequence number and
    /// server timestamp, and fan it out to live subscribers.
    pub async fn append(&self, job_id: JobId, draft: EventDraft) -> JobEvent {
        let mut state = self.state.write().await;
        let seq = state.next_seq.entry(job_id).or_insert(0);
        let event = JobEvent {
            id: Uuid::new_v4(),
            job_id,
            seq: *seq,
            timestamp: Utc::now(),
            stage: draft.stage,
            progress: draft.progress,
            message: draft.message,
            attempt: draft.attempt,
            metadata: draft.metadata,
        };
        *seq += 1;
        state.events.entry(job_id).or_default().push(event.clone());
        if let Some(sender) = state.senders.get(&job_id) {
            // Nobody listening is fine.
            let _ = sender.send(event.clone());
        }
        event
    }

    /// All retained events for a job, in `seq` order.
    pub async fn replay(&self, job_id: JobId) -> Vec<JobEvent> {
        let state = self.state.read().await;
        state.events.get(&job_id).cloned().unwrap_or_default()
    }

    /// Snapshot plus live tail. The snapshot and the receiver are taken
    /// under the same lock, so no event is missed between them.
    pub async fn subscribe(
        &self,
        job_id: JobId,
    ) -> (Vec<JobEvent>, broadcast::Receiver<JobEvent>) {
        let mut state = self.state.write().await;
        let snapshot = state.events.get(&job_id).cloned().unwrap_or_default();
        let receiver = state
            .senders
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe();
        (snapshot, receiver)
    }

    /// Drop events older than the retention window. Jobs whose whole stream
    /// expired are removed entirely, along with idle senders.
    pub async fn prune_expired(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let mut state = self.state.write().await;
        let mut removed = 0;
        state.events.retain(|_, events| {
            let before = events.len();
            events.retain(|e| e.timestamp >= cutoff);
            removed += before - events.len();
            !events.is_empty()
        });
        let live_jobs: Vec<JobId> = state.events.keys().copied().collect();
        state
            .senders
            .retain(|job_id, sender| live_jobs.contains(job_id) && sender.receiver_count() > 0);
        removed
    }
}
