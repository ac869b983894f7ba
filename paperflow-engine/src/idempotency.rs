//! Idempotency index: caller-supplied key + payload fingerprint -> job id.
//!
//! A retried client request with the same key and payload gets the original
//! job back instead of a duplicate enqueue. The same key with a different
//! payload is a caller bug and conflicts. Entries expire after 24h; expiry
//! never affects the referenced job's own lifecycle.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::types::{IdempotencyRecord, JobId};

/// Outcome of checking a key before enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The key is already bound; return the existing job.
    Existing(JobId),
    /// The key is free; the caller should create the job and `bind` it.
    New,
}

pub struct IdempotencyIndex {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
    ttl: ChronoDuration,
}

impl IdempotencyIndex {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24)),
        }
    }

    /// Hex SHA-256 over the canonical JSON bytes of the payload.
    pub fn fingerprint(payload: &serde_json::Value) -> String {
        let bytes = serde_json::to_vec(payload).unwrap_or_default();
        hex::encode(Sha256::digest(bytes))
    }

    /// Look up `key`. Expired entries are treated as absent.
    pub async fn reserve(
        &self,
        key: &str,
        fingerprint: &str,
    ) -> Result<Reservation, EngineError> {
        let cutoff = Utc::now() - self.ttl;
        let mut records = self.records.lock().await;
        match records.get(key) {
            Some(record) if record.created_at < cutoff => {
                records.remove(key);
                Ok(Reservation::New)
            }
            Some(record) if record.payload_fingerprint == fingerprint => {
                Ok(Reservation::Existing(record.job_id))
            }
            Some(_) => Err(EngineError::IdempotencyConflict {
                key: key.to_string(),
            }),
            None => Ok(Reservation::New),
        }
    }

    /// Bind a freshly created job to its key.
    pub async fn bind(&self, key: &str, fingerprint: &str, job_id: JobId) {
        let mut records = self.records.lock().await;
        records.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                payload_fingerprint: fingerprint.to_string(),
                job_id,
                created_at: Utc::now(),
            },
        );
    }

    /// Drop expired entries. Called from the retention sweeper.
    pub async fn prune_expired(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| r.created_at >= cutoff);
        before - records.len()
    }
}
