//! Per-external-id FIFO admission queue.
//!
//! At most one non-terminal run per external item. A second request with a
//! byte-equal spec is rejected as a duplicate; anything else waits in FIFO
//! order. A run waiting on human validation keeps its slot. All `mark_*`
//! transitions require the owning queue id, so only the slot holder can
//! release or suspend it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::TaskRequest;

/// Outcome of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Slot acquired; the caller may start the run.
    Admitted,
    /// An active run exists; the request waits at this queue position.
    Queued { position: usize },
    /// Byte-equal to the active run's spec; dropped.
    RejectedDuplicate,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No active run for external id {0}")]
    NoActiveRun(i64),

    #[error("Queue id mismatch for external id {external_id}: slot is owned by another run")]
    NotOwner { external_id: i64 },

    #[error("Queue lock poisoned")]
    LockPoisoned,
}

/// A request parked behind an active run.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub queue_id: String,
    pub request: TaskRequest,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ActiveSlot {
    queue_id: String,
    spec_hash: [u8; 32],
    waiting_validation: bool,
    acquired_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ItemQueue {
    active: Option<ActiveSlot>,
    waiting: VecDeque<QueuedRequest>,
}

/// Queue manager shared between webhook ingress, engine and the
/// notification coordinator. Accesses are serialized per map under one lock;
/// operations are short and never await while holding it.
#[derive(Default)]
pub struct QueueManager {
    queues: Mutex<HashMap<i64, ItemQueue>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the slot for an external id.
    pub fn admit(
        &self,
        external_id: i64,
        queue_id: &str,
        request: &TaskRequest,
    ) -> Result<Admission, QueueError> {
        let spec_hash = *blake3::hash(&request.spec_bytes()).as_bytes();
        let mut queues = self.queues.lock().map_err(|_| QueueError::LockPoisoned)?;
        let slot = queues.entry(external_id).or_default();

        match &slot.active {
            None => {
                slot.active = Some(ActiveSlot {
                    queue_id: queue_id.to_string(),
                    spec_hash,
                    waiting_validation: false,
                    acquired_at: Utc::now(),
                });
                info!(external_id, queue_id, "Run admitted");
                Ok(Admission::Admitted)
            }
            Some(active) if active.spec_hash == spec_hash => {
                warn!(external_id, "Duplicate request rejected");
                Ok(Admission::RejectedDuplicate)
            }
            Some(_) => {
                slot.waiting.push_back(QueuedRequest {
                    queue_id: queue_id.to_string(),
                    request: request.clone(),
                    enqueued_at: Utc::now(),
                });
                let position = slot.waiting.len();
                debug!(external_id, position, "Request queued behind active run");
                Ok(Admission::Queued { position })
            }
        }
    }

    /// Suspend the active run while a human decision is pending. The slot
    /// stays held.
    pub fn mark_waiting_validation(
        &self,
        external_id: i64,
        queue_id: &str,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().map_err(|_| QueueError::LockPoisoned)?;
        let slot = queues
            .get_mut(&external_id)
            .ok_or(QueueError::NoActiveRun(external_id))?;
        let active = slot
            .active
            .as_mut()
            .ok_or(QueueError::NoActiveRun(external_id))?;
        if active.queue_id != queue_id {
            return Err(QueueError::NotOwner { external_id });
        }
        active.waiting_validation = true;
        info!(external_id, "Run suspended awaiting validation");
        Ok(())
    }

    /// Release the slot and pop the next queued request, if any.
    pub fn mark_completed(
        &self,
        external_id: i64,
        queue_id: &str,
    ) -> Result<Option<QueuedRequest>, QueueError> {
        self.release(external_id, queue_id, None)
    }

    /// Same as `mark_completed`, carrying error context for the audit log.
    pub fn mark_failed(
        &self,
        external_id: i64,
        queue_id: &str,
        error: &str,
    ) -> Result<Option<QueuedRequest>, QueueError> {
        self.release(external_id, queue_id, Some(error))
    }

    fn release(
        &self,
        external_id: i64,
        queue_id: &str,
        error: Option<&str>,
    ) -> Result<Option<QueuedRequest>, QueueError> {
        let mut queues = self.queues.lock().map_err(|_| QueueError::LockPoisoned)?;
        let slot = queues
            .get_mut(&external_id)
            .ok_or(QueueError::NoActiveRun(external_id))?;
        let active = slot
            .active
            .as_ref()
            .ok_or(QueueError::NoActiveRun(external_id))?;
        if active.queue_id != queue_id {
            return Err(QueueError::NotOwner { external_id });
        }

        let held_for = Utc::now() - active.acquired_at;
        match error {
            Some(err) => warn!(external_id, error = err, "Run released with failure"),
            None => info!(external_id, held_secs = held_for.num_seconds(), "Run released"),
        }

        slot.active = None;
        let next = slot.waiting.pop_front();
        if next.is_none() {
            queues.remove(&external_id);
        }
        Ok(next)
    }

    /// Whether an active run exists for this external id.
    pub fn has_active(&self, external_id: i64) -> bool {
        self.queues
            .lock()
            .map(|q| q.get(&external_id).is_some_and(|s| s.active.is_some()))
            .unwrap_or(false)
    }

    /// Whether the active run (if any) is parked on a validation.
    pub fn is_waiting_validation(&self, external_id: i64) -> bool {
        self.queues
            .lock()
            .map(|q| {
                q.get(&external_id)
                    .and_then(|s| s.active.as_ref())
                    .is_some_and(|a| a.waiting_validation)
            })
            .unwrap_or(false)
    }

    pub fn queued_len(&self, external_id: i64) -> usize {
        self.queues
            .lock()
            .map(|q| q.get(&external_id).map_or(0, |s| s.waiting.len()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task_id: &str, title: &str) -> TaskRequest {
        TaskRequest::new(task_id, title)
    }

    #[test]
    fn test_admit_then_duplicate_rejected() {
        let queue = QueueManager::new();
        let req = request("100", "Add file");

        assert_eq!(queue.admit(100, "q-1", &req).unwrap(), Admission::Admitted);
        assert_eq!(
            queue.admit(100, "q-2", &req).unwrap(),
            Admission::RejectedDuplicate
        );
    }

    #[test]
    fn test_different_content_queues_fifo() {
        let queue = QueueManager::new();
        assert_eq!(
            queue.admit(100, "q-1", &request("100", "first")).unwrap(),
            Admission::Admitted
        );
        assert_eq!(
            queue.admit(100, "q-2", &request("100", "second")).unwrap(),
            Admission::Queued { position: 1 }
        );
        assert_eq!(
            queue.admit(100, "q-3", &request("100", "third")).unwrap(),
            Admission::Queued { position: 2 }
        );

        let next = queue.mark_completed(100, "q-1").unwrap().unwrap();
        assert_eq!(next.queue_id, "q-2");
        assert_eq!(next.request.title, "second");
        assert_eq!(queue.queued_len(100), 1);
    }

    #[test]
    fn test_independent_external_ids() {
        let queue = QueueManager::new();
        assert_eq!(
            queue.admit(1, "q-1", &request("1", "a")).unwrap(),
            Admission::Admitted
        );
        assert_eq!(
            queue.admit(2, "q-2", &request("2", "b")).unwrap(),
            Admission::Admitted
        );
    }

    #[test]
    fn test_only_owner_may_release() {
        let queue = QueueManager::new();
        queue.admit(5, "owner", &request("5", "t")).unwrap();

        let err = queue.mark_completed(5, "intruder").unwrap_err();
        assert!(matches!(err, QueueError::NotOwner { external_id: 5 }));

        // Owner still holds the slot
        assert!(queue.has_active(5));
        queue.mark_completed(5, "owner").unwrap();
        assert!(!queue.has_active(5));
    }

    #[test]
    fn test_waiting_validation_keeps_slot() {
        let queue = QueueManager::new();
        queue.admit(7, "q-1", &request("7", "t")).unwrap();
        queue.mark_waiting_validation(7, "q-1").unwrap();

        assert!(queue.has_active(7));
        assert!(queue.is_waiting_validation(7));

        // New, different work still queues behind the suspended run
        assert_eq!(
            queue.admit(7, "q-2", &request("7", "other")).unwrap(),
            Admission::Queued { position: 1 }
        );
    }

    #[test]
    fn test_mark_failed_releases_and_pops() {
        let queue = QueueManager::new();
        queue.admit(9, "q-1", &request("9", "a")).unwrap();
        queue.admit(9, "q-2", &request("9", "b")).unwrap();

        let next = queue.mark_failed(9, "q-1", "clone failed").unwrap();
        assert_eq!(next.unwrap().queue_id, "q-2");
    }

    #[test]
    fn test_release_without_active_errors() {
        let queue = QueueManager::new();
        assert!(matches!(
            queue.mark_completed(11, "q-1").unwrap_err(),
            QueueError::NoActiveRun(11)
        ));
    }
}
