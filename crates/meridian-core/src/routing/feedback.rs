//! Bounded FIFO of pending outcome feedback

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

use super::types::FeedbackRecord;

/// Default number of records held before the oldest is dropped
pub const DEFAULT_FEEDBACK_CAPACITY: usize = 500;

/// Multi-producer feedback buffer that drops the oldest record when full
#[derive(Debug)]
pub struct FeedbackQueue {
    records: Mutex<VecDeque<FeedbackRecord>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Default for FeedbackQueue {
    fn default() -> Self {
        Self::new(DEFAULT_FEEDBACK_CAPACITY)
    }
}

impl FeedbackQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FeedbackRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a record; returns true when the oldest record was evicted
    pub fn push(&self, record: FeedbackRecord) -> bool {
        let mut records = self.lock();
        let evicted = if records.len() >= self.capacity {
            if let Some(oldest) = records.pop_front() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    agent = %oldest.agent_id,
                    record_id = %oldest.id,
                    capacity = self.capacity,
                    "Feedback queue full, dropped oldest record"
                );
            }
            true
        } else {
            false
        };
        records.push_back(record);
        evicted
    }

    /// Remove up to `max` records, oldest first
    pub fn drain(&self, max: usize) -> Vec<FeedbackRecord> {
        let mut records = self.lock();
        let n = max.min(records.len());
        records.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records evicted since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
