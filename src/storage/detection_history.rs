use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use serde::Serialize;

use crate::frame::unix_millis;

/// One model's top-class result for one frame. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub category: String,
    pub label: String,
    pub confidence: f32,
    pub observed_at: SystemTime,
}

impl DetectionEvent {
    pub fn new(category: String, label: String, confidence: f32, observed_at: SystemTime) -> Self {
        Self {
            category,
            label,
            confidence: if confidence.is_nan() {
                0.0
            } else {
                confidence.clamp(0.0, 1.0)
            },
            observed_at,
        }
    }
}

/// Wire form of a history entry.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRecord {
    pub category: String,
    pub label: String,
    pub confidence: f32,
    pub observed_at_ms: u64,
}

impl From<&DetectionEvent> for DetectionRecord {
    fn from(e: &DetectionEvent) -> Self {
        Self {
            category: e.category.clone(),
            label: e.label.clone(),
            confidence: e.confidence,
            observed_at_ms: unix_millis(e.observed_at),
        }
    }
}

/// Fixed-capacity ring of the most recent detection events.
///
/// Cloning yields another handle to the same buffer. The producer appends,
/// any number of HTTP handlers take snapshots. Both hold the lock only for
/// the length of a push or a copy of at most `capacity` events.
pub struct DetectionHistory {
    events: Arc<RwLock<VecDeque<DetectionEvent>>>,
    capacity: usize,
}

impl DetectionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn append(&self, event: DetectionEvent) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            if let Some(evicted) = events.pop_front() {
                tracing::trace!(
                    category = %evicted.category,
                    label = %evicted.label,
                    "evicted detection event"
                );
            }
        }
        events.push_back(event);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<DetectionEvent> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        events.iter().cloned().collect()
    }

    pub fn records(&self) -> Vec<DetectionRecord> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        events.iter().map(DetectionRecord::from).collect()
    }

    pub fn size(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Clone for DetectionHistory {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            capacity: self.capacity,
        }
    }
}
