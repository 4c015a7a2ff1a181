use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::EventSink;
use crate::event::Event;

/// Keeps published events in memory.
///
/// Used by tests and for embedding the collector in another program. Can be
/// told to reject events of given metrics, or every n-th event.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
    rejected_metrics: HashSet<String>,
    reject_every: Option<usize>,
    attempts: AtomicUsize,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every event of `metric`.
    pub fn rejecting_metric(mut self, metric: impl Into<String>) -> Self {
        self.rejected_metrics.insert(metric.into());
        self
    }

    /// Rejects every `n`-th publish attempt (1-based).
    pub fn rejecting_every(mut self, n: usize) -> Self {
        self.reject_every = Some(n.max(1));
        self
    }

    /// Copy of the accepted events, in acceptance order.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.events.lock() {
            Ok(events) => events.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of publish calls, accepted or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: Event) -> bool {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if self.rejected_metrics.contains(event.metric()) {
            return false;
        }
        if self.reject_every.is_some_and(|n| attempt % n == 0) {
            return false;
        }

        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
