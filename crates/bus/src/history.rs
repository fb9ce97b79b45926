//! Bounded FIFO record of published events.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::BusEvent;

/// One published event as retained in the bus history.
#[derive(Debug, Clone)]
pub struct EventRecord<E: BusEvent> {
    /// Routing key the event was published under.
    pub kind: E::Kind,
    /// The event payload.
    pub event: E,
    /// When `publish` (or `publish_fire_and_forget`) was called.
    pub published_at: DateTime<Utc>,
}

pub(crate) struct History<E: BusEvent> {
    capacity: usize,
    records: VecDeque<EventRecord<E>>,
}

impl<E: BusEvent> History<E> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub(crate) fn push(&mut self, record: EventRecord<E>) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub(crate) fn snapshot(&self) -> Vec<EventRecord<E>> {
        self.records.iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
