//! Hand-over of gate-operation snapshots between the two listener hops.

use std::collections::{HashMap, HashSet, VecDeque};

use codeco::{ContainerSnapshot, GateOperation, OperationId};
use parking_lot::Mutex;

/// Number of processed operation ids remembered for duplicate detection.
pub const DEFAULT_SEEN_CAPACITY: usize = 1024;

/// A completed operation waiting to be transmitted.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    /// The operation.
    pub operation: GateOperation,
    /// Its containers.
    pub containers: Vec<ContainerSnapshot>,
}

#[derive(Debug, Default)]
struct State {
    pending: HashMap<OperationId, PendingOperation>,
    seen: HashSet<OperationId>,
    seen_order: VecDeque<OperationId>,
}

/// Snapshots of completed operations, keyed by operation id.
///
/// Also remembers the most recent operation ids so a completion event
/// delivered twice starts only one transmission.
#[derive(Debug)]
pub struct OperationSnapshots {
    state: Mutex<State>,
    seen_capacity: usize,
}

impl Default for OperationSnapshots {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SEEN_CAPACITY)
    }
}

impl OperationSnapshots {
    /// Creates a cache remembering `seen_capacity` operation ids.
    pub fn with_capacity(seen_capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            seen_capacity: seen_capacity.max(1),
        }
    }

    /// Stores `pending` unless its operation was seen before.
    ///
    /// Returns `false` for a duplicate.
    pub fn admit(&self, pending: PendingOperation) -> bool {
        let id = pending.operation.id.clone();
        let mut state = self.state.lock();
        if !state.seen.insert(id.clone()) {
            return false;
        }
        state.seen_order.push_back(id.clone());
        while state.seen_order.len() > self.seen_capacity {
            if let Some(oldest) = state.seen_order.pop_front() {
                state.seen.remove(&oldest);
            }
        }
        state.pending.insert(id, pending);
        true
    }

    /// Removes and returns the snapshot for `id`.
    pub fn take(&self, id: &OperationId) -> Option<PendingOperation> {
        self.state.lock().pending.remove(id)
    }
}
