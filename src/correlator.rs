//! Request/response correlation
//!
//! Every command sent to the gateway carries a monotonically increasing
//! sequence. The correlator hands out those sequences and parks the caller
//! on a oneshot channel until the read loop resolves it with the matching
//! result frame, the deadline expires, or the connection goes away. The
//! oneshot guarantees each caller sees exactly one resolution.

use crate::errors::{HassError, HassResult};
use crate::types::Response;

use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

pub(crate) struct Correlator {
    // sequence required by the Websocket server, starts at 1
    last_sequence: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<HassResult<Response>>>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Correlator {
            last_sequence: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// next unused sequence, never reused within this session instance
    pub(crate) fn allocate(&self) -> u64 {
        self.last_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// park a caller until the matching result arrives
    pub(crate) fn register(&self, id: u64) -> oneshot::Receiver<HassResult<Response>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        rx
    }

    /// deliver the outcome to the registered caller, stale or duplicate
    /// results are dropped with a log line rather than treated as fatal
    pub(crate) fn resolve(&self, id: u64, outcome: HassResult<Response>) {
        match self.pending.lock().remove(&id) {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!("caller for sequence {} went away before resolution", id);
                }
            }
            None => debug!("dropping result for unknown sequence {}", id),
        }
    }

    /// deregister a pending caller on timeout or cancellation so the slot
    /// does not leak
    pub(crate) fn forget(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    /// fail every pending caller, invoked when leaving the connected state
    pub(crate) fn fail_all(&self, make_err: impl Fn() -> HassError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(make_err()));
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
