//! Event subscription registry
//!
//! Tracks active event subscriptions and routes incoming event envelopes to
//! every matching listener. Entries are keyed by a stable
//! [`SubscriptionHandle`]: the wire subscription id assigned by the gateway
//! is scoped to one websocket connection and changes when the session
//! reconnects, while the handle handed to the caller stays valid.

use crate::types::WSEvent;

use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) type EventCallback = Arc<dyn Fn(WSEvent) + Send + Sync>;

/// Opaque handle identifying one subscription, stable across reconnections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub(crate) u64);

/// Selects which event envelopes a subscription wants delivered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// only deliver events of this type, e.g. "state_changed"
    pub event_type: Option<String>,
    /// only deliver state changes of this entity, e.g. "light.kitchen"
    pub entity_id: Option<String>,
}

impl EventFilter {
    /// match every event on the bus
    pub fn any() -> Self {
        EventFilter::default()
    }

    pub fn for_event_type(event_type: impl Into<String>) -> Self {
        EventFilter {
            event_type: Some(event_type.into()),
            entity_id: None,
        }
    }

    pub fn for_entity(entity_id: impl Into<String>) -> Self {
        EventFilter {
            event_type: Some("state_changed".to_owned()),
            entity_id: Some(entity_id.into()),
        }
    }

    pub(crate) fn matches(&self, event: &WSEvent) -> bool {
        if let Some(event_type) = &self.event_type {
            if event.event.event_type != *event_type {
                return false;
            }
        }
        if let Some(entity_id) = &self.entity_id {
            if event.event.data.entity_id.as_deref() != Some(entity_id.as_str()) {
                return false;
            }
        }
        true
    }
}

struct Entry {
    wire_id: u64,
    filter: EventFilter,
    callback: EventCallback,
}

pub(crate) struct SubscriptionRegistry {
    next_handle: AtomicU64,
    entries: Mutex<HashMap<SubscriptionHandle, Entry>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        SubscriptionRegistry {
            next_handle: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn next_handle(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert(
        &self,
        handle: SubscriptionHandle,
        wire_id: u64,
        filter: EventFilter,
        callback: EventCallback,
    ) {
        self.entries.lock().insert(
            handle,
            Entry {
                wire_id,
                filter,
                callback,
            },
        );
    }

    /// removes the subscription and returns its wire id, None when the
    /// handle is unknown so a second remove is a no-op
    pub(crate) fn remove(&self, handle: SubscriptionHandle) -> Option<u64> {
        self.entries
            .lock()
            .remove(&handle)
            .map(|entry| entry.wire_id)
    }

    /// takes every active subscription out of the table for replay after a
    /// reconnection, the handles stay valid while new wire ids get assigned
    pub(crate) fn drain(&self) -> Vec<(SubscriptionHandle, EventFilter, EventCallback)> {
        self.entries
            .lock()
            .drain()
            .map(|(handle, entry)| (handle, entry.filter, entry.callback))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    /// deliver the event to every subscription whose wire id and filter
    /// match, a panicking callback never blocks delivery to the others
    pub(crate) fn dispatch(&self, event: WSEvent) {
        let matching: Vec<EventCallback> = {
            let entries = self.entries.lock();
            entries
                .values()
                .filter(|entry| entry.wire_id == event.id && entry.filter.matches(&event))
                .map(|entry| entry.callback.clone())
                .collect()
        };

        if matching.is_empty() {
            debug!("dropping event for subscription {}", event.id);
            return;
        }

        for callback in matching {
            let delivered = event.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(delivered))).is_err() {
                warn!("subscription callback panicked while handling an event");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
