//! The event and microtask queues.
//!
//! Two FIFOs drive asynchrony: `microtasks` (promise reactions) and `posted`
//! (host-scheduled event callbacks). The drain rule, enforced by the run
//! loop, is that microtasks empty completely before each posted dispatch and
//! are re-checked after it. Timers are the host's job: `setTimeout` goes out
//! through the [`HostOps`] vtable and comes back in through `post_event`.

use std::collections::VecDeque;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{heap::HeapId, value::Value};

/// Handle of a registered VM event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub(crate) u32);

impl EventId {
    /// Raw id, usable as the numeric return of `setTimeout`.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Host-side timer operations.
///
/// The engine never sleeps: it asks the host to schedule and, when the host
/// fires, the host calls `Vm::post_event` with the id it was given.
pub trait HostOps {
    /// Schedules a timer; returns an opaque host handle for cancellation.
    fn set_timer(&mut self, delay_ms: u64, event: EventId) -> u64;
    /// Cancels a previously scheduled timer.
    fn clear_timer(&mut self, handle: u64);
}

/// The default host: timers are registered but never fire.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOps;

impl HostOps for NoopOps {
    fn set_timer(&mut self, _delay_ms: u64, _event: EventId) -> u64 {
        0
    }

    fn clear_timer(&mut self, _handle: u64) {}
}

/// A registered callback the host can post against.
#[derive(Debug, Clone)]
pub(crate) struct VmEvent {
    pub function: Value,
    /// Deleted after its first dispatch.
    pub once: bool,
    /// The host's timer handle, for cancellation.
    pub host_handle: u64,
}

/// One queued microtask.
#[derive(Debug, Clone)]
pub(crate) enum Microtask {
    /// Call a function with arguments.
    Call {
        func: Value,
        this: Value,
        args: SmallVec<[Value; 2]>,
    },
    /// Run a promise reaction and settle the derived promise.
    Reaction {
        derived: HeapId,
        handler: Option<Value>,
        value: Value,
        rejected: bool,
    },
}

/// A host-posted event waiting for dispatch.
#[derive(Debug, Clone)]
pub(crate) struct PostedEvent {
    pub event: EventId,
    pub args: Vec<Value>,
}

/// Event registry plus both queues. Owned by the VM; cleared on clone so a
/// per-request clone starts with an empty loop.
#[derive(Debug, Clone, Default)]
pub(crate) struct Events {
    registry: AHashMap<u32, VmEvent>,
    next_id: u32,
    pub microtasks: VecDeque<Microtask>,
    pub posted: VecDeque<PostedEvent>,
}

impl Events {
    /// Registers an event, returning its handle.
    pub fn add(&mut self, function: Value, once: bool) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        self.registry.insert(
            id,
            VmEvent {
                function,
                once,
                host_handle: 0,
            },
        );
        EventId(id)
    }

    pub fn set_host_handle(&mut self, event: EventId, handle: u64) {
        if let Some(entry) = self.registry.get_mut(&event.0) {
            entry.host_handle = handle;
        }
    }

    pub fn get(&self, event: EventId) -> Option<&VmEvent> {
        self.registry.get(&event.0)
    }

    /// Removes an event. Any queued posting is unlinked so a cancelled
    /// event never dispatches.
    pub fn delete(&mut self, event: EventId) -> Option<VmEvent> {
        self.posted.retain(|p| p.event != event);
        self.registry.remove(&event.0)
    }

    /// Enqueues a posted event if it is still registered.
    pub fn post(&mut self, event: EventId, args: Vec<Value>) -> bool {
        if !self.registry.contains_key(&event.0) {
            return false;
        }
        self.posted.push_back(PostedEvent { event, args });
        true
    }

    /// Any registered event or queued work at all.
    pub fn pending(&self) -> bool {
        !self.registry.is_empty() || self.posted_ready() || !self.microtasks.is_empty()
    }

    /// Registered events with nothing scheduled right now.
    pub fn waiting(&self) -> bool {
        !self.registry.is_empty() && !self.posted_ready() && self.microtasks.is_empty()
    }

    /// At least one event or microtask is ready to run.
    pub fn posted_ready(&self) -> bool {
        !self.posted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_event_lifecycle() {
        let mut events = Events::default();
        let id = events.add(Value::Undefined, true);
        assert!(events.pending());
        assert!(events.waiting());
        assert!(events.post(id, Vec::new()));
        assert!(events.posted_ready());
        events.delete(id);
        assert!(!events.posted_ready(), "cancellation unlinks queued postings");
        assert!(!events.pending());
    }

    #[test]
    fn post_unregistered_is_rejected() {
        let mut events = Events::default();
        let id = events.add(Value::Undefined, true);
        events.delete(id);
        assert!(!events.post(id, Vec::new()));
    }
}
