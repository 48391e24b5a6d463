//! Promise state and reaction records.
//!
//! Settling a promise never runs user code synchronously: it moves each
//! queued reaction onto the VM's microtask queue, which the event loop drains
//! before any host-posted event.

use crate::{heap::HeapId, value::Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// A `then` registration waiting for settlement.
#[derive(Debug, Clone)]
pub(crate) struct Reaction {
    pub on_fulfilled: Option<Value>,
    pub on_rejected: Option<Value>,
    /// The promise returned by `then`, settled from the handler's result.
    pub derived: HeapId,
}

#[derive(Debug, Clone)]
pub(crate) struct PromiseData {
    pub state: PromiseState,
    /// Fulfillment value or rejection reason once settled.
    pub value: Value,
    pub reactions: Vec<Reaction>,
}

impl PromiseData {
    pub fn pending() -> Self {
        Self {
            state: PromiseState::Pending,
            value: Value::Undefined,
            reactions: Vec::new(),
        }
    }
}
