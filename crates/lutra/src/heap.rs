//! The per-VM heap arena.
//!
//! Every allocation a program makes — objects, computed strings, frame slot
//! slabs — comes out of one `Heap` owned by its VM and is reclaimed en masse
//! when the VM is dropped. There is no per-value reference counting and no
//! collector; a cloned VM deep-copies the arena, which is what gives clones
//! their isolation.
//!
//! An optional byte limit turns allocation into a fallible operation. The
//! budget is committed only when an allocation succeeds, so a caught
//! MemoryError leaves the accounting matching what actually lives in the
//! arena and smaller allocations can still go through.
//!
//! The MemoryError singleton does not live in the arena at all: it occupies
//! immortal storage in a dedicated field, addressed by the reserved
//! [`HeapId::MEMORY_ERROR`] id, so reporting an out-of-memory condition
//! never re-enters the allocator and never counts against the budget it
//! reports breaching.

use crate::{
    error::{JsError, JsErrorKind, RunResult},
    types::object::{JsObject, ObjectKind},
    value::Value,
};

/// Index of an allocation in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) struct HeapId(u32);

impl HeapId {
    /// Reserved id of the immortal MemoryError singleton.
    pub const MEMORY_ERROR: Self = Self(u32::MAX);

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Payload of one heap slot.
#[derive(Debug, Clone)]
pub(crate) enum HeapData {
    /// A string built at runtime (concatenation, `String(...)`, decoded JSON).
    Str(String),
    /// A value-slot slab: the locals of one function activation, or the
    /// global scope's variables. Closures keep slabs alive past the call that
    /// created them.
    Slab(Vec<Value>),
    Object(JsObject),
}

impl HeapData {
    fn estimate_bytes(&self) -> usize {
        const BASE: usize = 48;
        match self {
            Self::Str(s) => BASE + s.len(),
            Self::Slab(slots) => BASE + slots.len() * std::mem::size_of::<Value>(),
            Self::Object(obj) => BASE + obj.estimate_bytes(),
        }
    }
}

/// The arena. Allocations only grow it; dropping the VM frees everything.
#[derive(Debug, Clone)]
pub(crate) struct Heap {
    slots: Vec<HeapData>,
    bytes: usize,
    limit: Option<usize>,
    /// Immortal storage for the MemoryError singleton: owned by the VM's
    /// heap struct, outside `slots` and outside the byte budget.
    memory_error: HeapData,
}

impl Heap {
    pub fn new(limit: Option<usize>) -> Self {
        let mut singleton = JsObject::new(ObjectKind::Error(JsErrorKind::MemoryError), None);
        singleton.extensible = false;
        Self {
            slots: Vec::with_capacity(64),
            bytes: 0,
            limit,
            memory_error: HeapData::Object(singleton),
        }
    }

    /// Allocates, returning MemoryError when the configured limit would be
    /// exceeded. The budget is only charged on success.
    pub fn alloc(&mut self, data: HeapData) -> RunResult<HeapId> {
        let prospective = self.bytes + data.estimate_bytes();
        if let Some(limit) = self.limit {
            if prospective > limit {
                return Err(JsError::memory().into());
            }
        }
        let id = u32::try_from(self.slots.len()).expect("heap exceeds u32 slots");
        self.bytes = prospective;
        self.slots.push(data);
        Ok(HeapId(id))
    }

    /// Allocates a runtime string.
    pub fn alloc_str(&mut self, s: impl Into<String>) -> RunResult<HeapId> {
        self.alloc(HeapData::Str(s.into()))
    }

    /// Allocates a slot slab with every slot `undefined`.
    pub fn alloc_slab(&mut self, len: usize) -> RunResult<HeapId> {
        self.alloc(HeapData::Slab(vec![Value::Undefined; len]))
    }

    pub fn alloc_object(&mut self, obj: JsObject) -> RunResult<HeapId> {
        self.alloc(HeapData::Object(obj))
    }

    #[inline]
    pub fn get(&self, id: HeapId) -> &HeapData {
        if id == HeapId::MEMORY_ERROR {
            return &self.memory_error;
        }
        &self.slots[id.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        if id == HeapId::MEMORY_ERROR {
            return &mut self.memory_error;
        }
        &mut self.slots[id.0 as usize]
    }

    /// The string at `id`.
    ///
    /// # Panics
    /// Panics if the slot is not a string; ids are engine-generated, so a
    /// mismatch is a compiler or VM bug.
    #[inline]
    pub fn str(&self, id: HeapId) -> &str {
        match self.get(id) {
            HeapData::Str(s) => s,
            other => panic!("expected heap string, found {other:?}"),
        }
    }

    #[inline]
    pub fn slab(&self, id: HeapId) -> &[Value] {
        match self.get(id) {
            HeapData::Slab(slots) => slots,
            other => panic!("expected heap slab, found {other:?}"),
        }
    }

    #[inline]
    pub fn slab_mut(&mut self, id: HeapId) -> &mut Vec<Value> {
        match self.get_mut(id) {
            HeapData::Slab(slots) => slots,
            other => panic!("expected heap slab, found {other:?}"),
        }
    }

    #[inline]
    pub fn object(&self, id: HeapId) -> &JsObject {
        match self.get(id) {
            HeapData::Object(obj) => obj,
            other => panic!("expected heap object, found {other:?}"),
        }
    }

    #[inline]
    pub fn object_mut(&mut self, id: HeapId) -> &mut JsObject {
        match self.get_mut(id) {
            HeapData::Object(obj) => obj,
            other => panic!("expected heap object, found {other:?}"),
        }
    }

    /// Returns the object at `id` if the slot holds one.
    #[inline]
    pub fn try_object(&self, id: HeapId) -> Option<&JsObject> {
        match self.get(id) {
            HeapData::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Estimated live bytes, used by tests and the CLI's quiet diagnostics.
    pub fn estimated_bytes(&self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_read_back() {
        let mut heap = Heap::new(None);
        let s = heap.alloc_str("hi").unwrap();
        let slab = heap.alloc_slab(3).unwrap();
        assert_eq!(heap.str(s), "hi");
        assert_eq!(heap.slab(slab).len(), 3);
        assert!(matches!(heap.slab(slab)[0], Value::Undefined));
    }

    #[test]
    fn limit_reports_memory_error() {
        let mut heap = Heap::new(Some(256));
        let before = heap.estimated_bytes();
        assert!(heap.alloc_str("x".repeat(1024)).is_err());
        // A failed allocation charges nothing, so the accounting still
        // matches the arena and smaller allocations go through.
        assert_eq!(heap.estimated_bytes(), before);
        assert!(heap.alloc_str("x".repeat(1024)).is_err());
        assert_eq!(heap.estimated_bytes(), before);
        assert!(heap.alloc_str("small").is_ok());
        assert!(heap.estimated_bytes() > before);
    }

    #[test]
    fn memory_error_singleton_lives_outside_the_arena() {
        let mut heap = Heap::new(Some(64));
        let singleton = heap.object(HeapId::MEMORY_ERROR);
        assert!(!singleton.extensible);
        assert!(matches!(singleton.kind, ObjectKind::Error(JsErrorKind::MemoryError)));
        // The singleton neither consumes budget nor needs the allocator.
        assert_eq!(heap.estimated_bytes(), 0);
        assert!(heap.alloc_str("x".repeat(1024)).is_err());
        assert!(heap.try_object(HeapId::MEMORY_ERROR).is_some());
    }
}
