//! Compiled lambdas and the function objects that wrap them at runtime.

use smallvec::SmallVec;

use crate::{bytecode::Code, heap::HeapId, intern::StringId, value::Value};

/// Index of a compiled lambda in the program's lambda table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct FunctionId(u32);

impl FunctionId {
    #[inline]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// The compiled body of a function: bytecode plus the slot layout the
/// generator fixed for it. Distinct from the Function object which wraps a
/// lambda at runtime and adds the captured environment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct Lambda {
    /// Function name for backtraces; `"main"` for top-level code,
    /// `"module"` for module bodies, `"anonymous"` when unnamed.
    pub name: StringId,
    pub code: Code,
    /// Declared parameter count; the ARGUMENTS region is sized to
    /// `param_count + 1` (slot 0 is `this`).
    pub param_count: u32,
    /// Locals plus temporaries: the size of the frame's slot slab.
    pub local_count: u32,
    /// Function-nesting depth. Top-level code is 0; the closure region for
    /// a variable declared at depth d is addressed as CLOSURE+d.
    pub nesting: u8,
    /// Arrow functions take `this` from the frame that created them.
    pub is_arrow: bool,
    /// Local slot to fill with the `arguments` array, when the body uses it.
    pub arguments_slot: Option<u32>,
}

/// A function value: compiled lambda plus captured environment.
#[derive(Debug, Clone)]
pub(crate) struct JsFunction {
    pub lambda: FunctionId,
    /// Slot slabs of enclosing activations, indexed by nesting depth - 1.
    /// Copied into each frame at call time so closure operands resolve with
    /// one indexed load.
    pub closures: SmallVec<[HeapId; 4]>,
    /// For arrow functions: the `this` captured at creation.
    pub bound_this: Option<Value>,
}
