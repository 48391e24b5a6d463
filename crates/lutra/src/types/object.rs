//! The object header and property tables.
//!
//! An object is a prototype link, an insertion-ordered own-property table,
//! a kind payload for specialized objects (arrays keep their elements in a
//! dense vector, functions carry their closure chain, and so on), and the
//! flags `extensible`, `shared`, and `fast_array`.
//!
//! `shared` marks the objects the engine installs once per session (the
//! built-in prototypes and constructors). The write path checks it: the
//! first mutation claims the session's private copy of the object — under
//! deep-copied arenas every clone already owns one, so the claim clears the
//! bit rather than duplicating storage — after which the object is ordinary
//! mutable state of that session alone.
//!
//! `fast_array` marks arrays whose elements all live in the dense vector. A
//! sparse write (an index far past the end) demotes the array: the flag
//! drops and out-of-range indices move to the own-property table, so a
//! stray `a[1000000] = x` never materializes a million holes.

use indexmap::IndexMap;

use crate::{error::JsErrorKind, heap::HeapId, types::function::JsFunction, value::Value};

use super::{promise::PromiseData, regexp::RegexpObject};

/// Own-property table: insertion-ordered, which is the iteration order
/// `Object.keys` and `for..in` expose.
pub(crate) type PropMap = IndexMap<String, Property, ahash::RandomState>;

/// What a property holds.
#[derive(Debug, Clone)]
pub(crate) enum PropValue {
    Data(Value),
    Accessor { getter: Option<Value>, setter: Option<Value> },
}

/// One own property: payload plus the standard attribute triple.
#[derive(Debug, Clone)]
pub(crate) struct Property {
    pub value: PropValue,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Property {
    /// Ordinary data property: writable, enumerable, configurable.
    pub fn data(value: Value) -> Self {
        Self {
            value: PropValue::Data(value),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-enumerable data property, the shape of built-in methods and of
    /// lazily attached `stack`.
    pub fn hidden(value: Value) -> Self {
        Self {
            value: PropValue::Data(value),
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    pub fn accessor(getter: Option<Value>, setter: Option<Value>) -> Self {
        Self {
            value: PropValue::Accessor { getter, setter },
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }
}

/// Closure payloads for native functions that need a bound target, which a
/// bare [`crate::builtins::Builtins`] value cannot carry.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BoundNative {
    /// The `resolve` argument handed to a Promise executor.
    PromiseResolve(HeapId),
    /// The `reject` argument handed to a Promise executor.
    PromiseReject(HeapId),
    /// A method of a host-backed external object: registry index of the
    /// prototype, descriptor index within it, and the wrapped host token.
    ExternalMethod { proto: u32, entry: u32, token: u64 },
}

/// Type-specific payload of an object.
#[derive(Debug, Clone)]
pub(crate) enum ObjectKind {
    Plain,
    /// Dense element storage; holes are `Value::Hole`.
    Array(Vec<Value>),
    Function(JsFunction),
    /// An Error instance; `name`/`message` live in the property table.
    Error(JsErrorKind),
    Regexp(RegexpObject),
    /// Milliseconds since the epoch.
    Date(f64),
    Promise(PromiseData),
    /// A callable native wrapper: built-in constructors like `Object` and
    /// `Error` are objects (they carry static properties) whose call goes
    /// through the builtin dispatch.
    Native(crate::builtins::Builtins),
    Bound(BoundNative),
    /// Host-backed object: registry index of its descriptor table plus the
    /// opaque host token it wraps.
    External { proto: u32, token: u64 },
    /// Snapshot iterator driving `for (k in obj)`.
    KeysIter { keys: Vec<String>, index: usize },
}

/// An object: header, kind payload, own properties.
#[derive(Debug, Clone)]
pub(crate) struct JsObject {
    pub proto: Option<HeapId>,
    pub kind: ObjectKind,
    pub props: PropMap,
    pub extensible: bool,
    /// Engine-installed and not yet written to; the first mutation through
    /// the write path claims the session's copy and clears this.
    pub shared: bool,
    /// All elements live in the dense vector; cleared when a sparse write
    /// demotes out-of-range indices into the property table.
    pub fast_array: bool,
}

impl JsObject {
    pub fn new(kind: ObjectKind, proto: Option<HeapId>) -> Self {
        Self {
            proto,
            kind,
            props: PropMap::default(),
            extensible: true,
            shared: false,
            fast_array: false,
        }
    }

    pub fn plain(proto: Option<HeapId>) -> Self {
        Self::new(ObjectKind::Plain, proto)
    }

    pub fn array(elements: Vec<Value>, proto: Option<HeapId>) -> Self {
        let mut obj = Self::new(ObjectKind::Array(elements), proto);
        obj.fast_array = true;
        obj
    }

    /// The dense elements of an array object.
    pub fn elements(&self) -> Option<&Vec<Value>> {
        match &self.kind {
            ObjectKind::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn elements_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.kind {
            ObjectKind::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::Function(_) | ObjectKind::Bound(_) | ObjectKind::Native(_)
        )
    }

    /// Looks up an own property, not walking the prototype chain.
    pub fn own(&self, name: &str) -> Option<&Property> {
        self.props.get(name)
    }

    /// Inserts or overwrites an own property.
    pub fn define(&mut self, name: impl Into<String>, prop: Property) {
        self.props.insert(name.into(), prop);
    }

    /// Rough size used by the heap's byte accounting.
    pub fn estimate_bytes(&self) -> usize {
        let kind = match &self.kind {
            ObjectKind::Array(elements) => elements.len() * std::mem::size_of::<Value>(),
            ObjectKind::KeysIter { keys, .. } => keys.iter().map(String::len).sum(),
            _ => 0,
        };
        kind + self.props.len() * 48
    }
}
