//! String interning for identifiers and literals.
//!
//! The lexer interns every identifier and string literal it sees and hands out
//! stable `StringId`s. Ids are what the parser, scope resolver, and bytecode
//! carry around; the actual bytes are needed only for property lookups, error
//! messages, and printing.
//!
//! StringIds are laid out as follows:
//! * 0 to count(StaticStrings) - names the engine itself needs at runtime
//! * everything above - strings interned per compilation

use ahash::AHashMap;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// Index into the string interner's storage.
///
/// Uses `u32` to save space. This limits a program to ~4 billion unique
/// strings, which is more than sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Creates a StringId from a raw index stored in bytecode operands.
    ///
    /// The caller is responsible for ensuring the index is valid.
    #[inline]
    #[must_use]
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// String values the engine needs at runtime regardless of what the program
/// interned. Their ids equal their discriminants, so lookups never touch the
/// hash map.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "camelCase")]
pub enum StaticStrings {
    #[strum(serialize = "")]
    Empty,
    #[strum(serialize = "main")]
    Main,
    #[strum(serialize = "module")]
    Module,
    #[strum(serialize = "anonymous")]
    Anonymous,
    Length,
    Prototype,
    Constructor,
    Name,
    Message,
    Stack,
    This,
    Arguments,
    #[strum(serialize = "__proto__")]
    DunderProto,
    Value,
    Get,
    Set,
    Index,
    Input,
    Groups,
    LastIndex,
    Source,
    Flags,
    Global,
    Undefined,
    Object,
    Boolean,
    Number,
    String,
    Symbol,
    Function,
    Default,
    #[strum(serialize = "MemoryError")]
    MemoryError,
    #[strum(serialize = "out of memory")]
    OutOfMemory,
}

impl StaticStrings {
    /// The StringId assigned to this static string by `Interns::new`.
    #[inline]
    #[must_use]
    pub fn id(self) -> StringId {
        StringId(self as u32)
    }

    /// The string contents.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Interner owning every unique string seen during compilation.
///
/// Serialized with the compiled program so a dumped engine can be reloaded
/// without the source text.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Interns {
    strings: Vec<String>,
    #[serde(skip)]
    map: AHashMap<String, u32>,
}

impl Interns {
    /// Creates an interner preloaded with the `StaticStrings` table.
    #[must_use]
    pub fn new() -> Self {
        let mut interns = Self {
            strings: Vec::with_capacity(64),
            map: AHashMap::with_capacity(64),
        };
        for s in StaticStrings::iter() {
            let id = interns.intern(s.as_str());
            debug_assert_eq!(id, s.id(), "static string table out of order");
        }
        interns
    }

    /// Interns a string, returning the id of the existing entry if present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.map.get(s) {
            return StringId(id);
        }
        let id = u32::try_from(self.strings.len()).expect("intern table exceeds u32 range");
        self.strings.push(s.to_owned());
        self.map.insert(s.to_owned(), id);
        StringId(id)
    }

    /// Returns the string for an id.
    ///
    /// # Panics
    /// Panics if the id was not produced by this interner.
    #[inline]
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.0 as usize]
    }

    /// Looks up an already-interned string without inserting.
    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.map.get(s).map(|&id| StringId(id))
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True when no strings are interned (never the case after `new`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Rebuilds the lookup map after deserialization.
    ///
    /// `serde(skip)` leaves the map empty on load; the string vector alone is
    /// enough to execute, but accumulative compilation needs the map back.
    pub fn rebuild_map(&mut self) {
        if self.map.len() == self.strings.len() {
            return;
        }
        self.map = self
            .strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), u32::try_from(i).expect("intern table exceeds u32 range")))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_strings_have_fixed_ids() {
        let interns = Interns::new();
        assert_eq!(interns.get(StaticStrings::Length.id()), "length");
        assert_eq!(interns.get(StaticStrings::DunderProto.id()), "__proto__");
        assert_eq!(interns.get(StaticStrings::Empty.id()), "");
    }

    #[test]
    fn intern_is_stable() {
        let mut interns = Interns::new();
        let a = interns.intern("foo");
        let b = interns.intern("bar");
        let c = interns.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interns.get(a), "foo");
    }

    #[test]
    fn rebuild_map_round_trips() {
        let mut interns = Interns::new();
        interns.intern("alpha");
        let bytes = postcard::to_allocvec(&interns).unwrap();
        let mut loaded: Interns = postcard::from_bytes(&bytes).unwrap();
        loaded.rebuild_map();
        assert_eq!(loaded.lookup("alpha"), interns.lookup("alpha"));
    }
}
