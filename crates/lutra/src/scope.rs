//! Lexical scopes, variable declarations, and the two-phase resolver.
//!
//! During parsing, every declaration is inserted into the scope tree (`var`
//! hoists to the nearest function or global scope on the way in) and every
//! identifier use is recorded as a pending reference. After parsing,
//! [`ScopeTree::resolve`] assigns slot offsets and links each reference to a
//! 32-bit [`SlotIndex`] — or to a global-object name lookup when nothing in
//! the chain declares it.
//!
//! A slot index packs a region and an offset. Regions: the global slab,
//! the call's arguments (slot 0 is `this`), the frame's locals, or the locals
//! slab of an enclosing function identified by its nesting depth. The VM
//! resolves any operand with one indexed load; nothing is searched at
//! runtime.

use indexmap::IndexMap;

use crate::{
    error::JsError,
    intern::{Interns, StaticStrings, StringId},
    types::FunctionId,
};

/// Maximum function nesting depth the parser accepts.
pub(crate) const MAX_FUNCTION_NESTING: u8 = 16;

/// Highest depth addressable by a closure region.
const MAX_CLOSURE_DEPTH: u8 = 15;

/// Where a slot lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    /// The global variables slab.
    Global,
    /// The current call's `this` + arguments.
    Arguments,
    /// The current frame's locals slab.
    Local,
    /// The locals slab of the enclosing function at this nesting depth.
    Closure(u8),
}

/// A 32-bit (region, offset) slot address: region tag in the low byte,
/// offset in the high 24 bits. Stable from generation through execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct SlotIndex(u32);

impl SlotIndex {
    const REGION_GLOBAL: u32 = 0;
    const REGION_ARGUMENTS: u32 = 1;
    const REGION_LOCAL: u32 = 2;
    const REGION_CLOSURE_BASE: u32 = 3;

    pub fn new(region: Region, offset: u32) -> Self {
        debug_assert!(offset < (1 << 24), "slot offset exceeds 24 bits");
        let tag = match region {
            Region::Global => Self::REGION_GLOBAL,
            Region::Arguments => Self::REGION_ARGUMENTS,
            Region::Local => Self::REGION_LOCAL,
            Region::Closure(depth) => {
                debug_assert!((1..=MAX_CLOSURE_DEPTH).contains(&depth));
                Self::REGION_CLOSURE_BASE + u32::from(depth)
            }
        };
        Self((offset << 8) | tag)
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn region(self) -> Region {
        match self.0 & 0xff {
            Self::REGION_GLOBAL => Region::Global,
            Self::REGION_ARGUMENTS => Region::Arguments,
            Self::REGION_LOCAL => Region::Local,
            tag => Region::Closure(u8::try_from(tag - Self::REGION_CLOSURE_BASE).expect("closure depth exceeds u8")),
        }
    }

    #[inline]
    pub fn offset(self) -> u32 {
        self.0 >> 8
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.region() {
            Region::Global => write!(f, "g{}", self.offset()),
            Region::Arguments => write!(f, "a{}", self.offset()),
            Region::Local => write!(f, "l{}", self.offset()),
            Region::Closure(depth) => write!(f, "c{depth}.{}", self.offset()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScopeId(u32);

impl ScopeId {
    pub const GLOBAL: Self = Self(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Global,
    Function,
    Block,
    /// Synthetic scope wrapping accumulative REPL chunks.
    Shim,
    Catch,
}

/// How a name was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclKind {
    Var,
    /// Parsed but bound like `var`; see DESIGN.md on TDZ.
    Let,
    Const,
    Function,
    Catch,
    Argument,
    /// Synthetic binding (module import target).
    Shim,
}

impl DeclKind {
    /// Block-level declarations stay in the scope they appear in; everything
    /// `var`-like hoists to the nearest function scope. The engine binds
    /// `let`/`const` leniently, so only catch bindings stay put.
    fn hoists(self) -> bool {
        !matches!(self, Self::Catch)
    }
}

/// One declared variable.
#[derive(Debug, Clone)]
pub(crate) struct Variable {
    pub kind: DeclKind,
    /// Argument index for parameters; local/global offset otherwise
    /// (assigned by the resolve pass).
    pub slot: u32,
    /// A nested function closes over this variable. For parameters this
    /// forces a spill into the locals slab.
    pub captured: bool,
}

/// A pending identifier use, recorded at parse time and linked by `resolve`.
#[derive(Debug, Clone, Copy)]
struct PendingRef {
    scope: ScopeId,
    name: StringId,
}

/// Index of a recorded reference; every identifier AST node carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RefId(u32);

impl RefId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a reference resolved to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Resolution {
    Slot(SlotIndex),
    /// Nothing in the scope chain declares the name: fall back to a global
    /// object property lookup at runtime.
    GlobalName(StringId),
}

#[derive(Debug)]
pub(crate) struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    pub vars: IndexMap<StringId, Variable, ahash::RandomState>,
    /// Function-nesting depth; blocks inherit their enclosing function's.
    pub depth: u8,
    pub is_arrow: bool,
    pub is_module: bool,
    /// Nearest enclosing function (or global) scope, self for function scopes.
    owner_fn: ScopeId,
    /// Fixed local count after slot assignment; temps allocate past this.
    local_base: u32,
    /// Local slot for the synthesized `arguments` array, if referenced.
    pub arguments_slot: Option<u32>,
    /// Function declarations hoisted into this scope, materialized at entry.
    pub hoisted_fns: Vec<(StringId, FunctionId)>,
    /// Captured parameters to copy into locals at entry: (arg index, local).
    pub param_spills: Vec<(u32, u32)>,
}

/// The scope tree plus the reference table.
#[derive(Debug)]
pub(crate) struct ScopeTree {
    scopes: Vec<Scope>,
    refs: Vec<PendingRef>,
    resolutions: Vec<Resolution>,
    global_size: u32,
}

impl ScopeTree {
    pub fn new() -> Self {
        let global = Scope {
            kind: ScopeKind::Global,
            parent: None,
            children: Vec::new(),
            vars: IndexMap::default(),
            depth: 0,
            is_arrow: false,
            is_module: false,
            owner_fn: ScopeId::GLOBAL,
            local_base: 0,
            arguments_slot: None,
            hoisted_fns: Vec::new(),
            param_spills: Vec::new(),
        };
        Self {
            scopes: vec![global],
            refs: Vec::new(),
            resolutions: Vec::new(),
            global_size: 0,
        }
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    /// Creates a child scope and returns its id.
    ///
    /// Function scopes deepen the nesting level; blocks and catch scopes
    /// inherit it.
    pub fn push(&mut self, parent: ScopeId, kind: ScopeKind, is_arrow: bool) -> Result<ScopeId, JsError> {
        let parent_scope = self.get(parent);
        let depth = if kind == ScopeKind::Function {
            let depth = parent_scope.depth + 1;
            if depth >= MAX_FUNCTION_NESTING {
                return Err(JsError::syntax("function nesting is too deep", 0));
            }
            depth
        } else {
            parent_scope.depth
        };
        let id = ScopeId(u32::try_from(self.scopes.len()).expect("scope tree exceeds u32"));
        let owner_fn = if kind == ScopeKind::Function { id } else { parent_scope.owner_fn };
        let is_module = parent_scope.is_module;
        self.scopes.push(Scope {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            vars: IndexMap::default(),
            depth,
            is_arrow,
            is_module,
            owner_fn,
            local_base: 0,
            arguments_slot: None,
            hoisted_fns: Vec::new(),
            param_spills: Vec::new(),
        });
        self.get_mut(parent).children.push(id);
        Ok(id)
    }

    /// Declares a name in `scope`, hoisting `var`-like declarations to the
    /// nearest function scope.
    ///
    /// Within one scope, redeclaration is allowed only for the var/function
    /// family; everything else is a SyntaxError.
    pub fn declare(&mut self, scope: ScopeId, name: StringId, kind: DeclKind, line: u32) -> Result<(), JsError> {
        let target = if kind.hoists() { self.get(scope).owner_fn } else { scope };
        if let Some(existing) = self.get(target).vars.get(&name) {
            let compatible = matches!(existing.kind, DeclKind::Var | DeclKind::Function | DeclKind::Argument | DeclKind::Shim)
                && matches!(kind, DeclKind::Var | DeclKind::Function | DeclKind::Let);
            if !compatible {
                return Err(JsError::syntax("redeclaration of variable", line));
            }
            // A function redeclaration upgrades the binding kind; a var
            // redeclaration leaves the original alone.
            if kind == DeclKind::Function {
                self.get_mut(target).vars.get_mut(&name).expect("just looked up").kind = kind;
            }
            return Ok(());
        }
        let slot = if kind == DeclKind::Argument {
            u32::try_from(self.get(target).vars.values().filter(|v| v.kind == DeclKind::Argument).count())
                .expect("argument count exceeds u32")
        } else {
            0 // assigned by resolve
        };
        self.get_mut(target).vars.insert(name, Variable { kind, slot, captured: false });
        Ok(())
    }

    /// Records a hoisted function declaration for materialization at entry.
    pub fn record_hoisted_fn(&mut self, scope: ScopeId, name: StringId, func: FunctionId) {
        let owner = self.get(scope).owner_fn;
        self.get_mut(owner).hoisted_fns.push((name, func));
    }

    /// Records an identifier use for the resolve pass.
    pub fn reference(&mut self, scope: ScopeId, name: StringId) -> RefId {
        let id = RefId(u32::try_from(self.refs.len()).expect("reference table exceeds u32"));
        self.refs.push(PendingRef { scope, name });
        id
    }

    /// Marks an arrow-function scope chain: the nearest non-arrow function
    /// scope owning `this` for a scope.
    pub fn owner_fn(&self, scope: ScopeId) -> ScopeId {
        self.get(scope).owner_fn
    }

    /// Fixed local count of a function scope, set by `resolve`.
    pub fn local_base(&self, fn_scope: ScopeId) -> u32 {
        self.get(fn_scope).local_base
    }

    pub fn global_size(&self) -> u32 {
        self.global_size
    }

    /// Names and slab offsets of the global scope's variables, so the
    /// global object can expose them to host lookups and `globalThis`.
    pub fn global_vars(&self) -> Vec<(StringId, u32)> {
        self.get(ScopeId::GLOBAL)
            .vars
            .iter()
            .filter(|(_, var)| var.kind != DeclKind::Argument)
            .map(|(&name, var)| (name, var.slot))
            .collect()
    }

    pub fn resolution(&self, id: RefId) -> Resolution {
        self.resolutions[id.index()]
    }

    /// The two-phase resolve: mark captures, assign slots, then link every
    /// pending reference. After this, each identifier node's `RefId` maps to
    /// a valid slot or to a global-name fallback.
    pub fn resolve(&mut self, interns: &Interns) {
        self.mark_captures();
        self.assign_slots();
        self.link_references(interns);
    }

    /// Finds the scope declaring `name`, walking from `scope` outward.
    fn find_declaring(&self, scope: ScopeId, name: StringId) -> Option<ScopeId> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            if self.get(id).vars.contains_key(&name) {
                return Some(id);
            }
            cursor = self.get(id).parent;
        }
        None
    }

    fn mark_captures(&mut self) {
        for i in 0..self.refs.len() {
            let pending = self.refs[i];
            if let Some(declaring) = self.find_declaring(pending.scope, pending.name) {
                let declaring_fn = self.get(declaring).owner_fn;
                let referencing_fn = self.get(pending.scope).owner_fn;
                if declaring_fn != referencing_fn {
                    self.get_mut(declaring)
                        .vars
                        .get_mut(&pending.name)
                        .expect("declaring scope lost variable")
                        .captured = true;
                }
            }
        }
    }

    /// Assigns local offsets within each function scope. Deterministic:
    /// declaration order within a scope, scope-creation order across the
    /// tree. Global-scope variables index the global slab instead.
    fn assign_slots(&mut self) {
        for fn_idx in 0..self.scopes.len() {
            let fn_id = ScopeId(u32::try_from(fn_idx).expect("scope index exceeds u32"));
            if !matches!(self.get(fn_id).kind, ScopeKind::Function | ScopeKind::Global | ScopeKind::Shim)
                || self.get(fn_id).owner_fn != fn_id
            {
                continue;
            }
            let mut counter = 0u32;
            let mut spills = Vec::new();
            // The function scope itself plus every non-function descendant.
            let mut stack = vec![fn_id];
            while let Some(scope_id) = stack.pop() {
                let scope = self.get_mut(scope_id);
                for var in scope.vars.values_mut() {
                    match var.kind {
                        DeclKind::Argument => {
                            if var.captured {
                                spills.push((var.slot, counter));
                                var.slot = counter;
                                counter += 1;
                            }
                        }
                        _ => {
                            var.slot = counter;
                            counter += 1;
                        }
                    }
                }
                let children = self.get(scope_id).children.clone();
                for child in children {
                    if self.get(child).owner_fn == fn_id {
                        stack.push(child);
                    }
                }
            }
            let scope = self.get_mut(fn_id);
            scope.local_base = counter;
            scope.param_spills = spills;
            if fn_id == ScopeId::GLOBAL {
                self.global_size = counter;
            }
        }
    }

    fn link_references(&mut self, interns: &Interns) {
        let arguments_sid = interns
            .lookup(StaticStrings::Arguments.as_str())
            .unwrap_or(StaticStrings::Arguments.id());
        self.resolutions = Vec::with_capacity(self.refs.len());
        for i in 0..self.refs.len() {
            let pending = self.refs[i];
            let resolution = match self.find_declaring(pending.scope, pending.name) {
                Some(declaring) => {
                    let var = &self.get(declaring).vars[&pending.name];
                    let declaring_fn = self.get(declaring).owner_fn;
                    let referencing_fn = self.get(pending.scope).owner_fn;
                    let declaring_depth = self.get(declaring_fn).depth;
                    let region = if var.kind == DeclKind::Argument && !var.captured {
                        Region::Arguments
                    } else if declaring_depth == 0 {
                        Region::Global
                    } else if declaring_fn == referencing_fn {
                        Region::Local
                    } else {
                        Region::Closure(declaring_depth)
                    };
                    let offset = if region == Region::Arguments { var.slot + 1 } else { var.slot };
                    Resolution::Slot(SlotIndex::new(region, offset))
                }
                None if pending.name == arguments_sid && self.get(pending.scope).depth > 0 => {
                    // Synthesize the arguments pseudo-variable on first use.
                    let owner = self.get(pending.scope).owner_fn;
                    let slot = match self.get(owner).arguments_slot {
                        Some(slot) => slot,
                        None => {
                            let scope = self.get_mut(owner);
                            let slot = scope.local_base;
                            scope.local_base += 1;
                            scope.arguments_slot = Some(slot);
                            slot
                        }
                    };
                    Resolution::Slot(SlotIndex::new(Region::Local, slot))
                }
                None => Resolution::GlobalName(pending.name),
            };
            self.resolutions.push(resolution);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interns;

    #[test]
    fn slot_index_packs_region_and_offset() {
        let idx = SlotIndex::new(Region::Closure(3), 42);
        assert_eq!(idx.region(), Region::Closure(3));
        assert_eq!(idx.offset(), 42);
        assert_eq!(SlotIndex::from_raw(idx.raw()), idx);
        assert_eq!(idx.to_string(), "c3.42");
    }

    #[test]
    fn var_hoists_to_function_scope() {
        let mut interns = Interns::new();
        let x = interns.intern("x");
        let mut tree = ScopeTree::new();
        let func = tree.push(ScopeId::GLOBAL, ScopeKind::Function, false).unwrap();
        let block = tree.push(func, ScopeKind::Block, false).unwrap();
        tree.declare(block, x, DeclKind::Var, 1).unwrap();
        assert!(tree.get(func).vars.contains_key(&x));
        assert!(!tree.get(block).vars.contains_key(&x));
    }

    #[test]
    fn catch_binding_stays_in_its_scope() {
        let mut interns = Interns::new();
        let e = interns.intern("e");
        let mut tree = ScopeTree::new();
        let func = tree.push(ScopeId::GLOBAL, ScopeKind::Function, false).unwrap();
        let catch = tree.push(func, ScopeKind::Catch, false).unwrap();
        tree.declare(catch, e, DeclKind::Catch, 1).unwrap();
        assert!(tree.get(catch).vars.contains_key(&e));
        assert!(!tree.get(func).vars.contains_key(&e));
    }

    #[test]
    fn duplicate_let_rejected_var_allowed() {
        let mut interns = Interns::new();
        let x = interns.intern("x");
        let mut tree = ScopeTree::new();
        tree.declare(ScopeId::GLOBAL, x, DeclKind::Var, 1).unwrap();
        assert!(tree.declare(ScopeId::GLOBAL, x, DeclKind::Var, 2).is_ok());
        assert!(tree.declare(ScopeId::GLOBAL, x, DeclKind::Function, 3).is_ok());
        let y = interns.intern("y");
        tree.declare(ScopeId::GLOBAL, y, DeclKind::Const, 1).unwrap();
        assert!(tree.declare(ScopeId::GLOBAL, y, DeclKind::Var, 2).is_err());
    }

    #[test]
    fn closure_reference_gets_closure_region() {
        let mut interns = Interns::new();
        let x = interns.intern("x");
        let mut tree = ScopeTree::new();
        let outer = tree.push(ScopeId::GLOBAL, ScopeKind::Function, false).unwrap();
        let inner = tree.push(outer, ScopeKind::Function, false).unwrap();
        tree.declare(outer, x, DeclKind::Var, 1).unwrap();
        let outer_ref = tree.reference(outer, x);
        let inner_ref = tree.reference(inner, x);
        tree.resolve(&interns);
        match tree.resolution(outer_ref) {
            Resolution::Slot(idx) => assert_eq!(idx.region(), Region::Local),
            Resolution::GlobalName(_) => panic!("outer ref should resolve"),
        }
        match tree.resolution(inner_ref) {
            Resolution::Slot(idx) => assert_eq!(idx.region(), Region::Closure(1)),
            Resolution::GlobalName(_) => panic!("inner ref should resolve"),
        }
    }

    #[test]
    fn captured_parameter_is_spilled() {
        let mut interns = Interns::new();
        let p = interns.intern("p");
        let mut tree = ScopeTree::new();
        let outer = tree.push(ScopeId::GLOBAL, ScopeKind::Function, false).unwrap();
        let inner = tree.push(outer, ScopeKind::Function, false).unwrap();
        tree.declare(outer, p, DeclKind::Argument, 1).unwrap();
        let inner_ref = tree.reference(inner, p);
        tree.resolve(&interns);
        assert_eq!(tree.get(outer).param_spills, vec![(0, 0)]);
        match tree.resolution(inner_ref) {
            Resolution::Slot(idx) => assert_eq!(idx.region(), Region::Closure(1)),
            Resolution::GlobalName(_) => panic!("captured param should resolve"),
        }
    }

    #[test]
    fn unresolved_name_falls_back_to_global_lookup() {
        let mut interns = Interns::new();
        let q = interns.intern("q");
        let mut tree = ScopeTree::new();
        let r = tree.reference(ScopeId::GLOBAL, q);
        tree.resolve(&interns);
        assert!(matches!(tree.resolution(r), Resolution::GlobalName(_)));
    }

    #[test]
    fn deterministic_slot_assignment() {
        let build = || {
            let mut interns = Interns::new();
            let names: Vec<_> = ["a", "b", "c"].iter().map(|n| interns.intern(n)).collect();
            let mut tree = ScopeTree::new();
            let func = tree.push(ScopeId::GLOBAL, ScopeKind::Function, false).unwrap();
            for &n in &names {
                tree.declare(func, n, DeclKind::Var, 1).unwrap();
            }
            let refs: Vec<_> = names.iter().map(|&n| tree.reference(func, n)).collect();
            tree.resolve(&interns);
            refs.iter()
                .map(|&r| match tree.resolution(r) {
                    Resolution::Slot(idx) => idx.raw(),
                    Resolution::GlobalName(_) => panic!("should resolve"),
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(build(), build());
    }
}
