//! The embedder interface.
//!
//! [`Engine`] compiles source once (parse, resolve, generate) and can be
//! dumped/loaded in a binary form; [`Vm`] is a session over a compiled
//! engine — its own heap, globals, and event queues. The compile-once,
//! clone-per-request pattern is `engine.vm()` followed by
//! [`Vm::clone_session`] per request: clones share nothing mutable.

use std::{path::PathBuf, rc::Rc};

use ahash::AHashMap;

use crate::{
    builtins::{self, Prototypes},
    bytecode::{
        generate,
        vm::{Interp, ModuleState},
    },
    error::{Exception, JsError, JsErrorKind, RunError},
    event::{EventId, Events, HostOps, NoopOps},
    heap::{Heap, HeapId},
    intern::Interns,
    io::{NoPrint, PrintWriter, StdPrint},
    module::ModuleLoader,
    object::Object,
    parser::{Parser, RegexpLit},
    tracer::{NoopTracer, VmTracer},
    types::{regexp as regexp_types, CompiledRegexp, FunctionId, JsObject, Lambda, ObjectKind, Property},
    value::Value,
};

/// Options for building an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Script name used in error messages and backtraces.
    pub script_name: String,
    /// Keep the parser alive so later `compile` calls extend the program.
    pub accumulative: bool,
    /// Parse the top level as a module (enables `export default`).
    pub module: bool,
    /// Reject statements ASI would otherwise accept without `;`.
    pub strict_semicolon: bool,
    /// Record a bytecode listing, retrievable via `Engine::disassembly`.
    pub disassemble: bool,
    /// Attach `stack` to thrown errors and capture embedder backtraces.
    pub backtrace: bool,
    /// Route `print` output to nowhere.
    pub quiet: bool,
    /// Disallow filesystem access (disables `import`).
    pub sandbox: bool,
    /// Lift the default per-VM memory ceiling.
    pub unsafe_mode: bool,
    /// Per-VM heap budget in bytes; exceeded allocations raise the
    /// MemoryError singleton. None means unlimited.
    pub memory_limit: Option<usize>,
    /// Module search paths, tried in order after the bare specifier.
    pub paths: Vec<PathBuf>,
    /// Bound as the global `argv` array.
    pub argv: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            script_name: "main.js".to_owned(),
            accumulative: false,
            module: false,
            strict_semicolon: false,
            disassemble: false,
            backtrace: true,
            quiet: false,
            sandbox: false,
            unsafe_mode: false,
            memory_limit: None,
            paths: Vec::new(),
            argv: Vec::new(),
        }
    }
}

/// The compiled program: lambda table, interned strings, regexp literals,
/// and the global slab size. Serializable for compile-once caching.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct Program {
    pub lambdas: Vec<Lambda>,
    pub interns: Interns,
    pub regexps: Vec<RegexpLit>,
    pub global_size: u32,
    /// Global-scope variable names and their slab offsets; the global
    /// object resolves these so host lookups see declared globals.
    pub global_names: Vec<(crate::intern::StringId, u32)>,
}

/// Result of one `Vm::run` drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Nothing registered remains; the program is finished.
    Ok,
    /// Events are still registered (timers waiting on the host); call
    /// `run` again after the host's loop tick.
    Again,
}

/// A compiled engine: the shareable, immutable half of a VM.
pub struct Engine {
    options: EngineOptions,
    parser: Option<Parser>,
    program: Program,
    compiled: bool,
}

impl Engine {
    #[must_use]
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            parser: None,
            program: Program::default(),
            compiled: false,
        }
    }

    /// Parses and generates bytecode. In accumulative mode, later calls
    /// append to the same program at a statement boundary.
    pub fn compile(&mut self, source: &str) -> Result<(), Exception> {
        let map_err = |err: JsError, name: &str| Exception::from_js(err, name);
        let name = self.options.script_name.clone();

        if self.parser.is_none() || !self.options.accumulative {
            let loader = if self.options.sandbox {
                None
            } else {
                Some(ModuleLoader::new(self.options.paths.clone()))
            };
            self.parser = Some(Parser::new(
                source.to_owned(),
                loader,
                self.options.module,
                self.options.strict_semicolon,
            ));
            let parser = self.parser.as_mut().expect("just installed");
            parser.parse().map_err(|e| map_err(e, &name))?;
        } else {
            let parser = self.parser.as_mut().expect("accumulative parser retained");
            parser.parse_more(source).map_err(|e| map_err(e, &name))?;
        }

        let parser = self.parser.as_mut().expect("parser exists after parse");
        parser.resolve();
        let lambdas = generate(parser).map_err(|e| map_err(e, &name))?;

        // Validate every regexp literal against the host matcher now, so a
        // bad pattern is a compile error with a line, not a runtime one.
        for lit in &parser.regexps {
            let source = parser.interns().get(lit.pattern);
            let flags = crate::types::RegexpFlags::parse(parser.interns().get(lit.flags), lit.line)
                .map_err(|e| map_err(e, &name))?;
            regexp_types::compile(source, flags).map_err(|e| map_err(e.with_line(lit.line), &name))?;
        }

        self.program = Program {
            lambdas,
            interns: parser.interns().clone(),
            regexps: parser.regexps.clone(),
            global_size: parser.scopes.global_size(),
            global_names: parser.scopes.global_vars(),
        };
        self.compiled = true;
        Ok(())
    }

    /// Serializes the compiled program with postcard, for caching.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&self.program)
    }

    /// Restores a dumped engine. The original source is not needed.
    pub fn load(options: EngineOptions, bytes: &[u8]) -> Result<Self, postcard::Error> {
        let mut program: Program = postcard::from_bytes(bytes)?;
        program.interns.rebuild_map();
        Ok(Self {
            options,
            parser: None,
            program,
            compiled: true,
        })
    }

    /// Bytecode listing of every lambda, when `disassemble` was requested.
    #[must_use]
    pub fn disassembly(&self) -> Option<String> {
        if !self.options.disassemble || !self.compiled {
            return None;
        }
        let mut out = String::new();
        for lambda in &self.program.lambdas {
            use std::fmt::Write;
            let _ = writeln!(out, "-- {} --", self.program.interns.get(lambda.name));
            lambda.code.disassemble(&self.program.interns, &mut out);
        }
        Some(out)
    }

    /// Structured dump of the parse tree (the CLI's `-a`).
    #[must_use]
    pub fn ast_dump(&self) -> Option<String> {
        let parser = self.parser.as_ref()?;
        let body = parser.funcs.first().and_then(|f| f.body)?;
        let mut out = String::new();
        parser.arena.dump(body, parser.interns(), &mut out);
        Some(out)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Creates a fresh VM session over this engine.
    pub fn vm(&self) -> Result<Vm<'_>, Exception> {
        Vm::new(self)
    }
}

/// Host-object descriptor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    /// Value computed by the handler on each access.
    Property,
    /// Method dispatched to the handler.
    Method,
}

/// One entry of a host-object shape.
#[derive(Debug, Clone)]
pub struct ExternalProperty {
    pub kind: ExternalKind,
    pub name: &'static str,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
    /// Auxiliary value passed to property handlers.
    pub magic32: u32,
    /// Auxiliary value passed to method handlers.
    pub magic8: u8,
}

/// The callbacks behind a host-backed object shape.
///
/// Returning `Ok(None)` from `property` is the DECLINED convention:
/// "property absent", without raising an error.
pub trait ExternalMethods {
    fn property(&self, token: u64, name: &str, magic32: u32) -> Result<Option<Object>, String>;

    fn set_property(&self, _token: u64, _name: &str, _value: &Object) -> Result<(), String> {
        Ok(())
    }

    fn method(&self, token: u64, magic8: u8, args: &[Object]) -> Result<Object, String>;

    /// Keys reported to `for..in` / `Object.keys`.
    fn keys(&self, _token: u64) -> Vec<String> {
        Vec::new()
    }
}

/// Handle of a registered host-object shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalProtoId(u32);

struct ExternalProto {
    descriptors: Vec<ExternalProperty>,
    handler: Rc<dyn ExternalMethods>,
}

/// Registered host-object shapes, shared (immutably) across clones.
#[derive(Default)]
pub(crate) struct ExternalRegistry {
    protos: Vec<Rc<ExternalProto>>,
}

impl ExternalRegistry {
    fn register(&mut self, descriptors: Vec<ExternalProperty>, handler: Rc<dyn ExternalMethods>) -> ExternalProtoId {
        let id = u32::try_from(self.protos.len()).expect("external registry exceeds u32");
        self.protos.push(Rc::new(ExternalProto { descriptors, handler }));
        ExternalProtoId(id)
    }

    pub(crate) fn find(&self, proto: u32, key: &str) -> Option<u32> {
        self.protos[proto as usize]
            .descriptors
            .iter()
            .position(|d| d.name == key)
            .map(|i| u32::try_from(i).expect("descriptor index exceeds u32"))
    }

    pub(crate) fn descriptor(&self, proto: u32, entry: u32) -> &ExternalProperty {
        &self.protos[proto as usize].descriptors[entry as usize]
    }

    pub(crate) fn handler(&self, proto: u32) -> Rc<dyn ExternalMethods> {
        self.protos[proto as usize].handler.clone()
    }
}

impl Clone for ExternalRegistry {
    fn clone(&self) -> Self {
        Self {
            protos: self.protos.clone(),
        }
    }
}

/// A VM session: mutable state over a compiled [`Engine`].
pub struct Vm<'e> {
    engine: &'e Engine,
    heap: Heap,
    protos: Prototypes,
    globals: HeapId,
    global_object: HeapId,
    events: Events,
    regexps: Vec<Rc<CompiledRegexp>>,
    externals: ExternalRegistry,
    module_states: AHashMap<u32, ModuleState>,
    ops: Box<dyn HostOps>,
    print: Box<dyn PrintWriter>,
    tracer: Box<dyn VmTracer>,
    retval: Object,
}

impl<'e> Vm<'e> {
    fn new(engine: &'e Engine) -> Result<Self, Exception> {
        if !engine.compiled {
            return Err(Exception::from_js(
                JsError::internal("engine has no compiled program"),
                &engine.options.script_name,
            ));
        }
        let limit = if engine.options.unsafe_mode { None } else { engine.options.memory_limit };
        let mut heap = Heap::new(limit);
        let (protos, global_object) = builtins::install(&mut heap)
            .map_err(|_| Exception::from_js(JsError::memory(), &engine.options.script_name))?;
        let globals = heap
            .alloc_slab(engine.program.global_size as usize)
            .map_err(|_| Exception::from_js(JsError::memory(), &engine.options.script_name))?;

        // Precompile every regexp literal into the session cache; compile
        // already validated them.
        let mut regexps = Vec::with_capacity(engine.program.regexps.len());
        for lit in &engine.program.regexps {
            let source = engine.program.interns.get(lit.pattern);
            let flags = crate::types::RegexpFlags::parse(engine.program.interns.get(lit.flags), lit.line)
                .map_err(|e| Exception::from_js(e, &engine.options.script_name))?;
            let compiled = regexp_types::compile(source, flags)
                .map_err(|e| Exception::from_js(e, &engine.options.script_name))?;
            regexps.push(Rc::new(compiled));
        }

        let print: Box<dyn PrintWriter> = if engine.options.quiet { Box::new(NoPrint) } else { Box::new(StdPrint) };
        let mut vm = Self {
            engine,
            heap,
            protos,
            globals,
            global_object,
            events: Events::default(),
            regexps,
            externals: ExternalRegistry::default(),
            module_states: AHashMap::new(),
            ops: Box::new(NoopOps),
            print,
            tracer: Box::new(NoopTracer),
            retval: Object::Undefined,
        };

        let argv = Object::Array(engine.options.argv.iter().map(|a| Object::String(a.clone())).collect());
        vm.bind("argv", &argv)?;
        Ok(vm)
    }

    /// Installs the host timer vtable.
    pub fn set_host_ops(&mut self, ops: Box<dyn HostOps>) {
        self.ops = ops;
    }

    /// Redirects `print` output.
    pub fn set_print(&mut self, print: Box<dyn PrintWriter>) {
        self.print = print;
    }

    /// Installs an execution tracer.
    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.tracer = tracer;
    }

    /// A per-request clone: shares the compiled program and host-shape
    /// registry, deep-copies the heap and globals, and starts with empty
    /// event queues. Mutations never escape to the parent or to siblings.
    #[must_use]
    pub fn clone_session(&self) -> Vm<'e> {
        Vm {
            engine: self.engine,
            heap: self.heap.clone(),
            protos: self.protos.clone(),
            globals: self.globals,
            global_object: self.global_object,
            events: Events::default(),
            regexps: self.regexps.clone(),
            externals: self.externals.clone(),
            module_states: self.module_states.clone(),
            ops: Box::new(NoopOps),
            print: Box::new(StdPrint),
            tracer: Box::new(NoopTracer),
            retval: self.retval.clone(),
        }
    }

    /// Runs the top-level code once: imports resolve on demand, then main,
    /// then the microtasks main scheduled.
    pub fn start(&mut self) -> Result<Object, Exception> {
        let result = self.execute(|interp| {
            let base = interp.depth();
            interp.push_lambda_frame(FunctionId::new(0), None, None)?;
            let value = interp.run_frames(base)?;
            interp.drain_microtasks()?;
            Ok(value)
        })?;
        self.retval = result.clone();
        Ok(result)
    }

    /// Drains the event loop: microtasks fully, then one posted event at a
    /// time, re-checking microtasks after each. `Again` means events remain
    /// registered and the host should call back after its loop tick.
    pub fn run(&mut self) -> Result<RunStatus, Exception> {
        self.execute(|interp| {
            loop {
                interp.drain_microtasks()?;
                if !interp.dispatch_posted()? {
                    break;
                }
            }
            Ok(Value::Undefined)
        })?;
        if self.events.pending() { Ok(RunStatus::Again) } else { Ok(RunStatus::Ok) }
    }

    /// Calls a function bound on the global object.
    pub fn call(&mut self, name: &str, args: &[Object]) -> Result<Object, Exception> {
        let result = self.execute(|interp| {
            let global = Value::Ref(interp.global_object);
            let func = interp
                .get_property(global, name)?
                .ok_or_else(|| RunError::from(JsError::reference(format!("\"{name}\" is not defined"))))?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(interp.import_object(arg)?);
            }
            let value = interp.call_function(func, Value::Undefined, &values)?;
            interp.drain_microtasks()?;
            Ok(value)
        })?;
        self.retval = result.clone();
        Ok(result)
    }

    /// Like [`Vm::call`] but only stores the result, readable via
    /// [`Vm::retval`].
    pub fn invoke(&mut self, name: &str, args: &[Object]) -> Result<(), Exception> {
        self.call(name, args)?;
        Ok(())
    }

    /// The last value produced by start/call/invoke.
    #[must_use]
    pub fn retval(&self) -> &Object {
        &self.retval
    }

    /// Installs a global binding.
    pub fn bind(&mut self, name: &str, value: &Object) -> Result<(), Exception> {
        self.execute(|interp| {
            let value = interp.import_object(value)?;
            let global = interp.global_object;
            interp.heap.object_mut(global).define(name, Property::hidden(value));
            Ok(Value::Undefined)
        })?;
        Ok(())
    }

    /// Resolves a dotted path (`a.b.c`) from the global object.
    pub fn value(&mut self, path: &str) -> Result<Object, Exception> {
        self.execute(|interp| {
            let mut cursor = Value::Ref(interp.global_object);
            for part in path.split('.') {
                cursor = interp.get_property(cursor, part)?.unwrap_or(Value::Undefined);
            }
            Ok(cursor)
        })
    }

    /// Registers a callback event the host can post against. The function
    /// is resolved from the global object now; `once` events delete
    /// themselves after their first dispatch.
    pub fn add_event(&mut self, function: &str, once: bool) -> Result<EventId, Exception> {
        let mut resolved = Value::Undefined;
        self.execute(|interp| {
            let global = Value::Ref(interp.global_object);
            resolved = interp
                .get_property(global, function)?
                .ok_or_else(|| RunError::from(JsError::reference(format!("\"{function}\" is not defined"))))?;
            Ok(Value::Undefined)
        })?;
        Ok(self.events.add(resolved, once))
    }

    /// Enqueues a posted event; returns false if the event was cancelled.
    pub fn post_event(&mut self, event: EventId, args: &[Object]) -> Result<bool, Exception> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let mut imported = Value::Undefined;
            self.execute(|interp| {
                imported = interp.import_object(arg)?;
                Ok(Value::Undefined)
            })?;
            values.push(imported);
        }
        Ok(self.events.post(event, values))
    }

    /// Cancels a registered event; a queued posting is unlinked.
    pub fn del_event(&mut self, event: EventId) {
        if let Some(removed) = self.events.delete(event) {
            self.ops.clear_timer(removed.host_handle);
        }
    }

    /// Any registered event, timer, or queued work.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.events.pending()
    }

    /// Registered events with nothing runnable right now.
    #[must_use]
    pub fn waiting(&self) -> bool {
        self.events.waiting()
    }

    /// At least one event or microtask is ready.
    #[must_use]
    pub fn posted(&self) -> bool {
        self.events.posted_ready() || !self.events.microtasks.is_empty()
    }

    /// Registers a host-object shape; `bind_external` wraps tokens with it.
    pub fn external_prototype(
        &mut self,
        descriptors: Vec<ExternalProperty>,
        handler: Rc<dyn ExternalMethods>,
    ) -> ExternalProtoId {
        self.externals.register(descriptors, handler)
    }

    /// Binds a host-backed object wrapping `token` as a global.
    pub fn bind_external(&mut self, name: &str, proto: ExternalProtoId, token: u64) -> Result<(), Exception> {
        self.execute(|interp| {
            let obj = JsObject::new(
                ObjectKind::External {
                    proto: proto.0,
                    token,
                },
                Some(interp.protos.object),
            );
            let id = interp.heap.alloc_object(obj)?;
            let global = interp.global_object;
            interp
                .heap
                .object_mut(global)
                .define(name, Property::hidden(Value::Ref(id)));
            Ok(Value::Undefined)
        })?;
        Ok(())
    }

    /// Estimated live heap bytes.
    #[must_use]
    pub fn heap_bytes(&self) -> usize {
        self.heap.estimated_bytes()
    }

    /// Runs a closure against a freshly wired interpreter, translating
    /// errors (and the result) for the embedder.
    fn execute<F>(&mut self, f: F) -> Result<Object, Exception>
    where
        F: FnOnce(&mut Interp<'_, Box<dyn PrintWriter>, Box<dyn VmTracer>>) -> Result<Value, RunError>,
    {
        let mut interp = Interp::new(
            &self.engine.program,
            &mut self.heap,
            &self.protos,
            self.globals,
            self.global_object,
            &mut self.events,
            &mut self.regexps,
            &self.externals,
            &mut self.module_states,
            self.ops.as_mut(),
            &mut self.print,
            &mut self.tracer,
            self.engine.options.backtrace,
            &self.engine.options.script_name,
        );
        match f(&mut interp) {
            Ok(value) => {
                let exported = interp
                    .export_value(value)
                    .unwrap_or(Object::Undefined);
                Ok(exported)
            }
            Err(err) => Err(build_exception(&mut interp, err)),
        }
    }
}

/// Translates an uncaught RunError into the embedder's Exception while the
/// interpreter (and its frames) are still alive.
fn build_exception<P: PrintWriter, T: VmTracer>(interp: &mut Interp<'_, P, T>, err: RunError) -> Exception {
    let script_name = interp.script_name.to_owned();
    let (stack, line) = interp.reported_stack();
    match err {
        RunError::Js(js) => {
            let mut exception = Exception::from_js(js, &script_name);
            if exception.line.is_none() {
                exception.line = Some(line);
            }
            exception.stack = stack;
            exception
        }
        RunError::Thrown(value) => {
            let kind = match value {
                Value::Ref(id) => match interp.heap.try_object(id).map(|o| &o.kind) {
                    Some(ObjectKind::Error(kind)) => *kind,
                    _ => JsErrorKind::Error,
                },
                _ => JsErrorKind::Error,
            };
            let message = match value {
                Value::Ref(_) => interp
                    .get_property(value, "message")
                    .ok()
                    .flatten()
                    .map_or_else(|| interp.to_display_string(value), |m| interp.to_display_string(m)),
                other => interp.to_display_string(other),
            };
            Exception {
                kind,
                message,
                file_name: script_name,
                line: Some(line),
                stack,
            }
        }
    }
}
