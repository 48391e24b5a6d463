//! The register-machine interpreter.
//!
//! One tight dispatch loop: decode an opcode, fetch operands through the
//! frame's region tables — `(region, offset)` resolves with a single indexed
//! load — compute, write the destination slot. Calls push frames onto a LIFO
//! stack; returns pop them and deliver the value into the caller's
//! destination slot. Errors unwind through each frame's try table; uncaught
//! errors leave `run_frames` as `Err` for the embedder.

pub(crate) mod calls;
pub(crate) mod ops;
pub(crate) mod props;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    builtins::Prototypes,
    bytecode::op::Opcode,
    error::{JsError, JsErrorKind, RunError, RunResult, StackFrame},
    event::{Events, HostOps, Microtask},
    heap::{Heap, HeapId},
    intern::StringId,
    io::PrintWriter,
    run::{ExternalRegistry, Program},
    scope::{Region, SlotIndex},
    tracer::VmTracer,
    types::{FunctionId, JsObject, ObjectKind, Property, RegexpFlags, RegexpObject},
    value::Value,
};

/// Hard frame-depth limit; deeper recursion raises RangeError.
const MAX_CALL_DEPTH: usize = 512;

/// Execution status of a module lambda, for import memoization.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ModuleState {
    /// Currently on the frame stack: an import cycle observes `undefined`.
    Running,
    Done(Value),
}

/// One activation record.
#[derive(Debug)]
pub(crate) struct Frame {
    pub lambda: FunctionId,
    /// Next instruction to execute.
    pub ip: usize,
    /// Start offset of the currently executing instruction; the unwinder
    /// and backtraces anchor on this.
    pub cur_instr: usize,
    /// The frame's locals slab.
    pub locals: HeapId,
    /// `this` followed by the call arguments, padded to the parameter count.
    pub args: SmallVec<[Value; 6]>,
    /// Locals slabs of enclosing activations, indexed by nesting depth - 1.
    pub closures: SmallVec<[HeapId; 4]>,
    /// Caller slot receiving the return value; None for a root frame.
    pub dst: Option<SlotIndex>,
    /// Constructor call: a primitive return is replaced by `this`.
    pub is_ctor: bool,
    /// Module lambda id, for memoizing the result on return.
    pub module: Option<u32>,
}

/// The interpreter. Borrows the session state owned by [`crate::run::Vm`]
/// for the duration of one synchronous execution.
pub(crate) struct Interp<'a, P: PrintWriter, T: VmTracer> {
    pub program: &'a Program,
    pub heap: &'a mut Heap,
    pub protos: &'a Prototypes,
    /// The global variables slab.
    pub globals: HeapId,
    pub global_object: HeapId,
    pub events: &'a mut Events,
    pub regexps: &'a mut Vec<std::rc::Rc<crate::types::CompiledRegexp>>,
    pub externals: &'a ExternalRegistry,
    pub module_states: &'a mut AHashMap<u32, ModuleState>,
    pub ops: &'a mut dyn HostOps,
    pub print: &'a mut P,
    pub tracer: &'a mut T,
    pub backtrace: bool,
    pub script_name: &'a str,
    frames: Vec<Frame>,
    /// Frames and line captured when the last unwind began, so an uncaught
    /// error still reports where it was thrown after the stack is gone.
    throw_snapshot: Option<(Vec<StackFrame>, u32)>,
}

macro_rules! fetch_u32 {
    ($code:expr, $ip:expr) => {{
        let bytes: [u8; 4] = $code[$ip..$ip + 4].try_into().expect("truncated operand");
        $ip += 4;
        u32::from_le_bytes(bytes)
    }};
}

macro_rules! fetch_slot {
    ($code:expr, $ip:expr) => {
        SlotIndex::from_raw(fetch_u32!($code, $ip))
    };
}

macro_rules! fetch_disp {
    ($code:expr, $ip:expr) => {
        fetch_u32!($code, $ip).cast_signed()
    };
}

impl<'a, P: PrintWriter, T: VmTracer> Interp<'a, P, T> {
    #[expect(clippy::too_many_arguments, reason = "wires the session state through one constructor")]
    pub fn new(
        program: &'a Program,
        heap: &'a mut Heap,
        protos: &'a Prototypes,
        globals: HeapId,
        global_object: HeapId,
        events: &'a mut Events,
        regexps: &'a mut Vec<std::rc::Rc<crate::types::CompiledRegexp>>,
        externals: &'a ExternalRegistry,
        module_states: &'a mut AHashMap<u32, ModuleState>,
        ops: &'a mut dyn HostOps,
        print: &'a mut P,
        tracer: &'a mut T,
        backtrace: bool,
        script_name: &'a str,
    ) -> Self {
        Self {
            program,
            heap,
            protos,
            globals,
            global_object,
            events,
            regexps,
            externals,
            module_states,
            ops,
            print,
            tracer,
            backtrace,
            script_name,
            frames: Vec::with_capacity(8),
            throw_snapshot: None,
        }
    }

    /// Drains the microtask queue to empty. The run loop calls this before
    /// and after every posted-event dispatch.
    pub fn drain_microtasks(&mut self) -> RunResult<()> {
        while let Some(task) = self.events.microtasks.pop_front() {
            match task {
                Microtask::Call { func, this, args } => {
                    self.call_function(func, this, &args)?;
                }
                Microtask::Reaction {
                    derived,
                    handler,
                    value,
                    rejected,
                } => {
                    crate::builtins::promise::run_reaction(self, derived, handler, value, rejected)?;
                }
            }
        }
        Ok(())
    }

    /// Dispatches at most one posted event; returns whether a queue entry
    /// was consumed. `once` events are deleted before their callback runs,
    /// so a mis-posted duplicate cannot fire twice; a posting whose event
    /// was cancelled is consumed without running anything.
    pub fn dispatch_posted(&mut self) -> RunResult<bool> {
        let Some(posted) = self.events.posted.pop_front() else {
            return Ok(false);
        };
        let Some(event) = self.events.get(posted.event).cloned() else {
            return Ok(true);
        };
        if event.once {
            self.events.delete(posted.event);
        }
        self.call_function(event.function, Value::Undefined, &posted.args)?;
        Ok(true)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn current_frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    pub(crate) fn push_frame(&mut self, frame: Frame) -> RunResult<()> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(JsError::range("maximum call stack size exceeded").into());
        }
        self.frames.push(frame);
        Ok(())
    }

    // ----- operand access -----

    /// Fetches an operand: one indexed load per region.
    pub(crate) fn get(&self, idx: SlotIndex) -> Value {
        let frame = self.current_frame();
        let offset = idx.offset() as usize;
        match idx.region() {
            Region::Local => self.heap.slab(frame.locals)[offset],
            Region::Arguments => frame.args.get(offset).copied().unwrap_or(Value::Undefined),
            Region::Global => self.heap.slab(self.globals)[offset],
            Region::Closure(depth) => self.heap.slab(frame.closures[depth as usize - 1])[offset],
        }
    }

    pub(crate) fn set(&mut self, idx: SlotIndex, value: Value) {
        let offset = idx.offset() as usize;
        match idx.region() {
            Region::Local => {
                let locals = self.current_frame().locals;
                self.heap.slab_mut(locals)[offset] = value;
            }
            Region::Arguments => {
                let frame = self.current_frame_mut();
                if offset >= frame.args.len() {
                    frame.args.resize(offset + 1, Value::Undefined);
                }
                frame.args[offset] = value;
            }
            Region::Global => {
                let globals = self.globals;
                self.heap.slab_mut(globals)[offset] = value;
            }
            Region::Closure(depth) => {
                let slab = self.current_frame().closures[depth as usize - 1];
                self.heap.slab_mut(slab)[offset] = value;
            }
        }
    }

    // ----- the dispatch loop -----

    /// Runs until the frame stack shrinks back to `base`, returning the
    /// value of the Return that got it there.
    pub fn run_frames(&mut self, base: usize) -> RunResult<Value> {
        loop {
            match self.step(base) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(err) => self.unwind(err, base)?,
            }
        }
    }

    /// Executes one instruction.
    #[expect(clippy::too_many_lines, reason = "the dispatch loop is one match by design")]
    fn step(&mut self, base: usize) -> RunResult<Option<Value>> {
        let program = self.program;
        let (lambda_index, instr_start) = {
            let frame = self.current_frame();
            (frame.lambda.index(), frame.ip)
        };
        let code = program.lambdas[lambda_index].code.bytecode();
        let mut ip = instr_start;
        let opcode = Opcode::from_repr(code[ip]).expect("invalid opcode in bytecode");
        ip += 1;
        self.tracer.on_instruction(instr_start, opcode.name());

        match opcode {
            Opcode::Nop => {
                self.commit(ip, instr_start);
            }
            Opcode::Move => {
                let dst = fetch_slot!(code, ip);
                let src = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let value = self.get(src).dehole();
                self.set(dst, value);
            }
            Opcode::LoadConst => {
                let dst = fetch_slot!(code, ip);
                let index = fetch_u32!(code, ip);
                self.commit(ip, instr_start);
                let value = program.lambdas[lambda_index].code.constant(index);
                self.set(dst, value);
            }
            Opcode::LoadUndefined => {
                let dst = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                self.set(dst, Value::Undefined);
            }
            Opcode::GetGlobal => {
                let dst = fetch_slot!(code, ip);
                let name = program.interns.get(StringId::from_raw(fetch_u32!(code, ip)));
                self.commit(ip, instr_start);
                let global = Value::Ref(self.global_object);
                match self.get_property(global, name)? {
                    Some(value) => self.set(dst, value),
                    None => {
                        return Err(JsError::reference(format!("\"{name}\" is not defined")).into());
                    }
                }
            }
            Opcode::SetGlobal => {
                let name = program.interns.get(StringId::from_raw(fetch_u32!(code, ip)));
                let src = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let value = self.get(src).dehole();
                let global = Value::Ref(self.global_object);
                self.set_property(global, name, value)?;
            }
            Opcode::TypeofGlobal => {
                let dst = fetch_slot!(code, ip);
                let name = program.interns.get(StringId::from_raw(fetch_u32!(code, ip)));
                self.commit(ip, instr_start);
                let global = Value::Ref(self.global_object);
                let text = match self.get_property(global, name)? {
                    Some(value) => self.typeof_of(value),
                    None => "undefined",
                };
                let value = self.string_value(text.to_owned())?;
                self.set(dst, value);
            }
            Opcode::DeleteGlobal => {
                let dst = fetch_slot!(code, ip);
                let name = program.interns.get(StringId::from_raw(fetch_u32!(code, ip)));
                self.commit(ip, instr_start);
                let deleted = self.delete_property_raw(self.global_object, name)?;
                self.set(dst, Value::Bool(deleted));
            }
            Opcode::ObjectNew => {
                let dst = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let id = self.heap.alloc_object(JsObject::plain(Some(self.protos.object)))?;
                self.set(dst, Value::Ref(id));
            }
            Opcode::ArrayNew => {
                let dst = fetch_slot!(code, ip);
                let capacity = fetch_u32!(code, ip);
                self.commit(ip, instr_start);
                let elements = Vec::with_capacity(capacity as usize);
                let id = self.heap.alloc_object(JsObject::array(elements, Some(self.protos.array)))?;
                self.set(dst, Value::Ref(id));
            }
            Opcode::ArrayAppend => {
                let arr = fetch_slot!(code, ip);
                let src = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let value = self.get(src);
                let Value::Ref(id) = self.get(arr) else {
                    return Err(JsError::internal("ArrayAppend target is not an array").into());
                };
                let obj = self.heap.object_mut(id);
                let Some(elements) = obj.elements_mut() else {
                    return Err(JsError::internal("ArrayAppend target is not an array").into());
                };
                elements.push(value);
            }
            Opcode::RegexpNew => {
                let dst = fetch_slot!(code, ip);
                let literal = fetch_u32!(code, ip);
                self.commit(ip, instr_start);
                let lit = program.regexps[literal as usize];
                let source = program.interns.get(lit.pattern).to_owned();
                let flags = RegexpFlags::parse(program.interns.get(lit.flags), lit.line)?;
                let value = self.new_regexp_object(source, flags, literal)?;
                self.set(dst, value);
            }
            Opcode::FunctionNew => {
                let dst = fetch_slot!(code, ip);
                let func = fetch_u32!(code, ip);
                self.commit(ip, instr_start);
                let value = self.create_function(FunctionId::new(func))?;
                self.set(dst, value);
            }
            Opcode::PropInit | Opcode::PropInitGetter | Opcode::PropInitSetter => {
                let obj = fetch_slot!(code, ip);
                let key = fetch_slot!(code, ip);
                let src = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let key = self.get(key);
                let key = self.to_js_string(key)?;
                let value = self.get(src).dehole();
                let Value::Ref(id) = self.get(obj) else {
                    return Err(JsError::internal("property init on a non-object").into());
                };
                match opcode {
                    Opcode::PropInit => self.init_property(id, &key, value)?,
                    Opcode::PropInitGetter => self.init_accessor(id, &key, Some(value), None),
                    _ => self.init_accessor(id, &key, None, Some(value)),
                }
            }
            Opcode::PropGet => {
                let dst = fetch_slot!(code, ip);
                let obj = fetch_slot!(code, ip);
                let key = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let target = self.get(obj);
                let key = self.get(key);
                let value = self.get_property_by_value(target, key)?.unwrap_or(Value::Undefined);
                self.set(dst, value);
            }
            Opcode::PropSet => {
                let obj = fetch_slot!(code, ip);
                let key = fetch_slot!(code, ip);
                let src = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let target = self.get(obj);
                let key = self.get(key);
                let value = self.get(src).dehole();
                self.set_property_by_value(target, key, value)?;
            }
            Opcode::PropDelete => {
                let dst = fetch_slot!(code, ip);
                let obj = fetch_slot!(code, ip);
                let key = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let target = self.get(obj);
                let key = self.get(key);
                let deleted = self.delete_property(target, key)?;
                self.set(dst, Value::Bool(deleted));
            }
            Opcode::In => {
                let dst = fetch_slot!(code, ip);
                let key = fetch_slot!(code, ip);
                let obj = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let key = self.get(key);
                let target = self.get(obj);
                if !matches!(target, Value::Ref(_)) {
                    return Err(JsError::type_error("right-hand side of \"in\" is not an object").into());
                }
                let present = self.get_property_by_value(target, key)?.is_some();
                self.set(dst, Value::Bool(present));
            }
            Opcode::InstanceOf => {
                let dst = fetch_slot!(code, ip);
                let val = fetch_slot!(code, ip);
                let ctor = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let value = self.get(val);
                let ctor = self.get(ctor);
                let result = self.instance_of(value, ctor)?;
                self.set(dst, Value::Bool(result));
            }
            Opcode::Add => {
                let (dst, a, b) = (fetch_slot!(code, ip), fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let (va, vb) = (self.get(a), self.get(b));
                let result = self.add_values(va, vb)?;
                self.set(dst, result);
            }
            Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem | Opcode::Exp => {
                let (dst, a, b) = (fetch_slot!(code, ip), fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let na = self.to_number(self.get(a))?;
                let nb = self.to_number(self.get(b))?;
                let result = match opcode {
                    Opcode::Sub => na - nb,
                    Opcode::Mul => na * nb,
                    Opcode::Div => na / nb,
                    Opcode::Rem => {
                        if nb == 0.0 {
                            f64::NAN
                        } else {
                            na % nb
                        }
                    }
                    _ => na.powf(nb),
                };
                self.set(dst, Value::Number(result));
            }
            Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor | Opcode::Shl | Opcode::Shr | Opcode::Ushr => {
                let (dst, a, b) = (fetch_slot!(code, ip), fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let na = ops::to_int32(self.to_number(self.get(a))?);
                let nbf = self.to_number(self.get(b))?;
                let result = match opcode {
                    Opcode::BitAnd => f64::from(na & ops::to_int32(nbf)),
                    Opcode::BitOr => f64::from(na | ops::to_int32(nbf)),
                    Opcode::BitXor => f64::from(na ^ ops::to_int32(nbf)),
                    Opcode::Shl => f64::from(na << (ops::to_uint32(nbf) & 31)),
                    Opcode::Shr => f64::from(na >> (ops::to_uint32(nbf) & 31)),
                    _ => f64::from(na.cast_unsigned() >> (ops::to_uint32(nbf) & 31)),
                };
                self.set(dst, Value::Number(result));
            }
            Opcode::Eq | Opcode::Neq => {
                let (dst, a, b) = (fetch_slot!(code, ip), fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let equal = self.loose_eq(self.get(a), self.get(b))?;
                self.set(dst, Value::Bool(equal == (opcode == Opcode::Eq)));
            }
            Opcode::StrictEq | Opcode::StrictNeq => {
                let (dst, a, b) = (fetch_slot!(code, ip), fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let equal = self.strict_eq(self.get(a), self.get(b));
                self.set(dst, Value::Bool(equal == (opcode == Opcode::StrictEq)));
            }
            Opcode::Lt | Opcode::Lte | Opcode::Gt | Opcode::Gte => {
                let (dst, a, b) = (fetch_slot!(code, ip), fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                use std::cmp::Ordering;
                let ordering = self.compare_values(self.get(a), self.get(b))?;
                let result = match (opcode, ordering) {
                    (_, None) => false,
                    (Opcode::Lt, Some(o)) => o == Ordering::Less,
                    (Opcode::Lte, Some(o)) => o != Ordering::Greater,
                    (Opcode::Gt, Some(o)) => o == Ordering::Greater,
                    (_, Some(o)) => o != Ordering::Less,
                };
                self.set(dst, Value::Bool(result));
            }
            Opcode::Neg => {
                let (dst, src) = (fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let n = self.to_number(self.get(src))?;
                self.set(dst, Value::Number(-n));
            }
            Opcode::ToNumber => {
                let (dst, src) = (fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let n = self.to_number(self.get(src))?;
                self.set(dst, Value::Number(n));
            }
            Opcode::ToString => {
                let (dst, src) = (fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let s = self.to_js_string(self.get(src))?;
                let value = self.string_value(s)?;
                self.set(dst, value);
            }
            Opcode::BitNot => {
                let (dst, src) = (fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let n = ops::to_int32(self.to_number(self.get(src))?);
                self.set(dst, Value::Number(f64::from(!n)));
            }
            Opcode::Not => {
                let (dst, src) = (fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let truthy = self.truthy(self.get(src));
                self.set(dst, Value::Bool(!truthy));
            }
            Opcode::Typeof => {
                let (dst, src) = (fetch_slot!(code, ip), fetch_slot!(code, ip));
                self.commit(ip, instr_start);
                let text = self.typeof_of(self.get(src));
                let value = self.string_value(text.to_owned())?;
                self.set(dst, value);
            }
            Opcode::Jump => {
                let disp = fetch_disp!(code, ip);
                self.jump(ip, instr_start, disp);
            }
            Opcode::JumpIfTruthy | Opcode::JumpIfFalsy | Opcode::JumpIfNullish | Opcode::JumpIfNotNullish => {
                let src = fetch_slot!(code, ip);
                let disp = fetch_disp!(code, ip);
                let value = self.get(src);
                let taken = match opcode {
                    Opcode::JumpIfTruthy => self.truthy(value),
                    Opcode::JumpIfFalsy => !self.truthy(value),
                    Opcode::JumpIfNullish => value.is_nullish(),
                    _ => !value.is_nullish(),
                };
                if taken {
                    self.jump(ip, instr_start, disp);
                } else {
                    self.commit(ip, instr_start);
                }
            }
            Opcode::Call => {
                let dst = fetch_slot!(code, ip);
                let func = fetch_slot!(code, ip);
                let bas = fetch_u32!(code, ip);
                let argc = fetch_u32!(code, ip);
                self.commit(ip, instr_start);
                let callee = self.get(func);
                let args = self.collect_args(bas, argc);
                self.dispatch_call(callee, Value::Undefined, &args, dst)?;
            }
            Opcode::CallMethod => {
                let dst = fetch_slot!(code, ip);
                let func = fetch_slot!(code, ip);
                let this = fetch_slot!(code, ip);
                let bas = fetch_u32!(code, ip);
                let argc = fetch_u32!(code, ip);
                self.commit(ip, instr_start);
                let callee = self.get(func);
                let this = self.get(this);
                let args = self.collect_args(bas, argc);
                self.dispatch_call(callee, this, &args, dst)?;
            }
            Opcode::New => {
                let dst = fetch_slot!(code, ip);
                let ctor = fetch_slot!(code, ip);
                let bas = fetch_u32!(code, ip);
                let argc = fetch_u32!(code, ip);
                self.commit(ip, instr_start);
                let ctor = self.get(ctor);
                let args = self.collect_args(bas, argc);
                self.dispatch_new(ctor, &args, dst)?;
            }
            Opcode::Return => {
                let src = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let mut value = self.get(src).dehole();
                let frame = self.frames.pop().expect("return without a frame");
                self.tracer.on_return(self.frames.len());
                if frame.is_ctor && !matches!(value, Value::Ref(_)) {
                    value = frame.args[0];
                }
                if let Some(module) = frame.module {
                    self.module_states.insert(module, ModuleState::Done(value));
                }
                if self.frames.len() == base {
                    return Ok(Some(value));
                }
                if let Some(dst) = frame.dst {
                    self.set(dst, value);
                }
            }
            Opcode::Throw => {
                let src = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let value = self.get(src).dehole();
                let value = self.attach_stack_if_error(value)?;
                return Err(RunError::Thrown(value));
            }
            Opcode::ForInInit => {
                let dst = fetch_slot!(code, ip);
                let obj = fetch_slot!(code, ip);
                self.commit(ip, instr_start);
                let target = self.get(obj);
                let keys = self.enumerate_keys(target)?;
                let id = self.heap.alloc_object(JsObject::new(ObjectKind::KeysIter { keys, index: 0 }, None))?;
                self.set(dst, Value::Ref(id));
            }
            Opcode::ForInNext => {
                let dst = fetch_slot!(code, ip);
                let iter = fetch_slot!(code, ip);
                let disp = fetch_disp!(code, ip);
                let Value::Ref(id) = self.get(iter) else {
                    return Err(JsError::internal("for-in iterator is not an object").into());
                };
                let next = {
                    let obj = self.heap.object_mut(id);
                    let ObjectKind::KeysIter { keys, index } = &mut obj.kind else {
                        return Err(JsError::internal("for-in iterator is not an object").into());
                    };
                    if *index < keys.len() {
                        let key = keys[*index].clone();
                        *index += 1;
                        Some(key)
                    } else {
                        None
                    }
                };
                match next {
                    Some(key) => {
                        self.commit(ip, instr_start);
                        let value = self.string_value(key)?;
                        self.set(dst, value);
                    }
                    None => self.jump(ip, instr_start, disp),
                }
            }
            Opcode::ImportModule => {
                let dst = fetch_slot!(code, ip);
                let func = fetch_u32!(code, ip);
                self.commit(ip, instr_start);
                match self.module_states.get(&func) {
                    Some(ModuleState::Done(value)) => {
                        let value = *value;
                        self.set(dst, value);
                    }
                    Some(ModuleState::Running) => {
                        // Import cycle: the in-progress module is observed
                        // as undefined, matching access-time binding.
                        self.set(dst, Value::Undefined);
                    }
                    None => {
                        self.module_states.insert(func, ModuleState::Running);
                        self.push_lambda_frame(FunctionId::new(func), Some(dst), Some(func))?;
                    }
                }
            }
        }
        Ok(None)
    }

    fn commit(&mut self, ip: usize, instr_start: usize) {
        let frame = self.current_frame_mut();
        frame.ip = ip;
        frame.cur_instr = instr_start;
    }

    fn jump(&mut self, ip: usize, instr_start: usize, disp: i32) {
        let target = i64::try_from(ip).expect("ip exceeds i64") + i64::from(disp);
        let target = usize::try_from(target).expect("jump landed outside the code");
        let frame = self.current_frame_mut();
        frame.ip = target;
        frame.cur_instr = instr_start;
    }

    fn collect_args(&self, base: u32, argc: u32) -> SmallVec<[Value; 6]> {
        let frame = self.current_frame();
        let slab = self.heap.slab(frame.locals);
        (0..argc)
            .map(|i| slab[(base + i) as usize].dehole())
            .collect()
    }

    // ----- exceptions -----

    /// Unwinds after an error: finds the innermost try range covering the
    /// faulting instruction, walking frames outward; propagates the error
    /// when the search would cross `base`.
    fn unwind(&mut self, err: RunError, base: usize) -> Result<(), RunError> {
        self.tracer.on_throw();
        self.throw_snapshot = Some((self.stack_frames(), self.current_line()));
        loop {
            if self.frames.len() <= base {
                return Err(err);
            }
            let frame = self.current_frame();
            let lambda = &self.program.lambdas[frame.lambda.index()];
            let cur = u32::try_from(frame.cur_instr).expect("instruction offset exceeds u32");
            let entry = lambda
                .code
                .try_table()
                .iter()
                .find(|entry| entry.start <= cur && cur < entry.end)
                .copied();
            match entry {
                Some(entry) => {
                    let exception = self.error_to_value(err)?;
                    self.set(entry.slot_index(), exception);
                    let frame = self.current_frame_mut();
                    frame.ip = entry.target as usize;
                    frame.cur_instr = frame.ip;
                    return Ok(());
                }
                None => {
                    self.frames.pop();
                }
            }
        }
    }

    /// Materializes a RunError as a JavaScript value. MemoryError maps to
    /// the immortal singleton so this path cannot itself allocate.
    pub(crate) fn error_to_value(&mut self, err: RunError) -> RunResult<Value> {
        match err {
            RunError::Thrown(value) => Ok(value),
            RunError::Js(js) => {
                if js.kind == JsErrorKind::MemoryError {
                    return Ok(Value::Ref(HeapId::MEMORY_ERROR));
                }
                self.create_error_object(&js).or(Ok(Value::Ref(HeapId::MEMORY_ERROR)))
            }
        }
    }

    /// Builds an Error instance for an engine-raised error, attaching the
    /// backtrace when enabled.
    pub(crate) fn create_error_object(&mut self, js: &JsError) -> RunResult<Value> {
        let proto = self.protos.error_proto(js.kind);
        let mut obj = JsObject::new(ObjectKind::Error(js.kind), Some(proto));
        let message = self.heap.alloc_str(js.message.clone())?;
        obj.define("message", Property::hidden(Value::Ref(message)));
        if let Some(line) = js.line {
            obj.define("lineNumber", Property::hidden(Value::Number(f64::from(line))));
        }
        let id = self.heap.alloc_object(obj)?;
        if self.backtrace {
            let stack = self.render_stack(&format!("{js}"));
            let stack = self.heap.alloc_str(stack)?;
            self.heap.object_mut(id).define("stack", Property::hidden(Value::Ref(stack)));
        }
        Ok(Value::Ref(id))
    }

    /// Thrown Error objects get a `stack` attached at the throw site if
    /// they don't carry one yet.
    fn attach_stack_if_error(&mut self, value: Value) -> RunResult<Value> {
        if !self.backtrace {
            return Ok(value);
        }
        let Value::Ref(id) = value else { return Ok(value) };
        let is_error = matches!(
            self.heap.try_object(id).map(|o| &o.kind),
            Some(ObjectKind::Error(_))
        );
        // The non-extensible MemoryError singleton never grows a stack.
        if !is_error || !self.heap.object(id).extensible || self.heap.object(id).own("stack").is_some() {
            return Ok(value);
        }
        let header = self.object_error_header(id)?;
        let stack = self.render_stack(&header);
        let stack = self.heap.alloc_str(stack)?;
        self.heap.object_mut(id).define("stack", Property::hidden(Value::Ref(stack)));
        Ok(value)
    }

    fn object_error_header(&mut self, id: HeapId) -> RunResult<String> {
        let name = self
            .get_property(Value::Ref(id), "name")?
            .map_or_else(|| "Error".to_owned(), |v| self.to_display_string(v));
        let message = self
            .get_property(Value::Ref(id), "message")?
            .map_or_else(String::new, |v| self.to_display_string(v));
        Ok(if message.is_empty() { name } else { format!("{name}: {message}") })
    }

    /// Renders the live frame stack as an Error.prototype.stack string.
    pub(crate) fn render_stack(&self, header: &str) -> String {
        use std::fmt::Write;
        let mut out = header.to_owned();
        for frame in self.frames.iter().rev() {
            let lambda = &self.program.lambdas[frame.lambda.index()];
            let name = self.program.interns.get(lambda.name);
            let line = lambda.code.line_for(frame.cur_instr);
            let _ = write!(out, "\n    at {name} ({}:{line})", self.script_name);
        }
        out
    }

    /// The frames of the last throw when the stack already unwound, or the
    /// live frames otherwise — what the embedder's Exception reports.
    pub(crate) fn reported_stack(&self) -> (Vec<StackFrame>, u32) {
        if self.frames.is_empty() {
            if let Some(snapshot) = &self.throw_snapshot {
                return snapshot.clone();
            }
        }
        (self.stack_frames(), self.current_line())
    }

    /// Snapshot of the live frames for the embedder's Exception.
    pub(crate) fn stack_frames(&self) -> Vec<StackFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let lambda = &self.program.lambdas[frame.lambda.index()];
                StackFrame {
                    name: self.program.interns.get(lambda.name).to_owned(),
                    line: lambda.code.line_for(frame.cur_instr),
                }
            })
            .collect()
    }

    /// The source line of the currently executing instruction.
    pub(crate) fn current_line(&self) -> u32 {
        self.frames.last().map_or(0, |frame| {
            self.program.lambdas[frame.lambda.index()].code.line_for(frame.cur_instr)
        })
    }

    /// Creates a regexp object over an already-compiled cache entry.
    pub(crate) fn new_regexp_object(&mut self, source: String, flags: RegexpFlags, compiled: u32) -> RunResult<Value> {
        let mut obj = JsObject::new(
            ObjectKind::Regexp(RegexpObject {
                source,
                flags,
                compiled,
            }),
            Some(self.protos.regexp),
        );
        obj.define("lastIndex", Property::hidden(Value::Number(0.0)));
        Ok(Value::Ref(self.heap.alloc_object(obj)?))
    }
}
