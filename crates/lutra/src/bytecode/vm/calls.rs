//! Call dispatch: function objects, natives, bound natives, constructors,
//! frame setup, and closure capture.

use smallvec::SmallVec;

use crate::{
    error::{JsError, RunResult},
    heap::HeapId,
    io::PrintWriter,
    object::Object,
    scope::SlotIndex,
    tracer::VmTracer,
    types::{BoundNative, FunctionId, JsFunction, JsObject, ObjectKind, Property},
    value::Value,
};

use super::{Frame, Interp};

impl<P: PrintWriter, T: VmTracer> Interp<'_, P, T> {
    /// Creates a function value closing over the current frame chain.
    ///
    /// The new function's closure array is the current chain plus the
    /// current frame's own locals slab, so a variable declared at nesting
    /// depth d is always `closures[d - 1]` in any callee below it.
    pub(crate) fn create_function(&mut self, fid: FunctionId) -> RunResult<Value> {
        let lambda = &self.program.lambdas[fid.index()];
        let bound_this = lambda.is_arrow.then(|| self.current_frame().args[0]);
        let frame = self.current_frame();
        let current_nesting = self.program.lambdas[frame.lambda.index()].nesting as usize;
        let mut closures: SmallVec<[HeapId; 4]> = frame.closures.clone();
        closures.truncate(current_nesting.saturating_sub(1));
        if current_nesting >= 1 {
            closures.push(frame.locals);
        }
        let function = JsFunction {
            lambda: fid,
            closures,
            bound_this,
        };
        let obj = JsObject::new(ObjectKind::Function(function), Some(self.protos.function));
        Ok(Value::Ref(self.heap.alloc_object(obj)?))
    }

    /// The Call/CallMethod opcode path: pushes a frame for compiled
    /// functions, executes natives directly.
    pub(crate) fn dispatch_call(&mut self, callee: Value, this: Value, args: &[Value], dst: SlotIndex) -> RunResult<()> {
        match self.classify_callee(callee)? {
            Callee::Js(id, function) => {
                self.push_js_frame(id, &function, this, args, Some(dst), false, None)?;
                Ok(())
            }
            Callee::Native(builtin) => {
                let result = crate::builtins::call(self, builtin, this, args)?;
                self.set(dst, result);
                Ok(())
            }
            Callee::Bound(bound) => {
                let result = self.call_bound(bound, args)?;
                self.set(dst, result);
                Ok(())
            }
        }
    }

    /// The New opcode path.
    pub(crate) fn dispatch_new(&mut self, ctor: Value, args: &[Value], dst: SlotIndex) -> RunResult<()> {
        match self.classify_callee(ctor)? {
            Callee::Js(id, function) => {
                // The fresh instance's prototype is the constructor's
                // `prototype` object.
                let proto = match self.get_property(Value::Ref(id), "prototype")? {
                    Some(Value::Ref(proto)) => Some(proto),
                    _ => Some(self.protos.object),
                };
                let instance = self.heap.alloc_object(JsObject::plain(proto))?;
                self.push_js_frame(id, &function, Value::Ref(instance), args, Some(dst), true, None)?;
                Ok(())
            }
            Callee::Native(builtin) => {
                let result = crate::builtins::construct(self, builtin, args)?;
                self.set(dst, result);
                Ok(())
            }
            Callee::Bound(_) => Err(JsError::type_error("value is not a constructor").into()),
        }
    }

    /// Synchronous invocation used by builtins, promise reactions, and the
    /// embedder's `call`: runs nested until the pushed frame returns.
    pub(crate) fn call_function(&mut self, callee: Value, this: Value, args: &[Value]) -> RunResult<Value> {
        match self.classify_callee(callee)? {
            Callee::Js(id, function) => {
                let base = self.depth();
                self.push_js_frame(id, &function, this, args, None, false, None)?;
                self.run_frames(base)
            }
            Callee::Native(builtin) => crate::builtins::call(self, builtin, this, args),
            Callee::Bound(bound) => self.call_bound(bound, args),
        }
    }

    /// Pushes a frame for a compiled function.
    pub(crate) fn push_js_frame(
        &mut self,
        _func_obj: HeapId,
        function: &JsFunction,
        this: Value,
        args: &[Value],
        dst: Option<SlotIndex>,
        is_ctor: bool,
        module: Option<u32>,
    ) -> RunResult<()> {
        let lambda = &self.program.lambdas[function.lambda.index()];
        let this = if lambda.is_arrow {
            function.bound_this.unwrap_or(Value::Undefined)
        } else {
            this
        };
        let locals = self.heap.alloc_slab(lambda.local_count as usize)?;

        let mut argv: SmallVec<[Value; 6]> = SmallVec::with_capacity(args.len() + 1);
        argv.push(this);
        argv.extend(args.iter().map(|a| a.dehole()));
        // Pad so every declared parameter slot exists.
        while argv.len() < lambda.param_count as usize + 1 {
            argv.push(Value::Undefined);
        }

        if let Some(slot) = lambda.arguments_slot {
            let elements: Vec<Value> = args.iter().map(|a| a.dehole()).collect();
            let arr = self.heap.alloc_object(JsObject::array(elements, Some(self.protos.array)))?;
            self.heap.slab_mut(locals)[slot as usize] = Value::Ref(arr);
        }

        let name = self.program.interns.get(lambda.name);
        self.tracer.on_call(name, self.depth());

        self.push_frame(Frame {
            lambda: function.lambda,
            ip: 0,
            cur_instr: 0,
            locals,
            args: argv,
            closures: function.closures.clone(),
            dst,
            is_ctor,
            module,
        })
    }

    /// Pushes a frame for a lambda with no function object: the program's
    /// main and module bodies. `this` is the global object.
    pub(crate) fn push_lambda_frame(
        &mut self,
        fid: FunctionId,
        dst: Option<SlotIndex>,
        module: Option<u32>,
    ) -> RunResult<()> {
        let lambda = &self.program.lambdas[fid.index()];
        let locals = self.heap.alloc_slab(lambda.local_count as usize)?;
        let name = self.program.interns.get(lambda.name);
        self.tracer.on_call(name, self.depth());
        self.push_frame(Frame {
            lambda: fid,
            ip: 0,
            cur_instr: 0,
            locals,
            args: SmallVec::from_slice(&[Value::Ref(self.global_object)]),
            closures: SmallVec::new(),
            dst,
            is_ctor: false,
            module,
        })
    }

    fn classify_callee(&mut self, callee: Value) -> RunResult<Callee> {
        match callee {
            Value::Builtin(builtin) => Ok(Callee::Native(builtin)),
            Value::Ref(id) => {
                let Some(obj) = self.heap.try_object(id) else {
                    return Err(self.not_callable(callee));
                };
                match &obj.kind {
                    ObjectKind::Function(function) => Ok(Callee::Js(id, function.clone())),
                    ObjectKind::Native(builtin) => Ok(Callee::Native(*builtin)),
                    ObjectKind::Bound(bound) => Ok(Callee::Bound(*bound)),
                    _ => Err(self.not_callable(callee)),
                }
            }
            _ => Err(self.not_callable(callee)),
        }
    }

    fn not_callable(&self, callee: Value) -> crate::error::RunError {
        let shown = self.to_display_string(callee);
        JsError::type_error(format!("{shown} is not a function")).into()
    }

    /// Bound natives: promise executor arguments and host method wrappers.
    fn call_bound(&mut self, bound: BoundNative, args: &[Value]) -> RunResult<Value> {
        match bound {
            BoundNative::PromiseResolve(promise) => {
                let value = args.first().copied().unwrap_or(Value::Undefined);
                crate::builtins::promise::resolve_with(self, promise, value)?;
                Ok(Value::Undefined)
            }
            BoundNative::PromiseReject(promise) => {
                let value = args.first().copied().unwrap_or(Value::Undefined);
                crate::builtins::promise::settle(self, promise, value, true)?;
                Ok(Value::Undefined)
            }
            BoundNative::ExternalMethod { proto, entry, token } => {
                let mut exported = Vec::with_capacity(args.len());
                for &arg in args {
                    exported.push(self.export_value(arg)?);
                }
                let descriptor = self.externals.descriptor(proto, entry);
                let result = self
                    .externals
                    .handler(proto)
                    .method(token, descriptor.magic8, &exported)
                    .map_err(|message| JsError::type_error(message))?;
                self.import_object(&result)
            }
        }
    }

    // ----- host value exchange -----

    /// Builds a VM value from an embedder [`Object`].
    pub(crate) fn import_object(&mut self, object: &Object) -> RunResult<Value> {
        Ok(match object {
            Object::Undefined => Value::Undefined,
            Object::Null => Value::Null,
            Object::Bool(b) => Value::Bool(*b),
            Object::Number(n) => Value::Number(*n),
            Object::String(s) => self.string_value(s.clone())?,
            Object::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    let element = self.import_object(item)?;
                    elements.push(element);
                }
                let id = self.heap.alloc_object(JsObject::array(elements, Some(self.protos.array)))?;
                Value::Ref(id)
            }
            Object::Map(pairs) => {
                let mut obj = JsObject::plain(Some(self.protos.object));
                for (key, item) in pairs {
                    let value = self.import_object(item)?;
                    obj.define(key.clone(), Property::data(value));
                }
                Value::Ref(self.heap.alloc_object(obj)?)
            }
        })
    }

    /// Exports a VM value to the embedder, flattening objects into plain
    /// data (functions export as their display string).
    pub(crate) fn export_value(&mut self, value: Value) -> RunResult<Object> {
        self.export_value_guarded(value, 0)
    }

    fn export_value_guarded(&mut self, value: Value, depth: usize) -> RunResult<Object> {
        if depth > 64 {
            return Err(JsError::range("object graph is too deep to export").into());
        }
        Ok(match value {
            Value::Undefined | Value::Hole => Object::Undefined,
            Value::Null => Object::Null,
            Value::Bool(b) => Object::Bool(b),
            Value::Number(n) => Object::Number(n),
            Value::Str(_) => Object::String(self.to_js_string(value)?),
            Value::Builtin(_) => Object::String(self.to_display_string(value)),
            Value::Ref(id) => {
                if self.value_str(value).is_some() {
                    return Ok(Object::String(self.to_js_string(value)?));
                }
                let Some(obj) = self.heap.try_object(id) else {
                    return Ok(Object::Undefined);
                };
                match &obj.kind {
                    ObjectKind::Array(elements) => {
                        let elements = elements.clone();
                        let mut out = Vec::with_capacity(elements.len());
                        for element in elements {
                            out.push(self.export_value_guarded(element, depth + 1)?);
                        }
                        Object::Array(out)
                    }
                    ObjectKind::Function(_) | ObjectKind::Native(_) | ObjectKind::Bound(_) => {
                        Object::String(self.to_display_string(value))
                    }
                    ObjectKind::Date(ms) => Object::Number(*ms),
                    _ => {
                        let keys: Vec<String> = self
                            .heap
                            .object(id)
                            .props
                            .iter()
                            .filter(|(_, p)| p.enumerable)
                            .map(|(k, _)| k.clone())
                            .collect();
                        let mut pairs = Vec::with_capacity(keys.len());
                        for key in keys {
                            let prop = self.get_property(value, &key)?.unwrap_or(Value::Undefined);
                            pairs.push((key, self.export_value_guarded(prop, depth + 1)?));
                        }
                        Object::Map(pairs)
                    }
                }
            }
        })
    }
}

/// Classified call target.
enum Callee {
    /// A compiled function object.
    Js(HeapId, JsFunction),
    Native(crate::builtins::Builtins),
    Bound(BoundNative),
}
