//! Array constructor and prototype methods.

use crate::{
    bytecode::vm::Interp,
    error::{JsError, RunResult},
    heap::HeapId,
    io::PrintWriter,
    tracer::VmTracer,
    types::JsObject,
    value::Value,
};

use super::Builtins;

pub(crate) fn call<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    builtin: Builtins,
    this: Value,
    args: &[Value],
) -> RunResult<Value> {
    let arg = |i: usize| args.get(i).copied().unwrap_or(Value::Undefined);
    match builtin {
        Builtins::ArrayCtor => {
            let elements = match args {
                [Value::Number(n)] => {
                    if n.fract() != 0.0 || *n < 0.0 {
                        return Err(JsError::range("invalid array length").into());
                    }
                    vec![Value::Hole; *n as usize]
                }
                _ => args.to_vec(),
            };
            let id = interp
                .heap
                .alloc_object(JsObject::array(elements, Some(interp.protos.array)))?;
            Ok(Value::Ref(id))
        }
        Builtins::ArrayIsArray => {
            let is_array = matches!(arg(0), Value::Ref(id) if interp.heap.try_object(id).is_some_and(|o| o.elements().is_some()));
            Ok(Value::Bool(is_array))
        }
        Builtins::ArrayPush => {
            let id = receiver(interp, this)?;
            for &value in args {
                interp
                    .heap
                    .object_mut(id)
                    .elements_mut()
                    .expect("checked array")
                    .push(value.dehole());
            }
            let length = interp.array_length(id).unwrap_or(0);
            Ok(Value::Number(length as f64))
        }
        Builtins::ArrayPop => {
            let id = receiver(interp, this)?;
            let popped = interp
                .heap
                .object_mut(id)
                .elements_mut()
                .expect("checked array")
                .pop();
            Ok(popped.map_or(Value::Undefined, Value::dehole))
        }
        Builtins::ArrayJoin => {
            let id = receiver(interp, this)?;
            let separator = match args.first() {
                Some(&sep) if !sep.is_nullish() => interp.to_js_string(sep)?,
                _ => ",".to_owned(),
            };
            let elements = interp.heap.object(id).elements().expect("checked array").clone();
            let mut out = String::new();
            for (i, &element) in elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(&separator);
                }
                if !element.is_nullish() {
                    out.push_str(&interp.to_js_string(element)?);
                }
            }
            interp.string_value(out)
        }
        Builtins::ArraySlice => {
            let id = receiver(interp, this)?;
            let elements = interp.heap.object(id).elements().expect("checked array").clone();
            let length = elements.len();
            let start = clamp_index(interp.to_number(arg(0))?, length);
            let end = match args.get(1) {
                Some(&end) if !matches!(end, Value::Undefined) => clamp_index(interp.to_number(end)?, length),
                _ => length,
            };
            let slice: Vec<Value> = if start < end { elements[start..end].to_vec() } else { Vec::new() };
            let id = interp
                .heap
                .alloc_object(JsObject::array(slice, Some(interp.protos.array)))?;
            Ok(Value::Ref(id))
        }
        Builtins::ArrayIndexOf => {
            let id = receiver(interp, this)?;
            let needle = arg(0);
            let elements = interp.heap.object(id).elements().expect("checked array").clone();
            for (index, &element) in elements.iter().enumerate() {
                if interp.strict_eq(element, needle) {
                    return Ok(Value::Number(index as f64));
                }
            }
            Ok(Value::Number(-1.0))
        }
        Builtins::ArrayConcat => {
            let id = receiver(interp, this)?;
            let mut elements = interp.heap.object(id).elements().expect("checked array").clone();
            for &value in args {
                match value {
                    Value::Ref(other) if interp.heap.try_object(other).is_some_and(|o| o.elements().is_some()) => {
                        let extra = interp.heap.object(other).elements().expect("checked array").clone();
                        elements.extend(extra);
                    }
                    _ => elements.push(value),
                }
            }
            let id = interp
                .heap
                .alloc_object(JsObject::array(elements, Some(interp.protos.array)))?;
            Ok(Value::Ref(id))
        }
        Builtins::ArrayForEach | Builtins::ArrayMap => {
            let id = receiver(interp, this)?;
            let callback = arg(0);
            let length = interp.array_length(id).unwrap_or(0);
            let mut mapped = Vec::with_capacity(length);
            for index in 0..length {
                let element = interp
                    .heap
                    .object(id)
                    .elements()
                    .expect("checked array")
                    .get(index)
                    .copied()
                    .unwrap_or(Value::Undefined);
                if matches!(element, Value::Hole) {
                    mapped.push(Value::Hole);
                    continue;
                }
                let result =
                    interp.call_function(callback, Value::Undefined, &[element, Value::Number(index as f64), this])?;
                mapped.push(result);
            }
            if builtin == Builtins::ArrayMap {
                let id = interp
                    .heap
                    .alloc_object(JsObject::array(mapped, Some(interp.protos.array)))?;
                Ok(Value::Ref(id))
            } else {
                Ok(Value::Undefined)
            }
        }
        _ => Err(JsError::internal("misrouted array builtin").into()),
    }
}

/// The receiver must be an array object.
fn receiver<P: PrintWriter, T: VmTracer>(interp: &Interp<'_, P, T>, this: Value) -> RunResult<HeapId> {
    if let Value::Ref(id) = this {
        if interp.heap.try_object(id).is_some_and(|o| o.elements().is_some()) {
            return Ok(id);
        }
    }
    Err(JsError::type_error("receiver is not an array").into())
}

/// Slice-style index: negative counts from the end, clamped to bounds.
fn clamp_index(n: f64, length: usize) -> usize {
    if n.is_nan() {
        return 0;
    }
    if n < 0.0 {
        let back = (-n) as usize;
        length.saturating_sub(back)
    } else {
        (n as usize).min(length)
    }
}
