//! String constructor and prototype methods.
//!
//! Positions are in characters, matching JS semantics; the underlying
//! storage is UTF-8.

use crate::{
    bytecode::vm::Interp,
    error::{JsError, RunResult},
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
    if builtin == Builtins::StringCtor {
        if args.is_empty() {
            return interp.string_value(String::new());
        }
        let text = interp.to_js_string(arg(0))?;
        return interp.string_value(text);
    }

    let text = interp.to_js_string(this)?;
    match builtin {
        Builtins::StringSplit => {
            let elements: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![interp.string_value(text)?],
                Some(&sep) => {
                    let sep = interp.to_js_string(sep)?;
                    let mut out = Vec::new();
                    if sep.is_empty() {
                        for ch in text.chars() {
                            out.push(interp.string_value(ch.to_string())?);
                        }
                    } else {
                        for piece in text.split(sep.as_str()) {
                            out.push(interp.string_value(piece.to_owned())?);
                        }
                    }
                    out
                }
            };
            let id = interp
                .heap
                .alloc_object(JsObject::array(elements, Some(interp.protos.array)))?;
            Ok(Value::Ref(id))
        }
        Builtins::StringCharAt => {
            let index = interp.to_number(arg(0))?;
            let picked = if index.fract() == 0.0 && index >= 0.0 {
                text.chars().nth(index as usize)
            } else {
                None
            };
            interp.string_value(picked.map_or_else(String::new, |c| c.to_string()))
        }
        Builtins::StringCharCodeAt => {
            let index = interp.to_number(arg(0))?;
            let picked = if index.fract() == 0.0 && index >= 0.0 {
                text.chars().nth(index as usize)
            } else {
                None
            };
            Ok(Value::Number(picked.map_or(f64::NAN, |c| f64::from(c as u32))))
        }
        Builtins::StringIndexOf => {
            let needle = interp.to_js_string(arg(0))?;
            match text.find(&needle) {
                Some(byte_pos) => {
                    let char_pos = text[..byte_pos].chars().count();
                    Ok(Value::Number(char_pos as f64))
                }
                None => Ok(Value::Number(-1.0)),
            }
        }
        Builtins::StringSlice | Builtins::StringSubstring => {
            let length = text.chars().count();
            let mut start = index_arg(interp, arg(0), length, builtin)?;
            let mut end = match args.get(1) {
                Some(&end) if !matches!(end, Value::Undefined) => index_arg(interp, end, length, builtin)?,
                _ => length,
            };
            if builtin == Builtins::StringSubstring && start > end {
                std::mem::swap(&mut start, &mut end);
            }
            let out: String = if start < end {
                text.chars().skip(start).take(end - start).collect()
            } else {
                String::new()
            };
            interp.string_value(out)
        }
        Builtins::StringToUpperCase => interp.string_value(text.to_uppercase()),
        Builtins::StringToLowerCase => interp.string_value(text.to_lowercase()),
        Builtins::StringTrim => interp.string_value(text.trim().to_owned()),
        _ => Err(JsError::internal("misrouted string builtin").into()),
    }
}

/// Slice/substring index conversion. `slice` lets negatives count from the
/// end; `substring` clamps them to zero.
fn index_arg<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    value: Value,
    length: usize,
    builtin: Builtins,
) -> RunResult<usize> {
    let n = interp.to_number(value)?;
    if n.is_nan() {
        return Ok(0);
    }
    if n < 0.0 {
        if builtin == Builtins::StringSlice {
            Ok(length.saturating_sub((-n) as usize))
        } else {
            Ok(0)
        }
    } else {
        Ok((n as usize).min(length))
    }
}
