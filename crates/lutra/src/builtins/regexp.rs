//! RegExp builtins over the opaque host matcher.
//!
//! The match interface is byte-based: `index` and `lastIndex` are byte
//! offsets into the subject, and a global regexp's `lastIndex` advances to
//! the byte just past the match.

use std::rc::Rc;

use crate::{
    bytecode::vm::Interp,
    error::{JsError, RunResult},
    io::PrintWriter,
    tracer::VmTracer,
    types::{JsObject, ObjectKind, Property, RegexpFlags, regexp as regexp_types},
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
        Builtins::RegExpCtor => {
            // `RegExp(re)` passes an existing regexp through.
            if args.len() == 1 {
                if let Value::Ref(id) = arg(0) {
                    if matches!(interp.heap.try_object(id).map(|o| &o.kind), Some(ObjectKind::Regexp(_))) {
                        return Ok(arg(0));
                    }
                }
            }
            let source = if args.is_empty() {
                String::new()
            } else {
                interp.to_js_string(arg(0))?
            };
            let flags = match args.get(1) {
                Some(&flags) if !matches!(flags, Value::Undefined) => {
                    let text = interp.to_js_string(flags)?;
                    RegexpFlags::parse(&text, interp.current_line())?
                }
                _ => RegexpFlags::default(),
            };
            let compiled = regexp_types::compile(&source, flags)?;
            let index = u32::try_from(interp.regexps.len()).expect("regexp cache exceeds u32");
            interp.regexps.push(Rc::new(compiled));
            interp.new_regexp_object(source, flags, index)
        }
        Builtins::RegExpExec => exec(interp, this, arg(0)),
        Builtins::RegExpTest => {
            let result = exec(interp, this, arg(0))?;
            Ok(Value::Bool(!matches!(result, Value::Null)))
        }
        _ => Err(JsError::internal("misrouted regexp builtin").into()),
    }
}

/// `re.exec(str)`: a match array with `index`/`input`/`groups`, or null.
fn exec<P: PrintWriter, T: VmTracer>(interp: &mut Interp<'_, P, T>, this: Value, subject: Value) -> RunResult<Value> {
    let Value::Ref(id) = this else {
        return Err(JsError::type_error("receiver is not a RegExp").into());
    };
    let (compiled_index, global) = match interp.heap.try_object(id).map(|o| &o.kind) {
        Some(ObjectKind::Regexp(re)) => (re.compiled, re.flags.global),
        _ => return Err(JsError::type_error("receiver is not a RegExp").into()),
    };
    let text = interp.to_js_string(subject)?;

    let start = if global {
        let last = interp
            .get_property(this, "lastIndex")?
            .map_or(Ok(0.0), |v| interp.to_number(v))?;
        if last < 0.0 || last as usize > text.len() {
            interp.set_property(this, "lastIndex", Value::Number(0.0))?;
            return Ok(Value::Null);
        }
        last as usize
    } else {
        0
    };

    let compiled = interp.regexps[compiled_index as usize].clone();
    let captures = compiled
        .re
        .captures_from_pos(&text, start)
        .map_err(|err| JsError::internal(format!("regexp engine failure: {err}")))?;

    let Some(captures) = captures else {
        if global {
            interp.set_property(this, "lastIndex", Value::Number(0.0))?;
        }
        return Ok(Value::Null);
    };

    let full = captures.get(0).expect("capture 0 always present");
    if global {
        interp.set_property(this, "lastIndex", Value::Number(full.end() as f64))?;
    }

    // The result array: full match, then each capture group.
    let mut elements = Vec::with_capacity(compiled.group_names.len());
    for i in 0..compiled.group_names.len() {
        let element = match captures.get(i) {
            Some(group) => interp.string_value(group.as_str().to_owned())?,
            None => Value::Undefined,
        };
        elements.push(element);
    }
    let result = interp
        .heap
        .alloc_object(JsObject::array(elements, Some(interp.protos.array)))?;

    let input = interp.string_value(text.clone())?;
    interp
        .heap
        .object_mut(result)
        .define("index", Property::data(Value::Number(full.start() as f64)));
    interp.heap.object_mut(result).define("input", Property::data(input));

    // Named groups, when the pattern declares any.
    let groups = named_groups(interp, &compiled, &captures)?;
    interp.heap.object_mut(result).define("groups", Property::data(groups));

    Ok(Value::Ref(result))
}

fn named_groups<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    compiled: &regexp_types::CompiledRegexp,
    captures: &fancy_regex::Captures<'_>,
) -> RunResult<Value> {
    if compiled.group_names.iter().all(Option::is_none) {
        return Ok(Value::Undefined);
    }
    let mut obj = JsObject::plain(Some(interp.protos.object));
    let mut pending: Vec<(String, Option<String>)> = Vec::new();
    for (i, name) in compiled.group_names.iter().enumerate() {
        if let Some(name) = name {
            pending.push((name.clone(), captures.get(i).map(|g| g.as_str().to_owned())));
        }
    }
    for (name, matched) in pending {
        let value = match matched {
            Some(text) => interp.string_value(text)?,
            None => Value::Undefined,
        };
        obj.define(name, Property::data(value));
    }
    Ok(Value::Ref(interp.heap.alloc_object(obj)?))
}
