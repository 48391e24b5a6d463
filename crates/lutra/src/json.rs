//! The JSON builtin: parse and stringify bridged over `serde_json`.
//!
//! Object key order is preserved both ways (`preserve_order`), and
//! stringify carries an explicit visited set so cyclic graphs fail with a
//! TypeError instead of recursing forever.

use ahash::AHashSet;

use crate::{
    bytecode::vm::Interp,
    error::{JsError, RunResult},
    heap::HeapId,
    io::PrintWriter,
    tracer::VmTracer,
    types::{JsObject, ObjectKind, Property, PropValue},
    value::Value,
};

/// `JSON.parse(text)`.
pub(crate) fn parse<P: PrintWriter, T: VmTracer>(interp: &mut Interp<'_, P, T>, text: Value) -> RunResult<Value> {
    let text = interp.to_js_string(text)?;
    let parsed: serde_json::Value = serde_json::from_str(&text)
        .map_err(|err| JsError::new(crate::error::JsErrorKind::SyntaxError, format!("JSON.parse: {err}")))?;
    import_json(interp, &parsed)
}

fn import_json<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    json: &serde_json::Value,
) -> RunResult<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => interp.string_value(s.clone())?,
        serde_json::Value::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                let element = import_json(interp, item)?;
                elements.push(element);
            }
            let id = interp
                .heap
                .alloc_object(JsObject::array(elements, Some(interp.protos.array)))?;
            Value::Ref(id)
        }
        serde_json::Value::Object(entries) => {
            let mut obj = JsObject::plain(Some(interp.protos.object));
            for (key, item) in entries {
                let value = import_json(interp, item)?;
                obj.define(key.clone(), Property::data(value));
            }
            Value::Ref(interp.heap.alloc_object(obj)?)
        }
    })
}

/// `JSON.stringify(value)`. Undefined and functions at the top level yield
/// `undefined` rather than a string, matching the built-in.
pub(crate) fn stringify<P: PrintWriter, T: VmTracer>(interp: &mut Interp<'_, P, T>, value: Value) -> RunResult<Value> {
    let mut visited = AHashSet::new();
    match export_json(interp, value, &mut visited)? {
        Some(json) => {
            let text = serde_json::to_string(&json)
                .map_err(|err| JsError::internal(format!("JSON.stringify: {err}")))?;
            interp.string_value(text)
        }
        None => Ok(Value::Undefined),
    }
}

/// Converts to a JSON tree; `None` for values JSON skips (undefined,
/// functions). The visited set rejects cycles.
fn export_json<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    value: Value,
    visited: &mut AHashSet<HeapId>,
) -> RunResult<Option<serde_json::Value>> {
    Ok(match value {
        Value::Undefined | Value::Hole | Value::Builtin(_) => None,
        Value::Null => Some(serde_json::Value::Null),
        Value::Bool(b) => Some(serde_json::Value::Bool(b)),
        Value::Number(n) => Some(match serde_json::Number::from_f64(n) {
            Some(number) => serde_json::Value::Number(number),
            None => serde_json::Value::Null,
        }),
        Value::Str(_) => Some(serde_json::Value::String(interp.to_js_string(value)?)),
        Value::Ref(id) => {
            if interp.value_str(value).is_some() {
                return Ok(Some(serde_json::Value::String(interp.to_js_string(value)?)));
            }
            let Some(obj) = interp.heap.try_object(id) else {
                return Ok(None);
            };
            if obj.is_callable() {
                return Ok(None);
            }
            if !visited.insert(id) {
                return Err(JsError::type_error("converting circular structure to JSON").into());
            }
            let result = match &obj.kind {
                ObjectKind::Array(elements) => {
                    let elements = elements.clone();
                    let mut items = Vec::with_capacity(elements.len());
                    for element in elements {
                        items.push(export_json(interp, element, visited)?.unwrap_or(serde_json::Value::Null));
                    }
                    serde_json::Value::Array(items)
                }
                _ => {
                    let pairs: Vec<(String, Value)> = interp
                        .heap
                        .object(id)
                        .props
                        .iter()
                        .filter(|(_, p)| p.enumerable)
                        .filter_map(|(k, p)| match &p.value {
                            PropValue::Data(v) => Some((k.clone(), *v)),
                            PropValue::Accessor { .. } => None,
                        })
                        .collect();
                    let mut map = serde_json::Map::with_capacity(pairs.len());
                    for (key, item) in pairs {
                        if let Some(exported) = export_json(interp, item, visited)? {
                            map.insert(key, exported);
                        }
                    }
                    serde_json::Value::Object(map)
                }
            };
            visited.remove(&id);
            Some(result)
        }
    })
}
