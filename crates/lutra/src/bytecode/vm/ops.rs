//! The abstract operations: conversions, equality, ordering, typeof.
//!
//! These are methods on the interpreter because most of them need the heap
//! (runtime strings, object payloads) and the intern table.

use crate::{
    error::{JsError, RunResult},
    heap::HeapData,
    io::PrintWriter,
    tracer::VmTracer,
    types::ObjectKind,
    value::Value,
};

use super::Interp;

/// JS number formatting: integers print without a fraction, specials print
/// their names, everything else takes the shortest round-trip form.
pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() };
    }
    if n == 0.0 {
        return "0".to_owned();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        // Safe: magnitude below 1e21 fits i128.
        return format!("{}", n as i128);
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format(n).to_owned()
}

/// ToInt32 per ECMAScript: truncate, wrap modulo 2^32, reinterpret signed.
pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulus = 4_294_967_296.0;
    let mut m = n.trunc() % modulus;
    if m < 0.0 {
        m += modulus;
    }
    let unsigned = m as u32;
    unsigned.cast_signed()
}

/// ToUint32: like ToInt32 but kept unsigned.
pub(crate) fn to_uint32(n: f64) -> u32 {
    to_int32(n).cast_unsigned()
}

/// Numeric string parsing for ToNumber: trimmed, empty is zero, hex/octal/
/// binary prefixes accepted.
pub(crate) fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    if let Some(oct) = trimmed.strip_prefix("0o").or_else(|| trimmed.strip_prefix("0O")) {
        return u64::from_str_radix(oct, 8).map_or(f64::NAN, |v| v as f64);
    }
    if let Some(bin) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        return u64::from_str_radix(bin, 2).map_or(f64::NAN, |v| v as f64);
    }
    if trimmed == "Infinity" || trimmed == "+Infinity" {
        return f64::INFINITY;
    }
    if trimmed == "-Infinity" {
        return f64::NEG_INFINITY;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// Preferred primitive type when converting an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hint {
    Default,
    Number,
}

impl<P: PrintWriter, T: VmTracer> Interp<'_, P, T> {
    /// The text of a string-valued Value, if it is one.
    pub(crate) fn value_str(&self, value: Value) -> Option<&str> {
        match value {
            Value::Str(sid) => Some(self.program.interns.get(sid)),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn is_string(&self, value: Value) -> bool {
        self.value_str(value).is_some()
    }

    /// Allocates a runtime string value.
    pub(crate) fn string_value(&mut self, s: impl Into<String>) -> RunResult<Value> {
        Ok(Value::Ref(self.heap.alloc_str(s.into())?))
    }

    /// ToPrimitive. Heap strings count as primitives already; objects
    /// flatten through their conventional string/number forms.
    pub(crate) fn to_primitive(&mut self, value: Value, hint: Hint) -> RunResult<Value> {
        let Value::Ref(id) = value else {
            return Ok(value.dehole());
        };
        match self.heap.get(id) {
            HeapData::Str(_) | HeapData::Slab(_) => Ok(value),
            HeapData::Object(obj) => match &obj.kind {
                ObjectKind::Date(ms) => {
                    if hint == Hint::Number {
                        Ok(Value::Number(*ms))
                    } else {
                        let text = format!("[date {}]", number_to_string(*ms));
                        self.string_value(text)
                    }
                }
                _ => {
                    let text = self.object_to_display_string(id)?;
                    self.string_value(text)
                }
            },
        }
    }

    /// The conventional primitive string of an object: arrays join with
    /// commas, everything else gets a tag.
    fn object_to_display_string(&mut self, id: crate::heap::HeapId) -> RunResult<String> {
        let obj = self.heap.object(id);
        match &obj.kind {
            ObjectKind::Array(elements) => {
                let elements = elements.clone();
                let mut out = String::new();
                for (i, &element) in elements.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    if !element.is_nullish() {
                        out.push_str(&self.to_js_string(element)?);
                    }
                }
                Ok(out)
            }
            ObjectKind::Function(f) => {
                let name = self.program.interns.get(self.program.lambdas[f.lambda.index()].name);
                Ok(format!("function {name}() {{ }}"))
            }
            ObjectKind::Native(_) | ObjectKind::Bound(_) => Ok("function () { [native code] }".to_owned()),
            ObjectKind::Regexp(re) => Ok(format!("/{}/{}", re.source, re.flags.to_flag_string())),
            ObjectKind::Error(kind) => {
                let kind = *kind;
                let name = self
                    .get_property(Value::Ref(id), "name")?
                    .map_or_else(|| kind.to_string(), |v| self.to_display_string(v));
                let message = self
                    .get_property(Value::Ref(id), "message")?
                    .map_or_else(String::new, |v| self.to_display_string(v));
                if message.is_empty() {
                    Ok(name)
                } else {
                    Ok(format!("{name}: {message}"))
                }
            }
            _ => Ok("[object Object]".to_owned()),
        }
    }

    /// Best-effort display form without further conversion machinery; used
    /// where a conversion error cannot be tolerated.
    pub(crate) fn to_display_string(&self, value: Value) -> String {
        match value {
            Value::Undefined | Value::Hole => "undefined".to_owned(),
            Value::Null => "null".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(n),
            Value::Builtin(b) => format!("function {}() {{ [native code] }}", b.name()),
            _ => self.value_str(value).map_or_else(|| "[object Object]".to_owned(), str::to_owned),
        }
    }

    /// ToString.
    pub(crate) fn to_js_string(&mut self, value: Value) -> RunResult<String> {
        match value {
            Value::Undefined | Value::Hole => Ok("undefined".to_owned()),
            Value::Null => Ok("null".to_owned()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(number_to_string(n)),
            Value::Str(sid) => Ok(self.program.interns.get(sid).to_owned()),
            Value::Builtin(b) => Ok(format!("function {}() {{ [native code] }}", b.name())),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => Ok(s.clone()),
                HeapData::Slab(_) => Err(JsError::internal("slab escaped into a conversion").into()),
                HeapData::Object(_) => {
                    let prim = self.to_primitive(value, Hint::Default)?;
                    match prim {
                        Value::Ref(_) => Ok(self.value_str(prim).unwrap_or("[object Object]").to_owned()),
                        other => self.to_js_string(other),
                    }
                }
            },
        }
    }

    /// ToNumber.
    pub(crate) fn to_number(&mut self, value: Value) -> RunResult<f64> {
        match value {
            Value::Undefined => Ok(f64::NAN),
            Value::Hole => Ok(f64::NAN),
            Value::Null => Ok(0.0),
            Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            Value::Number(n) => Ok(n),
            Value::Str(sid) => Ok(string_to_number(self.program.interns.get(sid))),
            Value::Builtin(_) => Ok(f64::NAN),
            Value::Ref(_) => {
                let prim = self.to_primitive(value, Hint::Number)?;
                match prim {
                    Value::Ref(_) => Ok(self.value_str(prim).map_or(f64::NAN, string_to_number)),
                    other => self.to_number(other),
                }
            }
        }
    }

    /// ToBoolean.
    pub(crate) fn truthy(&self, value: Value) -> bool {
        match value {
            Value::Undefined | Value::Null | Value::Hole => false,
            Value::Bool(b) => b,
            Value::Number(n) => n != 0.0 && !n.is_nan(),
            Value::Str(sid) => !self.program.interns.get(sid).is_empty(),
            Value::Builtin(_) => true,
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => !s.is_empty(),
                _ => true,
            },
        }
    }

    /// The `typeof` operator.
    pub(crate) fn typeof_of(&self, value: Value) -> &'static str {
        match value {
            Value::Undefined | Value::Hole => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Builtin(_) => "function",
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(_) => "string",
                HeapData::Object(obj) if obj.is_callable() => "function",
                _ => "object",
            },
        }
    }

    /// The `+` operator: string concatenation when either primitive side is
    /// a string, numeric addition otherwise.
    pub(crate) fn add_values(&mut self, a: Value, b: Value) -> RunResult<Value> {
        let pa = self.to_primitive(a, Hint::Default)?;
        let pb = self.to_primitive(b, Hint::Default)?;
        if self.is_string(pa) || self.is_string(pb) {
            let mut out = self.to_js_string(pa)?;
            out.push_str(&self.to_js_string(pb)?);
            return self.string_value(out);
        }
        let na = self.to_number(pa)?;
        let nb = self.to_number(pb)?;
        Ok(Value::Number(na + nb))
    }

    /// Strict equality: same type, same value; object identity for refs;
    /// string content for strings wherever they live.
    pub(crate) fn strict_eq(&self, a: Value, b: Value) -> bool {
        if let (Some(sa), Some(sb)) = (self.value_str(a), self.value_str(b)) {
            return sa == sb;
        }
        match (a, b) {
            (Value::Undefined | Value::Hole, Value::Undefined | Value::Hole) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::Builtin(x), Value::Builtin(y)) => x == y,
            (Value::Ref(x), Value::Ref(y)) => x == y,
            _ => false,
        }
    }

    /// Loose equality.
    pub(crate) fn loose_eq(&mut self, a: Value, b: Value) -> RunResult<bool> {
        if a.is_nullish() && b.is_nullish() {
            return Ok(true);
        }
        if a.is_nullish() || b.is_nullish() {
            return Ok(false);
        }
        let a_obj = matches!(a, Value::Ref(_)) && !self.is_string(a);
        let b_obj = matches!(b, Value::Ref(_)) && !self.is_string(b);
        match (a_obj, b_obj) {
            (true, true) => Ok(self.strict_eq(a, b)),
            (true, false) => {
                let pa = self.to_primitive(a, Hint::Default)?;
                self.loose_eq(pa, b)
            }
            (false, true) => {
                let pb = self.to_primitive(b, Hint::Default)?;
                self.loose_eq(a, pb)
            }
            (false, false) => {
                if self.is_string(a) && self.is_string(b) {
                    return Ok(self.strict_eq(a, b));
                }
                match (a, b) {
                    (Value::Bool(_), _) => {
                        let na = self.to_number(a)?;
                        self.loose_eq(Value::Number(na), b)
                    }
                    (_, Value::Bool(_)) => {
                        let nb = self.to_number(b)?;
                        self.loose_eq(a, Value::Number(nb))
                    }
                    (Value::Number(x), Value::Number(y)) => Ok(x == y),
                    _ => {
                        // Number vs string, or mismatched leftovers.
                        let na = self.to_number(a)?;
                        let nb = self.to_number(b)?;
                        Ok(na == nb)
                    }
                }
            }
        }
    }

    /// Relational comparison: strings compare lexicographically, everything
    /// else numerically. Returns None when either side is NaN.
    pub(crate) fn compare_values(&mut self, a: Value, b: Value) -> RunResult<Option<std::cmp::Ordering>> {
        let pa = self.to_primitive(a, Hint::Number)?;
        let pb = self.to_primitive(b, Hint::Number)?;
        if self.is_string(pa) && self.is_string(pb) {
            let sa = self.value_str(pa).expect("checked string");
            let sb = self.value_str(pb).expect("checked string");
            return Ok(Some(sa.cmp(sb)));
        }
        let na = self.to_number(pa)?;
        let nb = self.to_number(pb)?;
        Ok(na.partial_cmp(&nb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting() {
        assert_eq!(number_to_string(49.0), "49");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
    }

    #[test]
    fn int32_wrapping() {
        assert_eq!(to_int32(4_294_967_296.0), 0);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_int32(2_147_483_648.0), -2_147_483_648);
        assert_eq!(to_uint32(-1.0), 4_294_967_295);
    }

    #[test]
    fn string_numbers() {
        assert_eq!(string_to_number("  12 "), 12.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert!(string_to_number("12px").is_nan());
    }
}
