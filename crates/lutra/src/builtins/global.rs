//! Global functions: print, number parsing, URI coding, timers.

use crate::{
    bytecode::vm::Interp,
    error::{JsError, RunResult},
    event::EventId,
    io::PrintWriter,
    tracer::VmTracer,
    value::Value,
};

use super::Builtins;

pub(crate) fn call<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    builtin: Builtins,
    args: &[Value],
) -> RunResult<Value> {
    let arg = |i: usize| args.get(i).copied().unwrap_or(Value::Undefined);
    match builtin {
        Builtins::Print => {
            let mut line = String::new();
            for (i, &value) in args.iter().enumerate() {
                if i > 0 {
                    line.push(' ');
                }
                line.push_str(&interp.to_js_string(value)?);
            }
            interp.print.print(&line);
            Ok(Value::Undefined)
        }
        Builtins::ParseInt => {
            let text = interp.to_js_string(arg(0))?;
            let radix = match args.get(1) {
                Some(&r) => {
                    let r = interp.to_number(r)? as u32;
                    if r == 0 { None } else { Some(r) }
                }
                None => None,
            };
            Ok(Value::Number(parse_int(&text, radix)))
        }
        Builtins::ParseFloat => {
            let text = interp.to_js_string(arg(0))?;
            Ok(Value::Number(parse_float(&text)))
        }
        Builtins::IsNaN => {
            let n = interp.to_number(arg(0))?;
            Ok(Value::Bool(n.is_nan()))
        }
        Builtins::IsFinite => {
            let n = interp.to_number(arg(0))?;
            Ok(Value::Bool(n.is_finite()))
        }
        Builtins::EncodeUriComponent => {
            let text = interp.to_js_string(arg(0))?;
            interp.string_value(encode_uri_component(&text))
        }
        Builtins::DecodeUriComponent => {
            let text = interp.to_js_string(arg(0))?;
            let decoded = decode_uri_component(&text).ok_or_else(|| JsError::uri("malformed URI sequence"))?;
            interp.string_value(decoded)
        }
        Builtins::SetTimeout => {
            let function = arg(0);
            let delay = if args.len() > 1 { interp.to_number(arg(1))? } else { 0.0 };
            let delay = if delay.is_finite() && delay > 0.0 { delay as u64 } else { 0 };
            let event = interp.events.add(function, true);
            let handle = interp.ops.set_timer(delay, event);
            interp.events.set_host_handle(event, handle);
            Ok(Value::Number(f64::from(event.raw())))
        }
        Builtins::ClearTimeout => {
            let id = interp.to_number(arg(0))?;
            if id.fract() == 0.0 && id >= 0.0 {
                let event = EventId(id as u32);
                if let Some(removed) = interp.events.delete(event) {
                    interp.ops.clear_timer(removed.host_handle);
                }
            }
            Ok(Value::Undefined)
        }
        Builtins::Eval => Err(JsError::internal("eval is not implemented").into()),
        _ => Err(JsError::internal("misrouted global builtin").into()),
    }
}

fn parse_int(text: &str, radix: Option<u32>) -> f64 {
    let mut s = text.trim();
    let mut sign = 1.0;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1.0;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    let radix = match radix {
        Some(r) if !(2..=36).contains(&r) => return f64::NAN,
        Some(16) | None if s.starts_with("0x") || s.starts_with("0X") => {
            s = &s[2..];
            16
        }
        Some(r) => r,
        None => 10,
    };
    let mut value = 0.0;
    let mut seen = false;
    for ch in s.chars() {
        let Some(digit) = ch.to_digit(radix) else { break };
        value = value * f64::from(radix) + f64::from(digit);
        seen = true;
    }
    if seen { sign * value } else { f64::NAN }
}

fn parse_float(text: &str) -> f64 {
    let s = text.trim();
    // Longest numeric prefix.
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let b = bytes[end];
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'+' | b'-' if end == 0 || matches!(bytes[end - 1], b'e' | b'E') => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => {
                seen_exp = true;
                seen_dot = true;
            }
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        if s.starts_with("Infinity") || s.starts_with("+Infinity") {
            return f64::INFINITY;
        }
        if s.starts_with("-Infinity") {
            return f64::NEG_INFINITY;
        }
        return f64::NAN;
    }
    s[..end].parse().unwrap_or(f64::NAN)
}

fn is_uri_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

fn encode_uri_component(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for &byte in text.as_bytes() {
        if is_uri_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_uri_component(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_forms() {
        assert_eq!(parse_int("42px", None), 42.0);
        assert_eq!(parse_int("0x1f", None), 31.0);
        assert_eq!(parse_int("-8", None), -8.0);
        assert_eq!(parse_int("z", Some(36)), 35.0);
        assert!(parse_int("", None).is_nan());
    }

    #[test]
    fn parse_float_prefix() {
        assert_eq!(parse_float("3.25rem"), 3.25);
        assert_eq!(parse_float("  1e3 "), 1000.0);
        assert!(parse_float("abc").is_nan());
    }

    #[test]
    fn uri_round_trip() {
        let encoded = encode_uri_component("a b/ä");
        assert_eq!(encoded, "a%20b%2F%C3%A4");
        assert_eq!(decode_uri_component(&encoded).unwrap(), "a b/ä");
        assert!(decode_uri_component("%zz").is_none());
        assert!(decode_uri_component("%FF").is_none());
    }
}
