//! Built-in functions and objects.
//!
//! Every native function is a variant of [`Builtins`] — an immediate,
//! copyable value — dispatched through one match. Constructors that carry
//! static properties (`Object`, `Array`, `Error`, ...) are installed as
//! heap objects of kind `Native` wrapping their variant. `install` builds
//! the shared prototype set and the global object once per VM.

pub(crate) mod array;
pub(crate) mod global;
pub(crate) mod math;
pub(crate) mod promise;
pub(crate) mod regexp;
pub(crate) mod string;

use strum::IntoStaticStr;

use crate::{
    bytecode::vm::Interp,
    error::{JsError, JsErrorKind, RunResult},
    heap::{Heap, HeapId},
    intern::StaticStrings,
    io::PrintWriter,
    tracer::VmTracer,
    types::{JsObject, ObjectKind, PromiseData, Property},
    value::Value,
};

/// Shared prototype objects, installed once per VM and reachable from every
/// clone. Marked `shared`; property stores go through the normal write path
/// of whichever heap copy the clone owns.
#[derive(Debug, Clone)]
pub(crate) struct Prototypes {
    pub object: HeapId,
    pub function: HeapId,
    pub array: HeapId,
    pub string: HeapId,
    pub number: HeapId,
    pub boolean: HeapId,
    pub regexp: HeapId,
    pub date: HeapId,
    pub promise: HeapId,
    pub error: HeapId,
    pub eval_error: HeapId,
    pub internal_error: HeapId,
    pub range_error: HeapId,
    pub reference_error: HeapId,
    pub syntax_error: HeapId,
    pub type_error: HeapId,
    pub uri_error: HeapId,
}

impl Prototypes {
    pub fn error_proto(&self, kind: JsErrorKind) -> HeapId {
        match kind {
            JsErrorKind::EvalError => self.eval_error,
            JsErrorKind::InternalError | JsErrorKind::MemoryError => self.internal_error,
            JsErrorKind::RangeError => self.range_error,
            JsErrorKind::ReferenceError => self.reference_error,
            JsErrorKind::SyntaxError => self.syntax_error,
            JsErrorKind::TypeError => self.type_error,
            JsErrorKind::UriError => self.uri_error,
            JsErrorKind::Error => self.error,
        }
    }
}

/// Every native function the engine exposes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "camelCase")]
pub(crate) enum Builtins {
    Print,
    ParseInt,
    ParseFloat,
    IsNaN,
    IsFinite,
    #[strum(serialize = "encodeURIComponent")]
    EncodeUriComponent,
    #[strum(serialize = "decodeURIComponent")]
    DecodeUriComponent,
    SetTimeout,
    ClearTimeout,

    #[strum(serialize = "Object")]
    ObjectCtor,
    ObjectKeys,
    ObjectGetPrototypeOf,
    HasOwnProperty,
    ObjectToString,

    FunctionCall,
    FunctionApply,

    #[strum(serialize = "Array")]
    ArrayCtor,
    ArrayIsArray,
    ArrayPush,
    ArrayPop,
    ArrayJoin,
    ArraySlice,
    ArrayIndexOf,
    ArrayConcat,
    ArrayForEach,
    ArrayMap,

    #[strum(serialize = "String")]
    StringCtor,
    StringSplit,
    StringCharAt,
    StringCharCodeAt,
    StringIndexOf,
    StringSlice,
    StringSubstring,
    StringToUpperCase,
    StringToLowerCase,
    StringTrim,

    #[strum(serialize = "Number")]
    NumberCtor,
    NumberToString,
    NumberToFixed,

    #[strum(serialize = "Boolean")]
    BooleanCtor,

    MathFloor,
    MathCeil,
    MathRound,
    MathAbs,
    MathMax,
    MathMin,
    MathPow,
    MathSqrt,
    MathRandom,

    #[strum(serialize = "Date")]
    DateCtor,
    DateNow,
    DateGetTime,

    JsonParse,
    JsonStringify,

    #[strum(serialize = "RegExp")]
    RegExpCtor,
    RegExpExec,
    RegExpTest,

    #[strum(serialize = "Promise")]
    PromiseCtor,
    PromiseResolveStatic,
    PromiseRejectStatic,
    PromiseThen,
    PromiseCatch,

    #[strum(serialize = "Error")]
    ErrorCtor,
    #[strum(serialize = "EvalError")]
    EvalErrorCtor,
    #[strum(serialize = "InternalError")]
    InternalErrorCtor,
    #[strum(serialize = "RangeError")]
    RangeErrorCtor,
    #[strum(serialize = "ReferenceError")]
    ReferenceErrorCtor,
    #[strum(serialize = "SyntaxError")]
    SyntaxErrorCtor,
    #[strum(serialize = "TypeError")]
    TypeErrorCtor,
    #[strum(serialize = "URIError")]
    UriErrorCtor,
    ErrorToString,

    /// `eval` parses nothing; see DESIGN.md.
    Eval,
}

impl Builtins {
    pub(crate) fn name(self) -> &'static str {
        self.into()
    }

    fn error_kind(self) -> Option<JsErrorKind> {
        Some(match self {
            Self::ErrorCtor => JsErrorKind::Error,
            Self::EvalErrorCtor => JsErrorKind::EvalError,
            Self::InternalErrorCtor => JsErrorKind::InternalError,
            Self::RangeErrorCtor => JsErrorKind::RangeError,
            Self::ReferenceErrorCtor => JsErrorKind::ReferenceError,
            Self::SyntaxErrorCtor => JsErrorKind::SyntaxError,
            Self::TypeErrorCtor => JsErrorKind::TypeError,
            Self::UriErrorCtor => JsErrorKind::UriError,
            _ => return None,
        })
    }
}

/// Calls a native function.
pub(crate) fn call<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    builtin: Builtins,
    this: Value,
    args: &[Value],
) -> RunResult<Value> {
    use Builtins as B;
    let arg = |i: usize| args.get(i).copied().unwrap_or(Value::Undefined);
    match builtin {
        B::Print | B::ParseInt | B::ParseFloat | B::IsNaN | B::IsFinite | B::EncodeUriComponent
        | B::DecodeUriComponent | B::SetTimeout | B::ClearTimeout | B::Eval => {
            global::call(interp, builtin, args)
        }

        B::ObjectCtor => match arg(0) {
            Value::Undefined | Value::Null => {
                let id = interp.heap.alloc_object(JsObject::plain(Some(interp.protos.object)))?;
                Ok(Value::Ref(id))
            }
            value => Ok(value),
        },
        B::ObjectKeys => {
            let keys = interp.enumerate_own_keys(arg(0))?;
            let mut elements = Vec::with_capacity(keys.len());
            for key in keys {
                elements.push(interp.string_value(key)?);
            }
            let id = interp
                .heap
                .alloc_object(JsObject::array(elements, Some(interp.protos.array)))?;
            Ok(Value::Ref(id))
        }
        B::ObjectGetPrototypeOf => match arg(0) {
            Value::Ref(id) => match interp.heap.try_object(id).and_then(|o| o.proto) {
                Some(proto) => Ok(Value::Ref(proto)),
                None => Ok(Value::Null),
            },
            _ => Ok(Value::Null),
        },
        B::HasOwnProperty => {
            let key = interp.to_js_string(arg(0))?;
            match this {
                Value::Ref(id) => {
                    let owned = interp.heap.try_object(id).is_some_and(|o| {
                        o.own(&key).is_some()
                            || o.elements()
                                .zip(key.parse::<usize>().ok())
                                .is_some_and(|(elements, index)| {
                                    index < elements.len() && !matches!(elements[index], Value::Hole)
                                })
                    });
                    Ok(Value::Bool(owned))
                }
                _ => Ok(Value::Bool(false)),
            }
        }
        B::ObjectToString => {
            let text = match this {
                Value::Ref(id) if interp.heap.try_object(id).is_some_and(|o| o.elements().is_some()) => {
                    "[object Array]"
                }
                Value::Ref(id) if interp.heap.try_object(id).is_some_and(JsObject::is_callable) => "[object Function]",
                Value::Null => "[object Null]",
                Value::Undefined => "[object Undefined]",
                _ => "[object Object]",
            };
            interp.string_value(text.to_owned())
        }

        B::FunctionCall => {
            let bound_this = arg(0);
            let rest: Vec<Value> = args.iter().skip(1).copied().collect();
            interp.call_function(this, bound_this, &rest)
        }
        B::FunctionApply => {
            let bound_this = arg(0);
            let rest: Vec<Value> = match arg(1) {
                Value::Ref(id) => interp
                    .heap
                    .try_object(id)
                    .and_then(|o| o.elements().cloned())
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            interp.call_function(this, bound_this, &rest)
        }

        B::ArrayCtor
        | B::ArrayIsArray
        | B::ArrayPush
        | B::ArrayPop
        | B::ArrayJoin
        | B::ArraySlice
        | B::ArrayIndexOf
        | B::ArrayConcat
        | B::ArrayForEach
        | B::ArrayMap => array::call(interp, builtin, this, args),

        B::StringCtor
        | B::StringSplit
        | B::StringCharAt
        | B::StringCharCodeAt
        | B::StringIndexOf
        | B::StringSlice
        | B::StringSubstring
        | B::StringToUpperCase
        | B::StringToLowerCase
        | B::StringTrim => string::call(interp, builtin, this, args),

        B::NumberCtor => {
            if args.is_empty() {
                Ok(Value::Number(0.0))
            } else {
                Ok(Value::Number(interp.to_number(arg(0))?))
            }
        }
        B::NumberToString => {
            let n = interp.to_number(this)?;
            match args.first() {
                None => interp.string_value(crate::bytecode::vm::ops::number_to_string(n)),
                Some(&radix) => {
                    let radix = interp.to_number(radix)? as u32;
                    if !(2..=36).contains(&radix) {
                        return Err(JsError::range("radix must be between 2 and 36").into());
                    }
                    interp.string_value(format_radix(n, radix))
                }
            }
        }
        B::NumberToFixed => {
            let n = interp.to_number(this)?;
            let digits = interp.to_number(arg(0))? as usize;
            if digits > 100 {
                return Err(JsError::range("digits must be between 0 and 100").into());
            }
            interp.string_value(format!("{n:.digits$}"))
        }

        B::BooleanCtor => Ok(Value::Bool(interp.truthy(arg(0)))),

        B::MathFloor | B::MathCeil | B::MathRound | B::MathAbs | B::MathMax | B::MathMin | B::MathPow
        | B::MathSqrt | B::MathRandom => math::call(interp, builtin, args),

        B::DateCtor => {
            let now = chrono::Utc::now().timestamp_millis() as f64;
            interp.string_value(format!("[date {now}]"))
        }
        B::DateNow => Ok(Value::Number(chrono::Utc::now().timestamp_millis() as f64)),
        B::DateGetTime => match this {
            Value::Ref(id) => match interp.heap.try_object(id).map(|o| &o.kind) {
                Some(ObjectKind::Date(ms)) => Ok(Value::Number(*ms)),
                _ => Err(JsError::type_error("getTime called on a non-Date receiver").into()),
            },
            _ => Err(JsError::type_error("getTime called on a non-Date receiver").into()),
        },

        B::JsonParse => crate::json::parse(interp, arg(0)),
        B::JsonStringify => crate::json::stringify(interp, arg(0)),

        B::RegExpCtor | B::RegExpExec | B::RegExpTest => regexp::call(interp, builtin, this, args),

        B::PromiseCtor => Err(JsError::type_error("Promise constructor requires new").into()),
        B::PromiseResolveStatic => {
            let promise = promise::new_promise(interp)?;
            promise::resolve_with(interp, promise, arg(0))?;
            Ok(Value::Ref(promise))
        }
        B::PromiseRejectStatic => {
            let promise = promise::new_promise(interp)?;
            promise::settle(interp, promise, arg(0), true)?;
            Ok(Value::Ref(promise))
        }
        B::PromiseThen => promise::then(interp, this, arg(0), arg(1)),
        B::PromiseCatch => promise::then(interp, this, Value::Undefined, arg(0)),

        B::ErrorCtor
        | B::EvalErrorCtor
        | B::InternalErrorCtor
        | B::RangeErrorCtor
        | B::ReferenceErrorCtor
        | B::SyntaxErrorCtor
        | B::TypeErrorCtor
        | B::UriErrorCtor => construct(interp, builtin, args),
        B::ErrorToString => {
            let text = match this {
                Value::Ref(_) => {
                    let name = interp
                        .get_property(this, "name")?
                        .map_or_else(|| "Error".to_owned(), |v| interp.to_display_string(v));
                    let message = interp
                        .get_property(this, "message")?
                        .map_or_else(String::new, |v| interp.to_display_string(v));
                    if message.is_empty() { name } else { format!("{name}: {message}") }
                }
                _ => "Error".to_owned(),
            };
            interp.string_value(text)
        }
    }
}

/// `new` on a native constructor.
pub(crate) fn construct<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    builtin: Builtins,
    args: &[Value],
) -> RunResult<Value> {
    use Builtins as B;
    let arg = |i: usize| args.get(i).copied().unwrap_or(Value::Undefined);
    if let Some(kind) = builtin.error_kind() {
        let message = if args.is_empty() {
            String::new()
        } else {
            interp.to_js_string(arg(0))?
        };
        let mut error = JsError::new(kind, message);
        error.line = Some(interp.current_line());
        return interp.create_error_object(&error);
    }
    match builtin {
        B::ObjectCtor => call(interp, B::ObjectCtor, Value::Undefined, args),
        B::ArrayCtor => array::call(interp, B::ArrayCtor, Value::Undefined, args),
        B::StringCtor | B::NumberCtor | B::BooleanCtor => call(interp, builtin, Value::Undefined, args),
        B::DateCtor => {
            let ms = if args.is_empty() {
                chrono::Utc::now().timestamp_millis() as f64
            } else {
                interp.to_number(arg(0))?
            };
            let obj = JsObject::new(ObjectKind::Date(ms), Some(interp.protos.date));
            Ok(Value::Ref(interp.heap.alloc_object(obj)?))
        }
        B::RegExpCtor => regexp::call(interp, B::RegExpCtor, Value::Undefined, args),
        B::PromiseCtor => promise::construct(interp, arg(0)),
        _ => Err(JsError::type_error(format!("{} is not a constructor", builtin.name())).into()),
    }
}

fn format_radix(n: f64, radix: u32) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if !n.is_finite() {
        return if n > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() };
    }
    let negative = n < 0.0;
    let mut value = n.abs().trunc() as u64;
    let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(digits[(value % u64::from(radix)) as usize]);
        value /= u64::from(radix);
        if value == 0 {
            break;
        }
    }
    if negative {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8(out).expect("radix digits are ASCII")
}

/// Builds the prototype set and the global object in a fresh heap, and
/// gives the heap's immortal MemoryError singleton its identity.
pub(crate) fn install(heap: &mut Heap) -> RunResult<(Prototypes, HeapId)> {
    use Builtins as B;

    let object = heap.alloc_object(JsObject::plain(None))?;
    let function = heap.alloc_object(JsObject::plain(Some(object)))?;
    let array = heap.alloc_object(JsObject::plain(Some(object)))?;
    let string = heap.alloc_object(JsObject::plain(Some(object)))?;
    let number = heap.alloc_object(JsObject::plain(Some(object)))?;
    let boolean = heap.alloc_object(JsObject::plain(Some(object)))?;
    let regexp = heap.alloc_object(JsObject::plain(Some(object)))?;
    let date = heap.alloc_object(JsObject::plain(Some(object)))?;
    let promise_proto = heap.alloc_object(JsObject::plain(Some(object)))?;
    let error = heap.alloc_object(JsObject::plain(Some(object)))?;

    let sub_error = |heap: &mut Heap, name: &str| -> RunResult<HeapId> {
        let id = heap.alloc_object(JsObject::plain(Some(error)))?;
        let name_str = heap.alloc_str(name.to_owned())?;
        let obj = heap.object_mut(id);
        obj.define("name", Property::hidden(Value::Ref(name_str)));
        obj.shared = true;
        Ok(id)
    };
    let eval_error = sub_error(heap, "EvalError")?;
    let internal_error = sub_error(heap, "InternalError")?;
    let range_error = sub_error(heap, "RangeError")?;
    let reference_error = sub_error(heap, "ReferenceError")?;
    let syntax_error = sub_error(heap, "SyntaxError")?;
    let type_error = sub_error(heap, "TypeError")?;
    let uri_error = sub_error(heap, "URIError")?;

    let protos = Prototypes {
        object,
        function,
        array,
        string,
        number,
        boolean,
        regexp,
        date,
        promise: promise_proto,
        error,
        eval_error,
        internal_error,
        range_error,
        reference_error,
        syntax_error,
        type_error,
        uri_error,
    };

    let method = |heap: &mut Heap, id: HeapId, name: &str, builtin: B| {
        heap.object_mut(id).define(name, Property::hidden(Value::Builtin(builtin)));
    };

    method(heap, object, "hasOwnProperty", B::HasOwnProperty);
    method(heap, object, "toString", B::ObjectToString);

    method(heap, function, "call", B::FunctionCall);
    method(heap, function, "apply", B::FunctionApply);

    method(heap, array, "push", B::ArrayPush);
    method(heap, array, "pop", B::ArrayPop);
    method(heap, array, "join", B::ArrayJoin);
    method(heap, array, "slice", B::ArraySlice);
    method(heap, array, "indexOf", B::ArrayIndexOf);
    method(heap, array, "concat", B::ArrayConcat);
    method(heap, array, "forEach", B::ArrayForEach);
    method(heap, array, "map", B::ArrayMap);

    method(heap, string, "split", B::StringSplit);
    method(heap, string, "charAt", B::StringCharAt);
    method(heap, string, "charCodeAt", B::StringCharCodeAt);
    method(heap, string, "indexOf", B::StringIndexOf);
    method(heap, string, "slice", B::StringSlice);
    method(heap, string, "substring", B::StringSubstring);
    method(heap, string, "toUpperCase", B::StringToUpperCase);
    method(heap, string, "toLowerCase", B::StringToLowerCase);
    method(heap, string, "trim", B::StringTrim);

    method(heap, number, "toString", B::NumberToString);
    method(heap, number, "toFixed", B::NumberToFixed);

    method(heap, regexp, "exec", B::RegExpExec);
    method(heap, regexp, "test", B::RegExpTest);

    method(heap, date, "getTime", B::DateGetTime);

    method(heap, promise_proto, "then", B::PromiseThen);
    method(heap, promise_proto, "catch", B::PromiseCatch);

    method(heap, error, "toString", B::ErrorToString);
    {
        let name_str = heap.alloc_str("Error".to_owned())?;
        let empty = heap.alloc_str(String::new())?;
        let obj = heap.object_mut(error);
        obj.define("name", Property::hidden(Value::Ref(name_str)));
        obj.define("message", Property::hidden(Value::Ref(empty)));
    }

    for id in [object, function, array, string, number, boolean, regexp, date, promise_proto, error] {
        heap.object_mut(id).shared = true;
    }

    // The global object.
    let global = heap.alloc_object(JsObject::plain(Some(object)))?;
    let bind = |heap: &mut Heap, name: &str, value: Value| {
        heap.object_mut(global).define(name, Property::hidden(value));
    };

    bind(heap, "undefined", Value::Undefined);
    bind(heap, "NaN", Value::Number(f64::NAN));
    bind(heap, "Infinity", Value::Number(f64::INFINITY));
    bind(heap, "globalThis", Value::Ref(global));

    for builtin in [
        B::Print,
        B::ParseInt,
        B::ParseFloat,
        B::IsNaN,
        B::IsFinite,
        B::EncodeUriComponent,
        B::DecodeUriComponent,
        B::SetTimeout,
        B::ClearTimeout,
        B::Eval,
    ] {
        bind(heap, builtin.name(), Value::Builtin(builtin));
    }

    // Constructor objects carrying statics and a `prototype` link.
    let ctor = |heap: &mut Heap, builtin: B, proto: HeapId| -> RunResult<HeapId> {
        let id = heap.alloc_object(JsObject::new(ObjectKind::Native(builtin), Some(function)))?;
        heap.object_mut(id).define("prototype", Property::hidden(Value::Ref(proto)));
        heap.object_mut(id).shared = true;
        heap.object_mut(proto).define("constructor", Property::hidden(Value::Ref(id)));
        heap.object_mut(global).define(builtin.name(), Property::hidden(Value::Ref(id)));
        Ok(id)
    };

    let object_ctor = ctor(heap, B::ObjectCtor, object)?;
    method(heap, object_ctor, "keys", B::ObjectKeys);
    method(heap, object_ctor, "getPrototypeOf", B::ObjectGetPrototypeOf);

    let array_ctor = ctor(heap, B::ArrayCtor, array)?;
    method(heap, array_ctor, "isArray", B::ArrayIsArray);

    ctor(heap, B::StringCtor, string)?;
    ctor(heap, B::NumberCtor, number)?;
    ctor(heap, B::BooleanCtor, boolean)?;
    ctor(heap, B::RegExpCtor, regexp)?;

    let date_ctor = ctor(heap, B::DateCtor, date)?;
    method(heap, date_ctor, "now", B::DateNow);

    let promise_ctor = ctor(heap, B::PromiseCtor, promise_proto)?;
    method(heap, promise_ctor, "resolve", B::PromiseResolveStatic);
    method(heap, promise_ctor, "reject", B::PromiseRejectStatic);

    ctor(heap, B::ErrorCtor, error)?;
    ctor(heap, B::EvalErrorCtor, eval_error)?;
    ctor(heap, B::InternalErrorCtor, internal_error)?;
    ctor(heap, B::RangeErrorCtor, range_error)?;
    ctor(heap, B::ReferenceErrorCtor, reference_error)?;
    ctor(heap, B::SyntaxErrorCtor, syntax_error)?;
    ctor(heap, B::TypeErrorCtor, type_error)?;
    ctor(heap, B::UriErrorCtor, uri_error)?;

    // Math and JSON are plain namespace objects.
    let math = heap.alloc_object(JsObject::plain(Some(object)))?;
    for (name, builtin) in [
        ("floor", B::MathFloor),
        ("ceil", B::MathCeil),
        ("round", B::MathRound),
        ("abs", B::MathAbs),
        ("max", B::MathMax),
        ("min", B::MathMin),
        ("pow", B::MathPow),
        ("sqrt", B::MathSqrt),
        ("random", B::MathRandom),
    ] {
        method(heap, math, name, builtin);
    }
    heap.object_mut(math).shared = true;
    bind(heap, "Math", Value::Ref(math));

    let json = heap.alloc_object(JsObject::plain(Some(object)))?;
    method(heap, json, "parse", B::JsonParse);
    method(heap, json, "stringify", B::JsonStringify);
    heap.object_mut(json).shared = true;
    bind(heap, "JSON", Value::Ref(json));

    // The MemoryError singleton lives in the heap's immortal field, not the
    // arena; give it its prototype link and interned identity here so the
    // out-of-memory path never allocates anything.
    {
        let singleton = heap.object_mut(HeapId::MEMORY_ERROR);
        singleton.proto = Some(internal_error);
        singleton.define("name", Property::hidden(Value::Str(StaticStrings::MemoryError.id())));
        singleton.define("message", Property::hidden(Value::Str(StaticStrings::OutOfMemory.id())));
    }

    Ok((protos, global))
}

/// Promise state constructor used by `install`-independent call sites.
pub(crate) fn pending_promise(proto: HeapId) -> JsObject {
    JsObject::new(ObjectKind::Promise(PromiseData::pending()), Some(proto))
}
