//! End-to-end execution tests through the public API.

use lutra::{Engine, EngineOptions, Exception, JsErrorKind, Object};

fn run(source: &str) -> Result<Object, Exception> {
    let mut engine = Engine::new(EngineOptions::default());
    engine.compile(source)?;
    engine.vm()?.start()
}

fn eval(source: &str) -> Object {
    run(source).unwrap()
}

#[test]
fn arithmetic_and_completion_value() {
    assert_eq!(eval("1 + 2"), Object::Number(3.0));
    assert_eq!(eval("2 ** 10"), Object::Number(1024.0));
    assert_eq!(eval("7 % 3"), Object::Number(1.0));
    assert_eq!(eval("1 / 0"), Object::Number(f64::INFINITY));
    assert_eq!(eval("(1 + 2) * 3"), Object::Number(9.0));
    assert_eq!(eval("'a' + 1"), Object::String("a1".to_owned()));
    assert_eq!(eval("'5' * '2'"), Object::Number(10.0));
}

#[test]
fn function_call_squares() {
    assert_eq!(eval("function f(x){return x*x}; f(7)"), Object::Number(49.0));
}

#[test]
fn loop_builds_string() {
    assert_eq!(
        eval("(function(){ var s=''; for(var i=0;i<3;i++) s+=i; return s; })()"),
        Object::String("012".to_owned())
    );
}

#[test]
fn json_parse_and_index() {
    assert_eq!(eval("JSON.parse('{\"a\":[1,2,3]}').a[2]"), Object::Number(3.0));
}

#[test]
fn json_stringify_and_cycles() {
    assert_eq!(
        eval("JSON.stringify({a: [1, 'x'], b: {c: null}})"),
        Object::String("{\"a\":[1,\"x\"],\"b\":{\"c\":null}}".to_owned())
    );
    let result = eval("var a = {}; a.b = a; try { JSON.stringify(a) } catch (e) { e.name }");
    assert_eq!(result, Object::String("TypeError".to_owned()));
}

#[test]
fn type_error_from_null_access() {
    let result = eval("try { null.x } catch(e){ e.name + ':' + e.message.split(' ')[0] }");
    let Object::String(text) = result else { panic!("expected string, got {result:?}") };
    assert!(text.starts_with("TypeError:"), "{text}");
}

#[test]
fn regexp_exec_captures_and_last_index() {
    assert_eq!(
        eval(r"/(\d+)-(\d+)/.exec('v12-34').slice(1)"),
        Object::Array(vec![Object::String("12".to_owned()), Object::String("34".to_owned())])
    );
    // A g-flag regexp advances lastIndex to the byte just past the match.
    assert_eq!(eval(r"var re = /\d+/g; re.exec('a12b'); re.lastIndex"), Object::Number(3.0));
    assert_eq!(eval(r"/x/.test('axb')"), Object::Bool(true));
    assert_eq!(
        eval(r"/(?<y>\d{4})-(\d{2})/.exec('2026-08').groups.y"),
        Object::String("2026".to_owned())
    );
}

#[test]
fn closures_capture_mutable_state() {
    assert_eq!(
        eval(
            "function counter() { var n = 0; return function() { n = n + 1; return n; }; }\n\
             var c = counter();\n\
             c(); c(); c()"
        ),
        Object::Number(3.0)
    );
    // Two closures over the same slot observe each other's writes.
    assert_eq!(
        eval(
            "function pair() { var n = 0; return [function(){ n += 10; }, function(){ return n; }]; }\n\
             var fns = pair(); fns[0](); fns[0](); fns[1]()"
        ),
        Object::Number(20.0)
    );
}

#[test]
fn captured_parameter_is_shared() {
    assert_eq!(
        eval(
            "function make(start) { return function() { start += 1; return start; }; }\n\
             var next = make(5); next(); next()"
        ),
        Object::Number(7.0)
    );
}

#[test]
fn arrow_functions_take_enclosing_this() {
    assert_eq!(
        eval(
            "var obj = { n: 5, get: function() { var f = () => this.n; return f(); } };\n\
             obj.get()"
        ),
        Object::Number(5.0)
    );
    assert_eq!(eval("var f = (a, b) => a + b; f(2, 3)"), Object::Number(5.0));
}

#[test]
fn arguments_object() {
    assert_eq!(
        eval("function f() { return arguments.length + arguments[1]; } f(10, 20, 30)"),
        Object::Number(23.0)
    );
}

#[test]
fn control_flow() {
    assert_eq!(
        eval("var r = ''; switch (2) { case 1: r += 'a'; case 2: r += 'b'; case 3: r += 'c'; break; default: r += 'd'; } r"),
        Object::String("bc".to_owned())
    );
    assert_eq!(
        eval("var r = ''; switch (9) { case 1: r += 'a'; break; default: r += 'd'; } r"),
        Object::String("d".to_owned())
    );
    assert_eq!(
        eval(
            "var s = '';\n\
             outer: for (var i = 0; i < 3; i++) {\n\
               for (var j = 0; j < 3; j++) {\n\
                 if (j > i) continue outer;\n\
                 if (i == 2) break outer;\n\
                 s += '' + i + j;\n\
               }\n\
             }\n\
             s"
        ),
        Object::String("001011".to_owned())
    );
    assert_eq!(eval("var n = 0; do { n++; } while (n < 5); n"), Object::Number(5.0));
}

#[test]
fn for_in_enumerates_insertion_order() {
    assert_eq!(
        eval("var o = {b: 1, a: 2}; var s = ''; for (var k in o) s += k; s"),
        Object::String("ba".to_owned())
    );
    assert_eq!(
        eval("var s = ''; for (var k in [9, 8]) s += k; s"),
        Object::String("01".to_owned())
    );
}

#[test]
fn try_finally_ordering() {
    assert_eq!(
        eval(
            "var s = '';\n\
             function f() {\n\
               try { s += 'a'; return 1; } finally { s += 'b'; }\n\
             }\n\
             f(); s"
        ),
        Object::String("ab".to_owned())
    );
    assert_eq!(
        eval("var s = ''; try { try { throw 1; } finally { s += 'f'; } } catch (e) { s += 'c'; } s"),
        Object::String("fc".to_owned())
    );
}

#[test]
fn exception_unwinding_restores_try_depth() {
    // A throw from three frames deep lands in the catch, and execution
    // continues normally afterwards.
    assert_eq!(
        eval(
            "function deep(n) { if (n == 0) { throw new Error('boom'); } return deep(n - 1); }\n\
             var caught = '';\n\
             try { deep(3); } catch (e) { caught = e.message; }\n\
             caught + ':' + deep.length"
        ),
        Object::String("boom:0".to_owned())
    );
}

#[test]
fn thrown_errors_carry_stack() {
    assert_eq!(
        eval(
            "function inner() { throw new TypeError('bad'); }\n\
             function outer() { inner(); }\n\
             try { outer(); } catch (e) { typeof e.stack }"
        ),
        Object::String("string".to_owned())
    );
}

#[test]
fn uncaught_throw_surfaces_to_embedder() {
    let err = run("function f() { throw new RangeError('too big'); }\nf()").unwrap_err();
    assert_eq!(err.kind, JsErrorKind::RangeError);
    assert_eq!(err.message, "too big");
    assert!(!err.stack.is_empty());
}

#[test]
fn typeof_and_coalesce() {
    assert_eq!(eval("typeof undeclared"), Object::String("undefined".to_owned()));
    assert_eq!(eval("typeof 'x'"), Object::String("string".to_owned()));
    assert_eq!(eval("typeof null"), Object::String("object".to_owned()));
    assert_eq!(eval("typeof print"), Object::String("function".to_owned()));
    assert_eq!(eval("null ?? 'fallback'"), Object::String("fallback".to_owned()));
    assert_eq!(eval("0 ?? 'fallback'"), Object::Number(0.0));
    assert_eq!(eval("var o = null; o?.a"), Object::Undefined);
}

#[test]
fn equality_rules() {
    assert_eq!(eval("1 == '1'"), Object::Bool(true));
    assert_eq!(eval("1 === '1'"), Object::Bool(false));
    assert_eq!(eval("null == undefined"), Object::Bool(true));
    assert_eq!(eval("null === undefined"), Object::Bool(false));
    assert_eq!(eval("NaN == NaN"), Object::Bool(false));
    assert_eq!(eval("'ab' === 'a' + 'b'"), Object::Bool(true));
}

#[test]
fn template_literals() {
    assert_eq!(eval("var x = 6; `${x} * 7 = ${x * 7}`"), Object::String("6 * 7 = 42".to_owned()));
}

#[test]
fn object_and_array_surfaces() {
    assert_eq!(eval("Object.keys({a: 1, b: 2}).join(',')"), Object::String("a,b".to_owned()));
    assert_eq!(eval("[3, 1, 2].indexOf(2)"), Object::Number(2.0));
    assert_eq!(eval("[1, 2].concat([3], 4).length"), Object::Number(4.0));
    assert_eq!(eval("[1, 2, 3].map(function(x) { return x * 2 }).join('-')"), Object::String("2-4-6".to_owned()));
    assert_eq!(eval("({a: 1}).hasOwnProperty('a')"), Object::Bool(true));
    assert_eq!(eval("'k' in {k: 0}"), Object::Bool(true));
    assert_eq!(eval("var o = {a: 1}; delete o.a; 'a' in o"), Object::Bool(false));
    assert_eq!(eval("new Error('x') instanceof Error"), Object::Bool(true));
    assert_eq!(eval("[] instanceof Array"), Object::Bool(true));
}

#[test]
fn accessors_in_literals() {
    assert_eq!(
        eval("var o = { _v: 1, get v() { return this._v * 2; }, set v(x) { this._v = x; } }; o.v = 21; o.v"),
        Object::Number(42.0)
    );
}

#[test]
fn getters_and_prototypes() {
    assert_eq!(
        eval(
            "function Point(x) { this.x = x; }\n\
             Point.prototype.double = function() { return this.x * 2; };\n\
             new Point(21).double()"
        ),
        Object::Number(42.0)
    );
}

#[test]
fn string_methods() {
    assert_eq!(eval("'a,b,c'.split(',')[1]"), Object::String("b".to_owned()));
    assert_eq!(eval("'hello'.toUpperCase()"), Object::String("HELLO".to_owned()));
    assert_eq!(eval("'hello'.slice(-3)"), Object::String("llo".to_owned()));
    assert_eq!(eval("'hello'.substring(3, 1)"), Object::String("el".to_owned()));
    assert_eq!(eval("'abc'.charCodeAt(1)"), Object::Number(98.0));
    assert_eq!(eval("'héllo'.length"), Object::Number(5.0));
    assert_eq!(eval("'héllo'[1]"), Object::String("é".to_owned()));
}

#[test]
fn uri_error_surface() {
    assert_eq!(
        eval("encodeURIComponent('a b')"),
        Object::String("a%20b".to_owned())
    );
    assert_eq!(
        eval("try { decodeURIComponent('%zz') } catch (e) { e.name }"),
        Object::String("URIError".to_owned())
    );
}

#[test]
fn memory_error_is_the_singleton() {
    let mut options = EngineOptions::default();
    options.memory_limit = Some(256 * 1024);
    let mut engine = Engine::new(options);
    engine
        .compile("var s = 'xxxxxxxxxxxxxxxx'; while (true) { s = s + s; }")
        .unwrap();
    let err = engine.vm().unwrap().start().unwrap_err();
    assert_eq!(err.kind, JsErrorKind::MemoryError);
}

#[test]
fn memory_error_is_catchable_and_execution_continues() {
    // Catching the singleton must not wedge the allocator: reporting the
    // failure allocates nothing, and the failed attempt charges nothing.
    let mut options = EngineOptions::default();
    options.memory_limit = Some(256 * 1024);
    let mut engine = Engine::new(options);
    engine
        .compile(
            "var s = 'xxxxxxxxxxxxxxxx';\n\
             var name = '';\n\
             try { while (true) { s = s + s; } } catch (e) { name = e.name; }\n\
             name",
        )
        .unwrap();
    assert_eq!(
        engine.vm().unwrap().start().unwrap(),
        Object::String("MemoryError".to_owned())
    );
}

#[test]
fn sparse_array_write_demotes_without_a_hole_run() {
    assert_eq!(
        eval(
            "var a = [1, 2];\n\
             a[100000] = 9;\n\
             a[100000] + ':' + a.length + ':' + a[1] + ':' + (5 in a ? 'y' : 'n')"
        ),
        Object::String("9:100001:2:n".to_owned())
    );
    // Writes near the end stay dense.
    assert_eq!(eval("var a = [1]; a[3] = 4; a.length + ':' + a[3]"), Object::String("4:4".to_owned()));
}

#[test]
fn prototype_overrides_stay_writable() {
    assert_eq!(
        eval("Array.prototype.first = function() { return this[0]; }; [7, 8].first()"),
        Object::Number(7.0)
    );
}

#[test]
fn deterministic_retval_across_vms() {
    let mut engine = Engine::new(EngineOptions::default());
    engine
        .compile("var a = [1, 2, 3]; function f(n) { return n * a.length; } f(4) + a[0]")
        .unwrap();
    let first = engine.vm().unwrap().start().unwrap();
    let second = engine.vm().unwrap().start().unwrap();
    assert_eq!(first, second);
    assert_eq!(first, Object::Number(13.0));
}

#[test]
fn clone_isolation() {
    let mut engine = Engine::new(EngineOptions::default());
    engine
        .compile("var count = 0; function bump() { count += 1; return count; }")
        .unwrap();
    let mut parent = engine.vm().unwrap();
    parent.start().unwrap();

    let mut clone_a = parent.clone_session();
    let mut clone_b = parent.clone_session();
    assert_eq!(clone_a.call("bump", &[]).unwrap(), Object::Number(1.0));
    assert_eq!(clone_a.call("bump", &[]).unwrap(), Object::Number(2.0));
    assert_eq!(clone_b.call("bump", &[]).unwrap(), Object::Number(1.0));
    // Mutations in clones never escape to the parent or to siblings.
    assert_eq!(parent.value("count").unwrap(), Object::Number(0.0));
}
