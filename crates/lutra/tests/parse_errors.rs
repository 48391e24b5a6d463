//! Syntax-error reporting through the public API: kinds, messages, lines.

use lutra::{Engine, EngineOptions, Exception, JsErrorKind};

fn compile_err(source: &str) -> Exception {
    let mut engine = Engine::new(EngineOptions::default());
    engine.compile(source).expect_err("expected a compile error")
}

#[test]
fn unexpected_token_names_the_lexeme() {
    let err = compile_err("var x = ;");
    assert_eq!(err.kind, JsErrorKind::SyntaxError);
    assert!(err.message.contains("unexpected token"), "{}", err.message);
    assert!(err.message.contains(';'), "{}", err.message);
}

#[test]
fn errors_carry_the_line_number() {
    let err = compile_err("var a = 1;\nvar b = 2;\nvar c = ;\n");
    assert_eq!(err.line, Some(3));
    let rendered = err.to_string();
    assert!(rendered.contains("main.js:3"), "{rendered}");
}

#[test]
fn unexpected_end_of_input() {
    let err = compile_err("function f() { return 1;");
    assert!(err.message.contains("unexpected end of input"), "{}", err.message);
}

#[test]
fn unterminated_string() {
    let err = compile_err("var s = 'abc\nnext");
    assert!(err.message.contains("unterminated string"), "{}", err.message);
    assert_eq!(err.line, Some(1));
}

#[test]
fn unterminated_template() {
    let err = compile_err("var s = `abc");
    assert!(err.message.contains("unterminated template"), "{}", err.message);
}

#[test]
fn regexp_literal_flags_validated() {
    let err = compile_err("var re = /a/gg;");
    assert!(err.message.contains("duplicate regexp flag"), "{}", err.message);
    let err = compile_err("var re = /a/q;");
    assert!(err.message.contains("invalid regexp flag"), "{}", err.message);
}

#[test]
fn regexp_pattern_validated_against_the_matcher() {
    let err = compile_err("var re = /(unclosed/;");
    assert_eq!(err.kind, JsErrorKind::SyntaxError);
    assert!(err.message.contains("invalid regexp"), "{}", err.message);
}

#[test]
fn numeric_literal_trailers() {
    assert!(compile_err("var n = 0b19;").message.contains("trailer"));
    assert!(compile_err("var n = 0123;").message.contains("octal"));
    assert!(compile_err("var n = 0x;").message.contains("digits"));
}

#[test]
fn return_outside_function() {
    let err = compile_err("return 1;");
    assert!(err.message.contains("return outside of function"), "{}", err.message);
}

#[test]
fn missing_catch_or_finally() {
    let err = compile_err("try { x(); }");
    assert!(err.message.contains("missing catch or finally"), "{}", err.message);
}

#[test]
fn duplicate_switch_default() {
    let err = compile_err("switch (x) { default: break; default: break; }");
    assert!(err.message.contains("duplicate default"), "{}", err.message);
}

#[test]
fn invalid_assignment_target() {
    let err = compile_err("1 = 2;");
    assert!(err.message.contains("left-hand side"), "{}", err.message);
}

#[test]
fn redeclaration_of_lexical_binding() {
    let err = compile_err("let x = 1; let x = 2;");
    assert!(err.message.contains("redeclaration"), "{}", err.message);
    // var/var and var/function redeclaration stay legal.
    let mut engine = Engine::new(EngineOptions::default());
    assert!(engine.compile("var y = 1; var y = 2; function y() {}").is_ok());
}

#[test]
fn unsupported_constructs_fail_cleanly() {
    for source in ["class A {}", "async function f() {}", "var {a} = o;", "with (o) {}"] {
        let err = compile_err(source);
        assert_eq!(err.kind, JsErrorKind::SyntaxError, "{source}");
    }
}

#[test]
fn duplicate_proto_key() {
    let err = compile_err("var o = { __proto__: null, __proto__: null };");
    assert!(err.message.contains("__proto__"), "{}", err.message);
}
