//! lutra is an embeddable JavaScript engine: an ES5.1 core with a slice of
//! ES6 (template literals, arrow functions, `let`/`const` syntax, optional
//! chaining, default-only modules), compiled to register bytecode and run by
//! a frame-stack interpreter with a host-driven event loop.
//!
//! The embedding shape is compile-once, run-per-request:
//!
//! ```
//! use lutra::{Engine, EngineOptions, Object};
//!
//! let mut engine = Engine::new(EngineOptions::default());
//! engine.compile("function f(x) { return x * x } f(7)").unwrap();
//! let mut vm = engine.vm().unwrap();
//! assert_eq!(vm.start().unwrap(), Object::Number(49.0));
//! ```
#![expect(dead_code, reason = "embedding surface keeps some currently-unused APIs")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing follows JS conversion rules")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts mirror ToUint32/ToInt32")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the JS bit operators")]
#![expect(clippy::module_name_repetitions, reason = "public names read better fully qualified")]
#![expect(clippy::missing_panics_doc, reason = "internal invariants panic only on engine bugs")]
#![expect(clippy::return_self_not_must_use, reason = "builder-style setters are used for effect")]

mod ast;
mod builtins;
mod bytecode;
mod error;
mod event;
mod heap;
mod intern;
mod io;
mod json;
mod lexer;
mod module;
mod object;
mod parser;
mod run;
mod scope;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    error::{Exception, JsErrorKind, StackFrame},
    event::{EventId, HostOps, NoopOps},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::{InvalidInputError, Object},
    run::{Engine, EngineOptions, ExternalKind, ExternalMethods, ExternalProperty, ExternalProtoId, RunStatus, Vm},
    tracer::{CollectTracer, NoopTracer, VmTracer},
};
