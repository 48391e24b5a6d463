//! Bytecode: instruction set, builder, generator, and the virtual machine.
//!
//! - `op` - opcode definitions and the disassembler's operand metadata
//! - `code` - the Code object: bytecode, constants, try table, locations
//! - `builder` - CodeBuilder emitting instructions with jump patching
//! - `compiler` - the AST-to-bytecode generator
//! - `vm` - the register-machine interpreter

pub(crate) use code::Code;
pub(crate) use compiler::generate;
pub(crate) use op::Opcode;

pub(crate) mod builder;
pub(crate) mod code;
pub(crate) mod compiler;
pub(crate) mod op;
pub(crate) mod vm;
