//! Builder for emitting bytecode during generation.
//!
//! `CodeBuilder` encodes opcodes and 32-bit operands, manages forward jumps
//! that need patching once their target is known, collects exception-handler
//! ranges, and records source locations for backtraces.

use super::{
    code::{Code, LocationEntry, TryEntry},
    op::Opcode,
};
use crate::{scope::SlotIndex, value::Value};

/// Label for a forward jump that needs patching.
///
/// Stores the byte offset of the displacement field. Pass it to
/// `patch_jump()` once the target location is known.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JumpLabel(usize);

/// Builder for one lambda's code object.
#[derive(Debug, Default)]
pub(crate) struct CodeBuilder {
    bytecode: Vec<u8>,
    constants: Vec<Value>,
    try_table: Vec<TryEntry>,
    locations: Vec<LocationEntry>,
    current_line: u32,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source line recorded for subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    /// Current bytecode offset; use to record loop heads and try ranges.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.bytecode.len()
    }

    fn start_instruction(&mut self, op: Opcode) {
        let offset = u32::try_from(self.bytecode.len()).expect("bytecode length exceeds u32");
        if self.locations.last().is_none_or(|e| e.line != self.current_line) {
            self.locations.push(LocationEntry {
                offset,
                line: self.current_line,
            });
        }
        self.bytecode.push(op as u8);
    }

    fn push_u32(&mut self, operand: u32) {
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
    }

    fn push_slot(&mut self, slot: SlotIndex) {
        self.push_u32(slot.raw());
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        debug_assert!(op.operands().is_empty());
        self.start_instruction(op);
    }

    /// Emits `op slot` (LoadUndefined, Return, Throw, ...).
    pub fn emit_s(&mut self, op: Opcode, a: SlotIndex) {
        self.start_instruction(op);
        self.push_slot(a);
    }

    /// Emits `op slot, slot`.
    pub fn emit_ss(&mut self, op: Opcode, a: SlotIndex, b: SlotIndex) {
        self.start_instruction(op);
        self.push_slot(a);
        self.push_slot(b);
    }

    /// Emits `op slot, slot, slot` — the dominant three-operand form.
    pub fn emit_sss(&mut self, op: Opcode, a: SlotIndex, b: SlotIndex, c: SlotIndex) {
        self.start_instruction(op);
        self.push_slot(a);
        self.push_slot(b);
        self.push_slot(c);
    }

    /// Emits `op slot, imm` (LoadConst, ArrayNew, FunctionNew, ...).
    pub fn emit_su(&mut self, op: Opcode, a: SlotIndex, imm: u32) {
        self.start_instruction(op);
        self.push_slot(a);
        self.push_u32(imm);
    }

    /// Emits `op imm, slot` (SetGlobal).
    pub fn emit_us(&mut self, op: Opcode, imm: u32, a: SlotIndex) {
        self.start_instruction(op);
        self.push_u32(imm);
        self.push_slot(a);
    }

    /// Emits `Call dst, func, base, argc`.
    pub fn emit_call(&mut self, dst: SlotIndex, func: SlotIndex, base: u32, argc: u32) {
        self.start_instruction(Opcode::Call);
        self.push_slot(dst);
        self.push_slot(func);
        self.push_u32(base);
        self.push_u32(argc);
    }

    /// Emits `CallMethod dst, func, this, base, argc`.
    pub fn emit_call_method(&mut self, dst: SlotIndex, func: SlotIndex, this: SlotIndex, base: u32, argc: u32) {
        self.start_instruction(Opcode::CallMethod);
        self.push_slot(dst);
        self.push_slot(func);
        self.push_slot(this);
        self.push_u32(base);
        self.push_u32(argc);
    }

    /// Emits `New dst, ctor, base, argc`.
    pub fn emit_new(&mut self, dst: SlotIndex, ctor: SlotIndex, base: u32, argc: u32) {
        self.start_instruction(Opcode::New);
        self.push_slot(dst);
        self.push_slot(ctor);
        self.push_u32(base);
        self.push_u32(argc);
    }

    /// Emits a forward jump, returning the label to patch later.
    ///
    /// For conditional jumps, `src` is the tested slot; `Jump` passes None.
    #[must_use]
    pub fn emit_jump(&mut self, op: Opcode, src: Option<SlotIndex>) -> JumpLabel {
        self.start_instruction(op);
        if let Some(slot) = src {
            self.push_slot(slot);
        }
        let label = JumpLabel(self.bytecode.len());
        self.push_u32(0);
        label
    }

    /// Emits `ForInNext dst, iter` with a forward exhausted-jump.
    #[must_use]
    pub fn emit_for_in_next(&mut self, dst: SlotIndex, iter: SlotIndex) -> JumpLabel {
        self.start_instruction(Opcode::ForInNext);
        self.push_slot(dst);
        self.push_slot(iter);
        let label = JumpLabel(self.bytecode.len());
        self.push_u32(0);
        label
    }

    /// Patches a forward jump to land at the current offset.
    ///
    /// # Panics
    /// Panics if the displacement exceeds i32, which would mean a single
    /// function body beyond 2 GiB of bytecode.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = i64::try_from(self.bytecode.len()).expect("bytecode target exceeds i64");
        let base = i64::try_from(label.0 + 4).expect("bytecode label exceeds i64");
        let disp = i32::try_from(target - base).expect("jump displacement exceeds i32");
        self.bytecode[label.0..label.0 + 4].copy_from_slice(&disp.to_le_bytes());
    }

    /// Emits a backward jump to a known target.
    pub fn emit_jump_back(&mut self, op: Opcode, src: Option<SlotIndex>, target: usize) {
        self.start_instruction(op);
        if let Some(slot) = src {
            self.push_slot(slot);
        }
        let base = i64::try_from(self.bytecode.len() + 4).expect("bytecode offset exceeds i64");
        let disp = i32::try_from(i64::try_from(target).expect("target exceeds i64") - base)
            .expect("jump displacement exceeds i32");
        self.bytecode.extend_from_slice(&disp.to_le_bytes());
    }

    /// Adds a constant, reusing an existing equal entry.
    #[must_use]
    pub fn add_const(&mut self, value: Value) -> u32 {
        if let Some(found) = self.constants.iter().position(|existing| *existing == value) {
            return u32::try_from(found).expect("constant pool exceeds u32");
        }
        let idx = u32::try_from(self.constants.len()).expect("constant pool exceeds u32");
        self.constants.push(value);
        idx
    }

    /// Adds an exception-handler range. Call innermost-first.
    pub fn add_try_entry(&mut self, entry: TryEntry) {
        self.try_table.push(entry);
    }

    /// Builds the final Code object.
    #[must_use]
    pub fn build(self) -> Code {
        Code::new(self.bytecode, self.constants, self.try_table, self.locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{Region, SlotIndex};

    fn local(offset: u32) -> SlotIndex {
        SlotIndex::new(Region::Local, offset)
    }

    #[test]
    fn emit_basic() {
        let mut builder = CodeBuilder::new();
        builder.emit_s(Opcode::LoadUndefined, local(0));
        builder.emit_s(Opcode::Return, local(0));
        let code = builder.build();
        assert_eq!(code.bytecode()[0], Opcode::LoadUndefined as u8);
        assert_eq!(code.bytecode().len(), 2 * (1 + 4));
    }

    #[test]
    fn forward_jump_patches_to_here() {
        let mut builder = CodeBuilder::new();
        let jump = builder.emit_jump(Opcode::Jump, None);
        builder.emit_s(Opcode::LoadUndefined, local(0)); // 5 bytes, skipped
        builder.patch_jump(jump);
        builder.emit_s(Opcode::Return, local(0));
        let code = builder.build();
        // Displacement field at offset 1; target is 10; base is 5.
        let disp = i32::from_le_bytes(code.bytecode()[1..5].try_into().unwrap());
        assert_eq!(disp, 5);
    }

    #[test]
    fn backward_jump_displacement() {
        let mut builder = CodeBuilder::new();
        let top = builder.offset();
        builder.emit_s(Opcode::LoadUndefined, local(0));
        builder.emit_jump_back(Opcode::Jump, None, top);
        let code = builder.build();
        let disp = i32::from_le_bytes(code.bytecode()[6..10].try_into().unwrap());
        // Jump sits at offset 5; next instruction would be at 10.
        assert_eq!(disp, -10);
    }

    #[test]
    fn const_dedup() {
        let mut builder = CodeBuilder::new();
        let a = builder.add_const(Value::Number(1.0));
        let b = builder.add_const(Value::Number(2.0));
        let c = builder.add_const(Value::Number(1.0));
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn line_table_records_transitions() {
        let mut builder = CodeBuilder::new();
        builder.set_line(1);
        builder.emit_s(Opcode::LoadUndefined, local(0));
        builder.set_line(2);
        builder.emit_s(Opcode::Return, local(0));
        let code = builder.build();
        assert_eq!(code.line_for(0), 1);
        assert_eq!(code.line_for(5), 2);
    }
}
