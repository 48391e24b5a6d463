//! The compiled code object: bytecode plus the tables the VM needs around it.

use crate::{
    bytecode::op::{Opcode, Operand},
    intern::Interns,
    scope::SlotIndex,
    value::Value,
};

/// One exception-handler range.
///
/// Entries are stored innermost-first; the unwinder takes the first entry
/// whose range covers the faulting instruction.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub(crate) struct TryEntry {
    /// Start of the protected range (inclusive, byte offset).
    pub start: u32,
    /// End of the protected range (exclusive).
    pub end: u32,
    /// Handler entry point.
    pub target: u32,
    /// Raw slot index receiving the exception value.
    pub slot: u32,
}

impl TryEntry {
    pub fn slot_index(self) -> SlotIndex {
        SlotIndex::from_raw(self.slot)
    }
}

/// Maps a bytecode offset to the source line that produced it.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub(crate) struct LocationEntry {
    pub offset: u32,
    pub line: u32,
}

/// Compiled bytecode for one lambda.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct Code {
    bytecode: Vec<u8>,
    constants: Vec<Value>,
    try_table: Vec<TryEntry>,
    locations: Vec<LocationEntry>,
}

impl Code {
    pub(super) fn new(
        bytecode: Vec<u8>,
        constants: Vec<Value>,
        try_table: Vec<TryEntry>,
        locations: Vec<LocationEntry>,
    ) -> Self {
        Self {
            bytecode,
            constants,
            try_table,
            locations,
        }
    }

    #[inline]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[inline]
    pub fn constant(&self, index: u32) -> Value {
        self.constants[index as usize]
    }

    pub fn try_table(&self) -> &[TryEntry] {
        &self.try_table
    }

    /// The source line of the instruction at `pc`: the last location entry at
    /// or before it.
    pub fn line_for(&self, pc: usize) -> u32 {
        let pc = u32::try_from(pc).unwrap_or(u32::MAX);
        match self.locations.binary_search_by_key(&pc, |e| e.offset) {
            Ok(i) => self.locations[i].line,
            Err(0) => 0,
            Err(i) => self.locations[i - 1].line,
        }
    }

    /// Renders the bytecode as a human-readable listing.
    pub fn disassemble(&self, interns: &Interns, out: &mut String) {
        use std::fmt::Write;
        let mut pc = 0usize;
        while pc < self.bytecode.len() {
            let Some(op) = Opcode::from_repr(self.bytecode[pc]) else {
                let _ = writeln!(out, "{pc:05}  <bad opcode {:#04x}>", self.bytecode[pc]);
                break;
            };
            let _ = write!(out, "{pc:05}  {:<18}", op.name());
            let mut field = pc + 1;
            for (i, kind) in op.operands().iter().enumerate() {
                let raw = u32::from_le_bytes(
                    self.bytecode[field..field + 4].try_into().expect("truncated operand"),
                );
                if i > 0 {
                    let _ = write!(out, ",");
                }
                match kind {
                    Operand::Slot => {
                        let _ = write!(out, " {}", SlotIndex::from_raw(raw));
                    }
                    Operand::Const => {
                        let _ = write!(out, " #{raw}");
                    }
                    Operand::Name => {
                        let _ = write!(out, " \"{}\"", interns.get(crate::intern::StringId::from_raw(raw)));
                    }
                    Operand::Func => {
                        let _ = write!(out, " fn{raw}");
                    }
                    Operand::Lit => {
                        let _ = write!(out, " re{raw}");
                    }
                    Operand::Count => {
                        let _ = write!(out, " {raw}");
                    }
                    Operand::Disp => {
                        let disp = raw.cast_signed();
                        let target = i64::try_from(field + 4).expect("pc exceeds i64") + i64::from(disp);
                        let _ = write!(out, " ->{target:05}");
                    }
                }
                field += 4;
            }
            let _ = writeln!(out);
            pc += op.len();
        }
        for entry in &self.try_table {
            let _ = writeln!(
                out,
                "try    [{:05}..{:05}) -> {:05} slot {}",
                entry.start,
                entry.end,
                entry.target,
                entry.slot_index()
            );
        }
    }
}
