//! Opcode definitions and the disassembler.
//!
//! The instruction set is three-operand register form: every operand is a
//! 32-bit slot index (region + offset, see [`crate::scope::SlotIndex`]) or a
//! 32-bit immediate, encoded little-endian after the opcode byte. There is no
//! implicit operand stack; `dst` always comes first.

use strum::{FromRepr, IntoStaticStr};

/// Operand kinds, used by the disassembler to render instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operand {
    /// A (region, offset) slot index.
    Slot,
    /// Index into the constant pool.
    Const,
    /// Interned string id (property or global name).
    Name,
    /// Lambda index.
    Func,
    /// Regexp-literal index.
    Lit,
    /// Plain count or LOCAL-region base offset.
    Count,
    /// Signed jump displacement relative to the next instruction.
    Disp,
}

/// The instruction set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
pub(crate) enum Opcode {
    Nop,
    /// `Move dst, src`
    Move,
    /// `LoadConst dst, #const`
    LoadConst,
    /// `LoadUndefined dst`
    LoadUndefined,

    /// `GetGlobal dst, name` — global-object lookup; ReferenceError on miss.
    GetGlobal,
    /// `SetGlobal name, src` — creates the binding when absent.
    SetGlobal,
    /// `TypeofGlobal dst, name` — like GetGlobal but yields "undefined" on a
    /// miss instead of throwing.
    TypeofGlobal,
    /// `DeleteGlobal dst, name`
    DeleteGlobal,

    /// `ObjectNew dst`
    ObjectNew,
    /// `ArrayNew dst, capacity`
    ArrayNew,
    /// `ArrayAppend arr, src` — array-literal element push.
    ArrayAppend,
    /// `RegexpNew dst, #literal`
    RegexpNew,
    /// `FunctionNew dst, #lambda` — closes over the current frame chain.
    FunctionNew,

    /// `PropInit obj, key, src` — object-literal property definition.
    PropInit,
    /// `PropInitGetter obj, key, fn`
    PropInitGetter,
    /// `PropInitSetter obj, key, fn`
    PropInitSetter,
    /// `PropGet dst, obj, key`
    PropGet,
    /// `PropSet obj, key, src`
    PropSet,
    /// `PropDelete dst, obj, key`
    PropDelete,
    /// `In dst, key, obj`
    In,
    /// `InstanceOf dst, val, ctor`
    InstanceOf,

    /// `Add dst, a, b` — numeric addition or string concatenation.
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Ushr,
    /// Loose equality.
    Eq,
    Neq,
    StrictEq,
    StrictNeq,
    Lt,
    Lte,
    Gt,
    Gte,

    /// `Neg dst, src`
    Neg,
    /// `ToNumber dst, src` — unary plus; also the old-value capture of the
    /// update operators.
    ToNumber,
    /// `ToString dst, src` — template-literal piece conversion.
    ToString,
    BitNot,
    Not,
    /// `Typeof dst, src`
    Typeof,

    /// `Jump disp`
    Jump,
    /// `JumpIfTruthy src, disp`
    JumpIfTruthy,
    /// `JumpIfFalsy src, disp`
    JumpIfFalsy,
    /// `JumpIfNullish src, disp` — optional chaining.
    JumpIfNullish,
    /// `JumpIfNotNullish src, disp` — `??` short-circuit.
    JumpIfNotNullish,

    /// `Call dst, func, base, argc` — `this` is undefined. `base` is the
    /// LOCAL-region offset where the arguments were evaluated.
    Call,
    /// `CallMethod dst, func, this, base, argc`
    CallMethod,
    /// `New dst, ctor, base, argc`
    New,
    /// `Return src`
    Return,
    /// `Throw src`
    Throw,

    /// `ForInInit dst, obj` — snapshot the enumerable keys.
    ForInInit,
    /// `ForInNext dst, iter, disp` — store the next key, or jump when done.
    ForInNext,

    /// `ImportModule dst, #lambda` — run the module lambda once, memoized;
    /// an in-progress module (import cycle) yields undefined.
    ImportModule,
}

impl Opcode {
    /// Operand shape; the encoded instruction is 1 + 4 × len bytes.
    pub(crate) fn operands(self) -> &'static [Operand] {
        use Operand::*;
        match self {
            Self::Nop => &[],
            Self::Move => &[Slot, Slot],
            Self::LoadConst => &[Slot, Const],
            Self::LoadUndefined => &[Slot],
            Self::GetGlobal | Self::TypeofGlobal | Self::DeleteGlobal => &[Slot, Name],
            Self::SetGlobal => &[Name, Slot],
            Self::ObjectNew => &[Slot],
            Self::ArrayNew => &[Slot, Count],
            Self::ArrayAppend => &[Slot, Slot],
            Self::RegexpNew => &[Slot, Lit],
            Self::FunctionNew => &[Slot, Func],
            Self::PropInit | Self::PropInitGetter | Self::PropInitSetter => &[Slot, Slot, Slot],
            Self::PropGet | Self::PropDelete | Self::In | Self::InstanceOf => &[Slot, Slot, Slot],
            Self::PropSet => &[Slot, Slot, Slot],
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Rem
            | Self::Exp
            | Self::BitAnd
            | Self::BitOr
            | Self::BitXor
            | Self::Shl
            | Self::Shr
            | Self::Ushr
            | Self::Eq
            | Self::Neq
            | Self::StrictEq
            | Self::StrictNeq
            | Self::Lt
            | Self::Lte
            | Self::Gt
            | Self::Gte => &[Slot, Slot, Slot],
            Self::Neg | Self::ToNumber | Self::ToString | Self::BitNot | Self::Not | Self::Typeof => &[Slot, Slot],
            Self::Jump => &[Disp],
            Self::JumpIfTruthy | Self::JumpIfFalsy | Self::JumpIfNullish | Self::JumpIfNotNullish => &[Slot, Disp],
            Self::Call => &[Slot, Slot, Count, Count],
            Self::CallMethod => &[Slot, Slot, Slot, Count, Count],
            Self::New => &[Slot, Slot, Count, Count],
            Self::Return | Self::Throw => &[Slot],
            Self::ForInInit => &[Slot, Slot],
            Self::ForInNext => &[Slot, Slot, Disp],
            Self::ImportModule => &[Slot, Func],
        }
    }

    /// Encoded instruction length in bytes.
    pub(crate) fn len(self) -> usize {
        1 + 4 * self.operands().len()
    }

    pub(crate) fn name(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_discriminants() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_repr(byte) {
                assert_eq!(op as u8, byte);
                assert!(op.len() >= 1);
            }
        }
        assert_eq!(Opcode::from_repr(Opcode::ForInNext as u8), Some(Opcode::ForInNext));
    }

    #[test]
    fn names() {
        assert_eq!(Opcode::PropGet.name(), "PropGet");
        assert_eq!(Opcode::JumpIfFalsy.name(), "JumpIfFalsy");
    }
}
