//! Operator tags carried by arithmetic, atomic and node statements.

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOpType {
    Neg,
    Sqrt,
    Rsqrt,
    Floor,
    Ceil,
    Abs,
    Sgn,
    Sin,
    Cos,
    Tan,
    Tanh,
    Asin,
    Acos,
    Exp,
    Log,
    BitNot,
    LogicNot,
    /// Value-preserving conversion to the statement's result type.
    CastValue,
    /// Bit reinterpretation to a result type of the same width.
    CastBits,
}

impl UnaryOpType {
    pub const fn name(self) -> &'static str {
        match self {
            UnaryOpType::Neg => "neg",
            UnaryOpType::Sqrt => "sqrt",
            UnaryOpType::Rsqrt => "rsqrt",
            UnaryOpType::Floor => "floor",
            UnaryOpType::Ceil => "ceil",
            UnaryOpType::Abs => "abs",
            UnaryOpType::Sgn => "sgn",
            UnaryOpType::Sin => "sin",
            UnaryOpType::Cos => "cos",
            UnaryOpType::Tan => "tan",
            UnaryOpType::Tanh => "tanh",
            UnaryOpType::Asin => "asin",
            UnaryOpType::Acos => "acos",
            UnaryOpType::Exp => "exp",
            UnaryOpType::Log => "log",
            UnaryOpType::BitNot => "bit_not",
            UnaryOpType::LogicNot => "logic_not",
            UnaryOpType::CastValue => "cast_value",
            UnaryOpType::CastBits => "cast_bits",
        }
    }

    pub const fn is_cast(self) -> bool {
        matches!(self, UnaryOpType::CastValue | UnaryOpType::CastBits)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOpType {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Max,
    Min,
    BitAnd,
    BitOr,
    BitXor,
    BitShl,
    /// Logical shift right.
    BitShr,
    /// Arithmetic shift right for signed operands, logical otherwise.
    BitSar,
    Atan2,
    Pow,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
    CmpEq,
    CmpNe,
}

impl BinaryOpType {
    pub const fn name(self) -> &'static str {
        match self {
            BinaryOpType::Add => "add",
            BinaryOpType::Sub => "sub",
            BinaryOpType::Mul => "mul",
            BinaryOpType::Div => "div",
            BinaryOpType::FloorDiv => "floordiv",
            BinaryOpType::Mod => "mod",
            BinaryOpType::Max => "max",
            BinaryOpType::Min => "min",
            BinaryOpType::BitAnd => "bit_and",
            BinaryOpType::BitOr => "bit_or",
            BinaryOpType::BitXor => "bit_xor",
            BinaryOpType::BitShl => "bit_shl",
            BinaryOpType::BitShr => "bit_shr",
            BinaryOpType::BitSar => "bit_sar",
            BinaryOpType::Atan2 => "atan2",
            BinaryOpType::Pow => "pow",
            BinaryOpType::CmpLt => "cmp_lt",
            BinaryOpType::CmpLe => "cmp_le",
            BinaryOpType::CmpGt => "cmp_gt",
            BinaryOpType::CmpGe => "cmp_ge",
            BinaryOpType::CmpEq => "cmp_eq",
            BinaryOpType::CmpNe => "cmp_ne",
        }
    }

    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOpType::CmpLt
                | BinaryOpType::CmpLe
                | BinaryOpType::CmpGt
                | BinaryOpType::CmpGe
                | BinaryOpType::CmpEq
                | BinaryOpType::CmpNe
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AtomicOpType {
    Add,
    Sub,
    Min,
    Max,
    BitAnd,
    BitOr,
    BitXor,
}

impl AtomicOpType {
    pub const fn name(self) -> &'static str {
        match self {
            AtomicOpType::Add => "atomic_add",
            AtomicOpType::Sub => "atomic_sub",
            AtomicOpType::Min => "atomic_min",
            AtomicOpType::Max => "atomic_max",
            AtomicOpType::BitAnd => "atomic_bit_and",
            AtomicOpType::BitOr => "atomic_bit_or",
            AtomicOpType::BitXor => "atomic_bit_xor",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SNodeOpType {
    Activate,
    Deactivate,
    IsActive,
    Append,
    Length,
}

impl SNodeOpType {
    pub const fn name(self) -> &'static str {
        match self {
            SNodeOpType::Activate => "activate",
            SNodeOpType::Deactivate => "deactivate",
            SNodeOpType::IsActive => "is_active",
            SNodeOpType::Append => "append",
            SNodeOpType::Length => "length",
        }
    }
}

macro_rules! display_by_name {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        })*
    };
}

display_by_name!(UnaryOpType, BinaryOpType, AtomicOpType, SNodeOpType);
