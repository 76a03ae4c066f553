//! Scalar and custom data types.
//!
//! Primitive types map one-to-one onto machine scalars. Custom types describe
//! values that live in a sub-range of a physical storage word:
//!
//! - [`CustomIntType`]: `num_bits` wide, signed or unsigned, stored inside a
//!   physical unsigned word (`u8`..`u64`).
//! - [`CustomFloatType`]: a scaled fixed-point value (`digits * scale`), or,
//!   when an exponent subtype is present, a reduced-precision float whose
//!   exponent may be shared with sibling fields.

use std::fmt;

/// Machine scalar types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    U1,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl PrimitiveType {
    /// Width in bits.
    pub const fn bits(self) -> u32 {
        match self {
            PrimitiveType::U1 => 1,
            PrimitiveType::I8 | PrimitiveType::U8 => 8,
            PrimitiveType::I16 | PrimitiveType::U16 => 16,
            PrimitiveType::I32 | PrimitiveType::U32 | PrimitiveType::F32 => 32,
            PrimitiveType::I64 | PrimitiveType::U64 | PrimitiveType::F64 => 64,
        }
    }

    /// Storage size in bytes (`u1` occupies one byte).
    pub const fn bytes(self) -> u64 {
        match self {
            PrimitiveType::U1 => 1,
            other => other.bits() as u64 / 8,
        }
    }

    pub const fn is_real(self) -> bool {
        matches!(self, PrimitiveType::F32 | PrimitiveType::F64)
    }

    pub const fn is_integral(self) -> bool {
        !self.is_real()
    }

    /// Reals count as signed.
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveType::I8
                | PrimitiveType::I16
                | PrimitiveType::I32
                | PrimitiveType::I64
                | PrimitiveType::F32
                | PrimitiveType::F64
        )
    }

    /// Canonical short name, used to key runtime helpers (`pow_f64`).
    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveType::U1 => "u1",
            PrimitiveType::I8 => "i8",
            PrimitiveType::I16 => "i16",
            PrimitiveType::I32 => "i32",
            PrimitiveType::I64 => "i64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
        }
    }

    /// Integer type of the given width and signedness.
    pub const fn int_of_bits(bits: u32, signed: bool) -> Option<Self> {
        match (bits, signed) {
            (1, _) => Some(PrimitiveType::U1),
            (8, true) => Some(PrimitiveType::I8),
            (16, true) => Some(PrimitiveType::I16),
            (32, true) => Some(PrimitiveType::I32),
            (64, true) => Some(PrimitiveType::I64),
            (8, false) => Some(PrimitiveType::U8),
            (16, false) => Some(PrimitiveType::U16),
            (32, false) => Some(PrimitiveType::U32),
            (64, false) => Some(PrimitiveType::U64),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Custom types
// ---------------------------------------------------------------------------

/// An integer of arbitrary width packed into a physical word.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CustomIntType {
    num_bits: u32,
    signed: bool,
    physical: PrimitiveType,
}

impl CustomIntType {
    /// Create a custom integer type.
    ///
    /// # Panics
    ///
    /// Panics if `physical` is not an unsigned integer type or if `num_bits`
    /// is zero or wider than `physical`.
    pub fn new(num_bits: u32, signed: bool, physical: PrimitiveType) -> Self {
        assert!(
            matches!(
                physical,
                PrimitiveType::U8 | PrimitiveType::U16 | PrimitiveType::U32 | PrimitiveType::U64
            ),
            "physical type of a custom int must be an unsigned word, got {physical}"
        );
        assert!(
            num_bits >= 1 && num_bits <= physical.bits(),
            "custom int of {num_bits} bits does not fit in {physical}"
        );
        CustomIntType {
            num_bits,
            signed,
            physical,
        }
    }

    pub fn num_bits(self) -> u32 {
        self.num_bits
    }

    pub fn is_signed(self) -> bool {
        self.signed
    }

    pub fn physical_type(self) -> PrimitiveType {
        self.physical
    }

    /// Type used for arithmetic on decoded values.
    pub fn compute_type(self) -> PrimitiveType {
        match (self.num_bits <= 32, self.signed) {
            (true, true) => PrimitiveType::I32,
            (true, false) => PrimitiveType::U32,
            (false, true) => PrimitiveType::I64,
            (false, false) => PrimitiveType::U64,
        }
    }
}

impl fmt::Display for CustomIntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.signed { "ci" } else { "cu" };
        write!(f, "{sign}{}@{}", self.num_bits, self.physical)
    }
}

/// A reduced-precision real stored as integer digits, optionally with an
/// exponent field.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CustomFloatType {
    digits: CustomIntType,
    exponent: Option<CustomIntType>,
    scale: f64,
    compute: PrimitiveType,
}

impl CustomFloatType {
    /// Fixed-point real: `value = digits * scale`.
    pub fn fixed(digits: CustomIntType, scale: f64, compute: PrimitiveType) -> Self {
        assert!(compute.is_real(), "compute type must be real, got {compute}");
        CustomFloatType {
            digits,
            exponent: None,
            scale,
            compute,
        }
    }

    /// Floating real with an exponent field. Computation is always `f32`.
    ///
    /// # Panics
    ///
    /// Panics if the exponent is signed or wider than eight bits, or if the
    /// digits leave no room for rounding within a 24-bit significand.
    pub fn with_exponent(digits: CustomIntType, exponent: CustomIntType) -> Self {
        assert!(!exponent.is_signed(), "exponent type must be unsigned");
        assert!(
            exponent.num_bits() <= 8,
            "exponent type wider than 8 bits: {exponent}"
        );
        let ft = CustomFloatType {
            digits,
            exponent: Some(exponent),
            scale: 1.0,
            compute: PrimitiveType::F32,
        };
        assert!(
            ft.digit_bits() >= 1 && ft.digit_bits() <= 23,
            "digit width {} outside 1..=23",
            ft.digit_bits()
        );
        ft
    }

    pub fn digits_type(self) -> CustomIntType {
        self.digits
    }

    pub fn exponent_type(self) -> Option<CustomIntType> {
        self.exponent
    }

    pub fn scale(self) -> f64 {
        self.scale
    }

    pub fn compute_type(self) -> PrimitiveType {
        self.compute
    }

    pub fn is_signed(self) -> bool {
        self.digits.is_signed()
    }

    /// Significand bits, excluding the sign bit of signed digits.
    pub fn digit_bits(self) -> u32 {
        self.digits.num_bits() - u32::from(self.digits.is_signed())
    }

    /// Difference between the `f32` exponent bias (127) and the bias of the
    /// narrower exponent field.
    pub fn exponent_conversion_offset(self) -> i32 {
        let bits = self.exponent.map_or(8, CustomIntType::num_bits);
        127 - ((1 << (bits - 1)) - 1)
    }
}

impl fmt::Display for CustomFloatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exponent {
            Some(exp) => write!(f, "cf({}, exp={exp})", self.digits),
            None => write!(f, "cf({}, scale={})", self.digits, self.scale),
        }
    }
}

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Declared result type of an IR statement.
#[derive(Clone, Debug, PartialEq)]
pub enum DataType {
    Void,
    Primitive(PrimitiveType),
    CustomInt(CustomIntType),
    CustomFloat(CustomFloatType),
    /// Pointer to a value of `pointee`. Bit pointers address a field inside
    /// a physical word rather than a whole byte range.
    Pointer {
        pointee: Box<DataType>,
        bit_ptr: bool,
    },
}

impl DataType {
    pub const U1: DataType = DataType::Primitive(PrimitiveType::U1);
    pub const I8: DataType = DataType::Primitive(PrimitiveType::I8);
    pub const I16: DataType = DataType::Primitive(PrimitiveType::I16);
    pub const I32: DataType = DataType::Primitive(PrimitiveType::I32);
    pub const I64: DataType = DataType::Primitive(PrimitiveType::I64);
    pub const U8: DataType = DataType::Primitive(PrimitiveType::U8);
    pub const U16: DataType = DataType::Primitive(PrimitiveType::U16);
    pub const U32: DataType = DataType::Primitive(PrimitiveType::U32);
    pub const U64: DataType = DataType::Primitive(PrimitiveType::U64);
    pub const F32: DataType = DataType::Primitive(PrimitiveType::F32);
    pub const F64: DataType = DataType::Primitive(PrimitiveType::F64);

    pub fn ptr_to(pointee: DataType) -> Self {
        DataType::Pointer {
            pointee: Box::new(pointee),
            bit_ptr: false,
        }
    }

    pub fn bit_ptr_to(pointee: DataType) -> Self {
        DataType::Pointer {
            pointee: Box::new(pointee),
            bit_ptr: true,
        }
    }

    /// Untyped byte pointer (node and cell addresses).
    pub fn raw_ptr() -> Self {
        DataType::ptr_to(DataType::U8)
    }

    pub fn primitive(&self) -> Option<PrimitiveType> {
        match self {
            DataType::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_real(&self) -> bool {
        match self {
            DataType::Primitive(p) => p.is_real(),
            DataType::CustomFloat(_) => true,
            _ => false,
        }
    }

    pub fn is_integral(&self) -> bool {
        match self {
            DataType::Primitive(p) => p.is_integral(),
            DataType::CustomInt(_) => true,
            _ => false,
        }
    }

    pub fn is_signed(&self) -> bool {
        match self {
            DataType::Primitive(p) => p.is_signed(),
            DataType::CustomInt(c) => c.is_signed(),
            DataType::CustomFloat(c) => c.is_signed(),
            _ => false,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, DataType::Pointer { .. })
    }

    pub fn is_bit_pointer(&self) -> bool {
        matches!(self, DataType::Pointer { bit_ptr: true, .. })
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, DataType::CustomInt(_) | DataType::CustomFloat(_))
    }

    pub fn pointee(&self) -> Option<&DataType> {
        match self {
            DataType::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    /// Type values of this type are computed in.
    pub fn compute_type(&self) -> Option<PrimitiveType> {
        match self {
            DataType::Primitive(p) => Some(*p),
            DataType::CustomInt(c) => Some(c.compute_type()),
            DataType::CustomFloat(c) => Some(c.compute_type()),
            _ => None,
        }
    }
}

impl From<PrimitiveType> for DataType {
    fn from(p: PrimitiveType) -> Self {
        DataType::Primitive(p)
    }
}

impl From<CustomIntType> for DataType {
    fn from(c: CustomIntType) -> Self {
        DataType::CustomInt(c)
    }
}

impl From<CustomFloatType> for DataType {
    fn from(c: CustomFloatType) -> Self {
        DataType::CustomFloat(c)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Void => f.write_str("void"),
            DataType::Primitive(p) => write!(f, "{p}"),
            DataType::CustomInt(c) => write!(f, "{c}"),
            DataType::CustomFloat(c) => write!(f, "{c}"),
            DataType::Pointer {
                pointee,
                bit_ptr: true,
            } => write!(f, "*bit {pointee}"),
            DataType::Pointer { pointee, .. } => write!(f, "*{pointee}"),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
