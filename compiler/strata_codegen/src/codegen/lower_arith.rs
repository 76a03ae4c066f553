//! Value statements: constants, arguments, casts, unary and binary math.
//!
//! Operator selection follows the declared IR types rather than the machine
//! types: signedness picks between `sdiv`/`udiv` and `ashr`/`lshr`, and a
//! custom type computes in its compute type. Math without a machine
//! instruction goes to the runtime (`{op}_{type}`), or to the vendor library
//! on GPU targets when one exists.

use smallvec::SmallVec;
use strata_ir::{BinaryOpType, DataType, PrimitiveType, StmtId, UnaryOpType};
use strata_rt::{MathFn, RuntimeFn};

use super::codec::fp_cast;
use super::{machine_ty, KernelCodegen};
use crate::backend::{BinOp, CastOp, FloatPredicate, IntPredicate, Intrinsic, Ty, UnOp, ValueId};
use crate::error::{CodegenError, CodegenResult};

impl KernelCodegen<'_> {
    pub(super) fn lower_const(&mut self, ty: &DataType, bits: u64) -> ValueId {
        match machine_ty(ty) {
            Ty::F32 => self.builder.const_f32(f32::from_bits(bits as u32)),
            Ty::F64 => self.builder.const_f64(f64::from_bits(bits)),
            Ty::Ptr => {
                let raw = self.builder.const_i64(bits as i64);
                self.builder.cast(CastOp::IntToPtr, raw, Ty::Ptr)
            }
            t => self.builder.const_int(t, bits),
        }
    }

    pub(super) fn lower_rand(&mut self, ty: &DataType) -> CodegenResult<ValueId> {
        use PrimitiveType::{F32, F64, I32, I64, U32, U64};
        match ty.primitive() {
            Some(p @ (I32 | U32 | I64 | U64 | F32 | F64)) => {
                Ok(self.builder.call_runtime(RuntimeFn::Rand(p), &[]))
            }
            _ => Err(CodegenError::unsupported(format!("random values of type {ty}"))),
        }
    }

    /// Scalar argument `arg_id`, reinterpreted from its 64-bit slot.
    pub(super) fn lower_arg_load(
        &mut self,
        ty: &DataType,
        arg_id: u32,
        is_ptr: bool,
    ) -> CodegenResult<ValueId> {
        let context = self.context()?;
        let id = self.builder.const_i32(arg_id as i32);
        let raw = self.builder.call_runtime(RuntimeFn::ContextGetArgs, &[context, id]);
        if is_ptr {
            return Ok(self.builder.cast(CastOp::IntToPtr, raw, Ty::Ptr));
        }
        let dest = machine_ty(ty);
        let int_ty = Ty::int(dest.bits())
            .ok_or_else(|| CodegenError::unsupported(format!("argument of type {ty}")))?;
        let bits = self.builder.int_cast(raw, int_ty, false);
        Ok(if dest.is_float() {
            self.builder.cast(CastOp::Bitcast, bits, dest)
        } else {
            bits
        })
    }

    pub(super) fn lower_kernel_return(&mut self, value: StmtId) -> CodegenResult<()> {
        let v = self.value(value)?;
        let bits = self.builder.bits_of(v);
        let widened = self.builder.int_cast(bits, Ty::I64, false);
        let runtime = self.runtime_ptr()?;
        self.builder
            .call_runtime(RuntimeFn::RuntimeStoreResult, &[runtime, widened]);
        Ok(())
    }

    // -- Unary --

    pub(super) fn lower_unary(
        &mut self,
        op: UnaryOpType,
        operand: StmtId,
        ty: &DataType,
    ) -> CodegenResult<ValueId> {
        let input = self.value(operand)?;
        let from = self.ret_type(operand);
        let b = &mut self.builder;
        let v = match op {
            UnaryOpType::CastValue => self.cast_value(input, from, ty),
            UnaryOpType::CastBits => {
                let to = machine_ty(ty);
                let source = b.ty(input);
                if source.bits() != to.bits() {
                    return Err(CodegenError::invariant(format!(
                        "bit cast from {from} to {ty} changes the width"
                    )));
                }
                if source == to {
                    input
                } else {
                    b.cast(CastOp::Bitcast, input, to)
                }
            }
            UnaryOpType::Neg => {
                if from.is_real() {
                    b.unary(UnOp::FNeg, input)
                } else {
                    b.unary(UnOp::Neg, input)
                }
            }
            UnaryOpType::BitNot => {
                if !from.is_integral() {
                    return Err(unsupported_op(op.name(), from));
                }
                b.unary(UnOp::Not, input)
            }
            UnaryOpType::Sqrt | UnaryOpType::Floor | UnaryOpType::Ceil => {
                if !from.is_real() {
                    return Err(unsupported_op(op.name(), from));
                }
                let intrinsic = match op {
                    UnaryOpType::Sqrt => Intrinsic::Sqrt,
                    UnaryOpType::Floor => Intrinsic::Floor,
                    _ => Intrinsic::Ceil,
                };
                b.intrinsic(intrinsic, &[input])
            }
            UnaryOpType::Rsqrt => {
                if !from.is_real() {
                    return Err(unsupported_op(op.name(), from));
                }
                let ty = b.ty(input);
                let root = b.intrinsic(Intrinsic::Sqrt, &[input]);
                let one = b.const_float(ty, 1.0);
                b.binary(BinOp::FDiv, one, root)
            }
            UnaryOpType::Abs
            | UnaryOpType::Sgn
            | UnaryOpType::LogicNot
            | UnaryOpType::Exp
            | UnaryOpType::Log
            | UnaryOpType::Tan
            | UnaryOpType::Tanh
            | UnaryOpType::Acos
            | UnaryOpType::Asin
            | UnaryOpType::Cos
            | UnaryOpType::Sin => {
                let f = match op {
                    UnaryOpType::Abs => MathFn::Abs,
                    UnaryOpType::Sgn => MathFn::Sgn,
                    UnaryOpType::LogicNot => MathFn::LogicNot,
                    UnaryOpType::Exp => MathFn::Exp,
                    UnaryOpType::Log => MathFn::Log,
                    UnaryOpType::Tan => MathFn::Tan,
                    UnaryOpType::Tanh => MathFn::Tanh,
                    UnaryOpType::Acos => MathFn::Acos,
                    UnaryOpType::Asin => MathFn::Asin,
                    UnaryOpType::Cos => MathFn::Cos,
                    _ => MathFn::Sin,
                };
                self.call_math(f, from, &[input])?
            }
        };
        Ok(v)
    }

    /// Value-preserving conversion between IR types.
    pub(super) fn cast_value(&mut self, input: ValueId, from: &DataType, to: &DataType) -> ValueId {
        let to_ty = machine_ty(to);
        let b = &mut self.builder;
        match (from.is_real(), to.is_real()) {
            (true, false) => {
                let op = if to.is_signed() {
                    CastOp::FpToSi
                } else {
                    CastOp::FpToUi
                };
                b.cast(op, input, to_ty)
            }
            (false, true) => {
                let op = if from.is_signed() {
                    CastOp::SiToFp
                } else {
                    CastOp::UiToFp
                };
                b.cast(op, input, to_ty)
            }
            (true, true) => fp_cast(b, input, to_ty),
            (false, false) => b.int_cast(input, to_ty, from.is_signed()),
        }
    }

    /// Call runtime math `f` on operands of IR type `ty`.
    fn call_math(&mut self, f: MathFn, ty: &DataType, args: &[ValueId]) -> CodegenResult<ValueId> {
        let Some(prim) = ty.compute_type().filter(|p| f.types().contains(p)) else {
            return Err(unsupported_op(f.name(), ty));
        };
        let callee = if self.config.arch.is_gpu() && prim.is_real() && f.has_vendor_variant() {
            RuntimeFn::VendorMath(f, prim)
        } else {
            RuntimeFn::Math(f, prim)
        };
        Ok(self.builder.call_runtime(callee, args))
    }

    // -- Binary --

    #[allow(clippy::too_many_lines, reason = "one arm per operator")]
    pub(super) fn lower_binary(
        &mut self,
        op: BinaryOpType,
        lhs: StmtId,
        rhs: StmtId,
        ty: &DataType,
    ) -> CodegenResult<ValueId> {
        let a = self.value(lhs)?;
        let c = self.value(rhs)?;
        let operand_ty = self.ret_type(lhs);

        if op.is_comparison() {
            return Ok(self.compare(op, a, c, operand_ty, ty));
        }

        let real = ty.is_real();
        let signed = ty.is_signed();
        let b = &mut self.builder;
        let int_only = |op: BinaryOpType| -> CodegenResult<()> {
            if real {
                Err(unsupported_op(op.name(), ty))
            } else {
                Ok(())
            }
        };
        let v = match op {
            BinaryOpType::Add => b.binary(if real { BinOp::FAdd } else { BinOp::Add }, a, c),
            BinaryOpType::Sub => b.binary(if real { BinOp::FSub } else { BinOp::Sub }, a, c),
            BinaryOpType::Mul => b.binary(if real { BinOp::FMul } else { BinOp::Mul }, a, c),
            BinaryOpType::Div => {
                let op = if real {
                    BinOp::FDiv
                } else if signed {
                    BinOp::SDiv
                } else {
                    BinOp::UDiv
                };
                b.binary(op, a, c)
            }
            BinaryOpType::Mod => {
                let op = if real {
                    BinOp::FRem
                } else if signed {
                    BinOp::SRem
                } else {
                    BinOp::URem
                };
                b.binary(op, a, c)
            }
            BinaryOpType::FloorDiv => {
                if real {
                    let q = b.binary(BinOp::FDiv, a, c);
                    b.intrinsic(Intrinsic::Floor, &[q])
                } else if !signed {
                    b.binary(BinOp::UDiv, a, c)
                } else {
                    match ty.compute_type() {
                        Some(p @ (PrimitiveType::I32 | PrimitiveType::I64)) => {
                            b.call_runtime(RuntimeFn::FloorDiv(p), &[a, c])
                        }
                        _ => return Err(unsupported_op(op.name(), ty)),
                    }
                }
            }
            BinaryOpType::Max | BinaryOpType::Min => {
                let is_max = op == BinaryOpType::Max;
                if real {
                    // maxnum/minnum: a NaN operand yields the other one.
                    let pred = if is_max {
                        FloatPredicate::Ogt
                    } else {
                        FloatPredicate::Olt
                    };
                    let wins = b.fcmp(pred, a, c);
                    let c_nan = b.fcmp(FloatPredicate::Uno, c, c);
                    let pick = b.or(wins, c_nan);
                    b.select(pick, a, c)
                } else {
                    match ty.compute_type() {
                        Some(p @ (PrimitiveType::I32 | PrimitiveType::I64 | PrimitiveType::U32)) => {
                            let f = if is_max {
                                RuntimeFn::Max(p)
                            } else {
                                RuntimeFn::Min(p)
                            };
                            b.call_runtime(f, &[a, c])
                        }
                        _ => {
                            let pred = match (is_max, signed) {
                                (true, true) => IntPredicate::Sgt,
                                (true, false) => IntPredicate::Ugt,
                                (false, true) => IntPredicate::Slt,
                                (false, false) => IntPredicate::Ult,
                            };
                            let pick = b.icmp(pred, a, c);
                            b.select(pick, a, c)
                        }
                    }
                }
            }
            BinaryOpType::BitAnd => {
                int_only(op)?;
                b.and(a, c)
            }
            BinaryOpType::BitOr => {
                int_only(op)?;
                b.or(a, c)
            }
            BinaryOpType::BitXor => {
                int_only(op)?;
                b.xor(a, c)
            }
            BinaryOpType::BitShl | BinaryOpType::BitShr | BinaryOpType::BitSar => {
                int_only(op)?;
                let lhs_ty = b.ty(a);
                let amount = b.int_cast(c, lhs_ty, false);
                match op {
                    BinaryOpType::BitShl => b.shl(a, amount),
                    BinaryOpType::BitShr => b.lshr(a, amount),
                    _ => b.shr(a, amount, operand_ty.is_signed()),
                }
            }
            BinaryOpType::Atan2 => self.call_math(MathFn::Atan2, ty, &[a, c])?,
            BinaryOpType::Pow => self.call_math(MathFn::Pow, ty, &[a, c])?,
            BinaryOpType::CmpLt
            | BinaryOpType::CmpLe
            | BinaryOpType::CmpGt
            | BinaryOpType::CmpGe
            | BinaryOpType::CmpEq
            | BinaryOpType::CmpNe => {
                return Err(CodegenError::invariant(format!(
                    "comparison `{}` reached arithmetic lowering",
                    op.name()
                )))
            }
        };
        Ok(v)
    }

    /// Comparison as `0` / `-1` in the result type.
    fn compare(
        &mut self,
        op: BinaryOpType,
        a: ValueId,
        c: ValueId,
        operand_ty: &DataType,
        ty: &DataType,
    ) -> ValueId {
        let b = &mut self.builder;
        let flag = if operand_ty.is_real() {
            let pred = match op {
                BinaryOpType::CmpLt => FloatPredicate::Olt,
                BinaryOpType::CmpLe => FloatPredicate::Ole,
                BinaryOpType::CmpGt => FloatPredicate::Ogt,
                BinaryOpType::CmpGe => FloatPredicate::Oge,
                BinaryOpType::CmpEq => FloatPredicate::Oeq,
                _ => FloatPredicate::One,
            };
            b.fcmp(pred, a, c)
        } else {
            let signed = operand_ty.is_signed();
            let pred = match (op, signed) {
                (BinaryOpType::CmpLt, true) => IntPredicate::Slt,
                (BinaryOpType::CmpLt, false) => IntPredicate::Ult,
                (BinaryOpType::CmpLe, true) => IntPredicate::Sle,
                (BinaryOpType::CmpLe, false) => IntPredicate::Ule,
                (BinaryOpType::CmpGt, true) => IntPredicate::Sgt,
                (BinaryOpType::CmpGt, false) => IntPredicate::Ugt,
                (BinaryOpType::CmpGe, true) => IntPredicate::Sge,
                (BinaryOpType::CmpGe, false) => IntPredicate::Uge,
                (BinaryOpType::CmpEq, _) => IntPredicate::Eq,
                _ => IntPredicate::Ne,
            };
            b.icmp(pred, a, c)
        };
        b.cast(CastOp::SExt, flag, machine_ty(ty))
    }

    // -- Misc --

    pub(super) fn lower_select(
        &mut self,
        cond: StmtId,
        lhs: StmtId,
        rhs: StmtId,
    ) -> CodegenResult<ValueId> {
        let cond = self.value(cond)?;
        let a = self.value(lhs)?;
        let c = self.value(rhs)?;
        let flag = self.builder.is_nonzero(cond);
        Ok(self.builder.select(flag, a, c))
    }

    /// `(input >> begin) & ((1 << (end - begin)) - 1)`
    pub(super) fn lower_bit_extract(
        &mut self,
        input: StmtId,
        begin: u32,
        end: u32,
    ) -> CodegenResult<ValueId> {
        let v = self.value(input)?;
        let b = &mut self.builder;
        let ty = b.ty(v);
        let shift = b.const_int(ty, u64::from(begin));
        let shifted = b.lshr(v, shift);
        let width = end.saturating_sub(begin);
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        let mask = b.const_int(ty, mask);
        Ok(b.and(shifted, mask))
    }

    /// `((in0 * s0 + in1) * s1 + ...)` with a zero seed.
    pub(super) fn lower_linearize(&mut self, inputs: &[StmtId], strides: &[u32]) -> CodegenResult<ValueId> {
        let values = inputs
            .iter()
            .map(|&i| self.value(i))
            .collect::<CodegenResult<SmallVec<[ValueId; 4]>>>()?;
        let b = &mut self.builder;
        let mut acc = b.const_i32(0);
        for (&v, &stride) in values.iter().zip(strides) {
            let stride = b.const_i32(stride as i32);
            let scaled = b.mul(acc, stride);
            acc = b.add(scaled, v);
        }
        Ok(acc)
    }
}

fn unsupported_op(op: &str, ty: &DataType) -> CodegenError {
    CodegenError::unsupported(format!("`{op}` on {ty}"))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
