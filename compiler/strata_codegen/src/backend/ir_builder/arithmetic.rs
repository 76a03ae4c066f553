//! Arithmetic, comparison and conversion instructions for `IrBuilder`.

use smallvec::SmallVec;

use super::IrBuilder;
use crate::backend::ir::{BinOp, CastOp, FloatPredicate, IntPredicate, Intrinsic, Op, Ty, UnOp};
use crate::backend::value_id::ValueId;

impl IrBuilder {
    // -----------------------------------------------------------------------
    // Binary / unary
    // -----------------------------------------------------------------------

    /// Binary operation; both operands must share one type matching the
    /// operator family.
    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let (lt, rt) = (self.ty(lhs), self.ty(rhs));
        let family_ok = if op.is_float() { lt.is_float() } else { lt.is_int() };
        if lt != rt || !family_ok {
            tracing::error!(op = op.name(), %lt, %rt, "binary operand type mismatch");
            self.record_codegen_error();
        }
        self.emit(lt, Op::Bin(op, lhs, rhs))
    }

    #[inline]
    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Add, lhs, rhs)
    }

    #[inline]
    pub fn sub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    #[inline]
    pub fn mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Mul, lhs, rhs)
    }

    #[inline]
    pub fn and(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::And, lhs, rhs)
    }

    #[inline]
    pub fn or(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Or, lhs, rhs)
    }

    #[inline]
    pub fn xor(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Xor, lhs, rhs)
    }

    #[inline]
    pub fn shl(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Shl, lhs, rhs)
    }

    #[inline]
    pub fn lshr(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::LShr, lhs, rhs)
    }

    #[inline]
    pub fn ashr(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::AShr, lhs, rhs)
    }

    /// Shift right, arithmetic when `signed`.
    pub fn shr(&mut self, lhs: ValueId, rhs: ValueId, signed: bool) -> ValueId {
        if signed {
            self.ashr(lhs, rhs)
        } else {
            self.lshr(lhs, rhs)
        }
    }

    pub fn unary(&mut self, op: UnOp, v: ValueId) -> ValueId {
        let ty = self.ty(v);
        let ok = match op {
            UnOp::FNeg => ty.is_float(),
            UnOp::Neg | UnOp::Not => ty.is_int(),
        };
        if !ok {
            tracing::error!(op = op.name(), %ty, "unary operand type mismatch");
            self.record_codegen_error();
        }
        self.emit(ty, Op::Un(op, v))
    }

    // -----------------------------------------------------------------------
    // Comparisons
    // -----------------------------------------------------------------------

    /// Integer (or pointer) comparison yielding `i1`.
    pub fn icmp(&mut self, pred: IntPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        let (lt, rt) = (self.ty(lhs), self.ty(rhs));
        if lt != rt || !(lt.is_int() || lt == Ty::Ptr) {
            tracing::error!(pred = pred.name(), %lt, %rt, "icmp operand type mismatch");
            self.record_codegen_error();
        }
        self.emit(Ty::I1, Op::ICmp(pred, lhs, rhs))
    }

    /// Ordered float comparison yielding `i1`.
    pub fn fcmp(&mut self, pred: FloatPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        let (lt, rt) = (self.ty(lhs), self.ty(rhs));
        if lt != rt || !lt.is_float() {
            tracing::error!(pred = pred.name(), %lt, %rt, "fcmp operand type mismatch");
            self.record_codegen_error();
        }
        self.emit(Ty::I1, Op::FCmp(pred, lhs, rhs))
    }

    /// `v != 0` as `i1`.
    pub fn is_nonzero(&mut self, v: ValueId) -> ValueId {
        let ty = self.ty(v);
        if ty == Ty::I1 {
            return v;
        }
        if ty.is_float() {
            let zero = self.const_float(ty, 0.0);
            return self.fcmp(FloatPredicate::One, v, zero);
        }
        let zero = self.const_int(ty, 0);
        self.icmp(IntPredicate::Ne, v, zero)
    }

    // -----------------------------------------------------------------------
    // Conversions
    // -----------------------------------------------------------------------

    pub fn cast(&mut self, op: CastOp, v: ValueId, to: Ty) -> ValueId {
        let from = self.ty(v);
        let ok = match op {
            CastOp::Trunc => from.is_int() && to.is_int() && to.bits() < from.bits(),
            CastOp::ZExt | CastOp::SExt => from.is_int() && to.is_int() && to.bits() > from.bits(),
            CastOp::FpTrunc => from == Ty::F64 && to == Ty::F32,
            CastOp::FpExt => from == Ty::F32 && to == Ty::F64,
            CastOp::FpToSi | CastOp::FpToUi => from.is_float() && to.is_int(),
            CastOp::SiToFp | CastOp::UiToFp => from.is_int() && to.is_float(),
            CastOp::Bitcast => from.bits() == to.bits() && from != Ty::Void,
            CastOp::PtrToInt => from == Ty::Ptr && to.is_int(),
            CastOp::IntToPtr => from.is_int() && to == Ty::Ptr,
        };
        if !ok {
            tracing::error!(op = op.name(), %from, %to, "invalid cast");
            self.record_codegen_error();
        }
        self.emit(to, Op::Cast(op, v))
    }

    /// Resize an integer: truncate, extend (sign or zero), or pass through.
    pub fn int_cast(&mut self, v: ValueId, to: Ty, signed: bool) -> ValueId {
        let from = self.ty(v);
        if from == to {
            v
        } else if from.bits() > to.bits() {
            self.cast(CastOp::Trunc, v, to)
        } else if signed && from != Ty::I1 {
            self.cast(CastOp::SExt, v, to)
        } else {
            self.cast(CastOp::ZExt, v, to)
        }
    }

    /// Reinterpret as the same-width integer type.
    pub fn bits_of(&mut self, v: ValueId) -> ValueId {
        let ty = self.ty(v);
        match ty {
            Ty::F32 => self.cast(CastOp::Bitcast, v, Ty::I32),
            Ty::F64 => self.cast(CastOp::Bitcast, v, Ty::I64),
            Ty::Ptr => self.cast(CastOp::PtrToInt, v, Ty::I64),
            _ => v,
        }
    }

    pub fn select(&mut self, cond: ValueId, then: ValueId, otherwise: ValueId) -> ValueId {
        let (ct, tt, ot) = (self.ty(cond), self.ty(then), self.ty(otherwise));
        if ct != Ty::I1 || tt != ot {
            tracing::error!(%ct, %tt, %ot, "select operand type mismatch");
            self.record_codegen_error();
        }
        self.emit(tt, Op::Select(cond, then, otherwise))
    }

    /// Call an intrinsic. Math intrinsics return the operand type, `ctlz`
    /// its integer type, grid queries `i32`, `bls_base` a pointer.
    pub fn intrinsic(&mut self, intrinsic: Intrinsic, args: &[ValueId]) -> ValueId {
        if args.len() != intrinsic.arity() {
            tracing::error!(
                intrinsic = intrinsic.name(),
                given = args.len(),
                "intrinsic arity mismatch"
            );
            self.record_codegen_error();
        }
        let first = args.first().map_or(Ty::Void, |&a| self.ty(a));
        let ty = match intrinsic {
            Intrinsic::Sqrt | Intrinsic::Floor | Intrinsic::Ceil | Intrinsic::Fabs => {
                if !first.is_float() {
                    tracing::error!(intrinsic = intrinsic.name(), ty = %first, "float intrinsic on non-float");
                    self.record_codegen_error();
                }
                first
            }
            Intrinsic::Ctlz => {
                if !first.is_int() {
                    tracing::error!(ty = %first, "ctlz on non-integer");
                    self.record_codegen_error();
                }
                first
            }
            Intrinsic::ThreadIdx | Intrinsic::BlockIdx | Intrinsic::BlockDim | Intrinsic::GridDim => {
                Ty::I32
            }
            Intrinsic::BlsBase => Ty::Ptr,
        };
        let args: SmallVec<[ValueId; 2]> = args.iter().copied().collect();
        self.emit(ty, Op::Intrinsic(intrinsic, args))
    }
}
