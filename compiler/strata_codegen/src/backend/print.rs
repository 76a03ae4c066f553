//! Textual dump of a module, for `STRATA_DEBUG_IR` and tests.

use std::fmt::Write as _;

use super::ir::{Callee, Inst, Module, Op};
use super::value_id::{BlockId, FunctionId, ValueId};

impl Module {
    /// Render every live function.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for (id, _) in self.functions() {
            self.print_function_into(id, &mut out);
            out.push('\n');
        }
        out
    }

    pub fn print_function(&self, f: FunctionId) -> String {
        let mut out = String::new();
        self.print_function_into(f, &mut out);
        out
    }

    fn print_function_into(&self, f: FunctionId, out: &mut String) {
        let func = self.function(f);
        let params: Vec<String> = func
            .params
            .iter()
            .map(|&p| format!("{} {}", self.value_ty(p), val(p)))
            .collect();
        let _ = writeln!(out, "define {} @{}({}) {{", func.ret, func.name, params.join(", "));
        for &b in &func.blocks {
            let _ = writeln!(out, "{}:", self.block_label(b));
            for inst in &self.block(b).insts {
                let _ = writeln!(out, "  {}", self.inst_text(inst));
            }
        }
        out.push_str("}\n");
    }

    fn block_label(&self, b: BlockId) -> String {
        format!("{}.{}", self.block(b).name, b.raw())
    }

    fn fn_name(&self, f: FunctionId) -> &str {
        &self.function(f).name
    }

    fn inst_text(&self, inst: &Inst) -> String {
        let ty = self.value_ty(inst.result);
        let list = |vs: &[ValueId]| vs.iter().map(|&v| val(v)).collect::<Vec<_>>().join(", ");
        let body = match &inst.op {
            Op::Const(bits) => match ty {
                super::ir::Ty::F32 => format!("const f32 {}", f32::from_bits(*bits as u32)),
                super::ir::Ty::F64 => format!("const f64 {}", f64::from_bits(*bits)),
                _ => format!("const {ty} {bits:#x}"),
            },
            Op::Bin(op, a, b) => format!("{} {ty} {}, {}", op.name(), val(*a), val(*b)),
            Op::Un(op, a) => format!("{} {ty} {}", op.name(), val(*a)),
            Op::ICmp(p, a, b) => format!("icmp {} {}, {}", p.name(), val(*a), val(*b)),
            Op::FCmp(p, a, b) => format!("fcmp {} {}, {}", p.name(), val(*a), val(*b)),
            Op::Cast(op, a) => format!(
                "{} {} {} to {ty}",
                op.name(),
                self.value_ty(*a),
                val(*a)
            ),
            Op::Select(c, a, b) => format!("select {}, {}, {}", val(*c), val(*a), val(*b)),
            Op::Intrinsic(i, args) => format!("{ty} @{}({})", i.name(), list(args)),
            Op::Alloca { ty: elem, count, align } => {
                format!("alloca {elem} x {count}, align {align}")
            }
            Op::Load(p) => format!("load {ty}, {}", val(*p)),
            Op::Store { ptr, value } => format!(
                "store {} {}, {}",
                self.value_ty(*value),
                val(*value),
                val(*ptr)
            ),
            Op::PtrAdd(p, o) => format!("ptradd {}, {}", val(*p), val(*o)),
            Op::AtomicRmw(op, p, v) => format!("atomicrmw {} {}, {ty} {}", op.name(), val(*p), val(*v)),
            Op::Call { callee, args } => {
                let target = match callee {
                    Callee::Function(f) => format!("@{}", self.fn_name(*f)),
                    Callee::Runtime(rf) => format!("@{rf}"),
                    Callee::Indirect(p) => val(*p),
                };
                format!("call {ty} {target}({})", list(args))
            }
            Op::FuncAddr(f) => format!("addr @{}", self.fn_name(*f)),
            Op::RuntimeAddr(rf) => format!("addr @{rf}"),
            Op::GlobalStr(s) => format!("str {s:?}"),
            Op::Br(b) => format!("br {}", self.block_label(*b)),
            Op::CondBr(c, t, e) => format!(
                "br {}, {}, {}",
                val(*c),
                self.block_label(*t),
                self.block_label(*e)
            ),
            Op::Ret(Some(v)) => format!("ret {} {}", self.value_ty(*v), val(*v)),
            Op::Ret(None) => "ret void".to_owned(),
            Op::Unreachable => "unreachable".to_owned(),
        };
        if inst.result.is_none() {
            body
        } else {
            format!("{} = {body}", val(inst.result))
        }
    }
}

fn val(v: ValueId) -> String {
    format!("{v:?}")
}
