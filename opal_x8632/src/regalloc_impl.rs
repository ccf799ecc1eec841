//! AllocInst implementation for the x86-32 pseudo-instructions.

use opal_ir::operand::{MemOperand, Operand};
use opal_regalloc::{AllocInst, OpKind, RegOp};

use crate::inst::XInst;

fn push(ops: &mut Vec<RegOp>, var: opal_ir::value::VarRef, kind: OpKind) {
    ops.push(RegOp { var: var.0, kind });
}

/// Register operands of an operand position: a variable is a use; memory
/// base/index are uses; constants and split halves (stack-resident by
/// definition) contribute nothing.
fn operand_uses(op: &Operand, ops: &mut Vec<RegOp>) {
    match op {
        Operand::Var(v) => push(ops, *v, OpKind::Use),
        Operand::Mem(m) => mem_uses(m, ops),
        Operand::Const(_) | Operand::Split(_) => {}
    }
}

fn mem_uses(m: &MemOperand, ops: &mut Vec<RegOp>) {
    if let Some(b) = m.base {
        push(ops, b, OpKind::Use);
    }
    if let Some(i) = m.index {
        push(ops, i, OpKind::Use);
    }
}

impl AllocInst for XInst {
    fn reg_operands(&self, ops: &mut Vec<RegOp>) {
        match self {
            // dst fully written
            XInst::Mov { dst, src }
            | XInst::Movp { dst, src }
            | XInst::Movd { dst, src }
            | XInst::Movq { dst, src }
            | XInst::Movsx { dst, src }
            | XInst::Movzx { dst, src }
            | XInst::Lea { dst, src }
            | XInst::Cvt { dst, src }
            | XInst::Cvtt { dst, src }
            | XInst::Sqrtss { dst, src }
            | XInst::Bsf { dst, src }
            | XInst::Bsr { dst, src }
            | XInst::Pshufd { dst, src, .. } => {
                push(ops, *dst, OpKind::Def);
                operand_uses(src, ops);
            }
            // dst op= src
            XInst::Add { dst, src }
            | XInst::Adc { dst, src }
            | XInst::Sub { dst, src }
            | XInst::Sbb { dst, src }
            | XInst::And { dst, src }
            | XInst::Or { dst, src }
            | XInst::Xor { dst, src }
            | XInst::Imul { dst, src }
            | XInst::Addss { dst, src }
            | XInst::Subss { dst, src }
            | XInst::Mulss { dst, src }
            | XInst::Divss { dst, src }
            | XInst::Padd { dst, src }
            | XInst::Psub { dst, src }
            | XInst::Pand { dst, src }
            | XInst::Pandn { dst, src }
            | XInst::Por { dst, src }
            | XInst::Pxor { dst, src }
            | XInst::Pmull { dst, src }
            | XInst::Pmuludq { dst, src }
            | XInst::Addps { dst, src }
            | XInst::Subps { dst, src }
            | XInst::Mulps { dst, src }
            | XInst::Divps { dst, src }
            | XInst::Pcmpeq { dst, src }
            | XInst::Pcmpgt { dst, src }
            | XInst::Cmpps { dst, src, .. }
            | XInst::Shufps { dst, src, .. }
            | XInst::Pinsr { dst, src, .. }
            | XInst::Insertps { dst, src, .. }
            | XInst::Cmov { dst, src, .. } => {
                push(ops, *dst, OpKind::UseDef);
                operand_uses(src, ops);
            }
            XInst::MovssReg { dst, src } => {
                push(ops, *dst, OpKind::UseDef);
                push(ops, *src, OpKind::Use);
            }
            XInst::Neg { dst } | XInst::Bswap { dst } => push(ops, *dst, OpKind::UseDef),
            XInst::Mul { dst_lo, a, src } => {
                push(ops, *dst_lo, OpKind::Def);
                push(ops, *a, OpKind::Use);
                operand_uses(src, ops);
            }
            XInst::Div { dest, src, other } | XInst::Idiv { dest, src, other } => {
                push(ops, *dest, OpKind::UseDef);
                push(ops, *other, OpKind::UseDef);
                operand_uses(src, ops);
            }
            XInst::Cbwdq { dst, src } => {
                push(ops, *dst, OpKind::Def);
                push(ops, *src, OpKind::Use);
            }
            XInst::Shl { dst, amount }
            | XInst::Shr { dst, amount }
            | XInst::Sar { dst, amount }
            | XInst::Rol { dst, amount }
            | XInst::Psll { dst, amount }
            | XInst::Psra { dst, amount } => {
                push(ops, *dst, OpKind::UseDef);
                operand_uses(amount, ops);
            }
            XInst::Shld { dst, src, amount } | XInst::Shrd { dst, src, amount } => {
                push(ops, *dst, OpKind::UseDef);
                push(ops, *src, OpKind::Use);
                operand_uses(amount, ops);
            }
            XInst::Store { value, addr } => {
                operand_uses(value, ops);
                operand_uses(addr, ops);
            }
            XInst::StoreP { value, addr } | XInst::StoreQ { value, addr } => {
                push(ops, *value, OpKind::Use);
                mem_uses(addr, ops);
            }
            XInst::Cmp { a, b } | XInst::Test { a, b } => {
                operand_uses(a, ops);
                operand_uses(b, ops);
            }
            XInst::Ucomiss { a, b } => {
                push(ops, *a, OpKind::Use);
                operand_uses(b, ops);
            }
            XInst::Blendvps { dst, src, mask } | XInst::Pblendvb { dst, src, mask } => {
                push(ops, *dst, OpKind::UseDef);
                operand_uses(src, ops);
                push(ops, *mask, OpKind::Use);
            }
            XInst::Pextr { dst, src, .. } => {
                push(ops, *dst, OpKind::Def);
                push(ops, *src, OpKind::Use);
            }
            XInst::Fld { src } => operand_uses(src, ops),
            XInst::Fstp { dst } => {
                if let Some(d) = dst {
                    push(ops, *d, OpKind::Def);
                }
            }
            XInst::Call { dst, target } => {
                if let Some(d) = dst {
                    push(ops, *d, OpKind::Def);
                }
                operand_uses(target, ops);
            }
            XInst::Ret { src } => {
                if let Some(s) = src {
                    push(ops, *s, OpKind::Use);
                }
            }
            XInst::Push { src } => push(ops, *src, OpKind::Use),
            XInst::Pop { dst } => push(ops, *dst, OpKind::Def),
            XInst::Cmpxchg {
                addr, eax, desired, ..
            } => {
                mem_uses(addr, ops);
                push(ops, *eax, OpKind::UseDef);
                push(ops, *desired, OpKind::Use);
            }
            XInst::Cmpxchg8b {
                addr,
                edx,
                eax,
                ecx,
                ebx,
                ..
            } => {
                mem_uses(addr, ops);
                push(ops, *edx, OpKind::UseDef);
                push(ops, *eax, OpKind::UseDef);
                push(ops, *ecx, OpKind::Use);
                push(ops, *ebx, OpKind::Use);
            }
            XInst::Xadd { addr, src, .. } | XInst::Xchg { addr, src } => {
                mem_uses(addr, ops);
                push(ops, *src, OpKind::UseDef);
            }
            XInst::FakeDef { dst, src } => {
                push(ops, *dst, OpKind::Def);
                if let Some(s) = src {
                    push(ops, *s, OpKind::Use);
                }
            }
            XInst::FakeUse { src } => push(ops, *src, OpKind::Use),
            XInst::Label { .. }
            | XInst::Jmp { .. }
            | XInst::Jcc { .. }
            | XInst::AdjustStack { .. }
            | XInst::Mfence
            | XInst::Ud2
            | XInst::Nop { .. }
            | XInst::FakeKill { .. } => {}
        }
    }

    fn label_id(&self) -> Option<u32> {
        match self {
            XInst::Label { id } => Some(*id),
            _ => None,
        }
    }

    fn branch_targets(&self, targets: &mut Vec<u32>) {
        match self {
            XInst::Jmp { target } => targets.push(target.label_id()),
            XInst::Jcc {
                on_true, on_false, ..
            } => {
                targets.push(on_true.label_id());
                if let Some(f) = on_false {
                    targets.push(f.label_id());
                }
            }
            _ => {}
        }
    }

    fn clobbers(&self, clobbers: &mut Vec<u8>) {
        if let XInst::FakeKill { kills } = self {
            clobbers.extend(kills.iter().map(|r| *r as u8));
        }
    }

    fn is_terminator(&self) -> bool {
        match self {
            XInst::Ret { .. } | XInst::Jmp { .. } | XInst::Ud2 => true,
            XInst::Jcc { on_false, .. } => on_false.is_some(),
            _ => false,
        }
    }

    fn falls_through(&self) -> bool {
        !self.is_terminator()
    }
}
