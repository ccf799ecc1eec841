//! x86-32 machine pseudo-instruction definitions.
//!
//! Pseudo-instructions carry Variables rather than encoded operands; the
//! register allocator and frame layout rewrite the variables, and the
//! emitter renders the result as text. The Fake* variants carry no machine
//! semantics, only liveness constraints.

use opal_ir::operand::{MemOperand, Operand};
use opal_ir::value::{BlockRef, VarRef};

use crate::reg::RegNum;

/// Branch condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrCond {
    A,
    Ae,
    B,
    Be,
    E,
    G,
    Ge,
    L,
    Le,
    Ne,
    Np,
    P,
}

impl BrCond {
    /// Mnemonic suffix ("a" in "ja").
    pub fn suffix(self) -> &'static str {
        match self {
            BrCond::A => "a",
            BrCond::Ae => "ae",
            BrCond::B => "b",
            BrCond::Be => "be",
            BrCond::E => "e",
            BrCond::G => "g",
            BrCond::Ge => "ge",
            BrCond::L => "l",
            BrCond::Le => "le",
            BrCond::Ne => "ne",
            BrCond::Np => "np",
            BrCond::P => "p",
        }
    }
}

/// cmpps comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmppsCond {
    Eq,
    Lt,
    Le,
    Unord,
    Neq,
    Nlt,
    Nle,
    Ord,
}

impl CmppsCond {
    /// Mnemonic infix ("eq" in "cmpeqps").
    pub fn infix(self) -> &'static str {
        match self {
            CmppsCond::Eq => "eq",
            CmppsCond::Lt => "lt",
            CmppsCond::Le => "le",
            CmppsCond::Unord => "unord",
            CmppsCond::Neq => "neq",
            CmppsCond::Nlt => "nlt",
            CmppsCond::Nle => "nle",
            CmppsCond::Ord => "ord",
        }
    }
}

/// A branch target: a basic block or an internal (in-block) label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrTarget {
    Block(BlockRef),
    Label(u32),
}

impl BrTarget {
    /// Flattened label id: block labels use the block index, internal
    /// labels use ids past the block count.
    pub fn label_id(self) -> u32 {
        match self {
            BrTarget::Block(b) => b.0,
            BrTarget::Label(id) => id,
        }
    }
}

/// A machine pseudo-instruction.
#[derive(Debug, Clone)]
pub enum XInst {
    // -- Moves --
    /// Scalar move (mov / movss / movsd by destination type).
    Mov { dst: VarRef, src: Operand },
    /// Packed 128-bit move (movups).
    Movp { dst: VarRef, src: Operand },
    /// 32-bit gpr/mem <-> xmm low lane.
    Movd { dst: VarRef, src: Operand },
    /// movss xmm, xmm: replace the low lane.
    MovssReg { dst: VarRef, src: VarRef },
    /// 64-bit move through an xmm register.
    Movq { dst: VarRef, src: Operand },
    Movsx { dst: VarRef, src: Operand },
    Movzx { dst: VarRef, src: Operand },
    /// Scalar store; addr is a Mem or VariableSplit operand.
    Store { value: Operand, addr: Operand },
    /// Packed store (movups to memory).
    StoreP { value: VarRef, addr: MemOperand },
    /// movq to memory.
    StoreQ { value: VarRef, addr: MemOperand },
    /// Address of a stack slot or full memory operand.
    Lea { dst: VarRef, src: Operand },

    // -- GPR arithmetic (dst op= src) --
    Add { dst: VarRef, src: Operand },
    Adc { dst: VarRef, src: Operand },
    Sub { dst: VarRef, src: Operand },
    Sbb { dst: VarRef, src: Operand },
    And { dst: VarRef, src: Operand },
    Or { dst: VarRef, src: Operand },
    Xor { dst: VarRef, src: Operand },
    Imul { dst: VarRef, src: Operand },
    Neg { dst: VarRef },
    /// One-operand widening multiply: edx:eax = eax * src. `a` is the
    /// eax-pinned operand, `dst_lo` the eax-pinned low result; the high
    /// half is modeled by a following FakeDef of the edx-pinned variable.
    Mul { dst_lo: VarRef, a: VarRef, src: Operand },
    /// Unsigned divide. `dest` receives the pinned result (quotient or
    /// remainder), `other` is the other implicitly-written register.
    Div { dest: VarRef, src: Operand, other: VarRef },
    /// Signed divide; register roles as for Div.
    Idiv { dest: VarRef, src: Operand, other: VarRef },
    /// Sign-extension cbw/cwd/cdq keyed on the source width.
    Cbwdq { dst: VarRef, src: VarRef },
    Shl { dst: VarRef, amount: Operand },
    Shr { dst: VarRef, amount: Operand },
    Sar { dst: VarRef, amount: Operand },
    Shld { dst: VarRef, src: VarRef, amount: Operand },
    Shrd { dst: VarRef, src: VarRef, amount: Operand },
    Rol { dst: VarRef, amount: Operand },
    Bswap { dst: VarRef },
    Bsf { dst: VarRef, src: Operand },
    Bsr { dst: VarRef, src: Operand },
    Cmp { a: Operand, b: Operand },
    Test { a: Operand, b: Operand },
    /// Scalar FP ordered compare (ucomiss/ucomisd by operand type).
    Ucomiss { a: VarRef, b: Operand },
    Cmov { dst: VarRef, src: Operand, cond: BrCond },

    // -- Scalar FP --
    Addss { dst: VarRef, src: Operand },
    Subss { dst: VarRef, src: Operand },
    Mulss { dst: VarRef, src: Operand },
    Divss { dst: VarRef, src: Operand },
    Sqrtss { dst: VarRef, src: Operand },
    /// Non-truncating conversion; mnemonic chosen from the operand types.
    Cvt { dst: VarRef, src: Operand },
    /// Truncating fp-to-int conversion.
    Cvtt { dst: VarRef, src: Operand },
    /// x87 load; the return-value path for FP functions.
    Fld { src: Operand },
    /// x87 store-and-pop; None pops into st(0) discard.
    Fstp { dst: Option<VarRef> },

    // -- Packed --
    Padd { dst: VarRef, src: Operand },
    Psub { dst: VarRef, src: Operand },
    Pand { dst: VarRef, src: Operand },
    Pandn { dst: VarRef, src: Operand },
    Por { dst: VarRef, src: Operand },
    Pxor { dst: VarRef, src: Operand },
    Pmull { dst: VarRef, src: Operand },
    Pmuludq { dst: VarRef, src: Operand },
    Addps { dst: VarRef, src: Operand },
    Subps { dst: VarRef, src: Operand },
    Mulps { dst: VarRef, src: Operand },
    Divps { dst: VarRef, src: Operand },
    Pcmpeq { dst: VarRef, src: Operand },
    Pcmpgt { dst: VarRef, src: Operand },
    Cmpps { dst: VarRef, src: Operand, cond: CmppsCond },
    Psll { dst: VarRef, amount: Operand },
    Psra { dst: VarRef, amount: Operand },
    Pshufd { dst: VarRef, src: Operand, mask: u8 },
    Shufps { dst: VarRef, src: Operand, mask: u8 },
    Pextr { dst: VarRef, src: VarRef, index: u8 },
    Pinsr { dst: VarRef, src: Operand, index: u8 },
    Insertps { dst: VarRef, src: Operand, mask: u8 },
    Blendvps { dst: VarRef, src: Operand, mask: VarRef },
    Pblendvb { dst: VarRef, src: Operand, mask: VarRef },

    // -- Control flow --
    Label { id: u32 },
    Jmp { target: BrTarget },
    /// j<cc> on_true, then jmp on_false when present.
    Jcc {
        cond: BrCond,
        on_true: BrTarget,
        on_false: Option<BrTarget>,
    },
    Call { dst: Option<VarRef>, target: Operand },
    /// `src` only pins liveness of the return register.
    Ret { src: Option<VarRef> },
    /// In-call-sequence esp adjustment; tracked by the emitter.
    AdjustStack { amount: u32 },
    Push { src: VarRef },
    Pop { dst: VarRef },

    // -- Atomics and misc --
    Mfence,
    Ud2,
    Nop { variant: u8 },
    Cmpxchg {
        addr: MemOperand,
        eax: VarRef,
        desired: VarRef,
        locked: bool,
    },
    Cmpxchg8b {
        addr: MemOperand,
        edx: VarRef,
        eax: VarRef,
        ecx: VarRef,
        ebx: VarRef,
        locked: bool,
    },
    Xadd {
        addr: MemOperand,
        src: VarRef,
        locked: bool,
    },
    Xchg { addr: MemOperand, src: VarRef },

    // -- Liveness-only markers --
    FakeDef { dst: VarRef, src: Option<VarRef> },
    FakeUse { src: VarRef },
    FakeKill { kills: Vec<RegNum> },
}

impl XInst {
    /// Visit every variable this instruction mentions, including memory
    /// operand components and split parents. Used by frame layout to decide
    /// which spilled variables need slots.
    pub fn referenced_vars(&self, out: &mut Vec<VarRef>) {
        fn op(o: &Operand, out: &mut Vec<VarRef>) {
            match o {
                Operand::Var(v) => out.push(*v),
                Operand::Mem(m) => {
                    out.extend(m.base);
                    out.extend(m.index);
                }
                Operand::Split(s) => out.push(s.var),
                Operand::Const(_) => {}
            }
        }
        fn mem(m: &MemOperand, out: &mut Vec<VarRef>) {
            out.extend(m.base);
            out.extend(m.index);
        }
        match self {
            XInst::Mov { dst, src }
            | XInst::Movp { dst, src }
            | XInst::Movd { dst, src }
            | XInst::Movq { dst, src }
            | XInst::Movsx { dst, src }
            | XInst::Movzx { dst, src }
            | XInst::Lea { dst, src }
            | XInst::Add { dst, src }
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
            | XInst::Sqrtss { dst, src }
            | XInst::Cvt { dst, src }
            | XInst::Cvtt { dst, src }
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
            | XInst::Pshufd { dst, src, .. }
            | XInst::Shufps { dst, src, .. }
            | XInst::Pinsr { dst, src, .. }
            | XInst::Insertps { dst, src, .. }
            | XInst::Bsf { dst, src }
            | XInst::Bsr { dst, src }
            | XInst::Cmov { dst, src, .. } => {
                out.push(*dst);
                op(src, out);
            }
            XInst::MovssReg { dst, src } => {
                out.push(*dst);
                out.push(*src);
            }
            XInst::Store { value, addr } => {
                op(value, out);
                op(addr, out);
            }
            XInst::StoreP { value, addr } | XInst::StoreQ { value, addr } => {
                out.push(*value);
                mem(addr, out);
            }
            XInst::Neg { dst } | XInst::Bswap { dst } => out.push(*dst),
            XInst::Mul { dst_lo, a, src } => {
                out.push(*dst_lo);
                out.push(*a);
                op(src, out);
            }
            XInst::Div { dest, src, other } | XInst::Idiv { dest, src, other } => {
                out.push(*dest);
                out.push(*other);
                op(src, out);
            }
            XInst::Cbwdq { dst, src } => {
                out.push(*dst);
                out.push(*src);
            }
            XInst::Shl { dst, amount }
            | XInst::Shr { dst, amount }
            | XInst::Sar { dst, amount }
            | XInst::Rol { dst, amount }
            | XInst::Psll { dst, amount }
            | XInst::Psra { dst, amount } => {
                out.push(*dst);
                op(amount, out);
            }
            XInst::Shld { dst, src, amount } | XInst::Shrd { dst, src, amount } => {
                out.push(*dst);
                out.push(*src);
                op(amount, out);
            }
            XInst::Cmp { a, b } | XInst::Test { a, b } => {
                op(a, out);
                op(b, out);
            }
            XInst::Ucomiss { a, b } => {
                out.push(*a);
                op(b, out);
            }
            XInst::Blendvps { dst, src, mask } | XInst::Pblendvb { dst, src, mask } => {
                out.push(*dst);
                op(src, out);
                out.push(*mask);
            }
            XInst::Pextr { dst, src, .. } => {
                out.push(*dst);
                out.push(*src);
            }
            XInst::Fld { src } => op(src, out),
            XInst::Fstp { dst } => out.extend(*dst),
            XInst::Call { dst, target } => {
                out.extend(*dst);
                op(target, out);
            }
            XInst::Ret { src } => out.extend(*src),
            XInst::Push { src } => out.push(*src),
            XInst::Pop { dst } => out.push(*dst),
            XInst::Cmpxchg {
                addr, eax, desired, ..
            } => {
                mem(addr, out);
                out.push(*eax);
                out.push(*desired);
            }
            XInst::Cmpxchg8b {
                addr,
                edx,
                eax,
                ecx,
                ebx,
                ..
            } => {
                mem(addr, out);
                out.extend([*edx, *eax, *ecx, *ebx]);
            }
            XInst::Xadd { addr, src, .. } | XInst::Xchg { addr, src } => {
                mem(addr, out);
                out.push(*src);
            }
            XInst::FakeDef { dst, src } => {
                out.push(*dst);
                out.extend(*src);
            }
            XInst::FakeUse { src } => out.push(*src),
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
}
