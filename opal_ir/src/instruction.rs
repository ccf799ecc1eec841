//! The closed IR instruction set.

use crate::operand::Operand;
use crate::value::{BlockRef, VarRef};

/// Arithmetic operators. The F-prefixed operators are only legal on
/// floating-point types; the rest only on integer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    And,
    Or,
    Xor,
    Sub,
    Mul,
    Shl,
    Lshr,
    Ashr,
    Udiv,
    Sdiv,
    Urem,
    Srem,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Frem,
}

impl ArithOp {
    /// Whether the operand order may be swapped without changing the result.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            ArithOp::Add | ArithOp::And | ArithOp::Or | ArithOp::Xor | ArithOp::Mul
        )
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpCond {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

/// Floating-point comparison predicates: the ordered/unordered matrix plus
/// the two trivial conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcmpCond {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
    True,
}

/// Cast operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Sext,
    Zext,
    Trunc,
    Fptrunc,
    Fpext,
    Fptosi,
    Fptoui,
    Sitofp,
    Uitofp,
    Bitcast,
}

/// The fixed intrinsic set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    AtomicCmpxchg,
    AtomicFence,
    AtomicFenceAll,
    AtomicIsLockFree,
    AtomicLoad,
    AtomicRmw,
    AtomicStore,
    Bswap,
    Ctlz,
    Ctpop,
    Cttz,
    Longjmp,
    Memcpy,
    Memmove,
    Memset,
    ReadTp,
    Setjmp,
    Sqrt,
    Stackrestore,
    Stacksave,
    Trap,
}

/// Atomic read-modify-write sub-operations, numbered as they appear in the
/// IR's constant operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmwOp {
    Add = 1,
    Sub = 2,
    And = 3,
    Or = 4,
    Xor = 5,
    Xchg = 6,
}

impl RmwOp {
    pub fn from_value(v: i64) -> Option<RmwOp> {
        Some(match v {
            1 => RmwOp::Add,
            2 => RmwOp::Sub,
            3 => RmwOp::And,
            4 => RmwOp::Or,
            5 => RmwOp::Xor,
            6 => RmwOp::Xchg,
            _ => return None,
        })
    }
}

/// An instruction: an operation plus an optional destination variable.
#[derive(Debug, Clone)]
pub struct Inst {
    pub kind: InstKind,
    pub dest: Option<VarRef>,
    /// Set by fusion peepholes and phi deletion; skipped by every later pass.
    pub deleted: bool,
}

impl Inst {
    pub fn new(kind: InstKind, dest: Option<VarRef>) -> Inst {
        Inst {
            kind,
            dest,
            deleted: false,
        }
    }

    /// Visit every operand of this instruction.
    pub fn for_each_operand(&self, mut f: impl FnMut(&Operand)) {
        match &self.kind {
            InstKind::Alloca { size, .. } => f(size),
            InstKind::Arith { a, b, .. } => {
                f(a);
                f(b);
            }
            InstKind::Assign { src } => f(src),
            InstKind::Br { cond, .. } => {
                if let Some(c) = cond {
                    f(c);
                }
            }
            InstKind::Call { target, args, .. } => {
                f(target);
                args.iter().for_each(f);
            }
            InstKind::Cast { src, .. } => f(src),
            InstKind::ExtractElement { vec, index } => {
                f(vec);
                f(index);
            }
            InstKind::Fcmp { a, b, .. } | InstKind::Icmp { a, b, .. } => {
                f(a);
                f(b);
            }
            InstKind::InsertElement { vec, elem, index } => {
                f(vec);
                f(elem);
                f(index);
            }
            InstKind::IntrinsicCall { args, .. } => args.iter().for_each(f),
            InstKind::Load { addr } => f(addr),
            InstKind::Phi { args } => args.iter().for_each(|(op, _)| f(op)),
            InstKind::Ret { src } => {
                if let Some(s) = src {
                    f(s);
                }
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                f(cond);
                f(on_true);
                f(on_false);
            }
            InstKind::Store { value, addr } => {
                f(value);
                f(addr);
            }
            InstKind::Switch { value, .. } => f(value),
            InstKind::Unreachable => {}
        }
    }
}

/// Instruction operations. Terminators (`Br`, `Ret`, `Switch`,
/// `Unreachable`) appear only in block-final position.
#[derive(Debug, Clone)]
pub enum InstKind {
    Alloca {
        size: Operand,
        align: u32,
    },
    Arith {
        op: ArithOp,
        a: Operand,
        b: Operand,
    },
    Assign {
        src: Operand,
    },
    /// Unconditional when `cond` is None (`on_false` is then unused).
    Br {
        cond: Option<Operand>,
        on_true: BlockRef,
        on_false: BlockRef,
    },
    Call {
        target: Operand,
        args: Vec<Operand>,
        has_side_effects: bool,
        returns_twice: bool,
    },
    Cast {
        op: CastOp,
        src: Operand,
    },
    ExtractElement {
        vec: Operand,
        index: Operand,
    },
    Fcmp {
        cond: FcmpCond,
        a: Operand,
        b: Operand,
    },
    Icmp {
        cond: IcmpCond,
        a: Operand,
        b: Operand,
    },
    InsertElement {
        vec: Operand,
        elem: Operand,
        index: Operand,
    },
    IntrinsicCall {
        id: Intrinsic,
        args: Vec<Operand>,
    },
    Load {
        addr: Operand,
    },
    Phi {
        args: Vec<(Operand, BlockRef)>,
    },
    Ret {
        src: Option<Operand>,
    },
    Select {
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    Store {
        value: Operand,
        addr: Operand,
    },
    Switch {
        value: Operand,
        cases: Vec<(i64, BlockRef)>,
        default: BlockRef,
    },
    Unreachable,
}
