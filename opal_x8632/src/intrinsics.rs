//! Intrinsic lowering: atomics, bit manipulation, math, and the runtime
//! helper calls.

use opal_ir::instruction::{CastOp, IcmpCond, InstKind, Intrinsic, RmwOp};
use opal_ir::operand::{Constant, MemOperand, Operand, SegmentReg};
use opal_ir::types::Type;
use opal_ir::value::VarRef;
use opal_regalloc::{AllocInst, OpKind};

use crate::backend::OptLevel;
use crate::inst::{BrCond, BrTarget, XInst};
use crate::isel::{Isel, LEGAL_ALL, LEGAL_IMM, LEGAL_MEM, LEGAL_REG};
use crate::reg::Reg;

/// The IR only admits sequentially-consistent atomics.
fn verify_memory_order(op: &Operand) -> bool {
    op.as_const_int() == Some(6)
}

impl<'a> Isel<'a> {
    pub(crate) fn lower_intrinsic_call(
        &mut self,
        dest: Option<VarRef>,
        id: Intrinsic,
        args: &[Operand],
    ) {
        match id {
            Intrinsic::AtomicCmpxchg => {
                if !verify_memory_order(&args[3]) {
                    self.func
                        .set_error("Unexpected memory ordering (success) for AtomicCmpxchg");
                    return;
                }
                if !verify_memory_order(&args[4]) {
                    self.func
                        .set_error("Unexpected memory ordering (failure) for AtomicCmpxchg");
                    return;
                }
                let dest = dest.unwrap();
                if self.try_optimized_cmpxchg_cmp_br(dest, &args[0], &args[1], &args[2]) {
                    return;
                }
                self.lower_atomic_cmpxchg(dest, &args[0], &args[1], &args[2]);
            }
            Intrinsic::AtomicFence => {
                if !verify_memory_order(&args[0]) {
                    self.func.set_error("Unexpected memory ordering for AtomicFence");
                    return;
                }
                self.push(XInst::Mfence);
            }
            // FenceAll orders atomic and non-atomic accesses alike; mfence
            // covers both.
            Intrinsic::AtomicFenceAll => self.push(XInst::Mfence),
            Intrinsic::AtomicIsLockFree => {
                // Always lock-free for 1/2/4/8-byte accesses; 16-byte
                // operations have no 32-bit lock-free form.
                let dest = dest.unwrap();
                let Some(size) = args[0].as_const_int() else {
                    self.func
                        .set_error("AtomicIsLockFree byte size should be compile-time const");
                    return;
                };
                let result = match size {
                    1 | 2 | 4 | 8 => 1,
                    _ => 0,
                };
                self.mov(dest, Constant::i32(result));
            }
            Intrinsic::AtomicLoad => {
                if !verify_memory_order(&args[1]) {
                    self.func.set_error("Unexpected memory ordering for AtomicLoad");
                    return;
                }
                let dest = dest.unwrap();
                if self.func.var(dest).ty == Type::I64 {
                    // A 64-bit load must be a single access: movq through
                    // an xmm register, then bitcast the halves out.
                    let t = self.make_reg(Type::F64, None);
                    let addr = self.form_memory_operand(&args[0], Type::F64);
                    self.push(XInst::Movq {
                        dst: t,
                        src: Operand::Mem(addr),
                    });
                    self.lower_cast(CastOp::Bitcast, dest, Operand::Var(t));
                    // Keep the load alive even if unused.
                    let (lo, hi) = self.lo_hi_vars(dest);
                    self.fake_use(lo);
                    self.fake_use(hi);
                    return;
                }
                self.lower_load_for_intrinsic(dest, args[0].clone());
                // The load may have fused into a following arithmetic
                // instruction; pin whatever was defined last.
                if let Some(d) = self.last_lowered_dest() {
                    self.fake_use(d);
                }
            }
            Intrinsic::AtomicRmw => {
                if !verify_memory_order(&args[3]) {
                    self.func.set_error("Unexpected memory ordering for AtomicRMW");
                    return;
                }
                let Some(op) = args[0].as_const_int().and_then(RmwOp::from_value) else {
                    self.func.set_error("Unknown AtomicRMW operation");
                    return;
                };
                self.lower_atomic_rmw(dest.unwrap(), op, &args[1], &args[2]);
            }
            Intrinsic::AtomicStore => {
                if !verify_memory_order(&args[2]) {
                    self.func.set_error("Unexpected memory ordering for AtomicStore");
                    return;
                }
                let value = args[0].clone();
                let ptr = args[1].clone();
                if value.ty(self.func) == Type::I64 {
                    // Single 64-bit access: bitcast into an xmm register
                    // and movq it down. A fence makes the store visible.
                    let t = self.make_reg(Type::F64, None);
                    self.lower_cast(CastOp::Bitcast, t, value);
                    let addr = self.form_memory_operand(&ptr, Type::F64);
                    self.push(XInst::StoreQ {
                        value: t,
                        addr,
                    });
                    self.push(XInst::Mfence);
                    return;
                }
                self.lower_store_for_intrinsic(value, ptr);
                self.push(XInst::Mfence);
            }
            Intrinsic::Bswap => {
                let dest = dest.unwrap();
                let val = args[0].clone();
                match val.ty(self.func) {
                    Type::I64 => {
                        // bswap both halves and exchange them.
                        let lo = self.lo_operand(&val);
                        let hi = self.hi_operand(&val);
                        let t_lo = self.legalize_to_var(lo, None);
                        let t_hi = self.legalize_to_var(hi, None);
                        let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
                        self.push(XInst::Bswap { dst: t_lo });
                        self.push(XInst::Bswap { dst: t_hi });
                        self.mov(dest_lo, t_hi);
                        self.mov(dest_hi, t_lo);
                    }
                    Type::I32 => {
                        let t = self.legalize_to_var(val, None);
                        self.push(XInst::Bswap { dst: t });
                        self.mov(dest, t);
                    }
                    _ => {
                        // 16-bit bswap is a rotate by 8.
                        let val = self.legalize(val, LEGAL_ALL, None);
                        let t = self.mov_temp(val);
                        self.push(XInst::Rol {
                            dst: t,
                            amount: Operand::Const(Constant::Int {
                                ty: Type::I16,
                                value: 8,
                            }),
                        });
                        self.mov(dest, t);
                    }
                }
            }
            Intrinsic::Ctpop => {
                let dest = dest.unwrap();
                let val = args[0].clone();
                let name = if val.ty(self.func) == Type::I64 {
                    "__popcountdi2"
                } else {
                    "__popcountsi2"
                };
                let is_i64 = val.ty(self.func) == Type::I64;
                self.lower_helper_call(name, Some(dest), vec![val]);
                if is_i64 {
                    // The helper returns 32 bits; the upper half is zero.
                    let (_, dest_hi) = self.lo_hi_vars(dest);
                    self.mov(dest_hi, Constant::i32(0));
                }
            }
            Intrinsic::Ctlz => {
                // The "is zero undef" argument is ignored: the result is
                // always well defined.
                let val = self.legalize(args[0].clone(), LEGAL_ALL, None);
                let ty = val.ty(self.func);
                let (first, second) = if ty == Type::I64 {
                    (self.lo_operand(&val), Some(self.hi_operand(&val)))
                } else {
                    (val, None)
                };
                self.lower_count_zeros(false, ty, dest.unwrap(), first, second);
            }
            Intrinsic::Cttz => {
                let val = self.legalize(args[0].clone(), LEGAL_ALL, None);
                let ty = val.ty(self.func);
                let (first, second) = if ty == Type::I64 {
                    (self.hi_operand(&val), Some(self.lo_operand(&val)))
                } else {
                    (val, None)
                };
                self.lower_count_zeros(true, ty, dest.unwrap(), first, second);
            }
            Intrinsic::Longjmp => {
                self.lower_helper_call("longjmp", None, vec![args[0].clone(), args[1].clone()]);
            }
            Intrinsic::Memcpy => {
                self.lower_helper_call(
                    "memcpy",
                    None,
                    vec![args[0].clone(), args[1].clone(), args[2].clone()],
                );
            }
            Intrinsic::Memmove => {
                self.lower_helper_call(
                    "memmove",
                    None,
                    vec![args[0].clone(), args[1].clone(), args[2].clone()],
                );
            }
            Intrinsic::Memset => {
                // Widen the i8 value: helper arguments are at least 32 bits.
                let val_ext = self.func.make_temp(Type::I32, None);
                self.lower_cast(CastOp::Zext, val_ext, args[1].clone());
                self.lower_helper_call(
                    "memset",
                    None,
                    vec![args[0].clone(), Operand::Var(val_ext), args[2].clone()],
                );
            }
            Intrinsic::ReadTp => {
                let dest = dest.unwrap();
                if self.ctx.flags.use_sandboxing {
                    let src = Operand::Mem(MemOperand {
                        ty: Type::I32,
                        base: None,
                        index: None,
                        shift: 0,
                        offset: Some(Constant::i32(0)),
                        seg: SegmentReg::Gs,
                    });
                    let t = self.mov_temp(src);
                    self.mov(dest, t);
                } else {
                    self.lower_helper_call("__nacl_read_tp", Some(dest), vec![]);
                }
            }
            Intrinsic::Setjmp => {
                self.lower_helper_call("setjmp", dest, vec![args[0].clone()]);
            }
            Intrinsic::Sqrt => {
                let dest = dest.unwrap();
                let src = self.legalize(args[0].clone(), LEGAL_ALL, None);
                let ty = self.func.var(dest).ty;
                let t = self.make_reg(ty, None);
                self.push(XInst::Sqrtss { dst: t, src });
                self.mov(dest, t);
            }
            Intrinsic::Stacksave => {
                let esp = self.get_phys(Reg::Esp.num());
                self.mov(dest.unwrap(), esp);
            }
            Intrinsic::Stackrestore => {
                let esp = self.get_phys(Reg::Esp.num());
                let val = self.legalize(args[0].clone(), LEGAL_ALL, None);
                self.mov(esp, val);
            }
            Intrinsic::Trap => self.push(XInst::Ud2),
        }
    }

    /// Load/store entry points reused by the atomic paths (the IR-level
    /// Load/Store lowerings are private to the dispatcher).
    fn lower_load_for_intrinsic(&mut self, dest: VarRef, addr: Operand) {
        let ty = self.func.var(dest).ty;
        let mem = self.form_memory_operand(&addr, ty);
        self.lower_assign(dest, Operand::Mem(mem));
    }

    fn lower_store_for_intrinsic(&mut self, value: Operand, addr: Operand) {
        let ty = value.ty(self.func);
        let mem = self.form_memory_operand(&addr, ty);
        if ty.is_vector() {
            let v = self.legalize_to_var(value, None);
            self.push(XInst::StoreP { value: v, addr: mem });
        } else {
            let value = self.legalize(value, LEGAL_REG | LEGAL_IMM, None);
            self.push(XInst::Store {
                value,
                addr: Operand::Mem(mem),
            });
        }
    }

    /// The destination variable of the most recently emitted instruction.
    fn last_lowered_dest(&self) -> Option<VarRef> {
        let mut ops = Vec::new();
        for inst in self.current_output().iter().rev() {
            ops.clear();
            inst.reg_operands(&mut ops);
            if let Some(def) = ops
                .iter()
                .find(|o| matches!(o.kind, OpKind::Def | OpKind::UseDef))
            {
                return Some(VarRef(def.var));
            }
        }
        None
    }

    // ── Atomic compare-exchange ──

    pub(crate) fn lower_atomic_cmpxchg(
        &mut self,
        dest_prev: VarRef,
        ptr: &Operand,
        expected: &Operand,
        desired: &Operand,
    ) {
        if expected.ty(self.func) == Type::I64 {
            // Reserve the pre-colored registers before legalization adds
            // more infinite-weight variables.
            let t_edx = self.make_reg(Type::I32, Some(Reg::Edx.num()));
            let t_eax = self.make_reg(Type::I32, Some(Reg::Eax.num()));
            let t_ecx = self.make_reg(Type::I32, Some(Reg::Ecx.num()));
            let t_ebx = self.make_reg(Type::I32, Some(Reg::Ebx.num()));
            let exp_lo = self.lo_operand(expected);
            let exp_hi = self.hi_operand(expected);
            let des_lo = self.lo_operand(desired);
            let des_hi = self.hi_operand(desired);
            self.mov(t_eax, exp_lo);
            self.mov(t_edx, exp_hi);
            self.mov(t_ebx, des_lo);
            self.mov(t_ecx, des_hi);
            let addr = self.form_memory_operand(ptr, Type::I64);
            self.push(XInst::Cmpxchg8b {
                addr,
                edx: t_edx,
                eax: t_eax,
                ecx: t_ecx,
                ebx: t_ebx,
                locked: true,
            });
            let (dest_lo, dest_hi) = self.lo_hi_vars(dest_prev);
            self.mov(dest_lo, t_eax);
            self.mov(dest_hi, t_edx);
            return;
        }
        let ty = expected.ty(self.func);
        let t_eax = self.make_reg(ty, Some(Reg::Eax.num()));
        self.mov(t_eax, expected.clone());
        let addr = self.form_memory_operand(ptr, ty);
        let desired_reg = self.legalize_to_var(desired.clone(), None);
        self.push(XInst::Cmpxchg {
            addr,
            eax: t_eax,
            desired: desired_reg,
            locked: true,
        });
        self.mov(dest_prev, t_eax);
    }

    /// Fuse `cmpxchg; [phi copies]; icmp eq dest, expected; br` into the
    /// cmpxchg's own flags: the phi copies are lowered in place, the
    /// compare and branch are deleted, and a `je` consumes ZF directly.
    pub(crate) fn try_optimized_cmpxchg_cmp_br(
        &mut self,
        dest: VarRef,
        ptr: &Operand,
        expected: &Operand,
        desired: &Operand,
    ) -> bool {
        if self.opt_level == OptLevel::Om1 {
            return false;
        }
        // Phi copies may sit between the cmpxchg and the compare when the
        // branch is a loop backedge.
        let mut phi_assigns = Vec::new();
        let mut cursor = match self.next_live_index() {
            Some(i) => i,
            None => return false,
        };
        loop {
            let inst = self.inst_at(cursor);
            match &inst.kind {
                InstKind::Assign { .. } => {
                    if inst.dest == Some(dest) {
                        return false;
                    }
                    phi_assigns.push(cursor);
                    cursor = match self.next_live_after(cursor) {
                        Some(i) => i,
                        None => return false,
                    };
                }
                _ => break,
            }
        }
        let cmp_idx = cursor;
        let cmp = self.inst_at(cmp_idx);
        let InstKind::Icmp { cond, a, b } = &cmp.kind else {
            return false;
        };
        let dest_op = Operand::Var(dest);
        if *cond != IcmpCond::Eq
            || !((*a == dest_op && b == expected) || (*b == dest_op && a == expected))
        {
            return false;
        }
        let cmp_dest = cmp.dest.unwrap();
        let Some(br_idx) = self.next_live_after(cmp_idx) else {
            return false;
        };
        let br = self.inst_at(br_idx);
        let InstKind::Br {
            cond: Some(br_cond),
            on_true,
            on_false,
        } = &br.kind
        else {
            return false;
        };
        if *br_cond != Operand::Var(cmp_dest) || !self.is_last_use(cmp_dest) {
            return false;
        }

        let (on_true, on_false) = (*on_true, *on_false);
        self.lower_atomic_cmpxchg(dest, ptr, expected, desired);
        for idx in phi_assigns {
            // Lower the phi copies now, keeping their placement before the
            // branch.
            let inst = self.inst_at(idx);
            let InstKind::Assign { src } = inst.kind else {
                unreachable!()
            };
            self.mark_deleted(idx);
            self.lower_assign(inst.dest.unwrap(), src);
        }
        self.push(XInst::Jcc {
            cond: BrCond::E,
            on_true: BrTarget::Block(on_true),
            on_false: Some(BrTarget::Block(on_false)),
        });
        self.mark_deleted(cmp_idx);
        self.mark_deleted(br_idx);
        true
    }

    // ── Atomic read-modify-write ──

    pub(crate) fn lower_atomic_rmw(
        &mut self,
        dest: VarRef,
        op: RmwOp,
        ptr: &Operand,
        val: &Operand,
    ) {
        let ty = self.func.var(dest).ty;
        type BinEmit = fn(VarRef, Operand) -> XInst;
        let (op_lo, op_hi): (Option<BinEmit>, Option<BinEmit>) = match op {
            RmwOp::Add => {
                if ty != Type::I64 {
                    let addr = self.form_memory_operand(ptr, ty);
                    let t = self.mov_temp(val.clone());
                    self.push(XInst::Xadd {
                        addr,
                        src: t,
                        locked: true,
                    });
                    self.mov(dest, t);
                    return;
                }
                (
                    Some(|dst, src| XInst::Add { dst, src }),
                    Some(|dst, src| XInst::Adc { dst, src }),
                )
            }
            RmwOp::Sub => {
                if ty != Type::I64 {
                    // Negate and xadd.
                    let addr = self.form_memory_operand(ptr, ty);
                    let t = self.mov_temp(val.clone());
                    self.push(XInst::Neg { dst: t });
                    self.push(XInst::Xadd {
                        addr,
                        src: t,
                        locked: true,
                    });
                    self.mov(dest, t);
                    return;
                }
                (
                    Some(|dst, src| XInst::Sub { dst, src }),
                    Some(|dst, src| XInst::Sbb { dst, src }),
                )
            }
            RmwOp::Or => (
                Some(|dst, src| XInst::Or { dst, src }),
                Some(|dst, src| XInst::Or { dst, src }),
            ),
            RmwOp::And => (
                Some(|dst, src| XInst::And { dst, src }),
                Some(|dst, src| XInst::And { dst, src }),
            ),
            RmwOp::Xor => (
                Some(|dst, src| XInst::Xor { dst, src }),
                Some(|dst, src| XInst::Xor { dst, src }),
            ),
            RmwOp::Xchg => {
                if ty != Type::I64 {
                    // A plain xchg is implicitly locked.
                    let addr = self.form_memory_operand(ptr, ty);
                    let t = self.mov_temp(val.clone());
                    self.push(XInst::Xchg { addr, src: t });
                    self.mov(dest, t);
                    return;
                }
                // The loop only needs the value in ecx:ebx.
                (None, None)
            }
        };
        self.expand_atomic_rmw_as_cmpxchg(op_lo, op_hi, dest, ptr, val);
    }

    /// Expand an RMW operation as a cmpxchg loop; the back edge retries
    /// with jne until the exchange succeeds.
    fn expand_atomic_rmw_as_cmpxchg(
        &mut self,
        op_lo: Option<fn(VarRef, Operand) -> XInst>,
        op_hi: Option<fn(VarRef, Operand) -> XInst>,
        dest: VarRef,
        ptr: &Operand,
        val: &Operand,
    ) {
        let val = self.legalize(val.clone(), LEGAL_ALL, None);
        let ty = val.ty(self.func);
        if ty == Type::I64 {
            let t_edx = self.make_reg(Type::I32, Some(Reg::Edx.num()));
            let t_eax = self.make_reg(Type::I32, Some(Reg::Eax.num()));
            let addr = self.form_memory_operand(ptr, ty);
            let addr_op = Operand::Mem(addr.clone());
            let addr_lo = self.lo_operand(&addr_op);
            let addr_hi = self.hi_operand(&addr_op);
            self.mov(t_eax, addr_lo);
            self.mov(t_edx, addr_hi);
            let t_ecx = self.make_reg(Type::I32, Some(Reg::Ecx.num()));
            let t_ebx = self.make_reg(Type::I32, Some(Reg::Ebx.num()));
            let label = self.make_label();
            let is_xchg = op_lo.is_none() && op_hi.is_none();
            let val_lo = self.lo_operand(&val);
            let val_hi = self.hi_operand(&val);
            if !is_xchg {
                self.push(XInst::Label { id: label });
                self.mov(t_ebx, t_eax);
                self.push(op_lo.unwrap()(t_ebx, val_lo.clone()));
                self.mov(t_ecx, t_edx);
                self.push(op_hi.unwrap()(t_ecx, val_hi.clone()));
            } else {
                // xchg only needs the new value loaded before the loop.
                self.mov(t_ebx, val_lo.clone());
                self.mov(t_ecx, val_hi.clone());
                self.push(XInst::Label { id: label });
            }
            self.push(XInst::Cmpxchg8b {
                addr: addr.clone(),
                edx: t_edx,
                eax: t_eax,
                ecx: t_ecx,
                ebx: t_ebx,
                locked: true,
            });
            self.push(XInst::Jcc {
                cond: BrCond::Ne,
                on_true: BrTarget::Label(label),
                on_false: None,
            });
            if !is_xchg {
                // The value is re-read on every loop iteration; extend its
                // live range past the backedge.
                if let Operand::Var(lo_v) = val_lo {
                    self.fake_use(lo_v);
                }
                if let Operand::Var(hi_v) = val_hi {
                    self.fake_use(hi_v);
                }
            } else {
                self.fake_use(t_ebx);
                self.fake_use(t_ecx);
            }
            // The address base is reused by the loop as well.
            if let Some(base) = addr.base {
                self.fake_use(base);
            }
            let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
            self.mov(dest_lo, t_eax);
            self.mov(dest_hi, t_edx);
            return;
        }

        let addr = self.form_memory_operand(ptr, ty);
        let t_eax = self.make_reg(ty, Some(Reg::Eax.num()));
        self.mov(t_eax, Operand::Mem(addr.clone()));
        let label = self.make_label();
        self.push(XInst::Label { id: label });
        // The temporary must live in a register other than eax.
        let t = self.make_reg(ty, None);
        self.mov(t, t_eax);
        self.push(op_lo.unwrap()(t, val.clone()));
        self.push(XInst::Cmpxchg {
            addr: addr.clone(),
            eax: t_eax,
            desired: t,
            locked: true,
        });
        self.push(XInst::Jcc {
            cond: BrCond::Ne,
            on_true: BrTarget::Label(label),
            on_false: None,
        });
        if let Operand::Var(v) = val {
            self.fake_use(v);
        }
        if let Some(base) = addr.base {
            self.fake_use(base);
        }
        self.mov(dest, t_eax);
    }

    // ── Count leading/trailing zeros ──

    /// bsf/bsr with a cmov fallback for the all-zero input; ctlz converts
    /// the bit position to a zero count with an xor against 31. The 64-bit
    /// form computes the `second` half speculatively and selects with a
    /// cmov keyed on a test of `second`.
    pub(crate) fn lower_count_zeros(
        &mut self,
        cttz: bool,
        ty: Type,
        dest: VarRef,
        first: Operand,
        second: Option<Operand>,
    ) {
        debug_assert!(ty == Type::I32 || ty == Type::I64);
        let first_rm = self.legalize(first, LEGAL_REG | LEGAL_MEM, None);
        let t = self.make_reg(Type::I32, None);
        if cttz {
            self.push(XInst::Bsf { dst: t, src: first_rm });
        } else {
            self.push(XInst::Bsr { dst: t, src: first_rm });
        }
        let t_dest = self.make_reg(Type::I32, None);
        let thirty_two = Constant::i32(32);
        let thirty_one = Constant::i32(31);
        if cttz {
            self.mov(t_dest, thirty_two.clone());
        } else {
            self.mov(t_dest, Constant::i32(63));
        }
        self.push(XInst::Cmov {
            dst: t_dest,
            src: Operand::Var(t),
            cond: BrCond::Ne,
        });
        if !cttz {
            self.push(XInst::Xor {
                dst: t_dest,
                src: Operand::Const(thirty_one.clone()),
            });
        }
        if ty == Type::I32 {
            self.mov(dest, t_dest);
            return;
        }
        self.push(XInst::Add {
            dst: t_dest,
            src: Operand::Const(thirty_two),
        });
        let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
        // test needs a registerized operand.
        let second_var = self.legalize_to_var(second.expect("i64 second half"), None);
        let t_dest2 = self.make_reg(Type::I32, None);
        if cttz {
            self.push(XInst::Bsf {
                dst: t_dest2,
                src: Operand::Var(second_var),
            });
        } else {
            self.push(XInst::Bsr {
                dst: t_dest2,
                src: Operand::Var(second_var),
            });
            self.push(XInst::Xor {
                dst: t_dest2,
                src: Operand::Const(thirty_one),
            });
        }
        self.push(XInst::Test {
            a: Operand::Var(second_var),
            b: Operand::Var(second_var),
        });
        self.push(XInst::Cmov {
            dst: t_dest2,
            src: Operand::Var(t_dest),
            cond: BrCond::E,
        });
        self.mov(dest_lo, t_dest2);
        self.mov(dest_hi, Constant::i32(0));
    }
}
