//! Instruction lowering: translate opal IR to x86-32 pseudo-instructions.
//!
//! One rule per IR opcode. 64-bit values are lowered strictly in terms of
//! their 32-bit halves; operands are pushed through `legalize` into the
//! forms each machine instruction admits; fresh virtual registers carry
//! infinite allocation weight so the allocator (or the Om1 post-lower
//! assignment) must place them in registers.

use opal_ir::context::GlobalContext;
use opal_ir::function::{Function, RegWeight};
use opal_ir::instruction::{ArithOp, CastOp, FcmpCond, IcmpCond, Inst, InstKind};
use opal_ir::operand::{Constant, Half, MemOperand, Operand, VariableSplit};
use opal_ir::types::Type;
use opal_ir::value::{BlockRef, VarRef};

use crate::backend::OptLevel;
use crate::inst::{BrCond, BrTarget, CmppsCond, XInst};
use crate::opts::{InstructionSet, TargetOpts};
use crate::reg::{self, Reg, RegNum, REG_NUM};
use crate::types::{in_vector_element_type, width_on_stack};

/// Legalization masks: the operand forms an instruction admits.
pub const LEGAL_REG: u8 = 1 << 0;
pub const LEGAL_MEM: u8 = 1 << 1;
pub const LEGAL_IMM: u8 = 1 << 2;
pub const LEGAL_RELOC: u8 = 1 << 3;
pub const LEGAL_ALL: u8 = LEGAL_REG | LEGAL_MEM | LEGAL_IMM | LEGAL_RELOC;

/// The maximum number of arguments passed in xmm registers.
pub const MAX_XMM_ARGS: usize = 4;
/// Stack alignment required at call sites.
pub const STACK_ALIGNMENT_BYTES: u32 = 16;
/// Size of the return address on the stack.
pub const RET_IP_SIZE_BYTES: u32 = 4;
/// The number of distinct nop encodings used by nop insertion.
pub const NUM_NOP_VARIANTS: u8 = 5;

/// Round `value` up to the next multiple of a power-of-two `alignment`.
pub fn apply_alignment(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & alignment.wrapping_neg()
}

/// Round up to the call-site stack alignment.
pub fn apply_stack_alignment(value: u32) -> u32 {
    apply_alignment(value, STACK_ALIGNMENT_BYTES)
}

/// Lowered form of one basic block.
#[derive(Debug)]
pub struct LoweredBlock {
    pub block: BlockRef,
    pub insts: Vec<XInst>,
}

/// Canonical physical-register variables, created on demand and never
/// mutated after first insert.
pub struct PhysRegs {
    regs: Vec<Option<VarRef>>,
}

impl PhysRegs {
    pub fn new() -> PhysRegs {
        PhysRegs {
            regs: vec![None; REG_NUM],
        }
    }

    pub fn get(&mut self, func: &mut Function, num: RegNum) -> VarRef {
        if let Some(v) = self.regs[num as usize] {
            return v;
        }
        // None as the defining block: physical registers have multi-block
        // lifetime.
        let v = func.make_variable(Type::I32, None, reg::reg_name(num, Type::I32));
        func.var_mut(v).reg_num = Some(num);
        self.regs[num as usize] = Some(v);
        v
    }
}

impl Default for PhysRegs {
    fn default() -> Self {
        PhysRegs::new()
    }
}

/// Per-function lowering state.
pub struct Isel<'a> {
    pub func: &'a mut Function,
    pub ctx: &'a mut GlobalContext,
    pub opts: &'a TargetOpts,
    pub opt_level: OptLevel,
    pub lowered: Vec<LoweredBlock>,
    pub phys_regs: PhysRegs,
    /// Set by alloca: variables must be addressed off ebp.
    pub is_ebp_based_frame: bool,
    /// Set by calls and allocas: the prolog must 16-byte align esp.
    pub needs_stack_alignment: bool,
    out: Vec<XInst>,
    cur_block: BlockRef,
    cur_index: usize,
    next_label: u32,
    use_counts: Vec<u32>,
}

impl<'a> Isel<'a> {
    pub fn new(
        func: &'a mut Function,
        ctx: &'a mut GlobalContext,
        opts: &'a TargetOpts,
        opt_level: OptLevel,
    ) -> Isel<'a> {
        let next_label = func.blocks.len() as u32;
        Isel {
            func,
            ctx,
            opts,
            opt_level,
            lowered: Vec::new(),
            phys_regs: PhysRegs::new(),
            is_ebp_based_frame: false,
            needs_stack_alignment: false,
            out: Vec::new(),
            cur_block: BlockRef(0),
            cur_index: 0,
            next_label,
            use_counts: Vec::new(),
        }
    }

    // ── Argument lowering ──

    /// Rehome the first four vector arguments into xmm0..xmm3: the argument
    /// list entry becomes a pre-colored register variable and a copy into
    /// the original variable is inserted at the top of the entry block.
    pub fn lower_arguments(&mut self) {
        let mut num_xmm = 0usize;
        let mut copies = Vec::new();
        for i in 0..self.func.args.len() {
            if num_xmm >= MAX_XMM_ARGS {
                break;
            }
            let arg = self.func.args[i];
            let ty = self.func.var(arg).ty;
            if !ty.is_vector() {
                continue;
            }
            let reg_num = Reg::Xmm0.num() + num_xmm as u32;
            num_xmm += 1;
            let name = format!("home_reg:{}", self.func.var(arg).name);
            let home = self.func.make_variable(ty, None, name);
            self.func.var_mut(home).reg_num = Some(reg_num);
            self.func.var_mut(home).is_arg = true;
            self.func.var_mut(arg).is_arg = false;
            self.func.args[i] = home;
            copies.push(Inst::new(
                InstKind::Assign {
                    src: Operand::Var(home),
                },
                Some(arg),
            ));
        }
        let entry = self.func.entry_block().index();
        for (k, c) in copies.into_iter().enumerate() {
            self.func.blocks[entry].insts.insert(k, c);
        }
    }

    // ── Code generation driver ──

    /// Lower every block of the function. Stops early if the function
    /// enters the error state.
    pub fn gen_code(&mut self) {
        self.use_counts = self.func.compute_use_counts();
        for bi in 0..self.func.blocks.len() {
            if self.func.has_error() {
                return;
            }
            self.cur_block = BlockRef(bi as u32);
            self.out = vec![XInst::Label { id: bi as u32 }];
            let mut i = 0;
            while i < self.func.blocks[bi].insts.len() {
                if self.func.has_error() {
                    break;
                }
                let inst = self.func.blocks[bi].insts[i].clone();
                self.cur_index = i;
                if !inst.deleted {
                    self.lower_inst(&inst);
                }
                i += 1;
            }
            let insts = std::mem::take(&mut self.out);
            self.lowered.push(LoweredBlock {
                block: self.cur_block,
                insts,
            });
        }
    }

    fn lower_inst(&mut self, inst: &Inst) {
        match inst.kind.clone() {
            InstKind::Alloca { size, align } => self.lower_alloca(inst.dest.unwrap(), size, align),
            InstKind::Arith { op, a, b } => self.lower_arithmetic(inst.dest.unwrap(), op, a, b),
            InstKind::Assign { src } => self.lower_assign(inst.dest.unwrap(), src),
            InstKind::Br {
                cond,
                on_true,
                on_false,
            } => self.lower_br(cond, on_true, on_false),
            InstKind::Call {
                target,
                args,
                has_side_effects,
                returns_twice,
            } => {
                if returns_twice {
                    self.func.calls_returns_twice = true;
                }
                self.lower_call(inst.dest, target, &args, has_side_effects);
            }
            InstKind::Cast { op, src } => self.lower_cast(op, inst.dest.unwrap(), src),
            InstKind::ExtractElement { vec, index } => {
                self.lower_extract_element(inst.dest.unwrap(), vec, index)
            }
            InstKind::Fcmp { cond, a, b } => self.lower_fcmp(inst.dest.unwrap(), cond, a, b),
            InstKind::Icmp { cond, a, b } => self.lower_icmp(inst.dest.unwrap(), cond, a, b),
            InstKind::InsertElement { vec, elem, index } => {
                self.lower_insert_element(inst.dest.unwrap(), vec, elem, index)
            }
            InstKind::IntrinsicCall { id, args } => {
                self.lower_intrinsic_call(inst.dest, id, &args)
            }
            InstKind::Load { addr } => self.lower_load(inst.dest.unwrap(), addr),
            InstKind::Phi { .. } => {
                self.func.set_error("Phi found in regular instruction list");
            }
            InstKind::Ret { src } => self.lower_ret(src),
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => self.lower_select(inst.dest.unwrap(), cond, on_true, on_false),
            InstKind::Store { value, addr } => self.lower_store(value, addr),
            InstKind::Switch {
                value,
                cases,
                default,
            } => self.lower_switch(value, &cases, default),
            InstKind::Unreachable => self.lower_unreachable(),
        }
    }

    // ── Emission helpers ──

    pub(crate) fn push(&mut self, i: XInst) {
        self.out.push(i);
    }

    pub(crate) fn current_output(&self) -> &[XInst] {
        &self.out
    }

    pub(crate) fn mov(&mut self, dst: VarRef, src: impl Into<Operand>) {
        self.push(XInst::Mov {
            dst,
            src: src.into(),
        });
    }

    pub(crate) fn movp(&mut self, dst: VarRef, src: impl Into<Operand>) {
        self.push(XInst::Movp {
            dst,
            src: src.into(),
        });
    }

    pub(crate) fn fake_use(&mut self, v: VarRef) {
        self.push(XInst::FakeUse { src: v });
    }

    pub(crate) fn fake_def(&mut self, dst: VarRef, src: Option<VarRef>) {
        self.push(XInst::FakeDef { dst, src });
    }

    /// Copy `src` into a fresh infinite-weight temporary of its own type.
    pub(crate) fn mov_temp(&mut self, src: Operand) -> VarRef {
        let ty = src.ty(self.func);
        let t = self.make_reg(ty, None);
        self.mov(t, src);
        t
    }

    /// Copy `src` into a fresh temporary pinned to a physical register.
    pub(crate) fn mov_temp_to(&mut self, src: Operand, reg: RegNum) -> VarRef {
        let ty = src.ty(self.func);
        let t = self.make_reg(ty, Some(reg));
        self.mov(t, src);
        t
    }

    /// Mint a fresh in-block label id.
    pub(crate) fn make_label(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    pub(crate) fn get_phys(&mut self, num: RegNum) -> VarRef {
        self.phys_regs.get(self.func, num)
    }

    /// A fresh virtual register variable: infinite weight, or pre-colored.
    pub(crate) fn make_reg(&mut self, ty: Type, reg: Option<RegNum>) -> VarRef {
        debug_assert!(ty != Type::I64, "no 64-bit integer registers on x86-32");
        let cur = self.cur_block;
        let v = self.func.make_temp(ty, Some(cur));
        match reg {
            Some(r) => self.func.var_mut(v).reg_num = Some(r),
            None => self.func.var_mut(v).weight = RegWeight::Infinite,
        }
        v
    }

    // ── Peephole support ──

    /// Index of the next non-deleted instruction after the current one.
    pub(crate) fn next_live_index(&self) -> Option<usize> {
        let insts = &self.func.blocks[self.cur_block.index()].insts;
        ((self.cur_index + 1)..insts.len()).find(|&i| !insts[i].deleted)
    }

    pub(crate) fn next_live_after(&self, idx: usize) -> Option<usize> {
        let insts = &self.func.blocks[self.cur_block.index()].insts;
        ((idx + 1)..insts.len()).find(|&i| !insts[i].deleted)
    }

    pub(crate) fn inst_at(&self, idx: usize) -> Inst {
        self.func.blocks[self.cur_block.index()].insts[idx].clone()
    }

    pub(crate) fn mark_deleted(&mut self, idx: usize) {
        self.func.blocks[self.cur_block.index()].insts[idx].deleted = true;
    }

    /// Conservative last-use query backed by whole-function use counts.
    /// Only meaningful at O2; Om1 runs without it.
    pub(crate) fn is_last_use(&self, v: VarRef) -> bool {
        self.opt_level == OptLevel::O2
            && self.use_counts.get(v.index()).map_or(false, |c| *c <= 1)
    }

    // ── 64-bit splitting ──

    /// Ensure the lo/hi halves of an i64/f64 variable exist. Idempotent.
    pub fn split64(&mut self, v: VarRef) {
        let ty = self.func.var(v).ty;
        if ty != Type::I64 && ty != Type::F64 {
            return;
        }
        if self.func.var(v).lo.is_some() {
            debug_assert!(self.func.var(v).hi.is_some());
            return;
        }
        let def = self.func.var(v).def_block;
        let is_arg = self.func.var(v).is_arg;
        let name = self.func.var(v).name.clone();
        let lo = self.func.make_variable(Type::I32, def, format!("{name}__lo"));
        let hi = self.func.make_variable(Type::I32, def, format!("{name}__hi"));
        if is_arg {
            self.func.var_mut(lo).is_arg = true;
            self.func.var_mut(hi).is_arg = true;
        }
        self.func.var_mut(v).lo = Some(lo);
        self.func.var_mut(v).hi = Some(hi);
    }

    /// The low 32-bit view of an i64 operand.
    pub fn lo_operand(&mut self, op: &Operand) -> Operand {
        match op {
            Operand::Var(v) => {
                self.split64(*v);
                Operand::Var(self.func.var(*v).lo.expect("split64"))
            }
            Operand::Const(Constant::Int { value, .. }) => {
                Operand::Const(Constant::i32(((*value as u64) & 0xffff_ffff) as i64))
            }
            Operand::Mem(m) => {
                let mut m = m.clone();
                m.ty = Type::I32;
                Operand::Mem(m)
            }
            _ => unreachable!("lo_operand on unsupported operand"),
        }
    }

    /// The high 32-bit view of an i64 operand.
    pub fn hi_operand(&mut self, op: &Operand) -> Operand {
        match op {
            Operand::Var(v) => {
                self.split64(*v);
                Operand::Var(self.func.var(*v).hi.expect("split64"))
            }
            Operand::Const(Constant::Int { value, .. }) => {
                Operand::Const(Constant::i32(((*value as u64) >> 32) as i64))
            }
            Operand::Mem(m) => {
                let mut m = m.clone();
                m.ty = Type::I32;
                m.offset = Some(match m.offset.take() {
                    None => Constant::i32(4),
                    Some(Constant::Int { value, .. }) => Constant::i32(value + 4),
                    Some(Constant::Reloc { name, offset }) => Constant::Reloc {
                        name,
                        offset: offset + 4,
                    },
                    Some(other) => unreachable!("bad memory offset {other:?}"),
                });
                Operand::Mem(m)
            }
            _ => unreachable!("hi_operand on unsupported operand"),
        }
    }

    /// Split a 64-bit destination and return its (lo, hi) variables.
    pub(crate) fn lo_hi_vars(&mut self, dest: VarRef) -> (VarRef, VarRef) {
        self.split64(dest);
        let var = self.func.var(dest);
        (var.lo.expect("split64"), var.hi.expect("split64"))
    }

    // ── Legalization ──

    /// Emit the moves needed to bring `from` into a form in `allowed`,
    /// optionally pinning the result to a physical register.
    pub fn legalize(&mut self, from: Operand, allowed: u8, reg: Option<RegNum>) -> Operand {
        debug_assert!(allowed & LEGAL_REG != 0);
        debug_assert!(reg.is_none() || allowed == LEGAL_REG);
        match from {
            Operand::Mem(mut m) => {
                // Base and index must be in physical registers before the
                // operand can appear in an instruction.
                if let Some(b) = m.base {
                    m.base = Some(self.legalize_to_var(Operand::Var(b), None));
                }
                if let Some(ix) = m.index {
                    m.index = Some(self.legalize_to_var(Operand::Var(ix), None));
                }
                let from = Operand::Mem(m);
                if allowed & LEGAL_MEM == 0 {
                    Operand::Var(self.copy_to_reg(from, reg))
                } else {
                    from
                }
            }
            Operand::Const(c) => {
                let c = match c {
                    Constant::Undef(ty) if ty.is_vector() => {
                        // Lower vector undef to an all-zero register.
                        return Operand::Var(self.make_vector_of_zeros(ty, reg));
                    }
                    Constant::Undef(ty) => Constant::zero(ty),
                    other => other,
                };
                let ty = c.ty();
                let mut needs_reg = allowed & LEGAL_IMM == 0;
                if allowed & LEGAL_RELOC == 0 && matches!(c, Constant::Reloc { .. }) {
                    needs_reg = true;
                }
                // FP constants live in the constant pool and reach
                // instructions only as memory.
                if allowed & LEGAL_MEM == 0 && (ty == Type::F32 || ty == Type::F64) {
                    needs_reg = true;
                }
                if needs_reg {
                    Operand::Var(self.copy_to_reg(Operand::Const(c), reg))
                } else {
                    Operand::Const(c)
                }
            }
            Operand::Var(v) => {
                // A variable is register-guaranteed when pre-colored or of
                // infinite weight.
                let var = self.func.var(v);
                let must_have_register =
                    var.has_reg() || var.weight == RegWeight::Infinite;
                let cur_reg = var.reg_num;
                if (allowed & LEGAL_MEM == 0 && !must_have_register)
                    || (reg.is_some() && reg != cur_reg)
                {
                    Operand::Var(self.copy_to_reg(Operand::Var(v), reg))
                } else {
                    Operand::Var(v)
                }
            }
            Operand::Split(s) => {
                // A split half is a stack-resident view.
                if allowed & LEGAL_MEM == 0 {
                    Operand::Var(self.copy_to_reg(Operand::Split(s), reg))
                } else {
                    Operand::Split(s)
                }
            }
        }
    }

    /// Legalize demanding a Variable result.
    pub fn legalize_to_var(&mut self, from: Operand, reg: Option<RegNum>) -> VarRef {
        match self.legalize(from, LEGAL_REG, reg) {
            Operand::Var(v) => v,
            other => unreachable!("legalize(Legal_Reg) produced {other:?}"),
        }
    }

    fn copy_to_reg(&mut self, src: Operand, reg: Option<RegNum>) -> VarRef {
        let ty = src.ty(self.func);
        let r = self.make_reg(ty, reg);
        if ty.is_vector() {
            self.movp(r, src);
        } else {
            self.mov(r, src);
        }
        r
    }

    /// Wrap an address operand as a memory operand of type `ty` and
    /// legalize its components.
    pub fn form_memory_operand(&mut self, op: &Operand, ty: Type) -> MemOperand {
        let mem = match op {
            Operand::Mem(m) => {
                let mut m = m.clone();
                m.ty = ty;
                m
            }
            Operand::Var(v) => MemOperand::new(ty, Some(*v), None),
            Operand::Const(c @ (Constant::Int { .. } | Constant::Reloc { .. })) => {
                MemOperand::new(ty, None, Some(c.clone()))
            }
            other => unreachable!("cannot form a memory operand from {other:?}"),
        };
        match self.legalize(Operand::Mem(mem), LEGAL_REG | LEGAL_MEM, None) {
            Operand::Mem(m) => m,
            other => unreachable!("memory legalization produced {other:?}"),
        }
    }

    /// Address a byte offset inside a stack-resident variable.
    pub(crate) fn memory_operand_for_stack_slot(
        &mut self,
        ty: Type,
        slot: VarRef,
        offset: u32,
    ) -> MemOperand {
        debug_assert!(self.func.var(slot).weight == RegWeight::Zero);
        let loc = self.make_reg(Type::I32, None);
        self.push(XInst::Lea {
            dst: loc,
            src: Operand::Var(slot),
        });
        MemOperand::new(ty, Some(loc), Some(Constant::i32(offset as i64)))
    }

    // ── Vector constant materialization ──

    /// All-zero vector register (pxor reg, reg).
    pub(crate) fn make_vector_of_zeros(&mut self, ty: Type, reg: Option<RegNum>) -> VarRef {
        let r = self.make_reg(ty, reg);
        // FakeDef keeps the live range from being overestimated.
        self.fake_def(r, None);
        self.push(XInst::Pxor {
            dst: r,
            src: Operand::Var(r),
        });
        r
    }

    /// All-ones-per-bit vector register (pcmpeq reg, reg).
    pub(crate) fn make_vector_of_minus_ones(&mut self, ty: Type, reg: Option<RegNum>) -> VarRef {
        let r = self.make_reg(ty, reg);
        self.fake_def(r, None);
        self.push(XInst::Pcmpeq {
            dst: r,
            src: Operand::Var(r),
        });
        r
    }

    /// Vector of element value 1 (zeros minus minus-ones).
    pub(crate) fn make_vector_of_ones(&mut self, ty: Type, reg: Option<RegNum>) -> VarRef {
        let dest = self.make_vector_of_zeros(ty, reg);
        let minus_one = self.make_vector_of_minus_ones(ty, None);
        self.push(XInst::Psub {
            dst: dest,
            src: Operand::Var(minus_one),
        });
        dest
    }

    /// Vector with only the sign bit of each element set.
    pub(crate) fn make_vector_of_high_order_bits(
        &mut self,
        ty: Type,
        reg: Option<RegNum>,
    ) -> VarRef {
        if matches!(ty, Type::V4F32 | Type::V4I32 | Type::V8I16) {
            let r = self.make_vector_of_ones(ty, reg);
            let shift = in_vector_element_type(ty).byte_width() * 8 - 1;
            self.push(XInst::Psll {
                dst: r,
                amount: Operand::Const(Constant::Int {
                    ty: Type::I8,
                    value: shift as i64,
                }),
            });
            r
        } else {
            // SSE has no left shift for vectors of 8-bit integers;
            // broadcast 0x80808080 instead.
            let mask = Constant::i32(0x8080_8080u32 as i64);
            let r = self.make_reg(ty, reg);
            let mask_op = self.legalize(Operand::Const(mask), LEGAL_REG | LEGAL_MEM, None);
            self.push(XInst::Movd { dst: r, src: mask_op });
            self.push(XInst::Pshufd {
                dst: r,
                src: Operand::Var(r),
                mask: 0,
            });
            r
        }
    }

    /// Delete an immediately following sign-extension of a sign-extended
    /// vector compare result, copying the compare result instead.
    pub(crate) fn eliminate_next_vector_sext(&mut self, result: VarRef) {
        let Some(next) = self.next_live_index() else {
            return;
        };
        let inst = self.inst_at(next);
        if let InstKind::Cast {
            op: CastOp::Sext,
            src,
        } = &inst.kind
        {
            if *src == Operand::Var(result) {
                self.mark_deleted(next);
                let dest = inst.dest.unwrap();
                let copy = self.legalize_to_var(Operand::Var(result), None);
                self.movp(dest, copy);
            }
        }
    }

    // ── Per-opcode rules ──

    fn lower_alloca(&mut self, dest: VarRef, size: Operand, align: u32) {
        self.is_ebp_based_frame = true;
        // The adjustments below assume an aligned stack; the sequence
        // preserves that alignment afterwards.
        self.needs_stack_alignment = true;
        let esp = self.get_phys(Reg::Esp.num());
        let total = self.legalize(size, LEGAL_ALL, None);
        let alignment = align.max(1).max(STACK_ALIGNMENT_BYTES);
        if alignment > STACK_ALIGNMENT_BYTES {
            self.push(XInst::And {
                dst: esp,
                src: Operand::Const(Constant::i32(-(alignment as i64))),
            });
        }
        if let Some(value) = total.as_const_int() {
            let value = apply_alignment(value as u32, alignment);
            self.push(XInst::Sub {
                dst: esp,
                src: Operand::Const(Constant::i32(value as i64)),
            });
        } else {
            // Runtime size: round up to the alignment before subtracting.
            let t = self.mov_temp(total);
            self.push(XInst::Add {
                dst: t,
                src: Operand::Const(Constant::i32(alignment as i64 - 1)),
            });
            self.push(XInst::And {
                dst: t,
                src: Operand::Const(Constant::i32(-(alignment as i64))),
            });
            self.push(XInst::Sub {
                dst: esp,
                src: Operand::Var(t),
            });
        }
        self.mov(dest, esp);
    }

    fn lower_arithmetic(&mut self, dest: VarRef, op: ArithOp, a: Operand, b: Operand) {
        let dest_ty = self.func.var(dest).ty;
        let src0 = self.legalize(a.clone(), LEGAL_ALL, None);
        let src1 = self.legalize(b.clone(), LEGAL_ALL, None);
        if dest_ty == Type::I64 {
            self.lower_arithmetic_i64(dest, op, a, b, src0, src1);
        } else if dest_ty.is_vector() {
            self.lower_arithmetic_vector(dest, op, src0, src1);
        } else {
            self.lower_arithmetic_scalar(dest, op, a, b, src0, src1);
        }
    }

    fn lower_arithmetic_i64(
        &mut self,
        dest: VarRef,
        op: ArithOp,
        orig_a: Operand,
        orig_b: Operand,
        src0: Operand,
        src1: Operand,
    ) {
        let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
        let src0_lo = self.lo_operand(&src0);
        let src0_hi = self.hi_operand(&src0);
        let src1_lo = self.lo_operand(&src1);
        let src1_hi = self.hi_operand(&src1);
        let halves = (dest_lo, dest_hi);
        match op {
            ArithOp::Add => self.i64_halfwise(
                halves,
                (src0_lo, src1_lo),
                (src0_hi, src1_hi),
                |dst, src| XInst::Add { dst, src },
                |dst, src| XInst::Adc { dst, src },
            ),
            ArithOp::Sub => self.i64_halfwise(
                halves,
                (src0_lo, src1_lo),
                (src0_hi, src1_hi),
                |dst, src| XInst::Sub { dst, src },
                |dst, src| XInst::Sbb { dst, src },
            ),
            ArithOp::And => self.i64_halfwise(
                halves,
                (src0_lo, src1_lo),
                (src0_hi, src1_hi),
                |dst, src| XInst::And { dst, src },
                |dst, src| XInst::And { dst, src },
            ),
            ArithOp::Or => self.i64_halfwise(
                halves,
                (src0_lo, src1_lo),
                (src0_hi, src1_hi),
                |dst, src| XInst::Or { dst, src },
                |dst, src| XInst::Or { dst, src },
            ),
            ArithOp::Xor => self.i64_halfwise(
                halves,
                (src0_lo, src1_lo),
                (src0_hi, src1_hi),
                |dst, src| XInst::Xor { dst, src },
                |dst, src| XInst::Xor { dst, src },
            ),
            ArithOp::Mul => {
                // Schoolbook expansion:
                //   t1 = hi(a); t1 *= lo(b)
                //   t2 = hi(b); t2 *= lo(a)
                //   t3:eax = lo(a)
                //   t4.hi:edx, t4.lo:eax = t3 * lo(b)
                //   dest.lo = t4.lo
                //   t4.hi += t1; t4.hi += t2
                //   dest.hi = t4.hi
                // The one-operand mul cannot take an immediate.
                let src1_lo = self.legalize(src1_lo, LEGAL_REG | LEGAL_MEM, None);
                let t4_lo = self.make_reg(Type::I32, Some(Reg::Eax.num()));
                let t4_hi = self.make_reg(Type::I32, Some(Reg::Edx.num()));
                let t1 = self.mov_temp(src0_hi);
                self.push(XInst::Imul {
                    dst: t1,
                    src: src1_lo.clone(),
                });
                let t2 = self.mov_temp(src1_hi);
                self.push(XInst::Imul {
                    dst: t2,
                    src: src0_lo.clone(),
                });
                let t3 = self.mov_temp_to(src0_lo, Reg::Eax.num());
                self.push(XInst::Mul {
                    dst_lo: t4_lo,
                    a: t3,
                    src: src1_lo,
                });
                // mul defines edx:eax; account for the high half.
                self.fake_def(t4_hi, Some(t4_lo));
                self.mov(dest_lo, t4_lo);
                self.push(XInst::Add {
                    dst: t4_hi,
                    src: Operand::Var(t1),
                });
                self.push(XInst::Add {
                    dst: t4_hi,
                    src: Operand::Var(t2),
                });
                self.mov(dest_hi, t4_hi);
            }
            ArithOp::Shl | ArithOp::Lshr | ArithOp::Ashr => {
                self.lower_shift_i64(op, dest_lo, dest_hi, src0_lo, src0_hi, src1_lo);
            }
            ArithOp::Udiv => self.lower_helper_call("__udivdi3", Some(dest), vec![orig_a, orig_b]),
            ArithOp::Sdiv => self.lower_helper_call("__divdi3", Some(dest), vec![orig_a, orig_b]),
            ArithOp::Urem => self.lower_helper_call("__umoddi3", Some(dest), vec![orig_a, orig_b]),
            ArithOp::Srem => self.lower_helper_call("__moddi3", Some(dest), vec![orig_a, orig_b]),
            ArithOp::Fadd | ArithOp::Fsub | ArithOp::Fmul | ArithOp::Fdiv | ArithOp::Frem => {
                unreachable!("FP instruction with i64 type")
            }
        }
    }

    /// Half-wise i64 lowering: lo-op on the low halves, hi-op on the high
    /// halves (add/adc, sub/sbb, or the same bitwise op twice).
    fn i64_halfwise(
        &mut self,
        (dest_lo, dest_hi): (VarRef, VarRef),
        (src0_lo, src1_lo): (Operand, Operand),
        (src0_hi, src1_hi): (Operand, Operand),
        lo_op: fn(VarRef, Operand) -> XInst,
        hi_op: fn(VarRef, Operand) -> XInst,
    ) {
        let t_lo = self.mov_temp(src0_lo);
        self.push(lo_op(t_lo, src1_lo));
        self.mov(dest_lo, t_lo);
        let t_hi = self.mov_temp(src0_hi);
        self.push(hi_op(t_hi, src1_hi));
        self.mov(dest_hi, t_hi);
    }

    /// Double-shift sequence with a branch on bit 5 of the count.
    fn lower_shift_i64(
        &mut self,
        op: ArithOp,
        dest_lo: VarRef,
        dest_hi: VarRef,
        src0_lo: Operand,
        src0_hi: Operand,
        src1_lo: Operand,
    ) {
        let bit_test = Constant::i32(0x20);
        let label = self.make_label();
        let t1 = self.mov_temp_to(src1_lo, Reg::Ecx.num());
        let t2 = self.mov_temp(src0_lo);
        let t3 = self.mov_temp(src0_hi);
        match op {
            ArithOp::Shl => {
                self.push(XInst::Shld {
                    dst: t3,
                    src: t2,
                    amount: Operand::Var(t1),
                });
                self.push(XInst::Shl {
                    dst: t2,
                    amount: Operand::Var(t1),
                });
            }
            ArithOp::Lshr => {
                self.push(XInst::Shrd {
                    dst: t2,
                    src: t3,
                    amount: Operand::Var(t1),
                });
                self.push(XInst::Shr {
                    dst: t3,
                    amount: Operand::Var(t1),
                });
            }
            ArithOp::Ashr => {
                self.push(XInst::Shrd {
                    dst: t2,
                    src: t3,
                    amount: Operand::Var(t1),
                });
                self.push(XInst::Sar {
                    dst: t3,
                    amount: Operand::Var(t1),
                });
            }
            _ => unreachable!(),
        }
        self.push(XInst::Test {
            a: Operand::Var(t1),
            b: Operand::Const(bit_test),
        });
        self.push(XInst::Jcc {
            cond: BrCond::E,
            on_true: BrTarget::Label(label),
            on_false: None,
        });
        // The intra-block control flow would otherwise let the earlier
        // definition look dead next to the later one.
        match op {
            ArithOp::Shl => {
                self.fake_use(t3);
                self.mov(t3, t2);
                self.mov(t2, Constant::i32(0));
            }
            ArithOp::Lshr => {
                self.fake_use(t2);
                self.mov(t2, t3);
                self.mov(t3, Constant::i32(0));
            }
            ArithOp::Ashr => {
                self.fake_use(t2);
                self.mov(t2, t3);
                self.push(XInst::Sar {
                    dst: t3,
                    amount: Operand::Const(Constant::i32(0x1f)),
                });
            }
            _ => unreachable!(),
        }
        self.push(XInst::Label { id: label });
        self.mov(dest_lo, t2);
        self.mov(dest_hi, t3);
    }

    /// Packed read-modify-write template: T = src0; T op= src1; dest = T.
    fn packed_rmw(
        &mut self,
        dest: VarRef,
        src0: Operand,
        src1: Operand,
        f: fn(VarRef, Operand) -> XInst,
    ) {
        let ty = self.func.var(dest).ty;
        let t = self.make_reg(ty, None);
        self.movp(t, src0);
        self.push(f(t, src1));
        self.movp(dest, t);
    }

    fn lower_arithmetic_vector(&mut self, dest: VarRef, op: ArithOp, src0: Operand, src1: Operand) {
        let ty = self.func.var(dest).ty;
        match op {
            ArithOp::Add => self.packed_rmw(dest, src0, src1, |dst, src| XInst::Padd { dst, src }),
            ArithOp::Sub => self.packed_rmw(dest, src0, src1, |dst, src| XInst::Psub { dst, src }),
            ArithOp::And => self.packed_rmw(dest, src0, src1, |dst, src| XInst::Pand { dst, src }),
            ArithOp::Or => self.packed_rmw(dest, src0, src1, |dst, src| XInst::Por { dst, src }),
            ArithOp::Xor => self.packed_rmw(dest, src0, src1, |dst, src| XInst::Pxor { dst, src }),
            ArithOp::Fadd => self.packed_rmw(dest, src0, src1, |dst, src| XInst::Addps { dst, src }),
            ArithOp::Fsub => self.packed_rmw(dest, src0, src1, |dst, src| XInst::Subps { dst, src }),
            ArithOp::Fmul => self.packed_rmw(dest, src0, src1, |dst, src| XInst::Mulps { dst, src }),
            ArithOp::Fdiv => self.packed_rmw(dest, src0, src1, |dst, src| XInst::Divps { dst, src }),
            ArithOp::Mul => {
                let pmull_type_ok = matches!(ty, Type::V4I32 | Type::V8I16);
                let pmull_isa_ok =
                    ty == Type::V8I16 || self.opts.instruction_set >= InstructionSet::Sse41;
                if pmull_type_ok && pmull_isa_ok {
                    self.packed_rmw(dest, src0, src1, |dst, src| XInst::Pmull { dst, src });
                } else if ty == Type::V4I32 {
                    // movups  T1, Src0
                    // pshufd  T2, Src0, {1,0,3,0}
                    // pshufd  T3, Src1, {1,0,3,0}
                    // pmuludq T1, Src1       ; {Src0[0]*Src1[0], Src0[2]*Src1[2]}
                    // pmuludq T2, T3         ; {Src0[1]*Src1[1], Src0[3]*Src1[3]}
                    // shufps  T1, T2, {0,2,0,2}
                    // pshufd  T4, T1, {0,2,1,3}
                    // movups  Dest, T4
                    const MASK_1030: u8 = 0x31;
                    const MASK_0202: u8 = 0x88;
                    const MASK_0213: u8 = 0xd8;
                    let t1 = self.make_reg(Type::V4I32, None);
                    let t2 = self.make_reg(Type::V4I32, None);
                    let t3 = self.make_reg(Type::V4I32, None);
                    let t4 = self.make_reg(Type::V4I32, None);
                    self.movp(t1, src0.clone());
                    self.push(XInst::Pshufd {
                        dst: t2,
                        src: src0,
                        mask: MASK_1030,
                    });
                    self.push(XInst::Pshufd {
                        dst: t3,
                        src: src1.clone(),
                        mask: MASK_1030,
                    });
                    self.push(XInst::Pmuludq { dst: t1, src: src1 });
                    self.push(XInst::Pmuludq {
                        dst: t2,
                        src: Operand::Var(t3),
                    });
                    self.push(XInst::Shufps {
                        dst: t1,
                        src: Operand::Var(t2),
                        mask: MASK_0202,
                    });
                    self.push(XInst::Pshufd {
                        dst: t4,
                        src: Operand::Var(t1),
                        mask: MASK_0213,
                    });
                    self.movp(dest, t4);
                } else {
                    debug_assert!(ty == Type::V16I8);
                    self.scalarize_arithmetic(op, dest, src0, src1);
                }
            }
            ArithOp::Shl
            | ArithOp::Lshr
            | ArithOp::Ashr
            | ArithOp::Udiv
            | ArithOp::Urem
            | ArithOp::Sdiv
            | ArithOp::Srem
            | ArithOp::Frem => self.scalarize_arithmetic(op, dest, src0, src1),
        }
    }

    fn lower_arithmetic_scalar(
        &mut self,
        dest: VarRef,
        op: ArithOp,
        orig_a: Operand,
        orig_b: Operand,
        src0: Operand,
        mut src1: Operand,
    ) {
        let dest_ty = self.func.var(dest).ty;
        match op {
            ArithOp::Add => self.scalar_rmw(dest, src0, src1, |dst, src| XInst::Add { dst, src }),
            ArithOp::And => self.scalar_rmw(dest, src0, src1, |dst, src| XInst::And { dst, src }),
            ArithOp::Or => self.scalar_rmw(dest, src0, src1, |dst, src| XInst::Or { dst, src }),
            ArithOp::Xor => self.scalar_rmw(dest, src0, src1, |dst, src| XInst::Xor { dst, src }),
            ArithOp::Sub => self.scalar_rmw(dest, src0, src1, |dst, src| XInst::Sub { dst, src }),
            ArithOp::Mul => {
                // The 8-bit imul only has the "imul r/m8" form with the
                // product accumulating in eax.
                let t = if dest_ty == Type::I8 {
                    self.mov_temp_to(src0, Reg::Eax.num())
                } else {
                    self.mov_temp(src0)
                };
                self.push(XInst::Imul { dst: t, src: src1 });
                self.mov(dest, t);
            }
            ArithOp::Shl | ArithOp::Lshr | ArithOp::Ashr => {
                let t = self.mov_temp(src0);
                if !src1.is_const() {
                    src1 = Operand::Var(self.legalize_to_var(src1, Some(Reg::Ecx.num())));
                }
                let inst = match op {
                    ArithOp::Shl => XInst::Shl {
                        dst: t,
                        amount: src1,
                    },
                    ArithOp::Lshr => XInst::Shr {
                        dst: t,
                        amount: src1,
                    },
                    _ => XInst::Sar {
                        dst: t,
                        amount: src1,
                    },
                };
                self.push(inst);
                self.mov(dest, t);
            }
            ArithOp::Udiv => {
                // div and idiv do not allow immediate operands.
                let src1 = self.legalize(src1, LEGAL_REG | LEGAL_MEM, None);
                if dest_ty == Type::I8 {
                    let t = self.mov_temp_to(src0, Reg::Eax.num());
                    let t_ah = self.make_reg(Type::I8, Some(Reg::Ah.num()));
                    self.mov(t_ah, Constant::Int { ty: Type::I8, value: 0 });
                    self.push(XInst::Div {
                        dest: t,
                        src: src1,
                        other: t_ah,
                    });
                    self.mov(dest, t);
                } else {
                    let t = self.mov_temp_to(src0, Reg::Eax.num());
                    let t_edx = self.make_reg(dest_ty, Some(Reg::Edx.num()));
                    self.mov(t_edx, Constant::Int { ty: dest_ty, value: 0 });
                    self.push(XInst::Div {
                        dest: t,
                        src: src1,
                        other: t_edx,
                    });
                    self.mov(dest, t);
                }
            }
            ArithOp::Sdiv => {
                let src1 = self.legalize(src1, LEGAL_REG | LEGAL_MEM, None);
                if dest_ty == Type::I8 {
                    let t = self.mov_temp_to(src0, Reg::Eax.num());
                    self.push(XInst::Cbwdq { dst: t, src: t });
                    self.push(XInst::Idiv {
                        dest: t,
                        src: src1,
                        other: t,
                    });
                    self.mov(dest, t);
                } else {
                    let t_edx = self.make_reg(dest_ty, Some(Reg::Edx.num()));
                    let t = self.mov_temp_to(src0, Reg::Eax.num());
                    self.push(XInst::Cbwdq { dst: t_edx, src: t });
                    self.push(XInst::Idiv {
                        dest: t,
                        src: src1,
                        other: t_edx,
                    });
                    self.mov(dest, t);
                }
            }
            ArithOp::Urem => {
                let src1 = self.legalize(src1, LEGAL_REG | LEGAL_MEM, None);
                if dest_ty == Type::I8 {
                    let t = self.mov_temp_to(src0, Reg::Eax.num());
                    let t_ah = self.make_reg(Type::I8, Some(Reg::Ah.num()));
                    self.mov(t_ah, Constant::Int { ty: Type::I8, value: 0 });
                    self.push(XInst::Div {
                        dest: t_ah,
                        src: src1,
                        other: t,
                    });
                    self.mov(dest, t_ah);
                } else {
                    let t_edx = self.make_reg(dest_ty, Some(Reg::Edx.num()));
                    self.mov(t_edx, Constant::Int { ty: dest_ty, value: 0 });
                    let t = self.mov_temp_to(src0, Reg::Eax.num());
                    self.push(XInst::Div {
                        dest: t_edx,
                        src: src1,
                        other: t,
                    });
                    self.mov(dest, t_edx);
                }
            }
            ArithOp::Srem => {
                let src1 = self.legalize(src1, LEGAL_REG | LEGAL_MEM, None);
                if dest_ty == Type::I8 {
                    let t_ah = self.make_reg(Type::I8, Some(Reg::Ah.num()));
                    let t = self.mov_temp_to(src0, Reg::Eax.num());
                    self.push(XInst::Cbwdq { dst: t, src: t });
                    self.fake_def(t_ah, None);
                    self.push(XInst::Idiv {
                        dest: t_ah,
                        src: src1,
                        other: t,
                    });
                    self.mov(dest, t_ah);
                } else {
                    let t_edx = self.make_reg(dest_ty, Some(Reg::Edx.num()));
                    let t = self.mov_temp_to(src0, Reg::Eax.num());
                    self.push(XInst::Cbwdq { dst: t_edx, src: t });
                    self.push(XInst::Idiv {
                        dest: t_edx,
                        src: src1,
                        other: t,
                    });
                    self.mov(dest, t_edx);
                }
            }
            ArithOp::Fadd => self.scalar_rmw(dest, src0, src1, |dst, src| XInst::Addss { dst, src }),
            ArithOp::Fsub => self.scalar_rmw(dest, src0, src1, |dst, src| XInst::Subss { dst, src }),
            ArithOp::Fmul => self.scalar_rmw(dest, src0, src1, |dst, src| XInst::Mulss { dst, src }),
            ArithOp::Fdiv => self.scalar_rmw(dest, src0, src1, |dst, src| XInst::Divss { dst, src }),
            ArithOp::Frem => {
                let name = if dest_ty == Type::F32 { "fmodf" } else { "fmod" };
                self.lower_helper_call(name, Some(dest), vec![orig_a, orig_b]);
            }
        }
    }

    /// Scalar read-modify-write template: T = src0; T op= src1; dest = T.
    fn scalar_rmw(
        &mut self,
        dest: VarRef,
        src0: Operand,
        src1: Operand,
        f: fn(VarRef, Operand) -> XInst,
    ) {
        let t = self.mov_temp(src0);
        self.push(f(t, src1));
        self.mov(dest, t);
    }

    /// Lane-by-lane fallback for vector operations with no packed form.
    fn scalarize_arithmetic(&mut self, op: ArithOp, dest: VarRef, src0: Operand, src1: Operand) {
        let ty = self.func.var(dest).ty;
        debug_assert!(ty.is_vector());
        let elem_ty = ty.element_type();
        let cur = self.cur_block;

        let mut acc = Operand::Const(Constant::Undef(ty));
        for i in 0..ty.num_elements() {
            let index = Operand::Const(Constant::i32(i as i64));

            let op0 = self.func.make_temp(elem_ty, Some(cur));
            self.lower_extract_element(op0, src0.clone(), index.clone());
            let op1 = self.func.make_temp(elem_ty, Some(cur));
            self.lower_extract_element(op1, src1.clone(), index.clone());

            let res = self.func.make_temp(elem_ty, Some(cur));
            self.lower_arithmetic(res, op, Operand::Var(op0), Operand::Var(op1));

            let dest_t = self.func.make_temp(ty, Some(cur));
            self.lower_insert_element(dest_t, acc, Operand::Var(res), index);
            acc = Operand::Var(dest_t);
        }

        self.lower_assign(dest, acc);
    }

    pub(crate) fn lower_assign(&mut self, dest: VarRef, src: Operand) {
        let dest_ty = self.func.var(dest).ty;
        if dest_ty == Type::I64 {
            let src = self.legalize(src, LEGAL_ALL, None);
            let src_lo = self.lo_operand(&src);
            let src_hi = self.hi_operand(&src);
            let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
            let t_lo = self.mov_temp(src_lo);
            self.mov(dest_lo, t_lo);
            let t_hi = self.mov_temp(src_hi);
            self.mov(dest_hi, t_hi);
        } else {
            // RI is either a physical register or an immediate.
            let ri = self.legalize(src, LEGAL_REG | LEGAL_IMM, None);
            if dest_ty.is_vector() {
                self.movp(dest, ri);
            } else {
                self.mov(dest, ri);
            }
        }
    }

    fn lower_br(&mut self, cond: Option<Operand>, on_true: BlockRef, on_false: BlockRef) {
        match cond {
            None => self.push(XInst::Jmp {
                target: BrTarget::Block(on_true),
            }),
            Some(cond) => {
                let src0 = self.legalize(cond, LEGAL_REG | LEGAL_MEM, None);
                self.push(XInst::Cmp {
                    a: src0,
                    b: Operand::Const(Constant::i32(0)),
                });
                self.push(XInst::Jcc {
                    cond: BrCond::Ne,
                    on_true: BrTarget::Block(on_true),
                    on_false: Some(BrTarget::Block(on_false)),
                });
            }
        }
    }

    /// Helper-call shorthand used throughout lowering; the callee is part
    /// of the runtime ABI the generated code links against.
    pub(crate) fn lower_helper_call(
        &mut self,
        name: &str,
        dest: Option<VarRef>,
        args: Vec<Operand>,
    ) {
        if name == "setjmp" {
            self.func.calls_returns_twice = true;
        }
        let target = Operand::Const(Constant::Reloc {
            name: name.to_string(),
            offset: 0,
        });
        self.lower_call(dest, target, &args, true);
    }

    fn lower_call(
        &mut self,
        dest: Option<VarRef>,
        target: Operand,
        args: &[Operand],
        has_side_effects: bool,
    ) {
        // The stack must be 16-byte aligned at the point of the call. The
        // first four vector arguments go in xmm0..xmm3; everything else is
        // pushed right to left, vectors aligned to 16, scalars to 4.
        self.needs_stack_alignment = true;

        let mut xmm_args: Vec<Operand> = Vec::new();
        let mut stack_args: Vec<(Operand, MemOperand)> = Vec::new();
        let mut param_area: u32 = 0;
        let esp = self.get_phys(Reg::Esp.num());
        for arg in args {
            let ty = arg.ty(self.func);
            debug_assert!(
                ty.byte_width() >= 4 || ty.is_vector(),
                "arguments must be at least 32 bits wide"
            );
            if ty.is_vector() && xmm_args.len() < MAX_XMM_ARGS {
                xmm_args.push(arg.clone());
            } else {
                if ty.is_vector() {
                    param_area = apply_stack_alignment(param_area);
                }
                let loc = MemOperand::new(ty, Some(esp), Some(Constant::i32(param_area as i64)));
                stack_args.push((arg.clone(), loc));
                param_area += width_on_stack(ty);
            }
        }
        // The caller aligned the stack; keep it that way.
        param_area = apply_stack_alignment(param_area);
        if param_area > 0 {
            self.push(XInst::AdjustStack { amount: param_area });
        }
        for (value, loc) in stack_args {
            self.lower_store(value, Operand::Mem(loc));
        }
        for (i, arg) in xmm_args.iter().enumerate() {
            let reg =
                self.legalize_to_var(arg.clone(), Some(Reg::Xmm0.num() + i as u32));
            // Keep register arguments alive across the post-call kill.
            self.fake_use(reg);
        }

        // The return register doubles as the low half for i64.
        let mut return_reg: Option<VarRef> = None;
        let mut return_reg_hi: Option<VarRef> = None;
        if let Some(dest) = dest {
            match self.func.var(dest).ty {
                Type::Void => {}
                Type::I1 | Type::I8 | Type::I16 | Type::I32 => {
                    let ty = self.func.var(dest).ty;
                    return_reg = Some(self.make_reg(ty, Some(Reg::Eax.num())));
                }
                Type::I64 => {
                    return_reg = Some(self.make_reg(Type::I32, Some(Reg::Eax.num())));
                    return_reg_hi = Some(self.make_reg(Type::I32, Some(Reg::Edx.num())));
                }
                // FP results come back in st(0), captured by fstp below.
                Type::F32 | Type::F64 => {}
                ty => {
                    debug_assert!(ty.is_vector());
                    return_reg = Some(self.make_reg(ty, Some(Reg::Xmm0.num())));
                }
            }
        }

        let call_target = self.legalize(target, LEGAL_ALL, None);
        self.push(XInst::Call {
            dst: return_reg,
            target: call_target,
        });
        if let Some(hi) = return_reg_hi {
            self.fake_def(hi, return_reg);
        }

        // Pop the argument area.
        if param_area > 0 {
            self.push(XInst::Add {
                dst: esp,
                src: Operand::Const(Constant::i32(param_area as i64)),
            });
        }

        // All caller-save registers die at the call.
        self.push(XInst::FakeKill {
            kills: reg::mask_regs(reg::SCRATCH_MASK).collect(),
        });

        if has_side_effects {
            if let Some(r) = return_reg {
                self.fake_use(r);
            }
        }

        let Some(dest) = dest else { return };
        if let Some(ret) = return_reg {
            if let Some(ret_hi) = return_reg_hi {
                let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
                self.mov(dest_lo, ret);
                self.mov(dest_hi, ret_hi);
            } else if self.func.var(dest).ty.is_vector() {
                self.movp(dest, ret);
            } else {
                self.mov(dest, ret);
            }
        } else if matches!(self.func.var(dest).ty, Type::F32 | Type::F64) {
            // An FP function leaves its result in st(0); it must be popped
            // even if the destination is unused.
            self.push(XInst::Fstp { dst: Some(dest) });
            self.fake_use(dest);
        }
    }

    fn lower_load(&mut self, dest: VarRef, addr: Operand) {
        let ty = self.func.var(dest).ty;
        let mem = self.form_memory_operand(&addr, ty);

        // Fuse the load into a following arithmetic instruction when the
        // loaded value dies there:
        //   a=[mem]; c=b+a ==> c=b+[mem]   (last use of a, a not in b)
        //   a=[mem]; c=a+b ==> c=b+[mem]   (commutative)
        if self.opt_level == OptLevel::O2 {
            if let Some(next) = self.next_live_index() {
                let inst = self.inst_at(next);
                if let InstKind::Arith { op, a, b } = &inst.kind {
                    let arith_dest = inst.dest.unwrap();
                    let src0_var = a.as_var();
                    let src1_var = b.as_var();
                    let mut fused: Option<(Operand, Operand)> = None;
                    if src1_var == Some(dest)
                        && self.is_last_use(dest)
                        && src0_var != Some(dest)
                    {
                        fused = Some((a.clone(), Operand::Mem(mem.clone())));
                    } else if src0_var == Some(dest)
                        && op.is_commutative()
                        && self.is_last_use(dest)
                        && src1_var != Some(dest)
                    {
                        fused = Some((b.clone(), Operand::Mem(mem.clone())));
                    }
                    if let Some((lhs, rhs)) = fused {
                        self.mark_deleted(next);
                        self.lower_arithmetic(arith_dest, *op, lhs, rhs);
                        return;
                    }
                }
            }
        }

        self.lower_assign(dest, Operand::Mem(mem));
    }

    fn lower_store(&mut self, value: Operand, addr: Operand) {
        let ty = value.ty(self.func);
        let mem = self.form_memory_operand(&addr, ty);
        if ty == Type::I64 {
            let value = self.legalize(value, LEGAL_ALL, None);
            let value_hi = {
                let h = self.hi_operand(&value);
                self.legalize(h, LEGAL_REG | LEGAL_IMM, None)
            };
            let value_lo = {
                let l = self.lo_operand(&value);
                self.legalize(l, LEGAL_REG | LEGAL_IMM, None)
            };
            let mem_op = Operand::Mem(mem);
            let hi_addr = self.hi_operand(&mem_op);
            let lo_addr = self.lo_operand(&mem_op);
            self.push(XInst::Store {
                value: value_hi,
                addr: hi_addr,
            });
            self.push(XInst::Store {
                value: value_lo,
                addr: lo_addr,
            });
        } else if ty.is_vector() {
            let v = self.legalize_to_var(value, None);
            self.push(XInst::StoreP {
                value: v,
                addr: mem,
            });
        } else {
            let value = self.legalize(value, LEGAL_REG | LEGAL_IMM, None);
            self.push(XInst::Store {
                value,
                addr: Operand::Mem(mem),
            });
        }
    }

    fn lower_select(&mut self, dest: VarRef, cond: Operand, on_true: Operand, on_false: Operand) {
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            self.lower_select_vector(dest, cond, on_true, on_false);
            return;
        }

        // a=d?b:c ==> cmp d,0; a=b; jne L1; FakeUse(a); a=c; L1:
        let cond_rm = self.legalize(cond, LEGAL_REG | LEGAL_MEM, None);
        let zero = Operand::Const(Constant::i32(0));
        let label = self.make_label();

        if dest_ty == Type::I64 {
            let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
            let t_lo = self.lo_operand(&on_true);
            let t_hi = self.hi_operand(&on_true);
            let src_lo = self.legalize(t_lo, LEGAL_REG | LEGAL_IMM, None);
            let src_hi = self.legalize(t_hi, LEGAL_REG | LEGAL_IMM, None);
            self.push(XInst::Cmp { a: cond_rm, b: zero });
            self.mov(dest_lo, src_lo);
            self.mov(dest_hi, src_hi);
            self.push(XInst::Jcc {
                cond: BrCond::Ne,
                on_true: BrTarget::Label(label),
                on_false: None,
            });
            self.fake_use(dest_lo);
            self.fake_use(dest_hi);
            let f_lo = self.lo_operand(&on_false);
            let f_hi = self.hi_operand(&on_false);
            let src_lo = self.legalize(f_lo, LEGAL_REG | LEGAL_IMM, None);
            let src_hi = self.legalize(f_hi, LEGAL_REG | LEGAL_IMM, None);
            self.mov(dest_lo, src_lo);
            self.mov(dest_hi, src_hi);
        } else {
            self.push(XInst::Cmp { a: cond_rm, b: zero });
            let src_t = self.legalize(on_true, LEGAL_REG | LEGAL_IMM, None);
            self.mov(dest, src_t);
            self.push(XInst::Jcc {
                cond: BrCond::Ne,
                on_true: BrTarget::Label(label),
                on_false: None,
            });
            self.fake_use(dest);
            let src_f = self.legalize(on_false, LEGAL_REG | LEGAL_IMM, None);
            self.mov(dest, src_f);
        }
        self.push(XInst::Label { id: label });
    }

    fn lower_select_vector(
        &mut self,
        dest: VarRef,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    ) {
        let src_ty = on_true.ty(self.func);
        let t = self.make_reg(src_ty, None);
        let src_t_rm = self.legalize(on_true, LEGAL_REG | LEGAL_MEM, None);
        let src_f_rm = self.legalize(on_false, LEGAL_REG | LEGAL_MEM, None);

        if self.opts.instruction_set >= InstructionSet::Sse41 {
            if matches!(src_ty, Type::V4I1 | Type::V4I32 | Type::V4F32) {
                // blendvps selects by the sign bit of xmm0.
                let cond_rm = self.legalize(cond, LEGAL_REG | LEGAL_MEM, None);
                let xmm0 = self.make_reg(Type::V4I32, Some(Reg::Xmm0.num()));
                self.movp(xmm0, cond_rm);
                self.push(XInst::Psll {
                    dst: xmm0,
                    amount: Operand::Const(Constant::Int {
                        ty: Type::I8,
                        value: 31,
                    }),
                });
                self.movp(t, src_f_rm);
                self.push(XInst::Blendvps {
                    dst: t,
                    src: src_t_rm,
                    mask: xmm0,
                });
                self.movp(dest, t);
            } else {
                debug_assert!(matches!(src_ty.num_elements(), 8 | 16));
                let cond_ty = cond.ty(self.func);
                let sign_ext_ty = if cond_ty == Type::V8I1 {
                    Type::V8I16
                } else {
                    Type::V16I8
                };
                let xmm0 = self.make_reg(sign_ext_ty, Some(Reg::Xmm0.num()));
                self.lower_cast(CastOp::Sext, xmm0, cond);
                self.movp(t, src_f_rm);
                self.push(XInst::Pblendvb {
                    dst: t,
                    src: src_t_rm,
                    mask: xmm0,
                });
                self.movp(dest, t);
            }
            return;
        }

        // Without SSE4.1: a = (b & mask) | (c & ~mask), with the condition
        // sign-extended into the mask.
        let t2 = self.make_reg(src_ty, None);
        let cond_ty = cond.ty(self.func);
        if src_ty == Type::V4F32 {
            // The sign extension operates on integer vectors.
            let cur = self.cur_block;
            let t3 = self.func.make_temp(Type::V4I32, Some(cur));
            self.lower_cast(CastOp::Sext, t3, cond);
            self.movp(t, t3);
        } else if cond_ty.element_type() != Type::I1 {
            self.lower_cast(CastOp::Sext, t, cond);
        } else {
            let cond_rm = self.legalize(cond, LEGAL_REG | LEGAL_MEM, None);
            self.movp(t, cond_rm);
        }
        self.movp(t2, t);
        self.push(XInst::Pand {
            dst: t,
            src: src_t_rm,
        });
        self.push(XInst::Pandn {
            dst: t2,
            src: src_f_rm,
        });
        self.push(XInst::Por {
            dst: t,
            src: Operand::Var(t2),
        });
        self.movp(dest, t);
    }

    fn lower_switch(&mut self, value: Operand, cases: &[(i64, BlockRef)], default: BlockRef) {
        // cmp a,val[0]; je label[0]; cmp a,val[1]; je label[1]; ...
        // jmp default
        let src0 = if cases.len() >= 2 {
            Operand::Var(self.legalize_to_var(value, None))
        } else {
            self.legalize(value, LEGAL_REG | LEGAL_MEM, None)
        };
        for (value, label) in cases {
            self.push(XInst::Cmp {
                a: src0.clone(),
                b: Operand::Const(Constant::i32(*value)),
            });
            self.push(XInst::Jcc {
                cond: BrCond::E,
                on_true: BrTarget::Block(*label),
                on_false: None,
            });
        }
        self.push(XInst::Jmp {
            target: BrTarget::Block(default),
        });
    }

    fn lower_ret(&mut self, src: Option<Operand>) {
        let mut reg: Option<VarRef> = None;
        if let Some(src) = src {
            let src0 = self.legalize(src, LEGAL_ALL, None);
            let ty = src0.ty(self.func);
            if ty == Type::I64 {
                let lo = self.lo_operand(&src0);
                let hi = self.hi_operand(&src0);
                let eax = self.legalize_to_var(lo, Some(Reg::Eax.num()));
                let edx = self.legalize_to_var(hi, Some(Reg::Edx.num()));
                reg = Some(eax);
                self.fake_use(edx);
            } else if matches!(ty, Type::F32 | Type::F64) {
                self.push(XInst::Fld { src: src0 });
            } else if ty.is_vector() {
                reg = Some(self.legalize_to_var(src0, Some(Reg::Xmm0.num())));
            } else {
                reg = Some(self.mov_temp_to(src0, Reg::Eax.num()));
            }
        }
        self.push(XInst::Ret { src: reg });
        // Keep esp alive for the whole function so post-call adjustments
        // are not treated as dead.
        let esp = self.get_phys(Reg::Esp.num());
        self.fake_use(esp);
    }

    fn lower_unreachable(&mut self) {
        self.lower_helper_call("ice_unreachable", None, vec![]);
    }

    // ── Compares ──

    fn lower_icmp(&mut self, dest: VarRef, cond: IcmpCond, a: Operand, b: Operand) {
        let src0 = self.legalize(a, LEGAL_ALL, None);
        let src1 = self.legalize(b, LEGAL_ALL, None);
        let dest_ty = self.func.var(dest).ty;

        if dest_ty.is_vector() {
            self.lower_icmp_vector(dest, cond, src0, src1);
            return;
        }

        // If Src1 is an immediate or known to be in a physical register,
        // Src0 may be a memory operand; otherwise Src0 must take the
        // register side.
        let src1_imm_or_reg = match &src1 {
            Operand::Const(_) => true,
            Operand::Var(v) => self.func.var(*v).has_reg(),
            _ => false,
        };
        let src0_allowed = if src1_imm_or_reg {
            LEGAL_REG | LEGAL_MEM
        } else {
            LEGAL_REG
        };

        // Fuse a compare immediately followed by a conditional branch on
        // its single use.
        let src0_ty = src0.ty(self.func);
        if src0_ty != Type::I64 {
            if let Some(next) = self.next_live_index() {
                let inst = self.inst_at(next);
                if let InstKind::Br {
                    cond: Some(br_cond),
                    on_true,
                    on_false,
                } = &inst.kind
                {
                    if *br_cond == Operand::Var(dest) && self.is_last_use(dest) {
                        self.mark_deleted(next);
                        let src0 = self.legalize(src0, src0_allowed, None);
                        self.push(XInst::Cmp { a: src0, b: src1 });
                        self.push(XInst::Jcc {
                            cond: icmp32_mapping(cond),
                            on_true: BrTarget::Block(*on_true),
                            on_false: Some(BrTarget::Block(*on_false)),
                        });
                        return;
                    }
                }
            }
        }

        let zero = Operand::Const(Constant::i32(0));
        let one = Operand::Const(Constant::i32(1));

        if src0_ty == Type::I64 {
            let src0_lo = self.lo_operand(&src0);
            let src0_hi = self.hi_operand(&src0);
            let src1_lo = self.lo_operand(&src1);
            let src1_hi = self.hi_operand(&src1);
            let src0_lo_rm = self.legalize(src0_lo, LEGAL_REG | LEGAL_MEM, None);
            let src0_hi_rm = self.legalize(src0_hi, LEGAL_REG | LEGAL_MEM, None);
            let src1_lo_ri = self.legalize(src1_lo, LEGAL_REG | LEGAL_IMM, None);
            let src1_hi_ri = self.legalize(src1_hi, LEGAL_REG | LEGAL_IMM, None);
            if matches!(cond, IcmpCond::Eq | IcmpCond::Ne) {
                // Two equality compares, both branching to the same label.
                let label = self.make_label();
                let (first, second) = if cond == IcmpCond::Eq {
                    (zero, one)
                } else {
                    (one, zero)
                };
                self.mov(dest, first);
                self.push(XInst::Cmp {
                    a: src0_lo_rm,
                    b: src1_lo_ri,
                });
                self.push(XInst::Jcc {
                    cond: BrCond::Ne,
                    on_true: BrTarget::Label(label),
                    on_false: None,
                });
                self.push(XInst::Cmp {
                    a: src0_hi_rm,
                    b: src1_hi_ri,
                });
                self.push(XInst::Jcc {
                    cond: BrCond::Ne,
                    on_true: BrTarget::Label(label),
                    on_false: None,
                });
                self.fake_use(dest);
                self.mov(dest, second);
                self.push(XInst::Label { id: label });
            } else {
                // Three branches on (hi, lo).
                let (c1, c2, c3) = icmp64_mapping(cond);
                let label_false = self.make_label();
                let label_true = self.make_label();
                self.mov(dest, one);
                self.push(XInst::Cmp {
                    a: src0_hi_rm,
                    b: src1_hi_ri,
                });
                self.push(XInst::Jcc {
                    cond: c1,
                    on_true: BrTarget::Label(label_true),
                    on_false: None,
                });
                self.push(XInst::Jcc {
                    cond: c2,
                    on_true: BrTarget::Label(label_false),
                    on_false: None,
                });
                self.push(XInst::Cmp {
                    a: src0_lo_rm,
                    b: src1_lo_ri,
                });
                self.push(XInst::Jcc {
                    cond: c3,
                    on_true: BrTarget::Label(label_true),
                    on_false: None,
                });
                self.push(XInst::Label { id: label_false });
                self.fake_use(dest);
                self.mov(dest, zero);
                self.push(XInst::Label { id: label_true });
            }
            return;
        }

        // a=icmp cond,b,c ==> cmp b,c; a=1; br cond,L1; FakeUse(a); a=0; L1:
        let src0 = self.legalize(src0, src0_allowed, None);
        let label = self.make_label();
        self.push(XInst::Cmp { a: src0, b: src1 });
        self.mov(dest, one);
        self.push(XInst::Jcc {
            cond: icmp32_mapping(cond),
            on_true: BrTarget::Label(label),
            on_false: None,
        });
        self.fake_use(dest);
        self.mov(dest, zero);
        self.push(XInst::Label { id: label });
    }

    fn lower_icmp_vector(&mut self, dest: VarRef, cond: IcmpCond, src0: Operand, src1: Operand) {
        let mut src0 = src0;
        let mut src1 = src1;
        let mut ty = src0.ty(self.func);

        // Promote i1 vectors to full-width integer vectors.
        if ty.element_type() == Type::I1 {
            let new_ty = match ty {
                Type::V4I1 => Type::V4I32,
                Type::V8I1 => Type::V8I16,
                Type::V16I1 => Type::V16I8,
                _ => unreachable!("unexpected i1 vector type {ty}"),
            };
            let cur = self.cur_block;
            let new_src0 = self.func.make_temp(new_ty, Some(cur));
            let new_src1 = self.func.make_temp(new_ty, Some(cur));
            self.lower_cast(CastOp::Sext, new_src0, src0);
            self.lower_cast(CastOp::Sext, new_src1, src1);
            src0 = Operand::Var(new_src0);
            src1 = Operand::Var(new_src1);
            ty = new_ty;
        }

        let mut src0_rm = self.legalize(src0, LEGAL_REG | LEGAL_MEM, None);
        let mut src1_rm = self.legalize(src1, LEGAL_REG | LEGAL_MEM, None);

        // SSE2 only has signed vector compares; bias unsigned operands by
        // flipping their sign bits.
        if matches!(
            cond,
            IcmpCond::Ugt | IcmpCond::Uge | IcmpCond::Ult | IcmpCond::Ule
        ) {
            let high_bits = self.make_vector_of_high_order_bits(ty, None);
            let t0 = self.make_reg(ty, None);
            let t1 = self.make_reg(ty, None);
            self.movp(t0, src0_rm);
            self.push(XInst::Pxor {
                dst: t0,
                src: Operand::Var(high_bits),
            });
            self.movp(t1, src1_rm);
            self.push(XInst::Pxor {
                dst: t1,
                src: Operand::Var(high_bits),
            });
            src0_rm = Operand::Var(t0);
            src1_rm = Operand::Var(t1);
        }

        let t = self.make_reg(ty, None);
        match cond {
            IcmpCond::Eq => {
                self.movp(t, src0_rm);
                self.push(XInst::Pcmpeq { dst: t, src: src1_rm });
            }
            IcmpCond::Ne => {
                self.movp(t, src0_rm);
                self.push(XInst::Pcmpeq { dst: t, src: src1_rm });
                let minus_one = self.make_vector_of_minus_ones(ty, None);
                self.push(XInst::Pxor {
                    dst: t,
                    src: Operand::Var(minus_one),
                });
            }
            IcmpCond::Ugt | IcmpCond::Sgt => {
                self.movp(t, src0_rm);
                self.push(XInst::Pcmpgt { dst: t, src: src1_rm });
            }
            IcmpCond::Uge | IcmpCond::Sge => {
                // !(Src1 > Src0)
                self.movp(t, src1_rm);
                self.push(XInst::Pcmpgt { dst: t, src: src0_rm });
                let minus_one = self.make_vector_of_minus_ones(ty, None);
                self.push(XInst::Pxor {
                    dst: t,
                    src: Operand::Var(minus_one),
                });
            }
            IcmpCond::Ult | IcmpCond::Slt => {
                self.movp(t, src1_rm);
                self.push(XInst::Pcmpgt { dst: t, src: src0_rm });
            }
            IcmpCond::Ule | IcmpCond::Sle => {
                // !(Src0 > Src1)
                self.movp(t, src0_rm);
                self.push(XInst::Pcmpgt { dst: t, src: src1_rm });
                let minus_one = self.make_vector_of_minus_ones(ty, None);
                self.push(XInst::Pxor {
                    dst: t,
                    src: Operand::Var(minus_one),
                });
            }
        }
        self.movp(dest, t);
        self.eliminate_next_vector_sext(dest);
    }

    fn lower_fcmp(&mut self, dest: VarRef, cond: FcmpCond, a: Operand, b: Operand) {
        let mut src0 = a;
        let mut src1 = b;
        let dest_ty = self.func.var(dest).ty;
        let entry = fcmp_table(cond);

        if dest_ty.is_vector() {
            if entry.swap_vector_operands {
                std::mem::swap(&mut src0, &mut src1);
            }
            let t;
            if cond == FcmpCond::True {
                t = self.make_vector_of_minus_ones(Type::V4I32, None);
            } else if cond == FcmpCond::False {
                t = self.make_vector_of_zeros(dest_ty, None);
            } else {
                let src0_rm = self.legalize(src0, LEGAL_REG | LEGAL_MEM, None);
                let src1_rm = self.legalize(src1, LEGAL_REG | LEGAL_MEM, None);
                let ty = src0_rm.ty(self.func);
                match cond {
                    FcmpCond::One => {
                        // Unequal and ordered.
                        t = self.make_reg(ty, None);
                        let t2 = self.make_reg(ty, None);
                        self.movp(t, src0_rm.clone());
                        self.push(XInst::Cmpps {
                            dst: t,
                            src: src1_rm.clone(),
                            cond: CmppsCond::Neq,
                        });
                        self.movp(t2, src0_rm);
                        self.push(XInst::Cmpps {
                            dst: t2,
                            src: src1_rm,
                            cond: CmppsCond::Ord,
                        });
                        self.push(XInst::Pand {
                            dst: t,
                            src: Operand::Var(t2),
                        });
                    }
                    FcmpCond::Ueq => {
                        // Equal or unordered.
                        t = self.make_reg(ty, None);
                        let t2 = self.make_reg(ty, None);
                        self.movp(t, src0_rm.clone());
                        self.push(XInst::Cmpps {
                            dst: t,
                            src: src1_rm.clone(),
                            cond: CmppsCond::Eq,
                        });
                        self.movp(t2, src0_rm);
                        self.push(XInst::Cmpps {
                            dst: t2,
                            src: src1_rm,
                            cond: CmppsCond::Unord,
                        });
                        self.push(XInst::Por {
                            dst: t,
                            src: Operand::Var(t2),
                        });
                    }
                    _ => {
                        let pred = entry.cmpps.expect("cmpps predicate");
                        t = self.make_reg(ty, None);
                        self.movp(t, src0_rm);
                        self.push(XInst::Cmpps {
                            dst: t,
                            src: src1_rm,
                            cond: pred,
                        });
                    }
                }
            }
            self.movp(dest, t);
            self.eliminate_next_vector_sext(dest);
            return;
        }

        // Scalar lowering of a = fcmp cond, b, c:
        //   ucomiss b, c       (only if C1 is present; operands swapped
        //                       when the table says so)
        //   mov a, <default>
        //   j<C1> label
        //   j<C2> label        (only if C2 is present)
        //   FakeUse(a)
        //   mov a, !<default>
        //   label:
        if entry.swap_scalar_operands {
            std::mem::swap(&mut src0, &mut src1);
        }
        if entry.c1.is_some() {
            let src0 = self.legalize(src0, LEGAL_ALL, None);
            let src1_rm = self.legalize(src1, LEGAL_REG | LEGAL_MEM, None);
            let t = self.mov_temp(src0);
            self.push(XInst::Ucomiss { a: t, b: src1_rm });
        }
        let default = Constant::i32(entry.default as i64);
        self.mov(dest, default);
        if let Some(c1) = entry.c1 {
            let label = self.make_label();
            self.push(XInst::Jcc {
                cond: c1,
                on_true: BrTarget::Label(label),
                on_false: None,
            });
            if let Some(c2) = entry.c2 {
                self.push(XInst::Jcc {
                    cond: c2,
                    on_true: BrTarget::Label(label),
                    on_false: None,
                });
            }
            self.fake_use(dest);
            self.mov(dest, Constant::i32((1 - entry.default) as i64));
            self.push(XInst::Label { id: label });
        }
    }

    // ── Element access ──

    pub(crate) fn lower_extract_element(&mut self, dest: VarRef, vec: Operand, index: Operand) {
        let Some(index) = index.as_const_int() else {
            self.func
                .set_error("ExtractElement requires a constant index");
            return;
        };
        let index = index as u32;
        let ty = vec.ty(self.func);
        let elem_ty = ty.element_type();
        let in_elem_ty = in_vector_element_type(ty);
        let mut extracted = self.make_reg(in_elem_ty, None);

        let can_use_pextr = matches!(ty, Type::V8I16 | Type::V8I1)
            || self.opts.instruction_set >= InstructionSet::Sse41;
        if can_use_pextr && ty != Type::V4F32 {
            let src = self.legalize_to_var(vec, None);
            self.push(XInst::Pextr {
                dst: extracted,
                src,
                index: index as u8,
            });
        } else if matches!(ty, Type::V4I32 | Type::V4F32 | Type::V4I1) {
            // pshufd the wanted lane into lane 0, then movd/movss it out.
            let t = if index != 0 {
                let src = self.legalize(vec, LEGAL_REG | LEGAL_MEM, None);
                let t = self.make_reg(ty, None);
                self.push(XInst::Pshufd {
                    dst: t,
                    src,
                    mask: index as u8,
                });
                t
            } else {
                self.legalize_to_var(vec, None)
            };
            if in_elem_ty == Type::I32 {
                self.push(XInst::Movd {
                    dst: extracted,
                    src: Operand::Var(t),
                });
            } else {
                // movss merges lanes; the FakeDef keeps liveness sound.
                self.fake_def(extracted, None);
                self.push(XInst::MovssReg {
                    dst: extracted,
                    src: t,
                });
            }
        } else {
            debug_assert!(matches!(ty, Type::V16I8 | Type::V16I1));
            // Spill to a stack slot and extract from memory.
            let cur = self.cur_block;
            let slot = self.func.make_temp(ty, Some(cur));
            self.func.var_mut(slot).weight = RegWeight::Zero;
            let v = self.legalize_to_var(vec, None);
            self.movp(slot, v);
            let offset = index * in_elem_ty.byte_width();
            let loc = self.memory_operand_for_stack_slot(in_elem_ty, slot, offset);
            self.mov(extracted, Operand::Mem(loc));
        }

        if elem_ty == Type::I1 {
            // Truncate to i1.
            let t = self.make_reg(Type::I1, None);
            self.lower_cast(CastOp::Trunc, t, Operand::Var(extracted));
            extracted = t;
        }
        self.mov(dest, extracted);
    }

    pub(crate) fn lower_insert_element(
        &mut self,
        dest: VarRef,
        vec: Operand,
        elem: Operand,
        index: Operand,
    ) {
        let Some(index) = index.as_const_int() else {
            self.func.set_error("InsertElement requires a constant index");
            return;
        };
        let index = index as u32;
        let ty = vec.ty(self.func);
        debug_assert!(index < ty.num_elements());
        let elem_ty = ty.element_type();
        let in_elem_ty = in_vector_element_type(ty);

        let mut elem = elem;
        if elem_ty == Type::I1 {
            // Expand the element to its in-vector size first.
            let cur = self.cur_block;
            let expanded = self.func.make_temp(in_elem_ty, Some(cur));
            self.lower_cast(CastOp::Zext, expanded, elem);
            elem = Operand::Var(expanded);
        }

        if matches!(ty, Type::V8I16 | Type::V8I1)
            || self.opts.instruction_set >= InstructionSet::Sse41
        {
            let elem_rm = self.legalize(elem, LEGAL_REG | LEGAL_MEM, None);
            let src_rm = self.legalize(vec, LEGAL_REG | LEGAL_MEM, None);
            let t = self.make_reg(ty, None);
            self.movp(t, src_rm);
            if ty == Type::V4F32 {
                self.push(XInst::Insertps {
                    dst: t,
                    src: elem_rm,
                    mask: (index << 4) as u8,
                });
            } else {
                self.push(XInst::Pinsr {
                    dst: t,
                    src: elem_rm,
                    index: index as u8,
                });
            }
            self.movp(dest, t);
        } else if matches!(ty, Type::V4I32 | Type::V4F32 | Type::V4I1) {
            // Use shufps or movss.
            let src_rm = self.legalize(vec, LEGAL_REG | LEGAL_MEM, None);
            let elem_r = if in_elem_ty == Type::F32 {
                self.legalize_to_var(elem, None)
            } else {
                // Copy the integer into an xmm register.
                let t = self.legalize(elem, LEGAL_REG | LEGAL_MEM, None);
                let r = self.make_reg(ty, None);
                self.push(XInst::Movd { dst: r, src: t });
                r
            };

            if index == 0 {
                let t = self.make_reg(ty, None);
                self.movp(t, src_rm);
                self.push(XInst::MovssReg {
                    dst: t,
                    src: elem_r,
                });
                self.movp(dest, t);
                return;
            }

            // shufps sequences keyed on the insertion index; the element
            // starts in lane 0 of elem_r.
            const MASK1: [u8; 3] = [0, 192, 128];
            const MASK2: [u8; 3] = [227, 196, 52];
            let mask1 = MASK1[(index - 1) as usize];
            let mask2 = MASK2[(index - 1) as usize];
            if index == 1 {
                self.push(XInst::Shufps {
                    dst: elem_r,
                    src: src_rm.clone(),
                    mask: mask1,
                });
                self.push(XInst::Shufps {
                    dst: elem_r,
                    src: src_rm,
                    mask: mask2,
                });
                self.movp(dest, elem_r);
            } else {
                let t = self.make_reg(ty, None);
                self.movp(t, src_rm);
                self.push(XInst::Shufps {
                    dst: elem_r,
                    src: Operand::Var(t),
                    mask: mask1,
                });
                self.push(XInst::Shufps {
                    dst: t,
                    src: Operand::Var(elem_r),
                    mask: mask2,
                });
                self.movp(dest, t);
            }
        } else {
            debug_assert!(matches!(ty, Type::V16I8 | Type::V16I1));
            // Spill to a stack slot and insert in memory.
            let cur = self.cur_block;
            let slot = self.func.make_temp(ty, Some(cur));
            self.func.var_mut(slot).weight = RegWeight::Zero;
            let v = self.legalize_to_var(vec, None);
            self.movp(slot, v);
            let offset = index * in_elem_ty.byte_width();
            let loc = self.memory_operand_for_stack_slot(in_elem_ty, slot, offset);
            let elem_r = self.legalize_to_var(elem, None);
            self.push(XInst::Store {
                value: Operand::Var(elem_r),
                addr: Operand::Mem(loc),
            });
            let t = self.make_reg(ty, None);
            self.movp(t, slot);
            self.movp(dest, t);
        }
    }

    // ── Casts ──

    pub(crate) fn lower_cast(&mut self, op: CastOp, dest: VarRef, src: Operand) {
        match op {
            CastOp::Sext => self.lower_sext(dest, src),
            CastOp::Zext => self.lower_zext(dest, src),
            CastOp::Trunc => self.lower_trunc(dest, src),
            CastOp::Fptrunc | CastOp::Fpext => {
                let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
                let dest_ty = self.func.var(dest).ty;
                let t = self.make_reg(dest_ty, None);
                self.push(XInst::Cvt { dst: t, src: src_rm });
                self.mov(dest, t);
            }
            CastOp::Fptosi => self.lower_fptosi(dest, src),
            CastOp::Fptoui => self.lower_fptoui(dest, src),
            CastOp::Sitofp => self.lower_sitofp(dest, src),
            CastOp::Uitofp => self.lower_uitofp(dest, src),
            CastOp::Bitcast => self.lower_bitcast(dest, src),
        }
    }

    fn lower_sext(&mut self, dest: VarRef, src: Operand) {
        // The native movsx forms take register or memory, not immediates.
        let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            if dest_ty == Type::V16I8 {
                // dest = (src & 1) > 0
                let one_mask = self.make_vector_of_ones(dest_ty, None);
                let t = self.make_reg(dest_ty, None);
                self.movp(t, src_rm);
                self.push(XInst::Pand {
                    dst: t,
                    src: Operand::Var(one_mask),
                });
                let zeros = self.make_vector_of_zeros(dest_ty, None);
                self.push(XInst::Pcmpgt {
                    dst: t,
                    src: Operand::Var(zeros),
                });
                self.movp(dest, t);
            } else {
                // dest = (src << (elem_bits-1)) >> (elem_bits-1)
                let shift =
                    in_vector_element_type(dest_ty).byte_width() * 8 - 1;
                let shift_op = Operand::Const(Constant::Int {
                    ty: Type::I8,
                    value: shift as i64,
                });
                let t = self.make_reg(dest_ty, None);
                self.movp(t, src_rm);
                self.push(XInst::Psll {
                    dst: t,
                    amount: shift_op.clone(),
                });
                self.push(XInst::Psra {
                    dst: t,
                    amount: shift_op,
                });
                self.movp(dest, t);
            }
        } else if dest_ty == Type::I64 {
            // t1=movsx src; t2=t1; t2=sar t2,31; dst.lo=t1; dst.hi=t2
            let shift = Operand::Const(Constant::i32(31));
            let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
            let src_ty = src_rm.ty(self.func);
            let t_lo = self.make_reg(Type::I32, None);
            if src_ty == Type::I32 {
                self.mov(t_lo, src_rm);
            } else if src_ty == Type::I1 {
                self.push(XInst::Movzx {
                    dst: t_lo,
                    src: src_rm,
                });
                self.push(XInst::Shl {
                    dst: t_lo,
                    amount: shift.clone(),
                });
                self.push(XInst::Sar {
                    dst: t_lo,
                    amount: shift.clone(),
                });
            } else {
                self.push(XInst::Movsx {
                    dst: t_lo,
                    src: src_rm,
                });
            }
            self.mov(dest_lo, t_lo);
            let t_hi = self.mov_temp(Operand::Var(t_lo));
            if src_ty != Type::I1 {
                // For i1 the sar above already produced the sign fill.
                self.push(XInst::Sar {
                    dst: t_hi,
                    amount: shift,
                });
            }
            self.mov(dest_hi, t_hi);
        } else if src_rm.ty(self.func) == Type::I1 {
            // t = src; shl t, bits-1; sar t, bits-1; dest = t
            let dest_bits = dest_ty.byte_width() * 8;
            let shift = Operand::Const(Constant::i32(dest_bits as i64 - 1));
            let t = self.make_reg(dest_ty, None);
            if dest_ty.byte_width() <= src_rm.ty(self.func).byte_width() {
                self.mov(t, src_rm);
            } else {
                // Widen first; the following shifts overwrite the bits.
                self.push(XInst::Movzx { dst: t, src: src_rm });
            }
            self.push(XInst::Shl {
                dst: t,
                amount: shift.clone(),
            });
            self.push(XInst::Sar {
                dst: t,
                amount: shift,
            });
            self.mov(dest, t);
        } else {
            let t = self.make_reg(dest_ty, None);
            self.push(XInst::Movsx { dst: t, src: src_rm });
            self.mov(dest, t);
        }
    }

    fn lower_zext(&mut self, dest: VarRef, src: Operand) {
        let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            // dest = src & onemask
            let one_mask = self.make_vector_of_ones(dest_ty, None);
            let t = self.make_reg(dest_ty, None);
            self.movp(t, src_rm);
            self.push(XInst::Pand {
                dst: t,
                src: Operand::Var(one_mask),
            });
            self.movp(dest, t);
        } else if dest_ty == Type::I64 {
            // t=movzx src; dst.lo=t; dst.hi=0
            let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
            let src_ty = src_rm.ty(self.func);
            let tmp = self.make_reg(Type::I32, None);
            if src_ty == Type::I32 {
                self.mov(tmp, src_rm);
            } else {
                self.push(XInst::Movzx { dst: tmp, src: src_rm });
            }
            if src_ty == Type::I1 {
                self.push(XInst::And {
                    dst: tmp,
                    src: Operand::Const(Constant::i32(1)),
                });
            }
            self.mov(dest_lo, tmp);
            self.mov(dest_hi, Constant::i32(0));
        } else if src_rm.ty(self.func) == Type::I1 {
            // t = src; t &= 1; dest = t
            let t = self.make_reg(Type::I32, None);
            self.push(XInst::Movzx { dst: t, src: src_rm });
            self.push(XInst::And {
                dst: t,
                src: Operand::Const(Constant::i32(1)),
            });
            self.mov(dest, t);
        } else {
            let t = self.make_reg(dest_ty, None);
            self.push(XInst::Movzx { dst: t, src: src_rm });
            self.mov(dest, t);
        }
    }

    fn lower_trunc(&mut self, dest: VarRef, src: Operand) {
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            // dest = src & onemask
            let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
            let src_ty = src_rm.ty(self.func);
            let one_mask = self.make_vector_of_ones(src_ty, None);
            let t = self.make_reg(dest_ty, None);
            self.movp(t, src_rm);
            self.push(XInst::Pand {
                dst: t,
                src: Operand::Var(one_mask),
            });
            self.movp(dest, t);
        } else {
            let src = if src.ty(self.func) == Type::I64 {
                self.lo_operand(&src)
            } else {
                src
            };
            let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
            let t = self.mov_temp(src_rm);
            if dest_ty == Type::I1 {
                self.push(XInst::And {
                    dst: t,
                    src: Operand::Const(Constant::Int {
                        ty: Type::I1,
                        value: 1,
                    }),
                });
            }
            self.mov(dest, t);
        }
    }

    fn lower_fptosi(&mut self, dest: VarRef, src: Operand) {
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            debug_assert!(dest_ty == Type::V4I32 && src.ty(self.func) == Type::V4F32);
            let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
            let t = self.make_reg(dest_ty, None);
            self.push(XInst::Cvtt { dst: t, src: src_rm });
            self.movp(dest, t);
        } else if dest_ty == Type::I64 {
            // SSE2 has no xmm-to-register-pair conversion; use a helper.
            self.split64(dest);
            let name = if src.ty(self.func) == Type::F32 {
                "cvtftosi64"
            } else {
                "cvtdtosi64"
            };
            self.lower_helper_call(name, Some(dest), vec![src]);
        } else {
            let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
            // t1.i32 = cvt src; t2.dest_ty = t1; dest = t2
            let t1 = self.make_reg(Type::I32, None);
            let t2 = self.make_reg(dest_ty, None);
            self.push(XInst::Cvtt { dst: t1, src: src_rm });
            self.mov(t2, t1);
            if dest_ty == Type::I1 {
                self.push(XInst::And {
                    dst: t2,
                    src: Operand::Const(Constant::Int {
                        ty: Type::I1,
                        value: 1,
                    }),
                });
            }
            self.mov(dest, t2);
        }
    }

    fn lower_fptoui(&mut self, dest: VarRef, src: Operand) {
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            debug_assert!(dest_ty == Type::V4I32 && src.ty(self.func) == Type::V4F32);
            self.lower_helper_call("Sz_fptoui_v4f32", Some(dest), vec![src]);
        } else if matches!(dest_ty, Type::I64 | Type::I32) {
            self.split64(dest);
            let dst_str = if dest_ty == Type::I64 { "64" } else { "32" };
            let src_str = if src.ty(self.func) == Type::F32 { "f" } else { "d" };
            let name = format!("cvt{src_str}toui{dst_str}");
            self.lower_helper_call(&name, Some(dest), vec![src]);
        } else {
            let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
            let t1 = self.make_reg(Type::I32, None);
            let t2 = self.make_reg(dest_ty, None);
            self.push(XInst::Cvtt { dst: t1, src: src_rm });
            self.mov(t2, t1);
            if dest_ty == Type::I1 {
                self.push(XInst::And {
                    dst: t2,
                    src: Operand::Const(Constant::Int {
                        ty: Type::I1,
                        value: 1,
                    }),
                });
            }
            self.mov(dest, t2);
        }
    }

    fn lower_sitofp(&mut self, dest: VarRef, src: Operand) {
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            debug_assert!(dest_ty == Type::V4F32 && src.ty(self.func) == Type::V4I32);
            let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
            let t = self.make_reg(dest_ty, None);
            self.push(XInst::Cvt { dst: t, src: src_rm });
            self.movp(dest, t);
        } else if src.ty(self.func) == Type::I64 {
            let name = if dest_ty == Type::F32 {
                "cvtsi64tof"
            } else {
                "cvtsi64tod"
            };
            self.lower_helper_call(name, Some(dest), vec![src]);
        } else {
            let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
            // Sign-extend to 32 bits, then convert.
            let t1 = self.make_reg(Type::I32, None);
            let t2 = self.make_reg(dest_ty, None);
            if src_rm.ty(self.func) == Type::I32 {
                self.mov(t1, src_rm);
            } else {
                self.push(XInst::Movsx { dst: t1, src: src_rm });
            }
            self.push(XInst::Cvt {
                dst: t2,
                src: Operand::Var(t1),
            });
            self.mov(dest, t2);
        }
    }

    fn lower_uitofp(&mut self, dest: VarRef, src: Operand) {
        let dest_ty = self.func.var(dest).ty;
        let src_ty = src.ty(self.func);
        if src_ty.is_vector() {
            debug_assert!(dest_ty == Type::V4F32 && src_ty == Type::V4I32);
            self.lower_helper_call("Sz_uitofp_v4i32", Some(dest), vec![src]);
        } else if matches!(src_ty, Type::I64 | Type::I32) {
            // No unsigned conversions in SSE2; helpers cover i32 and i64.
            let src_str = if src_ty == Type::I64 { "64" } else { "32" };
            let dst_str = if dest_ty == Type::F32 { "f" } else { "d" };
            let name = format!("cvtui{src_str}to{dst_str}");
            self.lower_helper_call(&name, Some(dest), vec![src]);
        } else {
            let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
            // Zero-extend to 32 bits, then convert.
            let t1 = self.make_reg(Type::I32, None);
            let t2 = self.make_reg(dest_ty, None);
            if src_rm.ty(self.func) == Type::I32 {
                self.mov(t1, src_rm);
            } else {
                self.push(XInst::Movzx { dst: t1, src: src_rm });
            }
            self.push(XInst::Cvt {
                dst: t2,
                src: Operand::Var(t1),
            });
            self.mov(dest, t2);
        }
    }

    fn lower_bitcast(&mut self, dest: VarRef, src: Operand) {
        let dest_ty = self.func.var(dest).ty;
        let src_ty = src.ty(self.func);
        if dest_ty == src_ty {
            self.lower_assign(dest, src);
            return;
        }
        match dest_ty {
            Type::I8 => {
                debug_assert!(src_ty == Type::V8I1);
                self.lower_helper_call("Sz_bitcast_v8i1_to_i8", Some(dest), vec![src]);
            }
            Type::I16 => {
                debug_assert!(src_ty == Type::V16I1);
                self.lower_helper_call("Sz_bitcast_v16i1_to_i16", Some(dest), vec![src]);
            }
            Type::I32 | Type::F32 => {
                // No direct integer/xmm move: stage through a stack slot.
                let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
                debug_assert!(
                    (dest_ty == Type::I32 && src_ty == Type::F32)
                        || (dest_ty == Type::F32 && src_ty == Type::I32)
                );
                let cur = self.cur_block;
                let spill = self.func.make_temp(src_ty, Some(cur));
                self.func.var_mut(spill).weight = RegWeight::Zero;
                self.func.var_mut(spill).linked_to = Some(dest);
                let t = self.mov_temp(src_rm);
                self.mov(spill, t);
                self.mov(dest, spill);
            }
            Type::I64 => {
                let src_rm = self.legalize(src, LEGAL_REG | LEGAL_MEM, None);
                debug_assert!(src_ty == Type::F64);
                // Spill the f64, then read the halves back as i32 views.
                let cur = self.cur_block;
                let spill = self.func.make_temp(Type::F64, Some(cur));
                self.func.var_mut(spill).weight = RegWeight::Zero;
                if let Operand::Var(sv) = src_rm {
                    self.func.var_mut(spill).linked_to = Some(sv);
                }
                self.push(XInst::Movq {
                    dst: spill,
                    src: src_rm,
                });
                let (dest_lo, dest_hi) = self.lo_hi_vars(dest);
                let t_lo = self.make_reg(Type::I32, None);
                let t_hi = self.make_reg(Type::I32, None);
                self.mov(
                    t_lo,
                    Operand::Split(VariableSplit {
                        var: spill,
                        half: Half::Lo,
                    }),
                );
                self.mov(dest_lo, t_lo);
                self.mov(
                    t_hi,
                    Operand::Split(VariableSplit {
                        var: spill,
                        half: Half::Hi,
                    }),
                );
                self.mov(dest_hi, t_hi);
            }
            Type::F64 => {
                let src = self.legalize(src, LEGAL_ALL, None);
                debug_assert!(src_ty == Type::I64);
                // Store the halves into a spill slot, then movq it up.
                let cur = self.cur_block;
                let spill = self.func.make_temp(Type::F64, Some(cur));
                self.func.var_mut(spill).weight = RegWeight::Zero;
                self.func.var_mut(spill).linked_to = Some(dest);
                let lo = self.lo_operand(&src);
                let hi = self.hi_operand(&src);
                let t_lo = self.mov_temp(lo);
                // The split halves count as uses of the spill, so define it
                // before the first store.
                self.fake_def(spill, None);
                self.push(XInst::Store {
                    value: Operand::Var(t_lo),
                    addr: Operand::Split(VariableSplit {
                        var: spill,
                        half: Half::Lo,
                    }),
                });
                let t_hi = self.mov_temp(hi);
                self.push(XInst::Store {
                    value: Operand::Var(t_hi),
                    addr: Operand::Split(VariableSplit {
                        var: spill,
                        half: Half::Hi,
                    }),
                });
                self.push(XInst::Movq {
                    dst: dest,
                    src: Operand::Var(spill),
                });
            }
            Type::V8I1 => {
                debug_assert!(src_ty == Type::I8);
                // The helper ABI wants at least a 32-bit argument.
                let cur = self.cur_block;
                let staged = self.func.make_temp(Type::I32, Some(cur));
                self.lower_cast(CastOp::Zext, staged, src);
                self.lower_helper_call("Sz_bitcast_i8_to_v8i1", Some(dest), vec![Operand::Var(staged)]);
            }
            Type::V16I1 => {
                debug_assert!(src_ty == Type::I16);
                let cur = self.cur_block;
                let staged = self.func.make_temp(Type::I32, Some(cur));
                self.lower_cast(CastOp::Zext, staged, src);
                self.lower_helper_call(
                    "Sz_bitcast_i16_to_v16i1",
                    Some(dest),
                    vec![Operand::Var(staged)],
                );
            }
            Type::V8I16 | Type::V16I8 | Type::V4I32 | Type::V4F32 => {
                let v = self.legalize_to_var(src, None);
                self.movp(dest, v);
            }
            _ => self.func.set_error("Cast type not supported"),
        }
    }
}

/// Branch condition for an i32-or-narrower integer compare.
pub fn icmp32_mapping(cond: IcmpCond) -> BrCond {
    match cond {
        IcmpCond::Eq => BrCond::E,
        IcmpCond::Ne => BrCond::Ne,
        IcmpCond::Ugt => BrCond::A,
        IcmpCond::Uge => BrCond::Ae,
        IcmpCond::Ult => BrCond::B,
        IcmpCond::Ule => BrCond::Be,
        IcmpCond::Sgt => BrCond::G,
        IcmpCond::Sge => BrCond::Ge,
        IcmpCond::Slt => BrCond::L,
        IcmpCond::Sle => BrCond::Le,
    }
}

/// The three-branch sequence for a 64-bit ordered compare:
/// `(C1 taken => true, C2 taken => false, C3 on lo => true)`.
/// Eq/Ne take the two-compare path instead and never consult this table.
pub fn icmp64_mapping(cond: IcmpCond) -> (BrCond, BrCond, BrCond) {
    match cond {
        IcmpCond::Ugt => (BrCond::A, BrCond::B, BrCond::A),
        IcmpCond::Uge => (BrCond::A, BrCond::B, BrCond::Ae),
        IcmpCond::Ult => (BrCond::B, BrCond::A, BrCond::B),
        IcmpCond::Ule => (BrCond::B, BrCond::A, BrCond::Be),
        IcmpCond::Sgt => (BrCond::G, BrCond::L, BrCond::A),
        IcmpCond::Sge => (BrCond::G, BrCond::L, BrCond::Ae),
        IcmpCond::Slt => (BrCond::L, BrCond::G, BrCond::B),
        IcmpCond::Sle => (BrCond::L, BrCond::G, BrCond::Be),
        IcmpCond::Eq | IcmpCond::Ne => unreachable!("Eq/Ne use the equality sequence"),
    }
}

/// One row of the fcmp lowering table.
pub struct FcmpEntry {
    /// Result value when the branch(es) are taken.
    pub default: u32,
    pub swap_scalar_operands: bool,
    pub c1: Option<BrCond>,
    pub c2: Option<BrCond>,
    pub swap_vector_operands: bool,
    /// Packed predicate; None marks the specially-handled conditions.
    pub cmpps: Option<CmppsCond>,
}

/// The 16-entry fcmp table: scalar branch conditions (with optional operand
/// swap) and the packed cmpps predicate (with its own swap column).
pub fn fcmp_table(cond: FcmpCond) -> FcmpEntry {
    let e = |default,
             swap_scalar_operands,
             c1,
             c2,
             swap_vector_operands,
             cmpps| FcmpEntry {
        default,
        swap_scalar_operands,
        c1,
        c2,
        swap_vector_operands,
        cmpps,
    };
    match cond {
        FcmpCond::False => e(0, false, None, None, false, None),
        FcmpCond::Oeq => e(0, false, Some(BrCond::Ne), Some(BrCond::P), false, Some(CmppsCond::Eq)),
        FcmpCond::Ogt => e(1, false, Some(BrCond::A), None, true, Some(CmppsCond::Lt)),
        FcmpCond::Oge => e(1, false, Some(BrCond::Ae), None, true, Some(CmppsCond::Le)),
        FcmpCond::Olt => e(1, true, Some(BrCond::A), None, false, Some(CmppsCond::Lt)),
        FcmpCond::Ole => e(1, true, Some(BrCond::Ae), None, false, Some(CmppsCond::Le)),
        FcmpCond::One => e(1, false, Some(BrCond::Ne), None, false, None),
        FcmpCond::Ord => e(1, false, Some(BrCond::Np), None, false, Some(CmppsCond::Ord)),
        FcmpCond::Ueq => e(1, false, Some(BrCond::E), None, false, None),
        FcmpCond::Ugt => e(1, true, Some(BrCond::B), None, false, Some(CmppsCond::Nle)),
        FcmpCond::Uge => e(1, true, Some(BrCond::Be), None, false, Some(CmppsCond::Nlt)),
        FcmpCond::Ult => e(1, false, Some(BrCond::B), None, true, Some(CmppsCond::Nle)),
        FcmpCond::Ule => e(1, false, Some(BrCond::Be), None, true, Some(CmppsCond::Nlt)),
        FcmpCond::Une => e(1, false, Some(BrCond::Ne), Some(BrCond::P), false, Some(CmppsCond::Neq)),
        FcmpCond::Uno => e(1, false, Some(BrCond::P), None, false, Some(CmppsCond::Unord)),
        FcmpCond::True => e(1, false, None, None, false, None),
    }
}
