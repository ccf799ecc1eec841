//! Textual assembly emission.
//!
//! Renders the lowered pseudo-instructions in Intel syntax, resolves
//! variables to register names or frame slots, and prints the float/double
//! constant pools. Fake instructions emit nothing. While walking a call
//! sequence the emitter tracks the in-flight stack adjustment so
//! esp-relative slots stay correct; the adjustment resets at the call.

use std::fmt::Write;

use opal_ir::context::GlobalContext;
use opal_ir::function::Function;
use opal_ir::operand::{Constant, Half, MemOperand, Operand, SegmentReg, VariableSplit};
use opal_ir::types::Type;
use opal_ir::value::VarRef;

use crate::frame::FrameInfo;
use crate::inst::{BrTarget, XInst};
use crate::isel::LoweredBlock;
use crate::reg;
use crate::types::{pack_suffix, sdss_suffix, width_string};

struct Emitter<'a> {
    func: &'a Function,
    ctx: &'a mut GlobalContext,
    info: &'a FrameInfo,
    fn_label: String,
    out: String,
    stack_adjustment: i32,
}

/// Emit one translated function as assembly text.
pub fn emit_function(
    func: &Function,
    lowered: &[LoweredBlock],
    info: &FrameInfo,
    ctx: &mut GlobalContext,
) -> String {
    let mangled = ctx.mangle_name(&func.name);
    let mut e = Emitter {
        func,
        ctx,
        info,
        fn_label: mangled.clone(),
        out: String::new(),
        stack_adjustment: 0,
    };
    let _ = writeln!(e.out, "\t.text");
    let _ = writeln!(e.out, "\t.globl\t{mangled}");
    let _ = writeln!(e.out, "{mangled}:");
    for block in lowered {
        let name = &func.blocks[block.block.index()].name;
        let _ = writeln!(e.out, ".L{}${}:", e.fn_label, name);
        for inst in &block.insts {
            e.emit_inst(inst);
        }
    }
    e.out
}

/// Emit the float and double constant pools.
pub fn emit_constant_pools(ctx: &GlobalContext) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\t.section\t.rodata.cst4,\"aM\",@progbits,4\n\t.align\t4"
    );
    for (id, bits) in ctx.float_pool().iter().enumerate() {
        let _ = writeln!(out, "L$f32${id}:");
        let _ = writeln!(
            out,
            "\t.long\t0x{bits:x}\t# f32 {}",
            f32::from_bits(*bits)
        );
    }
    let _ = writeln!(
        out,
        "\t.section\t.rodata.cst8,\"aM\",@progbits,8\n\t.align\t8"
    );
    for (id, bits) in ctx.double_pool().iter().enumerate() {
        let _ = writeln!(out, "L$f64${id}:");
        let _ = writeln!(
            out,
            "\t.quad\t0x{bits:x}\t# f64 {}",
            f64::from_bits(*bits)
        );
    }
    out
}

impl<'a> Emitter<'a> {
    fn line(&mut self, text: String) {
        let _ = writeln!(self.out, "\t{text}");
    }

    fn frame_reg(&self) -> &'static str {
        if self.info.is_ebp_based {
            "ebp"
        } else {
            "esp"
        }
    }

    /// The bracketed frame slot of a spilled variable, without a width
    /// qualifier.
    fn slot_body(&self, v: VarRef, extra: i32) -> String {
        let var = self.func.var(v);
        let mut offset = var
            .stack_offset
            .expect("variable has neither register nor stack slot")
            + extra;
        if !self.info.is_ebp_based {
            offset += self.stack_adjustment;
        }
        if offset == 0 {
            format!("[{}]", self.frame_reg())
        } else if offset > 0 {
            format!("[{}+{}]", self.frame_reg(), offset)
        } else {
            format!("[{}{}]", self.frame_reg(), offset)
        }
    }

    /// A variable at the width of `ty`: register name, or a qualified frame
    /// slot reference.
    fn var_str_ty(&self, v: VarRef, ty: Type) -> String {
        let var = self.func.var(v);
        match var.reg_num {
            Some(r) => reg::reg_name(r, ty).to_string(),
            None => format!("{} {}", width_string(ty), self.slot_body(v, 0)),
        }
    }

    fn var_str(&self, v: VarRef) -> String {
        self.var_str_ty(v, self.func.var(v).ty)
    }

    fn split_str(&self, s: &VariableSplit) -> String {
        let extra = match s.half {
            Half::Lo => 0,
            Half::Hi => 4,
        };
        format!("dword ptr {}", self.slot_body(s.var, extra))
    }

    fn mem_str(&mut self, m: &MemOperand) -> String {
        let mut body = String::new();
        if let Some(b) = m.base {
            body.push_str(self.var_str_ty(b, Type::I32).as_str());
        }
        if let Some(ix) = m.index {
            if !body.is_empty() {
                body.push('+');
            }
            let _ = write!(body, "{}*{}", self.var_str_ty(ix, Type::I32), 1u32 << m.shift);
        }
        match &m.offset {
            None => {}
            Some(Constant::Int { value, .. }) => {
                if body.is_empty() {
                    let _ = write!(body, "{value}");
                } else if *value > 0 {
                    let _ = write!(body, "+{value}");
                } else if *value < 0 {
                    let _ = write!(body, "{value}");
                }
            }
            Some(Constant::Reloc { name, offset }) => {
                let mangled = self.ctx.mangle_name(name);
                if !body.is_empty() {
                    body.push('+');
                }
                body.push_str(&mangled);
                if *offset != 0 {
                    let _ = write!(body, "+{offset}");
                }
            }
            Some(other) => unreachable!("bad memory offset {other:?}"),
        }
        let seg = match m.seg {
            SegmentReg::Default => "",
            SegmentReg::Gs => "gs:",
        };
        format!("{} {seg}[{body}]", width_string(m.ty))
    }

    /// Generic operand rendering at the operand's own width.
    fn op_str(&mut self, op: &Operand) -> String {
        self.op_str_ty(op, None)
    }

    /// Operand rendering, forcing register/memory widths to `ty` when
    /// given (used by truncating moves and the division family).
    fn op_str_ty(&mut self, op: &Operand, ty: Option<Type>) -> String {
        match op {
            Operand::Var(v) => {
                let ty = ty.unwrap_or(self.func.var(*v).ty);
                self.var_str_ty(*v, ty)
            }
            Operand::Const(Constant::Int { value, .. }) => format!("{value}"),
            Operand::Const(Constant::Float(f)) => {
                let id = self.ctx.pool_entry_f32(*f);
                format!("dword ptr [L$f32${id}]")
            }
            Operand::Const(Constant::Double(d)) => {
                let id = self.ctx.pool_entry_f64(*d);
                format!("qword ptr [L$f64${id}]")
            }
            Operand::Const(Constant::Reloc { name, offset }) => {
                let mangled = self.ctx.mangle_name(name);
                if *offset != 0 {
                    format!("{mangled}+{offset}")
                } else {
                    mangled
                }
            }
            Operand::Const(Constant::Undef(_)) => {
                unreachable!("undef value reached the emitter")
            }
            Operand::Mem(m) => self.mem_str(m),
            Operand::Split(s) => self.split_str(s),
        }
    }

    /// Shift amounts print as cl when they live in a register.
    fn amount_str(&mut self, op: &Operand) -> String {
        match op {
            Operand::Var(v) => self.var_str_ty(*v, Type::I8),
            other => self.op_str(other),
        }
    }

    fn target_str(&self, t: &BrTarget) -> String {
        match t {
            BrTarget::Block(b) => {
                format!(".L{}${}", self.fn_label, self.func.blocks[b.index()].name)
            }
            // Label ids below the block count name blocks; the rest are
            // in-block labels.
            BrTarget::Label(id) if (*id as usize) < self.func.blocks.len() => {
                format!(".L{}${}", self.fn_label, self.func.blocks[*id as usize].name)
            }
            BrTarget::Label(id) => format!(".L{}$local${id}", self.fn_label),
        }
    }

    fn emit_inst(&mut self, inst: &XInst) {
        match inst {
            XInst::Mov { dst, src } => {
                let ty = self.func.var(*dst).ty;
                let mnemonic = match ty {
                    Type::F32 => "movss",
                    Type::F64 => "movsd",
                    _ => "mov",
                };
                // Integer moves narrow through the destination width.
                let forced = if ty.is_scalar_int() { Some(ty) } else { None };
                let d = self.var_str(*dst);
                let s = match src {
                    Operand::Const(Constant::Reloc { .. }) => {
                        format!("offset {}", self.op_str(src))
                    }
                    _ => self.op_str_ty(src, forced),
                };
                self.line(format!("{mnemonic}\t{d}, {s}"));
            }
            XInst::Movp { dst, src } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("movups\t{d}, {s}"));
            }
            XInst::Movd { dst, src } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("movd\t{d}, {s}"));
            }
            XInst::MovssReg { dst, src } => {
                let d = self.var_str(*dst);
                let s = self.var_str(*src);
                self.line(format!("movss\t{d}, {s}"));
            }
            XInst::Movq { dst, src } => {
                let d = self.var_str_ty(*dst, Type::F64);
                let s = self.op_str(src);
                self.line(format!("movq\t{d}, {s}"));
            }
            XInst::Movsx { dst, src } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("movsx\t{d}, {s}"));
            }
            XInst::Movzx { dst, src } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("movzx\t{d}, {s}"));
            }
            XInst::Store { value, addr } => {
                let ty = addr.ty(self.func);
                let mnemonic = match ty {
                    Type::F32 => "movss",
                    Type::F64 => "movsd",
                    _ => "mov",
                };
                let forced = if ty.is_scalar_int() { Some(ty) } else { None };
                let a = self.op_str(addr);
                let v = self.op_str_ty(value, forced);
                self.line(format!("{mnemonic}\t{a}, {v}"));
            }
            XInst::StoreP { value, addr } => {
                let a = self.mem_str(addr);
                let v = self.var_str(*value);
                self.line(format!("movups\t{a}, {v}"));
            }
            XInst::StoreQ { value, addr } => {
                let a = self.mem_str(addr);
                let v = self.var_str(*value);
                self.line(format!("movq\t{a}, {v}"));
            }
            XInst::Lea { dst, src } => {
                let d = self.var_str(*dst);
                let s = match src {
                    Operand::Var(v) => self.slot_body(*v, 0),
                    Operand::Mem(m) => {
                        let full = self.mem_str(m);
                        full[full.find('[').unwrap_or(0)..].to_string()
                    }
                    other => unreachable!("lea of {other:?}"),
                };
                self.line(format!("lea\t{d}, {s}"));
            }
            XInst::Add { dst, src } => self.rmw("add", *dst, src),
            XInst::Adc { dst, src } => self.rmw("adc", *dst, src),
            XInst::Sub { dst, src } => self.rmw("sub", *dst, src),
            XInst::Sbb { dst, src } => self.rmw("sbb", *dst, src),
            XInst::And { dst, src } => self.rmw("and", *dst, src),
            XInst::Or { dst, src } => self.rmw("or", *dst, src),
            XInst::Xor { dst, src } => self.rmw("xor", *dst, src),
            XInst::Imul { dst, src } => self.rmw("imul", *dst, src),
            XInst::Neg { dst } => {
                let d = self.var_str(*dst);
                self.line(format!("neg\t{d}"));
            }
            XInst::Mul { dst_lo: _, a: _, src } => {
                let ty = src.ty(self.func);
                let s = self.op_str_ty(src, Some(ty));
                self.line(format!("mul\t{s}"));
            }
            XInst::Div { dest, src, .. } => {
                let ty = self.func.var(*dest).ty;
                let s = self.op_str_ty(src, Some(ty));
                self.line(format!("div\t{s}"));
            }
            XInst::Idiv { dest, src, .. } => {
                let ty = self.func.var(*dest).ty;
                let s = self.op_str_ty(src, Some(ty));
                self.line(format!("idiv\t{s}"));
            }
            XInst::Cbwdq { src, .. } => {
                let mnemonic = match self.func.var(*src).ty {
                    Type::I8 => "cbw",
                    Type::I16 => "cwd",
                    _ => "cdq",
                };
                self.line(mnemonic.to_string());
            }
            XInst::Shl { dst, amount } => self.shift("shl", *dst, amount),
            XInst::Shr { dst, amount } => self.shift("shr", *dst, amount),
            XInst::Sar { dst, amount } => self.shift("sar", *dst, amount),
            XInst::Rol { dst, amount } => self.shift("rol", *dst, amount),
            XInst::Shld { dst, src, amount } => {
                let d = self.var_str(*dst);
                let s = self.var_str(*src);
                let a = self.amount_str(amount);
                self.line(format!("shld\t{d}, {s}, {a}"));
            }
            XInst::Shrd { dst, src, amount } => {
                let d = self.var_str(*dst);
                let s = self.var_str(*src);
                let a = self.amount_str(amount);
                self.line(format!("shrd\t{d}, {s}, {a}"));
            }
            XInst::Bswap { dst } => {
                let d = self.var_str(*dst);
                self.line(format!("bswap\t{d}"));
            }
            XInst::Bsf { dst, src } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("bsf\t{d}, {s}"));
            }
            XInst::Bsr { dst, src } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("bsr\t{d}, {s}"));
            }
            XInst::Cmp { a, b } => {
                let ty = a.ty(self.func);
                let forced = if ty.is_scalar_int() { Some(ty) } else { None };
                let sa = self.op_str(a);
                let sb = self.op_str_ty(b, forced);
                self.line(format!("cmp\t{sa}, {sb}"));
            }
            XInst::Test { a, b } => {
                let sa = self.op_str(a);
                let sb = self.op_str(b);
                self.line(format!("test\t{sa}, {sb}"));
            }
            XInst::Ucomiss { a, b } => {
                let mnemonic = if self.func.var(*a).ty == Type::F32 {
                    "ucomiss"
                } else {
                    "ucomisd"
                };
                let sa = self.var_str(*a);
                let sb = self.op_str(b);
                self.line(format!("{mnemonic}\t{sa}, {sb}"));
            }
            XInst::Cmov { dst, src, cond } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("cmov{}\t{d}, {s}", cond.suffix()));
            }
            XInst::Addss { dst, src } => self.fp_rmw("add", *dst, src),
            XInst::Subss { dst, src } => self.fp_rmw("sub", *dst, src),
            XInst::Mulss { dst, src } => self.fp_rmw("mul", *dst, src),
            XInst::Divss { dst, src } => self.fp_rmw("div", *dst, src),
            XInst::Sqrtss { dst, src } => self.fp_rmw("sqrt", *dst, src),
            XInst::Cvt { dst, src } => {
                let dst_ty = self.func.var(*dst).ty;
                let src_ty = src.ty(self.func);
                let mnemonic = match (dst_ty, src_ty) {
                    (Type::F32, Type::F64) => "cvtsd2ss",
                    (Type::F64, Type::F32) => "cvtss2sd",
                    (Type::F32, _) => "cvtsi2ss",
                    (Type::F64, _) => "cvtsi2sd",
                    (Type::V4F32, Type::V4I32) => "cvtdq2ps",
                    _ => unreachable!("cvt {src_ty} -> {dst_ty}"),
                };
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("{mnemonic}\t{d}, {s}"));
            }
            XInst::Cvtt { dst, src } => {
                let src_ty = src.ty(self.func);
                let mnemonic = match src_ty {
                    Type::F32 => "cvttss2si",
                    Type::F64 => "cvttsd2si",
                    Type::V4F32 => "cvttps2dq",
                    _ => unreachable!("cvtt from {src_ty}"),
                };
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("{mnemonic}\t{d}, {s}"));
            }
            XInst::Fld { src } => self.emit_fld(src),
            XInst::Fstp { dst } => self.emit_fstp(*dst),
            XInst::Padd { dst, src } => self.packed("padd", *dst, src, true),
            XInst::Psub { dst, src } => self.packed("psub", *dst, src, true),
            XInst::Pand { dst, src } => self.packed("pand", *dst, src, false),
            XInst::Pandn { dst, src } => self.packed("pandn", *dst, src, false),
            XInst::Por { dst, src } => self.packed("por", *dst, src, false),
            XInst::Pxor { dst, src } => self.packed("pxor", *dst, src, false),
            XInst::Pmull { dst, src } => {
                let mnemonic = if self.func.var(*dst).ty == Type::V4I32 {
                    "pmulld"
                } else {
                    "pmullw"
                };
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("{mnemonic}\t{d}, {s}"));
            }
            XInst::Pmuludq { dst, src } => self.packed("pmuludq", *dst, src, false),
            XInst::Addps { dst, src } => self.packed("addps", *dst, src, false),
            XInst::Subps { dst, src } => self.packed("subps", *dst, src, false),
            XInst::Mulps { dst, src } => self.packed("mulps", *dst, src, false),
            XInst::Divps { dst, src } => self.packed("divps", *dst, src, false),
            XInst::Pcmpeq { dst, src } => self.packed("pcmpeq", *dst, src, true),
            XInst::Pcmpgt { dst, src } => self.packed("pcmpgt", *dst, src, true),
            XInst::Cmpps { dst, src, cond } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("cmp{}ps\t{d}, {s}", cond.infix()));
            }
            XInst::Psll { dst, amount } => {
                let suffix = pack_suffix(self.func.var(*dst).ty);
                let d = self.var_str(*dst);
                let a = self.op_str(amount);
                self.line(format!("psll{suffix}\t{d}, {a}"));
            }
            XInst::Psra { dst, amount } => {
                let suffix = pack_suffix(self.func.var(*dst).ty);
                let d = self.var_str(*dst);
                let a = self.op_str(amount);
                self.line(format!("psra{suffix}\t{d}, {a}"));
            }
            XInst::Pshufd { dst, src, mask } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("pshufd\t{d}, {s}, {mask}"));
            }
            XInst::Shufps { dst, src, mask } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("shufps\t{d}, {s}, {mask}"));
            }
            XInst::Pextr { dst, src, index } => {
                let suffix = pack_suffix(self.func.var(*src).ty);
                let d = self.var_str_ty(*dst, Type::I32);
                let s = self.var_str(*src);
                self.line(format!("pextr{suffix}\t{d}, {s}, {index}"));
            }
            XInst::Pinsr { dst, src, index } => {
                let suffix = pack_suffix(self.func.var(*dst).ty);
                let d = self.var_str(*dst);
                // Register sources widen to r32; memory keeps its width.
                let forced = match src {
                    Operand::Var(v) if self.func.var(*v).has_reg() => Some(Type::I32),
                    _ => None,
                };
                let s = self.op_str_ty(src, forced);
                self.line(format!("pinsr{suffix}\t{d}, {s}, {index}"));
            }
            XInst::Insertps { dst, src, mask } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                self.line(format!("insertps\t{d}, {s}, {mask}"));
            }
            XInst::Blendvps { dst, src, mask } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                let m = self.var_str(*mask);
                self.line(format!("blendvps\t{d}, {s}, {m}"));
            }
            XInst::Pblendvb { dst, src, mask } => {
                let d = self.var_str(*dst);
                let s = self.op_str(src);
                let m = self.var_str(*mask);
                self.line(format!("pblendvb\t{d}, {s}, {m}"));
            }
            XInst::Label { id } => {
                // Block-start labels are printed by the block loop.
                if (*id as usize) >= self.func.blocks.len() {
                    let _ = writeln!(self.out, "{}:", self.target_str(&BrTarget::Label(*id)));
                }
            }
            XInst::Jmp { target } => {
                let t = self.target_str(target);
                self.line(format!("jmp\t{t}"));
            }
            XInst::Jcc {
                cond,
                on_true,
                on_false,
            } => {
                let t = self.target_str(on_true);
                self.line(format!("j{}\t{t}", cond.suffix()));
                if let Some(f) = on_false {
                    let f = self.target_str(f);
                    self.line(format!("jmp\t{f}"));
                }
            }
            XInst::Call { target, .. } => {
                let t = self.op_str(target);
                self.line(format!("call\t{t}"));
                // Post-call code readjusts esp itself.
                self.stack_adjustment = 0;
            }
            XInst::Ret { .. } => self.line("ret".to_string()),
            XInst::AdjustStack { amount } => {
                self.line(format!("sub\tesp, {amount}"));
                self.stack_adjustment += *amount as i32;
            }
            XInst::Push { src } => {
                let s = self.var_str_ty(*src, Type::I32);
                self.line(format!("push\t{s}"));
            }
            XInst::Pop { dst } => {
                let d = self.var_str_ty(*dst, Type::I32);
                self.line(format!("pop\t{d}"));
            }
            XInst::Mfence => self.line("mfence".to_string()),
            XInst::Ud2 => self.line("ud2".to_string()),
            XInst::Nop { .. } => self.line("nop".to_string()),
            XInst::Cmpxchg {
                addr,
                desired,
                locked,
                ..
            } => {
                let prefix = if *locked { "lock " } else { "" };
                let a = self.mem_str(addr);
                let d = self.var_str(*desired);
                self.line(format!("{prefix}cmpxchg\t{a}, {d}"));
            }
            XInst::Cmpxchg8b { addr, locked, .. } => {
                let prefix = if *locked { "lock " } else { "" };
                let a = self.mem_str(addr);
                self.line(format!("{prefix}cmpxchg8b\t{a}"));
            }
            XInst::Xadd { addr, src, locked } => {
                let prefix = if *locked { "lock " } else { "" };
                let a = self.mem_str(addr);
                let s = self.var_str(*src);
                self.line(format!("{prefix}xadd\t{a}, {s}"));
            }
            XInst::Xchg { addr, src } => {
                let a = self.mem_str(addr);
                let s = self.var_str(*src);
                self.line(format!("xchg\t{a}, {s}"));
            }
            XInst::FakeDef { .. } | XInst::FakeUse { .. } | XInst::FakeKill { .. } => {}
        }
    }

    fn rmw(&mut self, mnemonic: &str, dst: VarRef, src: &Operand) {
        let ty = self.func.var(dst).ty;
        let forced = if ty.is_scalar_int() { Some(ty) } else { None };
        let d = self.var_str(dst);
        let s = self.op_str_ty(src, forced);
        self.line(format!("{mnemonic}\t{d}, {s}"));
    }

    fn fp_rmw(&mut self, base: &str, dst: VarRef, src: &Operand) {
        let suffix = sdss_suffix(self.func.var(dst).ty);
        let d = self.var_str(dst);
        let s = self.op_str(src);
        self.line(format!("{base}{suffix}\t{d}, {s}"));
    }

    fn shift(&mut self, mnemonic: &str, dst: VarRef, amount: &Operand) {
        let d = self.var_str(dst);
        let a = self.amount_str(amount);
        self.line(format!("{mnemonic}\t{d}, {a}"));
    }

    fn packed(&mut self, base: &str, dst: VarRef, src: &Operand, typed: bool) {
        let mnemonic = if typed {
            format!("{base}{}", pack_suffix(self.func.var(dst).ty))
        } else {
            base.to_string()
        };
        let d = self.var_str(dst);
        let s = self.op_str(src);
        self.line(format!("{mnemonic}\t{d}, {s}"));
    }

    /// fld cannot read an xmm register; route through a scratch stack slot.
    fn emit_fld(&mut self, src: &Operand) {
        if let Operand::Var(v) = src {
            let var = self.func.var(*v);
            if let Some(r) = var.reg_num {
                let ty = var.ty;
                let width = ty.byte_width();
                let mov = if ty == Type::F32 { "movss" } else { "movsd" };
                let name = reg::reg_name(r, ty);
                self.line(format!("sub\tesp, {width}"));
                self.line(format!("{mov}\t{} [esp], {name}", width_string(ty)));
                self.line(format!("fld\t{} [esp]", width_string(ty)));
                self.line(format!("add\tesp, {width}"));
                return;
            }
        }
        let s = self.op_str(src);
        self.line(format!("fld\t{s}"));
    }

    /// fstp writes memory or pops; an xmm destination goes through a
    /// scratch stack slot.
    fn emit_fstp(&mut self, dst: Option<VarRef>) {
        let Some(dst) = dst else {
            self.line("fstp\tst(0)".to_string());
            return;
        };
        let var = self.func.var(dst);
        let ty = var.ty;
        if let Some(r) = var.reg_num {
            let width = ty.byte_width();
            let mov = if ty == Type::F32 { "movss" } else { "movsd" };
            let name = reg::reg_name(r, ty);
            self.line(format!("sub\tesp, {width}"));
            self.line(format!("fstp\t{} [esp]", width_string(ty)));
            self.line(format!("{mov}\t{name}, {} [esp]", width_string(ty)));
            self.line(format!("add\tesp, {width}"));
        } else {
            let d = self.var_str(dst);
            self.line(format!("fstp\t{d}"));
        }
    }
}
