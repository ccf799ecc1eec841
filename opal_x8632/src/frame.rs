//! Stack frame layout and prolog/epilog generation.
//!
//! Frame shape, top down: return address, preserved registers, padding,
//! globals spill area, padding, locals spill area, padding, allocas.
//! Spilled variables are bucket-sorted by alignment; locals (single-block
//! lifetime) share one region sized by the maximum per-block demand unless
//! the function calls a returns-twice function.

use opal_ir::function::{Function, RegWeight};
use opal_ir::operand::{Constant, MemOperand, Operand};
use opal_ir::value::VarRef;

use crate::inst::XInst;
use crate::isel::{
    apply_alignment, apply_stack_alignment, LoweredBlock, PhysRegs, MAX_XMM_ARGS,
    RET_IP_SIZE_BYTES,
};
use crate::opts::TargetOpts;
use crate::reg::{
    get_register_set, mask_regs, Reg, RegNum, REG_SET_CALLEE_SAVE, REG_SET_NONE,
};
use crate::types::width_on_stack;

/// Base-2 log of the smallest and largest stack slot widths.
const LOG2_MIN_STACK_SLOT: u32 = 2;
const LOG2_MAX_STACK_SLOT: u32 = 4;

/// Frame facts the emitter needs.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub is_ebp_based: bool,
    pub spill_area_size: u32,
    pub preserved_regs_size: u32,
}

/// Bucket-sort spilled variables by descending slot alignment.
fn sort_by_alignment(func: &Function, source: &[VarRef]) -> Vec<VarRef> {
    let nbuckets = (LOG2_MAX_STACK_SLOT - LOG2_MIN_STACK_SLOT + 1) as usize;
    let mut buckets: Vec<Vec<VarRef>> = vec![Vec::new(); nbuckets];
    for &v in source {
        let natural = width_on_stack(func.var(v).ty);
        let log = natural.trailing_zeros();
        debug_assert!((LOG2_MIN_STACK_SLOT..=LOG2_MAX_STACK_SLOT).contains(&log));
        buckets[(log - LOG2_MIN_STACK_SLOT) as usize].push(v);
    }
    let mut out = Vec::with_capacity(source.len());
    for bucket in buckets.into_iter().rev() {
        out.extend(bucket);
    }
    out
}

/// Set the frame offset of a stack-passed argument and, if the argument was
/// register-allocated, load it in the prolog. i64 arguments recurse on
/// their halves, low first.
fn finish_argument_lowering(
    func: &mut Function,
    arg: VarRef,
    frame_ptr: VarRef,
    basic_frame_offset: u32,
    in_args_size: &mut u32,
    prolog: &mut Vec<XInst>,
) {
    let (lo, hi, ty) = {
        let v = func.var(arg);
        (v.lo, v.hi, v.ty)
    };
    if let (Some(lo), Some(hi)) = (lo, hi) {
        if ty == opal_ir::types::Type::I64 {
            finish_argument_lowering(func, lo, frame_ptr, basic_frame_offset, in_args_size, prolog);
            finish_argument_lowering(func, hi, frame_ptr, basic_frame_offset, in_args_size, prolog);
            return;
        }
    }
    if ty.is_vector() {
        *in_args_size = apply_stack_alignment(*in_args_size);
    }
    let offset = (basic_frame_offset + *in_args_size) as i32;
    func.var_mut(arg).stack_offset = Some(offset);
    *in_args_size += width_on_stack(ty);
    if func.var(arg).has_reg() {
        debug_assert!(ty != opal_ir::types::Type::I64);
        let mem = MemOperand::new(ty, Some(frame_ptr), Some(Constant::i32(offset as i64)));
        if ty.is_vector() {
            prolog.push(XInst::Movp {
                dst: arg,
                src: Operand::Mem(mem),
            });
        } else {
            prolog.push(XInst::Mov {
                dst: arg,
                src: Operand::Mem(mem),
            });
        }
    }
}

/// Compute spill slots, emit the prolog into the entry block and an epilog
/// before every return, and write the final stack offsets into variables.
pub fn gen_frame(
    func: &mut Function,
    lowered: &mut [LoweredBlock],
    phys: &mut PhysRegs,
    is_ebp_based: bool,
    needs_stack_alignment: bool,
    opts: &TargetOpts,
) -> FrameInfo {
    // Locals cannot share slots when a returns-twice call may revisit
    // blocks whose locals are still live.
    let simple_coalescing = !func.calls_returns_twice;

    // Which variables the lowered code actually references.
    let mut referenced = vec![false; func.vars.len()];
    let mut scratch = Vec::new();
    for block in lowered.iter() {
        for inst in &block.insts {
            scratch.clear();
            inst.referenced_vars(&mut scratch);
            for v in &scratch {
                referenced[v.index()] = true;
            }
        }
    }

    // Prepass: registers in use, and the set of variables needing slots.
    let mut regs_used: u32 = 0;
    let mut spilled: Vec<VarRef> = Vec::new();
    let mut linked_to_spill_slots: Vec<VarRef> = Vec::new();
    for i in 0..func.vars.len() {
        let var = &func.vars[i];
        if let Some(r) = var.reg_num {
            regs_used |= 1 << r;
            continue;
        }
        // Arguments get offsets from the in-args area below.
        if var.is_arg {
            continue;
        }
        if !referenced[i] {
            continue;
        }
        if var.weight == RegWeight::Zero {
            if let Some(l) = var.linked_to {
                if !func.vars[l.index()].has_reg() {
                    linked_to_spill_slots.push(VarRef(i as u32));
                    continue;
                }
            }
        }
        spilled.push(VarRef(i as u32));
    }

    let sorted = sort_by_alignment(func, &spilled);

    let mut globals_size: u32 = 0;
    let mut locals_size = vec![0u32; func.blocks.len()];
    let mut spill_area_size: u32 = 0;
    let mut spill_area_alignment: u32 = 0;
    let mut locals_slots_alignment: u32 = 0;
    for &v in &sorted {
        let increment = width_on_stack(func.var(v).ty);
        if spill_area_alignment == 0 {
            spill_area_alignment = increment;
        }
        if simple_coalescing {
            match func.var(v).def_block {
                None => globals_size += increment,
                Some(node) => {
                    let n = node.index();
                    locals_size[n] += increment;
                    spill_area_size = spill_area_size.max(locals_size[n]);
                    if locals_slots_alignment == 0 {
                        locals_slots_alignment = increment;
                    }
                }
            }
        } else {
            spill_area_size += increment;
        }
    }
    let locals_spill_area_size = spill_area_size;
    spill_area_size += globals_size;

    // Prolog: preserved-register pushes, frame pointer setup.
    let esp = phys.get(func, Reg::Esp.num());
    let callee_saves = get_register_set(REG_SET_CALLEE_SAVE, REG_SET_NONE);
    let mut prolog: Vec<XInst> = Vec::new();
    let mut preserved_regs_size: u32 = 0;
    let push_list: Vec<RegNum> = mask_regs(callee_saves & regs_used)
        .filter(|&r| !(is_ebp_based && r == Reg::Ebp.num()))
        .collect();
    for &r in &push_list {
        let v = phys.get(func, r);
        prolog.push(XInst::Push { src: v });
        preserved_regs_size += 4;
    }
    if is_ebp_based {
        debug_assert!(regs_used & (1 << Reg::Ebp.num()) == 0);
        let ebp = phys.get(func, Reg::Ebp.num());
        prolog.push(XInst::Push { src: ebp });
        preserved_regs_size += 4;
        prolog.push(XInst::Mov {
            dst: ebp,
            src: Operand::Var(esp),
        });
    }

    // Align the spill area after the preserved registers.
    let mut spill_area_padding: u32 = 0;
    if spill_area_alignment > 0 {
        let padding_start = RET_IP_SIZE_BYTES + preserved_regs_size;
        let spill_area_start = apply_alignment(padding_start, spill_area_alignment);
        spill_area_padding = spill_area_start - padding_start;
        spill_area_size += spill_area_padding;
    }

    // Pad the end of the globals area so the locals area is aligned.
    let mut globals_and_subsequent_padding = globals_size;
    if locals_slots_alignment > 0 {
        debug_assert!(locals_slots_alignment <= spill_area_alignment);
        globals_and_subsequent_padding = apply_alignment(globals_size, locals_slots_alignment);
        spill_area_size += globals_and_subsequent_padding - globals_size;
    }

    // Realign esp when any call or alloca demanded it.
    if needs_stack_alignment {
        let stack_offset = RET_IP_SIZE_BYTES + preserved_regs_size;
        let stack_size = apply_stack_alignment(stack_offset + spill_area_size);
        spill_area_size = stack_size - stack_offset;
    }

    if spill_area_size > 0 {
        prolog.push(XInst::Sub {
            dst: esp,
            src: Operand::Const(Constant::i32(spill_area_size as i64)),
        });
    }

    // Stack argument offsets; arguments were pushed right to left, so the
    // first is closest to the return address.
    let frame_ptr_reg = if is_ebp_based {
        Reg::Ebp.num()
    } else {
        Reg::Esp.num()
    };
    let frame_ptr = phys.get(func, frame_ptr_reg);
    let mut basic_frame_offset = preserved_regs_size + RET_IP_SIZE_BYTES;
    if !is_ebp_based {
        basic_frame_offset += spill_area_size;
    }
    let args = func.args.clone();
    let mut in_args_size: u32 = 0;
    let mut num_xmm_args = 0usize;
    for arg in args {
        if func.var(arg).ty.is_vector() && num_xmm_args < MAX_XMM_ARGS {
            num_xmm_args += 1;
            continue;
        }
        finish_argument_lowering(
            func,
            arg,
            frame_ptr,
            basic_frame_offset,
            &mut in_args_size,
            &mut prolog,
        );
    }

    // Assign spill offsets, mirroring the sizing walk.
    let mut globals_space_used = spill_area_padding;
    locals_size.iter_mut().for_each(|s| *s = 0);
    let mut next_stack_offset = globals_space_used;
    for &v in &sorted {
        let increment = width_on_stack(func.var(v).ty);
        if simple_coalescing {
            match func.var(v).def_block {
                None => {
                    globals_space_used += increment;
                    next_stack_offset = globals_space_used;
                }
                Some(node) => {
                    let n = node.index();
                    locals_size[n] += increment;
                    next_stack_offset =
                        spill_area_padding + globals_and_subsequent_padding + locals_size[n];
                }
            }
        } else {
            next_stack_offset += increment;
        }
        let offset = if is_ebp_based {
            -(next_stack_offset as i32)
        } else {
            spill_area_size as i32 - next_stack_offset as i32
        };
        func.var_mut(v).stack_offset = Some(offset);
    }

    // Variables sharing a slot with a spilled variable copy its offset.
    for v in linked_to_spill_slots {
        let linked = func.var(v).linked_to.expect("linked spill slot");
        let offset = func.var(linked).stack_offset;
        debug_assert!(offset.is_some(), "linked variable has no slot");
        func.var_mut(v).stack_offset = offset;
    }

    if opts.verbose_frame {
        let esp_padding = spill_area_size
            - locals_spill_area_size
            - globals_and_subsequent_padding
            - spill_area_padding;
        log::debug!(
            target: "opal::frame",
            "stack layout for @{}: in-args={} ret-addr={} preserved={} \
             spill-padding={} globals={} globals-locals-padding={} locals={} \
             esp-padding={} esp-adjustment={} ebp-based={}",
            func.name,
            in_args_size,
            RET_IP_SIZE_BYTES,
            preserved_regs_size,
            spill_area_padding,
            globals_size,
            globals_and_subsequent_padding - globals_size,
            locals_spill_area_size,
            esp_padding,
            spill_area_size,
            is_ebp_based,
        );
    }

    // Epilog before every return: undo the esp adjustment, then pop the
    // preserved registers in reverse order.
    let mut epilog: Vec<XInst> = Vec::new();
    if is_ebp_based {
        let ebp = phys.get(func, Reg::Ebp.num());
        epilog.push(XInst::Mov {
            dst: esp,
            src: Operand::Var(ebp),
        });
        epilog.push(XInst::Pop { dst: ebp });
    } else if spill_area_size > 0 {
        epilog.push(XInst::Add {
            dst: esp,
            src: Operand::Const(Constant::i32(spill_area_size as i64)),
        });
    }
    for &r in push_list.iter().rev() {
        let v = phys.get(func, r);
        epilog.push(XInst::Pop { dst: v });
    }

    for block in lowered.iter_mut() {
        let mut i = 0;
        while i < block.insts.len() {
            if matches!(block.insts[i], XInst::Ret { .. }) {
                for (k, inst) in epilog.iter().enumerate() {
                    block.insts.insert(i + k, inst.clone());
                }
                i += epilog.len();
            }
            i += 1;
        }
    }

    // The prolog goes at the top of the entry block, after its label.
    if let Some(entry) = lowered.first_mut() {
        let at = if matches!(entry.insts.first(), Some(XInst::Label { .. })) {
            1
        } else {
            0
        };
        for (k, inst) in prolog.into_iter().enumerate() {
            entry.insts.insert(at + k, inst);
        }
    }

    FrameInfo {
        is_ebp_based,
        spill_area_size,
        preserved_regs_size,
    }
}
