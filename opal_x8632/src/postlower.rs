//! Om1 post-lower register assignment.
//!
//! When the full allocator is skipped, infinite-weight lowering temporaries
//! still need registers. Two linear passes over a block's lowered
//! instructions: the first black-lists every register used by a pre-colored
//! source and records last uses; the second hands out free registers to
//! infinite-weight variables and recycles them after their last use.
//! FakeKill markers are ignored throughout; the lowering sequences keep no
//! infinite-weight variable live across a call.

use std::collections::HashMap;

use opal_ir::function::{Function, RegWeight};
use opal_regalloc::{AllocInst, OpKind};

use crate::inst::XInst;
use crate::reg::{
    get_register_set, registers_for_type, REG_SET_ALL, REG_SET_FRAME_POINTER,
    REG_SET_STACK_POINTER,
};

/// Assign registers to the infinite-weight temporaries of one lowered block.
pub fn post_lower_block(func: &mut Function, insts: &[XInst], has_frame_pointer: bool) {
    let exclude = if has_frame_pointer {
        REG_SET_STACK_POINTER | REG_SET_FRAME_POINTER
    } else {
        REG_SET_STACK_POINTER
    };
    let mut white_list = get_register_set(REG_SET_ALL, exclude);

    // First pass: black-list pre-colored registers appearing as sources and
    // record each variable's last reference.
    let mut last_uses: HashMap<u32, usize> = HashMap::new();
    let mut ops = Vec::new();
    for (i, inst) in insts.iter().enumerate() {
        if matches!(inst, XInst::FakeKill { .. }) {
            continue;
        }
        ops.clear();
        inst.reg_operands(&mut ops);
        for op in &ops {
            if !matches!(op.kind, OpKind::Use | OpKind::UseDef) {
                continue;
            }
            last_uses.insert(op.var, i);
            if let Some(r) = func.vars[op.var as usize].reg_num {
                white_list &= !(1 << r);
            }
        }
    }

    // Second pass: color infinite-weight variables from the free pool,
    // releasing a register after the instruction holding its last use.
    let mut available = white_list;
    for (i, inst) in insts.iter().enumerate() {
        if matches!(inst, XInst::FakeKill { .. }) {
            continue;
        }
        let mut freed: u32 = 0;
        ops.clear();
        inst.reg_operands(&mut ops);
        for op in &ops {
            let var = &func.vars[op.var as usize];
            if var.reg_num.is_none() && var.weight == RegWeight::Infinite {
                let candidates = available & registers_for_type(var.ty);
                assert!(
                    candidates != 0,
                    "no register available for {}",
                    var.name
                );
                let reg = candidates.trailing_zeros();
                func.vars[op.var as usize].reg_num = Some(reg);
                available &= !(1 << reg);
            }
            if let Some(reg) = func.vars[op.var as usize].reg_num {
                if last_uses.get(&op.var) == Some(&i) && white_list & (1 << reg) != 0 {
                    freed |= 1 << reg;
                }
            }
        }
        available |= freed;
    }
}
