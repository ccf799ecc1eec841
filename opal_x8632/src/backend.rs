//! The translation drivers: pass sequencing for O2 and Om1.
//!
//! O2: phi lowering, address-mode optimization, argument lowering,
//! instruction lowering, liveness + linear-scan register allocation, frame
//! generation, optional nop insertion. Om1 skips address-mode optimization
//! and the full allocator, using the post-lower local assignment instead.

use std::fmt;

use opal_ir::context::GlobalContext;
use opal_ir::function::{Function, RegWeight};
use opal_ir::phi;
use opal_regalloc::allocator::{allocate, AllocInput};
use opal_regalloc::Weight;

use crate::addropt;
use crate::emit;
use crate::frame::{self, FrameInfo};
use crate::inst::XInst;
use crate::isel::{Isel, LoweredBlock, NUM_NOP_VARIANTS};
use crate::opts::TargetOpts;
use crate::postlower;
use crate::reg::{
    get_register_set, registers_for_type, Reg, REG_SET_CALLEE_SAVE, REG_SET_CALLER_SAVE,
    REG_SET_NONE,
};

/// Driver mode: full optimization or minimal single-pass translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    O2,
    Om1,
}

/// A function-level translation failure. The driver reports it and moves on
/// to the next function; no assembly is produced for this one.
#[derive(Debug)]
pub struct CodegenError {
    pub function: String,
    pub message: String,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func @{}: {}", self.function, self.message)
    }
}

impl std::error::Error for CodegenError {}

/// A fully lowered function, ready for emission.
pub struct TranslatedFunction {
    pub lowered: Vec<LoweredBlock>,
    pub frame: FrameInfo,
}

fn check(func: &Function) -> Result<(), CodegenError> {
    match func.error() {
        Some(msg) => Err(CodegenError {
            function: func.name.clone(),
            message: msg.to_string(),
        }),
        None => Ok(()),
    }
}

/// Translate one function through the pipeline selected by `level`.
pub fn translate(
    func: &mut Function,
    ctx: &mut GlobalContext,
    opts: &TargetOpts,
    level: OptLevel,
) -> Result<TranslatedFunction, CodegenError> {
    // Lower phi instructions into copies.
    let map = phi::place_phi_loads(func);
    phi::place_phi_stores(func, &map);
    phi::delete_phis(func);
    check(func)?;

    // Address mode optimization.
    if level == OptLevel::O2 {
        addropt::do_address_opt(func, opts);
    }

    // Argument lowering and per-block instruction lowering.
    let (mut lowered, mut phys, is_ebp, needs_align) = {
        let mut isel = Isel::new(func, ctx, opts, level);
        isel.lower_arguments();
        isel.gen_code();
        (
            std::mem::take(&mut isel.lowered),
            std::mem::take(&mut isel.phys_regs),
            isel.is_ebp_based_frame,
            isel.needs_stack_alignment,
        )
    };
    check(func)?;

    match level {
        OptLevel::Om1 => {
            // Local register assignment for the infinite-weight
            // temporaries, one block at a time.
            for block in &lowered {
                postlower::post_lower_block(func, &block.insts, is_ebp);
            }
        }
        OptLevel::O2 => {
            run_register_allocation(func, &lowered, is_ebp);
        }
    }
    check(func)?;

    // Stack frame mapping.
    let frame_info = frame::gen_frame(func, &mut lowered, &mut phys, is_ebp, needs_align, opts);
    check(func)?;

    // Nop insertion.
    if let Some(p) = ctx.flags.nop_probability {
        do_nop_insertion(ctx, &mut lowered, p);
    }

    Ok(TranslatedFunction {
        lowered,
        frame: frame_info,
    })
}

/// Liveness analysis plus linear scan over the flattened stream, writing
/// the assignments back into the variables.
fn run_register_allocation(func: &mut Function, lowered: &[LoweredBlock], is_ebp: bool) {
    let flat: Vec<XInst> = lowered
        .iter()
        .flat_map(|b| b.insts.iter().cloned())
        .collect();
    let n = func.vars.len();
    let mut precolored = vec![None; n];
    let mut weight = vec![Weight::Finite; n];
    let mut candidates = vec![0u32; n];
    let exclude = if is_ebp {
        crate::reg::REG_SET_FRAME_POINTER
    } else {
        REG_SET_NONE
    };
    let allocatable = get_register_set(REG_SET_CALLER_SAVE | REG_SET_CALLEE_SAVE, exclude);
    for (i, var) in func.vars.iter().enumerate() {
        precolored[i] = var.reg_num.map(|r| r as u8);
        weight[i] = match var.weight {
            RegWeight::Zero => Weight::Zero,
            RegWeight::Finite => Weight::Finite,
            RegWeight::Infinite => Weight::Infinite,
        };
        candidates[i] = registers_for_type(var.ty) & allocatable;
    }
    let result = allocate(
        &flat,
        &AllocInput {
            precolored: &precolored,
            weight: &weight,
            candidates: &candidates,
            allocatable,
        },
    );
    for (i, assigned) in result.assignments.iter().enumerate() {
        if func.vars[i].reg_num.is_none() {
            if let Some(r) = assigned {
                func.vars[i].reg_num = Some(*r as u32);
            }
        }
    }
    // esp must never be handed out; it only appears pre-colored.
    debug_assert!(allocatable & (1 << Reg::Esp.num()) == 0);
}

/// Insert a random nop variant after instructions with the configured
/// probability.
fn do_nop_insertion(ctx: &mut GlobalContext, lowered: &mut [LoweredBlock], probability: f32) {
    for block in lowered.iter_mut() {
        let insts = std::mem::take(&mut block.insts);
        let mut out = Vec::with_capacity(insts.len());
        for inst in insts {
            let is_label = matches!(inst, XInst::Label { .. });
            out.push(inst);
            if !is_label && ctx.rng.next_f32() < probability {
                out.push(XInst::Nop {
                    variant: (ctx.rng.next_u32() % NUM_NOP_VARIANTS as u32) as u8,
                });
            }
        }
        block.insts = out;
    }
}

/// Translate with the O2 pipeline.
pub fn translate_o2(
    func: &mut Function,
    ctx: &mut GlobalContext,
    opts: &TargetOpts,
) -> Result<TranslatedFunction, CodegenError> {
    translate(func, ctx, opts, OptLevel::O2)
}

/// Translate with the Om1 pipeline.
pub fn translate_om1(
    func: &mut Function,
    ctx: &mut GlobalContext,
    opts: &TargetOpts,
) -> Result<TranslatedFunction, CodegenError> {
    translate(func, ctx, opts, OptLevel::Om1)
}

/// Translate and render a function as assembly text.
pub fn translate_and_emit(
    func: &mut Function,
    ctx: &mut GlobalContext,
    opts: &TargetOpts,
    level: OptLevel,
) -> Result<String, CodegenError> {
    let translated = translate(func, ctx, opts, level)?;
    Ok(emit::emit_function(
        func,
        &translated.lowered,
        &translated.frame,
        ctx,
    ))
}
