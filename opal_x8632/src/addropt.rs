//! Address-mode optimization: fold add/shl/mul chains feeding a load or
//! store address into an x86 memory operand (base + index<<shift + offset).
//!
//! The walk follows SSA def chains backward through the current function.
//! Folding stops as soon as nothing more matches or a multi-block lifetime
//! would be extended. A folded load/store is replaced by a fresh one whose
//! address is the memory operand; the original is marked deleted, so a
//! second pass over the result finds nothing more to do.

use std::collections::HashMap;

use opal_ir::function::Function;
use opal_ir::instruction::{ArithOp, Inst, InstKind};
use opal_ir::operand::{Constant, MemOperand, Operand, SegmentReg};
use opal_ir::value::VarRef;

use crate::opts::TargetOpts;

/// Def map: variable to the instruction kind that defines it.
fn build_defs(func: &Function) -> HashMap<VarRef, InstKind> {
    let mut defs = HashMap::new();
    for bb in &func.blocks {
        for inst in bb.insts.iter().filter(|i| !i.deleted) {
            if let Some(d) = inst.dest {
                defs.insert(d, inst.kind.clone());
            }
        }
    }
    defs
}

fn single_block(func: &Function, v: VarRef) -> bool {
    !func.var(v).is_multiblock_life()
}

fn log2_scale(mult: i64) -> Option<u8> {
    match mult {
        1 => Some(0),
        2 => Some(1),
        4 => Some(2),
        8 => Some(3),
        _ => None,
    }
}

struct FoldState {
    base: Option<VarRef>,
    index: Option<VarRef>,
    shift: u8,
    offset: i32,
}

fn dump_fold(opts: &TargetOpts, state: &FoldState, what: &str) {
    if opts.verbose_addropt {
        log::debug!(
            target: "opal::addropt",
            "{what}: base={:?} index={:?} shift={} offset={}",
            state.base,
            state.index,
            state.shift,
            state.offset
        );
    }
}

fn compute_address_opt(
    func: &Function,
    defs: &HashMap<VarRef, InstKind>,
    opts: &TargetOpts,
    state: &mut FoldState,
) {
    let Some(start) = state.base else { return };
    if func.var(start).is_multiblock_life() {
        return;
    }
    loop {
        // Base is Base=Var ==> Base=Var
        let base = state.base.unwrap();
        let base_def = defs.get(&base);
        if let Some(InstKind::Assign {
            src: Operand::Var(v),
        }) = base_def
        {
            if single_block(func, *v) {
                state.base = Some(*v);
                dump_fold(opts, state, "assign");
                continue;
            }
        }

        // Index==None && Base=Var1+Var2 ==> Base=Var1, Index=Var2, Shift=0
        if state.index.is_none() {
            if let Some(InstKind::Arith {
                op: ArithOp::Add,
                a: Operand::Var(v1),
                b: Operand::Var(v2),
            }) = base_def
            {
                if single_block(func, *v1) && single_block(func, *v2) {
                    state.base = Some(*v1);
                    state.index = Some(*v2);
                    state.shift = 0;
                    dump_fold(opts, state, "base+index");
                    continue;
                }
            }
        }

        // Index=Var*Const, log2(Const)+Shift<=3 ==> Index=Var, Shift+=log2
        if let Some(ix) = state.index {
            if let Some(InstKind::Arith {
                op: ArithOp::Mul,
                a: Operand::Var(v),
                b: Operand::Const(Constant::Int { value, .. }),
            }) = defs.get(&ix)
            {
                if let Some(log_mult) = log2_scale(*value) {
                    if single_block(func, *v) && state.shift + log_mult <= 3 {
                        state.index = Some(*v);
                        state.shift += log_mult;
                        dump_fold(opts, state, "index*scale");
                        continue;
                    }
                }
            }
        }

        // Base=Var+Const | Const+Var ==> Base=Var, Offset+=Const
        // Base=Var-Const            ==> Base=Var, Offset-=Const
        if let Some(InstKind::Arith { op, a, b }) = base_def {
            if matches!(op, ArithOp::Add | ArithOp::Sub) {
                let is_add = *op == ArithOp::Add;
                let (var, konst) = match (a, b) {
                    (Operand::Var(v), Operand::Const(Constant::Int { value, .. })) => {
                        (Some(*v), Some(*value))
                    }
                    (Operand::Const(Constant::Int { value, .. }), Operand::Var(v)) if is_add => {
                        (Some(*v), Some(*value))
                    }
                    _ => (None, None),
                };
                if let (Some(var), Some(konst)) = (var, konst) {
                    if single_block(func, var) {
                        state.base = Some(var);
                        state.offset = if is_add {
                            state.offset.wrapping_add(konst as i32)
                        } else {
                            state.offset.wrapping_sub(konst as i32)
                        };
                        dump_fold(opts, state, "base+offset");
                        continue;
                    }
                }
            }
        }

        break;
    }
}

/// Run the optimization over every load and store of the function.
pub fn do_address_opt(func: &mut Function, opts: &TargetOpts) {
    let defs = build_defs(func);
    for bi in 0..func.blocks.len() {
        let mut i = 0;
        while i < func.blocks[bi].insts.len() {
            let inst = &func.blocks[bi].insts[i];
            if inst.deleted {
                i += 1;
                continue;
            }
            let (addr, ty, rebuild): (Operand, _, fn(Operand, &Inst) -> Inst) =
                match &inst.kind {
                    InstKind::Load { addr } => {
                        let f: fn(Operand, &Inst) -> Inst =
                            |addr, old| Inst::new(InstKind::Load { addr }, old.dest);
                        (addr.clone(), func.var(inst.dest.unwrap()).ty, f)
                    }
                    InstKind::Store { value, addr } => {
                        let ty = value.ty(func);
                        let addr = addr.clone();
                        let f: fn(Operand, &Inst) -> Inst = |addr, old| {
                            let InstKind::Store { value, .. } = &old.kind else {
                                unreachable!()
                            };
                            Inst::new(
                                InstKind::Store {
                                    value: value.clone(),
                                    addr,
                                },
                                None,
                            )
                        };
                        (addr, ty, f)
                    }
                    _ => {
                        i += 1;
                        continue;
                    }
                };
            let Some(base) = addr.as_var() else {
                i += 1;
                continue;
            };
            let mut state = FoldState {
                base: Some(base),
                index: None,
                shift: 0,
                offset: 0,
            };
            compute_address_opt(func, &defs, opts, &mut state);
            if state.base.is_some() && state.base != Some(base) {
                let mem = MemOperand {
                    ty,
                    base: state.base,
                    index: state.index,
                    shift: state.shift,
                    offset: Some(Constant::i32(state.offset as i64)),
                    seg: SegmentReg::Default,
                };
                let old = func.blocks[bi].insts[i].clone();
                let new_inst = rebuild(Operand::Mem(mem), &old);
                func.blocks[bi].insts[i].deleted = true;
                func.blocks[bi].insts.insert(i + 1, new_inst);
                i += 1;
            }
            i += 1;
        }
    }
}
