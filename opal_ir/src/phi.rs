//! Phi lowering: rewrite SSA phis into copies through dedicated temporaries.
//!
//! Three passes, run in order by the backend drivers:
//! 1. `place_phi_loads` inserts `dest = temp` copies in the phi's block,
//! 2. `place_phi_stores` inserts `temp = operand` copies at the bottom of
//!    each predecessor, before its terminator,
//! 3. `delete_phis` marks the phi instructions deleted.
//!
//! The temporaries have multi-block lifetime by construction.

use std::collections::HashMap;

use crate::function::Function;
use crate::instruction::{Inst, InstKind};
use crate::operand::Operand;
use crate::value::{BlockRef, VarRef};

/// Map from a phi's destination to the temporary that carries its value.
pub type PhiMap = HashMap<VarRef, VarRef>;

/// Insert, after the phis of each block, one `dest = temp` assignment per
/// phi. Returns the phi-to-temporary map used by `place_phi_stores`.
pub fn place_phi_loads(func: &mut Function) -> PhiMap {
    let mut map = PhiMap::new();
    for bi in 0..func.blocks.len() {
        let mut loads = Vec::new();
        for inst in &func.blocks[bi].insts {
            if inst.deleted {
                continue;
            }
            if let InstKind::Phi { .. } = inst.kind {
                let dest = inst.dest.expect("phi without dest");
                loads.push(dest);
            }
        }
        let mut assigns = Vec::new();
        for dest in loads {
            let ty = func.var(dest).ty;
            let name = format!("{}_phi", func.var(dest).name);
            let temp = func.make_variable(ty, None, name);
            map.insert(dest, temp);
            assigns.push(Inst::new(
                InstKind::Assign {
                    src: Operand::Var(temp),
                },
                Some(dest),
            ));
        }
        // Place the loads right after the phi group at the block top.
        let bb = &mut func.blocks[bi];
        let at = bb
            .insts
            .iter()
            .position(|i| !matches!(i.kind, InstKind::Phi { .. }))
            .unwrap_or(bb.insts.len());
        for (k, a) in assigns.into_iter().enumerate() {
            bb.insts.insert(at + k, a);
        }
    }
    map
}

/// Insert `temp = operand` assignments in each predecessor named by a phi,
/// immediately before the predecessor's terminator.
pub fn place_phi_stores(func: &mut Function, map: &PhiMap) {
    // Collect (pred, temp, operand) triples first; then insert per block.
    let mut stores: Vec<(BlockRef, VarRef, Operand)> = Vec::new();
    for bb in &func.blocks {
        for inst in bb.insts.iter().filter(|i| !i.deleted) {
            if let InstKind::Phi { args } = &inst.kind {
                let dest = inst.dest.expect("phi without dest");
                let temp = map[&dest];
                for (op, pred) in args {
                    stores.push((*pred, temp, op.clone()));
                }
            }
        }
    }
    for (pred, temp, op) in stores {
        let bb = &mut func.blocks[pred.index()];
        let at = bb.insts.iter().rposition(|i| !i.deleted).unwrap_or(0);
        bb.insts
            .insert(at, Inst::new(InstKind::Assign { src: op }, Some(temp)));
    }
}

/// Mark every phi instruction deleted.
pub fn delete_phis(func: &mut Function) {
    for bb in &mut func.blocks {
        for inst in &mut bb.insts {
            if matches!(inst.kind, InstKind::Phi { .. }) {
                inst.deleted = true;
            }
        }
    }
}
