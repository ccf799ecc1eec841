//! Tests for liveness analysis and the linear-scan allocator.

use crate::allocator::{allocate, AllocInput};
use crate::liveness::compute_live_ranges;
use crate::{AllocInst, OpKind, RegOp, Weight};

/// A minimal instruction for exercising the allocator.
enum MockInst {
    Def(u32),
    Use(u32),
    UseDef { def: u32, along: u32 },
    Label(u32),
    Jmp(u32),
    Jcc(u32),
    Call { clobbers: Vec<u8> },
    Ret,
}

impl AllocInst for MockInst {
    fn reg_operands(&self, ops: &mut Vec<RegOp>) {
        match self {
            MockInst::Def(v) => ops.push(RegOp {
                var: *v,
                kind: OpKind::Def,
            }),
            MockInst::Use(v) => ops.push(RegOp {
                var: *v,
                kind: OpKind::Use,
            }),
            MockInst::UseDef { def, along } => {
                ops.push(RegOp {
                    var: *def,
                    kind: OpKind::UseDef,
                });
                ops.push(RegOp {
                    var: *along,
                    kind: OpKind::Use,
                });
            }
            _ => {}
        }
    }

    fn label_id(&self) -> Option<u32> {
        match self {
            MockInst::Label(id) => Some(*id),
            _ => None,
        }
    }

    fn branch_targets(&self, targets: &mut Vec<u32>) {
        match self {
            MockInst::Jmp(t) | MockInst::Jcc(t) => targets.push(*t),
            _ => {}
        }
    }

    fn clobbers(&self, clobbers: &mut Vec<u8>) {
        if let MockInst::Call { clobbers: c } = self {
            clobbers.extend_from_slice(c);
        }
    }

    fn is_terminator(&self) -> bool {
        matches!(self, MockInst::Jmp(_) | MockInst::Jcc(_) | MockInst::Ret)
    }

    fn falls_through(&self) -> bool {
        !matches!(self, MockInst::Jmp(_) | MockInst::Ret)
    }
}

#[test]
fn straight_line_ranges() {
    let insts = vec![
        MockInst::Def(0),
        MockInst::Def(1),
        MockInst::UseDef { def: 1, along: 0 },
        MockInst::Use(1),
        MockInst::Ret,
    ];
    let ranges = compute_live_ranges(&insts, 2);
    assert_eq!(ranges.len(), 2);
    let r0 = ranges.iter().find(|r| r.var == 0).unwrap();
    let r1 = ranges.iter().find(|r| r.var == 1).unwrap();
    assert_eq!((r0.start, r0.end), (0, 3));
    assert_eq!((r1.start, r1.end), (1, 4));
}

#[test]
fn loop_extends_range_across_backedge() {
    // v0 defined before the loop and used inside it must be live through
    // the whole loop body.
    let insts = vec![
        MockInst::Def(0),
        MockInst::Label(0),
        MockInst::Use(0),
        MockInst::Def(1),
        MockInst::Use(1),
        MockInst::Jcc(0),
        MockInst::Ret,
    ];
    let ranges = compute_live_ranges(&insts, 2);
    let r0 = ranges.iter().find(|r| r.var == 0).unwrap();
    assert!(r0.end >= 6, "v0 must stay live across the backedge");
}

#[test]
fn disjoint_ranges_share_a_register() {
    let insts = vec![
        MockInst::Def(0),
        MockInst::Use(0),
        MockInst::Def(1),
        MockInst::Use(1),
        MockInst::Ret,
    ];
    let input = AllocInput {
        precolored: &[None, None],
        weight: &[Weight::Finite, Weight::Finite],
        candidates: &[0b1, 0b1],
        allocatable: 0b1,
    };
    let result = allocate(&insts, &input);
    assert_eq!(result.assignments, vec![Some(0), Some(0)]);
}

#[test]
fn precolored_evicts_occupant() {
    // v0 grabs r0 first; v1 is pre-colored to r0 and overlaps, so v0 must
    // move to r1.
    let insts = vec![
        MockInst::Def(0),
        MockInst::Def(1),
        MockInst::Use(1),
        MockInst::Use(0),
        MockInst::Ret,
    ];
    let input = AllocInput {
        precolored: &[None, Some(0)],
        weight: &[Weight::Finite, Weight::Finite],
        candidates: &[0b11, 0b11],
        allocatable: 0b11,
    };
    let result = allocate(&insts, &input);
    assert_eq!(result.assignments[1], Some(0));
    assert_eq!(result.assignments[0], Some(1));
}

#[test]
fn clobber_excludes_caller_save_across_call() {
    // v0 lives across the call; register 0 is clobbered there, so v0 must
    // land in register 1.
    let insts = vec![
        MockInst::Def(0),
        MockInst::Call { clobbers: vec![0] },
        MockInst::Use(0),
        MockInst::Ret,
    ];
    let input = AllocInput {
        precolored: &[None],
        weight: &[Weight::Finite],
        candidates: &[0b11],
        allocatable: 0b11,
    };
    let result = allocate(&insts, &input);
    assert_eq!(result.assignments[0], Some(1));
}

#[test]
fn zero_weight_is_never_assigned() {
    let insts = vec![MockInst::Def(0), MockInst::Use(0), MockInst::Ret];
    let input = AllocInput {
        precolored: &[None],
        weight: &[Weight::Zero],
        candidates: &[0b1],
        allocatable: 0b1,
    };
    let result = allocate(&insts, &input);
    assert_eq!(result.assignments[0], None);
}

#[test]
fn infinite_weight_evicts_finite() {
    // One register, two overlapping intervals: the infinite-weight one wins.
    let insts = vec![
        MockInst::Def(0),
        MockInst::Def(1),
        MockInst::Use(1),
        MockInst::Use(0),
        MockInst::Ret,
    ];
    let input = AllocInput {
        precolored: &[None, None],
        weight: &[Weight::Finite, Weight::Infinite],
        candidates: &[0b1, 0b1],
        allocatable: 0b1,
    };
    let result = allocate(&insts, &input);
    assert_eq!(result.assignments[1], Some(0));
    assert_eq!(result.assignments[0], None, "finite interval is spilled");
}
