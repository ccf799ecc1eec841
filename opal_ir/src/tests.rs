//! Tests for the IR data structures and phi lowering.

use crate::builder::Builder;
use crate::function::Function;
use crate::instruction::{ArithOp, InstKind};
use crate::operand::{Constant, Operand};
use crate::phi;
use crate::types::{Type, ALL_TYPES};

#[test]
fn type_table_widths() {
    assert_eq!(Type::I1.byte_width(), 1);
    assert_eq!(Type::I32.byte_width(), 4);
    assert_eq!(Type::I64.byte_width(), 8);
    assert_eq!(Type::V4F32.byte_width(), 16);
    assert_eq!(Type::F64.align_bytes(), 8);
}

#[test]
fn type_table_elements() {
    assert_eq!(Type::V16I8.num_elements(), 16);
    assert_eq!(Type::V16I8.element_type(), Type::I8);
    assert_eq!(Type::V4I1.element_type(), Type::I1);
    assert_eq!(Type::I32.num_elements(), 1);
    for &ty in ALL_TYPES {
        if ty.is_vector() {
            assert_eq!(ty.byte_width(), 16, "{ty} must be 128-bit");
        }
    }
}

#[test]
fn use_counts() {
    let mut func = Function::new("f", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::I32, "a");
    let s = b.arith(
        ArithOp::Add,
        Type::I32,
        Operand::Var(a),
        Operand::Var(a),
    );
    b.ret(Some(Operand::Var(s)));

    let counts = func.compute_use_counts();
    assert_eq!(counts[a.index()], 2);
    assert_eq!(counts[s.index()], 1);
}

#[test]
fn phi_lowering_rewrites_to_copies() {
    let mut func = Function::new("p", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    let left = b.create_block("left");
    let right = b.create_block("right");
    let join = b.create_block("join");

    b.switch_to_block(entry);
    let c = b.add_arg(Type::I32, "c");
    b.br_if(Operand::Var(c), left, right);

    b.switch_to_block(left);
    b.br(join);
    b.switch_to_block(right);
    b.br(join);

    b.switch_to_block(join);
    let p = b.phi(
        Type::I32,
        vec![
            (Operand::Const(Constant::i32(1)), left),
            (Operand::Const(Constant::i32(2)), right),
        ],
    );
    b.ret(Some(Operand::Var(p)));

    let map = phi::place_phi_loads(&mut func);
    phi::place_phi_stores(&mut func, &map);
    phi::delete_phis(&mut func);

    // The phi is deleted; the join block starts with dest = temp.
    let join_insts = &func.blocks[join.index()].insts;
    assert!(join_insts
        .iter()
        .any(|i| matches!(i.kind, InstKind::Phi { .. }) && i.deleted));
    assert!(join_insts
        .iter()
        .any(|i| matches!(i.kind, InstKind::Assign { .. }) && i.dest == Some(p)));

    // Both predecessors store into the same temp before their branch.
    let temp = map[&p];
    for pred in [left, right] {
        let insts = &func.blocks[pred.index()].insts;
        let store_at = insts
            .iter()
            .position(|i| i.dest == Some(temp))
            .expect("phi store placed");
        let br_at = insts
            .iter()
            .position(|i| matches!(i.kind, InstKind::Br { .. }))
            .unwrap();
        assert!(store_at < br_at, "store must precede the terminator");
    }
}
