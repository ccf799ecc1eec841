//! Tests for the register/type tables, legalization, 64-bit splitting, and
//! the Om1 post-lower assignment.

use opal_ir::builder::Builder;
use opal_ir::context::{Flags, GlobalContext};
use opal_ir::function::{Function, RegWeight};
use opal_ir::instruction::{FcmpCond, IcmpCond};
use opal_ir::operand::{Constant, MemOperand, Operand};
use opal_ir::types::{Type, ALL_TYPES};
use opal_ir::value::VarRef;

use crate::backend::OptLevel;
use crate::inst::{BrCond, XInst};
use crate::isel::{fcmp_table, icmp64_mapping, Isel, LEGAL_ALL, LEGAL_IMM, LEGAL_MEM, LEGAL_REG};
use crate::opts::TargetOpts;
use crate::postlower::post_lower_block;
use crate::reg::{
    self, get_register_set, registers_for_type, Reg, REG_SET_CALLEE_SAVE, REG_SET_CALLER_SAVE,
    REG_SET_NONE, REG_SET_STACK_POINTER,
};
use crate::types::{in_vector_element_type, width_on_stack};

#[test]
fn register_names_at_each_width() {
    assert_eq!(reg::reg_name(Reg::Eax.num(), Type::I32), "eax");
    assert_eq!(reg::reg_name(Reg::Eax.num(), Type::I16), "ax");
    assert_eq!(reg::reg_name(Reg::Eax.num(), Type::I8), "al");
    assert_eq!(reg::reg_name(Reg::Ecx.num(), Type::I8), "cl");
    assert_eq!(reg::reg_name(Reg::Xmm3.num(), Type::V4F32), "xmm3");
}

#[test]
fn register_classes() {
    // Only the four i8-addressable registers may hold i8 values.
    let i8_class = registers_for_type(Type::I8);
    assert!(i8_class & (1 << Reg::Eax.num()) != 0);
    assert!(i8_class & (1 << Reg::Esi.num()) == 0);
    // esp and ebp never appear in an allocatable type class.
    for &ty in ALL_TYPES {
        let class = registers_for_type(ty);
        assert!(class & (1 << Reg::Esp.num()) == 0, "{ty}");
        assert!(class & (1 << Reg::Ebp.num()) == 0, "{ty}");
    }
    // FP and vector values share the xmm class.
    assert_eq!(registers_for_type(Type::F32), registers_for_type(Type::V4I32));
}

#[test]
fn register_sets() {
    let all = get_register_set(
        REG_SET_CALLER_SAVE | REG_SET_CALLEE_SAVE,
        REG_SET_NONE,
    );
    assert!(all & (1 << Reg::Esp.num()) == 0);
    let no_stack = get_register_set(crate::reg::REG_SET_ALL, REG_SET_STACK_POINTER);
    assert!(no_stack & (1 << Reg::Esp.num()) == 0);
    assert!(no_stack & (1 << Reg::Ebp.num()) != 0);
}

#[test]
fn x86_type_attributes_agree_with_type_table() {
    for &ty in ALL_TYPES {
        if !ty.is_vector() {
            continue;
        }
        let elem = in_vector_element_type(ty);
        // Every vector fills the full 128-bit register.
        assert_eq!(
            elem.byte_width() * ty.num_elements(),
            16,
            "in-vector lanes of {ty} must cover the register"
        );
    }
    assert_eq!(in_vector_element_type(Type::V4I1), Type::I32);
    assert_eq!(in_vector_element_type(Type::V8I1), Type::I16);
    assert_eq!(in_vector_element_type(Type::V16I1), Type::I8);
}

#[test]
fn stack_slot_widths() {
    assert_eq!(width_on_stack(Type::I8), 4);
    assert_eq!(width_on_stack(Type::I32), 4);
    assert_eq!(width_on_stack(Type::F64), 8);
    assert_eq!(width_on_stack(Type::V16I8), 16);
}

fn test_isel_env() -> (Function, GlobalContext, TargetOpts) {
    let mut func = Function::new("t", Type::Void);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    (func, GlobalContext::new(Flags::default()), TargetOpts::default())
}

#[test]
fn split64_is_idempotent() {
    let (mut func, mut ctx, opts) = test_isel_env();
    let v = func.make_variable(Type::I64, None, "x");
    let mut isel = Isel::new(&mut func, &mut ctx, &opts, OptLevel::O2);
    isel.split64(v);
    let (lo1, hi1) = {
        let var = isel.func.var(v);
        (var.lo.unwrap(), var.hi.unwrap())
    };
    isel.split64(v);
    let (lo2, hi2) = {
        let var = isel.func.var(v);
        (var.lo.unwrap(), var.hi.unwrap())
    };
    assert_eq!((lo1, hi1), (lo2, hi2));
    assert_eq!(isel.func.var(lo1).ty, Type::I32);
    assert_eq!(isel.func.var(hi1).ty, Type::I32);
    assert!(isel.func.var(v).reg_num.is_none());
}

#[test]
fn lo_hi_of_integer_constants() {
    let (mut func, mut ctx, opts) = test_isel_env();
    let mut isel = Isel::new(&mut func, &mut ctx, &opts, OptLevel::O2);
    let c = Operand::Const(Constant::Int {
        ty: Type::I64,
        value: 0x1_2345_6789,
    });
    assert_eq!(isel.lo_operand(&c).as_const_int(), Some(0x2345_6789));
    assert_eq!(isel.hi_operand(&c).as_const_int(), Some(1));
    // Negative values keep their bit pattern.
    let m1 = Operand::Const(Constant::Int {
        ty: Type::I64,
        value: -1,
    });
    assert_eq!(isel.lo_operand(&m1).as_const_int(), Some(0xffff_ffff));
    assert_eq!(isel.hi_operand(&m1).as_const_int(), Some(0xffff_ffff));
}

#[test]
fn hi_of_memory_adds_four() {
    let (mut func, mut ctx, opts) = test_isel_env();
    let base = func.make_variable(Type::I32, None, "p");
    let mut isel = Isel::new(&mut func, &mut ctx, &opts, OptLevel::O2);
    let mem = Operand::Mem(MemOperand::new(Type::I64, Some(base), None));
    let hi = isel.hi_operand(&mem);
    let Operand::Mem(m) = hi else { panic!("expected memory") };
    assert_eq!(m.ty, Type::I32);
    assert_eq!(m.offset, Some(Constant::i32(4)));
}

#[test]
fn legalize_is_idempotent() {
    let (mut func, mut ctx, opts) = test_isel_env();
    let v = func.make_variable(Type::I32, None, "a");
    let mut isel = Isel::new(&mut func, &mut ctx, &opts, OptLevel::O2);

    // Forms already admissible come back unchanged, emitting nothing.
    let cases = vec![
        (Operand::Const(Constant::i32(7)), LEGAL_REG | LEGAL_IMM),
        (Operand::Var(v), LEGAL_REG | LEGAL_MEM),
        (Operand::Const(Constant::Float(1.5)), LEGAL_REG | LEGAL_MEM),
    ];
    for (op, mask) in cases {
        let once = isel.legalize(op, mask, None);
        let count = isel.current_output().len();
        let twice = isel.legalize(once.clone(), mask, None);
        assert_eq!(once, twice);
        assert_eq!(isel.current_output().len(), count, "no extra moves");
    }

    // A copied operand is register-guaranteed, so a second pass is a no-op.
    let first = isel.legalize(Operand::Const(Constant::i32(9)), LEGAL_REG, None);
    let count = isel.current_output().len();
    let second = isel.legalize(first.clone(), LEGAL_REG, None);
    assert_eq!(first, second);
    assert_eq!(isel.current_output().len(), count);
}

#[test]
fn legalize_undef_becomes_zero() {
    let (mut func, mut ctx, opts) = test_isel_env();
    let mut isel = Isel::new(&mut func, &mut ctx, &opts, OptLevel::O2);
    let z = isel.legalize(
        Operand::Const(Constant::Undef(Type::I32)),
        LEGAL_ALL,
        None,
    );
    assert_eq!(z.as_const_int(), Some(0));
    // Vector undef materializes as a pxor-zeroed register.
    let vz = isel.legalize(
        Operand::Const(Constant::Undef(Type::V4I32)),
        LEGAL_ALL,
        None,
    );
    assert!(vz.as_var().is_some());
    assert!(isel
        .current_output()
        .iter()
        .any(|i| matches!(i, XInst::Pxor { .. })));
}

#[test]
fn fcmp_table_shape() {
    let oeq = fcmp_table(FcmpCond::False);
    assert_eq!(oeq.default, 0);
    assert!(oeq.c1.is_none());
    let oeq = fcmp_table(FcmpCond::Oeq);
    assert_eq!(oeq.default, 0);
    assert_eq!(oeq.c1, Some(BrCond::Ne));
    assert_eq!(oeq.c2, Some(BrCond::P));
    let olt = fcmp_table(FcmpCond::Olt);
    assert!(olt.swap_scalar_operands);
    assert_eq!(olt.c1, Some(BrCond::A));
    // One/Ueq need the combined cmpps sequences.
    assert!(fcmp_table(FcmpCond::One).cmpps.is_none());
    assert!(fcmp_table(FcmpCond::Ueq).cmpps.is_none());
    let t = fcmp_table(FcmpCond::True);
    assert_eq!(t.default, 1);
    assert!(t.c1.is_none());
}

#[test]
fn icmp64_table_shape() {
    assert_eq!(
        icmp64_mapping(IcmpCond::Sge),
        (BrCond::G, BrCond::L, BrCond::Ae)
    );
    assert_eq!(
        icmp64_mapping(IcmpCond::Ult),
        (BrCond::B, BrCond::A, BrCond::B)
    );
}

#[test]
fn post_lower_colors_infinite_temporaries() {
    let mut func = Function::new("p", Type::Void);
    let t0 = func.make_variable(Type::I32, None, "t0");
    func.var_mut(t0).weight = RegWeight::Infinite;
    let t1 = func.make_variable(Type::I32, None, "t1");
    func.var_mut(t1).weight = RegWeight::Infinite;
    let pinned = func.make_variable(Type::I32, None, "pin");
    func.var_mut(pinned).reg_num = Some(Reg::Eax.num());

    let insts = vec![
        XInst::Mov {
            dst: t0,
            src: Operand::Const(Constant::i32(1)),
        },
        XInst::Add {
            dst: t0,
            src: Operand::Var(pinned),
        },
        XInst::Mov {
            dst: t1,
            src: Operand::Var(t0),
        },
        XInst::Ret { src: None },
    ];
    post_lower_block(&mut func, &insts, false);

    let r0 = func.var(t0).reg_num.expect("t0 colored");
    let r1 = func.var(t1).reg_num.expect("t1 colored");
    // eax is black-listed by the pre-colored use.
    assert_ne!(r0, Reg::Eax.num());
    assert_ne!(r1, Reg::Eax.num());
    // t0's last use is the move into t1, so its register may be reused
    // afterwards but not by t1 itself at that instruction.
    assert!(registers_for_type(Type::I32) & (1 << r0) != 0);
    assert!(registers_for_type(Type::I32) & (1 << r1) != 0);
}

#[test]
fn post_lower_recycles_after_last_use() {
    let mut func = Function::new("p", Type::Void);
    let mk = |func: &mut Function, name: &str| -> VarRef {
        let v = func.make_variable(Type::I32, None, name);
        func.var_mut(v).weight = RegWeight::Infinite;
        v
    };
    let a = mk(&mut func, "a");
    let b = mk(&mut func, "b");
    let insts = vec![
        XInst::Mov {
            dst: a,
            src: Operand::Const(Constant::i32(1)),
        },
        // Last use of a.
        XInst::Cmp {
            a: Operand::Var(a),
            b: Operand::Const(Constant::i32(0)),
        },
        XInst::Mov {
            dst: b,
            src: Operand::Const(Constant::i32(2)),
        },
    ];
    post_lower_block(&mut func, &insts, false);
    // b may reuse a's register, and both must be valid i32 registers.
    assert_eq!(func.var(a).reg_num, func.var(b).reg_num);
}
