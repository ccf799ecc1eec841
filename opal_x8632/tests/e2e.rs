//! End-to-end scenarios: IR in, assembly text out, asserting the shapes the
//! lowering is supposed to produce.

use opal_ir::builder::Builder;
use opal_ir::context::{Flags, GlobalContext};
use opal_ir::function::Function;
use opal_ir::instruction::{ArithOp, IcmpCond, Intrinsic};
use opal_ir::operand::{Constant, Operand};
use opal_ir::types::Type;
use opal_x8632::backend::{translate_and_emit, OptLevel};
use opal_x8632::opts::{InstructionSet, TargetOpts};

fn compile(func: &mut Function, opts: &TargetOpts, level: OptLevel) -> String {
    let mut ctx = GlobalContext::new(Flags::default());
    translate_and_emit(func, &mut ctx, opts, level).expect("translation should succeed")
}

fn compile_o2(func: &mut Function) -> String {
    compile(func, &TargetOpts::default(), OptLevel::O2)
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

fn const_i32(v: i64) -> Operand {
    Operand::Const(Constant::i32(v))
}

fn const_i64(v: i64) -> Operand {
    Operand::Const(Constant::Int {
        ty: Type::I64,
        value: v,
    })
}

// define i32 @f(i32 %a, i32 %b) { %c = add i32 %a, %b; ret i32 %c }
fn build_add() -> Function {
    let mut func = Function::new("f", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::I32, "a");
    let bb = b.add_arg(Type::I32, "b");
    let c = b.arith(ArithOp::Add, Type::I32, a.into(), bb.into());
    b.ret(Some(c.into()));
    func
}

#[test]
fn scalar_add_has_lean_frame() {
    let mut func = build_add();
    let asm = compile_o2(&mut func);
    assert!(asm.contains("\tadd\t"), "expected an add:\n{asm}");
    assert!(asm.contains("eax"), "result must come back in eax:\n{asm}");
    assert_eq!(count(&asm, "\tret"), 1, "exactly one ret:\n{asm}");
    // No callee saves and no spill area for this leaf function.
    assert!(!asm.contains("push"), "no callee-save pushes:\n{asm}");
    assert!(!asm.contains("sub\tesp"), "no esp adjustment:\n{asm}");
}

#[test]
fn scalar_add_om1_spills_locals() {
    let mut func = build_add();
    let asm = compile(&mut func, &TargetOpts::default(), OptLevel::Om1);
    // Without the allocator, the result variable lives on the stack.
    assert!(asm.contains("dword ptr"), "expected stack traffic:\n{asm}");
    assert_eq!(count(&asm, "\tret"), 1);
}

// define i64 @g(i64 %x) { %y = shl i64 %x, 33; ret i64 %y }
#[test]
fn i64_shift_uses_double_shift_and_bit5_test() {
    let mut func = Function::new("g", Type::I64);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let x = b.add_arg(Type::I64, "x");
    let y = b.arith(ArithOp::Shl, Type::I64, x.into(), const_i64(33));
    b.ret(Some(y.into()));
    let asm = compile_o2(&mut func);

    assert!(asm.contains("\tshld\t"), "expected shld:\n{asm}");
    assert!(asm.contains("\tshl\t"), "expected shl of the low half:\n{asm}");
    assert!(asm.contains("\ttest\t"), "expected the bit-5 test:\n{asm}");
    assert!(asm.contains(", 32"), "test mask is 0x20:\n{asm}");
    assert!(asm.contains("$local$"), "an in-block label is required:\n{asm}");
    assert!(asm.contains("eax") && asm.contains("edx"), "i64 returns in edx:eax:\n{asm}");
    assert_eq!(count(&asm, "\tret"), 1);
}

// %r = atomic cmpxchg i32 (%p, %e, %d, seq_cst, seq_cst)
#[test]
fn atomic_cmpxchg_pins_eax() {
    let mut func = Function::new("h", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let p = b.add_arg(Type::I32, "p");
    let e = b.add_arg(Type::I32, "e");
    let d = b.add_arg(Type::I32, "d");
    let r = b
        .intrinsic(
            Intrinsic::AtomicCmpxchg,
            Type::I32,
            vec![p.into(), e.into(), d.into(), const_i32(6), const_i32(6)],
        )
        .unwrap();
    b.ret(Some(r.into()));
    let asm = compile_o2(&mut func);

    assert!(
        asm.contains("lock cmpxchg\tdword ptr ["),
        "expected a locked cmpxchg:\n{asm}"
    );
    assert!(asm.contains("mov\teax"), "expected value staged in eax:\n{asm}");
    assert_eq!(count(&asm, "\tret"), 1);
}

// define <4 x i32> @v(<4 x i32> %a, <4 x i32> %b) { %c = mul ...; ret %c }
fn build_v4i32_mul() -> Function {
    let mut func = Function::new("v", Type::V4I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::V4I32, "a");
    let bb = b.add_arg(Type::V4I32, "b");
    let c = b.arith(ArithOp::Mul, Type::V4I32, a.into(), bb.into());
    b.ret(Some(c.into()));
    func
}

#[test]
fn v4i32_mul_sse2_expands() {
    let mut func = build_v4i32_mul();
    let asm = compile_o2(&mut func);
    assert_eq!(count(&asm, "\tpmuludq\t"), 2, "{asm}");
    assert_eq!(count(&asm, "\tpshufd\t"), 3, "{asm}");
    assert_eq!(count(&asm, "\tshufps\t"), 1, "{asm}");
    assert!(!asm.contains("pmulld"), "{asm}");
}

#[test]
fn v4i32_mul_sse41_is_single_pmulld() {
    let mut func = build_v4i32_mul();
    let opts = TargetOpts {
        instruction_set: InstructionSet::Sse41,
        ..TargetOpts::default()
    };
    let asm = compile(&mut func, &opts, OptLevel::O2);
    assert_eq!(count(&asm, "\tpmulld\t"), 1, "{asm}");
    assert!(!asm.contains("pmuludq"), "{asm}");
}

// %b = icmp eq i32 %a, 7; br i1 %b, label %T, label %F
#[test]
fn icmp_branch_fuses_into_cmp_jcc() {
    let mut func = Function::new("k", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    let t = b.create_block("T");
    let f = b.create_block("F");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::I32, "a");
    let cond = b.icmp(IcmpCond::Eq, a.into(), const_i32(7));
    b.br_if(cond.into(), t, f);
    b.switch_to_block(t);
    b.ret(Some(const_i32(1)));
    b.switch_to_block(f);
    b.ret(Some(const_i32(0)));
    let asm = compile_o2(&mut func);

    assert_eq!(count(&asm, "\tcmp\t"), 1, "{asm}");
    assert!(asm.contains(", 7"), "{asm}");
    assert!(asm.contains("\tje\t"), "fused branch must be je:\n{asm}");
    assert!(asm.contains("$T"), "{asm}");
    assert!(asm.contains("\tjmp\t"), "{asm}");
    // No boolean materialization: the fused form needs no in-block label.
    assert!(!asm.contains("$local$"), "{asm}");
}

// %p = alloca i8, i32 %n, align 32; call void @use(i8* %p)
#[test]
fn alloca_forces_frame_pointer_and_realignment() {
    let mut func = Function::new("a", Type::Void);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let n = b.add_arg(Type::I32, "n");
    let p = b.alloca(n.into(), 32);
    let _ = b.call(
        Type::Void,
        Operand::Const(Constant::Reloc {
            name: "use".to_string(),
            offset: 0,
        }),
        vec![p.into()],
    );
    b.ret(None);
    let asm = compile_o2(&mut func);

    assert!(asm.contains("push\tebp"), "{asm}");
    assert!(asm.contains("mov\tebp, esp"), "{asm}");
    assert!(asm.contains("and\tesp, -32"), "esp realigned to 32:\n{asm}");
    // Runtime size rounding: T = (n+31) & -32.
    assert!(asm.contains(", 31"), "{asm}");
    assert_eq!(count(&asm, ", -32"), 2, "size mask and esp mask:\n{asm}");
    assert!(asm.contains("sub\tesp"), "{asm}");
    assert!(asm.contains("call\tuse"), "{asm}");
    // Epilog restores through ebp.
    assert!(asm.contains("mov\tesp, ebp"), "{asm}");
    assert!(asm.contains("pop\tebp"), "{asm}");
    assert_eq!(count(&asm, "\tret"), 1);
}

// Boundary behaviors.

#[test]
fn cttz_and_ctlz_use_bsf_bsr_with_cmov() {
    let mut func = Function::new("tz", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::I32, "a");
    let r = b
        .intrinsic(Intrinsic::Cttz, Type::I32, vec![a.into(), const_i32(0)])
        .unwrap();
    b.ret(Some(r.into()));
    let asm = compile_o2(&mut func);
    assert!(asm.contains("\tbsf\t"), "{asm}");
    assert!(asm.contains("\tcmovne\t"), "{asm}");
    assert!(asm.contains(", 32"), "cttz(0) = 32:\n{asm}");

    let mut func = Function::new("lz", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::I32, "a");
    let r = b
        .intrinsic(Intrinsic::Ctlz, Type::I32, vec![a.into(), const_i32(0)])
        .unwrap();
    b.ret(Some(r.into()));
    let asm = compile_o2(&mut func);
    assert!(asm.contains("\tbsr\t"), "{asm}");
    assert!(asm.contains(", 63"), "{asm}");
    assert!(asm.contains(", 31"), "bit position converts via xor 31:\n{asm}");
}

#[test]
fn bswap16_is_rol8() {
    let mut func = Function::new("bs", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::I32, "a");
    let t = b.cast(opal_ir::instruction::CastOp::Trunc, Type::I16, a.into());
    let r = b
        .intrinsic(Intrinsic::Bswap, Type::I16, vec![t.into()])
        .unwrap();
    let w = b.cast(opal_ir::instruction::CastOp::Zext, Type::I32, r.into());
    b.ret(Some(w.into()));
    let asm = compile_o2(&mut func);
    assert!(asm.contains("\trol\t"), "{asm}");
    assert!(asm.contains(", 8"), "{asm}");
}

#[test]
fn switch_with_only_default_is_single_jmp() {
    let mut func = Function::new("sw", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    let def = b.create_block("default");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::I32, "a");
    b.switch(a.into(), vec![], def);
    b.switch_to_block(def);
    b.ret(Some(const_i32(0)));
    let asm = compile_o2(&mut func);
    assert_eq!(count(&asm, "\tjmp\t"), 1, "{asm}");
    assert!(!asm.contains("\tcmp\t"), "no case compares:\n{asm}");
    assert!(asm.contains("$default"), "{asm}");
}

#[test]
fn errored_function_produces_no_assembly() {
    // A non-constant AtomicIsLockFree size is a user IR violation.
    let mut func = Function::new("bad", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::I32, "a");
    let r = b
        .intrinsic(Intrinsic::AtomicIsLockFree, Type::I32, vec![a.into(), a.into()])
        .unwrap();
    b.ret(Some(r.into()));
    let mut ctx = GlobalContext::new(Flags::default());
    let err = translate_and_emit(&mut func, &mut ctx, &TargetOpts::default(), OptLevel::O2)
        .expect_err("must fail");
    assert!(err.message.contains("AtomicIsLockFree"));
    assert!(func.has_error());
}

#[test]
fn i64_variables_are_split_not_allocated() {
    let mut func = Function::new("s64", Type::I64);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let x = b.add_arg(Type::I64, "x");
    let y = b.add_arg(Type::I64, "y");
    let s = b.arith(ArithOp::Add, Type::I64, x.into(), y.into());
    b.ret(Some(s.into()));
    let mut ctx = GlobalContext::new(Flags::default());
    let translated =
        opal_x8632::backend::translate(&mut func, &mut ctx, &TargetOpts::default(), OptLevel::O2)
            .expect("translation should succeed");
    let _ = translated;

    for var in &func.vars {
        if var.ty == Type::I64 {
            assert!(var.reg_num.is_none(), "{} must never hold a register", var.name);
            assert!(
                var.lo.is_some() && var.hi.is_some(),
                "{} must be split by frame time",
                var.name
            );
        }
    }
    // add/adc carry chain.
    // (re-emit for the textual check)
    let mut func2 = Function::new("s64b", Type::I64);
    let mut b = Builder::new(&mut func2);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let x = b.add_arg(Type::I64, "x");
    let y = b.add_arg(Type::I64, "y");
    let s = b.arith(ArithOp::Add, Type::I64, x.into(), y.into());
    b.ret(Some(s.into()));
    let asm = compile_o2(&mut func2);
    assert!(asm.contains("\tadc\t"), "{asm}");
}

#[test]
fn call_aligns_stack_and_kills_scratch() {
    let mut func = Function::new("c", Type::I32);
    let mut b = Builder::new(&mut func);
    let entry = b.create_block("entry");
    b.switch_to_block(entry);
    let a = b.add_arg(Type::I32, "a");
    let r = b
        .call(
            Type::I32,
            Operand::Const(Constant::Reloc {
                name: "callee".to_string(),
                offset: 0,
            }),
            vec![a.into()],
        )
        .unwrap();
    b.ret(Some(r.into()));
    let asm = compile_o2(&mut func);
    // One argument pads the parameter area to 16 bytes.
    assert!(asm.contains("sub\tesp, 16"), "{asm}");
    assert!(asm.contains("call\tcallee"), "{asm}");
    assert!(asm.contains("add\tesp, 16"), "{asm}");
    assert_eq!(count(&asm, "\tret"), 1);
}
