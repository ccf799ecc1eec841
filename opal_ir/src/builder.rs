//! Builder API for constructing opal IR.

use crate::function::Function;
use crate::instruction::{
    ArithOp, CastOp, FcmpCond, IcmpCond, Inst, InstKind, Intrinsic,
};
use crate::operand::Operand;
use crate::types::Type;
use crate::value::{BlockRef, VarRef};

/// Builder for constructing a function's IR.
pub struct Builder<'a> {
    pub func: &'a mut Function,
    current_block: Option<BlockRef>,
}

impl<'a> Builder<'a> {
    pub fn new(func: &'a mut Function) -> Self {
        Self {
            func,
            current_block: None,
        }
    }

    /// Create a new basic block and return its reference.
    pub fn create_block(&mut self, name: impl Into<String>) -> BlockRef {
        let r = BlockRef(self.func.blocks.len() as u32);
        self.func.blocks.push(crate::function::BasicBlock {
            name: name.into(),
            insts: Vec::new(),
        });
        r
    }

    /// Set the current block for subsequent instructions.
    pub fn switch_to_block(&mut self, block: BlockRef) {
        self.current_block = Some(block);
    }

    /// Declare a function argument of the given type.
    pub fn add_arg(&mut self, ty: Type, name: impl Into<String>) -> VarRef {
        let v = self.func.make_variable(ty, None, name);
        self.func.var_mut(v).is_arg = true;
        self.func.args.push(v);
        v
    }

    fn push(&mut self, kind: InstKind, dest: Option<VarRef>) {
        let bb = self.current_block.expect("no active block");
        self.func.blocks[bb.index()].insts.push(Inst::new(kind, dest));
    }

    fn make_dest(&mut self, ty: Type) -> VarRef {
        let bb = self.current_block;
        self.func.make_temp(ty, bb)
    }

    /// Create a destination variable whose lifetime spans blocks.
    pub fn make_global_dest(&mut self, ty: Type, name: impl Into<String>) -> VarRef {
        self.func.make_variable(ty, None, name)
    }

    pub fn arith(&mut self, op: ArithOp, ty: Type, a: Operand, b: Operand) -> VarRef {
        let dest = self.make_dest(ty);
        self.push(InstKind::Arith { op, a, b }, Some(dest));
        dest
    }

    pub fn arith_into(&mut self, dest: VarRef, op: ArithOp, a: Operand, b: Operand) {
        self.push(InstKind::Arith { op, a, b }, Some(dest));
    }

    pub fn assign(&mut self, dest: VarRef, src: Operand) {
        self.push(InstKind::Assign { src }, Some(dest));
    }

    pub fn alloca(&mut self, size: Operand, align: u32) -> VarRef {
        let dest = self.make_dest(Type::I32);
        self.push(InstKind::Alloca { size, align }, Some(dest));
        dest
    }

    pub fn icmp(&mut self, cond: IcmpCond, a: Operand, b: Operand) -> VarRef {
        let dest = self.make_dest(Type::I1);
        self.push(InstKind::Icmp { cond, a, b }, Some(dest));
        dest
    }

    pub fn icmp_vec(&mut self, cond: IcmpCond, ty: Type, a: Operand, b: Operand) -> VarRef {
        let dest = self.make_dest(ty);
        self.push(InstKind::Icmp { cond, a, b }, Some(dest));
        dest
    }

    pub fn fcmp(&mut self, cond: FcmpCond, a: Operand, b: Operand) -> VarRef {
        let dest = self.make_dest(Type::I1);
        self.push(InstKind::Fcmp { cond, a, b }, Some(dest));
        dest
    }

    pub fn cast(&mut self, op: CastOp, ty: Type, src: Operand) -> VarRef {
        let dest = self.make_dest(ty);
        self.push(InstKind::Cast { op, src }, Some(dest));
        dest
    }

    pub fn load(&mut self, ty: Type, addr: Operand) -> VarRef {
        let dest = self.make_dest(ty);
        self.push(InstKind::Load { addr }, Some(dest));
        dest
    }

    pub fn store(&mut self, value: Operand, addr: Operand) {
        self.push(InstKind::Store { value, addr }, None);
    }

    pub fn select(&mut self, ty: Type, cond: Operand, on_true: Operand, on_false: Operand) -> VarRef {
        let dest = self.make_dest(ty);
        self.push(
            InstKind::Select {
                cond,
                on_true,
                on_false,
            },
            Some(dest),
        );
        dest
    }

    pub fn br(&mut self, target: BlockRef) {
        self.push(
            InstKind::Br {
                cond: None,
                on_true: target,
                on_false: target,
            },
            None,
        );
    }

    pub fn br_if(&mut self, cond: Operand, on_true: BlockRef, on_false: BlockRef) {
        self.push(
            InstKind::Br {
                cond: Some(cond),
                on_true,
                on_false,
            },
            None,
        );
    }

    pub fn switch(&mut self, value: Operand, cases: Vec<(i64, BlockRef)>, default: BlockRef) {
        self.push(
            InstKind::Switch {
                value,
                cases,
                default,
            },
            None,
        );
    }

    pub fn call(&mut self, ret_ty: Type, target: Operand, args: Vec<Operand>) -> Option<VarRef> {
        let dest = if ret_ty == Type::Void {
            None
        } else {
            Some(self.make_dest(ret_ty))
        };
        self.push(
            InstKind::Call {
                target,
                args,
                has_side_effects: true,
                returns_twice: false,
            },
            dest,
        );
        dest
    }

    pub fn intrinsic(&mut self, id: Intrinsic, ret_ty: Type, args: Vec<Operand>) -> Option<VarRef> {
        let dest = if ret_ty == Type::Void {
            None
        } else {
            Some(self.make_dest(ret_ty))
        };
        self.push(InstKind::IntrinsicCall { id, args }, dest);
        dest
    }

    pub fn extract_element(&mut self, ty: Type, vec: Operand, index: Operand) -> VarRef {
        let dest = self.make_dest(ty);
        self.push(InstKind::ExtractElement { vec, index }, Some(dest));
        dest
    }

    pub fn insert_element(&mut self, ty: Type, vec: Operand, elem: Operand, index: Operand) -> VarRef {
        let dest = self.make_dest(ty);
        self.push(InstKind::InsertElement { vec, elem, index }, Some(dest));
        dest
    }

    pub fn phi(&mut self, ty: Type, args: Vec<(Operand, BlockRef)>) -> VarRef {
        let dest = self.func.make_variable(ty, None, format!("phi{}", self.func.vars.len()));
        self.push(InstKind::Phi { args }, Some(dest));
        dest
    }

    pub fn ret(&mut self, src: Option<Operand>) {
        self.push(InstKind::Ret { src }, None);
    }

    pub fn unreachable(&mut self) {
        self.push(InstKind::Unreachable, None);
    }
}
