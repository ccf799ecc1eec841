//! Functions, basic blocks, and the variable arena.

use crate::instruction::Inst;
use crate::types::Type;
use crate::value::{BlockRef, VarRef};

/// Register allocation weight of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegWeight {
    /// Never give this variable a register; it names a stack slot.
    Zero,
    /// Normal variable, may be spilled.
    Finite,
    /// Must end up in a register (lowering temporaries).
    Infinite,
}

/// A virtual register with a stable identity.
///
/// After frame layout a variable has a register number or a stack offset,
/// never both. An i64 variable never itself holds a register; once split,
/// all accesses go through its `lo`/`hi` halves.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
    pub weight: RegWeight,
    /// Physical register number, pre-assigned or set by register allocation.
    pub reg_num: Option<u32>,
    /// Frame offset, set exactly once during frame layout.
    pub stack_offset: Option<i32>,
    /// Defining block; None means multi-block lifetime.
    pub def_block: Option<BlockRef>,
    pub is_arg: bool,
    /// 32-bit halves of an i64/f64 variable, created on demand by split64.
    pub lo: Option<VarRef>,
    pub hi: Option<VarRef>,
    /// A Zero-weight variable may share its stack slot with another spilled
    /// variable (bitcast spill staging); frame layout copies the offset.
    pub linked_to: Option<VarRef>,
}

impl Variable {
    pub fn has_reg(&self) -> bool {
        self.reg_num.is_some()
    }

    pub fn is_multiblock_life(&self) -> bool {
        self.def_block.is_none()
    }
}

/// A basic block: a name and an ordered instruction list.
#[derive(Debug, Default)]
pub struct BasicBlock {
    pub name: String,
    pub insts: Vec<Inst>,
}

/// A function in the opal IR.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub ret_ty: Type,
    /// Argument variables, in declaration order. Argument lowering may
    /// replace entries with register-homed copies.
    pub args: Vec<VarRef>,
    pub vars: Vec<Variable>,
    pub blocks: Vec<BasicBlock>,
    /// Error state; once set, lowering of this function stops and no
    /// assembly is produced for it.
    error: Option<String>,
    /// True when the function calls a returns-twice function (setjmp);
    /// disables local spill-slot coalescing.
    pub calls_returns_twice: bool,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_ty: Type) -> Function {
        Function {
            name: name.into(),
            ret_ty,
            args: Vec::new(),
            vars: Vec::new(),
            blocks: Vec::new(),
            error: None,
            calls_returns_twice: false,
        }
    }

    pub fn var(&self, r: VarRef) -> &Variable {
        &self.vars[r.index()]
    }

    pub fn var_mut(&mut self, r: VarRef) -> &mut Variable {
        &mut self.vars[r.index()]
    }

    pub fn block(&self, r: BlockRef) -> &BasicBlock {
        &self.blocks[r.index()]
    }

    pub fn entry_block(&self) -> BlockRef {
        BlockRef(0)
    }

    /// Create a fresh variable. `def_block` of None means the variable is
    /// live across blocks.
    pub fn make_variable(
        &mut self,
        ty: Type,
        def_block: Option<BlockRef>,
        name: impl Into<String>,
    ) -> VarRef {
        let r = VarRef(self.vars.len() as u32);
        self.vars.push(Variable {
            name: name.into(),
            ty,
            weight: RegWeight::Finite,
            reg_num: None,
            stack_offset: None,
            def_block,
            is_arg: false,
            lo: None,
            hi: None,
            linked_to: None,
        });
        r
    }

    /// Create a fresh variable with an auto-generated name.
    pub fn make_temp(&mut self, ty: Type, def_block: Option<BlockRef>) -> VarRef {
        let name = format!("t{}", self.vars.len());
        self.make_variable(ty, def_block, name)
    }

    pub fn set_error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        log::debug!(target: "opal::ir", "function @{}: {}", self.name, msg);
        if self.error.is_none() {
            self.error = Some(msg);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Count operand uses of every variable across all live instructions.
    /// Used by the fusion peepholes to approximate last-use queries.
    pub fn compute_use_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.vars.len()];
        for bb in &self.blocks {
            for inst in bb.insts.iter().filter(|i| !i.deleted) {
                inst.for_each_operand(|op| {
                    use crate::operand::Operand;
                    match op {
                        Operand::Var(v) => counts[v.index()] += 1,
                        Operand::Mem(m) => {
                            if let Some(b) = m.base {
                                counts[b.index()] += 1;
                            }
                            if let Some(i) = m.index {
                                counts[i.index()] += 1;
                            }
                        }
                        Operand::Split(s) => counts[s.var.index()] += 1,
                        Operand::Const(_) => {}
                    }
                });
            }
        }
        counts
    }
}
