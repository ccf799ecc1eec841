//! The x86-32 physical register table.
//!
//! One x-macro row per register carries the names at each width and the
//! classification columns; every accessor is generated from it so the
//! columns cannot drift.

use opal_ir::types::Type;

/// Physical register number: an index into the register table.
pub type RegNum = u32;

macro_rules! for_each_reg {
    ($x:ident) => {
        $x! {
            // tag, num, name, name16, name8, scratch, preserved, stackptr, frameptr, is_i8, is_int, is_fp
            Eax,  0,  "eax",  "ax", "al", true,  false, false, false, true,  true,  false;
            Ecx,  1,  "ecx",  "cx", "cl", true,  false, false, false, true,  true,  false;
            Edx,  2,  "edx",  "dx", "dl", true,  false, false, false, true,  true,  false;
            Ebx,  3,  "ebx",  "bx", "bl", false, true,  false, false, true,  true,  false;
            Esp,  4,  "esp",  "sp", "",   false, false, true,  false, false, false, false;
            Ebp,  5,  "ebp",  "bp", "",   false, true,  false, true,  false, false, false;
            Esi,  6,  "esi",  "si", "",   false, true,  false, false, false, true,  false;
            Edi,  7,  "edi",  "di", "",   false, true,  false, false, false, true,  false;
            // ah is only ever pre-colored (8-bit division remainder); it is
            // in no allocatable class.
            Ah,   8,  "ah",   "",   "ah", false, false, false, false, false, false, false;
            Xmm0, 9,  "xmm0", "",   "",   true,  false, false, false, false, false, true;
            Xmm1, 10, "xmm1", "",   "",   true,  false, false, false, false, false, true;
            Xmm2, 11, "xmm2", "",   "",   true,  false, false, false, false, false, true;
            Xmm3, 12, "xmm3", "",   "",   true,  false, false, false, false, false, true;
            Xmm4, 13, "xmm4", "",   "",   true,  false, false, false, false, false, true;
            Xmm5, 14, "xmm5", "",   "",   true,  false, false, false, false, false, true;
            Xmm6, 15, "xmm6", "",   "",   true,  false, false, false, false, false, true;
            Xmm7, 16, "xmm7", "",   "",   true,  false, false, false, false, false, true;
        }
    };
}

macro_rules! define_regs {
    ($($tag:ident, $num:literal, $name:literal, $name16:literal, $name8:literal,
       $scratch:literal, $preserved:literal, $stackptr:literal, $frameptr:literal,
       $is_i8:literal, $is_int:literal, $is_fp:literal;)*) => {
        /// Physical registers, numbered in table order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Reg {
            $($tag = $num,)*
        }

        /// Number of entries in the register table.
        pub const REG_NUM: usize = [$($num as u32),*].len();

        impl Reg {
            pub fn num(self) -> RegNum {
                self as RegNum
            }
        }

        /// Display name at 32-bit (or xmm) width.
        fn name32(num: RegNum) -> &'static str {
            match num { $($num => $name,)* _ => unreachable!("bad register number {num}") }
        }

        fn name16(num: RegNum) -> &'static str {
            match num { $($num => $name16,)* _ => unreachable!("bad register number {num}") }
        }

        fn name8(num: RegNum) -> &'static str {
            match num { $($num => $name8,)* _ => unreachable!("bad register number {num}") }
        }

        /// Caller-save (scratch) registers, killed at every call.
        pub const SCRATCH_MASK: u32 = 0 $(| if $scratch { 1 << $num } else { 0 })*;
        /// Callee-save (preserved) registers.
        pub const PRESERVED_MASK: u32 = 0 $(| if $preserved { 1 << $num } else { 0 })*;
        /// The stack pointer.
        pub const STACKPTR_MASK: u32 = 0 $(| if $stackptr { 1 << $num } else { 0 })*;
        /// The frame pointer.
        pub const FRAMEPTR_MASK: u32 = 0 $(| if $frameptr { 1 << $num } else { 0 })*;
        const I8_MASK: u32 = 0 $(| if $is_i8 { 1 << $num } else { 0 })*;
        const INT_MASK: u32 = 0 $(| if $is_int { 1 << $num } else { 0 })*;
        const FP_MASK: u32 = 0 $(| if $is_fp { 1 << $num } else { 0 })*;
    };
}

for_each_reg!(define_regs);

/// Register set selectors for `get_register_set`.
pub const REG_SET_NONE: u8 = 0;
pub const REG_SET_CALLER_SAVE: u8 = 1 << 0;
pub const REG_SET_CALLEE_SAVE: u8 = 1 << 1;
pub const REG_SET_STACK_POINTER: u8 = 1 << 2;
pub const REG_SET_FRAME_POINTER: u8 = 1 << 3;
pub const REG_SET_ALL: u8 =
    REG_SET_CALLER_SAVE | REG_SET_CALLEE_SAVE | REG_SET_STACK_POINTER | REG_SET_FRAME_POINTER;

/// Build a register mask from include/exclude set selectors.
pub fn get_register_set(include: u8, exclude: u8) -> u32 {
    let of = |sel: u8| -> u32 {
        let mut m = 0;
        if sel & REG_SET_CALLER_SAVE != 0 {
            m |= SCRATCH_MASK;
        }
        if sel & REG_SET_CALLEE_SAVE != 0 {
            m |= PRESERVED_MASK;
        }
        if sel & REG_SET_STACK_POINTER != 0 {
            m |= STACKPTR_MASK;
        }
        if sel & REG_SET_FRAME_POINTER != 0 {
            m |= FRAMEPTR_MASK;
        }
        m
    };
    of(include) & !of(exclude)
}

/// The allowable register class for a type.
pub fn registers_for_type(ty: Type) -> u32 {
    match ty {
        Type::Void => 0,
        Type::I1 | Type::I8 => I8_MASK,
        Type::I16 | Type::I32 | Type::I64 => INT_MASK,
        _ => FP_MASK,
    }
}

/// Register name at the width of `ty`.
pub fn reg_name(num: RegNum, ty: Type) -> &'static str {
    match ty {
        Type::I1 | Type::I8 => name8(num),
        Type::I16 => name16(num),
        _ => name32(num),
    }
}

/// True when `num` names an xmm register.
pub fn is_xmm(num: RegNum) -> bool {
    FP_MASK & (1 << num) != 0
}

/// Iterate the register numbers set in a mask, ascending.
pub fn mask_regs(mask: u32) -> impl Iterator<Item = RegNum> {
    (0..REG_NUM as u32).filter(move |r| mask & (1 << r) != 0)
}
