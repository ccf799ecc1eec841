//! The closed type set and its attribute table.
//!
//! One table drives everything: byte width, natural alignment, element
//! count, and element type are generated from a single x-macro so the
//! columns cannot drift apart.

use std::fmt;

/// X-macro over the closed type set.
///
/// Columns: tag, byte width, natural alignment, number of elements,
/// element type, printable name.
macro_rules! for_each_type {
    ($x:ident) => {
        $x! {
            Void,  0,  1,  1,  Void, "void";
            I1,    1,  1,  1,  I1,   "i1";
            I8,    1,  1,  1,  I8,   "i8";
            I16,   2,  2,  1,  I16,  "i16";
            I32,   4,  4,  1,  I32,  "i32";
            I64,   8,  8,  1,  I64,  "i64";
            F32,   4,  4,  1,  F32,  "f32";
            F64,   8,  8,  1,  F64,  "f64";
            V4I1,  16, 16, 4,  I1,   "v4i1";
            V8I1,  16, 16, 8,  I1,   "v8i1";
            V16I1, 16, 16, 16, I1,   "v16i1";
            V16I8, 16, 16, 16, I8,   "v16i8";
            V8I16, 16, 16, 8,  I16,  "v8i16";
            V4I32, 16, 16, 4,  I32,  "v4i32";
            V4F32, 16, 16, 4,  F32,  "v4f32";
        }
    };
}

macro_rules! define_types {
    ($($tag:ident, $size:expr, $align:expr, $elts:expr, $elty:ident, $name:expr;)*) => {
        /// A type in the opal IR.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Type {
            $($tag,)*
        }

        /// Every type, in table order.
        pub const ALL_TYPES: &[Type] = &[$(Type::$tag,)*];

        impl Type {
            /// Width in bytes (0 for void).
            pub fn byte_width(self) -> u32 {
                match self { $(Type::$tag => $size,)* }
            }

            /// Natural alignment in bytes.
            pub fn align_bytes(self) -> u32 {
                match self { $(Type::$tag => $align,)* }
            }

            /// Number of elements (1 for scalars).
            pub fn num_elements(self) -> u32 {
                match self { $(Type::$tag => $elts,)* }
            }

            /// Element type (self for scalars).
            pub fn element_type(self) -> Type {
                match self { $(Type::$tag => Type::$elty,)* }
            }

            fn name(self) -> &'static str {
                match self { $(Type::$tag => $name,)* }
            }
        }
    };
}

for_each_type!(define_types);

impl Type {
    /// True for the seven 128-bit vector types.
    pub fn is_vector(self) -> bool {
        self.num_elements() > 1
    }

    /// True for scalar f32/f64.
    pub fn is_scalar_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// True for scalar i1..i64.
    pub fn is_scalar_int(self) -> bool {
        matches!(self, Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    /// Bit width of a scalar integer type.
    pub fn bit_width(self) -> u32 {
        debug_assert!(self.is_scalar_int() || self.is_scalar_float());
        if self == Type::I1 {
            1
        } else {
            self.byte_width() * 8
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
