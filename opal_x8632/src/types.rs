//! x86 attributes of the IR types.
//!
//! These are the target-side companions to the IR type table. The matches
//! are exhaustive over `Type`, so adding a type without extending them is a
//! compile error; a unit test additionally walks `ALL_TYPES` to pin the
//! values down.

use opal_ir::types::Type;

/// The type the elements of a vector have inside the x86 representation.
/// i1 vector elements widen to the lane width of their container.
pub fn in_vector_element_type(ty: Type) -> Type {
    debug_assert!(ty.is_vector());
    match ty {
        Type::V4I1 => Type::I32,
        Type::V8I1 => Type::I16,
        Type::V16I1 => Type::I8,
        Type::V16I8 => Type::I8,
        Type::V8I16 => Type::I16,
        Type::V4I32 => Type::I32,
        Type::V4F32 => Type::F32,
        _ => unreachable!("in_vector_element_type on scalar {ty}"),
    }
}

/// Width of a type's stack slot in bytes. The smallest slot is 4 bytes, the
/// largest 16.
pub fn width_on_stack(ty: Type) -> u32 {
    ty.byte_width().max(4)
}

/// Width qualifier for a memory reference of the given type.
pub fn width_string(ty: Type) -> &'static str {
    match ty {
        Type::Void => "",
        Type::I1 | Type::I8 => "byte ptr",
        Type::I16 => "word ptr",
        Type::I32 | Type::F32 => "dword ptr",
        Type::I64 | Type::F64 => "qword ptr",
        Type::V4I1 | Type::V8I1 | Type::V16I1 | Type::V16I8 | Type::V8I16 | Type::V4I32
        | Type::V4F32 => "xmmword ptr",
    }
}

/// Suffix distinguishing single/double scalar FP instructions (addss/addsd).
pub fn sdss_suffix(ty: Type) -> &'static str {
    match ty {
        Type::F32 => "ss",
        Type::F64 => "sd",
        _ => unreachable!("sdss_suffix on non-FP {ty}"),
    }
}

/// Packed-instruction element suffix (paddb/paddw/paddd), keyed by the
/// in-vector element width.
pub fn pack_suffix(ty: Type) -> &'static str {
    match in_vector_element_type(ty) {
        Type::I8 => "b",
        Type::I16 => "w",
        Type::I32 | Type::F32 => "d",
        other => unreachable!("pack_suffix element {other}"),
    }
}
