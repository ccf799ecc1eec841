//! Global variable emission.
//!
//! Constants go to .rodata, writable data to .data; zero-initialized
//! non-constant data becomes a .comm allocation. Data bytes are emitted one
//! .byte directive per octet.

use std::fmt::Write;

use opal_ir::context::GlobalContext;

/// A module-level global ready for emission.
#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    pub align: u32,
    /// Internal globals get .local visibility.
    pub is_internal: bool,
    pub is_const: bool,
    /// None means zero-initialized of the given size.
    pub init: Option<Vec<u8>>,
    pub size: usize,
}

/// Emit one global as assembly text.
pub fn lower_global(ctx: &mut GlobalContext, g: &GlobalVar) -> String {
    let mangled = ctx.mangle_name(&g.name);
    let mut out = String::new();
    if g.is_const {
        let _ = writeln!(out, "\t.section\t.rodata,\"a\",@progbits");
    } else {
        let _ = writeln!(out, "\t.type\t{mangled},@object");
        let _ = writeln!(out, "\t.data");
    }
    let vis = if g.is_internal { ".local" } else { ".global" };
    let _ = writeln!(out, "\t{vis}\t{mangled}");
    match &g.init {
        None => {
            if g.is_const {
                let _ = writeln!(out, "\t.align\t{}", g.align);
                let _ = writeln!(out, "{mangled}:");
                let _ = writeln!(out, "\t.zero\t{}", g.size);
                let _ = writeln!(out, "\t.size\t{mangled}, {}", g.size);
            } else {
                let _ = writeln!(out, "\t.comm\t{mangled}, {}, {}", g.size, g.align);
            }
        }
        Some(data) => {
            let _ = writeln!(out, "\t.align\t{}", g.align);
            let _ = writeln!(out, "{mangled}:");
            for b in data {
                let _ = writeln!(out, "\t.byte\t{b}");
            }
            let _ = writeln!(out, "\t.size\t{mangled}, {}", data.len());
        }
    }
    out
}
