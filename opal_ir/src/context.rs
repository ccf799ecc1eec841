//! Process-wide translation state.
//!
//! One `GlobalContext` serves a whole module: the float/double constant
//! pools, the name mangling cache, sandbox/nop flags, and the RNG used by
//! nop insertion. Functions of a module may be translated in parallel, but
//! accesses to the context must be serialized by the driver.

use std::collections::HashMap;

/// Flags that affect code generation independent of the target options.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    /// Sandboxed execution mode; enables the gs-relative thread pointer.
    pub use_sandboxing: bool,
    /// When set, insert a random nop after an instruction with this
    /// probability.
    pub nop_probability: Option<f32>,
}

/// A small deterministic generator for the nop insertion pass.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Rng {
        Rng {
            state: seed | 1,
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        (x.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 32) as u32
    }

    /// Uniform value in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }
}

/// The global translation context.
pub struct GlobalContext {
    pub flags: Flags,
    pub rng: Rng,
    /// Optional prefix applied by name mangling (testing hook).
    test_prefix: String,
    mangle_cache: HashMap<String, String>,
    float_pool: Vec<u32>,
    float_ids: HashMap<u32, usize>,
    double_pool: Vec<u64>,
    double_ids: HashMap<u64, usize>,
}

impl GlobalContext {
    pub fn new(flags: Flags) -> GlobalContext {
        GlobalContext {
            flags,
            rng: Rng::new(0x5eed),
            test_prefix: String::new(),
            mangle_cache: HashMap::new(),
            float_pool: Vec::new(),
            float_ids: HashMap::new(),
            double_pool: Vec::new(),
            double_ids: HashMap::new(),
        }
    }

    pub fn set_test_prefix(&mut self, prefix: impl Into<String>) {
        self.test_prefix = prefix.into();
        self.mangle_cache.clear();
    }

    /// Mangle a symbol name, memoized.
    pub fn mangle_name(&mut self, name: &str) -> String {
        if let Some(m) = self.mangle_cache.get(name) {
            return m.clone();
        }
        let mangled = format!("{}{}", self.test_prefix, name);
        self.mangle_cache.insert(name.to_string(), mangled.clone());
        mangled
    }

    /// Pool entry id for an f32 constant, interning it on first use.
    pub fn pool_entry_f32(&mut self, value: f32) -> usize {
        let bits = value.to_bits();
        if let Some(&id) = self.float_ids.get(&bits) {
            return id;
        }
        let id = self.float_pool.len();
        self.float_pool.push(bits);
        self.float_ids.insert(bits, id);
        id
    }

    /// Pool entry id for an f64 constant, interning it on first use.
    pub fn pool_entry_f64(&mut self, value: f64) -> usize {
        let bits = value.to_bits();
        if let Some(&id) = self.double_ids.get(&bits) {
            return id;
        }
        let id = self.double_pool.len();
        self.double_pool.push(bits);
        self.double_ids.insert(bits, id);
        id
    }

    /// All f32 pool entries (raw bits), in id order.
    pub fn float_pool(&self) -> &[u32] {
        &self.float_pool
    }

    /// All f64 pool entries (raw bits), in id order.
    pub fn double_pool(&self) -> &[u64] {
        &self.double_pool
    }
}
