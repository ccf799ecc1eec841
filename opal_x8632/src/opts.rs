//! Target options: the inherited command-line surface.

use clap::{Args, ValueEnum};

/// Instruction set level selected by `--mattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum InstructionSet {
    /// SSE2 baseline (default).
    #[value(name = "sse2")]
    Sse2,
    /// SSE4.1: pmulld, pextr/pinsr, insertps, blendvps/pblendvb.
    #[value(name = "sse4.1")]
    Sse41,
}

/// x86-32 code generation options, embeddable in a host driver's CLI.
#[derive(Debug, Clone, Args)]
pub struct TargetOpts {
    /// X86 target attributes.
    #[arg(long = "mattr", value_enum, default_value = "sse2")]
    pub instruction_set: InstructionSet,

    /// Dump the stack layout computed by frame generation.
    #[arg(long)]
    pub verbose_frame: bool,

    /// Dump address-mode folding decisions.
    #[arg(long)]
    pub verbose_addropt: bool,
}

impl Default for TargetOpts {
    fn default() -> Self {
        TargetOpts {
            instruction_set: InstructionSet::Sse2,
            verbose_frame: false,
            verbose_addropt: false,
        }
    }
}
