//! Instruction set atoms of the quad shader ISA.
//!
//! The ISA operates on four-lane SIMD registers split into banks (temporary,
//! input attribute, output attribute, constant, address, predicate, plus
//! sampler and texture descriptor namespaces). This crate defines the
//! immutable [`Instruction`] record, the opcode enumeration with its pure
//! classifiers, the swizzle and write-mask calculus, and the fixed 16-byte
//! binary codec with program-level encode/decode.
//!
//! The optimizer that consumes these types lives in the `quad-opt` crate.

#![warn(missing_docs)]

mod encoding;
mod instruction;
mod mask;
mod opcode;
mod program;
mod swizzle;

pub use encoding::{DecodeError, EncodeError};
pub use instruction::{
    Bank, Dest, Instruction, Operand, OperandReads, Predicate, RegId, RelAddr,
};
pub use mask::WriteMask;
pub use opcode::{InvalidOpcode, Opcode};
pub use program::{decode_program, encode_program, requires_early_z_disable, Program};
pub use swizzle::{Lane, Swizzle, LANE_COUNT, LANE_NAMES, SWIZZLE_CANON};

/// Architectural constants of the shader programming model.
pub mod consts {
    use super::RegId;

    /// Number of temporary registers.
    pub const MAX_TEMPORAL_REGISTERS: usize = 32;

    /// Number of input attribute registers.
    pub const MAX_INPUT_ATTRIBUTES: usize = 48;

    /// Reserved input attribute register holding the per-element index that
    /// `lda` consumes to address the attribute memory.
    pub const INDEX_ATTRIBUTE: RegId = 47;
}
