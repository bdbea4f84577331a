//! Optimizer error type.

use quad_asm::{DecodeError, EncodeError, Lane, RegId};

/// Fatal conditions that abort an optimization call.
///
/// Resource exhaustion reflects a program the target cannot hold; the other
/// variants are contract violations detected inside the pipeline. Both abort
/// the current call and leave no partially rewritten output behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptError {
    /// The attribute→load pass ran out of temporary registers.
    #[error("no free temporary register to load input attribute {attribute}")]
    NoFreeTemp {
        /// Attribute register that could not be materialized.
        attribute: RegId,
    },

    /// The SIMD4→scalar pass could not claim a scratch accumulator for a
    /// dot product targeting an output register.
    #[error("no free temporary register for a dot-product accumulator")]
    NoScratchTemp,

    /// No physical register satisfies the allocation constraints of a name.
    #[error("no temporary register can hold name {name}")]
    NoRegisterForName {
        /// The name that failed to allocate.
        name: RegId,
    },

    /// A temporary register is read before any instruction wrote it and the
    /// instruction is not the `slt`/`sge` constant idiom.
    #[error("instruction {instr} reads temporary register {reg} with no assigned value")]
    TempReadBeforeWrite {
        /// Offending instruction index.
        instr: usize,
        /// Register (or name) read before definition.
        reg: RegId,
    },

    /// Two unpredicated writers defined the same name lane.
    #[error(
        "name {name} lane {lane} defined by instruction {second} \
         was already defined by instruction {first}"
    )]
    NameRedefined {
        /// The doubly defined name.
        name: RegId,
        /// The doubly defined lane.
        lane: Lane,
        /// First defining instruction index.
        first: usize,
        /// Second defining instruction index.
        second: usize,
    },

    /// The allocator would have to permute the destination lanes of an
    /// opcode that produces a SIMD4 result.
    #[error("instruction {instr}: destination lanes of a SIMD4 result cannot be permuted")]
    Simd4DestinationPermuted {
        /// Offending instruction index.
        instr: usize,
    },

    /// Copy-cluster aggregation found two writers of the same operand lane.
    #[error(
        "aggregating name {name} into master {master}: \
         lane {lane} is already read at instruction {instr}"
    )]
    AggregationConflict {
        /// Name being aggregated.
        name: RegId,
        /// Master it was being merged into.
        master: RegId,
        /// Conflicting lane.
        lane: Lane,
        /// Instruction where both names claim the operand lane.
        instr: usize,
    },

    /// The input program failed to decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The output program failed to encode.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}
