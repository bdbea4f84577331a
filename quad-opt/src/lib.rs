//! Optimizer and code transformer for quad shader programs.
//!
//! The input is a straight-line program over the four-lane SIMD ISA defined
//! by [`quad_asm`]. The pipeline rewrites it into a semantically equivalent
//! program that uses fewer live temporary registers, carries no dead lane
//! writes, optionally runs on a scalar pipeline, reads attributes through
//! explicit loads, and is annotated with the wait points that fence
//! outstanding texture and attribute loads.
//!
//! Every pass is a pure function from a program to a new program; analysis
//! tables live only for the duration of one pass, and a read-only
//! [`ArchParams`] value carries the architectural limits. Diagnostics go to
//! the `tracing` subscriber; fatal conditions surface as [`OptError`].

#![warn(missing_docs)]

mod attributes;
mod dce;
mod driver;
mod error;
mod liverange;
mod movs;
mod params;
mod rename;
mod scalarize;
mod tables;
mod waitpoints;

pub use attributes::attributes_to_loads;
pub use dce::dead_code_elimination;
pub use driver::{alu_tex_ratio, optimize, transform, TransformOptions, TransformOutput};
pub use error::OptError;
pub use liverange::reduce_live_registers;
pub use movs::remove_redundant_movs;
pub use params::ArchParams;
pub use rename::rename_registers;
pub use scalarize::simd4_to_scalar;
pub use waitpoints::assign_wait_points;
