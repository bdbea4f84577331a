//! Architecture parameters consumed by the passes.

use quad_asm::consts::{MAX_INPUT_ATTRIBUTES, MAX_TEMPORAL_REGISTERS};

/// Read-only description of the shader programming model the optimizer
/// targets.
///
/// A value of this type is passed explicitly to every pass that needs it;
/// there is no process-wide parameter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchParams {
    /// Lanes per register.
    pub simd_width: usize,
    /// Temporary registers available to the allocator.
    pub temp_registers: usize,
    /// Input attribute registers.
    pub input_attributes: usize,
    /// Output attribute registers.
    pub output_registers: usize,
    /// Address registers.
    pub addr_registers: usize,
    /// Predicate registers.
    pub pred_registers: usize,
}

impl Default for ArchParams {
    fn default() -> Self {
        ArchParams {
            simd_width: 4,
            temp_registers: MAX_TEMPORAL_REGISTERS,
            input_attributes: MAX_INPUT_ATTRIBUTES,
            output_registers: 16,
            addr_registers: 1,
            pred_registers: 32,
        }
    }
}

impl ArchParams {
    /// Parameters with a different temporary register budget.
    pub fn with_temp_registers(mut self, temp_registers: usize) -> Self {
        self.temp_registers = temp_registers;
        self
    }
}
