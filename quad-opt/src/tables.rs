//! Pass-local analysis table helpers shared by the transformation passes.

use quad_asm::{Bank, Instruction, RegId};

use crate::error::OptError;
use crate::params::ArchParams;

/// Highest temp-bank index the program touches, as a table bound.
///
/// Tables indexed by temp register (or name) ids are sized from the program
/// itself so that ill-formed inputs surface as diagnostics instead of
/// out-of-bounds indexing.
pub(crate) fn temp_index_bound(program: &[Instruction], at_least: usize) -> usize {
    let mut bound = at_least;
    for instr in program {
        for op in instr.operands() {
            if op.bank == Bank::Temp {
                bound = bound.max(op.reg as usize + 1);
            }
        }
        if instr.writes_result() && instr.dest().bank == Bank::Temp {
            bound = bound.max(instr.dest().reg as usize + 1);
        }
    }
    bound
}

/// Which temporary registers hold a value, plus the architectural range a
/// fresh register may be claimed from.
#[derive(Debug)]
pub(crate) struct TempUse {
    in_use: Vec<bool>,
    arch_limit: usize,
}

impl TempUse {
    pub(crate) fn new(program: &[Instruction], params: &ArchParams) -> Self {
        TempUse {
            in_use: vec![false; temp_index_bound(program, params.temp_registers)],
            arch_limit: params.temp_registers,
        }
    }

    /// Record the temp writes of one instruction and verify its temp reads
    /// were preceded by a write.
    ///
    /// The `slt`/`sge` self-compare idiom is exempt: it produces a constant
    /// without consuming the register value.
    pub(crate) fn update(&mut self, index: usize, instr: &Instruction) -> Result<(), OptError> {
        if !instr.writes_result() || instr.opcode().is_not_implemented() {
            return Ok(());
        }

        if instr.dest().bank == Bank::Temp {
            self.in_use[instr.dest().reg as usize] = true;
        }

        for op in instr.operands() {
            if op.bank == Bank::Temp
                && !self.in_use[op.reg as usize]
                && !instr.is_const_producing_compare()
            {
                return Err(OptError::TempReadBeforeWrite {
                    instr: index,
                    reg: op.reg,
                });
            }
        }

        Ok(())
    }

    /// Lowest architectural register not yet in use, claimed for the caller.
    pub(crate) fn claim_lowest_free(&mut self) -> Option<RegId> {
        let slot = self.in_use[..self.arch_limit].iter().position(|used| !used)?;
        self.in_use[slot] = true;
        Some(slot as RegId)
    }

    /// Release a register claimed with [`claim_lowest_free`].
    ///
    /// [`claim_lowest_free`]: TempUse::claim_lowest_free
    pub(crate) fn release(&mut self, reg: RegId) {
        self.in_use[reg as usize] = false;
    }
}

/// Temp usage of a whole program, with the write-before-read check applied to
/// every instruction.
pub(crate) fn checked_temp_use(
    program: &[Instruction],
    params: &ArchParams,
) -> Result<TempUse, OptError> {
    let mut usage = TempUse::new(program, params);
    for (index, instr) in program.iter().enumerate() {
        usage.update(index, instr)?;
    }
    Ok(usage)
}
