//! SSA-style register renaming.
//!
//! Every value a temp-bank write produces gets a fresh *name*, so later
//! passes reason about single-definition values instead of mutable
//! registers. A write covering only part of a register injects a copy that
//! carries the untouched lanes of the previous name into the new one, which
//! keeps a name's live lanes consistent under any later read.

use quad_asm::{Bank, Dest, Instruction, Opcode, Operand, Program, RegId, WriteMask, LANE_COUNT};

use crate::error::OptError;
use crate::params::ArchParams;
use crate::tables::temp_index_bound;

/// Most recent name per lane of each temp register. Name 0 is reserved for
/// "never defined".
struct NameTable {
    current: Vec<[RegId; LANE_COUNT]>,
    next: RegId,
}

impl NameTable {
    fn new(bound: usize) -> Self {
        NameTable {
            current: vec![[0; LANE_COUNT]; bound],
            next: 1,
        }
    }

    /// Most recent name over a set of lanes. Names are issued monotonically,
    /// so the maximum is the latest definition.
    fn latest(&self, reg: RegId, lanes: impl Iterator<Item = usize>) -> RegId {
        lanes
            .map(|lane| self.current[reg as usize][lane])
            .max()
            .unwrap_or(0)
    }

    fn define(&mut self, reg: RegId) -> RegId {
        let name = self.next;
        self.current[reg as usize] = [name; LANE_COUNT];
        self.next += 1;
        name
    }
}

fn operand_name(
    table: &NameTable,
    instr: &Instruction,
    index: usize,
    slot: usize,
    positions: &[usize],
) -> Result<RegId, OptError> {
    let op = instr.op(slot);
    if slot >= instr.opcode().operand_arity() || op.bank != Bank::Temp {
        return Ok(op.reg);
    }

    let lanes = op.swizzle.lanes();
    let name = table.latest(op.reg, positions.iter().map(|&p| lanes[p]));

    // A read with no defined name is fatal unless nothing is actually read,
    // or the instruction is the slt/sge constant idiom.
    if name == 0 && !positions.is_empty() && !instr.is_const_producing_compare() {
        return Err(OptError::TempReadBeforeWrite {
            instr: index,
            reg: op.reg,
        });
    }
    Ok(name)
}

/// Rename every produced value; returns the renamed program and the number
/// of names assigned.
pub fn rename_registers(
    program: &[Instruction],
    params: &ArchParams,
    scalar_mode: bool,
) -> Result<(Program, u32), OptError> {
    let bound = temp_index_bound(program, params.temp_registers);
    let mut table = NameTable::new(bound);
    let mut out = Program::with_capacity(program.len());

    for (index, instr) in program.iter().enumerate() {
        match instr.opcode() {
            Opcode::Nop | Opcode::End | Opcode::Chs => {
                out.push(*instr);
                continue;
            }
            Opcode::Flr => {
                tracing::warn!(instr = index, "dropping unimplemented opcode flr");
                continue;
            }
            _ => {}
        }

        let reads = instr.read_components();
        let op_names = [
            operand_name(&table, instr, index, 0, &reads.op1)?,
            operand_name(&table, instr, index, 1, &reads.op2)?,
            // The multiply-add family reads its third operand through the
            // first operand's positions.
            operand_name(&table, instr, index, 2, &reads.op1)?,
        ];

        let res_name = if instr.writes_result() && instr.dest().bank == Bank::Temp {
            let reg = instr.dest().reg;
            let written_lanes = instr.dest().mask.written_lanes();

            if written_lanes.len() != LANE_COUNT {
                // Lanes a predicated instruction writes are unknown until
                // run time, so all of them count as preserved.
                let mut written = [false; LANE_COUNT];
                for &lane in &written_lanes {
                    written[lane] = !instr.is_predicated();
                }

                let preserved =
                    table.latest(reg, (0..LANE_COUNT).filter(|&l| !written[l]));
                if preserved != 0 {
                    let next = table.next;
                    let src = Operand::reg(Bank::Temp, preserved);
                    if scalar_mode {
                        for lane in (0..LANE_COUNT).filter(|&l| !written[l]) {
                            out.push(Instruction::mov(
                                Dest::masked(Bank::Temp, next, WriteMask::lane(lane)),
                                src,
                            ));
                        }
                    } else {
                        let mask = WriteMask::all().without_lanes(written);
                        out.push(Instruction::mov(Dest::masked(Bank::Temp, next, mask), src));
                    }
                }
            }

            table.define(reg)
        } else {
            instr.dest().reg
        };

        out.push(instr.with_renamed_regs(res_name, op_names));
    }

    Ok((out, table.next - 1))
}
