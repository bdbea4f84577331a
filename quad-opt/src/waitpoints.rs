//! Wait-point assignment.
//!
//! Texture samples and attribute loads retire asynchronously. Any
//! instruction consuming a lane still pending from such a load (or writing
//! over the destination register of one) requires the *previous* instruction
//! to be flagged as a wait point; a wait point retires every outstanding
//! load at once.

use quad_asm::{Bank, Instruction, Opcode, Program, LANE_COUNT};

use crate::params::ArchParams;
use crate::tables::temp_index_bound;

/// Flag the instructions after which pending loads must have retired.
pub fn assign_wait_points(program: &[Instruction], params: &ArchParams) -> Program {
    let bound = temp_index_bound(program, params.temp_registers);
    let mut pending = vec![[false; LANE_COUNT]; bound];
    let mut out = Program::with_capacity(program.len());

    for instr in program {
        let mut wait = false;

        match instr.opcode() {
            Opcode::Nop | Opcode::End | Opcode::Chs | Opcode::Flr => {}
            _ => {
                let reads = instr.read_components();
                for slot in 0..instr.opcode().operand_arity() {
                    let op = instr.op(slot);
                    if op.bank != Bank::Temp {
                        continue;
                    }
                    let positions = if slot == 1 { &reads.op2 } else { &reads.op1 };
                    let lanes = op.swizzle.lanes();
                    for &position in positions {
                        wait |= pending[op.reg as usize][lanes[position]];
                    }
                }

                // A write over any pending lane of the destination register
                // is a write-after-write hazard with the load.
                if instr.dest().bank == Bank::Temp {
                    for lane in 0..LANE_COUNT {
                        wait |= pending[instr.dest().reg as usize][lane];
                    }
                }

                if wait {
                    if let Some(last) = out.last_mut() {
                        *last = last.with_wait_point();
                    }
                    for lanes in pending.iter_mut() {
                        *lanes = [false; LANE_COUNT];
                    }
                }

                if instr.opcode().is_load() && instr.dest().bank == Bank::Temp {
                    for lane in instr.dest().mask.written_lanes() {
                        pending[instr.dest().reg as usize][lane] = true;
                    }
                }
            }
        }

        out.push(*instr);
    }

    out
}
