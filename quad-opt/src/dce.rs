//! Per-lane dead-code elimination.
//!
//! A forward walk records, for every temp (or name) lane, whether the value
//! most recently written there has been consumed. Writes that are provably
//! never read lose the corresponding lane from their write mask; an
//! instruction whose mask empties out is dropped entirely, handing its
//! end-of-program flag to the last survivor.

use quad_asm::{Bank, Instruction, Opcode, Program, LANE_COUNT};

use crate::tables::temp_index_bound;

#[derive(Clone, Default)]
struct LaneState {
    written: [bool; LANE_COUNT],
    read: [bool; LANE_COUNT],
    writer: [usize; LANE_COUNT],
}

/// Opcodes that survive even with a dead (or absent) result. `cmpkil`
/// writes a result but also raises the kill flag.
fn never_removable(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(opcode, Nop | End | Kil | Kls | Zxp | Zxs | Chs | Jmp | Cmpkil)
}

/// One round of dead-code elimination.
///
/// Returns the rewritten program and whether anything was removed; the
/// driver iterates until this reports no change.
pub fn dead_code_elimination(program: &[Instruction], names_used: u32) -> (Program, bool) {
    let bound = temp_index_bound(program, names_used as usize + 1);
    let mut state: Vec<LaneState> = vec![LaneState::default(); bound];
    let mut remove: Vec<[bool; LANE_COUNT]> = vec![[false; LANE_COUNT]; program.len()];

    for (index, instr) in program.iter().enumerate() {
        match instr.opcode() {
            Opcode::Nop | Opcode::End | Opcode::Chs | Opcode::Flr => continue,
            _ => {}
        }

        let reads = instr.read_components();
        for slot in 0..instr.opcode().operand_arity() {
            let op = instr.op(slot);
            if op.bank != Bank::Temp {
                continue;
            }
            let positions = if slot == 1 { &reads.op2 } else { &reads.op1 };
            let lanes = op.swizzle.lanes();
            for &position in positions {
                state[op.reg as usize].read[lanes[position]] = true;
            }
        }

        // Output and address registers have unknown consumers; only temp
        // writes participate in removal.
        if instr.writes_result() && instr.dest().bank == Bank::Temp {
            let reg = instr.dest().reg as usize;
            for lane in instr.dest().mask.written_lanes() {
                let overwritten = state[reg].written[lane] && !state[reg].read[lane];
                if overwritten {
                    let writer = state[reg].writer[lane];
                    remove[writer][lane] =
                        !instr.is_predicated() && !program[writer].is_predicated();
                }

                state[reg].written[lane] = true;
                // A predicated write may leave the previous value visible.
                state[reg].read[lane] = instr.is_predicated() && state[reg].read[lane];
                state[reg].writer[lane] = index;
            }
        }
    }

    // Values still unread at end of program are dead as well.
    for lane_state in &state {
        for lane in 0..LANE_COUNT {
            if lane_state.written[lane] && !lane_state.read[lane] {
                remove[lane_state.writer[lane]][lane] = true;
            }
        }
    }

    let mut out = Program::with_capacity(program.len());
    let mut changed = false;

    for (index, instr) in program.iter().enumerate() {
        if never_removable(instr.opcode()) {
            out.push(*instr);
            continue;
        }
        if instr.opcode().is_not_implemented() {
            tracing::warn!(instr = index, "dropping unimplemented opcode flr");
            continue;
        }

        let new_mask = instr.dest().mask.without_lanes(remove[index]);

        if !new_mask.is_empty() {
            changed |= new_mask != instr.dest().mask;
            out.push(instr.with_write_mask(new_mask));
            continue;
        }

        if instr.is_end() {
            match out.last_mut() {
                Some(last) => {
                    *last = last.with_end_flag(true);
                    changed |= new_mask != instr.dest().mask;
                }
                None => {
                    // The program must keep exactly one end-marked
                    // instruction; the last one is not removable.
                    tracing::warn!(
                        "dead-code elimination reduced the program to its end instruction"
                    );
                    out.push(*instr);
                }
            }
        } else {
            changed |= new_mask != instr.dest().mask;
        }
    }

    (out, changed)
}
