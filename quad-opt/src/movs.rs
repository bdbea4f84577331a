//! Removal of identity copies left behind by allocation.

use quad_asm::{Bank, Instruction, Opcode, Program};

/// Whether the instruction copies register lanes onto themselves.
fn is_identity_copy(instr: &Instruction) -> bool {
    if instr.opcode() != Opcode::Mov {
        return false;
    }
    // A saturating copy is a clamp operation, not a plain move.
    if instr.dest().saturate {
        return false;
    }
    let src = instr.op(0);
    if src.bank != Bank::Temp || src.has_modifier() {
        return false;
    }
    if instr.dest().bank != Bank::Temp || instr.dest().reg != src.reg {
        return false;
    }

    let reads = instr.read_components();
    let lanes = src.swizzle.lanes();
    reads
        .op1
        .iter()
        .zip(instr.dest().mask.written_lanes())
        .all(|(&position, written_lane)| lanes[position] == written_lane)
}

/// Drop every `mov` whose source and destination resolve to the same
/// register lanes.
pub fn remove_redundant_movs(program: &[Instruction]) -> Program {
    let mut out = Program::with_capacity(program.len());
    for instr in program {
        if is_identity_copy(instr) {
            if instr.is_end() {
                match out.last_mut() {
                    Some(last) => *last = last.with_end_flag(true),
                    None => tracing::warn!("identity copy was the whole program"),
                }
            }
            continue;
        }
        out.push(*instr);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quad_asm::{Dest, Operand, Swizzle, WriteMask};

    #[test]
    fn identity_self_copy_is_removed() {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::mov(
                Dest::masked(Bank::Temp, 0, WriteMask::X | WriteMask::Y),
                Operand::reg(Bank::Temp, 0),
            ),
            Instruction::mov(Dest::reg(Bank::Output, 0), Operand::reg(Bank::Temp, 0))
                .with_end_flag(true),
        ];
        let out = remove_redundant_movs(&program);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn lane_moving_copy_is_kept() {
        let program = vec![Instruction::mov(
            Dest::masked(Bank::Temp, 0, WriteMask::Y),
            Operand::swizzled(Bank::Temp, 0, Swizzle::XXXX),
        )];
        assert_eq!(remove_redundant_movs(&program).len(), 1);
    }

    #[test]
    fn modifier_and_saturate_copies_are_kept() {
        let program = vec![
            Instruction::mov(
                Dest::reg(Bank::Temp, 0),
                Operand::reg(Bank::Temp, 0).negated(),
            ),
            Instruction::mov(
                Dest::reg(Bank::Temp, 0).saturated(),
                Operand::reg(Bank::Temp, 0),
            ),
            Instruction::mov(Dest::reg(Bank::Temp, 1), Operand::reg(Bank::Temp, 0)),
        ];
        assert_eq!(remove_redundant_movs(&program).len(), 3);
    }

    #[test]
    fn end_flag_transfers_from_a_removed_copy() {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Temp, 0))
                .with_end_flag(true),
        ];
        let out = remove_redundant_movs(&program);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_end());
    }

    #[test]
    fn removal_is_idempotent() {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Temp, 0)),
            Instruction::mov(Dest::reg(Bank::Output, 0), Operand::reg(Bank::Temp, 0))
                .with_end_flag(true),
        ];
        let once = remove_redundant_movs(&program);
        assert_eq!(remove_redundant_movs(&once), once);
    }
}
