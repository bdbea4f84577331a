//! Program-level decode/encode and whole-program queries.

use crate::consts::MAX_TEMPORAL_REGISTERS;
use crate::encoding::{DecodeError, EncodeError};
use crate::instruction::{Bank, Instruction};
use crate::opcode::Opcode;

/// An ordered, straight-line sequence of instructions.
pub type Program = Vec<Instruction>;

/// Decode a binary program.
///
/// Returns the decoded instruction sequence, the number of distinct temporary
/// registers the program touches, and whether the program contains jump
/// instructions (which disable optimization).
pub fn decode_program(bytes: &[u8]) -> Result<(Program, u32, bool), DecodeError> {
    if bytes.len() % Instruction::SIZE != 0 {
        return Err(DecodeError::TruncatedProgram(bytes.len()));
    }

    let mut program = Program::with_capacity(bytes.len() / Instruction::SIZE);
    let mut used_temps = [false; MAX_TEMPORAL_REGISTERS];
    let mut extra_temps = 0u32;
    let mut has_jumps = false;

    for chunk in bytes.chunks_exact(Instruction::SIZE) {
        let raw: &[u8; Instruction::SIZE] = chunk.try_into().expect("exact chunk");
        let instr = Instruction::from_bytes(raw)?;

        for op in instr.operands() {
            if op.bank == Bank::Temp {
                mark_temp(&mut used_temps, &mut extra_temps, op.reg as usize);
            }
        }
        if instr.writes_result() && instr.dest().bank == Bank::Temp {
            mark_temp(&mut used_temps, &mut extra_temps, instr.dest().reg as usize);
        }

        has_jumps |= instr.opcode() == Opcode::Jmp;
        program.push(instr);
    }

    let in_range = used_temps.iter().filter(|&&used| used).count() as u32;
    Ok((program, in_range + extra_temps, has_jumps))
}

fn mark_temp(used: &mut [bool; MAX_TEMPORAL_REGISTERS], extra: &mut u32, reg: usize) {
    match used.get_mut(reg) {
        Some(slot) => *slot = true,
        // Ids beyond the architectural range are counted per sighting.
        None => *extra += 1,
    }
}

/// Encode a program into its binary form, 16 bytes per instruction.
pub fn encode_program(program: &[Instruction]) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::with_capacity(program.len() * Instruction::SIZE);
    for instr in program {
        bytes.extend_from_slice(&instr.to_bytes()?);
    }
    Ok(bytes)
}

/// Whether any instruction of the program forces early-z to be disabled.
pub fn requires_early_z_disable(program: &[Instruction]) -> bool {
    program
        .iter()
        .any(|instr| instr.opcode().must_disable_early_z())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Dest, Operand};
    use crate::mask::WriteMask;

    #[test]
    fn decode_rejects_partial_instructions() {
        assert_eq!(
            decode_program(&[0u8; 20]),
            Err(DecodeError::TruncatedProgram(20))
        );
    }

    #[test]
    fn decode_counts_distinct_temps_and_jumps() {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 1), Operand::reg(Bank::Const, 0)),
            Instruction::new(Opcode::Add)
                .with_op1(Operand::reg(Bank::Temp, 1))
                .with_op2(Operand::reg(Bank::Temp, 1))
                .with_dest(Dest::masked(Bank::Temp, 2, WriteMask::X)),
            Instruction::mov(Dest::reg(Bank::Output, 0), Operand::reg(Bank::Temp, 2))
                .with_end_flag(true),
        ];
        let bytes = encode_program(&program).unwrap();
        let (decoded, temps, jumps) = decode_program(&bytes).unwrap();
        assert_eq!(decoded, program);
        assert_eq!(temps, 2);
        assert!(!jumps);

        let with_jump = vec![
            Instruction::new(Opcode::Jmp).with_op1(Operand::reg(Bank::Const, 0)),
            Instruction::new(Opcode::End).with_end_flag(true),
        ];
        let bytes = encode_program(&with_jump).unwrap();
        let (_, _, jumps) = decode_program(&bytes).unwrap();
        assert!(jumps);
    }

    #[test]
    fn early_z_flag_follows_kill_family() {
        let plain = vec![Instruction::new(Opcode::End).with_end_flag(true)];
        assert!(!requires_early_z_disable(&plain));

        let killing = vec![
            Instruction::new(Opcode::Kil).with_op1(Operand::reg(Bank::Temp, 0)),
            Instruction::new(Opcode::End).with_end_flag(true),
        ];
        assert!(requires_early_z_disable(&killing));
    }
}
