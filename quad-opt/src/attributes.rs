//! Attribute→load conversion.
//!
//! Most instructions may not read the input attribute bank directly; only
//! `lda` (and `mov`, which this pass rewrites) may. Every attribute read is
//! materialized into a temporary register through an explicit `lda`, and
//! repeated reads of the same attribute reuse the first load.

use quad_asm::consts::INDEX_ATTRIBUTE;
use quad_asm::{Bank, Dest, Instruction, Opcode, Operand, Program, RegId, Swizzle};

use crate::error::OptError;
use crate::params::ArchParams;
use crate::tables::{checked_temp_use, TempUse};

/// Attribute-id to temporary-register bindings created by the pass.
struct AttributeLoads {
    bindings: Vec<Option<RegId>>,
}

impl AttributeLoads {
    fn new(program: &[Instruction], params: &ArchParams) -> Self {
        let mut bound = params.input_attributes;
        for instr in program {
            for op in instr.operands() {
                if op.bank == Bank::Input {
                    bound = bound.max(op.reg as usize + 1);
                }
            }
        }
        AttributeLoads {
            bindings: vec![None; bound],
        }
    }

    fn get(&self, attribute: RegId) -> Option<RegId> {
        self.bindings[attribute as usize]
    }

    fn bind(&mut self, attribute: RegId, temp: RegId) {
        self.bindings[attribute as usize] = Some(temp);
    }
}

/// The synthesized attribute load: `lda temp.xyzw <- in[index].x, tex[attr]`.
fn load_attribute(attribute: RegId, dest: Dest) -> Instruction {
    Instruction::new(Opcode::Lda)
        .with_op1(Operand::swizzled(Bank::Input, INDEX_ATTRIBUTE, Swizzle::XXXX))
        .with_op2(Operand::reg(Bank::Texture, attribute))
        .with_dest(dest)
}

fn take_free_temp(temp_use: &mut TempUse, attribute: RegId) -> Result<RegId, OptError> {
    temp_use
        .claim_lowest_free()
        .ok_or(OptError::NoFreeTemp { attribute })
}

/// Rewrite every read of an input attribute register into a read of a
/// temporary loaded by a preceding `lda`.
pub fn attributes_to_loads(
    program: &[Instruction],
    params: &ArchParams,
) -> Result<Program, OptError> {
    let mut temp_use = checked_temp_use(program, params)?;
    let mut loads = AttributeLoads::new(program, params);
    let mut out = Program::with_capacity(program.len());

    for instr in program {
        let is_attr_mov = instr.opcode() == Opcode::Mov && instr.op(0).bank == Bank::Input;

        if is_attr_mov {
            let src = *instr.op(0);
            if let Some(temp) = loads.get(src.reg) {
                out.push(instr.with_operand_regs([
                    (Bank::Temp, temp),
                    (instr.op(1).bank, instr.op(1).reg),
                    (instr.op(2).bank, instr.op(2).reg),
                ]));
            } else if !src.has_modifier() && src.swizzle == Swizzle::XYZW {
                // The unmodified copy itself becomes the load.
                out.push(
                    load_attribute(src.reg, *instr.dest())
                        .with_end_flag(instr.is_end()),
                );
            } else {
                let temp = take_free_temp(&mut temp_use, src.reg)?;
                loads.bind(src.reg, temp);
                out.push(load_attribute(src.reg, Dest::reg(Bank::Temp, temp)));
                out.push(instr.with_operand_regs([
                    (Bank::Temp, temp),
                    (instr.op(1).bank, instr.op(1).reg),
                    (instr.op(2).bank, instr.op(2).reg),
                ]));
            }
            continue;
        }

        let mut regs = [
            (instr.op(0).bank, instr.op(0).reg),
            (instr.op(1).bank, instr.op(1).reg),
            (instr.op(2).bank, instr.op(2).reg),
        ];
        let mut patched = false;

        for slot in 0..instr.opcode().operand_arity() {
            if regs[slot].0 != Bank::Input {
                continue;
            }
            let attribute = regs[slot].1;
            let temp = match loads.get(attribute) {
                Some(temp) => temp,
                None => {
                    let temp = take_free_temp(&mut temp_use, attribute)?;
                    loads.bind(attribute, temp);
                    out.push(load_attribute(attribute, Dest::reg(Bank::Temp, temp)));
                    temp
                }
            };
            regs[slot] = (Bank::Temp, temp);
            patched = true;
        }

        if patched {
            out.push(instr.with_operand_regs(regs));
        } else {
            out.push(*instr);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quad_asm::WriteMask;

    fn params() -> ArchParams {
        ArchParams::default()
    }

    #[test]
    fn unmodified_mov_becomes_the_load() {
        let program = vec![Instruction::mov(
            Dest::reg(Bank::Temp, 0),
            Operand::reg(Bank::Input, 3),
        )
        .with_end_flag(true)];
        let out = attributes_to_loads(&program, &params()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].opcode(), Opcode::Lda);
        assert_eq!(out[0].op(1).bank, Bank::Texture);
        assert_eq!(out[0].op(1).reg, 3);
        assert_eq!(out[0].dest().reg, 0);
        assert!(out[0].is_end());
    }

    #[test]
    fn modified_mov_loads_into_a_fresh_temp() {
        let program = vec![Instruction::mov(
            Dest::reg(Bank::Temp, 0),
            Operand::swizzled(Bank::Input, 3, Swizzle::WWWW).negated(),
        )
        .with_end_flag(true)];
        let out = attributes_to_loads(&program, &params()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].opcode(), Opcode::Lda);
        // Temp 0 is written by the program; the load takes the next free one.
        assert_eq!(out[0].dest().reg, 1);
        assert_eq!(out[1].opcode(), Opcode::Mov);
        assert_eq!(out[1].op(0).bank, Bank::Temp);
        assert_eq!(out[1].op(0).reg, 1);
        assert!(out[1].op(0).negate);
        assert!(out[1].is_end());
    }

    #[test]
    fn repeated_reads_reuse_the_binding() {
        let program = vec![
            Instruction::new(Opcode::Add)
                .with_op1(Operand::reg(Bank::Input, 7))
                .with_op2(Operand::reg(Bank::Const, 0))
                .with_dest(Dest::reg(Bank::Temp, 0)),
            Instruction::new(Opcode::Mul)
                .with_op1(Operand::reg(Bank::Input, 7))
                .with_op2(Operand::reg(Bank::Temp, 0))
                .with_dest(Dest::reg(Bank::Output, 0))
                .with_end_flag(true),
        ];
        let out = attributes_to_loads(&program, &params()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].opcode(), Opcode::Lda);
        let temp = out[0].dest().reg;
        assert_eq!(out[1].op(0).bank, Bank::Temp);
        assert_eq!(out[1].op(0).reg, temp);
        assert_eq!(out[2].op(0).bank, Bank::Temp);
        assert_eq!(out[2].op(0).reg, temp);
    }

    #[test]
    fn both_operands_of_one_instruction_are_materialized() {
        let program = vec![Instruction::new(Opcode::Mul)
            .with_op1(Operand::reg(Bank::Input, 1))
            .with_op2(Operand::reg(Bank::Input, 2))
            .with_dest(Dest::reg(Bank::Output, 0))
            .with_end_flag(true)];
        let out = attributes_to_loads(&program, &params()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].opcode(), Opcode::Lda);
        assert_eq!(out[1].opcode(), Opcode::Lda);
        assert_ne!(out[0].dest().reg, out[1].dest().reg);
        assert_eq!(out[2].op(0).reg, out[0].dest().reg);
        assert_eq!(out[2].op(1).reg, out[1].dest().reg);
    }

    #[test]
    fn attribute_free_program_is_unchanged() {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::mov(Dest::reg(Bank::Output, 0), Operand::reg(Bank::Temp, 0))
                .with_end_flag(true),
        ];
        let out = attributes_to_loads(&program, &params()).unwrap();
        assert_eq!(out, program);
    }

    #[test]
    fn exhaustion_is_fatal() {
        let tight = ArchParams::default().with_temp_registers(1);
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::new(Opcode::Add)
                .with_op1(Operand::reg(Bank::Input, 0))
                .with_op2(Operand::reg(Bank::Temp, 0))
                .with_dest(Dest::masked(Bank::Output, 0, WriteMask::all()))
                .with_end_flag(true),
        ];
        assert_eq!(
            attributes_to_loads(&program, &tight),
            Err(OptError::NoFreeTemp { attribute: 0 })
        );
    }
}
