//! SIMD4→scalar lowering.
//!
//! Splits vector instructions into independent single-lane fragments for
//! targets with a scalar execution pipeline. Dot products become a
//! multiply/multiply-add chain against one accumulator lane; scalar
//! computations execute once and broadcast through copies.

use quad_asm::{Bank, Dest, Instruction, Opcode, Operand, Program, Swizzle};

use crate::error::OptError;
use crate::params::ArchParams;
use crate::tables::TempUse;

/// Broadcast of the source lane an operand selects at one swizzle position.
fn broadcast_at(op: &Operand, position: usize) -> Swizzle {
    Swizzle::broadcast(op.swizzle.lane(position))
}

fn scalarize_dot_product(
    instr: &Instruction,
    temp_use: &mut TempUse,
    out: &mut Program,
) -> Result<(), OptError> {
    let components = instr.dest().mask.components();
    if components.is_empty() {
        out.push(*instr);
        return Ok(());
    }

    let (first_mask, first_swz) = components[0];

    // The chain accumulates into the destination itself unless that is an
    // output register, which cannot be read back.
    let to_output = instr.dest().bank == Bank::Output;
    let (acc_bank, acc_reg) = if to_output {
        let temp = temp_use
            .claim_lowest_free()
            .ok_or(OptError::NoScratchTemp)?;
        (Bank::Temp, temp)
    } else {
        (instr.dest().bank, instr.dest().reg)
    };
    let acc_dest = Dest::masked(acc_bank, acc_reg, first_mask);
    let acc_read = Operand::swizzled(acc_bank, acc_reg, first_swz);

    let chain = |opcode: Opcode, position: usize, third: Operand, dest: Dest| {
        Instruction::new(opcode)
            .with_op1(instr.op(0).with_swizzle(broadcast_at(instr.op(0), position)))
            .with_op2(instr.op(1).with_swizzle(broadcast_at(instr.op(1), position)))
            .with_op3(third)
            .with_dest(dest)
            .with_predicate(*instr.predicate())
            .with_rel_addr(*instr.rel_addr())
    };

    // dph folds op2.w into the leading multiply-add; dp3/dp4 start with a
    // plain multiply.
    if instr.opcode() == Opcode::Dph {
        out.push(chain(
            Opcode::Mad,
            0,
            instr.op(1).with_swizzle(broadcast_at(instr.op(1), 3)),
            acc_dest,
        ));
    } else {
        let mul = Instruction::new(Opcode::Mul)
            .with_op1(instr.op(0).with_swizzle(broadcast_at(instr.op(0), 0)))
            .with_op2(instr.op(1).with_swizzle(broadcast_at(instr.op(1), 0)))
            .with_dest(acc_dest)
            .with_predicate(*instr.predicate())
            .with_rel_addr(*instr.rel_addr());
        out.push(mul);
    }

    out.push(chain(Opcode::Mad, 1, acc_read, acc_dest));
    if instr.opcode() == Opcode::Dp4 {
        out.push(chain(Opcode::Mad, 2, acc_read, acc_dest));
    }

    // Trailing multiply-add: carries the saturate flag and, when the
    // destination is readable, writes it directly.
    let last_position = if instr.opcode() == Opcode::Dp4 { 3 } else { 2 };
    let final_dest = if to_output {
        Dest {
            saturate: instr.dest().saturate,
            ..acc_dest
        }
    } else {
        Dest {
            bank: instr.dest().bank,
            reg: instr.dest().reg,
            mask: first_mask,
            saturate: instr.dest().saturate,
        }
    };
    out.push(chain(Opcode::Mad, last_position, acc_read, final_dest));

    // Replicate the scalar into the remaining written lanes; for an output
    // destination every written lane is copied from the accumulator.
    let replicated = if to_output {
        &components[..]
    } else {
        &components[1..]
    };
    for &(lane_mask, _) in replicated {
        out.push(
            Instruction::mov(
                Dest::masked(instr.dest().bank, instr.dest().reg, lane_mask),
                acc_read,
            )
            .with_predicate(*instr.predicate())
            .with_rel_addr(*instr.rel_addr()),
        );
    }

    if to_output {
        temp_use.release(acc_reg);
    }
    Ok(())
}

fn scalarize_element_wise(instr: &Instruction, out: &mut Program) {
    let components = instr.dest().mask.components();
    if components.is_empty() {
        out.push(*instr);
        return;
    }
    let reads = instr.read_components();

    for (index, &(lane_mask, _)) in components.iter().enumerate() {
        let p1 = reads.op1[index];
        let p2 = reads.op2.get(index).copied().unwrap_or(p1);
        out.push(instr.with_scalar_shape(
            [
                broadcast_at(instr.op(0), p1),
                broadcast_at(instr.op(1), p2),
                broadcast_at(instr.op(2), p1),
            ],
            lane_mask,
        ));
    }
}

fn scalarize_scalar_compute(instr: &Instruction, out: &mut Program) {
    let components = instr.dest().mask.components();
    if components.is_empty() {
        out.push(*instr);
        return;
    }
    let reads = instr.read_components();
    let (first_mask, first_swz) = components[0];

    let p1 = reads.op1[0];
    out.push(instr.with_scalar_shape(
        [
            broadcast_at(instr.op(0), p1),
            broadcast_at(instr.op(1), reads.op2.first().copied().unwrap_or(p1)),
            broadcast_at(instr.op(2), p1),
        ],
        first_mask,
    ));

    for &(lane_mask, _) in &components[1..] {
        out.push(
            Instruction::mov(
                Dest::masked(instr.dest().bank, instr.dest().reg, lane_mask),
                Operand::swizzled(instr.dest().bank, instr.dest().reg, first_swz),
            )
            .with_predicate(*instr.predicate())
            .with_rel_addr(*instr.rel_addr()),
        );
    }
}

/// Lower vector instructions to scalar form.
///
/// Instructions that are inherently scalar, read no lanes, or produce a
/// SIMD4 result pass through unchanged; afterwards no other instruction
/// writes more than one result lane.
pub fn simd4_to_scalar(program: &[Instruction], params: &ArchParams) -> Result<Program, OptError> {
    let mut temp_use = TempUse::new(program, params);
    let mut out = Program::with_capacity(program.len() * 2);

    for (index, instr) in program.iter().enumerate() {
        temp_use.update(index, instr)?;
        let emitted_from = out.len();

        match instr.opcode() {
            // Unaffected by the conversion: no result lanes to split, or a
            // SIMD4 result the execution units complete over multiple
            // cycles.
            Opcode::Nop
            | Opcode::End
            | Opcode::Tex
            | Opcode::Txb
            | Opcode::Txl
            | Opcode::Txp
            | Opcode::Lda
            | Opcode::Kil
            | Opcode::Kls
            | Opcode::Zxp
            | Opcode::Zxs
            | Opcode::Chs
            | Opcode::Jmp
            | Opcode::Setpeq
            | Opcode::Setpgt
            | Opcode::Setplt
            | Opcode::Andp
            | Opcode::Stpeqi
            | Opcode::Stpgti
            | Opcode::Stplti
            | Opcode::Dst
            | Opcode::Exp
            | Opcode::Lit
            | Opcode::Log => out.push(*instr),

            Opcode::Flr => {
                tracing::warn!(instr = index, "dropping unimplemented opcode flr");
            }

            Opcode::Dp3 | Opcode::Dp4 | Opcode::Dph => {
                scalarize_dot_product(instr, &mut temp_use, &mut out)?;
            }

            Opcode::Ex2 | Opcode::Frc | Opcode::Lg2 | Opcode::Rcp | Opcode::Rsq
            | Opcode::Cos | Opcode::Sin => {
                scalarize_scalar_compute(instr, &mut out);
            }

            _ => scalarize_element_wise(instr, &mut out),
        }

        // End flag lands on the last fragment of the expansion.
        if instr.is_end() && out.len() > emitted_from {
            let last = out.len() - 1;
            out[last] = out[last].with_end_flag(true);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quad_asm::WriteMask;
    use test_case::test_case;

    fn params() -> ArchParams {
        ArchParams::default()
    }

    #[test_case(Opcode::Dp3, &[Opcode::Mul, Opcode::Mad, Opcode::Mad] ; "dp3")]
    #[test_case(Opcode::Dp4, &[Opcode::Mul, Opcode::Mad, Opcode::Mad, Opcode::Mad] ; "dp4")]
    #[test_case(Opcode::Dph, &[Opcode::Mad, Opcode::Mad, Opcode::Mad] ; "dph")]
    fn dot_product_chain_shape(op: Opcode, chain: &[Opcode]) {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::new(op)
                .with_op1(Operand::reg(Bank::Temp, 0))
                .with_op2(Operand::reg(Bank::Const, 1))
                .with_dest(Dest::masked(Bank::Temp, 1, WriteMask::X))
                .with_end_flag(true),
        ];
        let out = simd4_to_scalar(&program, &params()).unwrap();
        let emitted: Vec<Opcode> = out[4..].iter().map(|instr| instr.opcode()).collect();
        assert_eq!(emitted, chain);
        assert!(out.last().unwrap().is_end());
    }

    #[test]
    fn element_wise_ops_split_per_lane() {
        let program = vec![Instruction::new(Opcode::Add)
            .with_op1(Operand::swizzled(Bank::Temp, 0, Swizzle::from_lanes([3, 2, 1, 0])))
            .with_op2(Operand::reg(Bank::Const, 2))
            .with_dest(Dest::masked(Bank::Temp, 1, WriteMask::X | WriteMask::Z))
            .with_end_flag(true)];
        let out = simd4_to_scalar(&program, &params()).unwrap();
        assert_eq!(out.len(), 2);

        assert_eq!(out[0].dest().mask, WriteMask::X);
        assert_eq!(out[0].op(0).swizzle, Swizzle::WWWW);
        assert_eq!(out[0].op(1).swizzle, Swizzle::XXXX);
        assert!(!out[0].is_end());

        assert_eq!(out[1].dest().mask, WriteMask::Z);
        assert_eq!(out[1].op(0).swizzle, Swizzle::YYYY);
        assert_eq!(out[1].op(1).swizzle, Swizzle::ZZZZ);
        assert!(out[1].is_end());
    }

    #[test]
    fn dp3_becomes_mul_and_two_mads() {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::new(Opcode::Dp3)
                .with_op1(Operand::reg(Bank::Temp, 0))
                .with_op2(Operand::reg(Bank::Const, 1))
                .with_dest(Dest::masked(Bank::Temp, 1, WriteMask::X))
                .with_end_flag(true),
        ];
        let out = simd4_to_scalar(&program, &params()).unwrap();
        // 4 fragments for the mov, then mul + 2 mads.
        assert_eq!(out.len(), 7);
        assert_eq!(out[4].opcode(), Opcode::Mul);
        assert_eq!(out[5].opcode(), Opcode::Mad);
        assert_eq!(out[6].opcode(), Opcode::Mad);
        for (fragment, lane) in out[4..].iter().zip([Swizzle::XXXX, Swizzle::YYYY, Swizzle::ZZZZ])
        {
            assert_eq!(fragment.op(0).swizzle, lane);
            assert_eq!(fragment.dest().mask, WriteMask::X);
            assert_eq!(fragment.dest().reg, 1);
        }
        // Accumulator feeds the multiply-adds through the written lane.
        assert_eq!(out[5].op(2).reg, 1);
        assert_eq!(out[5].op(2).swizzle, Swizzle::XXXX);
        assert!(out[6].is_end());
    }

    #[test]
    fn dp4_to_output_accumulates_in_a_temp() {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::new(Opcode::Dp4)
                .with_op1(Operand::reg(Bank::Temp, 0))
                .with_op2(Operand::reg(Bank::Const, 1))
                .with_dest(Dest::masked(Bank::Output, 0, WriteMask::X | WriteMask::Y).saturated())
                .with_end_flag(true),
        ];
        let out = simd4_to_scalar(&program, &params()).unwrap();
        // mov fragments, mul + 3 mads into the temp, two copies out.
        assert_eq!(out.len(), 10);

        let chain = &out[4..8];
        assert_eq!(chain[0].opcode(), Opcode::Mul);
        for mad in &chain[1..] {
            assert_eq!(mad.opcode(), Opcode::Mad);
            assert_eq!(mad.dest().bank, Bank::Temp);
            assert_eq!(mad.dest().reg, 1);
        }
        // Only the trailing multiply-add saturates.
        assert!(!chain[2].dest().saturate);
        assert!(chain[3].dest().saturate);

        let copies = &out[8..];
        assert_eq!(copies[0].opcode(), Opcode::Mov);
        assert_eq!(copies[0].dest().bank, Bank::Output);
        assert_eq!(copies[0].dest().mask, WriteMask::X);
        assert_eq!(copies[1].dest().mask, WriteMask::Y);
        assert_eq!(copies[0].op(0).bank, Bank::Temp);
        assert!(copies[1].is_end());
    }

    #[test]
    fn dph_folds_the_w_lane_into_the_first_mad() {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::new(Opcode::Dph)
                .with_op1(Operand::reg(Bank::Temp, 0))
                .with_op2(Operand::reg(Bank::Const, 1))
                .with_dest(Dest::masked(Bank::Temp, 1, WriteMask::W))
                .with_end_flag(true),
        ];
        let out = simd4_to_scalar(&program, &params()).unwrap();
        assert_eq!(out.len(), 7);
        let first = &out[4];
        assert_eq!(first.opcode(), Opcode::Mad);
        assert_eq!(first.op(0).swizzle, Swizzle::XXXX);
        assert_eq!(first.op(1).swizzle, Swizzle::XXXX);
        assert_eq!(first.op(2).swizzle, Swizzle::WWWW);
        assert_eq!(first.op(2).bank, Bank::Const);
    }

    #[test]
    fn scalar_compute_runs_once_then_broadcasts() {
        let program = vec![
            Instruction::mov(Dest::reg(Bank::Temp, 0), Operand::reg(Bank::Const, 0)),
            Instruction::new(Opcode::Rcp)
                .with_op1(Operand::swizzled(Bank::Temp, 0, Swizzle::WWWW))
                .with_dest(Dest::masked(Bank::Temp, 1, WriteMask::X | WriteMask::Y | WriteMask::Z))
                .with_end_flag(true),
        ];
        let out = simd4_to_scalar(&program, &params()).unwrap();
        assert_eq!(out.len(), 7);
        assert_eq!(out[4].opcode(), Opcode::Rcp);
        assert_eq!(out[4].dest().mask, WriteMask::X);
        assert_eq!(out[5].opcode(), Opcode::Mov);
        assert_eq!(out[5].dest().mask, WriteMask::Y);
        assert_eq!(out[5].op(0).swizzle, Swizzle::XXXX);
        assert_eq!(out[6].dest().mask, WriteMask::Z);
        assert!(out[6].is_end());
    }

    #[test]
    fn pass_through_set_is_untouched() {
        let program = vec![
            Instruction::new(Opcode::Lit)
                .with_op1(Operand::reg(Bank::Const, 0))
                .with_dest(Dest::reg(Bank::Temp, 0)),
            Instruction::new(Opcode::Tex)
                .with_op1(Operand::reg(Bank::Temp, 0))
                .with_op2(Operand::reg(Bank::Sampler, 0))
                .with_dest(Dest::reg(Bank::Temp, 1)),
            Instruction::new(Opcode::End).with_end_flag(true),
        ];
        let out = simd4_to_scalar(&program, &params()).unwrap();
        assert_eq!(out, program);
    }

    #[test]
    fn idempotent_on_single_lane_programs() {
        let program = vec![
            Instruction::mov(Dest::masked(Bank::Temp, 0, WriteMask::X), Operand::reg(Bank::Const, 0)),
            Instruction::new(Opcode::Mul)
                .with_op1(Operand::swizzled(Bank::Temp, 0, Swizzle::XXXX))
                .with_op2(Operand::swizzled(Bank::Const, 1, Swizzle::XXXX))
                .with_dest(Dest::masked(Bank::Output, 0, WriteMask::X))
                .with_end_flag(true),
        ];
        let once = simd4_to_scalar(&program, &params()).unwrap();
        let twice = simd4_to_scalar(&once, &params()).unwrap();
        assert_eq!(once, twice);
    }
}
