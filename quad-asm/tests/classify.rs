use quad_asm::*;
use rstest::rstest;

#[rstest]
#[case(Opcode::Dp3, true, false, false)]
#[case(Opcode::Dp4, true, false, false)]
#[case(Opcode::Dph, true, false, false)]
#[case(Opcode::Rsq, true, false, false)]
#[case(Opcode::Sin, true, false, false)]
#[case(Opcode::Add, false, true, false)]
#[case(Opcode::Mov, false, true, false)]
#[case(Opcode::Cmpkil, false, true, false)]
#[case(Opcode::Muli, false, true, false)]
#[case(Opcode::Dst, false, false, true)]
#[case(Opcode::Lit, false, false, true)]
#[case(Opcode::Lda, false, false, true)]
#[case(Opcode::Tex, false, false, true)]
#[case(Opcode::Txp, false, false, true)]
fn result_shape(
    #[case] op: Opcode,
    #[case] scalar: bool,
    #[case] vector: bool,
    #[case] simd4: bool,
) {
    assert_eq!(op.has_scalar_broadcast_result(), scalar);
    assert_eq!(op.is_vector_op(), vector);
    assert_eq!(op.has_simd4_result(), simd4);
}

#[rstest]
#[case(Opcode::Kil, true)]
#[case(Opcode::Kls, true)]
#[case(Opcode::Zxp, true)]
#[case(Opcode::Zxs, true)]
#[case(Opcode::Tex, false)]
#[case(Opcode::Cmpkil, false)]
fn early_z(#[case] op: Opcode, #[case] disables: bool) {
    assert_eq!(op.must_disable_early_z(), disables);
}

#[rstest]
#[case(Opcode::Tex, true)]
#[case(Opcode::Txb, true)]
#[case(Opcode::Txl, true)]
#[case(Opcode::Txp, true)]
#[case(Opcode::Lda, true)]
#[case(Opcode::Mov, false)]
#[case(Opcode::Dp4, false)]
fn load_classification(#[case] op: Opcode, #[case] is_load: bool) {
    assert_eq!(op.is_load(), is_load);
}

#[test]
fn dph_reads_three_then_four() {
    let instr = Instruction::new(Opcode::Dph)
        .with_op1(Operand::reg(Bank::Temp, 0))
        .with_op2(Operand::reg(Bank::Const, 0))
        .with_dest(Dest::masked(Bank::Temp, 1, WriteMask::X));
    let reads = instr.read_components();
    assert_eq!(reads.op1, vec![0, 1, 2]);
    assert_eq!(reads.op2, vec![0, 1, 2, 3]);
}

#[test]
fn scalar_broadcast_reads_one_position_per_written_lane() {
    let instr = Instruction::new(Opcode::Rcp)
        .with_op1(Operand::swizzled(Bank::Temp, 0, Swizzle::ZZZZ))
        .with_dest(Dest::masked(Bank::Temp, 1, WriteMask::Y | WriteMask::W));
    let reads = instr.read_components();
    // Positions 1 and 3; the broadcast swizzle resolves both to lane Z.
    assert_eq!(reads.op1, vec![1, 3]);
    let lanes = instr.op(0).swizzle.lanes();
    assert!(reads.op1.iter().all(|&p| lanes[p] == 2));
}
