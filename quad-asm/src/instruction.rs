//! The immutable instruction record and its clone-with-patch operations.

use crate::mask::WriteMask;
use crate::opcode::Opcode;
use crate::swizzle::{Lane, Swizzle};

/// Identifier of a register within its bank.
///
/// After the rename pass the same field carries value names, which may exceed
/// any architectural register count; they are folded back into register ids
/// by the allocator before encoding.
pub type RegId = u32;

/// Register bank addressed by an operand or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bank {
    /// Temporary registers. The only bank subject to renaming/allocation.
    Temp,
    /// Input attribute registers.
    Input,
    /// Output attribute registers. Write-only.
    Output,
    /// Constant bank.
    Const,
    /// Address register.
    Addr,
    /// Predicate registers.
    Pred,
    /// Sampler identifiers (second operand of texture instructions).
    Sampler,
    /// Texture/attribute descriptor identifiers (second operand of `lda`).
    Texture,
    /// Unused operand slot.
    Invalid,
}

impl Bank {
    /// Short prefix used by the disassembly.
    pub const fn prefix(self) -> &'static str {
        match self {
            Bank::Temp => "r",
            Bank::Input => "in",
            Bank::Output => "o",
            Bank::Const => "c",
            Bank::Addr => "a",
            Bank::Pred => "p",
            Bank::Sampler => "s",
            Bank::Texture => "t",
            Bank::Invalid => "-",
        }
    }
}

/// One source operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Operand {
    /// Bank the operand reads from.
    pub bank: Bank,
    /// Register id within the bank.
    pub reg: RegId,
    /// Lane selection applied before the operation.
    pub swizzle: Swizzle,
    /// Negate modifier.
    pub negate: bool,
    /// Absolute-value modifier.
    pub absolute: bool,
}

impl Operand {
    /// Operand reading a register with identity swizzle and no modifiers.
    pub const fn reg(bank: Bank, reg: RegId) -> Self {
        Operand {
            bank,
            reg,
            swizzle: Swizzle::XYZW,
            negate: false,
            absolute: false,
        }
    }

    /// Operand reading a register through a swizzle.
    pub const fn swizzled(bank: Bank, reg: RegId, swizzle: Swizzle) -> Self {
        Operand {
            bank,
            reg,
            swizzle,
            negate: false,
            absolute: false,
        }
    }

    /// Placeholder for an unused operand slot.
    pub const fn none() -> Self {
        Operand::reg(Bank::Invalid, 0)
    }

    /// Same operand with the negate modifier set.
    pub const fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Same operand with the absolute-value modifier set.
    pub const fn abs(mut self) -> Self {
        self.absolute = true;
        self
    }

    /// Same operand with another swizzle.
    pub const fn with_swizzle(mut self, swizzle: Swizzle) -> Self {
        self.swizzle = swizzle;
        self
    }

    /// Whether the operand carries any value modifier.
    pub const fn has_modifier(&self) -> bool {
        self.negate || self.absolute
    }
}

/// Result descriptor of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dest {
    /// Bank the result is written to.
    pub bank: Bank,
    /// Register id within the bank.
    pub reg: RegId,
    /// Lanes actually written.
    pub mask: WriteMask,
    /// Clamp the result to [0, 1] before writing.
    pub saturate: bool,
}

impl Dest {
    /// Full-register destination.
    pub fn reg(bank: Bank, reg: RegId) -> Self {
        Dest {
            bank,
            reg,
            mask: WriteMask::all(),
            saturate: false,
        }
    }

    /// Destination under a write mask.
    pub fn masked(bank: Bank, reg: RegId, mask: WriteMask) -> Self {
        Dest {
            bank,
            reg,
            mask,
            saturate: false,
        }
    }

    /// Placeholder for instructions without a result.
    pub fn none() -> Self {
        Dest::masked(Bank::Invalid, 0, WriteMask::empty())
    }

    /// Same destination with the saturate flag set.
    pub const fn saturated(mut self) -> Self {
        self.saturate = true;
        self
    }
}

/// Predication descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Predicate {
    /// Whether the instruction is predicated at all.
    pub enabled: bool,
    /// Whether the predicate value is negated.
    pub negate: bool,
    /// Predicate register consulted.
    pub reg: RegId,
}

impl Predicate {
    /// Unpredicated execution.
    pub const NONE: Predicate = Predicate {
        enabled: false,
        negate: false,
        reg: 0,
    };

    /// Execute when the predicate register is true.
    pub const fn on(reg: RegId) -> Self {
        Predicate {
            enabled: true,
            negate: false,
            reg,
        }
    }

    /// Execute when the predicate register is false.
    pub const fn on_not(reg: RegId) -> Self {
        Predicate {
            enabled: true,
            negate: true,
            reg,
        }
    }
}

/// Relative-addressing descriptor, overriding the static register id of a
/// constant-bank operand with `const[addr[lane] + offset]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelAddr {
    /// Whether relative addressing is in effect.
    pub enabled: bool,
    /// Address register.
    pub reg: RegId,
    /// Lane of the address register holding the index.
    pub lane: Lane,
    /// Constant offset added to the index.
    pub offset: u8,
}

impl RelAddr {
    /// Absolute addressing.
    pub const NONE: RelAddr = RelAddr {
        enabled: false,
        reg: 0,
        lane: 0,
        offset: 0,
    };
}

/// Positions read from the first and second operand of an instruction.
///
/// The entries are *positions into the operand swizzle*, not source lanes: a
/// position `p` consumes source lane `swizzle.lane(p)`. The third operand of
/// the multiply-add family mirrors the first operand's positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperandReads {
    /// Positions read through the first operand.
    pub op1: Vec<usize>,
    /// Positions read through the second operand.
    pub op2: Vec<usize>,
}

/// One shader instruction.
///
/// Instructions are immutable values: passes never mutate an instruction they
/// received, they derive patched clones through the `with_*` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    opcode: Opcode,
    ops: [Operand; 3],
    dest: Dest,
    predicate: Predicate,
    rel_addr: RelAddr,
    end_of_program: bool,
    wait_point: bool,
}

impl Instruction {
    /// Instruction size in the binary format, in bytes.
    pub const SIZE: usize = 16;

    /// Bare instruction with unused operands and no result.
    pub fn new(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            ops: [Operand::none(); 3],
            dest: Dest::none(),
            predicate: Predicate::NONE,
            rel_addr: RelAddr::NONE,
            end_of_program: false,
            wait_point: false,
        }
    }

    /// Component-wise copy `dest <- src`.
    pub fn mov(dest: Dest, src: Operand) -> Self {
        Instruction::new(Opcode::Mov).with_op1(src).with_dest(dest)
    }

    /// Builder: first operand.
    pub fn with_op1(mut self, op: Operand) -> Self {
        self.ops[0] = op;
        self
    }

    /// Builder: second operand.
    pub fn with_op2(mut self, op: Operand) -> Self {
        self.ops[1] = op;
        self
    }

    /// Builder: third operand.
    pub fn with_op3(mut self, op: Operand) -> Self {
        self.ops[2] = op;
        self
    }

    /// Builder: result descriptor.
    pub fn with_dest(mut self, dest: Dest) -> Self {
        self.dest = dest;
        self
    }

    /// Builder: predication.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Builder: relative addressing.
    pub fn with_rel_addr(mut self, rel_addr: RelAddr) -> Self {
        self.rel_addr = rel_addr;
        self
    }

    /// Clone with the end-of-program flag set or cleared.
    pub fn with_end_flag(mut self, end: bool) -> Self {
        self.end_of_program = end;
        self
    }

    /// Clone with the wait-point flag set.
    pub fn with_wait_point(mut self) -> Self {
        self.wait_point = true;
        self
    }

    /// Clone with operand banks and register ids replaced.
    pub fn with_operand_regs(mut self, regs: [(Bank, RegId); 3]) -> Self {
        for (op, (bank, reg)) in self.ops.iter_mut().zip(regs) {
            op.bank = bank;
            op.reg = reg;
        }
        self
    }

    /// Clone with the result write mask replaced.
    pub fn with_write_mask(mut self, mask: WriteMask) -> Self {
        self.dest.mask = mask;
        self
    }

    /// Clone with the result and operand register ids replaced, banks kept.
    pub fn with_renamed_regs(mut self, result: RegId, ops: [RegId; 3]) -> Self {
        self.dest.reg = result;
        for (op, reg) in self.ops.iter_mut().zip(ops) {
            op.reg = reg;
        }
        self
    }

    /// Clone with the result register/mask and the operand registers and
    /// swizzles replaced.
    pub fn with_regs_and_swizzles(
        mut self,
        result: RegId,
        mask: WriteMask,
        ops: [(RegId, Swizzle); 3],
    ) -> Self {
        self.dest.reg = result;
        self.dest.mask = mask;
        for (op, (reg, swizzle)) in self.ops.iter_mut().zip(ops) {
            op.reg = reg;
            op.swizzle = swizzle;
        }
        self
    }

    /// Clone shaped down to a single-lane scalar fragment: operand swizzles
    /// replaced by broadcasts, write mask replaced, end flag cleared.
    pub fn with_scalar_shape(mut self, swizzles: [Swizzle; 3], mask: WriteMask) -> Self {
        for (op, swizzle) in self.ops.iter_mut().zip(swizzles) {
            op.swizzle = swizzle;
        }
        self.dest.mask = mask;
        self.end_of_program = false;
        self
    }

    /// Opcode of the instruction.
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// One operand slot (0-based).
    pub const fn op(&self, index: usize) -> &Operand {
        &self.ops[index]
    }

    /// The operand slots actually consumed by the opcode.
    pub fn operands(&self) -> &[Operand] {
        &self.ops[..self.opcode.operand_arity()]
    }

    /// Result descriptor.
    pub const fn dest(&self) -> &Dest {
        &self.dest
    }

    /// Predication descriptor.
    pub const fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Whether the instruction executes under a predicate.
    pub const fn is_predicated(&self) -> bool {
        self.predicate.enabled
    }

    /// Relative-addressing descriptor.
    pub const fn rel_addr(&self) -> &RelAddr {
        &self.rel_addr
    }

    /// Whether this instruction ends the program.
    pub const fn is_end(&self) -> bool {
        self.end_of_program
    }

    /// Whether pending loads must retire after this instruction.
    pub const fn is_wait_point(&self) -> bool {
        self.wait_point
    }

    /// Whether the opcode produces a result at all.
    pub const fn writes_result(&self) -> bool {
        !self.opcode.writes_no_result()
    }

    /// Whether the instruction writes the given temp-bank register.
    pub fn writes_temp(&self, reg: RegId) -> bool {
        self.writes_result() && self.dest.bank == Bank::Temp && self.dest.reg == reg
    }

    /// The `slt`/`sge` self-compare idiom: both operands are the identical
    /// temp read, which produces a compile-time constant 0.0 or 1.0 per lane
    /// regardless of the (possibly undefined) register value.
    pub fn is_const_producing_compare(&self) -> bool {
        matches!(self.opcode, Opcode::Slt | Opcode::Sge)
            && self.ops[0].bank == Bank::Temp
            && self.ops[1].bank == Bank::Temp
            && self.ops[0].reg == self.ops[1].reg
            && self.ops[0].swizzle == self.ops[1].swizzle
            && self.ops[0].negate == self.ops[1].negate
            && self.ops[0].absolute == self.ops[1].absolute
    }

    /// Which positions of the first and second operand the instruction reads
    /// to produce its written result lanes.
    ///
    /// The relation between written lanes and read positions is opcode
    /// specific; the default is the element-wise rule where position `k` is
    /// read exactly when result lane `k` is written.
    pub fn read_components(&self) -> OperandReads {
        use Opcode::*;

        let written: Vec<Lane> = self.dest.mask.written_lanes();
        let mut reads = OperandReads::default();

        match self.opcode {
            Nop | End | Chs | Flr => {}

            // A single lane holds the jump condition/target index.
            Jmp => reads.op1 = vec![0],

            Dp4 | Kil | Kls | Zxp | Zxs => {
                reads.op1 = vec![0, 1, 2, 3];
                reads.op2 = vec![0, 1, 2, 3];
            }

            Txb | Txl | Txp => {
                // Coordinates plus bias/lod in w; op2 is a sampler id.
                reads.op1 = vec![0, 1, 2, 3];
            }

            Dph => {
                reads.op1 = vec![0, 1, 2];
                reads.op2 = vec![0, 1, 2, 3];
            }

            Dp3 => {
                reads.op1 = vec![0, 1, 2];
                reads.op2 = vec![0, 1, 2];
            }

            Tex => {
                // Coordinates only; op2 is a sampler id.
                reads.op1 = vec![0, 1, 2];
            }

            // Only the index lane; op2 is the attribute descriptor.
            Lda => reads.op1 = vec![0],

            Dst => {
                // op1: lane k read iff result lane k written, for k in 1..=3
                // (lane 0 of the distance vector is the constant 1.0).
                // op2: only lane 1, and only when result lane 1 is written.
                for &lane in &written {
                    if lane != 0 {
                        reads.op1.push(lane);
                    }
                    if lane == 1 {
                        reads.op2.push(1);
                    }
                }
            }

            Lit => {
                let second = written.contains(&1);
                let third = written.contains(&2);
                if third {
                    reads.op1 = vec![0, 1, 3];
                } else if second {
                    reads.op1 = vec![0];
                }
            }

            // Scalar computations with a broadcast operand: one position per
            // written result lane, which the broadcast resolves to a single
            // source lane.
            Ex2 | Exp | Frc | Lg2 | Log | Rcp | Rsq | Cos | Sin | Setpeq | Setpgt
            | Setplt | Andp | Stpeqi | Stpgti | Stplti => {
                reads.op1 = written.clone();
                reads.op2 = written;
            }

            _ => {
                // Element-wise: position k read iff result lane k written.
                reads.op1 = written.clone();
                reads.op2 = written;
            }
        }

        reads
    }
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.opcode)?;
        if self.dest.saturate {
            write!(f, "_sat")?;
        }
        if self.predicate.enabled {
            let neg = if self.predicate.negate { "!" } else { "" };
            write!(f, " ({neg}p{})", self.predicate.reg)?;
        }

        let mut first = true;
        if self.writes_result() && self.dest.bank != Bank::Invalid {
            write!(f, " {}{}", self.dest.bank.prefix(), self.dest.reg)?;
            if self.dest.mask != WriteMask::all() {
                write!(f, ".{}", self.dest.mask)?;
            }
            first = false;
        }

        for op in self.operands() {
            write!(f, "{}", if first { " " } else { ", " })?;
            first = false;
            if op.negate {
                write!(f, "-")?;
            }
            if op.absolute {
                write!(f, "|")?;
            }
            write!(f, "{}{}", op.bank.prefix(), op.reg)?;
            if op.swizzle != Swizzle::XYZW {
                write!(f, ".{}", op.swizzle)?;
            }
            if op.absolute {
                write!(f, "|")?;
            }
        }

        if self.rel_addr.enabled {
            write!(
                f,
                " [a{}.{}+{}]",
                self.rel_addr.reg,
                crate::swizzle::LANE_NAMES[self.rel_addr.lane],
                self.rel_addr.offset
            )?;
        }
        if self.end_of_program {
            write!(f, " ; end")?;
        }
        if self.wait_point {
            write!(f, " ; wait")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_xyz() -> Instruction {
        Instruction::new(Opcode::Add)
            .with_op1(Operand::reg(Bank::Temp, 0))
            .with_op2(Operand::reg(Bank::Const, 3))
            .with_dest(Dest::masked(
                Bank::Temp,
                1,
                WriteMask::X | WriteMask::Y | WriteMask::Z,
            ))
    }

    #[test]
    fn element_wise_reads_follow_the_mask() {
        let reads = add_xyz().read_components();
        assert_eq!(reads.op1, vec![0, 1, 2]);
        assert_eq!(reads.op2, vec![0, 1, 2]);
    }

    #[test]
    fn dp3_ignores_the_result_mask() {
        let instr = Instruction::new(Opcode::Dp3)
            .with_op1(Operand::reg(Bank::Temp, 0))
            .with_op2(Operand::reg(Bank::Temp, 1))
            .with_dest(Dest::masked(Bank::Temp, 2, WriteMask::W));
        let reads = instr.read_components();
        assert_eq!(reads.op1, vec![0, 1, 2]);
        assert_eq!(reads.op2, vec![0, 1, 2]);
    }

    #[test]
    fn dst_reads_depend_on_written_lanes() {
        let instr = Instruction::new(Opcode::Dst)
            .with_op1(Operand::reg(Bank::Temp, 0))
            .with_op2(Operand::reg(Bank::Temp, 1))
            .with_dest(Dest::masked(Bank::Temp, 2, WriteMask::X | WriteMask::Y));
        let reads = instr.read_components();
        assert_eq!(reads.op1, vec![1]);
        assert_eq!(reads.op2, vec![1]);

        let full = instr.with_write_mask(WriteMask::all()).read_components();
        assert_eq!(full.op1, vec![1, 2, 3]);
        assert_eq!(full.op2, vec![1]);
    }

    #[test]
    fn lit_reads_depend_on_written_lanes() {
        let base = Instruction::new(Opcode::Lit)
            .with_op1(Operand::reg(Bank::Temp, 0))
            .with_dest(Dest::masked(Bank::Temp, 1, WriteMask::Z));
        assert_eq!(base.read_components().op1, vec![0, 1, 3]);

        let second = base.with_write_mask(WriteMask::Y);
        assert_eq!(second.read_components().op1, vec![0]);

        let first = base.with_write_mask(WriteMask::X | WriteMask::W);
        assert!(first.read_components().op1.is_empty());
    }

    #[test]
    fn texture_samplers_are_not_lane_reads() {
        let instr = Instruction::new(Opcode::Tex)
            .with_op1(Operand::reg(Bank::Temp, 0))
            .with_op2(Operand::reg(Bank::Sampler, 2))
            .with_dest(Dest::reg(Bank::Temp, 1));
        let reads = instr.read_components();
        assert_eq!(reads.op1, vec![0, 1, 2]);
        assert!(reads.op2.is_empty());
    }

    #[test]
    fn const_producing_compare_idiom() {
        let idiom = Instruction::new(Opcode::Slt)
            .with_op1(Operand::swizzled(Bank::Temp, 5, Swizzle::XXXX))
            .with_op2(Operand::swizzled(Bank::Temp, 5, Swizzle::XXXX))
            .with_dest(Dest::masked(Bank::Temp, 0, WriteMask::X));
        assert!(idiom.is_const_producing_compare());

        let other_reg = idiom.with_op2(Operand::swizzled(Bank::Temp, 6, Swizzle::XXXX));
        assert!(!other_reg.is_const_producing_compare());

        let negated = idiom.with_op1(Operand::swizzled(Bank::Temp, 5, Swizzle::XXXX).negated());
        assert!(!negated.is_const_producing_compare());

        let add = Instruction::new(Opcode::Add)
            .with_op1(Operand::reg(Bank::Temp, 5))
            .with_op2(Operand::reg(Bank::Temp, 5))
            .with_dest(Dest::reg(Bank::Temp, 0));
        assert!(!add.is_const_producing_compare());
    }

    #[test]
    fn display_format() {
        let instr = add_xyz().with_end_flag(true);
        assert_eq!(instr.to_string(), "add r1.xyz, r0, c3 ; end");

        let kil = Instruction::new(Opcode::Kil)
            .with_op1(Operand::swizzled(Bank::Temp, 2, Swizzle::XXXX).negated());
        assert_eq!(kil.to_string(), "kil -r2.xxxx");
    }
}
