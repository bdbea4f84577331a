//! Opcode enumeration and the pure classifiers over it.

/// Error raised when a byte does not name an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid opcode byte {0:#04x}")]
pub struct InvalidOpcode(pub u8);

/// Operation mnemonics of the quad shader ISA.
///
/// Every instruction starts from one of these; the classifiers below drive
/// how the optimizer treats the instruction (operand arity, result shape,
/// lane-permutation restrictions and side effects).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    Nop = 0x00,
    /// End of program marker instruction.
    End = 0x01,
    /// Change shader thread hint.
    Chs = 0x02,
    /// Unconditional jump. Treated as an opaque barrier by every pass.
    Jmp = 0x03,

    /// Component-wise addition.
    Add = 0x04,
    /// Component-wise integer addition.
    Addi = 0x05,
    /// Load the address register with the floored operand.
    Arl = 0x06,
    /// Component-wise compare-and-select (`op1 < 0 ? op2 : op3`).
    Cmp = 0x07,
    /// Compare-and-select that additionally raises the kill flag.
    Cmpkil = 0x08,
    /// Cosine of the scalar operand, broadcast to the written lanes.
    Cos = 0x09,
    /// Screen-space derivative along x.
    Ddx = 0x0a,
    /// Screen-space derivative along y.
    Ddy = 0x0b,

    /// Three-component dot product.
    Dp3 = 0x0c,
    /// Four-component dot product.
    Dp4 = 0x0d,
    /// Homogeneous dot product (`op1.xyz · op2.xyz + op2.w`).
    Dph = 0x0e,
    /// Distance vector (`[1, y1*y2, z1, w2]`).
    Dst = 0x0f,

    /// Base-2 exponential of the scalar operand.
    Ex2 = 0x10,
    /// Partial-precision exponential, four-lane result.
    Exp = 0x11,
    /// Floor. Not implemented by the execution units.
    Flr = 0x12,
    /// Fractional part of the scalar operand.
    Frc = 0x13,

    /// Fixed-point multiply-add.
    Fxmad = 0x14,
    /// Fixed-point multiply-add, second rounding mode.
    Fxmad2 = 0x15,
    /// Fixed-point multiply.
    Fxmul = 0x16,

    /// Kill the fragment if any operand lane is negative.
    Kil = 0x17,
    /// Kill the sample if any operand lane is negative.
    Kls = 0x18,

    /// Load an input attribute into a register.
    Lda = 0x19,
    /// Base-2 logarithm of the scalar operand.
    Lg2 = 0x1a,
    /// Lighting coefficients, four-lane result.
    Lit = 0x1b,
    /// Partial-precision logarithm, four-lane result.
    Log = 0x1c,

    /// Component-wise multiply-add.
    Mad = 0x1d,
    /// Component-wise maximum.
    Max = 0x1e,
    /// Component-wise minimum.
    Min = 0x1f,
    /// Component-wise copy.
    Mov = 0x20,
    /// Component-wise multiplication.
    Mul = 0x21,
    /// Component-wise integer multiplication.
    Muli = 0x22,

    /// Reciprocal of the scalar operand.
    Rcp = 0x23,
    /// Reciprocal square root of the scalar operand.
    Rsq = 0x24,

    /// Set a predicate register on equality.
    Setpeq = 0x25,
    /// Set a predicate register on greater-than.
    Setpgt = 0x26,
    /// Set a predicate register on less-than.
    Setplt = 0x27,
    /// Logical AND of two predicate registers.
    Andp = 0x28,

    /// Component-wise greater-or-equal producing 0.0/1.0.
    Sge = 0x29,
    /// Sine of the scalar operand, broadcast to the written lanes.
    Sin = 0x2a,
    /// Component-wise less-than producing 0.0/1.0.
    Slt = 0x2b,

    /// Set a predicate register on integer equality with an immediate.
    Stpeqi = 0x2c,
    /// Set a predicate register on integer greater-than with an immediate.
    Stpgti = 0x2d,
    /// Set a predicate register on integer less-than with an immediate.
    Stplti = 0x2e,

    /// Sample a texture at the operand coordinates.
    Tex = 0x2f,
    /// Texture sample with level-of-detail bias.
    Txb = 0x30,
    /// Texture sample with explicit level-of-detail.
    Txl = 0x31,
    /// Projective texture sample.
    Txp = 0x32,

    /// Export depth for the fragment.
    Zxp = 0x33,
    /// Export depth for the sample.
    Zxs = 0x34,
}

impl Opcode {
    /// Number of operands consumed by the opcode.
    pub const fn operand_arity(self) -> usize {
        use Opcode::*;
        match self {
            Nop | End | Chs => 0,
            Mov | Arl | Frc | Ex2 | Lg2 | Rcp | Rsq | Cos | Sin | Exp | Log | Lit
            | Flr | Kil | Kls | Zxp | Zxs | Jmp | Ddx | Ddy => 1,
            Mad | Fxmad | Fxmad2 | Cmp | Cmpkil => 3,
            _ => 2,
        }
    }

    /// Whether the opcode computes a scalar value broadcast to every written
    /// result lane.
    pub const fn has_scalar_broadcast_result(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Dp3 | Dp4 | Dph | Ex2 | Frc | Lg2 | Rcp | Rsq | Cos | Sin
        )
    }

    /// Whether the opcode performs the same operation independently on every
    /// result lane.
    pub const fn is_vector_op(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Add | Cmp | Cmpkil | Mad | Fxmad | Fxmad2 | Max | Min | Mov | Mul
                | Fxmul | Sge | Slt | Ddx | Ddy | Addi | Muli
        )
    }

    /// Whether the opcode produces a four-lane result whose destination lanes
    /// may not be permuted by the allocator.
    pub const fn has_simd4_result(self) -> bool {
        use Opcode::*;
        matches!(self, Dst | Exp | Lda | Lit | Log | Tex | Txb | Txl | Txp)
    }

    /// Whether the opcode produces no result at all.
    pub const fn writes_no_result(self) -> bool {
        use Opcode::*;
        matches!(self, Kil | Kls | Zxp | Zxs | Nop | End | Chs | Jmp)
    }

    /// Whether the opcode writes the address register.
    pub const fn writes_address_register(self) -> bool {
        matches!(self, Opcode::Arl)
    }

    /// Whether the opcode is declared but not implemented by the execution
    /// units. Structural passes drop such instructions with a diagnostic.
    pub const fn is_not_implemented(self) -> bool {
        matches!(self, Opcode::Flr)
    }

    /// Whether the presence of the opcode forces the early-z optimization to
    /// be disabled for the whole program.
    pub const fn must_disable_early_z(self) -> bool {
        use Opcode::*;
        matches!(self, Kil | Kls | Zxp | Zxs)
    }

    /// Whether the opcode loads a value from memory (texture samples and
    /// attribute loads). Loads retire asynchronously and are the subject of
    /// the wait-point pass.
    pub const fn is_load(self) -> bool {
        use Opcode::*;
        matches!(self, Tex | Txb | Txl | Txp | Lda)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        Ok(match byte {
            0x00 => Nop,
            0x01 => End,
            0x02 => Chs,
            0x03 => Jmp,
            0x04 => Add,
            0x05 => Addi,
            0x06 => Arl,
            0x07 => Cmp,
            0x08 => Cmpkil,
            0x09 => Cos,
            0x0a => Ddx,
            0x0b => Ddy,
            0x0c => Dp3,
            0x0d => Dp4,
            0x0e => Dph,
            0x0f => Dst,
            0x10 => Ex2,
            0x11 => Exp,
            0x12 => Flr,
            0x13 => Frc,
            0x14 => Fxmad,
            0x15 => Fxmad2,
            0x16 => Fxmul,
            0x17 => Kil,
            0x18 => Kls,
            0x19 => Lda,
            0x1a => Lg2,
            0x1b => Lit,
            0x1c => Log,
            0x1d => Mad,
            0x1e => Max,
            0x1f => Min,
            0x20 => Mov,
            0x21 => Mul,
            0x22 => Muli,
            0x23 => Rcp,
            0x24 => Rsq,
            0x25 => Setpeq,
            0x26 => Setpgt,
            0x27 => Setplt,
            0x28 => Andp,
            0x29 => Sge,
            0x2a => Sin,
            0x2b => Slt,
            0x2c => Stpeqi,
            0x2d => Stpgti,
            0x2e => Stplti,
            0x2f => Tex,
            0x30 => Txb,
            0x31 => Txl,
            0x32 => Txp,
            0x33 => Zxp,
            0x34 => Zxs,
            _ => return Err(InvalidOpcode(byte)),
        })
    }
}
