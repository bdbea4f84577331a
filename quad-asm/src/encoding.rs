//! Fixed 16-byte binary codec for instructions.
//!
//! Layout (one row per byte):
//!
//! | byte   | contents                                                  |
//! |--------|-----------------------------------------------------------|
//! | 0      | opcode                                                    |
//! | 1      | flags: end, wait, saturate, pred, pred-neg, rel-mode      |
//! | 2      | result bank (high nibble), write mask (low nibble)        |
//! | 3      | result register id                                        |
//! | 4..7   | operand 1: bank+modifiers, register id, swizzle           |
//! | 7..10  | operand 2                                                 |
//! | 10..13 | operand 3                                                 |
//! | 13     | predicate register                                        |
//! | 14     | relative-addressing register (high), lane (low)           |
//! | 15     | relative-addressing offset                                |

use crate::instruction::{Bank, Dest, Instruction, Operand, Predicate, RegId, RelAddr};
use crate::mask::WriteMask;
use crate::opcode::{InvalidOpcode, Opcode};
use crate::swizzle::{Lane, Swizzle};

const FLAG_END: u8 = 0x01;
const FLAG_WAIT: u8 = 0x02;
const FLAG_SATURATE: u8 = 0x04;
const FLAG_PREDICATED: u8 = 0x08;
const FLAG_PRED_NEGATE: u8 = 0x10;
const FLAG_REL_MODE: u8 = 0x20;

const OP_FLAG_NEGATE: u8 = 0x01;
const OP_FLAG_ABSOLUTE: u8 = 0x02;

/// Error decoding an instruction or program from bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The opcode byte does not name an instruction.
    #[error(transparent)]
    InvalidOpcode(#[from] InvalidOpcode),
    /// The buffer does not hold a whole number of instructions.
    #[error("program size {0} is not a multiple of the instruction size")]
    TruncatedProgram(usize),
    /// A bank nibble does not name a register bank.
    #[error("invalid register bank nibble {0:#03x}")]
    InvalidBank(u8),
}

/// Error encoding an instruction into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A register id does not fit the binary field. Register names produced
    /// by the rename pass are unencodable until allocation folds them back
    /// into architectural registers.
    #[error("register id {0} does not fit the encoded register field")]
    RegisterOutOfRange(RegId),
}

fn bank_to_nibble(bank: Bank) -> u8 {
    match bank {
        Bank::Temp => 0x0,
        Bank::Input => 0x1,
        Bank::Output => 0x2,
        Bank::Const => 0x3,
        Bank::Addr => 0x4,
        Bank::Pred => 0x5,
        Bank::Sampler => 0x6,
        Bank::Texture => 0x7,
        Bank::Invalid => 0xf,
    }
}

fn bank_from_nibble(nibble: u8) -> Result<Bank, DecodeError> {
    Ok(match nibble {
        0x0 => Bank::Temp,
        0x1 => Bank::Input,
        0x2 => Bank::Output,
        0x3 => Bank::Const,
        0x4 => Bank::Addr,
        0x5 => Bank::Pred,
        0x6 => Bank::Sampler,
        0x7 => Bank::Texture,
        0xf => Bank::Invalid,
        other => return Err(DecodeError::InvalidBank(other)),
    })
}

fn reg_to_byte(reg: RegId) -> Result<u8, EncodeError> {
    u8::try_from(reg).map_err(|_| EncodeError::RegisterOutOfRange(reg))
}

fn encode_operand(op: &Operand, out: &mut [u8]) -> Result<(), EncodeError> {
    let mut modifiers = 0u8;
    if op.negate {
        modifiers |= OP_FLAG_NEGATE;
    }
    if op.absolute {
        modifiers |= OP_FLAG_ABSOLUTE;
    }
    out[0] = (bank_to_nibble(op.bank) << 4) | modifiers;
    out[1] = reg_to_byte(op.reg)?;
    out[2] = op.swizzle.raw();
    Ok(())
}

fn decode_operand(bytes: &[u8]) -> Result<Operand, DecodeError> {
    Ok(Operand {
        bank: bank_from_nibble(bytes[0] >> 4)?,
        reg: RegId::from(bytes[1]),
        swizzle: Swizzle::from_raw(bytes[2]),
        negate: bytes[0] & OP_FLAG_NEGATE != 0,
        absolute: bytes[0] & OP_FLAG_ABSOLUTE != 0,
    })
}

impl Instruction {
    /// Encode into the 16-byte binary format.
    pub fn to_bytes(&self) -> Result<[u8; Self::SIZE], EncodeError> {
        let mut bytes = [0u8; Self::SIZE];

        bytes[0] = self.opcode() as u8;

        let mut flags = 0u8;
        if self.is_end() {
            flags |= FLAG_END;
        }
        if self.is_wait_point() {
            flags |= FLAG_WAIT;
        }
        if self.dest().saturate {
            flags |= FLAG_SATURATE;
        }
        if self.predicate().enabled {
            flags |= FLAG_PREDICATED;
        }
        if self.predicate().negate {
            flags |= FLAG_PRED_NEGATE;
        }
        if self.rel_addr().enabled {
            flags |= FLAG_REL_MODE;
        }
        bytes[1] = flags;

        bytes[2] = (bank_to_nibble(self.dest().bank) << 4) | self.dest().mask.bits();
        bytes[3] = reg_to_byte(self.dest().reg)?;

        encode_operand(self.op(0), &mut bytes[4..7])?;
        encode_operand(self.op(1), &mut bytes[7..10])?;
        encode_operand(self.op(2), &mut bytes[10..13])?;

        bytes[13] = reg_to_byte(self.predicate().reg)?;
        let rel_reg = reg_to_byte(self.rel_addr().reg)?;
        if rel_reg > 0x0f {
            return Err(EncodeError::RegisterOutOfRange(self.rel_addr().reg));
        }
        bytes[14] = (rel_reg << 4) | (self.rel_addr().lane as u8 & 0x03);
        bytes[15] = self.rel_addr().offset;

        Ok(bytes)
    }

    /// Decode from the 16-byte binary format.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Result<Self, DecodeError> {
        let opcode = Opcode::try_from(bytes[0])?;
        let flags = bytes[1];

        let dest = Dest {
            bank: bank_from_nibble(bytes[2] >> 4)?,
            reg: RegId::from(bytes[3]),
            mask: WriteMask::from_bits_truncate(bytes[2] & 0x0f),
            saturate: flags & FLAG_SATURATE != 0,
        };

        let instr = Instruction::new(opcode)
            .with_op1(decode_operand(&bytes[4..7])?)
            .with_op2(decode_operand(&bytes[7..10])?)
            .with_op3(decode_operand(&bytes[10..13])?)
            .with_dest(dest)
            .with_predicate(Predicate {
                enabled: flags & FLAG_PREDICATED != 0,
                negate: flags & FLAG_PRED_NEGATE != 0,
                reg: RegId::from(bytes[13]),
            })
            .with_rel_addr(RelAddr {
                enabled: flags & FLAG_REL_MODE != 0,
                reg: RegId::from(bytes[14] >> 4),
                lane: (bytes[14] & 0x03) as Lane,
                offset: bytes[15],
            })
            .with_end_flag(flags & FLAG_END != 0);

        Ok(if flags & FLAG_WAIT != 0 {
            instr.with_wait_point()
        } else {
            instr
        })
    }
}
