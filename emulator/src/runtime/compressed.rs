//! RV64C: 16-bit instructions, decoded to their 32-bit expansion
//!
//! Floating-point compressed forms are not supported and decode as illegal.

use super::exception::Exception;
use super::instructions::{BranchCond, ImmOp, Instruction, LoadWidth, RegOp, StoreWidth};
use super::registers::Reg;

fn bits(raw: u16, hi: u32, lo: u32) -> u32 {
    (u32::from(raw) >> lo) & ((1 << (hi - lo + 1)) - 1)
}

const fn sign_extend(value: u32, width: u32) -> i64 {
    let shift = 64 - width;
    ((value as i64) << shift) >> shift
}

/// Full register in bits 11:7
fn rd(raw: u16) -> Reg {
    Reg::from_index(bits(raw, 11, 7))
}

/// Full register in bits 6:2
fn rs2(raw: u16) -> Reg {
    Reg::from_index(bits(raw, 6, 2))
}

/// One of `s0`-`a5`, 3-bit field starting at `lo`
fn creg(raw: u16, lo: u32) -> Reg {
    Reg::from_index(8 + bits(raw, lo + 2, lo))
}

/// 6-bit immediate split in bit 12 and bits 6:2
fn imm6(raw: u16) -> u32 {
    (bits(raw, 12, 12) << 5) | bits(raw, 6, 2)
}

fn word_offset(raw: u16) -> i64 {
    ((bits(raw, 12, 10) << 3) | (bits(raw, 6, 6) << 2) | (bits(raw, 5, 5) << 6)).into()
}

fn double_offset(raw: u16) -> i64 {
    ((bits(raw, 12, 10) << 3) | (bits(raw, 6, 5) << 6)).into()
}

fn jump_offset(raw: u16) -> i64 {
    let value = (bits(raw, 12, 12) << 11)
        | (bits(raw, 11, 11) << 4)
        | (bits(raw, 10, 9) << 8)
        | (bits(raw, 8, 8) << 10)
        | (bits(raw, 7, 7) << 6)
        | (bits(raw, 6, 6) << 7)
        | (bits(raw, 5, 3) << 1)
        | (bits(raw, 2, 2) << 5);
    sign_extend(value, 12)
}

fn branch_offset(raw: u16) -> i64 {
    let value = (bits(raw, 12, 12) << 8)
        | (bits(raw, 11, 10) << 3)
        | (bits(raw, 6, 5) << 6)
        | (bits(raw, 4, 3) << 1)
        | (bits(raw, 2, 2) << 5);
    sign_extend(value, 9)
}

impl Instruction {
    /// Decode a 16-bit instruction into its 32-bit equivalent
    ///
    /// # Errors
    ///
    /// Returns an illegal instruction exception carrying the raw bits for
    /// reserved and unsupported encodings
    pub fn decode_compressed(raw: u16) -> Result<Self, Exception> {
        let inst = match raw & 0b11 {
            0b00 => decode_quadrant0(raw),
            0b01 => decode_quadrant1(raw),
            0b10 => decode_quadrant2(raw),
            _ => None,
        };
        inst.ok_or(Exception::IllegalInstruction(raw.into()))
    }
}

fn decode_quadrant0(raw: u16) -> Option<Instruction> {
    let inst = match bits(raw, 15, 13) {
        // c.addi4spn, the all-zero instruction lands here with a zero immediate
        0 => {
            let imm = (bits(raw, 12, 11) << 4)
                | (bits(raw, 10, 7) << 6)
                | (bits(raw, 6, 6) << 2)
                | (bits(raw, 5, 5) << 3);
            if imm == 0 {
                return None;
            }
            Instruction::OpImm {
                op: ImmOp::Addi,
                rd: creg(raw, 2),
                rs1: Reg::Sp,
                imm: imm.into(),
            }
        }
        2 => Instruction::Load {
            width: LoadWidth::W,
            rd: creg(raw, 2),
            rs1: creg(raw, 7),
            offset: word_offset(raw),
        },
        3 => Instruction::Load {
            width: LoadWidth::D,
            rd: creg(raw, 2),
            rs1: creg(raw, 7),
            offset: double_offset(raw),
        },
        6 => Instruction::Store {
            width: StoreWidth::W,
            rs1: creg(raw, 7),
            rs2: creg(raw, 2),
            offset: word_offset(raw),
        },
        7 => Instruction::Store {
            width: StoreWidth::D,
            rs1: creg(raw, 7),
            rs2: creg(raw, 2),
            offset: double_offset(raw),
        },
        _ => return None,
    };
    Some(inst)
}

fn decode_quadrant1(raw: u16) -> Option<Instruction> {
    let imm = sign_extend(imm6(raw), 6);
    let inst = match bits(raw, 15, 13) {
        0 => Instruction::OpImm {
            op: ImmOp::Addi,
            rd: rd(raw),
            rs1: rd(raw),
            imm,
        },
        1 if rd(raw) != Reg::Zero => Instruction::OpImm {
            op: ImmOp::Addiw,
            rd: rd(raw),
            rs1: rd(raw),
            imm,
        },
        2 => Instruction::OpImm {
            op: ImmOp::Addi,
            rd: rd(raw),
            rs1: Reg::Zero,
            imm,
        },
        3 if rd(raw) == Reg::Sp => {
            let value = (bits(raw, 12, 12) << 9)
                | (bits(raw, 6, 6) << 4)
                | (bits(raw, 5, 5) << 6)
                | (bits(raw, 4, 3) << 7)
                | (bits(raw, 2, 2) << 5);
            if value == 0 {
                return None;
            }
            Instruction::OpImm {
                op: ImmOp::Addi,
                rd: Reg::Sp,
                rs1: Reg::Sp,
                imm: sign_extend(value, 10),
            }
        }
        3 if imm != 0 => Instruction::Lui {
            rd: rd(raw),
            imm: (imm as u32) & 0xF_FFFF,
        },
        4 => decode_arithmetic(raw)?,
        5 => Instruction::Jal {
            rd: Reg::Zero,
            offset: jump_offset(raw),
        },
        funct3 @ (6 | 7) => Instruction::Branch {
            cond: if funct3 == 6 {
                BranchCond::Eq
            } else {
                BranchCond::Ne
            },
            rs1: creg(raw, 7),
            rs2: Reg::Zero,
            offset: branch_offset(raw),
        },
        _ => return None,
    };
    Some(inst)
}

/// Quadrant 1, funct3 = 4: shifts, `c.andi` and register-register ALU ops
fn decode_arithmetic(raw: u16) -> Option<Instruction> {
    let rd = creg(raw, 7);
    let imm_op = |op, imm| Instruction::OpImm {
        op,
        rd,
        rs1: rd,
        imm,
    };

    let inst = match bits(raw, 11, 10) {
        0 => imm_op(ImmOp::Srli, imm6(raw).into()),
        1 => imm_op(ImmOp::Srai, imm6(raw).into()),
        2 => imm_op(ImmOp::Andi, sign_extend(imm6(raw), 6)),
        _ => {
            let op = match (bits(raw, 12, 12), bits(raw, 6, 5)) {
                (0, 0) => RegOp::Sub,
                (0, 1) => RegOp::Xor,
                (0, 2) => RegOp::Or,
                (0, 3) => RegOp::And,
                (1, 0) => RegOp::Subw,
                (1, 1) => RegOp::Addw,
                _ => return None,
            };
            Instruction::Op {
                op,
                rd,
                rs1: rd,
                rs2: creg(raw, 2),
            }
        }
    };
    Some(inst)
}

fn decode_quadrant2(raw: u16) -> Option<Instruction> {
    let inst = match bits(raw, 15, 13) {
        0 => Instruction::OpImm {
            op: ImmOp::Slli,
            rd: rd(raw),
            rs1: rd(raw),
            imm: imm6(raw).into(),
        },
        2 if rd(raw) != Reg::Zero => Instruction::Load {
            width: LoadWidth::W,
            rd: rd(raw),
            rs1: Reg::Sp,
            offset: ((bits(raw, 12, 12) << 5) | (bits(raw, 6, 4) << 2) | (bits(raw, 3, 2) << 6))
                .into(),
        },
        3 if rd(raw) != Reg::Zero => Instruction::Load {
            width: LoadWidth::D,
            rd: rd(raw),
            rs1: Reg::Sp,
            offset: ((bits(raw, 12, 12) << 5) | (bits(raw, 6, 5) << 3) | (bits(raw, 4, 2) << 6))
                .into(),
        },
        4 => match (bits(raw, 12, 12), rd(raw), rs2(raw)) {
            (0, Reg::Zero, Reg::Zero) => return None,
            // c.jr
            (0, rs1, Reg::Zero) => Instruction::Jalr {
                rd: Reg::Zero,
                rs1,
                offset: 0,
            },
            // c.mv
            (0, rd, rs2) => Instruction::Op {
                op: RegOp::Add,
                rd,
                rs1: Reg::Zero,
                rs2,
            },
            (_, Reg::Zero, Reg::Zero) => Instruction::Ebreak,
            // c.jalr
            (_, rs1, Reg::Zero) => Instruction::Jalr {
                rd: Reg::Ra,
                rs1,
                offset: 0,
            },
            // c.add
            (_, rd, rs2) => Instruction::Op {
                op: RegOp::Add,
                rd,
                rs1: rd,
                rs2,
            },
        },
        6 => Instruction::Store {
            width: StoreWidth::W,
            rs1: Reg::Sp,
            rs2: rs2(raw),
            offset: ((bits(raw, 12, 9) << 2) | (bits(raw, 8, 7) << 6)).into(),
        },
        7 => Instruction::Store {
            width: StoreWidth::D,
            rs1: Reg::Sp,
            rs2: rs2(raw),
            offset: ((bits(raw, 12, 10) << 3) | (bits(raw, 9, 7) << 6)).into(),
        },
        _ => return None,
    };
    Some(inst)
}
