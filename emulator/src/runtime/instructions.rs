//! Instruction set: decoding, encoding and disassembly
//!
//! Compressed instructions decode to their 32-bit expansion, see the
//! `compressed` module.

use parse_display::Display;

use super::csr::Csr;
use super::exception::Exception;
use super::registers::Reg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum BranchCond {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum LoadWidth {
    B,
    H,
    W,
    D,
    Bu,
    Hu,
    Wu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum StoreWidth {
    B,
    H,
    W,
    D,
}

/// Register-immediate operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum ImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Addiw,
    Slliw,
    Srliw,
    Sraiw,
}

/// Register-register operations, including the M extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum RegOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum AmoOp {
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum AmoWidth {
    W,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CsrOp {
    /// Read and write
    #[display("w")]
    Write,
    /// Read and set bits
    #[display("s")]
    Set,
    /// Read and clear bits
    #[display("c")]
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Instruction {
    /// Load a 20-bit immediate in the upper bits of `rd`
    #[display("lui {rd}, {imm}")]
    Lui { rd: Reg, imm: u32 },

    /// Add an upper immediate to the PC
    #[display("auipc {rd}, {imm}")]
    Auipc { rd: Reg, imm: u32 },

    #[display("jal {rd}, {offset}")]
    Jal { rd: Reg, offset: i64 },

    #[display("jalr {rd}, {offset}({rs1})")]
    Jalr { rd: Reg, rs1: Reg, offset: i64 },

    #[display("b{cond} {rs1}, {rs2}, {offset}")]
    Branch {
        cond: BranchCond,
        rs1: Reg,
        rs2: Reg,
        offset: i64,
    },

    #[display("l{width} {rd}, {offset}({rs1})")]
    Load {
        width: LoadWidth,
        rd: Reg,
        rs1: Reg,
        offset: i64,
    },

    #[display("s{width} {rs2}, {offset}({rs1})")]
    Store {
        width: StoreWidth,
        rs1: Reg,
        rs2: Reg,
        offset: i64,
    },

    #[display("{op} {rd}, {rs1}, {imm}")]
    OpImm { op: ImmOp, rd: Reg, rs1: Reg, imm: i64 },

    #[display("{op} {rd}, {rs1}, {rs2}")]
    Op { op: RegOp, rd: Reg, rs1: Reg, rs2: Reg },

    /// Memory ordering. Accesses are never reordered, so this does nothing.
    #[display("fence")]
    Fence,

    #[display("fence.i")]
    FenceI,

    #[display("ecall")]
    Ecall,

    #[display("ebreak")]
    Ebreak,

    #[display("mret")]
    Mret,

    #[display("sret")]
    Sret,

    #[display("wfi")]
    Wfi,

    #[display("sfence.vma {rs1}, {rs2}")]
    SfenceVma { rs1: Reg, rs2: Reg },

    #[display("csrr{op} {rd}, {csr}, {rs1}")]
    Csr { op: CsrOp, rd: Reg, csr: Csr, rs1: Reg },

    #[display("csrr{op}i {rd}, {csr}, {uimm}")]
    CsrImm { op: CsrOp, rd: Reg, csr: Csr, uimm: u32 },

    #[display("lr.{width} {rd}, ({rs1})")]
    LoadReserved { width: AmoWidth, rd: Reg, rs1: Reg },

    #[display("sc.{width} {rd}, {rs2}, ({rs1})")]
    StoreConditional {
        width: AmoWidth,
        rd: Reg,
        rs1: Reg,
        rs2: Reg,
    },

    #[display("amo{op}.{width} {rd}, {rs2}, ({rs1})")]
    Amo {
        op: AmoOp,
        width: AmoWidth,
        rd: Reg,
        rs1: Reg,
        rs2: Reg,
    },
}

const OP_LUI: u32 = 0x37;
const OP_AUIPC: u32 = 0x17;
const OP_JAL: u32 = 0x6F;
const OP_JALR: u32 = 0x67;
const OP_BRANCH: u32 = 0x63;
const OP_LOAD: u32 = 0x03;
const OP_STORE: u32 = 0x23;
const OP_IMM: u32 = 0x13;
const OP_IMM_32: u32 = 0x1B;
const OP: u32 = 0x33;
const OP_32: u32 = 0x3B;
const OP_MISC_MEM: u32 = 0x0F;
const OP_SYSTEM: u32 = 0x73;
const OP_AMO: u32 = 0x2F;

const ECALL: u32 = 0x0000_0073;
const EBREAK: u32 = 0x0010_0073;
const SRET: u32 = 0x1020_0073;
const MRET: u32 = 0x3020_0073;
const WFI: u32 = 0x1050_0073;
const FENCE: u32 = 0x0FF0_000F;
const FENCE_I: u32 = 0x0000_100F;

const BRANCHES: [(BranchCond, u32); 6] = [
    (BranchCond::Eq, 0),
    (BranchCond::Ne, 1),
    (BranchCond::Lt, 4),
    (BranchCond::Ge, 5),
    (BranchCond::Ltu, 6),
    (BranchCond::Geu, 7),
];

const LOADS: [(LoadWidth, u32); 7] = [
    (LoadWidth::B, 0),
    (LoadWidth::H, 1),
    (LoadWidth::W, 2),
    (LoadWidth::D, 3),
    (LoadWidth::Bu, 4),
    (LoadWidth::Hu, 5),
    (LoadWidth::Wu, 6),
];

const STORES: [(StoreWidth, u32); 4] = [
    (StoreWidth::B, 0),
    (StoreWidth::H, 1),
    (StoreWidth::W, 2),
    (StoreWidth::D, 3),
];

/// (operation, opcode, funct3); shifts also match on the upper bits
const IMM_OPS: [(ImmOp, u32, u32); 13] = [
    (ImmOp::Addi, OP_IMM, 0),
    (ImmOp::Slli, OP_IMM, 1),
    (ImmOp::Slti, OP_IMM, 2),
    (ImmOp::Sltiu, OP_IMM, 3),
    (ImmOp::Xori, OP_IMM, 4),
    (ImmOp::Srli, OP_IMM, 5),
    (ImmOp::Srai, OP_IMM, 5),
    (ImmOp::Ori, OP_IMM, 6),
    (ImmOp::Andi, OP_IMM, 7),
    (ImmOp::Addiw, OP_IMM_32, 0),
    (ImmOp::Slliw, OP_IMM_32, 1),
    (ImmOp::Srliw, OP_IMM_32, 5),
    (ImmOp::Sraiw, OP_IMM_32, 5),
];

/// (operation, opcode, funct3, funct7)
const REG_OPS: [(RegOp, u32, u32, u32); 28] = [
    (RegOp::Add, OP, 0, 0x00),
    (RegOp::Sub, OP, 0, 0x20),
    (RegOp::Sll, OP, 1, 0x00),
    (RegOp::Slt, OP, 2, 0x00),
    (RegOp::Sltu, OP, 3, 0x00),
    (RegOp::Xor, OP, 4, 0x00),
    (RegOp::Srl, OP, 5, 0x00),
    (RegOp::Sra, OP, 5, 0x20),
    (RegOp::Or, OP, 6, 0x00),
    (RegOp::And, OP, 7, 0x00),
    (RegOp::Mul, OP, 0, 0x01),
    (RegOp::Mulh, OP, 1, 0x01),
    (RegOp::Mulhsu, OP, 2, 0x01),
    (RegOp::Mulhu, OP, 3, 0x01),
    (RegOp::Div, OP, 4, 0x01),
    (RegOp::Divu, OP, 5, 0x01),
    (RegOp::Rem, OP, 6, 0x01),
    (RegOp::Remu, OP, 7, 0x01),
    (RegOp::Addw, OP_32, 0, 0x00),
    (RegOp::Subw, OP_32, 0, 0x20),
    (RegOp::Sllw, OP_32, 1, 0x00),
    (RegOp::Srlw, OP_32, 5, 0x00),
    (RegOp::Sraw, OP_32, 5, 0x20),
    (RegOp::Mulw, OP_32, 0, 0x01),
    (RegOp::Divw, OP_32, 4, 0x01),
    (RegOp::Divuw, OP_32, 5, 0x01),
    (RegOp::Remw, OP_32, 6, 0x01),
    (RegOp::Remuw, OP_32, 7, 0x01),
];

const AMO_OPS: [(AmoOp, u32); 9] = [
    (AmoOp::Add, 0b00000),
    (AmoOp::Swap, 0b00001),
    (AmoOp::Xor, 0b00100),
    (AmoOp::Or, 0b01000),
    (AmoOp::And, 0b01100),
    (AmoOp::Min, 0b10000),
    (AmoOp::Max, 0b10100),
    (AmoOp::Minu, 0b11000),
    (AmoOp::Maxu, 0b11100),
];

const AMO_LR: u32 = 0b00010;
const AMO_SC: u32 = 0b00011;

const CSR_OPS: [(CsrOp, u32); 3] = [(CsrOp::Write, 1), (CsrOp::Set, 2), (CsrOp::Clear, 3)];

fn lookup<K: Copy, V: Copy + PartialEq>(table: &[(K, V)], value: V) -> Option<K> {
    table.iter().find(|(_, v)| *v == value).map(|(k, _)| *k)
}

/// Tables list every variant, the default is never used
fn reverse<K: Copy + PartialEq, V: Copy + Default>(table: &[(K, V)], key: K) -> V {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or_default()
}

const fn rd(raw: u32) -> Reg {
    Reg::from_index(raw >> 7)
}

const fn rs1(raw: u32) -> Reg {
    Reg::from_index(raw >> 15)
}

const fn rs2(raw: u32) -> Reg {
    Reg::from_index(raw >> 20)
}

const fn funct3(raw: u32) -> u32 {
    (raw >> 12) & 0b111
}

const fn funct7(raw: u32) -> u32 {
    raw >> 25
}

const fn imm_i(raw: u32) -> i64 {
    ((raw as i32) >> 20) as i64
}

const fn imm_s(raw: u32) -> i64 {
    ((((raw as i32) >> 25) << 5) | ((raw >> 7) & 0x1F) as i32) as i64
}

const fn imm_b(raw: u32) -> i64 {
    ((((raw as i32) >> 31) << 12)
        | (((raw >> 7) & 0x1) << 11) as i32
        | (((raw >> 25) & 0x3F) << 5) as i32
        | (((raw >> 8) & 0xF) << 1) as i32) as i64
}

const fn imm_j(raw: u32) -> i64 {
    ((((raw as i32) >> 31) << 20)
        | (((raw >> 12) & 0xFF) << 12) as i32
        | (((raw >> 20) & 0x1) << 11) as i32
        | (((raw >> 21) & 0x3FF) << 1) as i32) as i64
}

const fn reg(reg: Reg) -> u32 {
    reg.index() as u32
}

const fn r_type(opcode: u32, rd: Reg, funct3: u32, rs1: Reg, rs2: Reg, funct7: u32) -> u32 {
    (funct7 << 25) | (reg(rs2) << 20) | (reg(rs1) << 15) | (funct3 << 12) | (reg(rd) << 7) | opcode
}

const fn i_type(opcode: u32, rd: Reg, funct3: u32, rs1: Reg, imm: i64) -> u32 {
    (((imm as u32) & 0xFFF) << 20) | (reg(rs1) << 15) | (funct3 << 12) | (reg(rd) << 7) | opcode
}

const fn s_type(funct3: u32, rs1: Reg, rs2: Reg, imm: i64) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 0x7F) << 25)
        | (reg(rs2) << 20)
        | (reg(rs1) << 15)
        | (funct3 << 12)
        | ((imm & 0x1F) << 7)
        | OP_STORE
}

const fn b_type(funct3: u32, rs1: Reg, rs2: Reg, offset: i64) -> u32 {
    let imm = offset as u32;
    (((imm >> 12) & 0x1) << 31)
        | (((imm >> 5) & 0x3F) << 25)
        | (reg(rs2) << 20)
        | (reg(rs1) << 15)
        | (funct3 << 12)
        | (((imm >> 1) & 0xF) << 8)
        | (((imm >> 11) & 0x1) << 7)
        | OP_BRANCH
}

const fn u_type(opcode: u32, rd: Reg, imm: u32) -> u32 {
    ((imm & 0xF_FFFF) << 12) | (reg(rd) << 7) | opcode
}

const fn j_type(rd: Reg, offset: i64) -> u32 {
    let imm = offset as u32;
    (((imm >> 20) & 0x1) << 31)
        | (((imm >> 1) & 0x3FF) << 21)
        | (((imm >> 11) & 0x1) << 20)
        | (((imm >> 12) & 0xFF) << 12)
        | (reg(rd) << 7)
        | OP_JAL
}

/// Length in bytes of the instruction starting with these bits
#[must_use]
pub const fn length(raw: u32) -> u64 {
    if raw & 0b11 == 0b11 {
        4
    } else {
        2
    }
}

impl Instruction {
    /// Decode a 32-bit instruction
    ///
    /// # Errors
    ///
    /// Returns an illegal instruction exception carrying the raw bits when
    /// the encoding is not supported
    pub fn decode(raw: u32) -> Result<Self, Exception> {
        Self::decode_inner(raw).ok_or(Exception::IllegalInstruction(raw))
    }

    /// Decode the instruction held in the low bits of `raw`, compressed or
    /// not, along with its length in bytes
    ///
    /// # Errors
    ///
    /// Same as [`Instruction::decode`]
    pub fn decode_parcel(raw: u32) -> Result<(Self, u64), Exception> {
        match length(raw) {
            2 => Ok((Self::decode_compressed(raw as u16)?, 2)),
            len => Ok((Self::decode(raw)?, len)),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn decode_inner(raw: u32) -> Option<Self> {
        let inst = match raw & 0x7F {
            OP_LUI => Self::Lui {
                rd: rd(raw),
                imm: raw >> 12,
            },
            OP_AUIPC => Self::Auipc {
                rd: rd(raw),
                imm: raw >> 12,
            },
            OP_JAL => Self::Jal {
                rd: rd(raw),
                offset: imm_j(raw),
            },
            OP_JALR if funct3(raw) == 0 => Self::Jalr {
                rd: rd(raw),
                rs1: rs1(raw),
                offset: imm_i(raw),
            },
            OP_BRANCH => Self::Branch {
                cond: lookup(&BRANCHES, funct3(raw))?,
                rs1: rs1(raw),
                rs2: rs2(raw),
                offset: imm_b(raw),
            },
            OP_LOAD => Self::Load {
                width: lookup(&LOADS, funct3(raw))?,
                rd: rd(raw),
                rs1: rs1(raw),
                offset: imm_i(raw),
            },
            OP_STORE => Self::Store {
                width: lookup(&STORES, funct3(raw))?,
                rs1: rs1(raw),
                rs2: rs2(raw),
                offset: imm_s(raw),
            },
            opcode @ (OP_IMM | OP_IMM_32) => Self::decode_op_imm(raw, opcode)?,
            opcode @ (OP | OP_32) => {
                let (op, ..) = REG_OPS.iter().find(|(_, o, f3, f7)| {
                    *o == opcode && *f3 == funct3(raw) && *f7 == funct7(raw)
                })?;
                Self::Op {
                    op: *op,
                    rd: rd(raw),
                    rs1: rs1(raw),
                    rs2: rs2(raw),
                }
            }
            OP_MISC_MEM => match funct3(raw) {
                0 => Self::Fence,
                1 => Self::FenceI,
                _ => return None,
            },
            OP_SYSTEM => Self::decode_system(raw)?,
            OP_AMO => Self::decode_amo(raw)?,
            _ => return None,
        };
        Some(inst)
    }

    fn decode_op_imm(raw: u32, opcode: u32) -> Option<Self> {
        let f3 = funct3(raw);
        let (op, imm) = match (opcode, f3) {
            // 6-bit shift amount, bit 30 selects the arithmetic shift
            (OP_IMM, 1) if raw >> 26 == 0 => (ImmOp::Slli, (raw >> 20) & 0x3F),
            (OP_IMM, 5) if raw >> 26 == 0 => (ImmOp::Srli, (raw >> 20) & 0x3F),
            (OP_IMM, 5) if raw >> 26 == 0x10 => (ImmOp::Srai, (raw >> 20) & 0x3F),
            (OP_IMM_32, 1) if funct7(raw) == 0 => (ImmOp::Slliw, (raw >> 20) & 0x1F),
            (OP_IMM_32, 5) if funct7(raw) == 0 => (ImmOp::Srliw, (raw >> 20) & 0x1F),
            (OP_IMM_32, 5) if funct7(raw) == 0x20 => (ImmOp::Sraiw, (raw >> 20) & 0x1F),
            (_, 1 | 5) => return None,
            _ => {
                let (op, ..) = IMM_OPS.iter().find(|(_, o, f)| *o == opcode && *f == f3)?;
                return Some(Self::OpImm {
                    op: *op,
                    rd: rd(raw),
                    rs1: rs1(raw),
                    imm: imm_i(raw),
                });
            }
        };

        Some(Self::OpImm {
            op,
            rd: rd(raw),
            rs1: rs1(raw),
            imm: imm.into(),
        })
    }

    fn decode_system(raw: u32) -> Option<Self> {
        let f3 = funct3(raw);
        if f3 == 0 {
            return match raw {
                ECALL => Some(Self::Ecall),
                EBREAK => Some(Self::Ebreak),
                SRET => Some(Self::Sret),
                MRET => Some(Self::Mret),
                WFI => Some(Self::Wfi),
                _ if funct7(raw) == 0x09 && rd(raw) == Reg::Zero => Some(Self::SfenceVma {
                    rs1: rs1(raw),
                    rs2: rs2(raw),
                }),
                _ => None,
            };
        }

        let op = lookup(&CSR_OPS, f3 & 0b11)?;
        let csr = Csr((raw >> 20) as u16);
        Some(if f3 & 0b100 == 0 {
            Self::Csr {
                op,
                rd: rd(raw),
                csr,
                rs1: rs1(raw),
            }
        } else {
            Self::CsrImm {
                op,
                rd: rd(raw),
                csr,
                uimm: (raw >> 15) & 0x1F,
            }
        })
    }

    fn decode_amo(raw: u32) -> Option<Self> {
        let width = match funct3(raw) {
            2 => AmoWidth::W,
            3 => AmoWidth::D,
            _ => return None,
        };

        // Bits 26 and 25 are the ordering hints, irrelevant on a single hart
        let inst = match raw >> 27 {
            AMO_LR if rs2(raw) == Reg::Zero => Self::LoadReserved {
                width,
                rd: rd(raw),
                rs1: rs1(raw),
            },
            AMO_LR => return None,
            AMO_SC => Self::StoreConditional {
                width,
                rd: rd(raw),
                rs1: rs1(raw),
                rs2: rs2(raw),
            },
            funct5 => Self::Amo {
                op: lookup(&AMO_OPS, funct5)?,
                width,
                rd: rd(raw),
                rs1: rs1(raw),
                rs2: rs2(raw),
            },
        };
        Some(inst)
    }

    /// Encode as a 32-bit instruction
    #[must_use]
    pub fn encode(&self) -> u32 {
        match *self {
            Self::Lui { rd, imm } => u_type(OP_LUI, rd, imm),
            Self::Auipc { rd, imm } => u_type(OP_AUIPC, rd, imm),
            Self::Jal { rd, offset } => j_type(rd, offset),
            Self::Jalr { rd, rs1, offset } => i_type(OP_JALR, rd, 0, rs1, offset),
            Self::Branch {
                cond,
                rs1,
                rs2,
                offset,
            } => b_type(reverse(&BRANCHES, cond), rs1, rs2, offset),
            Self::Load {
                width,
                rd,
                rs1,
                offset,
            } => i_type(OP_LOAD, rd, reverse(&LOADS, width), rs1, offset),
            Self::Store {
                width,
                rs1,
                rs2,
                offset,
            } => s_type(reverse(&STORES, width), rs1, rs2, offset),
            Self::OpImm { op, rd, rs1, imm } => {
                let (opcode, f3) = IMM_OPS
                    .iter()
                    .find(|(o, ..)| *o == op)
                    .map_or((OP_IMM, 0), |(_, opcode, f3)| (*opcode, *f3));
                let imm = match op {
                    ImmOp::Srai | ImmOp::Sraiw => (imm & 0x3F) | 0x400,
                    _ => imm,
                };
                i_type(opcode, rd, f3, rs1, imm)
            }
            Self::Op { op, rd, rs1, rs2 } => {
                let (opcode, f3, f7) = REG_OPS
                    .iter()
                    .find(|(o, ..)| *o == op)
                    .map_or((OP, 0, 0), |(_, opcode, f3, f7)| (*opcode, *f3, *f7));
                r_type(opcode, rd, f3, rs1, rs2, f7)
            }
            Self::Fence => FENCE,
            Self::FenceI => FENCE_I,
            Self::Ecall => ECALL,
            Self::Ebreak => EBREAK,
            Self::Mret => MRET,
            Self::Sret => SRET,
            Self::Wfi => WFI,
            Self::SfenceVma { rs1, rs2 } => r_type(OP_SYSTEM, Reg::Zero, 0, rs1, rs2, 0x09),
            Self::Csr { op, rd, csr, rs1 } => {
                i_type(OP_SYSTEM, rd, reverse(&CSR_OPS, op), rs1, csr.0.into())
            }
            Self::CsrImm { op, rd, csr, uimm } => i_type(
                OP_SYSTEM,
                rd,
                reverse(&CSR_OPS, op) | 0b100,
                Reg::from_index(uimm),
                csr.0.into(),
            ),
            Self::LoadReserved { width, rd, rs1 } => {
                r_type(OP_AMO, rd, amo_funct3(width), rs1, Reg::Zero, AMO_LR << 2)
            }
            Self::StoreConditional {
                width,
                rd,
                rs1,
                rs2,
            } => r_type(OP_AMO, rd, amo_funct3(width), rs1, rs2, AMO_SC << 2),
            Self::Amo {
                op,
                width,
                rd,
                rs1,
                rs2,
            } => r_type(
                OP_AMO,
                rd,
                amo_funct3(width),
                rs1,
                rs2,
                reverse(&AMO_OPS, op) << 2,
            ),
        }
    }

    /// Whether this instruction may move the PC somewhere else than the next
    /// instruction
    #[must_use]
    pub const fn is_control_transfer(&self) -> bool {
        matches!(self, Self::Jal { .. } | Self::Jalr { .. } | Self::Branch { .. })
    }
}

const fn amo_funct3(width: AmoWidth) -> u32 {
    match width {
        AmoWidth::W => 2,
        AmoWidth::D => 3,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn disassemble(raw: u32) -> String {
        Instruction::decode(raw).unwrap().to_string()
    }

    #[test]
    fn decode_test() {
        assert_eq!(disassemble(0x0480_0513), "addi a0, zero, 72");
        assert_eq!(disassemble(0x1000_02B7), "lui t0, 65536");
        assert_eq!(disassemble(0x00A2_8023), "sb a0, 0(t0)");
        assert_eq!(disassemble(0x0000_006F), "jal zero, 0");
        assert_eq!(disassemble(0x0000_8067), "jalr zero, 0(ra)");
        assert_eq!(disassemble(0xFE05_1EE3), "bne a0, zero, -4");
        assert_eq!(disassemble(0xFF01_0113), "addi sp, sp, -16");
        assert_eq!(disassemble(0x0081_3403), "ld s0, 8(sp)");
        assert_eq!(disassemble(0x0081_3423), "sd s0, 8(sp)");
        assert_eq!(disassemble(0x4020_5513), "srai a0, zero, 2");
        assert_eq!(disassemble(0x03F5_1513), "slli a0, a0, 63");
        assert_eq!(disassemble(0x02B5_0533), "mul a0, a0, a1");
        assert_eq!(disassemble(0x02B5_453B), "divw a0, a0, a1");
        assert_eq!(disassemble(0x4000_05B3), "sub a1, zero, zero");
        assert_eq!(disassemble(0x3410_2573), "csrrs a0, mepc, zero");
        assert_eq!(disassemble(0x3002_A073), "csrrs zero, mstatus, t0");
        assert_eq!(disassemble(0x1000_7073), "csrrci zero, sstatus, 0");
        assert_eq!(disassemble(0x1000_5073), "csrrwi zero, sstatus, 0");
        assert_eq!(disassemble(0x1005_2AAF), "lr.w s5, (a0)");
        assert_eq!(disassemble(0x18B5_3AAF), "sc.d s5, a1, (a0)");
        assert_eq!(disassemble(0x08B5_2AAF), "amoswap.w s5, a1, (a0)");
        assert_eq!(disassemble(0x3020_0073), "mret");
        assert_eq!(disassemble(0x1200_0073), "sfence.vma zero, zero");
        assert_eq!(disassemble(0x0FF0_000F), "fence");
    }

    #[test]
    fn illegal_test() {
        for raw in [
            0x0000_0000u32,
            0xFFFF_FFFF,
            // OP with an unknown funct7
            0x0400_0033,
            // Reserved load width
            0x0000_7003,
            // slli with a 7-bit shift amount field
            0x0400_1013,
            // lr with a non-zero rs2
            0x1015_2AAF,
            // Floating-point load
            0x0000_2007,
            // uret
            0x0020_0073,
        ] {
            assert_eq!(
                Instruction::decode(raw),
                Err(Exception::IllegalInstruction(raw)),
                "{raw:#010x}"
            );
        }
    }

    #[test]
    fn encode_test() {
        for raw in [
            0x0480_0513u32,
            0x1000_02B7,
            0x00A2_8023,
            0x0000_006F,
            0xFE05_1EE3,
            0x0081_3423,
            0x4020_5513,
            0x4020_551B,
            0x02B5_453B,
            0x3410_2573,
            0x1000_7073,
            0x1005_2AAF,
            0x18B5_3AAF,
            0xE0B5_2AAF,
            0x1200_0073,
            0x0000_0073,
            0x0010_0073,
            0x1050_0073,
            0x7FF0_006F,
            0x8000_00EF,
        ] {
            let inst = Instruction::decode(raw).unwrap();
            assert_eq!(inst.encode(), raw, "{inst}");
        }
    }

    #[test]
    fn immediates_test() {
        let jal = Instruction::Jal {
            rd: Reg::Ra,
            offset: -1_048_576,
        };
        assert_eq!(Instruction::decode(jal.encode()), Ok(jal));

        let branch = Instruction::Branch {
            cond: BranchCond::Geu,
            rs1: Reg::T0,
            rs2: Reg::T1,
            offset: 4094,
        };
        assert_eq!(Instruction::decode(branch.encode()), Ok(branch));

        let store = Instruction::Store {
            width: StoreWidth::W,
            rs1: Reg::Sp,
            rs2: Reg::A5,
            offset: -2048,
        };
        assert_eq!(Instruction::decode(store.encode()), Ok(store));
    }
}
