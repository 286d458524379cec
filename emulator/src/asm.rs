//! Program builder: pseudo-instruction expansion and flat images
//!
//! ```
//! use rivet_emulator::asm::{assemble, halt, li};
//! use rivet_emulator::runtime::Reg;
//!
//! let mut program = li(Reg::A0, 0x1234_5678);
//! program.push(halt());
//! assert_eq!(assemble(&program).len(), 12);
//! ```

use crate::runtime::instructions::{ImmOp, Instruction};
use crate::runtime::Reg;

const fn sign_extend_12(value: i64) -> i64 {
    ((value & 0xFFF) << 52) >> 52
}

const fn op_imm(op: ImmOp, rd: Reg, rs1: Reg, imm: i64) -> Instruction {
    Instruction::OpImm { op, rd, rs1, imm }
}

/// Load any 64-bit constant in `rd`
///
/// 32-bit values take a `lui`/`addiw` pair at most. Wider values are built
/// from their upper bits, shifted and completed by an `addi`.
#[must_use]
pub fn li(rd: Reg, value: i64) -> Vec<Instruction> {
    let low = sign_extend_12(value);

    if i32::try_from(value).is_ok() {
        let high = (((value + 0x800) >> 12) & 0xF_FFFF) as u32;
        let mut program = Vec::with_capacity(2);
        if high != 0 {
            program.push(Instruction::Lui { rd, imm: high });
        }
        if high == 0 {
            program.push(op_imm(ImmOp::Addi, rd, Reg::Zero, low));
        } else if low != 0 {
            program.push(op_imm(ImmOp::Addiw, rd, rd, low));
        }
        return program;
    }

    // Upper bits, with the trailing zeros folded in the shift
    let upper = value.wrapping_sub(low) >> 12;
    let zeros = upper.trailing_zeros();
    let mut program = li(rd, upper >> zeros);
    program.push(op_imm(ImmOp::Slli, rd, rd, i64::from(12 + zeros)));
    if low != 0 {
        program.push(op_imm(ImmOp::Addi, rd, rd, low));
    }
    program
}

#[must_use]
pub const fn mv(rd: Reg, rs: Reg) -> Instruction {
    op_imm(ImmOp::Addi, rd, rs, 0)
}

#[must_use]
pub const fn nop() -> Instruction {
    op_imm(ImmOp::Addi, Reg::Zero, Reg::Zero, 0)
}

/// Jump relative to this instruction
#[must_use]
pub const fn j(offset: i64) -> Instruction {
    Instruction::Jal {
        rd: Reg::Zero,
        offset,
    }
}

#[must_use]
pub const fn ret() -> Instruction {
    Instruction::Jalr {
        rd: Reg::Zero,
        rs1: Reg::Ra,
        offset: 0,
    }
}

/// Jump to self. Stops the machine when no interrupt can be taken.
#[must_use]
pub const fn halt() -> Instruction {
    j(0)
}

/// Encode a program as a flat, little-endian image
#[must_use]
pub fn assemble(program: &[Instruction]) -> Vec<u8> {
    program
        .iter()
        .flat_map(|inst| inst.encode().to_le_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::tests::computer;

    /// Run the expansion of `li a0, value` and read back `a0`
    fn load(value: i64) -> (usize, u64) {
        let program = li(Reg::A0, value);
        let mut computer = computer(&program);
        for _ in 0..program.len() {
            computer.step().unwrap();
        }
        (program.len(), computer.registers.get(Reg::A0))
    }

    #[test]
    fn li_test() {
        assert_eq!(load(0), (1, 0));
        assert_eq!(load(-1), (1, u64::MAX));
        assert_eq!(load(2047), (1, 2047));
        assert_eq!(load(-2048), (1, (-2048i64) as u64));
        assert_eq!(load(2048), (2, 2048));
        assert_eq!(load(0x1000_0000), (1, 0x1000_0000));
        assert_eq!(load(0x7FFF_FFFF), (2, 0x7FFF_FFFF));
        assert_eq!(load(-0x8000_0000), (1, 0xFFFF_FFFF_8000_0000));
        assert_eq!(load(0x8000_0000), (2, 0x8000_0000));
        assert_eq!(load(0xFFFF_FFFF), (3, 0xFFFF_FFFF));
        assert_eq!(load(0xDEAD_BEEF), (4, 0xDEAD_BEEF));
        assert_eq!(load(i64::MIN), (2, 1 << 63));
        assert_eq!(load(i64::MAX), (3, i64::MAX as u64));
        assert_eq!(load(0x1234_5678_9ABC_DEF0), (8, 0x1234_5678_9ABC_DEF0));
    }

    #[test]
    fn pseudo_test() {
        let program: Vec<String> = [mv(Reg::A0, Reg::Sp), nop(), j(-8), ret(), halt()]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            program,
            [
                "addi a0, sp, 0",
                "addi zero, zero, 0",
                "jal zero, -8",
                "jalr zero, 0(ra)",
                "jal zero, 0"
            ]
        );
    }

    #[test]
    fn assemble_test() {
        assert_eq!(
            assemble(&[nop(), halt()]),
            [0x13, 0x00, 0x00, 0x00, 0x6F, 0x00, 0x00, 0x00]
        );
    }
}
