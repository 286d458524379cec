//! Instruction semantics

use super::csr::{Csr, Mstatus};
use super::exception::{AccessType, Exception, Privilege};
use super::instructions::{
    AmoOp, AmoWidth, BranchCond, CsrOp, ImmOp, Instruction, LoadWidth, RegOp, StoreWidth,
};
use super::memory::{AccessFault, Width};
use super::registers::Reg;
use super::Computer;
use crate::constants::{Address, Word};

const fn sign_extend_32(value: u32) -> Word {
    value as i32 as i64 as Word
}

/// Sign-extend the low `width` bytes of `value`
const fn sign_extend(value: Word, width: Width) -> Word {
    let shift = 64 - 8 * width.bytes();
    (((value << shift) as i64) >> shift) as Word
}

const fn branch_taken(cond: BranchCond, a: Word, b: Word) -> bool {
    match cond {
        BranchCond::Eq => a == b,
        BranchCond::Ne => a != b,
        BranchCond::Lt => (a as i64) < (b as i64),
        BranchCond::Ge => (a as i64) >= (b as i64),
        BranchCond::Ltu => a < b,
        BranchCond::Geu => a >= b,
    }
}

/// Register-register counterpart of an immediate operation
const fn register_op(op: ImmOp) -> RegOp {
    match op {
        ImmOp::Addi => RegOp::Add,
        ImmOp::Slti => RegOp::Slt,
        ImmOp::Sltiu => RegOp::Sltu,
        ImmOp::Xori => RegOp::Xor,
        ImmOp::Ori => RegOp::Or,
        ImmOp::Andi => RegOp::And,
        ImmOp::Slli => RegOp::Sll,
        ImmOp::Srli => RegOp::Srl,
        ImmOp::Srai => RegOp::Sra,
        ImmOp::Addiw => RegOp::Addw,
        ImmOp::Slliw => RegOp::Sllw,
        ImmOp::Srliw => RegOp::Srlw,
        ImmOp::Sraiw => RegOp::Sraw,
    }
}

/// Integer ALU, with the RISC-V results for division by zero and overflow
fn alu(op: RegOp, a: Word, b: Word) -> Word {
    let shamt = b & 0x3F;
    let shamt_w = b & 0x1F;
    let (a_w, b_w) = (a as u32, b as u32);

    match op {
        RegOp::Add => a.wrapping_add(b),
        RegOp::Sub => a.wrapping_sub(b),
        RegOp::Sll => a << shamt,
        RegOp::Slt => Word::from((a as i64) < (b as i64)),
        RegOp::Sltu => Word::from(a < b),
        RegOp::Xor => a ^ b,
        RegOp::Srl => a >> shamt,
        RegOp::Sra => ((a as i64) >> shamt) as Word,
        RegOp::Or => a | b,
        RegOp::And => a & b,

        RegOp::Mul => a.wrapping_mul(b),
        RegOp::Mulh => ((i128::from(a as i64) * i128::from(b as i64)) >> 64) as Word,
        RegOp::Mulhsu => ((i128::from(a as i64) * i128::from(b)) >> 64) as Word,
        RegOp::Mulhu => ((u128::from(a) * u128::from(b)) >> 64) as Word,
        RegOp::Div if b == 0 => Word::MAX,
        RegOp::Div => (a as i64).wrapping_div(b as i64) as Word,
        RegOp::Divu => a.checked_div(b).unwrap_or(Word::MAX),
        RegOp::Rem if b == 0 => a,
        RegOp::Rem => (a as i64).wrapping_rem(b as i64) as Word,
        RegOp::Remu => a.checked_rem(b).unwrap_or(a),

        RegOp::Addw => sign_extend_32(a_w.wrapping_add(b_w)),
        RegOp::Subw => sign_extend_32(a_w.wrapping_sub(b_w)),
        RegOp::Sllw => sign_extend_32(a_w << shamt_w),
        RegOp::Srlw => sign_extend_32(a_w >> shamt_w),
        RegOp::Sraw => sign_extend_32(((a_w as i32) >> shamt_w) as u32),
        RegOp::Mulw => sign_extend_32(a_w.wrapping_mul(b_w)),
        RegOp::Divw if b_w == 0 => Word::MAX,
        RegOp::Divw => sign_extend_32((a_w as i32).wrapping_div(b_w as i32) as u32),
        RegOp::Divuw => a_w.checked_div(b_w).map_or(Word::MAX, sign_extend_32),
        RegOp::Remw if b_w == 0 => sign_extend_32(a_w),
        RegOp::Remw => sign_extend_32((a_w as i32).wrapping_rem(b_w as i32) as u32),
        RegOp::Remuw => sign_extend_32(a_w.checked_rem(b_w).unwrap_or(a_w)),
    }
}

const fn amo_width(width: AmoWidth) -> Width {
    match width {
        AmoWidth::W => Width::Word,
        AmoWidth::D => Width::Double,
    }
}

/// New memory value of an AMO, `old` being sign-extended to 64 bits
fn amo(op: AmoOp, width: AmoWidth, old: Word, operand: Word) -> Word {
    let operand = match width {
        AmoWidth::W => sign_extend_32(operand as u32),
        AmoWidth::D => operand,
    };
    let (signed_old, signed_operand) = (old as i64, operand as i64);
    let (unsigned_old, unsigned_operand) = match width {
        AmoWidth::W => (old & 0xFFFF_FFFF, operand & 0xFFFF_FFFF),
        AmoWidth::D => (old, operand),
    };

    match op {
        AmoOp::Swap => operand,
        AmoOp::Add => old.wrapping_add(operand),
        AmoOp::Xor => old ^ operand,
        AmoOp::And => old & operand,
        AmoOp::Or => old | operand,
        AmoOp::Min if signed_old <= signed_operand => old,
        AmoOp::Max if signed_old >= signed_operand => old,
        AmoOp::Minu if unsigned_old <= unsigned_operand => old,
        AmoOp::Maxu if unsigned_old >= unsigned_operand => old,
        AmoOp::Min | AmoOp::Max | AmoOp::Minu | AmoOp::Maxu => operand,
    }
}

const fn load_width(width: LoadWidth) -> (Width, bool) {
    match width {
        LoadWidth::B => (Width::Byte, true),
        LoadWidth::H => (Width::Half, true),
        LoadWidth::W => (Width::Word, true),
        LoadWidth::D => (Width::Double, false),
        LoadWidth::Bu => (Width::Byte, false),
        LoadWidth::Hu => (Width::Half, false),
        LoadWidth::Wu => (Width::Word, false),
    }
}

const fn store_width(width: StoreWidth) -> Width {
    match width {
        StoreWidth::B => Width::Byte,
        StoreWidth::H => Width::Half,
        StoreWidth::W => Width::Word,
        StoreWidth::D => Width::Double,
    }
}

impl Computer {
    /// Execute a decoded instruction of `len` bytes
    ///
    /// Nothing is modified when an exception is returned, the instruction is
    /// to be trapped on.
    #[allow(clippy::too_many_lines)]
    pub(crate) fn execute(
        &mut self,
        inst: Instruction,
        raw: u32,
        len: u64,
    ) -> Result<(), Exception> {
        let pc = self.registers.pc;
        let next = pc.wrapping_add(len);
        let mut target = next;
        let privileged = Exception::PrivilegedInstruction(raw);

        match inst {
            Instruction::Lui { rd, imm } => self.registers.set(rd, sign_extend_32(imm << 12)),
            Instruction::Auipc { rd, imm } => {
                self.registers
                    .set(rd, pc.wrapping_add(sign_extend_32(imm << 12)));
            }
            Instruction::Jal { rd, offset } => {
                target = pc.wrapping_add_signed(offset);
                self.registers.set(rd, next);
            }
            Instruction::Jalr { rd, rs1, offset } => {
                target = self.registers.get(rs1).wrapping_add_signed(offset) & !1;
                self.registers.set(rd, next);
            }
            Instruction::Branch {
                cond,
                rs1,
                rs2,
                offset,
            } => {
                if branch_taken(cond, self.registers.get(rs1), self.registers.get(rs2)) {
                    target = pc.wrapping_add_signed(offset);
                }
            }
            Instruction::Load {
                width,
                rd,
                rs1,
                offset,
            } => {
                let address = self.registers.get(rs1).wrapping_add_signed(offset);
                let (width, signed) = load_width(width);
                let value = self.load(address, width)?;
                let value = if signed {
                    sign_extend(value, width)
                } else {
                    value
                };
                self.registers.set(rd, value);
            }
            Instruction::Store {
                width,
                rs1,
                rs2,
                offset,
            } => {
                let address = self.registers.get(rs1).wrapping_add_signed(offset);
                self.store(address, store_width(width), self.registers.get(rs2))?;
            }
            Instruction::OpImm { op, rd, rs1, imm } => {
                let value = alu(register_op(op), self.registers.get(rs1), imm as Word);
                self.registers.set(rd, value);
            }
            Instruction::Op { op, rd, rs1, rs2 } => {
                let value = alu(op, self.registers.get(rs1), self.registers.get(rs2));
                self.registers.set(rd, value);
            }

            // Accesses are never reordered and there is no instruction cache
            Instruction::Fence | Instruction::FenceI => {}

            Instruction::Ecall => return Err(Exception::EnvironmentCall(self.privilege)),
            Instruction::Ebreak => return Err(Exception::Breakpoint(pc)),

            Instruction::Mret => {
                if self.privilege < Privilege::Machine {
                    return Err(privileged);
                }
                self.mret();
                return Ok(());
            }
            Instruction::Sret => {
                if self.privilege == Privilege::User
                    || (self.privilege == Privilege::Supervisor
                        && self.csrs.mstatus.contains(Mstatus::TSR))
                {
                    return Err(privileged);
                }
                self.sret();
                return Ok(());
            }
            // Waiting is a no-op, the next step checks for interrupts anyway
            Instruction::Wfi => {
                if self.privilege == Privilege::User
                    || (self.privilege == Privilege::Supervisor
                        && self.csrs.mstatus.contains(Mstatus::TW))
                {
                    return Err(privileged);
                }
            }
            // There is no TLB to flush
            Instruction::SfenceVma { .. } => {
                if self.privilege == Privilege::User
                    || (self.privilege == Privilege::Supervisor
                        && self.csrs.mstatus.contains(Mstatus::TVM))
                {
                    return Err(privileged);
                }
            }

            Instruction::Csr { op, rd, csr, rs1 } => {
                let operand = self.registers.get(rs1);
                self.csr_access(op, rd, csr, operand, rs1 != Reg::Zero, raw)?;
            }
            Instruction::CsrImm { op, rd, csr, uimm } => {
                self.csr_access(op, rd, csr, uimm.into(), uimm != 0, raw)?;
            }

            Instruction::LoadReserved { width, rd, rs1 } => {
                let address = self.registers.get(rs1);
                let width = amo_width(width);
                if address % width.bytes() != 0 {
                    return Err(Exception::LoadMisaligned(address));
                }
                let physical = self.translate(address, AccessType::Load)?;
                let value = self
                    .bus
                    .read(physical, width)
                    .map_err(|_| Exception::LoadAccessFault(address))?;
                self.reservation = Some(physical);
                self.registers.set(rd, sign_extend(value, width));
            }
            Instruction::StoreConditional {
                width,
                rd,
                rs1,
                rs2,
            } => {
                let address = self.registers.get(rs1);
                let physical = self.atomic_address(address, amo_width(width))?;
                let success = self.reservation == Some(physical);
                if success {
                    self.bus
                        .write(physical, amo_width(width), self.registers.get(rs2))
                        .map_err(|_| Exception::StoreAccessFault(address))?;
                }
                self.reservation = None;
                self.registers.set(rd, Word::from(!success));
            }
            Instruction::Amo {
                op,
                width,
                rd,
                rs1,
                rs2,
            } => {
                let address = self.registers.get(rs1);
                let physical = self.atomic_address(address, amo_width(width))?;
                let fault = |_: AccessFault| Exception::StoreAccessFault(address);
                let old = self
                    .bus
                    .read(physical, amo_width(width))
                    .map_err(fault)?;
                let old = sign_extend(old, amo_width(width));
                let new = amo(op, width, old, self.registers.get(rs2));
                self.bus
                    .write(physical, amo_width(width), new)
                    .map_err(fault)?;
                self.registers.set(rd, old);
            }
        }

        self.registers.pc = target;
        Ok(())
    }

    /// Translate the address of an `sc` or AMO, which must be aligned
    fn atomic_address(&mut self, address: Address, width: Width) -> Result<Address, Exception> {
        if address % width.bytes() != 0 {
            return Err(Exception::StoreMisaligned(address));
        }
        self.translate(address, AccessType::Store)
    }

    /// Read-modify-write of a CSR. Set and clear with a zero operand do not
    /// write, so they work on read-only registers.
    fn csr_access(
        &mut self,
        op: CsrOp,
        rd: Reg,
        csr: Csr,
        operand: Word,
        nonzero_operand: bool,
        raw: u32,
    ) -> Result<(), Exception> {
        let writes = op == CsrOp::Write || nonzero_operand;
        self.csrs
            .check(csr, self.privilege, writes)
            .map_err(|fault| fault.exception(raw))?;

        let old = self.csrs.read(csr);
        if writes {
            // Bits driven by devices are not latched by a read-modify-write
            let current = match csr {
                Csr::MIP | Csr::SIP => self.csrs.mip,
                _ => old,
            };
            let value = match op {
                CsrOp::Write => operand,
                CsrOp::Set => current | operand,
                CsrOp::Clear => current & !operand,
            };
            self.csrs.write(csr, value);
        }

        self.registers.set(rd, old);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::tests::{computer, START};

    /// Execute a single instruction with `a0 = a` and `a1 = b`, returning `a2`
    fn run_op(op: RegOp, a: Word, b: Word) -> Word {
        let mut computer = computer(&[]);
        computer.registers.set(Reg::A0, a);
        computer.registers.set(Reg::A1, b);
        let inst = Instruction::Op {
            op,
            rd: Reg::A2,
            rs1: Reg::A0,
            rs2: Reg::A1,
        };
        computer.execute(inst, inst.encode(), 4).unwrap();
        computer.registers.get(Reg::A2)
    }

    #[test]
    fn arithmetic_test() {
        assert_eq!(run_op(RegOp::Add, u64::MAX, 2), 1);
        assert_eq!(run_op(RegOp::Sub, 0, 1), u64::MAX);
        assert_eq!(run_op(RegOp::Sll, 1, 65), 2);
        assert_eq!(run_op(RegOp::Sra, (-16i64) as Word, 2), (-4i64) as Word);
        assert_eq!(run_op(RegOp::Srl, (-16i64) as Word, 60), 0xF);
        assert_eq!(run_op(RegOp::Slt, (-1i64) as Word, 0), 1);
        assert_eq!(run_op(RegOp::Sltu, (-1i64) as Word, 0), 0);
        assert_eq!(run_op(RegOp::Addw, 0x7FFF_FFFF, 1), 0xFFFF_FFFF_8000_0000);
        assert_eq!(run_op(RegOp::Sraw, 0x8000_0000, 4), 0xFFFF_FFFF_F800_0000);
        assert_eq!(run_op(RegOp::Srlw, 0xFFFF_FFFF_8000_0000, 4), 0x0800_0000);
    }

    #[test]
    fn multiplication_test() {
        assert_eq!(run_op(RegOp::Mul, 6, (-7i64) as Word), (-42i64) as Word);
        assert_eq!(run_op(RegOp::Mulh, (-1i64) as Word, (-1i64) as Word), 0);
        assert_eq!(run_op(RegOp::Mulhu, u64::MAX, u64::MAX), u64::MAX - 1);
        assert_eq!(run_op(RegOp::Mulhsu, (-1i64) as Word, u64::MAX), u64::MAX);
        assert_eq!(run_op(RegOp::Mulw, 0x1_0000, 0x1_0000), 0);
    }

    #[test]
    fn division_test() {
        let min = i64::MIN as Word;
        let minus_one = (-1i64) as Word;

        assert_eq!(run_op(RegOp::Div, 42, 0), u64::MAX);
        assert_eq!(run_op(RegOp::Divu, 42, 0), u64::MAX);
        assert_eq!(run_op(RegOp::Rem, 42, 0), 42);
        assert_eq!(run_op(RegOp::Remu, 42, 0), 42);
        assert_eq!(run_op(RegOp::Div, min, minus_one), min);
        assert_eq!(run_op(RegOp::Rem, min, minus_one), 0);
        assert_eq!(run_op(RegOp::Div, (-7i64) as Word, 2), (-3i64) as Word);
        assert_eq!(run_op(RegOp::Rem, (-7i64) as Word, 2), minus_one);

        let min_w = 0xFFFF_FFFF_8000_0000;
        assert_eq!(run_op(RegOp::Divw, 42, 0), u64::MAX);
        assert_eq!(run_op(RegOp::Divuw, 42, 0), u64::MAX);
        assert_eq!(run_op(RegOp::Remw, 0x8000_0000, 0), min_w);
        assert_eq!(run_op(RegOp::Remuw, 0x8000_0000, 0), min_w);
        assert_eq!(run_op(RegOp::Divw, 0x8000_0000, minus_one), min_w);
        assert_eq!(run_op(RegOp::Remw, 0x8000_0000, minus_one), 0);
        assert_eq!(run_op(RegOp::Divuw, 0xFFFF_FFFF, 1), u64::MAX);
    }

    #[test]
    fn upper_immediate_test() {
        let mut computer = computer(&[]);
        let lui = Instruction::Lui {
            rd: Reg::A0,
            imm: 0x8_0000,
        };
        computer.execute(lui, lui.encode(), 4).unwrap();
        assert_eq!(computer.registers.get(Reg::A0), 0xFFFF_FFFF_8000_0000);

        let auipc = Instruction::Auipc {
            rd: Reg::A1,
            imm: 1,
        };
        computer.execute(auipc, auipc.encode(), 4).unwrap();
        assert_eq!(computer.registers.get(Reg::A1), START + 4 + 0x1000);
    }

    #[test]
    fn jump_test() {
        let mut computer = computer(&[]);
        computer.registers.set(Reg::T0, START + 0x101);
        let jalr = Instruction::Jalr {
            rd: Reg::T0,
            rs1: Reg::T0,
            offset: 0x10,
        };
        computer.execute(jalr, jalr.encode(), 4).unwrap();
        // The low bit is cleared, and rd is written after reading rs1
        assert_eq!(computer.registers.pc, START + 0x110);
        assert_eq!(computer.registers.get(Reg::T0), START + 4);

        let branch = Instruction::Branch {
            cond: BranchCond::Ltu,
            rs1: Reg::Zero,
            rs2: Reg::T0,
            offset: -16,
        };
        computer.execute(branch, branch.encode(), 4).unwrap();
        assert_eq!(computer.registers.pc, START + 0x100);
    }

    #[test]
    fn load_store_test() {
        let mut computer = computer(&[]);
        computer.registers.set(Reg::Sp, START + 0x1000);
        computer.registers.set(Reg::A0, 0xFFFF_FFFF_FFFF_FF80);

        let sd = Instruction::Store {
            width: StoreWidth::D,
            rs1: Reg::Sp,
            rs2: Reg::A0,
            offset: -8,
        };
        computer.execute(sd, sd.encode(), 4).unwrap();

        for (width, expected) in [
            (LoadWidth::B, 0xFFFF_FFFF_FFFF_FF80),
            (LoadWidth::Bu, 0x80),
            (LoadWidth::Hu, 0xFF80),
            (LoadWidth::W, 0xFFFF_FFFF_FFFF_FF80),
            (LoadWidth::Wu, 0xFFFF_FF80),
            (LoadWidth::D, 0xFFFF_FFFF_FFFF_FF80),
        ] {
            let load = Instruction::Load {
                width,
                rd: Reg::A1,
                rs1: Reg::Sp,
                offset: -8,
            };
            computer.execute(load, load.encode(), 4).unwrap();
            assert_eq!(computer.registers.get(Reg::A1), expected, "{load}");
        }
    }

    #[test]
    fn load_fault_test() {
        let mut computer = computer(&[]);
        computer.registers.set(Reg::A0, 0x1234);
        let load = Instruction::Load {
            width: LoadWidth::D,
            rd: Reg::A0,
            rs1: Reg::A0,
            offset: 0,
        };
        assert_eq!(
            computer.execute(load, load.encode(), 4),
            Err(Exception::LoadAccessFault(0x1234))
        );
        // Nothing changed
        assert_eq!(computer.registers.get(Reg::A0), 0x1234);
        assert_eq!(computer.registers.pc, START);
    }

    #[test]
    fn csr_test() {
        let mut computer = computer(&[]);
        computer.registers.set(Reg::T0, 0x1000);

        let csrrw = Instruction::Csr {
            op: CsrOp::Write,
            rd: Reg::Zero,
            csr: Csr::MSCRATCH,
            rs1: Reg::T0,
        };
        computer.execute(csrrw, csrrw.encode(), 4).unwrap();
        assert_eq!(computer.csrs.mscratch, 0x1000);

        let csrrsi = Instruction::CsrImm {
            op: CsrOp::Set,
            rd: Reg::A0,
            csr: Csr::MSCRATCH,
            uimm: 1,
        };
        computer.execute(csrrsi, csrrsi.encode(), 4).unwrap();
        assert_eq!(computer.registers.get(Reg::A0), 0x1000);
        assert_eq!(computer.csrs.mscratch, 0x1001);

        let csrrc = Instruction::Csr {
            op: CsrOp::Clear,
            rd: Reg::A1,
            csr: Csr::MSCRATCH,
            rs1: Reg::T0,
        };
        computer.execute(csrrc, csrrc.encode(), 4).unwrap();
        assert_eq!(computer.registers.get(Reg::A1), 0x1001);
        assert_eq!(computer.csrs.mscratch, 1);
    }

    #[test]
    fn csr_read_only_test() {
        let mut computer = computer(&[]);

        // csrr a0, mhartid reads, csrw mhartid, a0 is illegal
        let read = Instruction::Csr {
            op: CsrOp::Set,
            rd: Reg::A0,
            csr: Csr::MHARTID,
            rs1: Reg::Zero,
        };
        computer.execute(read, read.encode(), 4).unwrap();

        let write = Instruction::Csr {
            op: CsrOp::Write,
            rd: Reg::Zero,
            csr: Csr::MHARTID,
            rs1: Reg::A0,
        };
        assert_eq!(
            computer.execute(write, write.encode(), 4),
            Err(Exception::IllegalInstruction(write.encode()))
        );
    }

    #[test]
    fn privileged_test() {
        let mut computer = computer(&[]);
        computer.privilege = Privilege::Supervisor;

        let read = Instruction::Csr {
            op: CsrOp::Set,
            rd: Reg::A0,
            csr: Csr::MSTATUS,
            rs1: Reg::Zero,
        };
        let error = computer.execute(read, read.encode(), 4).unwrap_err();
        assert_eq!(error, Exception::PrivilegedInstruction(read.encode()));
        assert_eq!(error.code(), 2);

        let mret = Instruction::Mret;
        assert_eq!(
            computer.execute(mret, mret.encode(), 4),
            Err(Exception::PrivilegedInstruction(mret.encode()))
        );

        computer.csrs.mstatus.insert(Mstatus::TVM);
        let sfence = Instruction::SfenceVma {
            rs1: Reg::Zero,
            rs2: Reg::Zero,
        };
        assert!(computer.execute(sfence, sfence.encode(), 4).is_err());

        computer.privilege = Privilege::User;
        let sret = Instruction::Sret;
        assert!(computer.execute(sret, sret.encode(), 4).is_err());
        let wfi = Instruction::Wfi;
        assert!(computer.execute(wfi, wfi.encode(), 4).is_err());
    }

    #[test]
    fn ecall_test() {
        let mut computer = computer(&[]);
        computer.privilege = Privilege::User;
        assert_eq!(
            computer.execute(Instruction::Ecall, 0x73, 4),
            Err(Exception::EnvironmentCall(Privilege::User))
        );
        assert_eq!(
            computer.execute(Instruction::Ebreak, 0x0010_0073, 4),
            Err(Exception::Breakpoint(START))
        );
    }

    #[test]
    fn reservation_test() {
        let mut computer = computer(&[]);
        let address = START + 0x100;
        computer.bus.ram.write(address, Width::Word, 0x8000_0000).unwrap();
        computer.registers.set(Reg::A0, address);
        computer.registers.set(Reg::A1, 7);

        let sc = Instruction::StoreConditional {
            width: AmoWidth::W,
            rd: Reg::A2,
            rs1: Reg::A0,
            rs2: Reg::A1,
        };

        // No reservation yet
        computer.execute(sc, sc.encode(), 4).unwrap();
        assert_eq!(computer.registers.get(Reg::A2), 1);
        assert_eq!(computer.bus.ram.read(address, Width::Word), Ok(0x8000_0000));

        let lr = Instruction::LoadReserved {
            width: AmoWidth::W,
            rd: Reg::A3,
            rs1: Reg::A0,
        };
        computer.execute(lr, lr.encode(), 4).unwrap();
        assert_eq!(computer.registers.get(Reg::A3), 0xFFFF_FFFF_8000_0000);

        computer.execute(sc, sc.encode(), 4).unwrap();
        assert_eq!(computer.registers.get(Reg::A2), 0);
        assert_eq!(computer.bus.ram.read(address, Width::Word), Ok(7));

        // The reservation is consumed
        computer.execute(sc, sc.encode(), 4).unwrap();
        assert_eq!(computer.registers.get(Reg::A2), 1);

        // And dropped by traps
        computer.execute(lr, lr.encode(), 4).unwrap();
        computer.trap(Exception::Breakpoint(0).into());
        computer.execute(sc, sc.encode(), 4).unwrap();
        assert_eq!(computer.registers.get(Reg::A2), 1);
    }

    #[test]
    fn amo_test() {
        let mut computer = computer(&[]);
        let address = START + 0x100;
        computer.registers.set(Reg::A0, address);

        let mut run = |op, width, initial: Word, operand: Word| {
            computer.bus.ram.write(address, Width::Double, initial).unwrap();
            computer.registers.set(Reg::A1, operand);
            let amo = Instruction::Amo {
                op,
                width,
                rd: Reg::A2,
                rs1: Reg::A0,
                rs2: Reg::A1,
            };
            computer.execute(amo, amo.encode(), 4).unwrap();
            (
                computer.registers.get(Reg::A2),
                computer.bus.ram.read(address, Width::Double).unwrap(),
            )
        };

        assert_eq!(run(AmoOp::Add, AmoWidth::D, 5, 3), (5, 8));
        assert_eq!(run(AmoOp::Swap, AmoWidth::D, 5, 3), (5, 3));
        assert_eq!(
            run(AmoOp::Add, AmoWidth::W, 0x1_FFFF_FFFF, 1),
            (u64::MAX, 0x1_0000_0000)
        );
        assert_eq!(
            run(AmoOp::Min, AmoWidth::W, 0xFFFF_FFFF, 1),
            (u64::MAX, 0xFFFF_FFFF)
        );
        assert_eq!(run(AmoOp::Minu, AmoWidth::W, 0xFFFF_FFFF, 1), (u64::MAX, 1));
        assert_eq!(
            run(AmoOp::Max, AmoWidth::D, (-5i64) as Word, 3),
            ((-5i64) as Word, 3)
        );
        assert_eq!(run(AmoOp::Maxu, AmoWidth::D, 2, 3), (2, 3));
        assert_eq!(run(AmoOp::Or, AmoWidth::D, 0b1010, 0b0101), (0b1010, 0b1111));
    }

    #[test]
    fn misaligned_atomic_test() {
        let mut computer = computer(&[]);
        computer.registers.set(Reg::A0, START + 2);

        let lr = Instruction::LoadReserved {
            width: AmoWidth::W,
            rd: Reg::A1,
            rs1: Reg::A0,
        };
        assert_eq!(
            computer.execute(lr, lr.encode(), 4),
            Err(Exception::LoadMisaligned(START + 2))
        );

        let amo = Instruction::Amo {
            op: AmoOp::Add,
            width: AmoWidth::D,
            rd: Reg::A1,
            rs1: Reg::A0,
            rs2: Reg::A0,
        };
        assert_eq!(
            computer.execute(amo, amo.encode(), 4),
            Err(Exception::StoreMisaligned(START + 2))
        );
    }
}
