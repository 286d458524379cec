//! The hart: registers, CSRs, privilege level and the bus it drives

use thiserror::Error;
use tracing::{info, trace};

pub mod bus;
mod compressed;
pub mod csr;
pub mod devices;
mod exception;
mod execute;
pub mod instructions;
mod memory;
mod mmu;
mod registers;
mod trap;

pub use self::bus::{Bus, BusError, Device, InterruptLines};
pub use self::csr::{Csr, CsrFile, Mstatus, UnknownCsr};
pub use self::exception::{AccessType, Exception, Interrupt, Privilege, Trap};
pub use self::instructions::Instruction;
pub use self::memory::{AccessFault, Memory, Width};
pub use self::registers::{Reg, Registers, UnknownRegister};

use crate::constants::Address;

/// Conditions stopping the processor. Emulated faults never show up here,
/// they are delivered to software as traps.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("machine halted with code {code}")]
    Halted { code: u32 },
}

type Result<T> = std::result::Result<T, ProcessorError>;

pub struct Computer {
    pub registers: Registers,
    pub csrs: CsrFile,
    pub privilege: Privilege,
    pub bus: Bus,
    pub cycles: u64,

    /// Lines sampled from the devices at the end of the last step
    lines: InterruptLines,

    /// Physical address reserved by the last `lr`
    reservation: Option<Address>,
}

impl std::fmt::Debug for Computer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Computer {{ registers: {:?}, privilege: {}, cycles: {}, bus: {:?} }}",
            self.registers, self.privilege, self.cycles, self.bus
        )
    }
}

impl Computer {
    #[must_use]
    pub fn new(bus: Bus) -> Self {
        Self {
            registers: Registers::default(),
            csrs: CsrFile::new(),
            privilege: Privilege::Machine,
            bus,
            cycles: 0,
            lines: InterruptLines::default(),
            reservation: None,
        }
    }

    /// Put the hart back in its reset state, starting at `pc` in M-mode.
    ///
    /// Lines sampled from the devices are dropped, including a pending halt
    /// request. The bus is left alone.
    pub fn reset(&mut self, pc: Address) {
        self.registers = Registers::default();
        self.registers.pc = pc;
        self.csrs = CsrFile::new();
        self.privilege = Privilege::Machine;
        self.cycles = 0;
        self.lines = InterruptLines::default();
        self.reservation = None;
    }

    /// Fetch and decode the instruction at the PC
    fn fetch(&mut self) -> std::result::Result<(Instruction, u32, u64), Exception> {
        let pc = self.registers.pc;
        let low = self.fetch_half(pc)?;
        if instructions::length(low.into()) == 2 {
            return Ok((Instruction::decode_compressed(low)?, low.into(), 2));
        }

        let high = self.fetch_half(pc.wrapping_add(2))?;
        let raw = u32::from(low) | (u32::from(high) << 16);
        Ok((Instruction::decode(raw)?, raw, 4))
    }

    fn fetch_half(&mut self, address: Address) -> std::result::Result<u16, Exception> {
        let physical = self.translate(address, AccessType::Fetch)?;
        self.bus
            .read(physical, Width::Half)
            .map(|half| half as u16)
            .map_err(|_| Exception::InstructionAccessFault(address))
    }

    fn retire(&mut self) {
        if self.csrs.mcountinhibit & 0b100 == 0 {
            self.csrs.minstret = self.csrs.minstret.wrapping_add(1);
        }
    }

    /// Whether the hart could ever take an interrupt in its current state
    #[must_use]
    pub fn interrupts_possible(&self) -> bool {
        self.csrs.interrupts_possible(self.privilege)
    }

    /// Run one cycle: execute an instruction, tick the devices, then take a
    /// pending interrupt if the instruction did not trap
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Halted`] once software stopped the machine,
    /// either through the test finisher or by jumping to itself with no
    /// interrupt able to wake it up.
    pub fn step(&mut self) -> Result<()> {
        let pc = self.registers.pc;

        let outcome = self.fetch().and_then(|(inst, raw, len)| {
            trace!(pc, "{inst}");
            self.execute(inst, raw, len).map(|()| inst)
        });

        let trapped = match outcome {
            Ok(inst) => {
                self.retire();
                if inst.is_control_transfer()
                    && self.registers.pc == pc
                    && !self.interrupts_possible()
                {
                    info!(pc, "Stuck in a loop with interrupts disabled, halting");
                    return Err(ProcessorError::Halted { code: 0 });
                }
                false
            }
            Err(exception) => {
                self.trap(exception.into());
                true
            }
        };

        self.cycles += 1;
        if self.csrs.mcountinhibit & 1 == 0 {
            self.csrs.mcycle = self.csrs.mcycle.wrapping_add(1);
        }

        self.bus.tick(&mut self.lines);
        self.csrs.hardware_mip = self.lines.mip;
        self.csrs.time = self.lines.mtime;

        if let Some(code) = self.lines.halt {
            return Err(ProcessorError::Halted { code });
        }

        if !trapped {
            if let Some(interrupt) = self.csrs.pending_interrupt(self.privilege) {
                self.trap(interrupt.into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::devices::{Clint, Finisher};
    use super::*;
    use crate::constants::{CLINT_BASE, CLINT_SIZE, FINISHER_BASE, FINISHER_SIZE};

    pub(crate) const START: Address = 0x8000_0000;

    /// A hart with 1 MiB of RAM, a finisher and a CLINT, running `program` from [`START`]
    pub(crate) fn computer(program: &[Instruction]) -> Computer {
        let mut bus = Bus::new(Memory::new(START, 1024 * 1024));
        bus.register(
            "finisher",
            FINISHER_BASE,
            FINISHER_SIZE,
            Box::new(Finisher::default()),
        )
        .unwrap();
        bus.register("clint", CLINT_BASE, CLINT_SIZE, Box::new(Clint::new(1)))
            .unwrap();

        let mut computer = Computer::new(bus);
        let code: Vec<u8> = program
            .iter()
            .flat_map(|inst| inst.encode().to_le_bytes())
            .collect();
        computer.bus.ram.write_bytes(START, &code).unwrap();
        computer.reset(START);
        computer
    }

    fn addi(rd: Reg, rs1: Reg, imm: i64) -> Instruction {
        Instruction::OpImm {
            op: instructions::ImmOp::Addi,
            rd,
            rs1,
            imm,
        }
    }

    #[test]
    fn step_test() {
        let mut computer = computer(&[
            addi(Reg::A0, Reg::Zero, 0x42),
            addi(Reg::A1, Reg::Zero, 0x24),
            Instruction::Op {
                op: instructions::RegOp::Add,
                rd: Reg::A1,
                rs1: Reg::A0,
                rs2: Reg::A1,
            },
        ]);

        computer.step().unwrap();
        assert_eq!(computer.registers.get(Reg::A0), 0x42);
        assert_eq!(computer.registers.get(Reg::A1), 0);
        assert_eq!(computer.registers.pc, START + 4);

        computer.step().unwrap();
        computer.step().unwrap();
        assert_eq!(computer.registers.get(Reg::A1), 0x66);
        assert_eq!(computer.registers.pc, START + 12);
        assert_eq!(computer.cycles, 3);
        assert_eq!(computer.csrs.minstret, 3);
        assert_eq!(computer.csrs.time, 3);
    }

    #[test]
    fn compressed_step_test() {
        let mut computer = computer(&[]);
        // c.li a0, 5; c.addi a0, 1
        computer
            .bus
            .ram
            .write_bytes(START, &[0x15, 0x45, 0x05, 0x05])
            .unwrap();

        computer.step().unwrap();
        assert_eq!(computer.registers.pc, START + 2);
        computer.step().unwrap();
        assert_eq!(computer.registers.pc, START + 4);
        assert_eq!(computer.registers.get(Reg::A0), 6);
    }

    #[test]
    fn illegal_instruction_trap_test() {
        let mut computer = computer(&[]);
        computer.csrs.mtvec = START + 0x100;
        computer.bus.ram.write(START, Width::Word, 0xFFFF_FFFF).unwrap();

        computer.step().unwrap();
        assert_eq!(computer.registers.pc, START + 0x100);
        assert_eq!(computer.csrs.mcause, 2);
        assert_eq!(computer.csrs.mtval, 0xFFFF_FFFF);
        assert_eq!(computer.csrs.mepc, START);
        // Faulting instructions do not retire
        assert_eq!(computer.csrs.minstret, 0);
    }

    #[test]
    fn fetch_fault_test() {
        let mut computer = computer(&[]);
        computer.csrs.mtvec = START;
        computer.registers.pc = 0x1000;

        computer.step().unwrap();
        assert_eq!(computer.csrs.mcause, 1);
        assert_eq!(computer.csrs.mtval, 0x1000);
        assert_eq!(computer.registers.pc, START);
    }

    #[test]
    fn halt_idiom_test() {
        let mut computer = computer(&[
            addi(Reg::A0, Reg::Zero, 1),
            Instruction::Jal {
                rd: Reg::Zero,
                offset: 0,
            },
        ]);

        computer.step().unwrap();
        assert_eq!(computer.step(), Err(ProcessorError::Halted { code: 0 }));
    }

    #[test]
    fn self_loop_with_interrupts_test() {
        let mut computer = computer(&[Instruction::Jal {
            rd: Reg::Zero,
            offset: 0,
        }]);
        computer.csrs.mie = Interrupt::MachineTimer.bit();
        computer.csrs.mstatus.insert(Mstatus::MIE);

        // A timer interrupt could still fire, keep looping
        for _ in 0..10 {
            computer.step().unwrap();
        }
        assert_eq!(computer.registers.pc, START);
    }

    #[test]
    fn finisher_test() {
        let mut computer = computer(&[
            Instruction::Lui {
                rd: Reg::T0,
                imm: (FINISHER_BASE >> 12) as u32,
            },
            Instruction::Lui {
                rd: Reg::T1,
                imm: 0x33,
            },
            addi(Reg::T1, Reg::T1, 0x333),
            Instruction::Store {
                width: instructions::StoreWidth::W,
                rs1: Reg::T0,
                rs2: Reg::T1,
                offset: 0,
            },
        ]);

        for _ in 0..3 {
            computer.step().unwrap();
        }
        // Failure with code 3
        assert_eq!(computer.registers.get(Reg::T1), 0x3_3333);
        assert_eq!(computer.step(), Err(ProcessorError::Halted { code: 3 }));
    }
}
