//! Interrupt selection, trap entry and trap return

use tracing::debug;

use super::csr::{CsrFile, Mstatus};
use super::exception::{Interrupt, Privilege, Trap};
use super::Computer;
use crate::constants::{Address, Word};

impl CsrFile {
    /// Interrupts enabled at `privilege`, split in (M-level, delegated)
    fn enabled_interrupts(&self, privilege: Privilege) -> (Word, Word) {
        let machine = if privilege < Privilege::Machine || self.mstatus.contains(Mstatus::MIE) {
            self.mie & !self.mideleg
        } else {
            0
        };

        let supervisor = if privilege < Privilege::Supervisor
            || (privilege == Privilege::Supervisor && self.mstatus.contains(Mstatus::SIE))
        {
            self.mie & self.mideleg
        } else {
            0
        };

        (machine, supervisor)
    }

    /// The interrupt to take now, M-level interrupts first
    #[must_use]
    pub fn pending_interrupt(&self, privilege: Privilege) -> Option<Interrupt> {
        let pending = self.mip();
        let (machine, supervisor) = self.enabled_interrupts(privilege);
        Interrupt::highest(pending & machine).or_else(|| Interrupt::highest(pending & supervisor))
    }

    /// Whether any interrupt could be taken at `privilege` once it is pending
    #[must_use]
    pub fn interrupts_possible(&self, privilege: Privilege) -> bool {
        let (machine, supervisor) = self.enabled_interrupts(privilege);
        (machine | supervisor) != 0
    }
}

/// Handler address: interrupts jump to base + 4 * cause in vectored mode
fn vector(tvec: Word, trap: Trap) -> Address {
    let base = tvec & !0b11;
    match trap {
        Trap::Interrupt(interrupt) if tvec & 0b11 == 1 => base + 4 * interrupt.code(),
        _ => base,
    }
}

impl Computer {
    /// Enter the trap handler, in S-mode if the trap is delegated and the hart
    /// is not in M-mode, otherwise in M-mode
    pub fn trap(&mut self, trap: Trap) {
        let delegation = match trap {
            Trap::Exception(_) => self.csrs.medeleg,
            Trap::Interrupt(_) => self.csrs.mideleg,
        };
        let delegated =
            self.privilege <= Privilege::Supervisor && (delegation >> trap.code()) & 1 != 0;

        let pc = self.registers.pc;
        let from = self.privilege;
        self.reservation = None;
        let csrs = &mut self.csrs;

        if delegated {
            csrs.sepc = pc;
            csrs.scause = trap.cause();
            csrs.stval = trap.tval();

            let sie = csrs.mstatus.contains(Mstatus::SIE);
            csrs.mstatus.set(Mstatus::SPIE, sie);
            csrs.mstatus.remove(Mstatus::SIE);
            csrs.mstatus.set(Mstatus::SPP, from == Privilege::Supervisor);

            self.privilege = Privilege::Supervisor;
            self.registers.pc = vector(csrs.stvec, trap);
        } else {
            csrs.mepc = pc;
            csrs.mcause = trap.cause();
            csrs.mtval = trap.tval();

            let mie = csrs.mstatus.contains(Mstatus::MIE);
            csrs.mstatus.set(Mstatus::MPIE, mie);
            csrs.mstatus.remove(Mstatus::MIE);
            csrs.mstatus.set_mpp(from);

            self.privilege = Privilege::Machine;
            self.registers.pc = vector(csrs.mtvec, trap);
        }

        debug!(
            %trap,
            pc,
            %from,
            to = %self.privilege,
            handler = self.registers.pc,
            "Trap"
        );
    }

    /// Return from an M-mode trap handler
    pub(crate) fn mret(&mut self) {
        let mstatus = &mut self.csrs.mstatus;
        let previous = mstatus.mpp();

        let mpie = mstatus.contains(Mstatus::MPIE);
        mstatus.set(Mstatus::MIE, mpie);
        mstatus.insert(Mstatus::MPIE);
        mstatus.set_mpp(Privilege::User);
        if previous != Privilege::Machine {
            mstatus.remove(Mstatus::MPRV);
        }

        self.privilege = previous;
        self.registers.pc = self.csrs.mepc;
        debug!(pc = self.registers.pc, to = %previous, "Return from M-mode trap");
    }

    /// Return from an S-mode trap handler
    pub(crate) fn sret(&mut self) {
        let mstatus = &mut self.csrs.mstatus;
        let previous = if mstatus.contains(Mstatus::SPP) {
            Privilege::Supervisor
        } else {
            Privilege::User
        };

        let spie = mstatus.contains(Mstatus::SPIE);
        mstatus.set(Mstatus::SIE, spie);
        mstatus.insert(Mstatus::SPIE);
        mstatus.remove(Mstatus::SPP);
        mstatus.remove(Mstatus::MPRV);

        self.privilege = previous;
        self.registers.pc = self.csrs.sepc;
        debug!(pc = self.registers.pc, to = %previous, "Return from S-mode trap");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::constants::CLINT_BASE;
    use crate::runtime::exception::Exception;
    use crate::runtime::instructions::Instruction;
    use crate::runtime::memory::Width;
    use crate::runtime::tests::{computer, START};

    const MTVEC: Address = START + 0x100;
    const STVEC: Address = START + 0x200;

    fn hart() -> Computer {
        let mut computer = computer(&[]);
        computer.csrs.mtvec = MTVEC;
        computer.csrs.stvec = STVEC;
        computer.registers.pc = START + 0x40;
        computer
    }

    #[test]
    fn interrupt_priority_test() {
        let mut csrs = CsrFile::new();
        csrs.mstatus.insert(Mstatus::MIE);
        csrs.mie = Interrupt::MachineTimer.bit()
            | Interrupt::MachineSoftware.bit()
            | Interrupt::SupervisorExternal.bit();
        csrs.mip = Interrupt::SupervisorExternal.bit();
        csrs.hardware_mip = Interrupt::MachineTimer.bit() | Interrupt::MachineSoftware.bit();

        assert_eq!(
            csrs.pending_interrupt(Privilege::Machine),
            Some(Interrupt::MachineSoftware)
        );

        csrs.hardware_mip = 0;
        assert_eq!(
            csrs.pending_interrupt(Privilege::Machine),
            Some(Interrupt::SupervisorExternal)
        );

        // Disabled globally in M-mode, always enabled below
        csrs.mstatus.remove(Mstatus::MIE);
        assert_eq!(csrs.pending_interrupt(Privilege::Machine), None);
        assert_eq!(
            csrs.pending_interrupt(Privilege::User),
            Some(Interrupt::SupervisorExternal)
        );
    }

    #[test]
    fn delegated_interrupt_test() {
        let mut csrs = CsrFile::new();
        csrs.mideleg = Interrupt::SupervisorTimer.bit();
        csrs.mie = Interrupt::SupervisorTimer.bit();
        csrs.mip = Interrupt::SupervisorTimer.bit();

        // Never taken in M-mode, only with SIE in S-mode, always in U-mode
        csrs.mstatus.insert(Mstatus::MIE);
        assert_eq!(csrs.pending_interrupt(Privilege::Machine), None);
        assert_eq!(csrs.pending_interrupt(Privilege::Supervisor), None);
        csrs.mstatus.insert(Mstatus::SIE);
        assert_eq!(
            csrs.pending_interrupt(Privilege::Supervisor),
            Some(Interrupt::SupervisorTimer)
        );
        csrs.mstatus.remove(Mstatus::SIE);
        assert_eq!(
            csrs.pending_interrupt(Privilege::User),
            Some(Interrupt::SupervisorTimer)
        );

        assert!(csrs.interrupts_possible(Privilege::User));
        assert!(!csrs.interrupts_possible(Privilege::Machine));
    }

    #[test]
    fn machine_trap_test() {
        let mut computer = hart();
        computer.privilege = Privilege::Supervisor;
        computer.csrs.mstatus.insert(Mstatus::MIE);

        computer.trap(Exception::LoadAccessFault(0x1234).into());
        assert_eq!(computer.privilege, Privilege::Machine);
        assert_eq!(computer.registers.pc, MTVEC);
        assert_eq!(computer.csrs.mepc, START + 0x40);
        assert_eq!(computer.csrs.mcause, 5);
        assert_eq!(computer.csrs.mtval, 0x1234);
        assert_eq!(computer.csrs.mstatus.mpp(), Privilege::Supervisor);
        assert!(computer.csrs.mstatus.contains(Mstatus::MPIE));
        assert!(!computer.csrs.mstatus.contains(Mstatus::MIE));

        computer.mret();
        assert_eq!(computer.privilege, Privilege::Supervisor);
        assert_eq!(computer.registers.pc, START + 0x40);
        assert!(computer.csrs.mstatus.contains(Mstatus::MIE));
        assert!(computer.csrs.mstatus.contains(Mstatus::MPIE));
        assert_eq!(computer.csrs.mstatus.mpp(), Privilege::User);
    }

    #[test]
    fn delegated_trap_test() {
        let mut computer = hart();
        computer.privilege = Privilege::User;
        computer.csrs.medeleg = 1 << 8;
        computer.csrs.mstatus.insert(Mstatus::SIE);

        computer.trap(Exception::EnvironmentCall(Privilege::User).into());
        assert_eq!(computer.privilege, Privilege::Supervisor);
        assert_eq!(computer.registers.pc, STVEC);
        assert_eq!(computer.csrs.sepc, START + 0x40);
        assert_eq!(computer.csrs.scause, 8);
        assert!(!computer.csrs.mstatus.contains(Mstatus::SPP));
        assert!(computer.csrs.mstatus.contains(Mstatus::SPIE));
        assert!(!computer.csrs.mstatus.contains(Mstatus::SIE));
        // M-mode state is left alone
        assert_eq!(computer.csrs.mcause, 0);

        computer.csrs.sepc += 4;
        computer.sret();
        assert_eq!(computer.privilege, Privilege::User);
        assert_eq!(computer.registers.pc, START + 0x44);
        assert!(computer.csrs.mstatus.contains(Mstatus::SIE));
    }

    #[test]
    fn delegation_ignored_in_machine_mode_test() {
        let mut computer = hart();
        computer.csrs.medeleg = 1 << 2;

        computer.trap(Exception::IllegalInstruction(0).into());
        assert_eq!(computer.privilege, Privilege::Machine);
        assert_eq!(computer.registers.pc, MTVEC);
    }

    #[test]
    fn vectored_test() {
        let mut computer = hart();
        computer.csrs.mtvec = MTVEC | 1;

        computer.trap(Interrupt::MachineTimer.into());
        assert_eq!(computer.registers.pc, MTVEC + 4 * 7);
        assert_eq!(computer.csrs.mcause, Trap::INTERRUPT_BIT | 7);

        // Exceptions always use the base
        computer.trap(Exception::Breakpoint(0).into());
        assert_eq!(computer.registers.pc, MTVEC);
    }

    #[test]
    fn exception_before_interrupt_test() {
        // An illegal instruction while a software interrupt is pending
        let mut computer = hart();
        computer.registers.pc = START;
        computer.bus.ram.write(START, Width::Word, 0).unwrap();
        computer.bus.write(CLINT_BASE, Width::Word, 1).unwrap();
        computer.csrs.mie = Interrupt::MachineSoftware.bit();
        computer.privilege = Privilege::Supervisor;

        computer.step().unwrap();
        assert_eq!(computer.csrs.mcause, 2);
        assert_eq!(computer.registers.pc, MTVEC);
        assert_eq!(computer.privilege, Privilege::Machine);
    }

    #[test]
    fn timer_interrupt_test() {
        let mut computer = computer(&[
            Instruction::Fence,
            Instruction::Fence,
            Instruction::Fence,
            Instruction::Fence,
        ]);
        computer.csrs.mtvec = MTVEC;
        computer.csrs.mie = Interrupt::MachineTimer.bit();
        computer.csrs.mstatus.insert(Mstatus::MIE);
        // mtimecmp = 2
        computer
            .bus
            .write(CLINT_BASE + 0x4000, Width::Double, 2)
            .unwrap();

        computer.step().unwrap();
        assert_eq!(computer.registers.pc, START + 4);
        computer.step().unwrap();
        assert_eq!(computer.registers.pc, MTVEC);
        assert_eq!(computer.csrs.mepc, START + 8);
        assert_eq!(computer.csrs.mcause, Trap::INTERRUPT_BIT | 7);
    }
}
