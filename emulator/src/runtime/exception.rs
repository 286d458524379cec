use parse_display::Display;
use thiserror::Error;

use crate::constants::{Address, Word};

/// Privilege level of the hart
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Privilege {
    #[display("U")]
    User = 0,
    #[display("S")]
    Supervisor = 1,
    #[display("M")]
    Machine = 3,
}

impl Privilege {
    /// Decode a 2-bit privilege field. The reserved encoding 2 maps to M.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0 => Self::User,
            1 => Self::Supervisor,
            _ => Self::Machine,
        }
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self as u64
    }
}

/// Synchronous exceptions raised while executing an instruction
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    #[error("instruction access fault at {0:#x}")]
    InstructionAccessFault(Address),

    #[error("illegal instruction {0:#010x}")]
    IllegalInstruction(u32),

    /// A legal instruction used without sufficient privilege. Software sees
    /// it as an illegal instruction.
    #[error("privileged instruction {0:#010x}")]
    PrivilegedInstruction(u32),

    #[error("breakpoint at {0:#x}")]
    Breakpoint(Address),

    #[error("misaligned load at {0:#x}")]
    LoadMisaligned(Address),

    #[error("load access fault at {0:#x}")]
    LoadAccessFault(Address),

    #[error("misaligned store at {0:#x}")]
    StoreMisaligned(Address),

    #[error("store access fault at {0:#x}")]
    StoreAccessFault(Address),

    #[error("environment call from {0}-mode")]
    EnvironmentCall(Privilege),

    #[error("instruction page fault at {0:#x}")]
    InstructionPageFault(Address),

    #[error("load page fault at {0:#x}")]
    LoadPageFault(Address),

    #[error("store page fault at {0:#x}")]
    StorePageFault(Address),
}

impl Exception {
    /// Value written in `xcause`
    #[must_use]
    pub const fn code(&self) -> Word {
        match self {
            Self::InstructionAccessFault(_) => 1,
            Self::IllegalInstruction(_) | Self::PrivilegedInstruction(_) => 2,
            Self::Breakpoint(_) => 3,
            Self::LoadMisaligned(_) => 4,
            Self::LoadAccessFault(_) => 5,
            Self::StoreMisaligned(_) => 6,
            Self::StoreAccessFault(_) => 7,
            Self::EnvironmentCall(Privilege::User) => 8,
            Self::EnvironmentCall(Privilege::Supervisor) => 9,
            Self::EnvironmentCall(Privilege::Machine) => 11,
            Self::InstructionPageFault(_) => 12,
            Self::LoadPageFault(_) => 13,
            Self::StorePageFault(_) => 15,
        }
    }

    /// Value written in `xtval`
    #[must_use]
    pub const fn tval(&self) -> Word {
        match self {
            Self::IllegalInstruction(bits) | Self::PrivilegedInstruction(bits) => *bits as Word,
            Self::EnvironmentCall(_) => 0,
            Self::InstructionAccessFault(address)
            | Self::Breakpoint(address)
            | Self::LoadMisaligned(address)
            | Self::LoadAccessFault(address)
            | Self::StoreMisaligned(address)
            | Self::StoreAccessFault(address)
            | Self::InstructionPageFault(address)
            | Self::LoadPageFault(address)
            | Self::StorePageFault(address) => *address,
        }
    }
}

/// Asynchronous interrupts, with their `xcause` code as discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Interrupt {
    #[display("supervisor software interrupt")]
    SupervisorSoftware = 1,
    #[display("machine software interrupt")]
    MachineSoftware = 3,
    #[display("supervisor timer interrupt")]
    SupervisorTimer = 5,
    #[display("machine timer interrupt")]
    MachineTimer = 7,
    #[display("supervisor external interrupt")]
    SupervisorExternal = 9,
    #[display("machine external interrupt")]
    MachineExternal = 11,
}

impl Interrupt {
    /// Interrupts in decreasing priority order
    pub const PRIORITY: [Self; 6] = [
        Self::MachineExternal,
        Self::MachineSoftware,
        Self::MachineTimer,
        Self::SupervisorExternal,
        Self::SupervisorSoftware,
        Self::SupervisorTimer,
    ];

    #[must_use]
    pub const fn code(self) -> Word {
        self as Word
    }

    /// Bit of this interrupt in `mip`/`mie`
    #[must_use]
    pub const fn bit(self) -> Word {
        1 << self.code()
    }

    /// Highest priority interrupt in a `mip`-shaped mask
    #[must_use]
    pub fn highest(mask: Word) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|i| mask & i.bit() != 0)
    }
}

/// Either kind of trap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Trap {
    #[display("{0}")]
    Exception(Exception),
    #[display("{0}")]
    Interrupt(Interrupt),
}

impl Trap {
    pub const INTERRUPT_BIT: Word = 1 << 63;

    /// Value written in `xcause`
    #[must_use]
    pub const fn cause(&self) -> Word {
        match self {
            Self::Exception(e) => e.code(),
            Self::Interrupt(i) => Self::INTERRUPT_BIT | i.code(),
        }
    }

    #[must_use]
    pub const fn tval(&self) -> Word {
        match self {
            Self::Exception(e) => e.tval(),
            Self::Interrupt(_) => 0,
        }
    }

    /// Bit position used for the delegation registers
    #[must_use]
    pub const fn code(&self) -> Word {
        match self {
            Self::Exception(e) => e.code(),
            Self::Interrupt(i) => i.code(),
        }
    }
}

impl From<Exception> for Trap {
    fn from(e: Exception) -> Self {
        Self::Exception(e)
    }
}

impl From<Interrupt> for Trap {
    fn from(i: Interrupt) -> Self {
        Self::Interrupt(i)
    }
}

/// Kind of memory access, used to pick the right fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Fetch,
    Load,
    Store,
}

impl AccessType {
    #[must_use]
    pub const fn access_fault(self, address: Address) -> Exception {
        match self {
            Self::Fetch => Exception::InstructionAccessFault(address),
            Self::Load => Exception::LoadAccessFault(address),
            Self::Store => Exception::StoreAccessFault(address),
        }
    }

    #[must_use]
    pub const fn page_fault(self, address: Address) -> Exception {
        match self {
            Self::Fetch => Exception::InstructionPageFault(address),
            Self::Load => Exception::LoadPageFault(address),
            Self::Store => Exception::StorePageFault(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn cause_test() {
        let illegal = Trap::from(Exception::IllegalInstruction(0xFFFF_FFFF));
        assert_eq!(illegal.cause(), 2);
        assert_eq!(illegal.tval(), 0xFFFF_FFFF);

        let privileged = Trap::from(Exception::PrivilegedInstruction(0x3020_0073));
        assert_eq!(privileged.cause(), 2);
        assert_eq!(privileged.tval(), 0x3020_0073);

        let ecall = Trap::from(Exception::EnvironmentCall(Privilege::Supervisor));
        assert_eq!(ecall.cause(), 9);
        assert_eq!(ecall.tval(), 0);

        let timer = Trap::from(Interrupt::SupervisorTimer);
        assert_eq!(timer.cause(), (1 << 63) | 5);
        assert_eq!(timer.code(), 5);
    }

    #[test]
    fn priority_test() {
        let all = Interrupt::PRIORITY.iter().fold(0, |mask, i| mask | i.bit());
        assert_eq!(all, 0b1010_1010_1010);
        assert_eq!(Interrupt::highest(all), Some(Interrupt::MachineExternal));
        assert_eq!(
            Interrupt::highest(Interrupt::SupervisorTimer.bit() | Interrupt::SupervisorSoftware.bit()),
            Some(Interrupt::SupervisorSoftware)
        );
        assert_eq!(
            Interrupt::highest(Interrupt::MachineTimer.bit() | Interrupt::SupervisorExternal.bit()),
            Some(Interrupt::MachineTimer)
        );
        assert_eq!(Interrupt::highest(0), None);
    }

    #[test]
    fn privilege_order_test() {
        assert!(Privilege::User < Privilege::Supervisor);
        assert!(Privilege::Supervisor < Privilege::Machine);
        assert_eq!(Privilege::from_bits(3), Privilege::Machine);
        assert_eq!(Privilege::from_bits(1), Privilege::Supervisor);
        assert_eq!(Privilege::Supervisor.to_string(), "S");
    }
}
