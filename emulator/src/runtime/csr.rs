use std::str::FromStr;

use bitflags::bitflags;
use thiserror::Error;

use super::exception::{Exception, Interrupt, Privilege};
use crate::constants::Word;

/// Address of a control and status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Csr(pub u16);

impl Csr {
    pub const SSTATUS: Self = Self(0x100);
    pub const SIE: Self = Self(0x104);
    pub const STVEC: Self = Self(0x105);
    pub const SCOUNTEREN: Self = Self(0x106);
    pub const SENVCFG: Self = Self(0x10A);
    pub const SSCRATCH: Self = Self(0x140);
    pub const SEPC: Self = Self(0x141);
    pub const SCAUSE: Self = Self(0x142);
    pub const STVAL: Self = Self(0x143);
    pub const SIP: Self = Self(0x144);
    pub const STIMECMP: Self = Self(0x14D);
    pub const SATP: Self = Self(0x180);

    pub const MSTATUS: Self = Self(0x300);
    pub const MISA: Self = Self(0x301);
    pub const MEDELEG: Self = Self(0x302);
    pub const MIDELEG: Self = Self(0x303);
    pub const MIE: Self = Self(0x304);
    pub const MTVEC: Self = Self(0x305);
    pub const MCOUNTEREN: Self = Self(0x306);
    pub const MENVCFG: Self = Self(0x30A);
    pub const MCOUNTINHIBIT: Self = Self(0x320);
    pub const MSCRATCH: Self = Self(0x340);
    pub const MEPC: Self = Self(0x341);
    pub const MCAUSE: Self = Self(0x342);
    pub const MTVAL: Self = Self(0x343);
    pub const MIP: Self = Self(0x344);

    pub const MCYCLE: Self = Self(0xB00);
    pub const MINSTRET: Self = Self(0xB02);

    pub const CYCLE: Self = Self(0xC00);
    pub const TIME: Self = Self(0xC01);
    pub const INSTRET: Self = Self(0xC02);

    pub const MVENDORID: Self = Self(0xF11);
    pub const MARCHID: Self = Self(0xF12);
    pub const MIMPID: Self = Self(0xF13);
    pub const MHARTID: Self = Self(0xF14);
    pub const MCONFIGPTR: Self = Self(0xF15);

    /// Lowest privilege allowed to access this register
    #[must_use]
    pub const fn privilege(self) -> Privilege {
        Privilege::from_bits((self.0 >> 8) as u64)
    }

    #[must_use]
    pub const fn is_read_only(self) -> bool {
        (self.0 >> 10) & 0b11 == 0b11
    }

    const NAMES: [(Self, &'static str); 36] = [
        (Self::SSTATUS, "sstatus"),
        (Self::SIE, "sie"),
        (Self::STVEC, "stvec"),
        (Self::SCOUNTEREN, "scounteren"),
        (Self::SENVCFG, "senvcfg"),
        (Self::SSCRATCH, "sscratch"),
        (Self::SEPC, "sepc"),
        (Self::SCAUSE, "scause"),
        (Self::STVAL, "stval"),
        (Self::SIP, "sip"),
        (Self::STIMECMP, "stimecmp"),
        (Self::SATP, "satp"),
        (Self::MSTATUS, "mstatus"),
        (Self::MISA, "misa"),
        (Self::MEDELEG, "medeleg"),
        (Self::MIDELEG, "mideleg"),
        (Self::MIE, "mie"),
        (Self::MTVEC, "mtvec"),
        (Self::MCOUNTEREN, "mcounteren"),
        (Self::MENVCFG, "menvcfg"),
        (Self::MCOUNTINHIBIT, "mcountinhibit"),
        (Self::MSCRATCH, "mscratch"),
        (Self::MEPC, "mepc"),
        (Self::MCAUSE, "mcause"),
        (Self::MTVAL, "mtval"),
        (Self::MIP, "mip"),
        (Self::MCYCLE, "mcycle"),
        (Self::MINSTRET, "minstret"),
        (Self::CYCLE, "cycle"),
        (Self::TIME, "time"),
        (Self::INSTRET, "instret"),
        (Self::MVENDORID, "mvendorid"),
        (Self::MARCHID, "marchid"),
        (Self::MIMPID, "mimpid"),
        (Self::MHARTID, "mhartid"),
        (Self::MCONFIGPTR, "mconfigptr"),
    ];

    /// Numbered register families: (name prefix, first address, first index, count)
    const FAMILIES: [(&'static str, u16, u16, u16); 5] = [
        ("pmpcfg", 0x3A0, 0, 16),
        ("pmpaddr", 0x3B0, 0, 64),
        ("mhpmevent", 0x323, 3, 29),
        ("mhpmcounter", 0xB03, 3, 29),
        ("hpmcounter", 0xC03, 3, 29),
    ];

    /// Registers known by name, in address order
    pub fn named() -> impl Iterator<Item = Self> {
        Self::NAMES.iter().map(|(csr, _)| *csr)
    }

    fn name(self) -> Option<String> {
        if let Some((_, name)) = Self::NAMES.iter().find(|(csr, _)| *csr == self) {
            return Some((*name).to_owned());
        }

        Self::FAMILIES
            .iter()
            .find(|(_, base, _, count)| (*base..*base + *count).contains(&self.0))
            .map(|(prefix, base, first, _)| format!("{prefix}{}", self.0 - base + first))
    }
}

impl std::fmt::Display for Csr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{:#05x}", self.0),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown CSR {0:?}")]
pub struct UnknownCsr(String);

impl FromStr for Csr {
    type Err = UnknownCsr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let unknown = || UnknownCsr(s.to_owned());

        if let Some(hex) = name.strip_prefix("0x") {
            return u16::from_str_radix(hex, 16)
                .ok()
                .filter(|n| *n < 0x1000)
                .map(Self)
                .ok_or_else(unknown);
        }

        if let Some((csr, _)) = Self::NAMES.iter().find(|(_, n)| *n == name) {
            return Ok(*csr);
        }

        // Longest prefixes first, so that "mhpmcounter3" is not read as "hpmcounter"
        let mut families = Self::FAMILIES;
        families.sort_by_key(|(prefix, ..)| std::cmp::Reverse(prefix.len()));
        for (prefix, base, first, count) in families {
            if let Some(index) = name.strip_prefix(prefix) {
                let index: u16 = index.parse().map_err(|_| unknown())?;
                if (first..first + count).contains(&index) {
                    return Ok(Self(base + index - first));
                }
                return Err(unknown());
            }
        }

        name.parse::<u16>()
            .ok()
            .filter(|n| *n < 0x1000)
            .map(Self)
            .ok_or_else(unknown)
    }
}

bitflags! {
    /// Fields of `mstatus`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mstatus: Word {
        const SIE  = 1 << 1;
        const MIE  = 1 << 3;
        const SPIE = 1 << 5;
        const UBE  = 1 << 6;
        const MPIE = 1 << 7;
        const SPP  = 1 << 8;
        const VS   = 0b11 << 9;
        const MPP  = 0b11 << 11;
        const FS   = 0b11 << 13;
        const XS   = 0b11 << 15;
        const MPRV = 1 << 17;
        const SUM  = 1 << 18;
        const MXR  = 1 << 19;
        const TVM  = 1 << 20;
        const TW   = 1 << 21;
        const TSR  = 1 << 22;
        const UXL  = 0b11 << 32;
        const SXL  = 0b11 << 34;
        const SBE  = 1 << 36;
        const MBE  = 1 << 37;
        const SD   = 1 << 63;
    }
}

impl Mstatus {
    /// Bits visible through `sstatus`
    const SSTATUS: Self = Self::SIE
        .union(Self::SPIE)
        .union(Self::UBE)
        .union(Self::SPP)
        .union(Self::VS)
        .union(Self::FS)
        .union(Self::XS)
        .union(Self::SUM)
        .union(Self::MXR)
        .union(Self::UXL)
        .union(Self::SD);

    /// Bits software may change through `sstatus`
    const SSTATUS_WRITABLE: Self = Self::SIE
        .union(Self::SPIE)
        .union(Self::SPP)
        .union(Self::SUM)
        .union(Self::MXR);

    /// Bits software may change through `mstatus`
    const WRITABLE: Self = Self::SSTATUS_WRITABLE
        .union(Self::MIE)
        .union(Self::MPIE)
        .union(Self::MPP)
        .union(Self::MPRV)
        .union(Self::TVM)
        .union(Self::TW)
        .union(Self::TSR);

    /// UXL and SXL are hard-wired to 64 bits
    const XLEN: Word = (2 << 32) | (2 << 34);

    #[must_use]
    pub fn mpp(self) -> Privilege {
        Privilege::from_bits((self & Self::MPP).bits() >> 11)
    }

    pub fn set_mpp(&mut self, privilege: Privilege) {
        *self = Self::from_bits_retain((self.bits() & !Self::MPP.bits()) | (privilege.bits() << 11));
    }
}

/// Interrupt bits writable in `mip` by M-mode software
const MIP_WRITABLE: Word = Interrupt::SupervisorSoftware.bit()
    | Interrupt::SupervisorTimer.bit()
    | Interrupt::SupervisorExternal.bit();

/// Every interrupt this hart implements
const INTERRUPTS: Word = MIP_WRITABLE
    | Interrupt::MachineSoftware.bit()
    | Interrupt::MachineTimer.bit()
    | Interrupt::MachineExternal.bit();

/// Exceptions that can be delegated to S-mode (everything but ecall from M)
const MEDELEG_WRITABLE: Word = 0xB3FF;

/// RV64 with the A, C, I, M, S and U extensions
const MISA: Word = (2 << 62)
    | (1 << (b'A' - b'A'))
    | (1 << (b'C' - b'A'))
    | (1 << (b'I' - b'A'))
    | (1 << (b'M' - b'A'))
    | (1 << (b'S' - b'A'))
    | (1 << (b'U' - b'A'));

/// Sstc enable bit of `menvcfg`
const MENVCFG_STCE: Word = 1 << 63;
const ENVCFG_FIOM: Word = 1;

const SATP_MODE_BARE: Word = 0;
const SATP_MODE_SV39: Word = 8;

/// Why a CSR access was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrFault {
    /// No such register, or written while read-only
    Illegal,
    /// The register exists but needs more privilege, or is disabled for this level
    Privileged,
}

impl CsrFault {
    /// Exception reported for the instruction `raw`
    #[must_use]
    pub const fn exception(self, raw: u32) -> Exception {
        match self {
            Self::Illegal => Exception::IllegalInstruction(raw),
            Self::Privileged => Exception::PrivilegedInstruction(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrFile {
    pub mstatus: Mstatus,
    pub medeleg: Word,
    pub mideleg: Word,
    pub mie: Word,

    /// Software-writable pending bits
    pub mip: Word,

    /// Pending bits driven by devices, refreshed every step
    pub hardware_mip: Word,

    pub mtvec: Word,
    pub stvec: Word,
    pub mepc: Word,
    pub sepc: Word,
    pub mcause: Word,
    pub scause: Word,
    pub mtval: Word,
    pub stval: Word,
    pub mscratch: Word,
    pub sscratch: Word,
    pub mcounteren: Word,
    pub scounteren: Word,
    pub mcountinhibit: Word,
    pub menvcfg: Word,
    pub senvcfg: Word,
    pub satp: Word,
    pub stimecmp: Word,
    pub mcycle: Word,
    pub minstret: Word,

    /// Mirror of the CLINT `mtime`
    pub time: Word,

    pub pmpcfg: [Word; 16],
    pub pmpaddr: [Word; 64],
}

impl Default for CsrFile {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrFile {
    /// Reset values: every register cleared, except the fixed XLEN fields of
    /// `mstatus` and a disarmed `stimecmp`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mstatus: Mstatus::from_bits_retain(Mstatus::XLEN),
            medeleg: 0,
            mideleg: 0,
            mie: 0,
            mip: 0,
            hardware_mip: 0,
            mtvec: 0,
            stvec: 0,
            mepc: 0,
            sepc: 0,
            mcause: 0,
            scause: 0,
            mtval: 0,
            stval: 0,
            mscratch: 0,
            sscratch: 0,
            mcounteren: 0,
            scounteren: 0,
            mcountinhibit: 0,
            menvcfg: 0,
            senvcfg: 0,
            satp: 0,
            stimecmp: Word::MAX,
            mcycle: 0,
            minstret: 0,
            time: 0,
            pmpcfg: [0; 16],
            pmpaddr: [0; 64],
        }
    }

    /// Pending interrupts as seen by software: software bits, device lines and
    /// the Sstc comparator
    #[must_use]
    pub fn mip(&self) -> Word {
        let mut mip = self.mip | self.hardware_mip;
        if self.menvcfg & MENVCFG_STCE != 0 && self.time >= self.stimecmp {
            mip |= Interrupt::SupervisorTimer.bit();
        }
        mip
    }

    #[must_use]
    pub const fn sv39_enabled(&self) -> bool {
        self.satp >> 60 == SATP_MODE_SV39
    }

    /// Root page table physical page number
    #[must_use]
    pub const fn satp_ppn(&self) -> Word {
        self.satp & ((1 << 44) - 1)
    }

    fn counter_enabled(&self, csr: Csr, privilege: Privilege) -> bool {
        let bit = 1 << (csr.0 & 0x1F);
        match privilege {
            Privilege::Machine => true,
            Privilege::Supervisor => self.mcounteren & bit != 0,
            Privilege::User => self.mcounteren & bit != 0 && self.scounteren & bit != 0,
        }
    }

    fn exists(csr: Csr) -> bool {
        matches!(csr.0,
            0x100 | 0x104..=0x106 | 0x10A | 0x140..=0x144 | 0x14D | 0x180
            | 0x300..=0x306 | 0x30A | 0x320 | 0x323..=0x33F | 0x340..=0x344
            | 0x3A0..=0x3EF
            | 0xB00 | 0xB02..=0xB1F
            | 0xC00..=0xC1F
            | 0xF11..=0xF15)
    }

    /// Check that `csr` can be accessed at `privilege`
    ///
    /// # Errors
    ///
    /// Returns the reason the access is refused
    pub fn check(&self, csr: Csr, privilege: Privilege, write: bool) -> Result<(), CsrFault> {
        if !Self::exists(csr) {
            return Err(CsrFault::Illegal);
        }

        if privilege < csr.privilege() {
            return Err(CsrFault::Privileged);
        }

        if write && csr.is_read_only() {
            return Err(CsrFault::Illegal);
        }

        match csr.0 {
            0xC00..=0xC1F if !self.counter_enabled(csr, privilege) => Err(CsrFault::Privileged),
            0x14D if privilege < Privilege::Machine && self.menvcfg & MENVCFG_STCE == 0 => {
                Err(CsrFault::Privileged)
            }
            0x180
                if privilege == Privilege::Supervisor && self.mstatus.contains(Mstatus::TVM) =>
            {
                Err(CsrFault::Privileged)
            }
            _ => Ok(()),
        }
    }

    /// Read a register. Access rights must have been checked beforehand.
    #[must_use]
    pub fn read(&self, csr: Csr) -> Word {
        match csr {
            Csr::SSTATUS => self.mstatus.bits() & Mstatus::SSTATUS.bits(),
            Csr::SIE => self.mie & self.mideleg,
            Csr::STVEC => self.stvec,
            Csr::SCOUNTEREN => self.scounteren,
            Csr::SENVCFG => self.senvcfg,
            Csr::SSCRATCH => self.sscratch,
            Csr::SEPC => self.sepc,
            Csr::SCAUSE => self.scause,
            Csr::STVAL => self.stval,
            Csr::SIP => self.mip() & self.mideleg,
            Csr::STIMECMP => self.stimecmp,
            Csr::SATP => self.satp,

            Csr::MSTATUS => self.mstatus.bits(),
            Csr::MISA => MISA,
            Csr::MEDELEG => self.medeleg,
            Csr::MIDELEG => self.mideleg,
            Csr::MIE => self.mie,
            Csr::MTVEC => self.mtvec,
            Csr::MCOUNTEREN => self.mcounteren,
            Csr::MENVCFG => self.menvcfg,
            Csr::MCOUNTINHIBIT => self.mcountinhibit,
            Csr::MSCRATCH => self.mscratch,
            Csr::MEPC => self.mepc,
            Csr::MCAUSE => self.mcause,
            Csr::MTVAL => self.mtval,
            Csr::MIP => self.mip(),

            Csr::MCYCLE | Csr::CYCLE => self.mcycle,
            Csr::MINSTRET | Csr::INSTRET => self.minstret,
            Csr::TIME => self.time,

            Csr(n @ 0x3A0..=0x3AF) => self.pmpcfg[usize::from(n - 0x3A0)],
            Csr(n @ 0x3B0..=0x3EF) => self.pmpaddr[usize::from(n - 0x3B0)],

            // ID registers, hart 0 and performance counters all read zero
            _ => 0,
        }
    }

    /// Write a register, applying its write mask. Access rights must have been
    /// checked beforehand.
    pub fn write(&mut self, csr: Csr, value: Word) {
        match csr {
            Csr::SSTATUS => {
                let mask = Mstatus::SSTATUS_WRITABLE.bits();
                self.mstatus =
                    Mstatus::from_bits_retain((self.mstatus.bits() & !mask) | (value & mask));
            }
            Csr::SIE => self.mie = (self.mie & !self.mideleg) | (value & self.mideleg),
            Csr::STVEC => self.stvec = value & !0b10,
            Csr::SCOUNTEREN => self.scounteren = value & 0xFFFF_FFFF,
            Csr::SENVCFG => self.senvcfg = value & ENVCFG_FIOM,
            Csr::SSCRATCH => self.sscratch = value,
            Csr::SEPC => self.sepc = value & !1,
            Csr::SCAUSE => self.scause = value,
            Csr::STVAL => self.stval = value,
            Csr::SIP => {
                let mask = self.mideleg & Interrupt::SupervisorSoftware.bit();
                self.mip = (self.mip & !mask) | (value & mask);
            }
            Csr::STIMECMP => self.stimecmp = value,
            Csr::SATP => {
                // Unsupported modes leave the register untouched
                if matches!(value >> 60, SATP_MODE_BARE | SATP_MODE_SV39) {
                    self.satp = value;
                }
            }

            Csr::MSTATUS => {
                let mask = Mstatus::WRITABLE.bits();
                let previous = self.mstatus;
                self.mstatus =
                    Mstatus::from_bits_retain((previous.bits() & !mask) | (value & mask));
                // MPP only holds implemented privilege levels
                if (value >> 11) & 0b11 == 0b10 {
                    self.mstatus.set_mpp(previous.mpp());
                }
            }
            Csr::MEDELEG => self.medeleg = value & MEDELEG_WRITABLE,
            Csr::MIDELEG => self.mideleg = value & MIP_WRITABLE,
            Csr::MIE => self.mie = value & INTERRUPTS,
            Csr::MTVEC => self.mtvec = value & !0b10,
            Csr::MCOUNTEREN => self.mcounteren = value & 0xFFFF_FFFF,
            Csr::MENVCFG => self.menvcfg = value & (MENVCFG_STCE | ENVCFG_FIOM),
            Csr::MCOUNTINHIBIT => self.mcountinhibit = value & 0b101,
            Csr::MSCRATCH => self.mscratch = value,
            Csr::MEPC => self.mepc = value & !1,
            Csr::MCAUSE => self.mcause = value,
            Csr::MTVAL => self.mtval = value,
            Csr::MIP => self.mip = (self.mip & !MIP_WRITABLE) | (value & MIP_WRITABLE),

            Csr::MCYCLE => self.mcycle = value,
            Csr::MINSTRET => self.minstret = value,

            Csr(n @ 0x3A0..=0x3AF) => self.pmpcfg[usize::from(n - 0x3A0)] = value,
            Csr(n @ 0x3B0..=0x3EF) => {
                self.pmpaddr[usize::from(n - 0x3B0)] = value & ((1 << 54) - 1);
            }

            // misa and the hpm events are read-only zero
            _ => {}
        }
    }
}
