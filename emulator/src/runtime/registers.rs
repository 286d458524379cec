use std::str::FromStr;

use parse_display::Display;
use thiserror::Error;

use crate::constants as C;

/// General purpose registers, named after their ABI role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display(style = "lowercase")]
pub enum Reg {
    /// Hard-wired zero
    Zero,
    /// Return address
    Ra,
    /// Stack pointer
    Sp,
    /// Global pointer
    Gp,
    /// Thread pointer
    Tp,
    T0,
    T1,
    T2,
    /// Frame pointer
    S0,
    S1,
    /// Arguments and return values
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    T3,
    T4,
    T5,
    T6,
}

impl Reg {
    /// Every register, ordered by index
    pub const ALL: [Self; 32] = [
        Self::Zero,
        Self::Ra,
        Self::Sp,
        Self::Gp,
        Self::Tp,
        Self::T0,
        Self::T1,
        Self::T2,
        Self::S0,
        Self::S1,
        Self::A0,
        Self::A1,
        Self::A2,
        Self::A3,
        Self::A4,
        Self::A5,
        Self::A6,
        Self::A7,
        Self::S2,
        Self::S3,
        Self::S4,
        Self::S5,
        Self::S6,
        Self::S7,
        Self::S8,
        Self::S9,
        Self::S10,
        Self::S11,
        Self::T3,
        Self::T4,
        Self::T5,
        Self::T6,
    ];

    /// Get a register from the low 5 bits of an instruction field
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self::ALL[(index & 0x1F) as usize]
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown register {0:?}")]
pub struct UnknownRegister(String);

impl FromStr for Reg {
    type Err = UnknownRegister;

    /// Parse either an ABI name (`a0`, `sp`, `fp`) or an index (`x10`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();

        if name == "fp" {
            return Ok(Self::S0);
        }

        if let Some(index) = name.strip_prefix('x') {
            if let Ok(index @ 0..=31) = index.parse::<u32>() {
                return Ok(Self::from_index(index));
            }
        }

        Self::ALL
            .into_iter()
            .find(|reg| reg.to_string() == name)
            .ok_or_else(|| UnknownRegister(s.to_owned()))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Registers {
    x: [C::Word; 32],

    /// Program counter
    pub pc: C::Address,
}

impl Registers {
    #[must_use]
    pub const fn get(&self, reg: Reg) -> C::Word {
        self.x[reg.index()]
    }

    /// Set a register value. Writes to `zero` are discarded.
    pub fn set(&mut self, reg: Reg, value: C::Word) {
        if reg != Reg::Zero {
            self.x[reg.index()] = value;
        }
    }
}

impl std::fmt::Display for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pc   = {:#018x}", self.pc)?;
        for (i, reg) in Reg::ALL.iter().enumerate().skip(1) {
            let sep = if i % 4 == 1 { "\n" } else { " | " };
            write!(f, "{sep}{:<4} = {:#018x}", reg.to_string(), self.get(*reg))?;
        }
        Ok(())
    }
}
