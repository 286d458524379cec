use tracing::warn;

use super::{read_part, write_part};
use crate::runtime::bus::{Device, InterruptLines};
use crate::runtime::exception::Interrupt;
use crate::runtime::memory::{Memory, Width};

const MSIP: u64 = 0x0000;
const MTIMECMP: u64 = 0x4000;
const MTIME: u64 = 0xBFF8;

/// Core-local interruptor of hart 0: software interrupt and machine timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clint {
    msip: u32,
    mtimecmp: u64,
    mtime: u64,

    /// How much `mtime` advances per step
    increment: u64,
}

impl Clint {
    #[must_use]
    pub const fn new(increment: u64) -> Self {
        Self {
            msip: 0,
            mtimecmp: u64::MAX,
            mtime: 0,
            increment,
        }
    }
}

impl Device for Clint {
    fn read(&mut self, offset: u64, width: Width) -> u64 {
        match offset {
            MSIP..=0x3 => read_part(self.msip.into(), offset - MSIP, width),
            MTIMECMP..=0x4007 => read_part(self.mtimecmp, offset - MTIMECMP, width),
            MTIME..=0xBFFF => read_part(self.mtime, offset - MTIME, width),
            _ => {
                warn!(offset, "Read from unknown CLINT register");
                0
            }
        }
    }

    fn write(&mut self, offset: u64, width: Width, value: u64) {
        match offset {
            MSIP..=0x3 => {
                self.msip = write_part(self.msip.into(), offset - MSIP, width, value) as u32 & 1;
            }
            MTIMECMP..=0x4007 => {
                self.mtimecmp = write_part(self.mtimecmp, offset - MTIMECMP, width, value);
            }
            MTIME..=0xBFFF => self.mtime = write_part(self.mtime, offset - MTIME, width, value),
            _ => warn!(offset, value, "Write to unknown CLINT register"),
        }
    }

    fn tick(&mut self, _ram: &mut Memory, lines: &mut InterruptLines) {
        self.mtime = self.mtime.wrapping_add(self.increment);
        lines.mtime = self.mtime;

        if self.msip & 1 != 0 {
            lines.mip |= Interrupt::MachineSoftware.bit();
        }
        if self.mtime >= self.mtimecmp {
            lines.mip |= Interrupt::MachineTimer.bit();
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.increment);
    }
}
