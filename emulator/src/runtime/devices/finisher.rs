use tracing::{info, warn};

use crate::runtime::bus::{Device, InterruptLines};
use crate::runtime::memory::{Memory, Width};

const FINISHER_FAIL: u64 = 0x3333;
const FINISHER_PASS: u64 = 0x5555;
const FINISHER_RESET: u64 = 0x7777;

/// Test finisher: a write stops the machine with an exit code
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Finisher {
    requested: Option<u32>,
}

impl Device for Finisher {
    fn read(&mut self, _offset: u64, _width: Width) -> u64 {
        0
    }

    fn write(&mut self, offset: u64, _width: Width, value: u64) {
        if offset != 0 {
            warn!(offset, value, "Write to unknown finisher register");
            return;
        }

        let code = match value & 0xFFFF {
            FINISHER_PASS | FINISHER_RESET => 0,
            FINISHER_FAIL => ((value >> 16) & 0xFFFF) as u32,
            _ => {
                warn!(value, "Unknown finisher command");
                return;
            }
        };

        info!(code, "Finisher requested a halt");
        self.requested = self.requested.or(Some(code));
    }

    fn tick(&mut self, _ram: &mut Memory, lines: &mut InterruptLines) {
        lines.halt = lines.halt.or(self.requested);
    }

    fn reset(&mut self) {
        self.requested = None;
    }
}
