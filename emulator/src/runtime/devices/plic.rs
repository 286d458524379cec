use tracing::{trace, warn};

use super::{read_part, write_part};
use crate::runtime::bus::{Device, InterruptLines};
use crate::runtime::exception::Interrupt;
use crate::runtime::memory::Width;

const SOURCES: usize = 64;
const CONTEXTS: usize = 2;

const PRIORITY: u64 = 0x0000;
const PENDING: u64 = 0x1000;
const ENABLE: u64 = 0x2000;
const ENABLE_STRIDE: u64 = 0x80;
const CONTEXT: u64 = 0x20_0000;
const CONTEXT_STRIDE: u64 = 0x1000;

/// Interrupt line driven by each context: M-mode then S-mode of hart 0
const CONTEXT_LINES: [Interrupt; CONTEXTS] =
    [Interrupt::MachineExternal, Interrupt::SupervisorExternal];

/// Platform-level interrupt controller
///
/// Source 0 does not exist. A source stays out of the pending set between
/// its claim and its completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plic {
    priority: [u32; SOURCES],
    pending: u64,
    in_service: u64,
    enable: [u64; CONTEXTS],
    threshold: [u32; CONTEXTS],
}

impl Default for Plic {
    fn default() -> Self {
        Self::new()
    }
}

impl Plic {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            priority: [0; SOURCES],
            pending: 0,
            in_service: 0,
            enable: [0; CONTEXTS],
            threshold: [0; CONTEXTS],
        }
    }

    /// Highest priority pending source enabled for `context`, lowest id on ties
    fn best(&self, context: usize) -> Option<u32> {
        let candidates = self.pending & self.enable[context];
        let mut best: Option<(u32, u32)> = None;
        for id in 1..SOURCES as u32 {
            if candidates & (1 << id) == 0 {
                continue;
            }
            let priority = self.priority[id as usize];
            if priority <= self.threshold[context] {
                continue;
            }
            if !matches!(best, Some((_, p)) if p >= priority) {
                best = Some((id, priority));
            }
        }
        best.map(|(id, _)| id)
    }

    fn claim(&mut self, context: usize) -> u32 {
        let Some(id) = self.best(context) else {
            return 0;
        };
        trace!(id, context, "Claiming interrupt");
        self.pending &= !(1 << id);
        self.in_service |= 1 << id;
        id
    }

    fn complete(&mut self, id: u32) {
        if (1..SOURCES as u32).contains(&id) {
            trace!(id, "Completing interrupt");
            self.in_service &= !(1 << id);
        } else {
            warn!(id, "Completing an invalid interrupt source");
        }
    }

    /// Decode an enable register offset into (context, byte offset in the bitmap)
    fn enable_register(offset: u64) -> Option<(usize, u64)> {
        let context = ((offset - ENABLE) / ENABLE_STRIDE) as usize;
        let byte = (offset - ENABLE) % ENABLE_STRIDE;
        (context < CONTEXTS && byte < 8).then_some((context, byte))
    }

    /// Decode a per-context register offset into (context, register)
    fn context_register(offset: u64) -> Option<(usize, u64)> {
        let context = (offset - CONTEXT) / CONTEXT_STRIDE;
        let context = usize::try_from(context).ok().filter(|c| *c < CONTEXTS)?;
        Some((context, (offset - CONTEXT) % CONTEXT_STRIDE))
    }
}

impl Device for Plic {
    fn read(&mut self, offset: u64, width: Width) -> u64 {
        match offset {
            PRIORITY..=0xFF => u64::from(self.priority[(offset / 4) as usize]),
            PENDING..=0x1007 => read_part(self.pending, offset - PENDING, width),
            ENABLE..=0x20FF => match Self::enable_register(offset) {
                Some((context, byte)) => read_part(self.enable[context], byte, width),
                None => 0,
            },
            CONTEXT.. => match Self::context_register(offset) {
                Some((context, 0)) => u64::from(self.threshold[context]),
                Some((context, 4)) => u64::from(self.claim(context)),
                _ => {
                    warn!(offset, "Read from unknown PLIC register");
                    0
                }
            },
            _ => {
                warn!(offset, "Read from unknown PLIC register");
                0
            }
        }
    }

    fn write(&mut self, offset: u64, width: Width, value: u64) {
        match offset {
            PRIORITY..=0xFF => {
                let id = (offset / 4) as usize;
                if id != 0 {
                    self.priority[id] = (value & 0x7) as u32;
                }
            }
            // Pending bits are read-only
            PENDING..=0x1007 => {}
            ENABLE..=0x20FF => {
                if let Some((context, byte)) = Self::enable_register(offset) {
                    let enable = &mut self.enable[context];
                    *enable = write_part(*enable, byte, width, value) & !1;
                }
            }
            CONTEXT.. => match Self::context_register(offset) {
                Some((context, 0)) => self.threshold[context] = (value & 0x7) as u32,
                Some((_, 4)) => self.complete(value as u32),
                _ => warn!(offset, value, "Write to unknown PLIC register"),
            },
            _ => warn!(offset, value, "Write to unknown PLIC register"),
        }
    }

    fn route(&mut self, lines: &mut InterruptLines) {
        self.pending |= lines.sources & !self.in_service & !1;

        for (context, line) in CONTEXT_LINES.iter().enumerate() {
            if self.best(context).is_some() {
                lines.mip |= line.bit();
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}
