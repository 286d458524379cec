use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use super::memory::{AccessFault, Memory, Width};
use crate::constants::{Address, Word};

/// Interrupt lines and machine-wide signals collected from devices once per step
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterruptLines {
    /// Level of each PLIC source, bit `n` for source `n`
    pub sources: u64,

    /// Hardware-driven `mip` bits (MSIP, MTIP, MEIP, SEIP)
    pub mip: Word,

    /// Current value of the machine timer
    pub mtime: u64,

    /// Set once software asked the machine to stop
    pub halt: Option<u32>,
}

/// A memory-mapped device
///
/// Offsets are relative to the base address the device was registered at.
/// Devices are `Send` so that a whole machine can be moved to a worker thread.
pub trait Device: Send {
    fn read(&mut self, offset: u64, width: Width) -> Word;

    fn write(&mut self, offset: u64, width: Width, value: Word);

    /// Advance by one step. Devices may access RAM (DMA) and raise lines.
    fn tick(&mut self, _ram: &mut Memory, _lines: &mut InterruptLines) {}

    /// Second phase of a tick, once every device raised its lines
    fn route(&mut self, _lines: &mut InterruptLines) {}

    /// Go back to the power-on state. Host-side handles stay connected.
    fn reset(&mut self) {}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("device {name} has an empty address range")]
    EmptyRange { name: &'static str },

    #[error("device {name} at {base:#x}..{end:#x} overlaps {other}")]
    Overlap {
        name: &'static str,
        base: Address,
        end: Address,
        other: &'static str,
    },
}

struct Region {
    name: &'static str,
    end: Address,
    device: Box<dyn Device>,
}

/// Routes physical accesses to RAM or to the device covering the address
pub struct Bus {
    pub ram: Memory,
    regions: BTreeMap<Address, Region>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        map.entry(&"ram", &self.ram);
        for (base, region) in &self.regions {
            map.entry(
                &region.name,
                &format_args!("{base:#x}..{:#x}", region.end),
            );
        }
        map.finish()
    }
}

impl Bus {
    #[must_use]
    pub fn new(ram: Memory) -> Self {
        Self {
            ram,
            regions: BTreeMap::new(),
        }
    }

    /// Map a device at `base..base + size`
    ///
    /// # Errors
    ///
    /// Fails if the range is empty or overlaps RAM or another device
    pub fn register(
        &mut self,
        name: &'static str,
        base: Address,
        size: u64,
        device: Box<dyn Device>,
    ) -> Result<(), BusError> {
        let end = base
            .checked_add(size)
            .filter(|_| size > 0)
            .ok_or(BusError::EmptyRange { name })?;

        let overlap = |other| BusError::Overlap {
            name,
            base,
            end,
            other,
        };

        let ram_end = self.ram.base() + self.ram.size();
        if base < ram_end && self.ram.base() < end {
            return Err(overlap("ram"));
        }

        // The region starting right before `end` is the only one that can overlap
        if let Some((_, region)) = self.regions.range(..end).next_back() {
            if region.end > base {
                return Err(overlap(region.name));
            }
        }

        debug!(name, "Registering device at {base:#x}..{end:#x}");
        self.regions.insert(base, Region { name, end, device });
        Ok(())
    }

    fn region(&mut self, address: Address, width: Width) -> Result<(Address, &mut Region), AccessFault> {
        let fault = AccessFault {
            address,
            width: width.bytes(),
        };
        let (base, region) = self.regions.range_mut(..=address).next_back().ok_or(fault)?;
        let last = address.checked_add(width.bytes()).ok_or(fault)?;
        if last > region.end {
            return Err(fault);
        }
        Ok((address - base, region))
    }

    /// Checks if `len` bytes starting at `address` all fall in the RAM or in a
    /// single device region
    #[must_use]
    pub fn contains(&self, address: Address, len: u64) -> bool {
        if self.ram.contains(address, len) {
            return true;
        }

        let Some(last) = address.checked_add(len) else {
            return false;
        };
        self.regions
            .range(..=address)
            .next_back()
            .is_some_and(|(_, region)| last <= region.end)
    }

    /// Read from RAM or a device
    ///
    /// # Errors
    ///
    /// Fails when no region covers the whole access
    pub fn read(&mut self, address: Address, width: Width) -> Result<Word, AccessFault> {
        if self.ram.contains(address, width.bytes()) {
            return self.ram.read(address, width);
        }

        let (offset, region) = self.region(address, width)?;
        Ok(region.device.read(offset, width) & width.mask())
    }

    /// Write to RAM or a device
    ///
    /// # Errors
    ///
    /// Fails when no region covers the whole access
    pub fn write(&mut self, address: Address, width: Width, value: Word) -> Result<(), AccessFault> {
        if self.ram.contains(address, width.bytes()) {
            return self.ram.write(address, width, value);
        }

        let (offset, region) = self.region(address, width)?;
        region.device.write(offset, width, value & width.mask());
        Ok(())
    }

    /// Clear the RAM and reset every device
    pub fn reset(&mut self) {
        self.ram.clear();
        for region in self.regions.values_mut() {
            region.device.reset();
        }
        debug!("Bus reset");
    }

    /// Tick every device, then let them route the collected lines.
    ///
    /// Line levels are recomputed from scratch. The halt request is sticky.
    pub fn tick(&mut self, lines: &mut InterruptLines) {
        lines.sources = 0;
        lines.mip = 0;

        for region in self.regions.values_mut() {
            region.device.tick(&mut self.ram, lines);
        }

        for region in self.regions.values_mut() {
            region.device.route(lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// A device remembering the last write, raising source 3 while non-zero
    #[derive(Default)]
    struct Latch {
        value: Word,
    }

    impl Device for Latch {
        fn read(&mut self, offset: u64, _width: Width) -> Word {
            self.value + offset
        }

        fn write(&mut self, _offset: u64, _width: Width, value: Word) {
            self.value = value;
        }

        fn tick(&mut self, _ram: &mut Memory, lines: &mut InterruptLines) {
            if self.value != 0 {
                lines.sources |= 1 << 3;
            }
        }
    }

    fn bus() -> Bus {
        Bus::new(Memory::new(0x8000_0000, 0x1000))
    }

    #[test]
    fn dispatch_test() {
        let mut bus = bus();
        bus.register("latch", 0x1000, 0x100, Box::<Latch>::default())
            .unwrap();

        bus.write(0x1000, Width::Word, 40).unwrap();
        assert_eq!(bus.read(0x1002, Width::Word).unwrap(), 42);
        assert_eq!(bus.read(0x1000, Width::Byte).unwrap(), 40);

        bus.write(0x8000_0010, Width::Double, 7).unwrap();
        assert_eq!(bus.ram.read(0x8000_0010, Width::Double).unwrap(), 7);
    }

    #[test]
    fn unmapped_access_test() {
        let mut bus = bus();
        bus.register("latch", 0x1000, 0x100, Box::<Latch>::default())
            .unwrap();

        assert_eq!(
            bus.read(0x0FFF, Width::Byte),
            Err(AccessFault {
                address: 0x0FFF,
                width: 1
            })
        );
        assert!(bus.read(0x1100, Width::Byte).is_err());
        // Straddling the end of a device
        assert!(bus.write(0x10FE, Width::Word, 0).is_err());
        // Straddling the end of RAM
        assert!(bus.read(0x8000_0FFC, Width::Double).is_err());

        assert!(bus.contains(0x10FC, 4));
        assert!(!bus.contains(0x10FE, 4));
        assert!(bus.contains(0x8000_0FF8, 8));
        assert!(!bus.contains(0x8000_0FFC, 8));
        assert!(!bus.contains(u64::MAX, 2));
    }

    #[test]
    fn overlap_test() {
        let mut bus = bus();
        bus.register("first", 0x2000, 0x100, Box::<Latch>::default())
            .unwrap();

        // Registration order does not matter
        bus.register("before", 0x1000, 0x1000, Box::<Latch>::default())
            .unwrap();
        bus.register("after", 0x2100, 0x100, Box::<Latch>::default())
            .unwrap();

        assert_eq!(
            bus.register("inside", 0x2080, 0x10, Box::<Latch>::default()),
            Err(BusError::Overlap {
                name: "inside",
                base: 0x2080,
                end: 0x2090,
                other: "first"
            })
        );
        assert_eq!(
            bus.register("across", 0x1FF0, 0x20, Box::<Latch>::default()),
            Err(BusError::Overlap {
                name: "across",
                base: 0x1FF0,
                end: 0x2010,
                other: "first"
            })
        );
        assert!(matches!(
            bus.register("ram", 0x7FFF_FFFF, 2, Box::<Latch>::default()),
            Err(BusError::Overlap { other: "ram", .. })
        ));
        assert_eq!(
            bus.register("empty", 0x3000, 0, Box::<Latch>::default()),
            Err(BusError::EmptyRange { name: "empty" })
        );
    }

    #[test]
    fn tick_test() {
        let mut bus = bus();
        bus.register("latch", 0x1000, 0x100, Box::<Latch>::default())
            .unwrap();

        let mut lines = InterruptLines::default();
        bus.tick(&mut lines);
        assert_eq!(lines.sources, 0);

        bus.write(0x1000, Width::Byte, 1).unwrap();
        bus.tick(&mut lines);
        assert_eq!(lines.sources, 1 << 3);

        bus.write(0x1000, Width::Byte, 0).unwrap();
        bus.tick(&mut lines);
        assert_eq!(lines.sources, 0);
    }
}
