//! Memory-mapped peripherals of the machine

mod clint;
mod finisher;
mod plic;
mod uart;
mod virtio;

pub use self::clint::Clint;
pub use self::finisher::Finisher;
pub use self::plic::Plic;
pub use self::uart::{Console, ConsoleInput, ConsoleOutput, Uart};
pub use self::virtio::VirtioBlock;

use super::memory::Width;

/// Extract the bytes of `register` covered by an access at `offset` within it
const fn read_part(register: u64, offset: u64, width: Width) -> u64 {
    (register >> (offset * 8)) & width.mask()
}

/// Merge the bytes written at `offset` into `register`
const fn write_part(register: u64, offset: u64, width: Width, value: u64) -> u64 {
    let shift = offset * 8;
    let mask = width.mask() << shift;
    (register & !mask) | ((value << shift) & mask)
}
