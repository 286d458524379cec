pub type Address = u64;
pub type Word = u64;

/// Default base of the RAM, where images are loaded and execution starts
pub const RAM_BASE: Address = 0x8000_0000;

/// Default size of the RAM
pub const RAM_SIZE: u64 = 128 * 1024 * 1024;

/// Largest RAM a machine can be built with
pub const MAX_RAM_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Test finisher, used by software to stop the machine
pub const FINISHER_BASE: Address = 0x0010_0000;
pub const FINISHER_SIZE: u64 = 0x1000;

/// Core-local interruptor (software and timer interrupts)
pub const CLINT_BASE: Address = 0x0200_0000;
pub const CLINT_SIZE: u64 = 0x1_0000;

/// Platform-level interrupt controller
pub const PLIC_BASE: Address = 0x0C00_0000;
pub const PLIC_SIZE: u64 = 0x400_0000;

/// 16550-compatible serial port
pub const UART_BASE: Address = 0x1000_0000;
pub const UART_SIZE: u64 = 0x100;

/// virtio-mmio slot holding the block device
pub const VIRTIO_BASE: Address = 0x1000_1000;
pub const VIRTIO_SIZE: u64 = 0x1000;

/// PLIC source of the virtio block device
pub const VIRTIO_IRQ: u32 = 1;

/// PLIC source of the serial port
pub const UART_IRQ: u32 = 10;

/// Size of a page, both for Sv39 and the virtio queues
pub const PAGE_SIZE: u64 = 4096;

/// Size of a disk sector
pub const SECTOR_SIZE: u64 = 512;
