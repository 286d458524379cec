use tracing::{debug, trace, warn};

use crate::constants::{Address, SECTOR_SIZE, VIRTIO_IRQ};
use crate::runtime::bus::{Device, InterruptLines};
use crate::runtime::memory::{AccessFault, Memory, Width};

const MAGIC_VALUE: u64 = 0x000;
const VERSION: u64 = 0x004;
const DEVICE_ID: u64 = 0x008;
const VENDOR_ID: u64 = 0x00C;
const DEVICE_FEATURES: u64 = 0x010;
const DEVICE_FEATURES_SEL: u64 = 0x014;
const DRIVER_FEATURES: u64 = 0x020;
const DRIVER_FEATURES_SEL: u64 = 0x024;
const QUEUE_SEL: u64 = 0x030;
const QUEUE_NUM_MAX: u64 = 0x034;
const QUEUE_NUM: u64 = 0x038;
const QUEUE_READY: u64 = 0x044;
const QUEUE_NOTIFY: u64 = 0x050;
const INTERRUPT_STATUS: u64 = 0x060;
const INTERRUPT_ACK: u64 = 0x064;
const STATUS: u64 = 0x070;
const QUEUE_DESC_LOW: u64 = 0x080;
const QUEUE_DESC_HIGH: u64 = 0x084;
const QUEUE_DRIVER_LOW: u64 = 0x090;
const QUEUE_DRIVER_HIGH: u64 = 0x094;
const QUEUE_DEVICE_LOW: u64 = 0x0A0;
const QUEUE_DEVICE_HIGH: u64 = 0x0A4;
const CONFIG_GENERATION: u64 = 0x0FC;
const CONFIG: u64 = 0x100;

/// "virt" in little-endian
const MAGIC: u32 = 0x7472_6976;
/// "QEMU" in little-endian
const VENDOR: u32 = 0x554D_4551;
const BLOCK_DEVICE: u32 = 2;

/// Feature bit 32, the only one offered
const VIRTIO_F_VERSION_1: u64 = 1 << 32;

const QUEUE_SIZE_MAX: u32 = 64;

const DESC_F_NEXT: u16 = 1;
const DESC_F_WRITE: u16 = 2;

const BLK_T_IN: u32 = 0;
const BLK_T_OUT: u32 = 1;

const BLK_S_OK: u8 = 0;
const BLK_S_IOERR: u8 = 1;
const BLK_S_UNSUPP: u8 = 2;

/// Used buffer notification, in InterruptStatus
const INTERRUPT_USED_BUFFER: u32 = 1;

#[derive(Debug, Clone, Copy)]
struct Descriptor {
    address: Address,
    len: u32,
    flags: u16,
    next: u16,
}

impl Descriptor {
    fn writable(&self) -> bool {
        self.flags & DESC_F_WRITE != 0
    }
}

/// virtio-mmio (version 2) block device, backed by an in-memory disk image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtioBlock {
    disk: Option<Vec<u8>>,

    status: u32,
    device_features_sel: u32,
    driver_features: u64,
    driver_features_sel: u32,
    interrupt_status: u32,

    queue_sel: u32,
    queue_num: u32,
    queue_ready: bool,
    desc: Address,
    driver: Address,
    device: Address,

    /// Next available ring entry to process
    last_avail: u16,
    notified: bool,
}

impl VirtioBlock {
    /// Without a disk image the slot is reported as empty (device id 0)
    #[must_use]
    pub fn new(disk: Option<Vec<u8>>) -> Self {
        Self {
            disk,
            status: 0,
            device_features_sel: 0,
            driver_features: 0,
            driver_features_sel: 0,
            interrupt_status: 0,
            queue_sel: 0,
            queue_num: 0,
            queue_ready: false,
            desc: 0,
            driver: 0,
            device: 0,
            last_avail: 0,
            notified: false,
        }
    }

    /// Current content of the disk image
    #[must_use]
    pub fn disk(&self) -> Option<&[u8]> {
        self.disk.as_deref()
    }

    fn capacity(&self) -> u64 {
        self.disk.as_ref().map_or(0, |d| d.len() as u64 / SECTOR_SIZE)
    }

    fn set_low(register: &mut Address, value: u64) {
        *register = (*register & !0xFFFF_FFFF) | (value & 0xFFFF_FFFF);
    }

    fn set_high(register: &mut Address, value: u64) {
        *register = (*register & 0xFFFF_FFFF) | (value << 32);
    }

    fn descriptor(&self, ram: &Memory, index: u16) -> Result<Descriptor, AccessFault> {
        let base = self.desc + 16 * u64::from(index);
        Ok(Descriptor {
            address: ram.read(base, Width::Double)?,
            len: ram.read(base + 8, Width::Word)? as u32,
            flags: ram.read(base + 12, Width::Half)? as u16,
            next: ram.read(base + 14, Width::Half)? as u16,
        })
    }

    /// Follow a descriptor chain, bounded by the queue size
    fn chain(&self, ram: &Memory, head: u16) -> Result<Vec<Descriptor>, AccessFault> {
        let mut chain = Vec::new();
        let mut index = head;
        loop {
            let descriptor = self.descriptor(ram, index % self.queue_num as u16)?;
            chain.push(descriptor);
            if descriptor.flags & DESC_F_NEXT == 0 || chain.len() >= self.queue_num as usize {
                return Ok(chain);
            }
            index = descriptor.next;
        }
    }

    /// Run one request, returning the number of bytes written to guest memory
    fn process(&mut self, ram: &mut Memory, head: u16) -> Result<u32, AccessFault> {
        let chain = self.chain(ram, head)?;
        let (Some(header), Some(status)) = (chain.first(), chain.last()) else {
            return Ok(0);
        };

        if chain.len() < 2 || !status.writable() {
            warn!(head, "Malformed virtio block request");
            return Ok(0);
        }

        let kind = ram.read(header.address, Width::Word)? as u32;
        let sector = ram.read(header.address + 8, Width::Double)?;
        let buffers = &chain[1..chain.len() - 1];
        let total: u64 = buffers.iter().map(|b| u64::from(b.len)).sum();

        trace!(kind, sector, len = total, "Processing virtio block request");

        let start = sector.checked_mul(SECTOR_SIZE);
        let in_range = start
            .and_then(|start| start.checked_add(total))
            .is_some_and(|end| end <= self.capacity() * SECTOR_SIZE);

        let mut written = 0;
        let result = match (kind, self.disk.as_mut()) {
            (BLK_T_IN | BLK_T_OUT, Some(disk)) if in_range => {
                let mut position = start.unwrap_or(0) as usize;
                for buffer in buffers {
                    let len = buffer.len as usize;
                    let range = position..position + len;
                    if kind == BLK_T_IN {
                        ram.write_bytes(buffer.address, &disk[range])?;
                        written += buffer.len;
                    } else {
                        ram.read_bytes(buffer.address, &mut disk[range])?;
                    }
                    position += len;
                }
                BLK_S_OK
            }
            (BLK_T_IN | BLK_T_OUT, _) => BLK_S_IOERR,
            _ => BLK_S_UNSUPP,
        };

        ram.write(status.address, Width::Byte, result.into())?;
        Ok(written + 1)
    }

    fn process_queue(&mut self, ram: &mut Memory) {
        if !self.queue_ready || self.queue_num == 0 {
            warn!("Notified before the queue was set up");
            return;
        }

        let num = self.queue_num as u16;
        let Ok(avail_idx) = ram.read(self.driver + 2, Width::Half) else {
            warn!(driver = self.driver, "Available ring is outside of RAM");
            return;
        };

        while self.last_avail != avail_idx as u16 {
            let slot = self.driver + 4 + 2 * u64::from(self.last_avail % num);
            let head = ram.read(slot, Width::Half).map(|h| h as u16);

            let (head, len) = match head {
                Ok(head) => match self.process(ram, head) {
                    Ok(len) => (head, len),
                    Err(fault) => {
                        warn!(%fault, "virtio block request touches memory outside of RAM");
                        (head, 0)
                    }
                },
                Err(fault) => {
                    warn!(%fault, "Available ring is outside of RAM");
                    return;
                }
            };

            if let Err(fault) = self.push_used(ram, head, len) {
                warn!(%fault, "Used ring is outside of RAM");
                return;
            }

            self.last_avail = self.last_avail.wrapping_add(1);
            self.interrupt_status |= INTERRUPT_USED_BUFFER;
        }
    }

    fn push_used(&self, ram: &mut Memory, head: u16, len: u32) -> Result<(), AccessFault> {
        let num = self.queue_num as u16;
        let used_idx = ram.read(self.device + 2, Width::Half)? as u16;
        let element = self.device + 4 + 8 * u64::from(used_idx % num);
        ram.write(element, Width::Word, head.into())?;
        ram.write(element + 4, Width::Word, len.into())?;
        ram.write(self.device + 2, Width::Half, used_idx.wrapping_add(1).into())
    }
}

impl Device for VirtioBlock {
    fn read(&mut self, offset: u64, width: Width) -> u64 {
        let queue = self.queue_sel == 0;
        let value: u32 = match offset {
            MAGIC_VALUE => MAGIC,
            VERSION => 2,
            DEVICE_ID if self.disk.is_some() => BLOCK_DEVICE,
            DEVICE_ID => 0,
            VENDOR_ID => VENDOR,
            DEVICE_FEATURES => match self.device_features_sel {
                0 => VIRTIO_F_VERSION_1 as u32,
                1 => (VIRTIO_F_VERSION_1 >> 32) as u32,
                _ => 0,
            },
            QUEUE_NUM_MAX if queue => QUEUE_SIZE_MAX,
            QUEUE_READY if queue => self.queue_ready.into(),
            QUEUE_NUM_MAX | QUEUE_READY => 0,
            INTERRUPT_STATUS => self.interrupt_status,
            STATUS => self.status,
            CONFIG_GENERATION => 0,
            CONFIG.. if offset < CONFIG + 8 => {
                return super::read_part(self.capacity(), offset - CONFIG, width);
            }
            _ => {
                warn!(offset, "Read from unknown virtio register");
                0
            }
        };
        value.into()
    }

    fn write(&mut self, offset: u64, _width: Width, value: u64) {
        let queue = self.queue_sel == 0;
        match offset {
            DEVICE_FEATURES_SEL => self.device_features_sel = value as u32,
            DRIVER_FEATURES if self.driver_features_sel < 2 => {
                let shift = 32 * u64::from(self.driver_features_sel);
                self.driver_features = (self.driver_features & !(0xFFFF_FFFF << shift))
                    | ((value & 0xFFFF_FFFF) << shift);
            }
            // No feature is defined past bit 63
            DRIVER_FEATURES => {}
            DRIVER_FEATURES_SEL => self.driver_features_sel = value as u32,
            QUEUE_SEL => self.queue_sel = value as u32,
            QUEUE_NUM if queue => self.queue_num = (value as u32).min(QUEUE_SIZE_MAX),
            QUEUE_READY if queue => self.queue_ready = value & 1 != 0,
            QUEUE_DESC_LOW if queue => Self::set_low(&mut self.desc, value),
            QUEUE_DESC_HIGH if queue => Self::set_high(&mut self.desc, value),
            QUEUE_DRIVER_LOW if queue => Self::set_low(&mut self.driver, value),
            QUEUE_DRIVER_HIGH if queue => Self::set_high(&mut self.driver, value),
            QUEUE_DEVICE_LOW if queue => Self::set_low(&mut self.device, value),
            QUEUE_DEVICE_HIGH if queue => Self::set_high(&mut self.device, value),
            QUEUE_NOTIFY if value == 0 => self.notified = true,
            INTERRUPT_ACK => self.interrupt_status &= !(value as u32),
            STATUS if value == 0 => self.reset(),
            STATUS => {
                debug!(status = value, "virtio block status");
                self.status = value as u32;
            }
            _ => warn!(offset, value, "Write to unknown virtio register"),
        }
    }

    fn tick(&mut self, ram: &mut Memory, lines: &mut InterruptLines) {
        if std::mem::take(&mut self.notified) && self.disk.is_some() {
            self.process_queue(ram);
        }

        if self.interrupt_status != 0 {
            lines.sources |= 1 << VIRTIO_IRQ;
        }
    }

    /// Writing 0 to the status register resets the device. The disk image is kept.
    fn reset(&mut self) {
        debug!("Resetting virtio block device");
        *self = Self::new(self.disk.take());
    }
}
