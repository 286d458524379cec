use parse_display::Display;
use thiserror::Error;

use crate::constants::Address;

/// Width of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Width {
    #[display("1")]
    Byte,
    #[display("2")]
    Half,
    #[display("4")]
    Word,
    #[display("8")]
    Double,
}

impl Width {
    /// Number of bytes covered by an access of this width
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
            Self::Double => 8,
        }
    }

    /// Mask selecting the low bits of a value of this width
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Byte => 0xFF,
            Self::Half => 0xFFFF,
            Self::Word => 0xFFFF_FFFF,
            Self::Double => u64::MAX,
        }
    }

    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Option<Self> {
        match bytes {
            1 => Some(Self::Byte),
            2 => Some(Self::Half),
            4 => Some(Self::Word),
            8 => Some(Self::Double),
            _ => None,
        }
    }
}

/// Raised when an access does not fall entirely in a backed region
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("access fault at {address:#x} ({width} bytes)")]
pub struct AccessFault {
    pub address: Address,
    pub width: u64,
}

impl AccessFault {
    pub(crate) const fn new(address: Address, width: u64) -> Self {
        Self { address, width }
    }
}

/// Physical memory of the machine.
///
/// Addresses are absolute physical addresses: the first byte of the memory
/// lives at `base`.
#[derive(Clone)]
pub struct Memory {
    base: Address,
    cells: Vec<u8>,
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory {{ base: {:#x}, size: {:#x}, cells: [...] }}",
            self.base,
            self.cells.len()
        )
    }
}

impl Memory {
    #[must_use]
    pub fn new(base: Address, size: u64) -> Self {
        Self {
            base,
            cells: vec![0; size as usize],
        }
    }

    /// Zero every byte
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    #[must_use]
    pub const fn base(&self) -> Address {
        self.base
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.cells.len() as u64
    }

    /// Checks if `len` bytes starting at `address` are all backed by this memory
    #[must_use]
    pub fn contains(&self, address: Address, len: u64) -> bool {
        self.offset(address, len).is_ok()
    }

    fn offset(&self, address: Address, len: u64) -> Result<usize, AccessFault> {
        let fault = AccessFault::new(address, len);
        let start = address.checked_sub(self.base).ok_or(fault)?;
        let end = start.checked_add(len).ok_or(fault)?;
        if end > self.size() {
            return Err(fault);
        }

        usize::try_from(start).map_err(|_| fault)
    }

    /// Read a little-endian value
    ///
    /// # Errors
    ///
    /// Fails if any byte of the access is outside of the memory
    pub fn read(&self, address: Address, width: Width) -> Result<u64, AccessFault> {
        let len = width.bytes();
        let start = self.offset(address, len)?;
        let mut buf = [0u8; 8];
        buf[..len as usize].copy_from_slice(&self.cells[start..start + len as usize]);
        Ok(u64::from_le_bytes(buf))
    }

    /// Write the low `width` bytes of `value`, little-endian
    ///
    /// # Errors
    ///
    /// Fails if any byte of the access is outside of the memory. Nothing is
    /// written in that case.
    pub fn write(&mut self, address: Address, width: Width, value: u64) -> Result<(), AccessFault> {
        let len = width.bytes() as usize;
        let start = self.offset(address, width.bytes())?;
        self.cells[start..start + len].copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }

    /// Fill `buf` with the bytes starting at `address`
    ///
    /// # Errors
    ///
    /// Fails if the range is not entirely backed by this memory
    pub fn read_bytes(&self, address: Address, buf: &mut [u8]) -> Result<(), AccessFault> {
        let start = self.offset(address, buf.len() as u64)?;
        buf.copy_from_slice(&self.cells[start..start + buf.len()]);
        Ok(())
    }

    /// Copy `bytes` at `address`
    ///
    /// # Errors
    ///
    /// Fails if the range is not entirely backed by this memory
    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<(), AccessFault> {
        let start = self.offset(address, bytes.len() as u64)?;
        self.cells[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
