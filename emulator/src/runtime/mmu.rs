//! Sv39 address translation, and loads and stores through it

use bitflags::bitflags;
use tracing::trace;

use super::csr::Mstatus;
use super::exception::{AccessType, Exception, Privilege};
use super::memory::{AccessFault, Width};
use super::Computer;
use crate::constants::{Address, Word, PAGE_SIZE};

const LEVELS: u32 = 3;
const PTE_SIZE: u64 = 8;
const PPN_MASK: u64 = (1 << 44) - 1;

bitflags! {
    /// Flag bits of a page table entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Pte: u64 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

impl Pte {
    const fn ppn(self) -> u64 {
        (self.bits() >> 10) & PPN_MASK
    }

    fn is_leaf(self) -> bool {
        self.intersects(Self::R.union(Self::X))
    }

    /// Invalid entries and reserved encodings
    fn is_malformed(self) -> bool {
        !self.contains(Self::V)
            || (self.contains(Self::W) && !self.contains(Self::R))
            || self.bits() >> 54 != 0
    }
}

impl Computer {
    /// Privilege used for translation and permission checks
    fn effective_privilege(&self, access: AccessType) -> Privilege {
        if access != AccessType::Fetch && self.csrs.mstatus.contains(Mstatus::MPRV) {
            self.csrs.mstatus.mpp()
        } else {
            self.privilege
        }
    }

    fn permitted(&self, pte: Pte, access: AccessType, privilege: Privilege) -> bool {
        let mstatus = self.csrs.mstatus;
        let allowed = match access {
            AccessType::Fetch => pte.contains(Pte::X),
            AccessType::Load => {
                pte.contains(Pte::R) || (pte.contains(Pte::X) && mstatus.contains(Mstatus::MXR))
            }
            AccessType::Store => pte.contains(Pte::W),
        };

        let owner = match privilege {
            Privilege::User => pte.contains(Pte::U),
            // S-mode never executes user pages, and only touches them with SUM
            _ => {
                !pte.contains(Pte::U)
                    || (access != AccessType::Fetch && mstatus.contains(Mstatus::SUM))
            }
        };

        allowed && owner
    }

    /// Translate a virtual address, updating the accessed and dirty bits of
    /// the leaf entry
    ///
    /// # Errors
    ///
    /// Returns a page fault for the access type when the walk fails or the
    /// permissions do not allow the access, and an access fault when a page
    /// table lies outside of memory.
    pub fn translate(&mut self, address: Address, access: AccessType) -> Result<Address, Exception> {
        self.walk(address, access, true)
    }

    /// Translate a virtual address like [`Computer::translate`], leaving the
    /// page tables untouched. Used to inspect memory from outside the hart.
    ///
    /// # Errors
    ///
    /// Fails like [`Computer::translate`] does
    pub fn inspect_translation(
        &mut self,
        address: Address,
        access: AccessType,
    ) -> Result<Address, Exception> {
        self.walk(address, access, false)
    }

    fn walk(&mut self, address: Address, access: AccessType, update: bool) -> Result<Address, Exception> {
        let privilege = self.effective_privilege(access);
        if privilege == Privilege::Machine || !self.csrs.sv39_enabled() {
            return Ok(address);
        }

        // Bits 63 to 39 must all equal bit 38
        let upper = (address as i64) >> 38;
        if upper != 0 && upper != -1 {
            return Err(access.page_fault(address));
        }

        let mut table = self.csrs.satp_ppn() * PAGE_SIZE;
        for level in (0..LEVELS).rev() {
            let vpn = (address >> (12 + 9 * level)) & 0x1FF;
            let entry = table + vpn * PTE_SIZE;
            let pte = self
                .bus
                .read(entry, Width::Double)
                .map(Pte::from_bits_retain)
                .map_err(|_| access.access_fault(address))?;

            if pte.is_malformed() {
                return Err(access.page_fault(address));
            }

            if !pte.is_leaf() {
                table = pte.ppn() * PAGE_SIZE;
                continue;
            }

            if !self.permitted(pte, access, privilege) {
                return Err(access.page_fault(address));
            }

            // Superpages must be aligned on their size
            let mask = (1 << (9 * level)) - 1;
            if pte.ppn() & mask != 0 {
                return Err(access.page_fault(address));
            }

            let mut updated = pte | Pte::A;
            if access == AccessType::Store {
                updated |= Pte::D;
            }
            if update && updated != pte {
                self.bus
                    .write(entry, Width::Double, updated.bits())
                    .map_err(|_| access.access_fault(address))?;
            }

            let ppn = (pte.ppn() & !mask) | ((address >> 12) & mask);
            let physical = (ppn * PAGE_SIZE) | (address & (PAGE_SIZE - 1));
            trace!(address, physical, level, "Translated");
            return Ok(physical);
        }

        // A pointer at the last level
        Err(access.page_fault(address))
    }

    /// Physical address of every byte of a misaligned access. All of them are
    /// translated before any is accessed.
    fn translate_bytes(
        &mut self,
        address: Address,
        width: Width,
        access: AccessType,
    ) -> Result<Vec<Address>, Exception> {
        (0..width.bytes())
            .map(|i| self.translate(address.wrapping_add(i), access))
            .collect()
    }

    /// Load from a virtual address. Misaligned loads are split in bytes.
    pub(crate) fn load(&mut self, address: Address, width: Width) -> Result<Word, Exception> {
        let fault = |_: AccessFault| Exception::LoadAccessFault(address);
        if address % width.bytes() == 0 {
            let physical = self.translate(address, AccessType::Load)?;
            return self.bus.read(physical, width).map_err(fault);
        }

        let mut value = 0;
        for (i, physical) in self
            .translate_bytes(address, width, AccessType::Load)?
            .into_iter()
            .enumerate()
        {
            value |= self.bus.read(physical, Width::Byte).map_err(fault)? << (8 * i);
        }
        Ok(value)
    }

    /// Store to a virtual address. Misaligned stores are split in bytes, and
    /// only go through once every byte is known to be backed.
    pub(crate) fn store(
        &mut self,
        address: Address,
        width: Width,
        value: Word,
    ) -> Result<(), Exception> {
        let fault = |_: AccessFault| Exception::StoreAccessFault(address);
        if address % width.bytes() == 0 {
            let physical = self.translate(address, AccessType::Store)?;
            return self.bus.write(physical, width, value).map_err(fault);
        }

        let bytes = self.translate_bytes(address, width, AccessType::Store)?;
        if let Some(&missing) = bytes.iter().find(|&&physical| !self.bus.contains(physical, 1)) {
            trace!(address, missing, "Misaligned store outside of the bus");
            return Err(Exception::StoreAccessFault(address));
        }

        for (i, physical) in bytes.into_iter().enumerate() {
            self.bus
                .write(physical, Width::Byte, (value >> (8 * i)) & 0xFF)
                .map_err(fault)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::tests::{computer, START};

    const ROOT: Address = START + 0x1_0000;
    const MIDDLE: Address = START + 0x1_1000;
    const LEAVES: Address = START + 0x1_2000;
    const DATA: Address = START + 0x2_0000;

    const fn pte(physical: Address, flags: Pte) -> Word {
        ((physical >> 12) << 10) | flags.bits()
    }

    fn leaf_flags() -> Pte {
        Pte::V | Pte::R | Pte::W | Pte::X
    }

    /// Maps 0x4000_0000 to `DATA` with `flags` through a 3-level walk, and
    /// identity-maps the RAM gigapage
    fn paged(flags: Pte) -> Computer {
        let mut computer = computer(&[]);
        let ram = &mut computer.bus.ram;
        ram.write(ROOT + 8, Width::Double, pte(MIDDLE, Pte::V)).unwrap();
        ram.write(ROOT + 2 * 8, Width::Double, pte(START, leaf_flags()))
            .unwrap();
        ram.write(MIDDLE, Width::Double, pte(LEAVES, Pte::V)).unwrap();
        ram.write(LEAVES, Width::Double, pte(DATA, flags)).unwrap();

        computer.csrs.satp = (8 << 60) | (ROOT >> 12);
        computer.privilege = Privilege::Supervisor;
        computer
    }

    #[test]
    fn bare_test() {
        let mut computer = computer(&[]);
        computer.privilege = Privilege::Supervisor;
        assert_eq!(computer.translate(0x1234, AccessType::Load), Ok(0x1234));

        // M-mode ignores satp
        let mut computer = paged(leaf_flags());
        computer.privilege = Privilege::Machine;
        assert_eq!(computer.translate(0x4000_0010, AccessType::Load), Ok(0x4000_0010));
    }

    #[test]
    fn walk_test() {
        let mut computer = paged(leaf_flags());
        assert_eq!(computer.translate(0x4000_0123, AccessType::Load), Ok(DATA + 0x123));

        // Gigapage
        assert_eq!(computer.translate(0x8012_3456, AccessType::Fetch), Ok(0x8012_3456));

        // Nothing mapped at the second megapage
        assert_eq!(
            computer.translate(0x4020_0000, AccessType::Store),
            Err(Exception::StorePageFault(0x4020_0000))
        );
    }

    #[test]
    fn accessed_dirty_test() {
        let mut computer = paged(leaf_flags());
        computer.translate(0x4000_0000, AccessType::Load).unwrap();
        let entry = computer.bus.ram.read(LEAVES, Width::Double).unwrap();
        assert_eq!(Pte::from_bits_truncate(entry), leaf_flags() | Pte::A);

        computer.translate(0x4000_0000, AccessType::Store).unwrap();
        let entry = computer.bus.ram.read(LEAVES, Width::Double).unwrap();
        assert_eq!(Pte::from_bits_truncate(entry), leaf_flags() | Pte::A | Pte::D);
    }

    #[test]
    fn inspect_translation_test() {
        let mut computer = paged(leaf_flags());
        assert_eq!(
            computer.inspect_translation(0x4000_0010, AccessType::Store),
            Ok(DATA + 0x10)
        );
        let entry = computer.bus.ram.read(LEAVES, Width::Double).unwrap();
        assert_eq!(Pte::from_bits_truncate(entry), leaf_flags());

        assert_eq!(
            computer.inspect_translation(0x4020_0000, AccessType::Load),
            Err(Exception::LoadPageFault(0x4020_0000))
        );
    }

    #[test]
    fn permissions_test() {
        let mut computer = paged(Pte::V | Pte::R);
        assert!(computer.translate(0x4000_0000, AccessType::Load).is_ok());
        assert_eq!(
            computer.translate(0x4000_0000, AccessType::Store),
            Err(Exception::StorePageFault(0x4000_0000))
        );
        assert_eq!(
            computer.translate(0x4000_0000, AccessType::Fetch),
            Err(Exception::InstructionPageFault(0x4000_0000))
        );

        // Execute-only pages are readable with MXR
        let mut computer = paged(Pte::V | Pte::X);
        assert!(computer.translate(0x4000_0000, AccessType::Load).is_err());
        computer.csrs.mstatus.insert(Mstatus::MXR);
        assert!(computer.translate(0x4000_0000, AccessType::Load).is_ok());

        // W without R is reserved
        let mut computer = paged(Pte::V | Pte::W);
        assert!(computer.translate(0x4000_0000, AccessType::Store).is_err());
    }

    #[test]
    fn user_pages_test() {
        let mut computer = paged(leaf_flags() | Pte::U);
        assert!(computer.translate(0x4000_0000, AccessType::Load).is_err());
        computer.csrs.mstatus.insert(Mstatus::SUM);
        assert!(computer.translate(0x4000_0000, AccessType::Load).is_ok());
        // Never executable from S-mode
        assert!(computer.translate(0x4000_0000, AccessType::Fetch).is_err());

        computer.privilege = Privilege::User;
        assert!(computer.translate(0x4000_0000, AccessType::Fetch).is_ok());
        // The gigapage is not a user page
        assert!(computer.translate(0x8000_0000, AccessType::Load).is_err());
    }

    #[test]
    fn mprv_test() {
        let mut computer = paged(leaf_flags());
        computer.privilege = Privilege::Machine;
        computer.csrs.mstatus.insert(Mstatus::MPRV);
        computer.csrs.mstatus.set_mpp(Privilege::Supervisor);

        assert_eq!(computer.translate(0x4000_0000, AccessType::Load), Ok(DATA));
        // Fetches are not affected
        assert_eq!(computer.translate(0x4000_0000, AccessType::Fetch), Ok(0x4000_0000));
    }

    #[test]
    fn non_canonical_test() {
        let mut computer = paged(leaf_flags());
        assert_eq!(
            computer.translate(0x0000_0080_0000_0000, AccessType::Load),
            Err(Exception::LoadPageFault(0x0000_0080_0000_0000))
        );
    }

    #[test]
    fn misaligned_superpage_test() {
        let mut computer = paged(leaf_flags());
        // A megapage leaf pointing at a page that is not 2 MiB aligned
        computer
            .bus
            .ram
            .write(MIDDLE, Width::Double, pte(DATA, leaf_flags()))
            .unwrap();
        assert_eq!(
            computer.translate(0x4000_0000, AccessType::Load),
            Err(Exception::LoadPageFault(0x4000_0000))
        );
    }

    #[test]
    fn misaligned_access_test() {
        let mut computer = paged(leaf_flags());
        computer.store(0x4000_0003, Width::Word, 0xDEAD_BEEF).unwrap();
        assert_eq!(computer.bus.ram.read(DATA + 3, Width::Word), Ok(0xDEAD_BEEF));
        assert_eq!(computer.load(0x4000_0003, Width::Word), Ok(0xDEAD_BEEF));
        assert_eq!(computer.load(0x4000_0004, Width::Half), Ok(0xADBE));

        // Crossing into an unmapped page faults before anything is written
        assert_eq!(
            computer.store(0x4000_0FFE, Width::Word, 0),
            Err(Exception::StorePageFault(0x4000_1000))
        );
        assert_eq!(computer.bus.ram.read(DATA + 0xFFE, Width::Half), Ok(0));
    }

    #[test]
    fn misaligned_store_past_ram_test() {
        let mut computer = computer(&[]);
        let end = START + computer.bus.ram.size();

        // The last 4 bytes are in RAM, the next 4 are not
        assert_eq!(
            computer.store(end - 4, Width::Double, u64::MAX),
            Err(Exception::StoreAccessFault(end - 4))
        );
        assert_eq!(computer.bus.ram.read(end - 4, Width::Word), Ok(0));

        // Loads fault the same way
        assert_eq!(
            computer.load(end - 2, Width::Word),
            Err(Exception::LoadAccessFault(end - 2))
        );
    }
}
