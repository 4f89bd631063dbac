//! KT11 memory management unit: 16-bit virtual to 18-bit physical translation.
//!
//! Two independent 8-entry page-table sets (kernel and user), each entry a
//! page address register (PAR) paired with a page descriptor register (PDR).
//! Translation enforces page length, residency, and write protection, and
//! latches the first faulting context into MMR0 so guest trap handlers can
//! read back exactly which access aborted.
//!
//! The register file is an ordinary set of bus registers at the original
//! hardware addresses; guest software programs the MMU through normal bus
//! writes. The [`Kt11`] value is itself a [`BusDevice`] and is wired onto the
//! bus with [`register_kt11`].
#![forbid(unsafe_code)]

mod psw;


use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use qbus::{Bus, BusDevice, Registration, Result, Trap};

pub use psw::{AccessMode, ModeSource, Psw};

// Register addresses in the I/O page. All sizes in words.
const KT_MMR: u32 = 0o777572;
const KT_MMR_SIZE: u32 = 3;
const KT_MMR0: u32 = 0o777572;
const KT_MMR1: u32 = 0o777574;
const KT_MMR2: u32 = 0o777576;
const KT_KISD: u32 = 0o772300;
const KT_KISA: u32 = 0o772340;
const KT_UISD: u32 = 0o777600;
const KT_UISA: u32 = 0o777640;
const KT_PAGE_REGS: u32 = 8;

/// MMR0 bit 0: translation enabled.
pub const MMR0_ENABLE: u16 = 0o1;
/// MMR0 abort: non-resident page (or unimplemented mode).
pub const MMR0_ABORT_NONRESIDENT: u16 = 0o100000;
/// MMR0 abort: page-length violation.
pub const MMR0_ABORT_LENGTH: u16 = 0o40000;
/// MMR0 abort: write to a read-only page.
pub const MMR0_ABORT_READONLY: u16 = 0o20000;
/// Any abort bit set means a fault context is latched.
pub const MMR0_ABORT_MASK: u16 = 0o160000;
/// Mode field value latched for user-mode faults.
const MMR0_MODE_USER: u16 = 0o140;
/// Mode and page-index fields, cleared before latching a new context.
const MMR0_CONTEXT_MASK: u16 = 0o156;
/// Software-writable MMR0 bits. Overlaps the abort bits: a guest write can
/// set or clear fault status. Replicated from the hardware bit-for-bit.
const MMR0_WRITE_MASK: u16 = 0o160157;

/// PDR bit 1: page is resident.
pub const PDR_RESIDENT: u16 = 0o2;
/// PDR bit 2: page is writable.
pub const PDR_WRITABLE: u16 = 0o4;
/// PDR bit 3: page expands downward.
pub const PDR_EXPAND_DOWN: u16 = 0o10;
/// PDR bit 6: page has been written (hardware-maintained).
pub const PDR_WRITTEN: u16 = 0o100;
/// Software-writable PDR bits.
const PDR_WRITE_MASK: u16 = 0o77416;
/// Bits cleared before a PDR write: the writable field plus the written bit.
const PDR_CLEAR_MASK: u16 = 0o77516;
/// PARs are 12 bits.
const PAR_MASK: u16 = 0o7777;

/// Virtual addresses at or above this relocate to the I/O page when
/// translation is off.
const IOPAGE_VIRT: u32 = 0o160000;
/// Relocation distance landing the 16-bit I/O page at the top of the 18-bit
/// space.
const IOPAGE_RELOCATION: u32 = 0o600000;
/// In-page offset: 128-word block number plus word offset.
const PAGE_OFFSET_MASK: u16 = 0o17777;

struct RegisterFile {
    mmr0: u16,
    mmr2: u16,
    kisd: [u16; 8],
    kisa: [u16; 8],
    uisd: [u16; 8],
    uisa: [u16; 8],
}

impl RegisterFile {
    fn new() -> Self {
        Self {
            mmr0: 0,
            mmr2: 0,
            kisd: [0; 8],
            kisa: [0; 8],
            uisd: [0; 8],
            uisa: [0; 8],
        }
    }

    /// Latches an abort context, unless one is already latched. First fault
    /// wins: the guest's trap handler must be able to read back the original
    /// faulting access even if the handler itself faults again first.
    fn latch(&mut self, abort_bits: u16, mode_field: u16, index: u16) {
        if self.mmr0 & MMR0_ABORT_MASK == 0 {
            self.mmr0 &= !MMR0_CONTEXT_MASK;
            self.mmr0 |= abort_bits | mode_field | (index << 1);
            debug!(
                mmr0 = format_args!("{:#o}", self.mmr0),
                "memory management fault latched"
            );
        }
    }

    fn map(
        &mut self,
        vaddr: u16,
        is_write: bool,
        force_kernel: bool,
        force_previous: bool,
        psw: &dyn ModeSource,
    ) -> Result<u32> {
        // Translation off: physical = virtual, except the top 8 Kwords
        // relocate to the I/O page at the top of the 18-bit space.
        if self.mmr0 & MMR0_ENABLE == 0 {
            let mut addr = u32::from(vaddr);
            if addr >= IOPAGE_VIRT {
                addr += IOPAGE_RELOCATION;
            }
            return Ok(addr);
        }

        let index = (vaddr >> 13) & 0o7;
        let block = (vaddr >> 6) & 0o177;

        let raw_mode = if force_kernel {
            0
        } else if force_previous {
            psw.previous_mode()
        } else {
            psw.current_mode()
        };

        let user = match AccessMode::from_raw(raw_mode) {
            Some(AccessMode::Kernel) => false,
            Some(AccessMode::User) => true,
            None => {
                // Supervisor modes are unimplemented in this MMU.
                self.latch(MMR0_ABORT_NONRESIDENT, raw_mode << 5, index);
                return Err(Trap::SegmentationError);
            }
        };

        let i = usize::from(index);
        let (par, pdr) = if user {
            (self.uisa[i], self.uisd[i])
        } else {
            (self.kisa[i], self.kisd[i])
        };
        let mode_field = if user { MMR0_MODE_USER } else { 0 };

        // Length check. Downward-expanding pages fault below the boundary,
        // upward-expanding pages fault above it; `block == length` is legal
        // in both directions. Preserved exactly as the hardware computes it.
        let length = (pdr >> 8) & 0o177;
        let out_of_bounds = if pdr & PDR_EXPAND_DOWN != 0 {
            block < length
        } else {
            block > length
        };
        if out_of_bounds {
            let mut abort = MMR0_ABORT_LENGTH;
            if pdr & PDR_RESIDENT == 0 {
                abort |= MMR0_ABORT_NONRESIDENT;
            }
            if is_write && pdr & PDR_WRITABLE == 0 {
                abort |= MMR0_ABORT_READONLY;
            }
            self.latch(abort, mode_field, index);
            return Err(Trap::SegmentationError);
        }

        if pdr & PDR_RESIDENT == 0 {
            let mut abort = MMR0_ABORT_NONRESIDENT;
            if is_write && pdr & PDR_WRITABLE == 0 {
                abort |= MMR0_ABORT_READONLY;
            }
            self.latch(abort, mode_field, index);
            return Err(Trap::SegmentationError);
        }

        if is_write {
            if pdr & PDR_WRITABLE == 0 {
                self.latch(MMR0_ABORT_READONLY, mode_field, index);
                return Err(Trap::SegmentationError);
            }
            if user {
                self.uisd[i] |= PDR_WRITTEN;
            } else {
                self.kisd[i] |= PDR_WRITTEN;
            }
        }

        // Not masked to 18 bits: an out-of-range PAR produces an address no
        // device claims, and the access times out at dispatch.
        let paddr = (u32::from(par) << 6) + u32::from(vaddr & PAGE_OFFSET_MASK);
        trace!(
            vaddr = format_args!("{vaddr:#o}"),
            paddr = format_args!("{paddr:#o}"),
            "translated"
        );
        Ok(paddr)
    }
}

/// The KT11 MMU.
///
/// Shared between the CPU loop (logical accesses) and the bus (register
/// reads/writes from guest software); the register file sits behind its own
/// mutex.
pub struct Kt11 {
    regs: Mutex<RegisterFile>,
}

impl Default for Kt11 {
    fn default() -> Self {
        Self::new()
    }
}

impl Kt11 {
    pub fn new() -> Self {
        Self {
            regs: Mutex::new(RegisterFile::new()),
        }
    }

    fn regs(&self) -> MutexGuard<'_, RegisterFile> {
        self.regs.lock().expect("kt11 register file poisoned")
    }

    /// Current MMR0 contents (fault status and enable bit).
    pub fn mmr0(&self) -> u16 {
        self.regs().mmr0
    }

    /// Current MMR2 contents (virtual address of the faulting instruction).
    pub fn mmr2(&self) -> u16 {
        self.regs().mmr2
    }

    /// Called by the CPU at each instruction fetch. MMR2 tracks the fetch
    /// address while no fault is latched, so after an abort it holds the
    /// address of the faulting instruction.
    pub fn mmr2_update(&self, vaddr: u16) {
        let mut regs = self.regs();
        if regs.mmr0 & MMR0_ABORT_MASK == 0 {
            regs.mmr2 = vaddr;
        }
    }

    /// Translates a virtual address to a physical bus address.
    ///
    /// The mode is the PSW's current mode unless `force_kernel` or
    /// `force_previous` overrides it (trap delivery uses both). A write
    /// access sets the page's written bit on success. Every abort latches a
    /// diagnostic in MMR0 (first fault wins) and returns
    /// [`Trap::SegmentationError`].
    pub fn map(
        &self,
        vaddr: u16,
        is_write: bool,
        force_kernel: bool,
        force_previous: bool,
        psw: &dyn ModeSource,
    ) -> Result<u32> {
        self.regs()
            .map(vaddr, is_write, force_kernel, force_previous, psw)
    }

    /// Word read at a logical address in the current mode.
    pub fn logical_read(&self, bus: &Bus, psw: &dyn ModeSource, vaddr: u16) -> Result<u16> {
        if vaddr & 1 != 0 {
            return Err(Trap::OddAddress(vaddr));
        }
        bus.read(self.map(vaddr, false, false, false, psw)?)
    }

    /// Word write at a logical address in the current mode.
    pub fn logical_write(
        &self,
        bus: &Bus,
        psw: &dyn ModeSource,
        vaddr: u16,
        value: u16,
    ) -> Result<()> {
        if vaddr & 1 != 0 {
            return Err(Trap::OddAddress(vaddr));
        }
        bus.write(self.map(vaddr, true, false, false, psw)?, value)
    }

    /// Byte read at a logical address in the current mode.
    ///
    /// Translates the aligned containing word and picks the byte out of the
    /// word read; odd addresses are legal and select the high byte.
    pub fn logical_read_byte(&self, bus: &Bus, psw: &dyn ModeSource, vaddr: u16) -> Result<u8> {
        let word = bus.read(self.map(vaddr & !1, false, false, false, psw)?)?;
        if vaddr & 1 == 0 {
            Ok(word as u8)
        } else {
            Ok((word >> 8) as u8)
        }
    }

    /// Byte write at a logical address in the current mode.
    ///
    /// Translates the raw (possibly odd) address and issues a bus byte
    /// write; the claiming device splices the byte into the containing word.
    pub fn logical_write_byte(
        &self,
        bus: &Bus,
        psw: &dyn ModeSource,
        vaddr: u16,
        value: u8,
    ) -> Result<()> {
        bus.write_byte(self.map(vaddr, true, false, false, psw)?, value)
    }

    /// Word read in the PSW's previous mode; used by MFPI-style operations
    /// and trap delivery.
    pub fn logical_read_previous(
        &self,
        bus: &Bus,
        psw: &dyn ModeSource,
        vaddr: u16,
    ) -> Result<u16> {
        if vaddr & 1 != 0 {
            return Err(Trap::OddAddress(vaddr));
        }
        bus.read(self.map(vaddr, false, false, true, psw)?)
    }

    /// Word write in the PSW's previous mode.
    pub fn logical_write_previous(
        &self,
        bus: &Bus,
        psw: &dyn ModeSource,
        vaddr: u16,
        value: u16,
    ) -> Result<()> {
        if vaddr & 1 != 0 {
            return Err(Trap::OddAddress(vaddr));
        }
        bus.write(self.map(vaddr, true, false, true, psw)?, value)
    }

    /// Word read forced through the kernel page table, regardless of the
    /// PSW; trap delivery fetches vectors this way.
    pub fn logical_read_kernel(&self, bus: &Bus, psw: &dyn ModeSource, vaddr: u16) -> Result<u16> {
        if vaddr & 1 != 0 {
            return Err(Trap::OddAddress(vaddr));
        }
        bus.read(self.map(vaddr, false, true, false, psw)?)
    }

    /// Word write forced through the kernel page table; trap delivery pushes
    /// onto the kernel stack this way.
    pub fn logical_write_kernel(
        &self,
        bus: &Bus,
        psw: &dyn ModeSource,
        vaddr: u16,
        value: u16,
    ) -> Result<()> {
        if vaddr & 1 != 0 {
            return Err(Trap::OddAddress(vaddr));
        }
        bus.write(self.map(vaddr, true, true, false, psw)?, value)
    }
}

impl BusDevice for Kt11 {
    /// Clears MMR0 only: translation off, latch cleared. Page tables and
    /// MMR2 keep their contents, as on the hardware.
    fn reset(&self) {
        self.regs().mmr0 = 0;
    }

    fn read(&self, addr: u32) -> Result<u16> {
        let regs = self.regs();
        let i = ((addr & 0o16) >> 1) as usize;
        match addr & 0o777760 {
            KT_KISD => Ok(regs.kisd[i]),
            KT_KISA => Ok(regs.kisa[i]),
            KT_UISD => Ok(regs.uisd[i]),
            KT_UISA => Ok(regs.uisa[i]),
            _ => match addr {
                KT_MMR0 => Ok(regs.mmr0),
                KT_MMR1 => Ok(0),
                KT_MMR2 => Ok(regs.mmr2),
                _ => Err(Trap::BusTimeout(addr)),
            },
        }
    }

    fn write(&self, addr: u32, value: u16) -> Result<()> {
        let mut regs = self.regs();
        let i = ((addr & 0o16) >> 1) as usize;
        match addr & 0o777760 {
            // Descriptor writes mask off the hardware-maintained bits and
            // always clear the written bit; guest software cannot forge it.
            KT_KISD => {
                regs.kisd[i] &= !PDR_CLEAR_MASK;
                regs.kisd[i] |= value & PDR_WRITE_MASK;
                Ok(())
            }
            // A freshly installed mapping is assumed clean.
            KT_KISA => {
                regs.kisa[i] = value & PAR_MASK;
                regs.kisd[i] &= !PDR_WRITTEN;
                Ok(())
            }
            KT_UISD => {
                regs.uisd[i] &= !PDR_CLEAR_MASK;
                regs.uisd[i] |= value & PDR_WRITE_MASK;
                Ok(())
            }
            KT_UISA => {
                regs.uisa[i] = value & PAR_MASK;
                regs.uisd[i] &= !PDR_WRITTEN;
                Ok(())
            }
            _ => match addr {
                // The writable mask overlaps the abort bits, so a guest
                // write can clear (or set) latched fault status.
                KT_MMR0 => {
                    regs.mmr0 &= !MMR0_WRITE_MASK;
                    regs.mmr0 |= value & MMR0_WRITE_MASK;
                    Ok(())
                }
                // Writes accepted and discarded, matching the hardware.
                KT_MMR1 | KT_MMR2 => Ok(()),
                _ => Err(Trap::BusTimeout(addr)),
            },
        }
    }

    /// Read-modify-write on the containing word.
    fn write_byte(&self, addr: u32, value: u8) -> Result<()> {
        let aligned = addr & !1;
        let mut word = self.read(aligned)?;
        if addr & 1 == 0 {
            word = (word & 0xff00) | u16::from(value);
        } else {
            word = (word & 0x00ff) | (u16::from(value) << 8);
        }
        self.write(aligned, word)
    }
}

/// Registers the MMU's five register ranges on the bus.
pub fn register_kt11(bus: &Bus, kt11: &Arc<Kt11>) {
    let dev: qbus::SharedDevice = kt11.clone();
    bus.register_device(Registration::new(dev.clone(), KT_MMR, KT_MMR_SIZE, "MMR"), false);
    bus.register_device(
        Registration::new(dev.clone(), KT_KISD, KT_PAGE_REGS, "KISD"),
        false,
    );
    bus.register_device(
        Registration::new(dev.clone(), KT_KISA, KT_PAGE_REGS, "KISA"),
        false,
    );
    bus.register_device(
        Registration::new(dev.clone(), KT_UISD, KT_PAGE_REGS, "UISD"),
        false,
    );
    bus.register_device(Registration::new(dev, KT_UISA, KT_PAGE_REGS, "UISA"), false);
}
