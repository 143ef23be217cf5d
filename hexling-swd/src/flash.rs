// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Target flash driver
//!
//! Drives the family-specific flash controller over the SWD memory bus:
//! unlock, erase, program, verify, lock.  The controller lifecycle is
//! tracked explicitly:
//!
//! ```text
//! Locked --unlock--> Unlocked --erase/program--> Unlocked --lock--> Locked
//!                       |                            |
//!                       +------- any error ----------+--> Failed
//! ```
//!
//! Every erase or program trigger is followed by a bounded busy-poll of the
//! status register; any error flag fails the operation and the session.
//! The driver never writes flash cells directly - the controller does - so
//! all accesses here go to the register bank selected at identification
//! time.

use alloc::format;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hexling_core::flash::{FlashBank, ProgramUnit, Stm32F4FlashCr, Stm32F1FlashCr};

use crate::SwdError;
use crate::interface::SwdInterface;
use crate::pins::PinDriver;

// Words verified per bulk readback
const VERIFY_CHUNK_WORDS: usize = 128;

/// Flash controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// Controller locked; only `unlock()` is accepted
    Locked,

    /// Controller unlocked; erase and program are accepted
    Unlocked,

    /// A flash operation failed; the target's flash contents are suspect
    Failed,
}

/// Driver for the target's flash controller
///
/// Borrows the SWD interface for the duration of the flash phase of a
/// session.  Constructed after target identification with the family's
/// [`FlashBank`]; the bank is immutable thereafter.
#[derive(Debug)]
pub struct TargetFlash<'a, P: PinDriver> {
    swd: &'a mut SwdInterface<P>,
    bank: FlashBank,
    state: FlashState,
}

impl<'a, P: PinDriver> TargetFlash<'a, P> {
    /// Creates a driver for the given family bank.  The controller is
    /// assumed locked, which is its reset state.
    pub fn new(swd: &'a mut SwdInterface<P>, bank: FlashBank) -> Self {
        Self {
            swd,
            bank,
            state: FlashState::Locked,
        }
    }

    /// The current lifecycle state
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// The family bank this driver operates on
    pub fn bank(&self) -> FlashBank {
        self.bank
    }

    /// Unlocks the flash controller by writing the key sequence to KEYR.
    ///
    /// The controller is verified unlocked by reading CR.LOCK back; a
    /// refused unlock (for example on a write-protected part) fails the
    /// session.
    pub fn unlock(&mut self) -> Result<(), SwdError> {
        debug!("Exec:  Unlock {} controller", self.bank.as_str());
        let regs = self.bank.regs();

        let (key1, key2) = match self.bank {
            FlashBank::F0 | FlashBank::F1 => (
                hexling_core::flash::Stm32F1FlashKeyr::KEY1,
                hexling_core::flash::Stm32F1FlashKeyr::KEY2,
            ),
            FlashBank::F4 => (
                hexling_core::flash::Stm32F4FlashKeyr::KEY1,
                hexling_core::flash::Stm32F4FlashKeyr::KEY2,
            ),
        };

        self.swd.write_word(regs.keyr, key1)?;
        self.swd.write_word(regs.keyr, key2)?;

        let cr = self.swd.read_word(regs.cr)?;
        if (cr >> self.bank.cr_lock_bit()) & 1 != 0 {
            warn!("Flash unlock refused, CR=0x{cr:08X}");
            self.state = FlashState::Failed;
            return Err(SwdError::OperationFailed("flash unlock refused".into()));
        }

        self.state = FlashState::Unlocked;
        Ok(())
    }

    /// Re-locks the flash controller by setting CR.LOCK.
    ///
    /// Accepted in any state - it is the best-effort cleanup on the failure
    /// path as well as the normal end of a session.
    pub fn lock(&mut self) -> Result<(), SwdError> {
        debug!("Exec:  Lock {} controller", self.bank.as_str());
        let regs = self.bank.regs();

        let cr = self.swd.read_word(regs.cr)?;
        self.swd
            .write_word(regs.cr, cr | (1 << self.bank.cr_lock_bit()))?;

        if self.state != FlashState::Failed {
            self.state = FlashState::Locked;
        }
        Ok(())
    }

    /// Erases the entire flash array (mass erase).
    ///
    /// This is the default erase policy before programming: one erase for
    /// the whole image, leaving every cell at 0xFF.
    pub fn erase_all(&mut self) -> Result<(), SwdError> {
        self.require_unlocked()?;
        debug!("Exec:  Mass erase ({})", self.bank.as_str());

        let regs = self.bank.regs();
        self.clear_status()?;

        let cr = match self.bank {
            FlashBank::F0 | FlashBank::F1 => 1 << Stm32F1FlashCr::MER_BIT,
            FlashBank::F4 => {
                (1 << Stm32F4FlashCr::MER_BIT)
                    | (Stm32F4FlashCr::PSIZE_X32 << Stm32F4FlashCr::PSIZE_SHIFT)
            }
        };
        let strt = match self.bank {
            FlashBank::F0 | FlashBank::F1 => 1 << Stm32F1FlashCr::STRT_BIT,
            FlashBank::F4 => 1 << Stm32F4FlashCr::STRT_BIT,
        };

        self.swd.write_word(regs.cr, cr)?;
        self.swd.write_word(regs.cr, cr | strt)?;

        self.wait_not_busy(self.bank.erase_timeout_ms())
            .inspect_err(|e| warn!("Mass erase failed: {e}"))?;

        // Clear the erase mode bits again
        self.swd.write_word(regs.cr, 0)?;

        debug!("OK:    Mass erase");
        Ok(())
    }

    /// Erases only the pages (or sectors, on the F4) covering the given
    /// address range.
    ///
    /// Alternative to [`Self::erase_all()`] when the image footprint is
    /// known and small.
    pub fn erase_range(&mut self, addr: u32, len: u32) -> Result<(), SwdError> {
        self.require_unlocked()?;
        if len == 0 {
            return Ok(());
        }
        debug!("Exec:  Erase 0x{addr:08X}..+0x{len:X} ({})", self.bank.as_str());

        self.clear_status()?;

        match self.bank {
            FlashBank::F0 | FlashBank::F1 => self.erase_pages_f1(addr, len),
            FlashBank::F4 => self.erase_sectors_f4(addr, len),
        }
    }

    fn erase_pages_f1(&mut self, addr: u32, len: u32) -> Result<(), SwdError> {
        let regs = self.bank.regs();
        let page_size = match self.bank.page_size() {
            Some(size) => size,
            None => return Err(SwdError::OperationFailed("no page table".into())),
        };
        let ar = match regs.ar {
            Some(ar) => ar,
            None => return Err(SwdError::OperationFailed("no page address register".into())),
        };

        let first = addr & !(page_size - 1);
        let last = (addr + len - 1) & !(page_size - 1);

        let mut page = first;
        loop {
            trace!("Exec:  Erase page 0x{page:08X}");
            self.swd.write_word(regs.cr, 1 << Stm32F1FlashCr::PER_BIT)?;
            self.swd.write_word(ar, page)?;
            self.swd.write_word(
                regs.cr,
                (1 << Stm32F1FlashCr::PER_BIT) | (1 << Stm32F1FlashCr::STRT_BIT),
            )?;

            self.wait_not_busy(self.bank.erase_timeout_ms())?;

            if page == last {
                break;
            }
            page += page_size;
        }

        self.swd.write_word(regs.cr, 0)?;
        Ok(())
    }

    fn erase_sectors_f4(&mut self, addr: u32, len: u32) -> Result<(), SwdError> {
        let regs = self.bank.regs();
        let flash_base = hexling_core::flash::FLASH_BASE;
        let end = addr + len;

        let mut sector_base = flash_base;
        for (snb, &size) in FlashBank::F4_SECTOR_SIZES.iter().enumerate() {
            let sector_end = sector_base + size;
            if sector_base < end && addr < sector_end {
                trace!("Exec:  Erase sector {snb} at 0x{sector_base:08X}");
                let cr = (1 << Stm32F4FlashCr::SER_BIT)
                    | ((snb as u32) << Stm32F4FlashCr::SNB_SHIFT)
                    | (Stm32F4FlashCr::PSIZE_X32 << Stm32F4FlashCr::PSIZE_SHIFT);
                self.swd.write_word(regs.cr, cr)?;
                self.swd
                    .write_word(regs.cr, cr | (1 << Stm32F4FlashCr::STRT_BIT))?;

                self.wait_not_busy(self.bank.erase_timeout_ms())?;
            }
            sector_base = sector_end;
        }

        self.swd.write_word(regs.cr, 0)?;
        Ok(())
    }

    /// Programs a block of bytes at the given address.
    ///
    /// The address must be aligned to the family's programming granularity;
    /// a trailing partial unit is padded with 0xFF, the erased value.  The
    /// region must have been erased first.
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        self.require_unlocked()?;
        if data.is_empty() {
            return Ok(());
        }
        trace!("Exec:  Program 0x{addr:08X} +{}", data.len());

        let regs = self.bank.regs();
        self.clear_status()?;

        let result = match self.bank.program_unit() {
            ProgramUnit::HalfWord => self.program_halfwords(addr, data),
            ProgramUnit::Word => self.program_words(addr, data),
        };

        // Always drop the PG bit again, even on failure
        let cr_clear = self.swd.write_word(regs.cr, 0);

        result.and(cr_clear).inspect_err(|_| {
            self.state = FlashState::Failed;
        })
    }

    fn program_halfwords(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        if addr & 1 != 0 {
            return Err(SwdError::OperationFailed(format!(
                "program address 0x{addr:08X} not half-word aligned"
            )));
        }

        let regs = self.bank.regs();
        self.swd.write_word(regs.cr, 1 << Stm32F1FlashCr::PG_BIT)?;

        for (ii, chunk) in data.chunks(2).enumerate() {
            let half = u16::from_le_bytes([chunk[0], *chunk.get(1).unwrap_or(&0xFF)]);
            let target = addr + (ii as u32 * 2);

            self.swd.write_halfword(target, half)?;
            self.wait_not_busy(self.bank.program_timeout_ms())?;
        }

        Ok(())
    }

    fn program_words(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        if addr & 3 != 0 {
            return Err(SwdError::OperationFailed(format!(
                "program address 0x{addr:08X} not word aligned"
            )));
        }

        let regs = self.bank.regs();
        let cr = (1 << Stm32F4FlashCr::PG_BIT)
            | (Stm32F4FlashCr::PSIZE_X32 << Stm32F4FlashCr::PSIZE_SHIFT);
        self.swd.write_word(regs.cr, cr)?;

        for (ii, chunk) in data.chunks(4).enumerate() {
            let mut bytes = [0xFFu8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            let target = addr + (ii as u32 * 4);

            self.swd.write_word(target, u32::from_le_bytes(bytes))?;
            self.wait_not_busy(self.bank.program_timeout_ms())?;
        }

        Ok(())
    }

    /// Verifies a block of bytes against the flash contents by reading the
    /// region back over the memory bus and comparing byte for byte.
    ///
    /// A mismatch is a hard failure: the programmed target must be
    /// considered corrupt.
    pub fn verify(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        if addr & 3 != 0 {
            return Err(SwdError::OperationFailed(format!(
                "verify address 0x{addr:08X} not word aligned"
            )));
        }
        trace!("Exec:  Verify 0x{addr:08X} +{}", data.len());

        let mut words = [0u32; VERIFY_CHUNK_WORDS];
        let mut offset = 0usize;

        while offset < data.len() {
            let remaining = &data[offset..];
            let chunk_words = remaining.len().div_ceil(4).min(VERIFY_CHUNK_WORDS);
            let chunk = &mut words[..chunk_words];

            self.swd.read_words(addr + offset as u32, chunk)?;

            for (ii, &word) in chunk.iter().enumerate() {
                let bytes = word.to_le_bytes();
                let base = ii * 4;
                for (jj, &byte) in bytes.iter().enumerate() {
                    let Some(&expected) = remaining.get(base + jj) else {
                        break;
                    };
                    if byte != expected {
                        let at = addr + (offset + base + jj) as u32;
                        warn!("Verify mismatch at 0x{at:08X}: wrote 0x{expected:02X}, read 0x{byte:02X}");
                        self.state = FlashState::Failed;
                        return Err(SwdError::OperationFailed(format!(
                            "verify mismatch at 0x{at:08X}"
                        )));
                    }
                }
            }

            offset += chunk_words * 4;
        }

        Ok(())
    }

    fn require_unlocked(&self) -> Result<(), SwdError> {
        match self.state {
            FlashState::Unlocked => Ok(()),
            _ => Err(SwdError::NotReady),
        }
    }

    // W1C-clear the status flags so stale EOP/error bits don't confuse the
    // next poll
    fn clear_status(&mut self) -> Result<(), SwdError> {
        let regs = self.bank.regs();
        self.swd.write_word(regs.sr, self.bank.sr_clear_mask())
    }

    // Polls SR until the controller goes idle, the controller flags an
    // error, or the bound expires.  One millisecond per poll.
    fn wait_not_busy(&mut self, timeout_ms: u32) -> Result<(), SwdError> {
        let regs = self.bank.regs();

        for _ in 0..=timeout_ms {
            let sr = self.swd.read_word(regs.sr)?;

            if self.bank.sr_errors(sr) {
                warn!("Flash operation error, SR=0x{sr:08X}");
                self.state = FlashState::Failed;
                return Err(SwdError::OperationFailed(format!(
                    "flash operation failed, sr=0x{sr:08X}"
                )));
            }
            if !self.bank.sr_busy(sr) {
                return Ok(());
            }

            self.swd.delay_ms(1);
        }

        warn!("Flash operation timed out after {timeout_ms}ms");
        self.state = FlashState::Failed;
        Err(SwdError::Timeout)
    }
}
