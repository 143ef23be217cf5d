// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! STM32 flash-controller register banks
//!
//! Each supported family exposes the same lifecycle - unlock via KEYR, erase
//! and program via CR, status via SR - but the register addresses and bit
//! layouts differ.  [`FlashBank`] selects the family-specific bank once after
//! target identification; it is immutable for the rest of the session.
//!
//! The F0 and F1 controllers share a register layout (at the same bus
//! address); the F4 controller is a different design with sector rather than
//! page granularity, and a selectable parallelism (PSIZE).

use core::fmt;

const STM32F1_FLASH_REG_BASE: u32 = 0x4002_2000;
const STM32F4_FLASH_REG_BASE: u32 = 0x4002_3C00;

/// Base of the flash memory itself on all supported families
pub const FLASH_BASE: u32 = 0x0800_0000;

/// STM32F0/F1 FLASH_KEYR register
pub struct Stm32F1FlashKeyr;

impl Stm32F1FlashKeyr {
    pub const ADDRESS: u32 = STM32F1_FLASH_REG_BASE + 0x04;

    pub const KEY1: u32 = 0x4567_0123;
    pub const KEY2: u32 = 0xCDEF_89AB;
}

/// STM32F0/F1 FLASH_SR register
pub struct Stm32F1FlashSr(u32);

impl Stm32F1FlashSr {
    pub const ADDRESS: u32 = STM32F1_FLASH_REG_BASE + 0x0C;

    pub const BSY_BIT: u32 = 0;
    pub const PGERR_BIT: u32 = 2;
    pub const WRPRTERR_BIT: u32 = 4;
    pub const EOP_BIT: u32 = 5;

    /// Mask of the write-1-to-clear flags
    pub const CLEAR_MASK: u32 =
        (1 << Self::PGERR_BIT) | (1 << Self::WRPRTERR_BIT) | (1 << Self::EOP_BIT);

    /// Whether a flash operation is in progress
    pub fn busy(&self) -> bool {
        (self.0 >> Self::BSY_BIT) & 1 != 0
    }

    /// Whether any error flag is set
    pub fn errors(&self) -> bool {
        self.0 & ((1 << Self::PGERR_BIT) | (1 << Self::WRPRTERR_BIT)) != 0
    }
}

impl From<u32> for Stm32F1FlashSr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Stm32F1FlashSr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// STM32F0/F1 FLASH_CR register
pub struct Stm32F1FlashCr;

impl Stm32F1FlashCr {
    pub const ADDRESS: u32 = STM32F1_FLASH_REG_BASE + 0x10;

    pub const PG_BIT: u32 = 0;
    pub const PER_BIT: u32 = 1;
    pub const MER_BIT: u32 = 2;
    pub const STRT_BIT: u32 = 6;
    pub const LOCK_BIT: u32 = 7;
}

/// STM32F0/F1 FLASH_AR register
///
/// Takes the target page address for a page erase.  Only writable while no
/// operation is in progress.
pub struct Stm32F1FlashAr;

impl Stm32F1FlashAr {
    pub const ADDRESS: u32 = STM32F1_FLASH_REG_BASE + 0x14;
}

/// STM32F4 FLASH_KEYR register
pub struct Stm32F4FlashKeyr;

impl Stm32F4FlashKeyr {
    pub const ADDRESS: u32 = STM32F4_FLASH_REG_BASE + 0x04;

    pub const KEY1: u32 = 0x4567_0123;
    pub const KEY2: u32 = 0xCDEF_89AB;
}

/// STM32F4 FLASH_SR register
pub struct Stm32F4FlashSr(u32);

impl Stm32F4FlashSr {
    pub const ADDRESS: u32 = STM32F4_FLASH_REG_BASE + 0x0C;

    pub const EOP_BIT: u32 = 0;
    pub const OPERR_BIT: u32 = 1;
    pub const WRPERR_BIT: u32 = 4;
    pub const PGAERR_BIT: u32 = 5;
    pub const PGPERR_BIT: u32 = 6;
    pub const PGSERR_BIT: u32 = 7;
    pub const RDERR_BIT: u32 = 8;
    pub const BSY_BIT: u32 = 16;

    const ERROR_MASK: u32 = (1 << Self::OPERR_BIT)
        | (1 << Self::WRPERR_BIT)
        | (1 << Self::PGAERR_BIT)
        | (1 << Self::PGPERR_BIT)
        | (1 << Self::PGSERR_BIT)
        | (1 << Self::RDERR_BIT);

    /// Mask of the write-1-to-clear flags
    pub const CLEAR_MASK: u32 = Self::ERROR_MASK | (1 << Self::EOP_BIT);

    /// Whether a flash operation is in progress
    pub fn busy(&self) -> bool {
        (self.0 >> Self::BSY_BIT) & 1 != 0
    }

    /// Whether any error flag is set
    pub fn errors(&self) -> bool {
        self.0 & Self::ERROR_MASK != 0
    }
}

impl From<u32> for Stm32F4FlashSr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Stm32F4FlashSr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// STM32F4 FLASH_CR register
pub struct Stm32F4FlashCr;

impl Stm32F4FlashCr {
    pub const ADDRESS: u32 = STM32F4_FLASH_REG_BASE + 0x10;

    pub const PG_BIT: u32 = 0;
    pub const SER_BIT: u32 = 1;
    pub const MER_BIT: u32 = 2;
    pub const STRT_BIT: u32 = 16;
    pub const LOCK_BIT: u32 = 31;

    pub const SNB_SHIFT: u32 = 3;
    pub const SNB_MASK: u32 = 0b1111;

    pub const PSIZE_SHIFT: u32 = 8;
    pub const PSIZE_MASK: u32 = 0b11;

    pub const PSIZE_X8: u32 = 0b00;
    pub const PSIZE_X16: u32 = 0b01;
    pub const PSIZE_X32: u32 = 0b10;
    pub const PSIZE_X64: u32 = 0b11;
}

/// The addresses making up one family's flash-controller bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegs {
    pub keyr: u32,
    pub optkeyr: u32,
    pub sr: u32,
    pub cr: u32,
    /// Page address register; the F4 selects sectors through CR.SNB instead
    pub ar: Option<u32>,
}

/// Smallest write the family's controller accepts while programming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramUnit {
    /// 16-bit programming (F0/F1)
    HalfWord,
    /// 32-bit programming (F4, CR.PSIZE = x32)
    Word,
}

impl ProgramUnit {
    pub fn bytes(&self) -> usize {
        match self {
            ProgramUnit::HalfWord => 2,
            ProgramUnit::Word => 4,
        }
    }
}

/// Family-specific flash-controller bank
///
/// Selected once from the identified MCU family; all driver operations
/// dispatch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashBank {
    /// STM32F0 (Cortex-M0): F1-layout controller, half-word programming
    F0,
    /// STM32F1 (Cortex-M3): half-word programming, page erase via AR
    F1,
    /// STM32F4 (Cortex-M4): word programming, sector erase via CR.SNB
    F4,
}

impl FlashBank {
    /// F4 sector sizes in bytes (1 MiB parts; smaller parts use a prefix)
    pub const F4_SECTOR_SIZES: [u32; 12] = [
        16 * 1024,
        16 * 1024,
        16 * 1024,
        16 * 1024,
        64 * 1024,
        128 * 1024,
        128 * 1024,
        128 * 1024,
        128 * 1024,
        128 * 1024,
        128 * 1024,
        128 * 1024,
    ];

    /// The register addresses for this bank
    pub fn regs(&self) -> FlashRegs {
        match self {
            FlashBank::F0 | FlashBank::F1 => FlashRegs {
                keyr: Stm32F1FlashKeyr::ADDRESS,
                optkeyr: STM32F1_FLASH_REG_BASE + 0x08,
                sr: Stm32F1FlashSr::ADDRESS,
                cr: Stm32F1FlashCr::ADDRESS,
                ar: Some(Stm32F1FlashAr::ADDRESS),
            },
            FlashBank::F4 => FlashRegs {
                keyr: Stm32F4FlashKeyr::ADDRESS,
                optkeyr: STM32F4_FLASH_REG_BASE + 0x08,
                sr: Stm32F4FlashSr::ADDRESS,
                cr: Stm32F4FlashCr::ADDRESS,
                ar: None,
            },
        }
    }

    /// The programming granularity for this bank
    pub fn program_unit(&self) -> ProgramUnit {
        match self {
            FlashBank::F0 | FlashBank::F1 => ProgramUnit::HalfWord,
            FlashBank::F4 => ProgramUnit::Word,
        }
    }

    /// Erase page size in bytes, for banks erased by page address
    pub fn page_size(&self) -> Option<u32> {
        match self {
            // 2 KiB pages exist on high-density F1 parts; 1 KiB is the
            // common denominator and AR accepts any page-aligned address
            FlashBank::F0 | FlashBank::F1 => Some(1024),
            FlashBank::F4 => None,
        }
    }

    /// Bit position of CR.LOCK for this bank
    pub fn cr_lock_bit(&self) -> u32 {
        match self {
            FlashBank::F0 | FlashBank::F1 => Stm32F1FlashCr::LOCK_BIT,
            FlashBank::F4 => Stm32F4FlashCr::LOCK_BIT,
        }
    }

    /// Whether the given SR value indicates a busy controller
    pub fn sr_busy(&self, sr: u32) -> bool {
        match self {
            FlashBank::F0 | FlashBank::F1 => Stm32F1FlashSr::from(sr).busy(),
            FlashBank::F4 => Stm32F4FlashSr::from(sr).busy(),
        }
    }

    /// Whether the given SR value flags any operation error
    pub fn sr_errors(&self, sr: u32) -> bool {
        match self {
            FlashBank::F0 | FlashBank::F1 => Stm32F1FlashSr::from(sr).errors(),
            FlashBank::F4 => Stm32F4FlashSr::from(sr).errors(),
        }
    }

    /// Mask of write-1-to-clear SR flags for this bank
    pub fn sr_clear_mask(&self) -> u32 {
        match self {
            FlashBank::F0 | FlashBank::F1 => Stm32F1FlashSr::CLEAR_MASK,
            FlashBank::F4 => Stm32F4FlashSr::CLEAR_MASK,
        }
    }

    /// Upper bound on a mass erase, in milliseconds
    pub fn erase_timeout_ms(&self) -> u32 {
        match self {
            FlashBank::F0 | FlashBank::F1 => 5_000,
            // Worst case at x32 parallelism per the datasheet
            FlashBank::F4 => 32_000,
        }
    }

    /// Upper bound on a single program operation, in milliseconds
    pub fn program_timeout_ms(&self) -> u32 {
        100
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlashBank::F0 => "STM32F0",
            FlashBank::F1 => "STM32F1",
            FlashBank::F4 => "STM32F4",
        }
    }
}

impl fmt::Display for FlashBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} flash", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f1_bank_addresses() {
        let regs = FlashBank::F1.regs();
        assert_eq!(regs.keyr, 0x4002_2004);
        assert_eq!(regs.sr, 0x4002_200C);
        assert_eq!(regs.cr, 0x4002_2010);
        assert_eq!(regs.ar, Some(0x4002_2014));
    }

    #[test]
    fn f4_bank_addresses() {
        let regs = FlashBank::F4.regs();
        assert_eq!(regs.keyr, 0x4002_3C04);
        assert_eq!(regs.sr, 0x4002_3C0C);
        assert_eq!(regs.cr, 0x4002_3C10);
        assert_eq!(regs.ar, None);
    }

    #[test]
    fn f0_shares_f1_layout() {
        assert_eq!(FlashBank::F0.regs(), FlashBank::F1.regs());
        assert_eq!(FlashBank::F0.program_unit(), ProgramUnit::HalfWord);
    }

    #[test]
    fn f1_sr_decode() {
        assert!(FlashBank::F1.sr_busy(1 << Stm32F1FlashSr::BSY_BIT));
        assert!(!FlashBank::F1.sr_busy(0));
        assert!(FlashBank::F1.sr_errors(1 << Stm32F1FlashSr::PGERR_BIT));
        assert!(FlashBank::F1.sr_errors(1 << Stm32F1FlashSr::WRPRTERR_BIT));
        // EOP alone is not an error
        assert!(!FlashBank::F1.sr_errors(1 << Stm32F1FlashSr::EOP_BIT));
    }

    #[test]
    fn f4_sr_decode() {
        assert!(FlashBank::F4.sr_busy(1 << Stm32F4FlashSr::BSY_BIT));
        assert!(FlashBank::F4.sr_errors(1 << Stm32F4FlashSr::PGSERR_BIT));
        assert!(FlashBank::F4.sr_errors(1 << Stm32F4FlashSr::WRPERR_BIT));
        assert!(!FlashBank::F4.sr_errors(1 << Stm32F4FlashSr::EOP_BIT));
    }

    #[test]
    fn f4_sector_layout_covers_1mb() {
        let total: u32 = FlashBank::F4_SECTOR_SIZES.iter().sum();
        assert_eq!(total, 1024 * 1024);
    }
}
