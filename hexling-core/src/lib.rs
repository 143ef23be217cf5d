// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hexling-core - Core debug and MCU concepts used by hexling.
//!
//! Contains the hardware-independent pieces of the hexling programmer: the
//! ARM Debug Port, Access Port and MEM-AP register definitions, the target
//! identification table, and the family-specific flash-controller register
//! banks.
//!
//! Designed to be used in conjunction with the `hexling-swd` library, which
//! drives these registers over the wire.
//!
//! This library is `no_std` compatible.

#![no_std]

pub mod arm;
pub mod flash;

use core::fmt;
use static_assertions::const_assert;

use crate::arm::dp::IdCode;
use crate::flash::FlashBank;

// CR.SNB is a 4-bit field
const_assert!(FlashBank::F4_SECTOR_SIZES.len() <= 16);

/// The target's MCU family, derived from the DP IDCODE after connecting.
///
/// Identification keys on the debug port IDCODE alone.  That is deliberately
/// coarse: ST families sharing a core share an IDCODE, and telling them
/// apart needs a read of DBGMCU_IDCODE in target memory.  The families
/// distinguished here differ in flash-controller layout, which is all the
/// programmer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuFamily {
    /// Cortex-M0 core (STM32F0-class flash controller)
    CortexM0,

    /// Cortex-M3 core (STM32F1-class flash controller)
    CortexM3,

    /// Cortex-M4 core (STM32F4-class flash controller)
    CortexM4,

    /// An unrecognised IDCODE
    Unknown(IdCode),
}

impl McuFamily {
    pub const IDCODE_M0: IdCode = IdCode::from_u32(0x0BB1_1477);
    pub const IDCODE_M3: IdCode = IdCode::from_u32(0x4BA0_0477);
    pub const IDCODE_M4: IdCode = IdCode::from_u32(0x4BA0_1477);

    /// Identify the family from a freshly read IDCODE
    pub fn from_idcode(idcode: IdCode) -> Self {
        match idcode {
            Self::IDCODE_M0 => McuFamily::CortexM0,
            Self::IDCODE_M3 => McuFamily::CortexM3,
            Self::IDCODE_M4 => McuFamily::CortexM4,
            other => McuFamily::Unknown(other),
        }
    }

    /// Whether this is a family the programmer knows how to flash
    pub fn known(&self) -> bool {
        !matches!(self, McuFamily::Unknown(_))
    }

    /// The flash-controller bank for this family, if known
    pub fn flash_bank(&self) -> Option<FlashBank> {
        match self {
            McuFamily::CortexM0 => Some(FlashBank::F0),
            McuFamily::CortexM3 => Some(FlashBank::F1),
            McuFamily::CortexM4 => Some(FlashBank::F4),
            McuFamily::Unknown(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            McuFamily::CortexM0 => "Cortex-M0",
            McuFamily::CortexM3 => "Cortex-M3",
            McuFamily::CortexM4 => "Cortex-M4",
            McuFamily::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for McuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McuFamily::Unknown(idcode) => write!(f, "Unknown MCU (IDCODE: {idcode})"),
            known => write!(f, "ARM {}", known.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::ProgramUnit;

    #[test]
    fn identification_table() {
        assert_eq!(
            McuFamily::from_idcode(IdCode::from_u32(0x0BB1_1477)),
            McuFamily::CortexM0
        );
        assert_eq!(
            McuFamily::from_idcode(IdCode::from_u32(0x4BA0_0477)),
            McuFamily::CortexM3
        );
        assert_eq!(
            McuFamily::from_idcode(IdCode::from_u32(0x4BA0_1477)),
            McuFamily::CortexM4
        );
    }

    #[test]
    fn unknown_idcode_has_no_bank() {
        let family = McuFamily::from_idcode(IdCode::from_u32(0x2BA0_1477));
        assert!(!family.known());
        assert_eq!(family.flash_bank(), None);
    }

    #[test]
    fn family_flash_granularity() {
        assert_eq!(
            McuFamily::CortexM3.flash_bank().unwrap().program_unit(),
            ProgramUnit::HalfWord
        );
        assert_eq!(
            McuFamily::CortexM4.flash_bank().unwrap().program_unit(),
            ProgramUnit::Word
        );
    }
}
