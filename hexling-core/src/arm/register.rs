// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM debug register access
//!
//! Each Debug Port and Access Port register the programmer touches is
//! described by a zero-sized type implementing [`DebugRegister`]: its
//! transaction address plus the data type its 32-bit contents map to, with
//! the wire conversions provided once here.  Marker traits narrow what the
//! transaction layer will do with a register - [`Readable`]/[`Writable`]
//! for direction, [`DpRegister`]/[`ApRegister`] for which port carries it -
//! so a write to a read-only register fails to compile rather than on the
//! wire.

/// Describes one ARM debug register
pub trait DebugRegister {
    /// Transaction address: 0x0, 0x4, 0x8 or 0xC for DP registers, a
    /// banked address for AP registers
    const ADDRESS: u8;

    /// Typed representation of the register contents
    type Value;

    /// Decode raw wire data into the register's value type
    fn decode(raw: u32) -> Self::Value
    where
        Self::Value: From<u32>,
    {
        Self::Value::from(raw)
    }

    /// Encode the register's value type for the wire
    fn encode(value: Self::Value) -> u32
    where
        Self::Value: Into<u32>,
    {
        value.into()
    }
}

/// Registers the transaction layer may read
pub trait Readable: DebugRegister {}

/// Registers the transaction layer may write
pub trait Writable: DebugRegister {}

/// Registers reached with Debug Port transactions
pub trait DpRegister: DebugRegister {}

/// Registers reached with Access Port transactions
pub trait ApRegister: DebugRegister {}

/// Generate the standard conversions and `Display` for a register data
/// newtype.  Pass `readable` for registers whose raw value can be decoded
/// back from the wire; write-only register data omits `From<u32>`.
#[macro_export]
macro_rules! register_data {
    ($name:ident) => {
        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:08X}", self.0)
            }
        }
    };
    ($name:ident, readable) => {
        $crate::register_data!($name);

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                $name(value)
            }
        }
    };
}
