// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Intel HEX handling
//!
//! [`record`] parses and validates one record; [`stream`] turns a record
//! stream into aligned, page-sized write units and feeds them to a sink.
//!
//! The format is `:LLAAAATTDD..DDCC` - length, 16-bit address, type, data,
//! checksum - one record per line.  Only the four record types a flat
//! firmware image needs are accepted: Data (0x00), End Of File (0x01),
//! Extended Linear Address (0x04) and Start Linear Address (0x05).  Any
//! other type is rejected, not skipped: an image using segment addressing
//! would otherwise program to the wrong place.

pub mod record;
pub mod stream;

#[doc(inline)]
pub use record::{Record, RecordType};
#[doc(inline)]
pub use stream::{Assembler, StreamError, WriteSink};

use core::fmt;

/// The ways a HEX line or stream can be rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexError {
    /// Line does not begin with the `:` sentinel
    MissingSentinel,

    /// Line has an odd number of hex digits
    OddDigitCount,

    /// Line contains a character that is not a hex digit
    BadHexDigit,

    /// Line is shorter than the minimal record `:LLAAAATTCC`
    TooShort,

    /// Line length does not match the record's byte count
    LengthMismatch,

    /// Record checksum does not balance the record to zero
    Checksum,

    /// Record type is none of Data/EOF/ExtLinearAddr/StartLinearAddr
    UnknownRecordType(u8),

    /// Extended linear address record with a byte count other than 2
    BadExtAddress,

    /// Line is longer than any legal record, or than the stream layer's
    /// line buffer
    LineTooLong,

    /// Stream ended without an EOF record
    TruncatedStream,
}

impl HexError {
    pub fn as_str(&self) -> &'static str {
        match self {
            HexError::MissingSentinel => "missing ':' sentinel",
            HexError::OddDigitCount => "odd hex digit count",
            HexError::BadHexDigit => "invalid hex digit",
            HexError::TooShort => "line too short",
            HexError::LengthMismatch => "length field mismatch",
            HexError::Checksum => "checksum mismatch",
            HexError::UnknownRecordType(_) => "unknown record type",
            HexError::BadExtAddress => "bad extended address record",
            HexError::LineTooLong => "line too long",
            HexError::TruncatedStream => "stream ended without EOF record",
        }
    }
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexError::UnknownRecordType(tt) => {
                write!(f, "{}: 0x{tt:02X}", self.as_str())
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use alloc::string::String;
    use core::fmt::Write;

    /// Build a record line with a correct checksum
    pub(crate) fn build_line(addr: u16, tt: u8, data: &[u8]) -> String {
        let mut sum = data.len() as u8;
        sum = sum
            .wrapping_add((addr >> 8) as u8)
            .wrapping_add(addr as u8)
            .wrapping_add(tt);
        for &b in data {
            sum = sum.wrapping_add(b);
        }
        let checksum = sum.wrapping_neg();

        let mut line = String::new();
        write!(line, ":{:02X}{:04X}{:02X}", data.len(), addr, tt).unwrap();
        for &b in data {
            write!(line, "{b:02X}").unwrap();
        }
        write!(line, "{checksum:02X}").unwrap();
        line
    }
}
