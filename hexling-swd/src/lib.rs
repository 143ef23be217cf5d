// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hexling-swd library
//!
//! Bit-banged ARM Serial Wire Debug (SWD) implementation, layered under a
//! driver for the STM32 family flash controllers.  This is the wire half of
//! the hexling programmer: everything between a parsed firmware image and
//! the target's flash cells lives here.
//!
//! ```text
//!        hexling session
//!  -------------------------
//!       flash::TargetFlash        unlock/erase/program/verify/lock
//!  -------------------------
//!    interface::SwdInterface      DP/AP transactions, target memory bus
//!  -------------------------
//!     protocol::SwdProtocol       bit-level framing, line reset, parity
//!  -------------------------
//!       pins::PinDriver           CLK/IO/RST pads + half-cycle delay
//!  -------------------------
//!        3.3V SWDIO/SWCLK  >====<  SWD target
//! ```
//!
//! The crate is `no_std`, requires an `alloc` implementation, and performs
//! no I/O of its own: all pin access goes through the [`PinDriver`] trait,
//! so the same stack runs against real pads or the cycle-accurate simulated
//! target in [`sim`].
//!
//! Everything here is blocking by design.  SWD requires strict transaction
//! ordering and the programmer has nothing else to do while a bit is on the
//! wire; the only timed waits are the pin driver's half-cycle tick and the
//! millisecond delays used for flash busy-polling and reset settling.

#![no_std]

pub mod flash;
pub mod interface;
pub mod pins;
pub mod protocol;
pub mod sim;

#[doc(inline)]
pub use crate::interface::SwdInterface;
#[doc(inline)]
pub use crate::pins::PinDriver;
#[doc(inline)]
pub use crate::protocol::SwdProtocol;

extern crate alloc;
use alloc::string::String;
use core::fmt;

/// Core error type used by all hexling-swd objects
///
/// Methods are provided to make it easier to handle errors, by checking if
/// either a retry or reset is required:
///
/// - [`SwdError::requires_retry()`]
/// - [`SwdError::requires_reset()`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwdError {
    /// Transient error that can likely be retried successfully.  The
    /// transaction layer retries waits internally; this error surfaces only
    /// once too many waits have occurred in a row.
    WaitAck,

    /// The target acknowledged with a fault.  The sticky error flags have
    /// already been cleared via the ABORT register by the time this is
    /// returned, but the failed operation was not performed.
    FaultAck,

    /// No valid acknowledgement from the target.  The value received is
    /// included; 7 means SWDIO was high for the entire acknowledge cycle,
    /// which is what an absent or unpowered target looks like.  A line
    /// reset has been performed before this is returned.
    NoAck(u8),

    /// A parity error was detected while reading from the target, so the
    /// data read cannot be trusted.  Frequent parity errors suggest noise
    /// on the SWD lines or too fast a clock for the wiring.
    ReadParity,

    /// The Debug Port flagged a sticky error via CTRL/STAT.
    DpError,

    /// The wire protocol succeeded but the requested operation did not
    /// (for example a register write that didn't "take", or a flash
    /// controller error).
    OperationFailed(String),

    /// The operation needs state that hasn't been established - typically
    /// the debug domain has not been powered up yet.
    NotReady,

    /// A bounded wait (flash busy-poll, power-up poll) expired.
    Timeout,
}

impl SwdError {
    pub(crate) fn from_ack(ack: u8) -> Result<(), SwdError> {
        match ack {
            1 => Ok(()),
            2 => Err(SwdError::WaitAck),
            4 => Err(SwdError::FaultAck),
            _ => Err(SwdError::NoAck(ack)),
        }
    }

    /// Returns true if the error requires a target reset to recover.  If
    /// the error persists across reconnects, the target may require a hard
    /// reset.
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            SwdError::NoAck(_) | SwdError::FaultAck | SwdError::ReadParity | SwdError::DpError
        )
    }

    /// Returns true if the error is a transient error that can be retried.
    pub fn requires_retry(&self) -> bool {
        matches!(self, SwdError::WaitAck)
    }

    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwdError::WaitAck => "Wait ACK",
            SwdError::FaultAck => "Fault ACK",
            SwdError::NoAck(_) => "No ACK",
            SwdError::ReadParity => "Read Parity Error",
            SwdError::DpError => "Debug Port Error",
            SwdError::OperationFailed(_) => "Operation Failed",
            SwdError::NotReady => "Not Ready",
            SwdError::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for SwdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdError::NoAck(ack) => write!(f, "{}: {ack}", self.as_str()),
            SwdError::OperationFailed(str) => write!(f, "{}: {str}", self.as_str()),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_decoding() {
        assert_eq!(SwdError::from_ack(1), Ok(()));
        assert_eq!(SwdError::from_ack(2), Err(SwdError::WaitAck));
        assert_eq!(SwdError::from_ack(4), Err(SwdError::FaultAck));
        assert_eq!(SwdError::from_ack(7), Err(SwdError::NoAck(7)));
    }

    #[test]
    fn recovery_predicates() {
        assert!(SwdError::WaitAck.requires_retry());
        assert!(!SwdError::WaitAck.requires_reset());
        assert!(SwdError::FaultAck.requires_reset());
        assert!(SwdError::NoAck(7).requires_reset());
        assert!(!SwdError::Timeout.requires_reset());
    }
}
