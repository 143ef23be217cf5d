// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hexling - a standalone SWD flash programmer.
//!
//! hexling reads an Intel HEX firmware image from a storage card and burns
//! it into the flash of an ARM Cortex-M target over bit-banged Serial Wire
//! Debug, with no host computer in the loop.  A serial console drives it:
//!
//! ```text
//! > READY
//! < FILE: firmware/app.hex
//! > OK
//! ```
//!
//! This crate is the application core.  It contains:
//!
//! * [`hex`] - the streaming Intel HEX parser and write-unit assembler
//! * [`session`] - the programming session orchestrator
//! * [`command`] - the console protocol (command parsing, response codes)
//! * [`storage`] - the interface the card/filesystem collaborator provides
//! * [`error`] - the session error kinds and their response mapping
//!
//! The wire itself lives in [`hexling_swd`], with the register-level
//! concepts in `hexling-core`.  Everything is `no_std` and blocking;
//! the firmware binding supplies pins, delays, UART and card access, then
//! calls [`session::run`] per command:
//!
//! ```ignore
//! let mut swd = SwdInterface::from_pins(pins);
//! let result = session::run(&mut swd, &mut storage, path);
//! uart.write(command::response_for(&result).as_bytes());
//! ```

#![no_std]

#[cfg(test)]
extern crate alloc;

pub mod command;
pub mod config;
pub mod error;
pub mod hex;
pub mod session;
pub mod storage;

#[doc(inline)]
pub use crate::error::ErrorKind;
#[doc(inline)]
pub use crate::hex::Assembler;
#[doc(inline)]
pub use crate::storage::Storage;
