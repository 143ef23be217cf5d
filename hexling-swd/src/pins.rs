// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SWD pin driver abstraction
//!
//! The programmer owns exactly three target-side pads: SWCLK, the
//! bidirectional SWDIO, and the target's reset line.  [`PinDriver`]
//! captures that surface, plus the calibrated half-cycle delay that paces
//! the bit-banged clock.  Nothing above this trait touches hardware.
//!
//! SWDIO direction is modelled as driver state rather than per-bit pad
//! reconfiguration.  On MCUs where reprogramming a pad mode is slow, the
//! implementation should cache the direction and make [`set_io_dir`] a
//! cheap mode-bit toggle; the trait guarantees the flip has settled before
//! the next [`read_io`].
//!
//! [`set_io_dir`]: PinDriver::set_io_dir
//! [`read_io`]: PinDriver::read_io

pub use embedded_hal::delay::DelayNs;

/// Direction of the bidirectional SWDIO pad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDir {
    /// Probe drives SWDIO
    Output,

    /// Target drives SWDIO; the probe samples
    Input,
}

/// Exclusive access to the three SWD pads
///
/// Held by [`SwdProtocol`](crate::protocol::SwdProtocol) for the duration of
/// a programming session; no other component may drive these pins.
///
/// [`DelayNs`] supplies the longer, millisecond-scale waits (flash
/// busy-polling, reset settling); [`tick`](Self::tick) is the SWD half-cycle
/// and is typically much shorter than the delay implementation can resolve.
pub trait PinDriver: DelayNs {
    /// Drive SWCLK to the given level
    fn set_clk(&mut self, level: bool);

    /// Drive SWDIO to the given level.  Only meaningful while the direction
    /// is [`IoDir::Output`].
    fn set_io(&mut self, level: bool);

    /// Sample SWDIO.  Only meaningful while the direction is
    /// [`IoDir::Input`].
    fn read_io(&mut self) -> bool;

    /// Flip the SWDIO direction.  Implementations may skip no-op flips.
    fn set_io_dir(&mut self, dir: IoDir);

    /// Drive the target reset line.  `true` is the inactive (released)
    /// level; `false` holds the target in reset.
    fn set_rst(&mut self, level: bool);

    /// Wait one SWD half-cycle
    fn tick(&mut self);
}
