// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM SWD wire protocol implementation
//!
//! This module implements the SWD protocol bit layer.  It provides the
//! `SwdProtocol` struct for low-level SWD operations over a [`PinDriver`].
//!
//! Clocking follows the ADIv5 timing model: outputs change on the falling
//! edge of SWCLK and inputs are sampled after the rising edge.  A full bit
//! is a CLK-low half-cycle followed by a CLK-high half-cycle, paced by the
//! pin driver's `tick()`.

use core::result::Result;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::SwdError;
use crate::pins::{IoDir, PinDriver};

// JTAG-to-SWD selection sequence as documented: 0111100111100111
const JTAG_TO_SWD_DOCUMENTED: u16 = 0b0111_1001_1110_0111; // 0x79E7

// Reversed for SWD LSB-first transmission
const JTAG_TO_SWD_SEQUENCE: u16 = JTAG_TO_SWD_DOCUMENTED.reverse_bits(); // 0xE79E

// 50+ clock cycles with SWDIO high
const LINE_RESET_SWDIO_HIGH_CYCLES: u32 = 51;

// 2+ clock cycles with SWDIO low
const LINE_RESET_SWDIO_LOW_CYCLES: u32 = 3;

// Minimum 8 clocks after a single operation
pub(crate) const POST_SINGLE_OPERATION_CYCLES: u32 = 8;

/// SWD protocol object
///
/// This is used by [`SwdInterface`](crate::interface::SwdInterface) to
/// communicate with the target.  It is not expected to be used directly by
/// applications.
///
/// Owns the [`PinDriver`] - and with it the three target-side pads - for
/// the lifetime of the session.
#[derive(Debug)]
pub struct SwdProtocol<P: PinDriver> {
    pins: P,
}

impl<P: PinDriver> SwdProtocol<P> {
    /// Create a new SWD protocol instance over the given pin driver.
    ///
    /// SWDIO starts as an input without a pull - it is the target's
    /// responsibility to drive SWDIO, and it only does so after the
    /// JTAG-to-SWD sequence has been sent.  SWCLK starts low and the reset
    /// line released.
    pub fn new(mut pins: P) -> Self {
        pins.set_io_dir(IoDir::Input);
        pins.set_clk(false);
        pins.set_rst(true);

        debug!("SWD protocol created, SWDIO input, SWCLK low, RST released");

        Self { pins }
    }

    /// Returns a mutable reference to the underlying pin driver.
    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    #[inline]
    pub(crate) fn set_io_output(&mut self) {
        self.pins.set_io_dir(IoDir::Output);
    }

    #[inline]
    pub(crate) fn set_io_input(&mut self) {
        self.pins.set_io_dir(IoDir::Input);
    }

    #[inline]
    pub(crate) fn set_io_high(&mut self) {
        self.pins.set_io(true);
    }

    #[inline]
    pub(crate) fn set_io_low(&mut self) {
        self.pins.set_io(false);
    }

    #[inline]
    pub(crate) fn set_clk_low(&mut self) {
        self.pins.set_clk(false);
    }

    /// Drive the target reset line
    pub(crate) fn set_rst(&mut self, level: bool) {
        self.pins.set_rst(level);
    }

    /// Blocking millisecond delay via the pin driver's platform delay
    pub(crate) fn delay_ms(&mut self, ms: u32) {
        self.pins.delay_ms(ms);
    }

    fn delay_us(&mut self, us: u32) {
        self.pins.delay_us(us);
    }

    /// Write a single bit: data changes on the falling edge, the target
    /// samples on the rising edge.
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.pins.set_clk(false);
        self.pins.set_io(bit);
        self.pins.tick();
        self.pins.set_clk(true);
        self.pins.tick();
    }

    /// Read a single bit: the target shifts on the falling edge, we sample
    /// after the rising edge.
    #[inline]
    pub fn read_bit(&mut self) -> bool {
        self.pins.set_clk(false);
        self.pins.tick();
        self.pins.set_clk(true);
        let bit = self.pins.read_io();
        self.pins.tick();
        bit
    }

    /// Write a byte, LSB first
    pub fn write_byte(&mut self, data: u8) {
        self.write_bits(8, data as u64);
    }

    /// Read a byte, LSB first
    pub fn read_byte(&mut self) -> u8 {
        let mut data = 0u8;
        for ii in 0..8 {
            if self.read_bit() {
                data |= 1 << ii;
            }
        }
        data
    }

    #[inline]
    pub(crate) fn write_bits(&mut self, count: usize, data: u64) {
        trace!("Info:  Writing {count} bits: 0x{data:0X}");
        let mut data = data;
        for _ in 0..count {
            self.write_bit(data & 1 == 1);
            data >>= 1;
        }
        self.set_clk_low(); // Leave SWCLK low
    }

    /// Clock SWCLK for the given number of cycles, leaving it low
    #[inline]
    pub fn clock(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.pins.set_clk(false);
            self.pins.tick();
            self.pins.set_clk(true);
            self.pins.tick();
        }

        self.set_clk_low(); // Leave SWCLK low
    }

    /// Read a 32-bit payload plus parity, then turn the line around.
    ///
    /// The turnaround is performed even on a parity failure - the target
    /// doesn't know the read went bad, and the line must end up back in a
    /// drivable state.
    #[inline]
    pub(crate) fn read_u32_parity_turnaround(&mut self) -> Result<u32, SwdError> {
        let mut data = 0u32;
        for ii in 0..32 {
            if self.read_bit() {
                data |= 1 << ii;
            }
        }

        // Read parity bit
        let parity = self.read_bit();
        self.turnaround_to_output();

        // Check parity
        if calculate_parity(data) != parity {
            debug!("SWD read parity error: data=0x{data:08X}, parity={parity}");
            return Err(SwdError::ReadParity);
        }

        Ok(data)
    }

    /// Write the 8-bit request, then turn the line around to the target
    pub(crate) fn write_cmd_turnaround(&mut self, data: u8) {
        self.write_byte(data);

        self.set_io_input(); // Set SWDIO to input for turnaround
        self.clock(1); // Clock for turnaround bit, leaves swclk low
    }

    #[inline]
    fn turnaround_to_output(&mut self) {
        self.clock(1);
        self.set_io_output();
        self.set_io_low();
        self.set_clk_low();
    }

    /// Turn the line around to us, then write a 33-bit payload
    pub(crate) fn turnaround_write_u32_parity(&mut self, data: u32) {
        self.turnaround_to_output();

        self.write_u32_parity(data);
    }

    #[inline]
    pub(crate) fn write_u32_parity(&mut self, data: u32) {
        let data: u64 = if calculate_parity(data) {
            data as u64 | (1 << 32)
        } else {
            data as u64
        };

        self.write_bits(33, data);
    }

    /// Read the ACK response from the target.  If the ACK is an error
    /// response, this also clocks the turnaround bit the specification
    /// requires after a Wait or Fault, leaving SWDIO ours and low.
    pub(crate) fn read_ack(&mut self) -> Result<(), SwdError> {
        let mut ack = 0u8;
        for ii in 0..3 {
            if self.read_bit() {
                ack |= 1 << ii;
            }
        }
        let result = SwdError::from_ack(ack);

        match &result {
            Ok(_) => (),
            Err(SwdError::WaitAck) | Err(SwdError::FaultAck) => {
                trace!("ACK error - turnaround: {result:?}");
                self.turnaround_to_output();
            }
            Err(e) => {
                trace!("ACK error - no turnaround: {e:?}");
                self.set_io_output();
                self.set_io_low();
                self.set_clk_low();
            }
        }

        result
    }

    /// Perform the full SWD line reset sequence.
    ///
    /// 50+ clocks with SWDIO high, the 16-bit JTAG-to-SWD selection
    /// sequence (0x79E7, transmitted LSB first as 0xE79E), 50+ more high
    /// clocks, then 2+ clocks with SWDIO low.  Targets with an always-SWD
    /// debug port also accept the older two-blocks-separated-by-a-zero-byte
    /// convention; the selection sequence is the one that mixed-mode ports
    /// require, so it is the one sent.
    ///
    /// Afterwards the DP is in a known state and IDCODE must be the first
    /// register read.
    pub fn line_reset(&mut self) {
        // Start from a known state: everything low, and a brief pause
        self.set_io_output();
        self.set_io_low();
        self.set_clk_low();
        self.delay_us(500);

        // 50+ clock cycles with SWDIO high
        self.set_io_high();
        self.clock(LINE_RESET_SWDIO_HIGH_CYCLES);
        self.delay_us(100);

        // JTAG-to-SWD selection sequence
        self.write_bits(16, JTAG_TO_SWD_SEQUENCE as u64);
        self.delay_us(100);

        // 50+ clock cycles with SWDIO high
        self.set_io_high();
        self.clock(LINE_RESET_SWDIO_HIGH_CYCLES);

        // 2+ clock cycles with SWDIO low
        self.set_io_low();
        self.clock(LINE_RESET_SWDIO_LOW_CYCLES);

        // Brief pause before the IDCODE read
        self.delay_us(100);
    }
}

/// Calculate SWD parity - 1 for an odd number of bits set to 1, 0 otherwise.
pub(crate) fn calculate_parity<T>(value: T) -> bool
where
    T: Into<u64>,
{
    (value.into().count_ones() % 2) == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_basics() {
        assert!(!calculate_parity(0u32));
        assert!(calculate_parity(1u32));
        assert!(!calculate_parity(3u32));
        assert!(!calculate_parity(0xFFFF_FFFFu32));
        assert!(calculate_parity(0x8000_0001u32 ^ 0x1u32));
    }

    #[test]
    fn parity_detects_any_single_bit_flip() {
        // Flipping one bit always flips the parity, so a one-bit corruption
        // of the payload is always caught.
        for word in [0u32, 0xDEAD_BEEF, 0x0800_0000, 0xFFFF_FFFF] {
            let parity = calculate_parity(word);
            for bit in 0..32 {
                let corrupted = word ^ (1 << bit);
                assert_ne!(calculate_parity(corrupted), parity);
            }
        }
    }

    #[test]
    fn jtag_to_swd_wire_order() {
        assert_eq!(JTAG_TO_SWD_SEQUENCE, 0xE79E);
    }
}
