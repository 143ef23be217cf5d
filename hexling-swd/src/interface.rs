// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM SWD interface
//!
//! This module implements the SWD transaction layer: typed Debug Port and
//! Access Port register access on top of [`SwdProtocol`], and the target
//! memory bus on top of the MEM-AP.
//!
//! AP reads are posted - the payload of an AP read transaction belongs to
//! the previous AP read.  `SwdInterface` hides this from callers by issuing
//! the follow-up RDBUFF read before returning, so AP reads look synchronous.
//! Wait acknowledgements are retried internally; fault acknowledgements are
//! answered with an ABORT write; an invalid acknowledgement forces a line
//! reset.  Callers never see raw ACK values.

use alloc::format;
use core::fmt;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hexling_core::McuFamily;
use hexling_core::arm::Dhcsr;
use hexling_core::arm::dp::{
    Abort, AbortRegister, CtrlStat, CtrlStatRegister, IdCode, IdCodeRegister, RdBuffRegister,
    Select, SelectRegister,
};
use hexling_core::arm::map::{Csw, CswRegister, DrwRegister, Idr, IdrRegister, Tar, TarRegister};
use hexling_core::arm::register::{ApRegister, DebugRegister, DpRegister, Readable, Writable};

use crate::SwdError;
use crate::pins::PinDriver;
use crate::protocol::{POST_SINGLE_OPERATION_CYCLES, SwdProtocol, calculate_parity};

// The MEM-AP auto-increment wraps within a 10-bit window, so TAR must be
// rewritten whenever a bulk transfer crosses a 1 KiB boundary.
const MEMORY_WINDOW: u32 = 0x400;

// Waits retried per transaction before giving up
const DEFAULT_WAIT_RETRIES: u32 = 64;

// Power-up acknowledgement polls, at 1ms each
const POWER_UP_POLLS: u32 = 100;

// How long the target reset line is held asserted, and how long the target
// is given to boot afterwards
const RESET_ASSERT_MS: u32 = 10;
const RESET_SETTLE_MS: u32 = 100;

/// SWD interface object
///
/// Provides typed DP/AP register transactions and the target memory bus.
/// The flash driver and the session orchestrator reach the wire only
/// through this object.
///
/// Create using [`SwdInterface::new()`] with a [`SwdProtocol`], or
/// [`SwdInterface::from_pins()`] with a [`PinDriver`], then call
/// [`SwdInterface::connect()`] before anything else.
#[derive(Debug)]
pub struct SwdInterface<P: PinDriver> {
    protocol: SwdProtocol<P>,
    idcode: Option<IdCode>,
    family: Option<McuFamily>,
    powered_up: bool,
    dp_select: Select,
    csw: Option<Csw>,
    wait_retries: u32,
}

impl<P: PinDriver> SwdInterface<P> {
    /// Creates a new SWD interface using the given [`SwdProtocol`] instance.
    pub fn new(protocol: SwdProtocol<P>) -> Self {
        Self {
            protocol,
            idcode: None,
            family: None,
            powered_up: false,
            dp_select: Select::default(),
            csw: None,
            wait_retries: DEFAULT_WAIT_RETRIES,
        }
    }

    /// Creates a new SWD interface directly from a pin driver.
    pub fn from_pins(pins: P) -> Self {
        Self::new(SwdProtocol::new(pins))
    }

    // Resets internal state of the SWD interface.
    fn reset_internal_state(&mut self) {
        self.idcode = None;
        self.family = None;
        self.powered_up = false;
        self.dp_select = Select::default();
        self.csw = None;
    }

    /// Resets and connects to the target's SWD interface.
    ///
    /// Performs the line reset, reads and sanity-checks the IDCODE, clears
    /// any stale error state, powers up the debug domain and configures the
    /// MEM-AP.  On success the identified [`McuFamily`] is returned; note
    /// that an *unknown* family still connects - whether that is acceptable
    /// is the caller's decision.
    pub fn connect(&mut self) -> Result<McuFamily, SwdError> {
        trace!("Exec:  Reset and connect SWD");
        self.reset_internal_state();

        self.protocol.line_reset();

        // IDCODE must be the first read after a line reset
        let idcode = self.read_idcode()?;
        if !idcode.is_plausible() {
            debug!("Dead line during connect: IDCODE {idcode}");
            return Err(SwdError::OperationFailed(format!(
                "no target detected (idcode {idcode})"
            )));
        }
        debug!("Value: IDCODE {idcode:#}");
        self.idcode = Some(idcode);

        // Clear any sticky errors left from a previous session
        self.clear_errors()?;

        // Drain RDBUFF so the posted-read pipeline starts empty
        let _ = self.do_read_op(SwdOp::DpRead(RdBuffRegister::ADDRESS), true)?;

        self.power_up_debug_domain()?;
        self.configure_mem_ap()?;

        let family = McuFamily::from_idcode(idcode);
        debug!("Value: {family}");
        self.family = Some(family);

        Ok(family)
    }

    /// Performs a SWD operation to read the IDCODE register.
    pub fn read_idcode(&mut self) -> Result<IdCode, SwdError> {
        // IDCODE never needs a DP SELECT update, so read it directly
        let op = SwdOp::DpRead(IdCodeRegister::ADDRESS);
        let idcode = self.do_read_op(op, true)?;

        Ok(idcode.into())
    }

    /// Retrieves the IDCODE of the target device, if connected.
    pub fn idcode(&self) -> Option<IdCode> {
        self.idcode
    }

    /// Retrieves the identified MCU family, if connected.
    pub fn family(&self) -> Option<McuFamily> {
        self.family
    }

    /// Sets the number of automatic retries when a transaction is answered
    /// with a WAIT acknowledgement.
    pub fn set_wait_retries(&mut self, retries: u32) {
        self.wait_retries = retries;
    }

    /// Write a Debug Port register
    pub fn write_dp_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: Writable + DpRegister,
        u32: From<R::Value>,
    {
        let op = SwdOp::DpWrite(R::ADDRESS);
        self.write_operation(op, R::encode(value), true)
    }

    /// Write an Access Port register
    ///
    /// Automatically updates the DP SELECT register if the target bank
    /// differs from the cached one.
    pub fn write_ap_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: Writable + ApRegister,
        u32: From<R::Value>,
    {
        let op = SwdOp::ApWrite(R::ADDRESS);
        self.write_operation(op, R::encode(value), true)
    }

    /// Read a Debug Port register
    pub fn read_dp_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: Readable + DpRegister,
        R::Value: From<u32>,
    {
        let op = SwdOp::DpRead(R::ADDRESS);
        let raw_data = self.read_operation(op, true)?;

        Ok(R::decode(raw_data))
    }

    /// Read an Access Port register
    ///
    /// Automatically updates the DP SELECT register if required, and
    /// completes the posted read through DP RDBUFF, so the returned value
    /// belongs to this read.
    pub fn read_ap_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: Readable + ApRegister,
        R::Value: From<u32>,
    {
        let op = SwdOp::ApRead(R::ADDRESS);
        let raw_data = self.read_operation(op, true)?;
        Ok(R::decode(raw_data))
    }

    /// Call to check for sticky errors in the Debug Port status.
    pub fn check_dp_errors(&mut self, check_read_ok: bool) -> Result<(), SwdError> {
        let op = SwdOp::DpRead(CtrlStatRegister::ADDRESS);
        let status = CtrlStat::from(self.do_read_op(op, true)?);

        if status.has_errors() {
            warn!("DP status errors detected: {}", status.error_states());
            return Err(SwdError::DpError);
        }
        if check_read_ok && !status.readok() {
            warn!("DP read OK bit not set");
            return Err(SwdError::DpError);
        }

        Ok(())
    }

    /// Call to clear any sticky errors on the Debug Port.
    pub fn clear_errors(&mut self) -> Result<(), SwdError> {
        trace!("Exec:  Clear errors");
        self.set_abort(Abort::clear_all_errors())?;

        self.protocol.delay_ms(1);

        // Confirm they are now clear
        self.check_dp_errors(false)?;

        trace!("OK:    Clear errors");
        Ok(())
    }

    /// Powers up the debug domain of the target device.
    ///
    /// Requests both debug and system power via CTRL/STAT and polls until
    /// the target acknowledges both, or times out.
    pub fn power_up_debug_domain(&mut self) -> Result<(), SwdError> {
        // Set default DP SELECT
        self.update_dp_select(Select::default())?;

        let mut ctrl_stat = CtrlStat::default();
        ctrl_stat.set_cdbgpwrupreq(true);
        ctrl_stat.set_csyspwrupreq(true);
        self.write_dp_register(CtrlStatRegister, ctrl_stat)?;

        for _ in 0..POWER_UP_POLLS {
            let status: CtrlStat = self.read_dp_register(CtrlStatRegister)?;
            if status.cdbgpwrupack() && status.csyspwrupack() {
                debug!("OK:   Debug domain powered up");
                self.powered_up = true;
                return Ok(());
            }
            self.protocol.delay_ms(1);
        }

        warn!("Debug domain power up not acknowledged");
        Err(SwdError::Timeout)
    }

    /// Configures the MEM-AP for 32-bit access with auto-increment off.
    fn configure_mem_ap(&mut self) -> Result<(), SwdError> {
        if !self.powered_up {
            return Err(SwdError::NotReady);
        }

        // Read CSW first; some implementations misbehave if the first AP
        // access is a write
        let _ = self.read_ap_register(CswRegister)?;

        let csw = Csw::default();
        self.write_ap_register(CswRegister, csw)?;

        // Bits 24-30 of the readback vary by implementation, so compare
        // only the low bits
        let readback: Csw = self.read_ap_register(CswRegister)?;
        if readback.value() & 0xFF_FFFF != csw.value() & 0xFF_FFFF {
            warn!("CSW configuration mismatch after write: expected {csw}, got {readback}");
        }
        self.csw = Some(csw);

        // Confirm something that calls itself a MEM-AP is on the other end
        let idr: Idr = self.read_ap_register(IdrRegister)?;
        if !idr.is_mem_ap() {
            warn!("AP does not identify as a MEM-AP: IDR {idr}");
        }

        Ok(())
    }

    /// Reads a 32-bit word from the target's memory.
    pub fn read_word(&mut self, addr: u32) -> Result<u32, SwdError> {
        self.ensure_csw(Csw::SIZE_32BIT, Csw::ADDRINC_OFF)?;
        self.set_tar_checked(addr)?;

        let data = self.read_ap_register(DrwRegister)?;
        Ok(data.data())
    }

    /// Writes a 32-bit word to the target's memory.
    pub fn write_word(&mut self, addr: u32, data: u32) -> Result<(), SwdError> {
        self.ensure_csw(Csw::SIZE_32BIT, Csw::ADDRINC_OFF)?;
        self.set_tar_checked(addr)?;

        self.write_ap_register(DrwRegister, data.into())
    }

    /// Writes a 16-bit half-word to the target's memory.
    ///
    /// The MEM-AP is switched to 16-bit transfers and the value is placed
    /// on the byte lanes selected by the address, as AHB requires.  This is
    /// the access the F0/F1 flash controllers demand while programming.
    pub fn write_halfword(&mut self, addr: u32, data: u16) -> Result<(), SwdError> {
        if addr & 1 != 0 {
            warn!("Address 0x{addr:08X} is not half-word aligned");
            return Err(SwdError::OperationFailed(format!(
                "unaligned half-word write to 0x{addr:08X}"
            )));
        }

        self.ensure_csw(Csw::SIZE_16BIT, Csw::ADDRINC_OFF)?;

        let tar = Tar::from(addr);
        self.write_ap_register(TarRegister, tar)?;

        let lanes = (data as u32) << (8 * (addr & 2));
        self.write_ap_register(DrwRegister, lanes.into())
    }

    /// Reads a block of 32-bit words from the target's memory.
    ///
    /// Uses MEM-AP auto-increment, rewriting TAR at each 1 KiB window
    /// crossing, and pipelines the posted AP reads so each word costs a
    /// single transaction.
    pub fn read_words(&mut self, addr: u32, buf: &mut [u32]) -> Result<(), SwdError> {
        if addr & 0x3 != 0 {
            info!("Error: Attempt to read on non-4 byte boundary");
            return Err(SwdError::OperationFailed(format!(
                "unaligned bulk read from 0x{addr:08X}"
            )));
        }
        if buf.is_empty() {
            return Ok(());
        }

        self.ensure_csw(Csw::SIZE_32BIT, Csw::ADDRINC_SINGLE)?;

        let mut remaining = buf;
        let mut current_addr = addr;

        while !remaining.is_empty() {
            let boundary_offset = MEMORY_WINDOW - (current_addr & (MEMORY_WINDOW - 1));
            let max_words = (boundary_offset / 4) as usize;
            let chunk_size = remaining.len().min(max_words);

            let tar = Tar::from(current_addr);
            self.write_ap_register(TarRegister, tar)?;

            let (chunk, rest) = remaining.split_at_mut(chunk_size);
            self.read_drw_bulk(chunk)?;

            remaining = rest;
            current_addr += (chunk_size * 4) as u32;
        }

        Ok(())
    }

    /// Writes a block of 32-bit words to the target's memory.
    pub fn write_words(&mut self, addr: u32, buf: &[u32]) -> Result<(), SwdError> {
        if addr & 0x3 != 0 {
            info!("Error: Attempt to write on non-4 byte boundary");
            return Err(SwdError::OperationFailed(format!(
                "unaligned bulk write to 0x{addr:08X}"
            )));
        }

        self.ensure_csw(Csw::SIZE_32BIT, Csw::ADDRINC_SINGLE)?;

        let mut remaining = buf;
        let mut current_addr = addr;

        while !remaining.is_empty() {
            let boundary_offset = MEMORY_WINDOW - (current_addr & (MEMORY_WINDOW - 1));
            let max_words = (boundary_offset / 4) as usize;
            let chunk_size = remaining.len().min(max_words);

            let tar = Tar::from(current_addr);
            self.write_ap_register(TarRegister, tar)?;

            let (chunk, rest) = remaining.split_at(chunk_size);
            let drw_op = SwdOp::ApWrite(DrwRegister::ADDRESS);
            self.check_and_update_dp_select(drw_op)?;
            for (ii, &word) in chunk.iter().enumerate() {
                let last = ii == chunk.len() - 1;
                self.do_write_op(drw_op, word, last)?;
            }
            self.check_dp_errors(false)?;

            remaining = rest;
            current_addr += (chunk_size * 4) as u32;
        }

        Ok(())
    }

    /// Reads target memory into a byte buffer.
    ///
    /// The bus only moves aligned words; partial words at either edge are
    /// read in full and the unwanted bytes discarded.
    pub fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), SwdError> {
        let mut addr = addr;
        let mut buf = buf;

        // Leading partial word
        let lead = (addr & 0x3) as usize;
        if lead != 0 {
            let word = self.read_word(addr & !0x3)?.to_le_bytes();
            let take = (4 - lead).min(buf.len());
            buf[..take].copy_from_slice(&word[lead..lead + take]);
            addr += take as u32;
            buf = &mut buf[take..];
        }

        // Aligned middle
        let words = buf.len() / 4;
        if words > 0 {
            for ii in 0..words {
                let word = self.read_word(addr + (ii as u32 * 4))?;
                buf[ii * 4..ii * 4 + 4].copy_from_slice(&word.to_le_bytes());
            }
            addr += (words * 4) as u32;
            buf = &mut buf[words * 4..];
        }

        // Trailing partial word
        if !buf.is_empty() {
            let word = self.read_word(addr)?.to_le_bytes();
            let len = buf.len();
            buf.copy_from_slice(&word[..len]);
        }

        Ok(())
    }

    /// Writes a byte buffer to target memory.
    ///
    /// Partial words at either edge are handled by read-modify-write on the
    /// caller's behalf.  Not usable against flash, whose controller demands
    /// its own programming granularity - the flash driver supplies aligned
    /// accesses itself.
    pub fn write_bytes(&mut self, addr: u32, buf: &[u8]) -> Result<(), SwdError> {
        let mut addr = addr;
        let mut buf = buf;

        // Leading partial word: read, merge, write back
        let lead = (addr & 0x3) as usize;
        if lead != 0 {
            let base = addr & !0x3;
            let mut word = self.read_word(base)?.to_le_bytes();
            let take = (4 - lead).min(buf.len());
            word[lead..lead + take].copy_from_slice(&buf[..take]);
            self.write_word(base, u32::from_le_bytes(word))?;
            addr += take as u32;
            buf = &buf[take..];
        }

        // Aligned middle
        let words = buf.len() / 4;
        for ii in 0..words {
            let word = u32::from_le_bytes(buf[ii * 4..ii * 4 + 4].try_into().unwrap_or([0; 4]));
            self.write_word(addr + (ii as u32 * 4), word)?;
        }
        addr += (words * 4) as u32;
        buf = &buf[words * 4..];

        // Trailing partial word
        if !buf.is_empty() {
            let mut word = self.read_word(addr)?.to_le_bytes();
            word[..buf.len()].copy_from_slice(buf);
            self.write_word(addr, u32::from_le_bytes(word))?;
        }

        Ok(())
    }

    /// Halts the target core by writing DHCSR through the memory bus.
    ///
    /// Must be done before touching the flash controller - a running core
    /// racing the programmer over the flash bus ends badly.
    pub fn halt_core(&mut self) -> Result<(), SwdError> {
        debug!("Exec:  Halt core");
        self.write_word(Dhcsr::ADDRESS, Dhcsr::HALT)
    }

    /// Resets the target via the hardware reset line.
    ///
    /// Asserts RST for [`RESET_ASSERT_MS`], releases it, then gives the
    /// target [`RESET_SETTLE_MS`] to boot.  The debug connection does not
    /// survive this; reconnect before further SWD operations.
    pub fn hardware_reset(&mut self) {
        debug!("Exec:  Hardware reset");
        self.protocol.set_rst(false);
        self.protocol.delay_ms(RESET_ASSERT_MS);
        self.protocol.set_rst(true);
        self.protocol.delay_ms(RESET_SETTLE_MS);

        self.reset_internal_state();
    }

    /// Blocking millisecond delay via the underlying pin driver.
    pub fn delay_ms(&mut self, ms: u32) {
        self.protocol.delay_ms(ms);
    }

    /// Returns a mutable reference to the underlying pin driver.
    ///
    /// Useful for pin-level concerns that are no business of the SWD layer,
    /// and for fault injection against the simulated target.
    pub fn pins_mut(&mut self) -> &mut P {
        self.protocol.pins_mut()
    }
}

// Internal functions
impl<P: PinDriver> SwdInterface<P> {
    /// Call to update the DP SELECT register and the cached copy.
    fn update_dp_select(&mut self, select: Select) -> Result<(), SwdError> {
        self.do_write_op(SwdOp::DpWrite(SelectRegister::ADDRESS), select.into(), true)?;

        self.check_dp_errors(false)?;

        self.dp_select = select;

        Ok(())
    }

    fn check_and_update_dp_select(&mut self, op: SwdOp) -> Result<(), SwdError> {
        let addr = match op {
            // The bank-0 DP registers used here never need a SELECT update
            SwdOp::DpRead(_) | SwdOp::DpWrite(_) => return Ok(()),
            SwdOp::ApRead(addr) | SwdOp::ApWrite(addr) => addr,
        };

        if self.dp_select.apsel() == 0 && self.dp_select.covers_ap_addr(addr) {
            return Ok(());
        }

        let mut select = self.dp_select;
        select.set_apsel(0);
        select.set_apbanksel_from_addr(addr);
        trace!("Exec:  Update DP SELECT {select}");
        self.update_dp_select(select)
    }

    fn write_operation(&mut self, op: SwdOp, data: u32, single: bool) -> Result<(), SwdError> {
        if op.requires_power_up() && !self.powered_up {
            return Err(SwdError::NotReady);
        }

        self.check_and_update_dp_select(op)?;

        self.do_write_op(op, data, single)?;

        self.check_dp_errors(false)
    }

    // Handles both DP and AP reads.  AP reads are posted, so take a second
    // transaction against RDBUFF to collect the value.
    fn read_operation(&mut self, op: SwdOp, single: bool) -> Result<u32, SwdError> {
        if op.requires_power_up() && !self.powered_up {
            return Err(SwdError::NotReady);
        }

        self.check_and_update_dp_select(op)?;

        match op {
            SwdOp::DpRead(_) => self.do_read_op(op, single),
            SwdOp::ApRead(_) => {
                // The payload of this transaction is stale - discard it
                let _ = self.do_read_op(op, false)?;

                self.check_dp_errors(true)?;

                // RDBUFF never requires a DP SELECT update
                self.do_read_op(SwdOp::DpRead(RdBuffRegister::ADDRESS), single)
            }
            _ => unreachable!("read operation must be DpRead or ApRead"),
        }
    }

    // Pipelined bulk DRW read: the first transaction primes the posted-read
    // pipe, intermediate words come back one transaction late, and the final
    // word is collected from RDBUFF.
    fn read_drw_bulk(&mut self, buf: &mut [u32]) -> Result<(), SwdError> {
        let drw_op = SwdOp::ApRead(DrwRegister::ADDRESS);
        self.check_and_update_dp_select(drw_op)?;

        let _ = self.do_read_op(drw_op, false)?;

        let count = buf.len();
        for item in buf.iter_mut().take(count - 1) {
            *item = self.do_read_op(drw_op, false)?;
        }

        buf[count - 1] = self.do_read_op(SwdOp::DpRead(RdBuffRegister::ADDRESS), false)?;

        self.check_dp_errors(true)
    }

    fn ensure_csw(&mut self, size: u32, addrinc: u32) -> Result<(), SwdError> {
        let mut want = self.csw.unwrap_or_default();
        want.set_size(size);
        want.set_addrinc(addrinc);

        if self.csw != Some(want) {
            self.write_ap_register(CswRegister, want)?;
            self.csw = Some(want);
        }

        Ok(())
    }

    // Sets TAR and reads it back; a TAR that didn't take means every
    // subsequent access goes to the wrong address, so this is checked for
    // single-word accesses.
    fn set_tar_checked(&mut self, addr: u32) -> Result<(), SwdError> {
        let tar = Tar::from(addr);
        self.write_ap_register(TarRegister, tar)?;

        let readback: Tar = self.read_ap_register(TarRegister)?;
        if readback != tar {
            warn!("TAR readback mismatch: expected {tar}, got {readback}");
            return Err(SwdError::OperationFailed(format!(
                "unexpected tar {readback}"
            )));
        }

        Ok(())
    }

    fn set_abort(&mut self, abort: Abort) -> Result<(), SwdError> {
        let op = SwdOp::DpWrite(AbortRegister::ADDRESS);
        self.do_write_op(op, abort.into(), true)
    }

    // Single non-retrying ABORT transaction, used from the fault path where
    // going back through the retry machinery would recurse.
    fn write_abort_raw(&mut self) {
        let cmd = SwdOp::DpWrite(AbortRegister::ADDRESS).to_cmd();

        self.protocol.set_io_output();
        self.protocol.write_cmd_turnaround(cmd);
        if self.protocol.read_ack().is_ok() {
            self.protocol
                .turnaround_write_u32_parity(Abort::clear_all_errors().into());
            self.protocol.set_io_low();
            self.protocol.clock(POST_SINGLE_OPERATION_CYCLES);
        }
    }

    // Lowest level write operation which actually drives the SWD protocol.
    fn do_write_op(&mut self, op: SwdOp, data: u32, single: bool) -> Result<(), SwdError> {
        let cmd = op.to_cmd();
        trace!("Exec:  {op} SWD: {cmd:#04X} {data:#010X}");

        self.protocol.set_io_output();

        let mut attempt = 0;
        let result = loop {
            self.protocol.write_cmd_turnaround(cmd);

            match self.protocol.read_ack() {
                Ok(()) => {
                    self.protocol.turnaround_write_u32_parity(data);

                    // 2 extra SWCLK cycles are required after the parity bit
                    // before the write is committed
                    self.protocol.set_io_low();
                    self.protocol.clock(2);

                    if single {
                        self.protocol.clock(POST_SINGLE_OPERATION_CYCLES - 2);
                    }

                    break Ok(());
                }
                Err(SwdError::WaitAck) => trace!("Wait:  {op}"), // Retry
                Err(SwdError::FaultAck) => {
                    self.write_abort_raw();
                    break Err(SwdError::FaultAck);
                }
                Err(e) => {
                    self.recover_line();
                    break Err(e);
                }
            }

            attempt += 1;
            if attempt > self.wait_retries {
                break Err(SwdError::WaitAck);
            }
        };

        match &result {
            Ok(()) => trace!("OK:    {op}"),
            Err(e) => debug!("Error: {op} {data:#010X}: {e:?}"),
        }

        result
    }

    // Lowest level read operation which actually drives the SWD protocol.
    fn do_read_op(&mut self, op: SwdOp, single: bool) -> Result<u32, SwdError> {
        let cmd = op.to_cmd();
        trace!("Exec:  {op} SWD: {cmd:#04X}");

        self.protocol.set_io_output();

        let mut attempt = 0;
        let result = loop {
            self.protocol.write_cmd_turnaround(cmd);

            match self.protocol.read_ack() {
                Ok(()) => {
                    // Read data + parity + turnaround (leaves SWDIO ours)
                    let data = match self.protocol.read_u32_parity_turnaround() {
                        Ok(data) => data,
                        Err(e) => break Err(e),
                    };

                    if single {
                        self.protocol.clock(POST_SINGLE_OPERATION_CYCLES);
                    }

                    break Ok(data);
                }
                Err(SwdError::WaitAck) => trace!("Wait:  {op}"), // Retry
                Err(SwdError::FaultAck) => {
                    self.write_abort_raw();
                    break Err(SwdError::FaultAck);
                }
                Err(e) => {
                    self.recover_line();
                    break Err(e);
                }
            }

            attempt += 1;
            if attempt > self.wait_retries {
                break Err(SwdError::WaitAck);
            }
        };

        match &result {
            Ok(data) => trace!("OK:    {op}            {data:#010X}"),
            Err(e) => debug!("Error: {op}  {e:?}"),
        }

        result
    }

    // A protocol-level failure leaves the line in an unknown state; force
    // it back to a known one.  The connection state is gone either way.
    fn recover_line(&mut self) {
        self.protocol.line_reset();
        self.powered_up = false;
        self.dp_select = Select::default();
        self.csw = None;
    }
}

/// SWD operations
///
/// Each operation carries the register address as a u8 (0x0, 0x4, etc).
///
/// Request byte format, transmitted LSB first:
/// Bit 0: Start (1)
/// Bit 1: APnDP (0=DP, 1=AP)
/// Bit 2: RnW (0=write, 1=read)
/// Bit 3: A2 (address bit 2)
/// Bit 4: A3 (address bit 3)
/// Bit 5: Parity over bits 1-4
/// Bit 6: Stop (0)
/// Bit 7: Park (1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwdOp {
    DpRead(u8),
    DpWrite(u8),
    ApRead(u8),
    ApWrite(u8),
}

impl SwdOp {
    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_cmd(&self) -> u8 {
        let (base, addr) = match self {
            // start=1, APnDP=0, RnW=1, park=1
            SwdOp::DpRead(a) => (0x85, a),
            // start=1, APnDP=0, RnW=0, park=1
            SwdOp::DpWrite(a) => (0x81, a),
            // start=1, APnDP=1, RnW=1, park=1
            SwdOp::ApRead(a) => (0x87, a),
            // start=1, APnDP=1, RnW=0, park=1
            SwdOp::ApWrite(a) => (0x83, a),
        };

        let cmd = base | ((addr & 0x0C) << 1); // A[3:2] to bits 4:3
        Self::add_parity(cmd)
    }

    fn add_parity(cmd: u8) -> u8 {
        // Parity covers APnDP, RnW and A[2:3] - bits 1 to 4 here
        let parity_bits = cmd & 0x1E;
        let parity = calculate_parity(parity_bits) as u8;
        cmd | (parity << 5)
    }

    /// Whether this operation requires the debug domain to be powered up.
    pub(crate) fn requires_power_up(&self) -> bool {
        match self {
            SwdOp::DpRead(_) | SwdOp::DpWrite(_) => false,
            SwdOp::ApRead(_) | SwdOp::ApWrite(_) => true,
        }
    }
}

impl fmt::Display for SwdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdOp::DpRead(a) => write!(f, "DP Read 0x{a:02X}"),
            SwdOp::DpWrite(a) => write!(f, "DP Write 0x{a:02X}"),
            SwdOp::ApRead(a) => write!(f, "AP Read 0x{a:02X}"),
            SwdOp::ApWrite(a) => write!(f, "AP Write 0x{a:02X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_encoding() {
        // IDCODE read: start, RnW, park, even parity over [APnDP, RnW, A2, A3]
        assert_eq!(SwdOp::DpRead(0x00).to_cmd(), 0xA5);
        // CTRL/STAT write
        assert_eq!(SwdOp::DpWrite(0x04).to_cmd(), 0xA9);
        // DRW read
        assert_eq!(SwdOp::ApRead(0x0C).to_cmd(), 0x9F);
        // TAR write
        assert_eq!(SwdOp::ApWrite(0x04).to_cmd(), 0x8B);
    }

    #[test]
    fn request_parity_is_even() {
        for op in [
            SwdOp::DpRead(0x00),
            SwdOp::DpRead(0x0C),
            SwdOp::DpWrite(0x08),
            SwdOp::ApRead(0x00),
            SwdOp::ApRead(0xFC),
            SwdOp::ApWrite(0x0C),
        ] {
            let cmd = op.to_cmd();
            // Parity bit plus the four covered bits always sum even
            assert!(!calculate_parity(cmd & 0x3E), "odd parity for {op}");
            // Start and park set, stop clear
            assert_eq!(cmd & 0x01, 0x01);
            assert_eq!(cmd & 0x40, 0x00);
            assert_eq!(cmd & 0x80, 0x80);
        }
    }
}
