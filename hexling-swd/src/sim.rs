// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Simulated SWD target
//!
//! A [`PinDriver`] implementation that behaves like an ARM debug port on
//! the other end of the wire: it decodes the bit-banged SWD protocol edge
//! by edge, models the DP/AP register file and a MEM-AP over a sparse
//! memory, and emulates the family flash controllers.
//!
//! This exists so the entire stack - protocol framing, posted AP reads,
//! bank selection, flash sequencing - can be exercised on a host with no
//! hardware attached.  It is deliberately strict: requests with bad parity
//! or framing are ignored, exactly as a real DP would not respond to them.
//!
//! Fault injection hooks ([`SimTarget::set_wait_responses`],
//! [`SimTarget::set_fault_responses`], [`SimTarget::corrupt_next_read`])
//! allow the retry and error paths to be driven deterministically.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use embedded_hal::delay::DelayNs;

use hexling_core::flash::{
    FLASH_BASE, FlashBank, Stm32F1FlashCr, Stm32F1FlashKeyr, Stm32F1FlashSr, Stm32F4FlashCr,
    Stm32F4FlashSr,
};

use crate::pins::{IoDir, PinDriver};

// Simulated flash array size
const FLASH_SIZE: u32 = 0x0010_0000;

// ACK values as they appear on the wire, LSB first
const ACK_OK: u8 = 0b001;
const ACK_WAIT: u8 = 0b010;
const ACK_FAULT: u8 = 0b100;

#[derive(Debug, Clone, Copy)]
struct Request {
    ap: bool,
    read: bool,
    addr: u8,
}

/// Simulated SWD target
///
/// Construct with [`SimTarget::new`] for a bare debug port, or
/// [`SimTarget::with_bank`] to attach a family flash controller, then hand
/// it to [`SwdInterface::from_pins`](crate::interface::SwdInterface::from_pins).
#[derive(Debug)]
pub struct SimTarget {
    // Pin state
    clk: bool,
    io_dir: IoDir,
    host_level: bool,
    drive_level: bool,
    rst: bool,

    // Bit machine
    ones_run: u32,
    collecting: bool,
    req_bits: u8,
    req_count: u8,
    out_queue: VecDeque<bool>,
    pending_write: Option<Request>,
    write_bits: u64,
    write_count: u8,

    // Fault injection
    wait_responses: u32,
    fault_responses: u32,
    corrupt_read: bool,
    refuse_unlock: bool,

    // DP state
    idcode: u32,
    ctrl_stat_req: u32,
    sticky_err: bool,
    select: u32,
    posted: u32,

    // MEM-AP state
    csw: u32,
    tar: u32,
    idr: u32,

    // Sparse memories: word address -> word.  Absent flash words read as
    // erased.
    mem: BTreeMap<u32, u32>,
    flash: BTreeMap<u32, u32>,

    // Flash controller state
    bank: Option<FlashBank>,
    flash_unlocked: bool,
    key_stage: u8,
    flash_cr: u32,
    flash_sr: u32,
    flash_ar: u32,

    // Observed activity, for test assertions
    line_resets: u32,
    hw_resets: u32,
    erase_all_count: u32,
}

impl SimTarget {
    /// Create a target with the given IDCODE and no flash controller.
    pub fn new(idcode: u32) -> Self {
        Self {
            clk: false,
            io_dir: IoDir::Input,
            host_level: false,
            drive_level: true,
            rst: true,
            ones_run: 0,
            collecting: false,
            req_bits: 0,
            req_count: 0,
            out_queue: VecDeque::new(),
            pending_write: None,
            write_bits: 0,
            write_count: 0,
            wait_responses: 0,
            fault_responses: 0,
            corrupt_read: false,
            refuse_unlock: false,
            idcode,
            ctrl_stat_req: 0,
            sticky_err: false,
            select: 0,
            posted: 0,
            csw: 0,
            tar: 0,
            idr: 0x2477_0011,
            mem: BTreeMap::new(),
            flash: BTreeMap::new(),
            bank: None,
            flash_unlocked: false,
            key_stage: 0,
            flash_cr: 0,
            flash_sr: 0,
            flash_ar: 0,
            line_resets: 0,
            hw_resets: 0,
            erase_all_count: 0,
        }
    }

    /// Create a target with an attached family flash controller.
    pub fn with_bank(idcode: u32, bank: FlashBank) -> Self {
        let mut sim = Self::new(idcode);
        sim.bank = Some(bank);
        sim
    }

    /// Answer the next `n` transactions with WAIT.
    pub fn set_wait_responses(&mut self, n: u32) {
        self.wait_responses = n;
    }

    /// Answer the next `n` transactions with FAULT.
    pub fn set_fault_responses(&mut self, n: u32) {
        self.fault_responses = n;
    }

    /// Flip one data bit in the next read payload, without adjusting the
    /// transmitted parity.
    pub fn corrupt_next_read(&mut self) {
        self.corrupt_read = true;
    }

    /// Ignore the unlock key sequence, as a write-protected part would.
    pub fn set_refuse_unlock(&mut self) {
        self.refuse_unlock = true;
    }

    /// Number of line resets observed.
    pub fn line_resets(&self) -> u32 {
        self.line_resets
    }

    /// Number of hardware reset assertions observed.
    pub fn hw_resets(&self) -> u32 {
        self.hw_resets
    }

    /// Number of mass erases performed.
    pub fn erase_all_count(&self) -> u32 {
        self.erase_all_count
    }

    /// Whether the flash controller is currently unlocked.
    pub fn flash_unlocked(&self) -> bool {
        self.flash_unlocked
    }

    /// Read back a word of ordinary (non-flash) memory.
    pub fn mem_word(&self, addr: u32) -> u32 {
        *self.mem.get(&(addr & !3)).unwrap_or(&0)
    }

    /// Pre-load a word of ordinary memory.
    pub fn set_mem_word(&mut self, addr: u32, value: u32) {
        self.mem.insert(addr & !3, value);
    }

    /// Pre-load flash contents, bypassing the controller.
    pub fn preload_flash_word(&mut self, addr: u32, value: u32) {
        self.flash.insert(addr & !3, value);
    }

    /// Read back the flash array, erased cells reading as 0xFF.
    pub fn flash_bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for ii in 0..len {
            let byte_addr = addr + ii as u32;
            let word = *self.flash.get(&(byte_addr & !3)).unwrap_or(&0xFFFF_FFFF);
            out.push(word.to_le_bytes()[(byte_addr & 3) as usize]);
        }
        out
    }

    /// Number of programmed (non-erased) flash words.
    pub fn programmed_words(&self) -> usize {
        self.flash.len()
    }

    // --- bit machine ------------------------------------------------------

    fn rising_edge(&mut self) {
        if self.io_dir == IoDir::Output {
            let bit = self.host_level;
            self.host_bit(bit);
        }
    }

    fn falling_edge(&mut self) {
        if self.io_dir == IoDir::Input {
            self.drive_level = self.out_queue.pop_front().unwrap_or(true);
        }
    }

    fn host_bit(&mut self, bit: bool) {
        // 50+ high bits are a line reset, whatever else is in flight
        if bit {
            self.ones_run += 1;
            if self.ones_run == 50 {
                self.line_reset();
                return;
            }
        } else {
            self.ones_run = 0;
        }

        if self.pending_write.is_some() {
            self.collect_write_bit(bit);
            return;
        }

        if !self.collecting {
            // Low bits between transactions are idle; a high bit is a start
            // bit
            if bit {
                self.collecting = true;
                self.req_bits = 1;
                self.req_count = 1;
            }
            return;
        }

        if bit {
            self.req_bits |= 1 << self.req_count;
        }
        self.req_count += 1;
        if self.req_count == 8 {
            self.collecting = false;
            self.process_request();
        }
    }

    fn line_reset(&mut self) {
        self.collecting = false;
        self.req_count = 0;
        self.pending_write = None;
        self.out_queue.clear();
        self.select = 0;
        self.posted = 0;
        self.line_resets += 1;
    }

    fn collect_write_bit(&mut self, bit: bool) {
        if bit {
            self.write_bits |= 1 << self.write_count;
        }
        self.write_count += 1;
        if self.write_count == 33 {
            let req = self.pending_write.take().unwrap_or(Request {
                ap: false,
                read: false,
                addr: 0,
            });
            let data = (self.write_bits & 0xFFFF_FFFF) as u32;
            let parity = (self.write_bits >> 32) & 1 == 1;

            // Bad write parity would set WDATAERR on real hardware; the
            // host side always sends good parity, so just drop it
            if parity == (data.count_ones() % 2 == 1) {
                self.write_reg(req, data);
            }
        }
    }

    fn process_request(&mut self) {
        let bits = self.req_bits;

        let start = bits & 0x01 != 0;
        let ap = bits & 0x02 != 0;
        let read = bits & 0x04 != 0;
        let a2 = bits & 0x08 != 0;
        let a3 = bits & 0x10 != 0;
        let parity = bits & 0x20 != 0;
        let stop = bits & 0x40 != 0;
        let park = bits & 0x80 != 0;

        // A malformed request gets no response at all
        let parity_ok = parity == (((bits & 0x1E).count_ones() % 2) == 1);
        if !start || stop || !park || !parity_ok {
            return;
        }

        let req = Request {
            ap,
            read,
            addr: (a2 as u8) << 2 | (a3 as u8) << 3,
        };

        if self.wait_responses > 0 {
            self.wait_responses -= 1;
            self.queue_ack(ACK_WAIT);
            return;
        }
        if self.fault_responses > 0 {
            self.fault_responses -= 1;
            self.sticky_err = true;
            self.queue_ack(ACK_FAULT);
            return;
        }

        self.queue_ack(ACK_OK);
        if req.read {
            let value = self.read_reg(req);
            self.queue_read_payload(value);
        } else {
            self.pending_write = Some(req);
            self.write_bits = 0;
            self.write_count = 0;
        }
    }

    fn queue_ack(&mut self, ack: u8) {
        self.out_queue.clear();
        for ii in 0..3 {
            self.out_queue.push_back((ack >> ii) & 1 == 1);
        }
    }

    fn queue_read_payload(&mut self, value: u32) {
        let corrupted = if self.corrupt_read {
            self.corrupt_read = false;
            value ^ 1
        } else {
            value
        };
        for ii in 0..32 {
            self.out_queue.push_back((corrupted >> ii) & 1 == 1);
        }
        // Parity always matches the uncorrupted value
        self.out_queue.push_back(value.count_ones() % 2 == 1);
    }

    // --- register file ----------------------------------------------------

    fn ctrl_stat(&self) -> u32 {
        let mut value = self.ctrl_stat_req & 0x5000_0000;
        if value & (1 << 28) != 0 {
            value |= 1 << 29;
        }
        if value & (1 << 30) != 0 {
            value |= 1 << 31;
        }
        // READOK
        value |= 1 << 6;
        if self.sticky_err {
            value |= 1 << 5;
        }
        value
    }

    fn read_reg(&mut self, req: Request) -> u32 {
        if !req.ap {
            return match req.addr {
                0x0 => self.idcode,
                0x4 => self.ctrl_stat(),
                0x8 => self.select,
                _ => self.posted,
            };
        }

        // AP reads are posted: this transaction returns the previous one's
        // value
        let full_addr = ((self.select >> 4) & 0xF) << 4 | req.addr as u32;
        let fresh = match full_addr {
            0x00 => self.csw,
            0x04 => self.tar,
            0x0C => self.drw_read(),
            0xFC => self.idr,
            _ => 0,
        };
        let stale = self.posted;
        self.posted = fresh;
        stale
    }

    fn write_reg(&mut self, req: Request, value: u32) {
        if !req.ap {
            match req.addr {
                0x0 => {
                    // ABORT: clear sticky flags
                    self.sticky_err = false;
                }
                0x4 => self.ctrl_stat_req = value,
                0x8 => self.select = value,
                _ => {}
            }
            return;
        }

        let full_addr = ((self.select >> 4) & 0xF) << 4 | req.addr as u32;
        match full_addr {
            0x00 => self.csw = value,
            0x04 => self.tar = value,
            0x0C => self.drw_write(value),
            _ => {}
        }
    }

    fn csw_size_bytes(&self) -> u32 {
        match self.csw & 0b111 {
            0b000 => 1,
            0b001 => 2,
            _ => 4,
        }
    }

    fn csw_addrinc_single(&self) -> bool {
        (self.csw >> 4) & 0b11 == 0b01
    }

    fn drw_read(&mut self) -> u32 {
        let value = self.bus_read_word(self.tar & !3);
        if self.csw_addrinc_single() {
            self.tar = self.tar.wrapping_add(self.csw_size_bytes());
        }
        value
    }

    fn drw_write(&mut self, value: u32) {
        match self.csw_size_bytes() {
            2 => {
                let lane_shift = 8 * (self.tar & 2);
                let half = ((value >> lane_shift) & 0xFFFF) as u16;
                self.bus_write_half(self.tar & !1, half);
            }
            4 => self.bus_write_word(self.tar & !3, value),
            _ => {}
        }
        if self.csw_addrinc_single() {
            self.tar = self.tar.wrapping_add(self.csw_size_bytes());
        }
    }

    // --- bus and flash controller ----------------------------------------

    fn in_flash_array(addr: u32) -> bool {
        (FLASH_BASE..FLASH_BASE + FLASH_SIZE).contains(&addr)
    }

    fn bus_read_word(&mut self, addr: u32) -> u32 {
        if let Some(bank) = self.bank {
            let regs = bank.regs();
            if addr == regs.sr {
                return self.flash_sr;
            }
            if addr == regs.cr {
                let lock = if self.flash_unlocked {
                    0
                } else {
                    1 << bank.cr_lock_bit()
                };
                return self.flash_cr | lock;
            }
            if Some(addr) == regs.ar {
                return self.flash_ar;
            }
        }

        if Self::in_flash_array(addr) {
            return *self.flash.get(&addr).unwrap_or(&0xFFFF_FFFF);
        }

        *self.mem.get(&addr).unwrap_or(&0)
    }

    fn bus_write_word(&mut self, addr: u32, value: u32) {
        if let Some(bank) = self.bank {
            let regs = bank.regs();
            if addr == regs.keyr {
                self.keyr_write(bank, value);
                return;
            }
            if addr == regs.cr {
                self.cr_write(bank, value);
                return;
            }
            if addr == regs.sr {
                // Write-1-to-clear flags
                self.flash_sr &= !value;
                return;
            }
            if Some(addr) == regs.ar {
                self.flash_ar = value;
                return;
            }
        }

        if Self::in_flash_array(addr) {
            self.flash_program_word(addr, value);
            return;
        }

        self.mem.insert(addr, value);
    }

    fn bus_write_half(&mut self, addr: u32, half: u16) {
        if Self::in_flash_array(addr) {
            self.flash_program_half(addr, half);
            return;
        }

        let word_addr = addr & !3;
        let shift = 8 * (addr & 2);
        let word = *self.mem.get(&word_addr).unwrap_or(&0);
        let merged = (word & !(0xFFFF << shift)) | ((half as u32) << shift);
        self.mem.insert(word_addr, merged);
    }

    fn keyr_write(&mut self, _bank: FlashBank, value: u32) {
        if self.flash_unlocked || self.refuse_unlock {
            return;
        }
        // KEY1/KEY2 are the same on every supported family
        if value == Stm32F1FlashKeyr::KEY1 && self.key_stage == 0 {
            self.key_stage = 1;
        } else if value == Stm32F1FlashKeyr::KEY2 && self.key_stage == 1 {
            self.key_stage = 0;
            self.flash_unlocked = true;
        } else {
            self.key_stage = 0;
        }
    }

    fn cr_write(&mut self, bank: FlashBank, value: u32) {
        if !self.flash_unlocked {
            return;
        }

        let lock_bit = 1 << bank.cr_lock_bit();
        if value & lock_bit != 0 {
            self.flash_unlocked = false;
        }
        self.flash_cr = value & !lock_bit;

        let (strt, mer) = match bank {
            FlashBank::F0 | FlashBank::F1 => (
                1 << Stm32F1FlashCr::STRT_BIT,
                1 << Stm32F1FlashCr::MER_BIT,
            ),
            FlashBank::F4 => (
                1 << Stm32F4FlashCr::STRT_BIT,
                1 << Stm32F4FlashCr::MER_BIT,
            ),
        };

        if value & strt == 0 {
            return;
        }

        if value & mer != 0 {
            self.flash.clear();
            self.erase_all_count += 1;
            return;
        }

        match bank {
            FlashBank::F0 | FlashBank::F1 => {
                if value & (1 << Stm32F1FlashCr::PER_BIT) != 0 {
                    let page_size = bank.page_size().unwrap_or(1024);
                    let page = self.flash_ar & !(page_size - 1);
                    self.erase_flash_range(page, page_size);
                }
            }
            FlashBank::F4 => {
                if value & (1 << Stm32F4FlashCr::SER_BIT) != 0 {
                    let snb = ((value >> Stm32F4FlashCr::SNB_SHIFT) & Stm32F4FlashCr::SNB_MASK)
                        as usize;
                    let mut base = FLASH_BASE;
                    for (ii, &size) in FlashBank::F4_SECTOR_SIZES.iter().enumerate() {
                        if ii == snb {
                            self.erase_flash_range(base, size);
                            break;
                        }
                        base += size;
                    }
                }
            }
        }
    }

    fn erase_flash_range(&mut self, base: u32, len: u32) {
        let keys: Vec<u32> = self
            .flash
            .range(base..base + len)
            .map(|(addr, _)| *addr)
            .collect();
        for key in keys {
            self.flash.remove(&key);
        }
    }

    fn pg_enabled(&self, bank: FlashBank) -> bool {
        let pg = match bank {
            FlashBank::F0 | FlashBank::F1 => 1 << Stm32F1FlashCr::PG_BIT,
            FlashBank::F4 => 1 << Stm32F4FlashCr::PG_BIT,
        };
        self.flash_unlocked && self.flash_cr & pg != 0
    }

    fn flash_write_protect_flag(bank: FlashBank) -> u32 {
        match bank {
            FlashBank::F0 | FlashBank::F1 => 1 << Stm32F1FlashSr::WRPRTERR_BIT,
            FlashBank::F4 => 1 << Stm32F4FlashSr::WRPERR_BIT,
        }
    }

    fn flash_prog_error_flag(bank: FlashBank) -> u32 {
        match bank {
            FlashBank::F0 | FlashBank::F1 => 1 << Stm32F1FlashSr::PGERR_BIT,
            FlashBank::F4 => 1 << Stm32F4FlashSr::PGSERR_BIT,
        }
    }

    fn flash_program_half(&mut self, addr: u32, half: u16) {
        let Some(bank) = self.bank else { return };
        if !self.pg_enabled(bank) {
            self.flash_sr |= Self::flash_write_protect_flag(bank);
            return;
        }

        let word_addr = addr & !3;
        let shift = 8 * (addr & 2);
        let word = *self.flash.get(&word_addr).unwrap_or(&0xFFFF_FFFF);
        let existing = ((word >> shift) & 0xFFFF) as u16;

        // Programming can only clear bits; a non-erased cell is an error
        if existing != 0xFFFF {
            self.flash_sr |= Self::flash_prog_error_flag(bank);
            return;
        }

        let merged = (word & !(0xFFFF << shift)) | ((half as u32) << shift);
        self.flash.insert(word_addr, merged);
    }

    fn flash_program_word(&mut self, addr: u32, value: u32) {
        let Some(bank) = self.bank else { return };
        if !self.pg_enabled(bank) {
            self.flash_sr |= Self::flash_write_protect_flag(bank);
            return;
        }

        let existing = *self.flash.get(&addr).unwrap_or(&0xFFFF_FFFF);
        if existing != 0xFFFF_FFFF {
            self.flash_sr |= Self::flash_prog_error_flag(bank);
            return;
        }

        self.flash.insert(addr, value);
    }
}

impl DelayNs for SimTarget {
    fn delay_ns(&mut self, _ns: u32) {}
}

impl PinDriver for SimTarget {
    fn set_clk(&mut self, level: bool) {
        if level == self.clk {
            return;
        }
        self.clk = level;
        if level {
            self.rising_edge();
        } else {
            self.falling_edge();
        }
    }

    fn set_io(&mut self, level: bool) {
        self.host_level = level;
    }

    fn read_io(&mut self) -> bool {
        self.drive_level
    }

    fn set_io_dir(&mut self, dir: IoDir) {
        self.io_dir = dir;
    }

    fn set_rst(&mut self, level: bool) {
        if !level && self.rst {
            self.hw_resets += 1;
        }
        self.rst = level;
    }

    fn tick(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SwdError;
    use crate::interface::SwdInterface;
    use hexling_core::McuFamily;
    use hexling_core::arm::Dhcsr;

    fn connect_m3() -> SwdInterface<SimTarget> {
        let sim = SimTarget::new(0x4BA0_0477);
        let mut swd = SwdInterface::from_pins(sim);
        assert_eq!(swd.connect(), Ok(McuFamily::CortexM3));
        swd
    }

    #[test]
    fn connect_identifies_family() {
        let swd = connect_m3();
        assert_eq!(swd.idcode().map(|id| id.data()), Some(0x4BA0_0477));
        assert_eq!(swd.family(), Some(McuFamily::CortexM3));
    }

    #[test]
    fn connect_rejects_dead_line() {
        for dead in [0x0000_0000u32, 0xFFFF_FFFF] {
            let sim = SimTarget::new(dead);
            let mut swd = SwdInterface::from_pins(sim);
            assert!(matches!(
                swd.connect(),
                Err(SwdError::OperationFailed(_))
            ));
        }
    }

    #[test]
    fn memory_round_trip() {
        let mut swd = connect_m3();

        swd.write_word(0x2000_0000, 0xDEAD_BEEF).unwrap();
        assert_eq!(swd.read_word(0x2000_0000), Ok(0xDEAD_BEEF));
    }

    #[test]
    fn bulk_read_crosses_window_boundary() {
        let mut swd = connect_m3();

        // Straddle the 1 KiB auto-increment window
        let base = 0x2000_03F8;
        for ii in 0..8u32 {
            swd.write_word(base + ii * 4, 0x1111_0000 + ii).unwrap();
        }

        let mut words = [0u32; 8];
        swd.read_words(base, &mut words).unwrap();
        for (ii, &word) in words.iter().enumerate() {
            assert_eq!(word, 0x1111_0000 + ii as u32);
        }
    }

    #[test]
    fn byte_access_handles_partial_words() {
        let mut swd = connect_m3();

        swd.write_word(0x2000_0000, 0x4433_2211).unwrap();
        swd.write_word(0x2000_0004, 0x8877_6655).unwrap();

        let mut bytes = [0u8; 5];
        swd.read_bytes(0x2000_0002, &mut bytes).unwrap();
        assert_eq!(bytes, [0x33, 0x44, 0x55, 0x66, 0x77]);

        // Unaligned write must preserve its neighbours
        swd.write_bytes(0x2000_0001, &[0xAA, 0xBB]).unwrap();
        assert_eq!(swd.read_word(0x2000_0000), Ok(0x44BB_AA11));
    }

    #[test]
    fn halt_core_writes_dhcsr() {
        let mut swd = connect_m3();
        swd.halt_core().unwrap();

        // Reach into the sim to confirm the wire write happened
        let value = swd.read_word(Dhcsr::ADDRESS).unwrap();
        assert_eq!(value, Dhcsr::HALT);
    }

    #[test]
    fn wait_acks_are_retried() {
        let mut sim = SimTarget::new(0x4BA0_0477);
        sim.set_wait_responses(10);
        let mut swd = SwdInterface::from_pins(sim);

        assert!(swd.connect().is_ok());
    }

    #[test]
    fn wait_retry_bound() {
        // More waits than the retry budget: the transaction surfaces
        // WaitAck
        let mut sim = SimTarget::new(0x4BA0_0477);
        sim.set_wait_responses(1000);
        let mut swd = SwdInterface::from_pins(sim);

        assert_eq!(swd.connect(), Err(SwdError::WaitAck));
    }

    #[test]
    fn fault_ack_surfaces_after_abort() {
        let mut swd = connect_m3();

        swd.pins_mut().set_fault_responses(1);
        assert_eq!(
            swd.write_word(0x2000_0000, 1).unwrap_err(),
            SwdError::FaultAck
        );

        // The fault path wrote ABORT, clearing the sticky flags, so the
        // next operation goes through cleanly
        assert!(swd.write_word(0x2000_0000, 2).is_ok());
        assert_eq!(swd.read_word(0x2000_0000), Ok(2));
    }

    #[test]
    fn corrupted_read_detected_by_parity() {
        let mut swd = connect_m3();

        swd.pins_mut().corrupt_next_read();
        assert_eq!(
            swd.read_word(0x2000_0000).unwrap_err(),
            SwdError::ReadParity
        );
    }
}
