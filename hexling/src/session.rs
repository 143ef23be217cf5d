// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Programming session orchestration
//!
//! One call into [`run`] takes a path and either flashes the target or
//! reports why not:
//!
//! 1. connect over SWD and identify the MCU family
//! 2. power up the debug domain and halt the core
//! 3. unlock and mass-erase the flash
//! 4. stream the HEX file into the flash programmer
//! 5. rewind the file and stream it again against a verifying readback
//! 6. lock the flash and hardware-reset the target into the new firmware
//!
//! Failures classify by phase, not by underlying error: whatever breaks
//! between unlock and the verify pass is a programming failure, whatever
//! breaks during verification is a verification failure.  On any failure
//! the flash lock and the target reset still happen, best effort, so the
//! target is never left unlocked and halted.

#[allow(unused_imports)]
use log::{debug, info, trace, warn};

use hexling_swd::SwdError;
use hexling_swd::flash::TargetFlash;
use hexling_swd::interface::SwdInterface;
use hexling_swd::pins::PinDriver;

use crate::config::{SECTOR_SIZE, WRITE_UNIT_SIZE};
use crate::error::ErrorKind;
use crate::hex::{Assembler, StreamError, WriteSink};
use crate::storage::Storage;

/// Sink that programs each assembled unit into flash
struct ProgramSink<'a, 'swd, P: PinDriver> {
    flash: &'a mut TargetFlash<'swd, P>,
}

impl<P: PinDriver> WriteSink for ProgramSink<'_, '_, P> {
    type Error = SwdError;

    fn emit(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        self.flash.program(addr, data)
    }
}

/// Sink that compares each assembled unit against flash
struct VerifySink<'a, 'swd, P: PinDriver> {
    flash: &'a mut TargetFlash<'swd, P>,
}

impl<P: PinDriver> WriteSink for VerifySink<'_, '_, P> {
    type Error = SwdError;

    fn emit(&mut self, addr: u32, data: &[u8]) -> Result<(), SwdError> {
        self.flash.verify(addr, data)
    }
}

/// Run one complete programming session for the file at `path`.
///
/// The result maps directly to a console response via
/// [`response_for`](crate::command::response_for).
pub fn run<P, S>(swd: &mut SwdInterface<P>, storage: &mut S, path: &str) -> Result<(), ErrorKind>
where
    P: PinDriver,
    S: Storage,
{
    info!("Programming session: {path}");

    let mut handle = storage.open(path).map_err(ErrorKind::from)?;
    let result = program_target(swd, storage, &mut handle);
    storage.close(handle);

    match &result {
        Ok(()) => info!("Programming session complete"),
        Err(kind) => warn!("Programming session failed: {kind}"),
    }

    result
}

fn program_target<P, S>(
    swd: &mut SwdInterface<P>,
    storage: &mut S,
    handle: &mut S::Handle,
) -> Result<(), ErrorKind>
where
    P: PinDriver,
    S: Storage,
{
    // Connect, identify, and refuse targets we have no flash driver for
    let family = swd.connect().map_err(|e| {
        warn!("Connect failed: {e}");
        ErrorKind::TargetConnect
    })?;
    let bank = family.flash_bank().ok_or_else(|| {
        warn!("Unsupported target: {family}");
        ErrorKind::TargetConnect
    })?;
    debug!("Connected: {family}, {bank}");

    // A running core racing us over the flash bus would corrupt the
    // programming sequence
    swd.halt_core().map_err(|e| {
        warn!("Halt failed: {e}");
        ErrorKind::TargetConnect
    })?;

    let mut flash = TargetFlash::new(swd, bank);
    let result = flash_passes(&mut flash, storage, handle);

    // Best effort regardless of how the passes went: never leave the
    // flash unlocked or the target halted
    let _ = flash.lock();
    drop(flash);
    swd.hardware_reset();

    result
}

fn flash_passes<P, S>(
    flash: &mut TargetFlash<'_, P>,
    storage: &mut S,
    handle: &mut S::Handle,
) -> Result<(), ErrorKind>
where
    P: PinDriver,
    S: Storage,
{
    flash.unlock().map_err(|e| {
        warn!("Unlock failed: {e}");
        ErrorKind::ProgramFail
    })?;
    flash.erase_all().map_err(|e| {
        warn!("Erase failed: {e}");
        ErrorKind::ProgramFail
    })?;

    debug!("Program pass");
    stream_pass(
        storage,
        handle,
        ProgramSink { flash },
        ErrorKind::ProgramFail,
    )?;

    storage.rewind(handle).map_err(ErrorKind::from)?;

    debug!("Verify pass");
    stream_pass(
        storage,
        handle,
        VerifySink { flash },
        ErrorKind::VerifyFail,
    )?;

    Ok(())
}

// Streams the whole file through the assembler into the given sink.  The
// same routine runs both passes; only the sink and the failure
// classification differ.
fn stream_pass<S, K>(
    storage: &mut S,
    handle: &mut S::Handle,
    mut sink: K,
    sink_failure: ErrorKind,
) -> Result<(), ErrorKind>
where
    S: Storage,
    K: WriteSink<Error = SwdError>,
{
    let mut assembler: Assembler<WRITE_UNIT_SIZE> = Assembler::new();
    let mut buf = [0u8; SECTOR_SIZE];

    while !assembler.is_complete() {
        let count = storage.read_sector(handle, &mut buf).map_err(ErrorKind::from)?;
        if count == 0 {
            break;
        }

        assembler
            .push_chunk(&buf[..count], &mut sink)
            .map_err(|e| classify(e, sink_failure))?;
    }

    assembler
        .finish(&mut sink)
        .map_err(|e| classify(e, sink_failure))
}

fn classify(error: StreamError<SwdError>, sink_failure: ErrorKind) -> ErrorKind {
    match error {
        StreamError::Hex(e) => {
            warn!("Image rejected: {e}");
            ErrorKind::HexParse
        }
        StreamError::Sink(e) => {
            warn!("Flash pass failed: {e}");
            sink_failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::testutil::build_line;
    use crate::storage::testutil::MemStorage;
    use hexling_core::flash::{FLASH_BASE, FlashBank};
    use hexling_swd::sim::SimTarget;
    use alloc::string::{String, ToString};
    use alloc::vec;
    use alloc::vec::Vec;

    const IDCODE_M3: u32 = 0x4BA0_0477;

    fn image(lines: &[String]) -> Vec<u8> {
        let mut out = Vec::new();
        for line in lines {
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    fn simple_image() -> Vec<u8> {
        image(&[
            build_line(0x0000, 0x04, &[0x08, 0x00]),
            build_line(0x0000, 0x00, &[0xDE, 0xAD, 0xBE, 0xEF]),
            build_line(0x0200, 0x00, &[0x11, 0x22, 0x33, 0x44]),
            build_line(0x0000, 0x01, &[]),
        ])
    }

    fn storage_with(path: &str, contents: Vec<u8>) -> MemStorage {
        MemStorage::new(vec![(path.to_string(), contents)])
    }

    #[test]
    fn programs_and_verifies_an_image() {
        let sim = SimTarget::with_bank(IDCODE_M3, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        let mut storage = storage_with("app.hex", simple_image());

        assert_eq!(run(&mut swd, &mut storage, "app.hex"), Ok(()));

        let pins = swd.pins_mut();
        assert_eq!(
            pins.flash_bytes(FLASH_BASE, 4),
            [0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert_eq!(
            pins.flash_bytes(FLASH_BASE + 0x200, 4),
            [0x11, 0x22, 0x33, 0x44]
        );

        // One mass erase, flash locked again, target hardware-reset
        assert_eq!(pins.erase_all_count(), 1);
        assert!(!pins.flash_unlocked());
        assert_eq!(pins.hw_resets(), 1);
    }

    #[test]
    fn absent_target_fails_before_any_erase() {
        let sim = SimTarget::with_bank(0xFFFF_FFFF, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        let mut storage = storage_with("app.hex", simple_image());

        assert_eq!(
            run(&mut swd, &mut storage, "app.hex"),
            Err(ErrorKind::TargetConnect)
        );
        assert_eq!(swd.pins_mut().erase_all_count(), 0);
    }

    #[test]
    fn unknown_family_is_a_connect_failure() {
        // A real debug port, but not one in the identification table
        let sim = SimTarget::with_bank(0x2BA0_1477, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        let mut storage = storage_with("app.hex", simple_image());

        assert_eq!(
            run(&mut swd, &mut storage, "app.hex"),
            Err(ErrorKind::TargetConnect)
        );
        assert_eq!(swd.pins_mut().erase_all_count(), 0);
    }

    #[test]
    fn missing_file() {
        let sim = SimTarget::with_bank(IDCODE_M3, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        let mut storage = storage_with("app.hex", simple_image());

        assert_eq!(
            run(&mut swd, &mut storage, "other.hex"),
            Err(ErrorKind::FileNotFound)
        );
    }

    #[test]
    fn unmounted_card() {
        let sim = SimTarget::with_bank(IDCODE_M3, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        let mut storage = MemStorage::unmounted();

        assert_eq!(
            run(&mut swd, &mut storage, "app.hex"),
            Err(ErrorKind::SdMount)
        );
    }

    #[test]
    fn corrupt_image_is_a_parse_failure() {
        let mut contents = simple_image();
        // Perturb a data digit mid-image
        let pos = contents.iter().position(|&b| b == b'D').unwrap();
        contents[pos] = b'C';

        let sim = SimTarget::with_bank(IDCODE_M3, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        let mut storage = storage_with("app.hex", contents);

        assert_eq!(
            run(&mut swd, &mut storage, "app.hex"),
            Err(ErrorKind::HexParse)
        );
        // Nothing was programmed, and the flash was re-locked on the way
        // out
        assert_eq!(swd.pins_mut().programmed_words(), 0);
        assert!(!swd.pins_mut().flash_unlocked());
    }

    #[test]
    fn truncated_image_is_a_parse_failure() {
        let contents = image(&[
            build_line(0x0000, 0x04, &[0x08, 0x00]),
            build_line(0x0000, 0x00, &[0xDE, 0xAD]),
        ]);

        let sim = SimTarget::with_bank(IDCODE_M3, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        let mut storage = storage_with("app.hex", contents);

        assert_eq!(
            run(&mut swd, &mut storage, "app.hex"),
            Err(ErrorKind::HexParse)
        );
        assert_eq!(swd.pins_mut().programmed_words(), 0);
    }

    #[test]
    fn refused_unlock_is_a_program_failure() {
        let sim = SimTarget::with_bank(IDCODE_M3, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        swd.pins_mut().set_refuse_unlock();
        let mut storage = storage_with("app.hex", simple_image());

        assert_eq!(
            run(&mut swd, &mut storage, "app.hex"),
            Err(ErrorKind::ProgramFail)
        );
    }

    #[test]
    fn readback_mismatch_is_a_verify_failure() {
        let sim = SimTarget::with_bank(IDCODE_M3, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        let mut storage = storage_with("app.hex", simple_image());
        let mut handle = storage.open("app.hex").unwrap();

        swd.connect().unwrap();
        swd.halt_core().unwrap();
        let mut flash = TargetFlash::new(&mut swd, FlashBank::F1);
        flash.unlock().unwrap();
        flash.erase_all().unwrap();
        stream_pass(
            &mut storage,
            &mut handle,
            ProgramSink { flash: &mut flash },
            ErrorKind::ProgramFail,
        )
        .unwrap();

        // Corrupt one programmed word behind the programmer's back, then
        // run the verify pass
        drop(flash);
        swd.pins_mut().preload_flash_word(FLASH_BASE, 0x0BAD_F00D);

        storage.rewind(&mut handle).unwrap();
        let mut flash = TargetFlash::new(&mut swd, FlashBank::F1);
        let result = stream_pass(
            &mut storage,
            &mut handle,
            VerifySink { flash: &mut flash },
            ErrorKind::VerifyFail,
        );

        assert_eq!(result, Err(ErrorKind::VerifyFail));
    }

    #[test]
    fn on_failure_target_is_still_reset() {
        let sim = SimTarget::with_bank(IDCODE_M3, FlashBank::F1);
        let mut swd = SwdInterface::from_pins(sim);
        swd.pins_mut().set_refuse_unlock();
        let mut storage = storage_with("app.hex", simple_image());

        let _ = run(&mut swd, &mut storage, "app.hex");
        assert_eq!(swd.pins_mut().hw_resets(), 1);
    }

    #[test]
    fn programs_on_an_f4_target() {
        let sim = SimTarget::with_bank(0x4BA0_1477, FlashBank::F4);
        let mut swd = SwdInterface::from_pins(sim);
        let mut storage = storage_with("app.hex", simple_image());

        assert_eq!(run(&mut swd, &mut storage, "app.hex"), Ok(()));
        assert_eq!(
            swd.pins_mut().flash_bytes(FLASH_BASE, 4),
            [0xDE, 0xAD, 0xBE, 0xEF]
        );
    }
}
