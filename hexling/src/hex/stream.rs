// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Intel HEX stream assembly
//!
//! Flash programming wants page-sized, page-aligned writes; HEX files
//! scatter small records in ascending (usually) address order.  The
//! [`Assembler`] sits between the two: it delimits lines out of the raw
//! byte stream, parses each record, tracks the extended linear address,
//! and coalesces data into one fixed-size aligned [write unit](Assembler)
//! which is flushed to a [`WriteSink`] whenever a record lands outside it.
//!
//! Memory use is bounded by one line buffer plus one write unit,
//! regardless of image size.  Unfilled unit positions hold 0xFF, the
//! erased-flash value, so flushing a sparse unit never corrupts the gaps.

use heapless::Vec;
#[allow(unused_imports)]
use log::{debug, trace, warn};

use super::record::{Record, RecordType};
use super::HexError;
use crate::config::HEX_LINE_MAX_LEN;

/// Destination for assembled write units
///
/// Two implementations matter in practice: one that programs flash and one
/// that verifies it.  Keeping the sink abstract keeps flash-driver details
/// out of the parser.
pub trait WriteSink {
    type Error;

    /// Accept one unit's worth of bytes at an absolute target address
    fn emit(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;
}

/// An assembly failure: either the image is bad, or the sink refused a
/// unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError<E> {
    /// The image itself is invalid
    Hex(HexError),

    /// The sink reported a failure for an emitted unit
    Sink(E),
}

impl<E> From<HexError> for StreamError<E> {
    fn from(error: HexError) -> Self {
        StreamError::Hex(error)
    }
}

/// Streaming HEX-to-write-unit assembler
///
/// `U` is the write unit size in bytes and must be a power of two; 512
/// matches both the storage sector size and the smallest flash page in
/// play.  Construct one per pass, feed it the raw file bytes, and call
/// [`finish`](Self::finish) at end of stream.
#[derive(Debug)]
pub struct Assembler<const U: usize> {
    line: Vec<u8, HEX_LINE_MAX_LEN>,
    line_overflow: bool,
    extended_high: u32,
    base: u32,
    bytes: [u8; U],
    valid_len: usize,
    complete: bool,
}

impl<const U: usize> Default for Assembler<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const U: usize> Assembler<U> {
    pub fn new() -> Self {
        assert!(U.is_power_of_two(), "write unit size must be a power of two");

        Self {
            line: Vec::new(),
            line_overflow: false,
            extended_high: 0,
            base: 0,
            bytes: [0xFF; U],
            valid_len: 0,
            complete: false,
        }
    }

    /// Whether the EOF record has been seen.  Once it has, the remainder
    /// of the stream is irrelevant and the caller can stop reading.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Feed one byte of the raw file stream.
    ///
    /// Lines are delimited on CR, LF or CRLF; empty lines are skipped.
    pub fn push<S: WriteSink>(
        &mut self,
        byte: u8,
        sink: &mut S,
    ) -> Result<(), StreamError<S::Error>> {
        if self.complete {
            return Ok(());
        }

        match byte {
            b'\r' | b'\n' => self.end_of_line(sink),
            other => {
                if self.line.push(other).is_err() {
                    self.line_overflow = true;
                }
                Ok(())
            }
        }
    }

    /// Feed a chunk of the raw file stream.
    pub fn push_chunk<S: WriteSink>(
        &mut self,
        chunk: &[u8],
        sink: &mut S,
    ) -> Result<(), StreamError<S::Error>> {
        for &byte in chunk {
            self.push(byte, sink)?;
            if self.complete {
                break;
            }
        }
        Ok(())
    }

    /// Signal end of stream.
    ///
    /// A final line without a terminator is processed first.  A stream
    /// that never carried an EOF record is a truncated image, and nothing
    /// half-assembled is flushed for it.
    pub fn finish<S: WriteSink>(&mut self, sink: &mut S) -> Result<(), StreamError<S::Error>> {
        if !self.complete && !self.line.is_empty() {
            self.end_of_line(sink)?;
        }

        if self.complete {
            Ok(())
        } else {
            Err(HexError::TruncatedStream.into())
        }
    }

    fn end_of_line<S: WriteSink>(&mut self, sink: &mut S) -> Result<(), StreamError<S::Error>> {
        if self.line_overflow {
            self.line.clear();
            self.line_overflow = false;
            return Err(HexError::LineTooLong.into());
        }
        if self.line.is_empty() {
            return Ok(());
        }

        let record = Record::parse(&self.line)?;
        self.line.clear();

        match record.record_type() {
            RecordType::Data => {
                let abs = self.extended_high | record.address() as u32;
                self.data_record(abs, record.data(), sink)
            }
            RecordType::ExtLinearAddr => {
                let data = record.data();
                if data.len() != 2 {
                    return Err(HexError::BadExtAddress.into());
                }
                self.extended_high = (data[0] as u32) << 24 | (data[1] as u32) << 16;
                trace!("Extended address 0x{:08X}", self.extended_high);
                Ok(())
            }
            RecordType::StartLinearAddr => Ok(()),
            RecordType::Eof => {
                self.flush(sink)?;
                self.complete = true;
                Ok(())
            }
        }
    }

    fn data_record<S: WriteSink>(
        &mut self,
        addr: u32,
        data: &[u8],
        sink: &mut S,
    ) -> Result<(), StreamError<S::Error>> {
        let mask = !(U as u32 - 1);
        let mut addr = addr;
        let mut data = data;

        while !data.is_empty() {
            if self.valid_len == 0 {
                self.base = addr & mask;
                self.bytes.fill(0xFF);
            }

            if addr < self.base || addr >= self.base + U as u32 {
                // Record lands outside the unit being filled: flush it and
                // start a fresh one
                self.flush(sink)?;
                continue;
            }

            let offset = (addr - self.base) as usize;
            let take = data.len().min(U - offset);
            self.bytes[offset..offset + take].copy_from_slice(&data[..take]);
            self.valid_len = self.valid_len.max(offset + take);

            if take == data.len() {
                break;
            }

            // Record straddles the unit boundary: the prefix filled this
            // unit, the suffix continues in the next
            self.flush(sink)?;
            addr += take as u32;
            data = &data[take..];
        }

        Ok(())
    }

    fn flush<S: WriteSink>(&mut self, sink: &mut S) -> Result<(), StreamError<S::Error>> {
        if self.valid_len == 0 {
            return Ok(());
        }

        trace!("Flush unit 0x{:08X} +{}", self.base, self.valid_len);
        sink.emit(self.base, &self.bytes[..self.valid_len])
            .map_err(StreamError::Sink)?;
        self.valid_len = 0;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::testutil::build_line;
    use alloc::string::String;
    use alloc::vec::Vec as AVec;
    use core::convert::Infallible;

    #[derive(Default)]
    struct RecordingSink {
        units: AVec<(u32, AVec<u8>)>,
    }

    impl WriteSink for RecordingSink {
        type Error = Infallible;

        fn emit(&mut self, addr: u32, data: &[u8]) -> Result<(), Infallible> {
            self.units.push((addr, data.to_vec()));
            Ok(())
        }
    }

    struct RefusingSink;

    impl WriteSink for RefusingSink {
        type Error = ();

        fn emit(&mut self, _addr: u32, _data: &[u8]) -> Result<(), ()> {
            Err(())
        }
    }

    fn run<const U: usize>(input: &str) -> Result<AVec<(u32, AVec<u8>)>, StreamError<Infallible>> {
        let mut asm: Assembler<U> = Assembler::new();
        let mut sink = RecordingSink::default();
        asm.push_chunk(input.as_bytes(), &mut sink)?;
        asm.finish(&mut sink)?;
        Ok(sink.units)
    }

    fn image(lines: &[String]) -> String {
        let mut out = String::new();
        for line in lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }

    #[test]
    fn minimal_image() {
        let input = image(&[
            build_line(0x0000, 0x04, &[0x08, 0x00]),
            build_line(0x0000, 0x00, &[0xDE, 0xAD, 0xBE, 0xEF]),
            build_line(0x0000, 0x01, &[]),
        ]);

        let units = run::<512>(&input).unwrap();
        assert_eq!(units.len(), 1);

        let (base, data) = &units[0];
        assert_eq!(*base, 0x0800_0000);
        assert_eq!(data.len(), 4);
        assert_eq!(data.as_slice(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn adjacent_records_coalesce_into_one_unit() {
        let input = image(&[
            build_line(0x0000, 0x04, &[0x08, 0x00]),
            build_line(0x0010, 0x00, &[0xAA, 0xBB]),
            build_line(0x0012, 0x00, &[0xCC, 0xDD]),
            build_line(0x0000, 0x01, &[]),
        ]);

        let units = run::<16>(&input).unwrap();
        assert_eq!(units.len(), 1);

        let (base, data) = &units[0];
        assert_eq!(*base, 0x0800_0010);
        assert_eq!(data.as_slice(), &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn record_crossing_unit_boundary_splits() {
        let input = image(&[
            build_line(0x0000, 0x04, &[0x08, 0x00]),
            build_line(0x000E, 0x00, &[0xD0, 0xD1, 0xD2, 0xD3]),
            build_line(0x0000, 0x01, &[]),
        ]);

        let units = run::<16>(&input).unwrap();
        assert_eq!(units.len(), 2);

        let (base, data) = &units[0];
        assert_eq!(*base, 0x0800_0000);
        assert_eq!(data.len(), 16);
        assert_eq!(&data[..14], &[0xFF; 14]);
        assert_eq!(&data[14..], &[0xD0, 0xD1]);

        let (base, data) = &units[1];
        assert_eq!(*base, 0x0800_0010);
        assert_eq!(data.as_slice(), &[0xD2, 0xD3]);
    }

    #[test]
    fn gap_within_unit_reads_as_erased() {
        let input = image(&[
            build_line(0x0000, 0x00, &[0x11]),
            build_line(0x0004, 0x00, &[0x22]),
            build_line(0x0000, 0x01, &[]),
        ]);

        let units = run::<16>(&input).unwrap();
        assert_eq!(units.len(), 1);

        let (base, data) = &units[0];
        assert_eq!(*base, 0);
        assert_eq!(data.as_slice(), &[0x11, 0xFF, 0xFF, 0xFF, 0x22]);
    }

    #[test]
    fn distant_record_flushes_pending_unit() {
        let input = image(&[
            build_line(0x0000, 0x00, &[0x11, 0x22]),
            build_line(0x1000, 0x00, &[0x33]),
            build_line(0x0000, 0x01, &[]),
        ]);

        let units = run::<16>(&input).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].0, 0x0000);
        assert_eq!(units[0].1.as_slice(), &[0x11, 0x22]);
        assert_eq!(units[1].0, 0x1000);
        assert_eq!(units[1].1.as_slice(), &[0x33]);
    }

    #[test]
    fn extended_address_applies_to_following_data() {
        let input = image(&[
            build_line(0x0000, 0x04, &[0x08, 0x00]),
            build_line(0x0100, 0x00, &[0x01]),
            build_line(0x0000, 0x04, &[0x20, 0x00]),
            build_line(0x0100, 0x00, &[0x02]),
            build_line(0x0000, 0x01, &[]),
        ]);

        let units = run::<16>(&input).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].0, 0x0800_0100);
        assert_eq!(units[1].0, 0x2000_0100);
    }

    #[test]
    fn start_linear_address_is_ignored() {
        let input = image(&[
            build_line(0x0000, 0x05, &[0x08, 0x00, 0x01, 0xC1]),
            build_line(0x0000, 0x00, &[0x77]),
            build_line(0x0000, 0x01, &[]),
        ]);

        let units = run::<16>(&input).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].1.as_slice(), &[0x77]);
    }

    #[test]
    fn ext_address_with_wrong_length_rejected() {
        let input = image(&[build_line(0x0000, 0x04, &[0x08, 0x00, 0x00])]);

        let result = run::<16>(&input);
        assert_eq!(result, Err(StreamError::Hex(HexError::BadExtAddress)));
    }

    #[test]
    fn bad_checksum_emits_nothing() {
        let mut good = build_line(0x0000, 0x00, &[0xDE, 0xAD]);
        // Perturb the final checksum byte
        good.pop();
        good.push('0');
        let input = image(&[good, build_line(0x0000, 0x01, &[])]);

        let mut asm: Assembler<16> = Assembler::new();
        let mut sink = RecordingSink::default();
        let result = asm.push_chunk(input.as_bytes(), &mut sink);

        assert_eq!(result, Err(StreamError::Hex(HexError::Checksum)));
        assert!(sink.units.is_empty());
    }

    #[test]
    fn missing_eof_is_truncated_stream() {
        let input = image(&[
            build_line(0x0000, 0x04, &[0x08, 0x00]),
            build_line(0x0000, 0x00, &[0x01, 0x02]),
        ]);

        let mut asm: Assembler<512> = Assembler::new();
        let mut sink = RecordingSink::default();
        asm.push_chunk(input.as_bytes(), &mut sink).unwrap();

        let result = asm.finish(&mut sink);
        assert_eq!(result, Err(StreamError::Hex(HexError::TruncatedStream)));
        // The half-filled unit must not leak out
        assert!(sink.units.is_empty());
    }

    #[test]
    fn line_delimiters_and_blank_lines() {
        // Mixed CR, LF, CRLF and blank lines; final record unterminated
        let mut input = String::new();
        input.push_str(&build_line(0x0000, 0x00, &[0x10]));
        input.push('\r');
        input.push_str(&build_line(0x0001, 0x00, &[0x20]));
        input.push('\n');
        input.push_str("\r\n\r\n");
        input.push_str(&build_line(0x0000, 0x01, &[]));

        let mut asm: Assembler<16> = Assembler::new();
        let mut sink = RecordingSink::default();
        asm.push_chunk(input.as_bytes(), &mut sink).unwrap();
        asm.finish(&mut sink).unwrap();

        assert_eq!(sink.units.len(), 1);
        assert_eq!(sink.units[0].1.as_slice(), &[0x10, 0x20]);
    }

    #[test]
    fn overlong_line_rejected() {
        let mut asm: Assembler<16> = Assembler::new();
        let mut sink = RecordingSink::default();

        let mut input = AVec::new();
        input.push(b':');
        input.extend([b'0'; HEX_LINE_MAX_LEN + 8]);
        input.push(b'\n');

        let result = asm.push_chunk(&input, &mut sink);
        assert_eq!(result, Err(StreamError::Hex(HexError::LineTooLong)));
    }

    #[test]
    fn sink_error_propagates() {
        let input = image(&[
            build_line(0x0000, 0x00, &[0x42]),
            build_line(0x0000, 0x01, &[]),
        ]);

        let mut asm: Assembler<16> = Assembler::new();
        let result = asm.push_chunk(input.as_bytes(), &mut RefusingSink);
        assert_eq!(result, Err(StreamError::Sink(())));
    }

    #[test]
    fn bytes_after_eof_are_ignored() {
        let mut input = image(&[
            build_line(0x0000, 0x00, &[0x42]),
            build_line(0x0000, 0x01, &[]),
        ]);
        input.push_str("garbage that would never parse\r\n");

        let units = run::<16>(&input).unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn unit_coverage_matches_data_bytes() {
        // The union of emitted (base + offset) positions carrying non-0xFF
        // data is exactly the set of addressed data bytes
        let input = image(&[
            build_line(0x0000, 0x04, &[0x08, 0x00]),
            build_line(0x0002, 0x00, &[0x01, 0x02, 0x03]),
            build_line(0x000D, 0x00, &[0x04, 0x05, 0x06, 0x07]),
            build_line(0x0000, 0x01, &[]),
        ]);

        let units = run::<8>(&input).unwrap();

        let mut emitted: AVec<(u32, u8)> = AVec::new();
        for (base, data) in &units {
            for (ii, &byte) in data.iter().enumerate() {
                if byte != 0xFF {
                    emitted.push((base + ii as u32, byte));
                }
            }
        }
        emitted.sort();

        let expected: AVec<(u32, u8)> = [
            (0x0800_0002, 0x01),
            (0x0800_0003, 0x02),
            (0x0800_0004, 0x03),
            (0x0800_000D, 0x04),
            (0x0800_000E, 0x05),
            (0x0800_000F, 0x06),
            (0x0800_0010, 0x07),
        ]
        .into_iter()
        .collect();
        assert_eq!(emitted, expected);
    }
}
