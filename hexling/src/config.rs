// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Build-time configuration for the hexling programmer

/// Storage sector size in bytes - the granularity the card delivers
pub const SECTOR_SIZE: usize = 512;

/// Write unit size in bytes - the granularity of flash programming.
/// Aligned to the flash page so a full image costs one erase and one
/// program pass per page.  Must be a power of two.
pub const WRITE_UNIT_SIZE: usize = 512;

/// Longest accepted Intel HEX line, in characters
pub const HEX_LINE_MAX_LEN: usize = 256;

/// Longest accepted file path, in characters
pub const MAX_PATH_LEN: usize = 127;

/// Longest accepted command line: prefix plus path
pub const MAX_COMMAND_LEN: usize = 160;

/// Inter-character timeout while a command is being received
pub const CHAR_TIMEOUT_MS: u32 = 10;

/// Whole-command timeout from the first received character
pub const COMMAND_TIMEOUT_MS: u32 = 60_000;
