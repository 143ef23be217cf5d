// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Serial command console
//!
//! The console speaks one line-oriented protocol: the system announces
//! itself with `READY`, accepts `FILE: <path>` commands, and answers each
//! with exactly one response code.  The UART itself is a collaborator;
//! this module owns the pure parts - accumulating a command line with
//! timeout bookkeeping, extracting the path, and choosing the response
//! bytes.

use heapless::Vec;
#[allow(unused_imports)]
use log::{debug, trace, warn};

use crate::config::{CHAR_TIMEOUT_MS, COMMAND_TIMEOUT_MS, MAX_COMMAND_LEN, MAX_PATH_LEN};
use crate::error::ErrorKind;

/// Emitted once on boot
pub const READY: &str = "READY\r\n";

/// Reported when a session completes successfully
pub const RESP_OK: &str = "OK\r\n";

/// The one command the console understands
pub const CMD_PREFIX: &str = "FILE: ";

/// The response bytes for a completed session
pub fn response_for(result: &Result<(), ErrorKind>) -> &'static str {
    match result {
        Ok(()) => RESP_OK,
        Err(kind) => kind.response(),
    }
}

/// Extract the file path from a received command line (terminator already
/// stripped).
///
/// Anything that is not `FILE: <path>` with a path of acceptable length is
/// malformed.  Embedded CR/LF cannot occur - they delimit the line - but a
/// path longer than the filesystem allows is rejected here rather than
/// deep in the directory walk.
pub fn extract_file_path(command: &str) -> Result<&str, ErrorKind> {
    let path = command.strip_prefix(CMD_PREFIX).ok_or(ErrorKind::Generic)?;

    if path.is_empty() || path.len() > MAX_PATH_LEN {
        return Err(ErrorKind::Generic);
    }
    if path.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(ErrorKind::Generic);
    }

    Ok(path)
}

/// Byte-at-a-time command line receiver
///
/// The caller owns the UART and the clock: it feeds received bytes through
/// [`push`](Self::push) and elapsed idle time through
/// [`tick_ms`](Self::tick_ms).  Two timeouts guard the accumulation: a
/// per-character gap limit once a command has started, and a whole-command
/// limit from its first byte.
#[derive(Debug, Default)]
pub struct CommandReceiver {
    line: Vec<u8, MAX_COMMAND_LEN>,
    overflowed: bool,
    complete: bool,
    char_wait_ms: u32,
    total_ms: u32,
}

impl CommandReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received byte.  Returns true once a full line is
    /// available from [`line`](Self::line).
    pub fn push(&mut self, byte: u8) -> bool {
        if self.complete {
            return true;
        }

        self.char_wait_ms = 0;

        match byte {
            b'\r' | b'\n' => {
                // Ignore a bare terminator before any command bytes
                if !self.line.is_empty() || self.overflowed {
                    self.complete = true;
                }
            }
            other => {
                if self.line.push(other).is_err() {
                    self.overflowed = true;
                }
            }
        }

        self.complete
    }

    /// Account for idle time.  Returns an error once either timeout
    /// expires mid-command; the caller reports `NG` and resets.
    pub fn tick_ms(&mut self, elapsed_ms: u32) -> Result<(), ErrorKind> {
        if self.line.is_empty() && !self.overflowed {
            return Ok(());
        }

        self.char_wait_ms += elapsed_ms;
        self.total_ms += elapsed_ms;

        if self.char_wait_ms > CHAR_TIMEOUT_MS || self.total_ms > COMMAND_TIMEOUT_MS {
            warn!("Command receive timed out");
            return Err(ErrorKind::Generic);
        }

        Ok(())
    }

    /// The accumulated command line, once complete.
    pub fn line(&self) -> Result<&str, ErrorKind> {
        if !self.complete || self.overflowed {
            return Err(ErrorKind::Generic);
        }

        core::str::from_utf8(&self.line).map_err(|_| ErrorKind::Generic)
    }

    /// Ready for the next command.
    pub fn reset(&mut self) {
        self.line.clear();
        self.overflowed = false;
        self.complete = false;
        self.char_wait_ms = 0;
        self.total_ms = 0;
    }
}
