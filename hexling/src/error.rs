// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hexling - Error classification
//!
//! Every failure in a programming session collapses to one of these kinds,
//! each with a fixed response code for the serial console.  The
//! classification is by phase: anything that goes wrong while talking to
//! the flash controller before the verify pass is a programming failure,
//! anything during the verify pass is a verification failure, and anything
//! during connection is a connect failure - regardless of the underlying
//! SWD error.

use core::fmt;

use crate::storage::StorageError;

/// The error kinds a programming session can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Storage initialization or mount failed
    SdMount,

    /// Path lookup failed
    FileNotFound,

    /// Invalid record, bad checksum, truncated stream or unknown record
    /// type in the firmware image
    HexParse,

    /// No or invalid IDCODE, unknown MCU family, debug power-up timeout,
    /// or a protocol fault while connecting
    TargetConnect,

    /// Unlock refused, erase or program error or timeout, or an SWD fault
    /// while programming
    ProgramFail,

    /// Readback mismatch or an SWD fault during the verify pass
    VerifyFail,

    /// Malformed command
    Generic,
}

impl ErrorKind {
    /// The exact byte sequence reported on the command channel
    pub fn response(&self) -> &'static str {
        match self {
            ErrorKind::SdMount => "ERR_SD_MOUNT\r\n",
            ErrorKind::FileNotFound => "ERR_FILE_NOT_FOUND\r\n",
            ErrorKind::HexParse => "ERR_HEX_PARSE\r\n",
            ErrorKind::TargetConnect => "ERR_TARGET_CONNECT\r\n",
            ErrorKind::ProgramFail => "ERR_PROGRAM_FAIL\r\n",
            ErrorKind::VerifyFail => "ERR_VERIFY_FAIL\r\n",
            ErrorKind::Generic => "NG\r\n",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SdMount => "storage mount failed",
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::HexParse => "firmware image parse failed",
            ErrorKind::TargetConnect => "target connect failed",
            ErrorKind::ProgramFail => "programming failed",
            ErrorKind::VerifyFail => "verification failed",
            ErrorKind::Generic => "malformed command",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<StorageError> for ErrorKind {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Mount => ErrorKind::SdMount,
            StorageError::NotFound => ErrorKind::FileNotFound,
            // A read that dies mid-file is a card problem, not an image
            // problem
            StorageError::Io => ErrorKind::SdMount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_codes_are_exact() {
        assert_eq!(ErrorKind::SdMount.response(), "ERR_SD_MOUNT\r\n");
        assert_eq!(ErrorKind::FileNotFound.response(), "ERR_FILE_NOT_FOUND\r\n");
        assert_eq!(ErrorKind::HexParse.response(), "ERR_HEX_PARSE\r\n");
        assert_eq!(ErrorKind::TargetConnect.response(), "ERR_TARGET_CONNECT\r\n");
        assert_eq!(ErrorKind::ProgramFail.response(), "ERR_PROGRAM_FAIL\r\n");
        assert_eq!(ErrorKind::VerifyFail.response(), "ERR_VERIFY_FAIL\r\n");
        assert_eq!(ErrorKind::Generic.response(), "NG\r\n");
    }

    #[test]
    fn storage_error_mapping() {
        assert_eq!(ErrorKind::from(StorageError::Mount), ErrorKind::SdMount);
        assert_eq!(
            ErrorKind::from(StorageError::NotFound),
            ErrorKind::FileNotFound
        );
        assert_eq!(ErrorKind::from(StorageError::Io), ErrorKind::SdMount);
    }
}
