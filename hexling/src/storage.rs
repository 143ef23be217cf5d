// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Storage collaborator interface
//!
//! The card, its SPI transport and the FAT directory walk live outside the
//! programmer core; the core needs only this narrow surface: open a file
//! by path, read it forward in sector-sized chunks, rewind it once for the
//! verify pass, and close it.

use core::fmt;

use crate::config::SECTOR_SIZE;

/// The ways the storage collaborator can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Card initialization or filesystem mount failed
    Mount,

    /// No file at the given path
    NotFound,

    /// A read failed after the file was opened
    Io,
}

impl StorageError {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageError::Mount => "mount failed",
            StorageError::NotFound => "file not found",
            StorageError::Io => "read failed",
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sequential, rewindable access to files by path
///
/// The programmer core requires exactly one open, a run of sequential
/// sector reads, one rewind, a second run of reads, and a close per
/// session.
pub trait Storage {
    type Handle;

    /// Open the file at the given path
    fn open(&mut self, path: &str) -> Result<Self::Handle, StorageError>;

    /// Read the next up-to-one-sector chunk.  Returns the number of bytes
    /// delivered; 0 means end of file.
    fn read_sector(
        &mut self,
        handle: &mut Self::Handle,
        buf: &mut [u8; SECTOR_SIZE],
    ) -> Result<usize, StorageError>;

    /// Reset the read position to the start of the file
    fn rewind(&mut self, handle: &mut Self::Handle) -> Result<(), StorageError>;

    /// Release the handle
    fn close(&mut self, handle: Self::Handle);
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use alloc::string::String;
    use alloc::vec::Vec;

    /// In-memory storage backing the session tests
    pub(crate) struct MemStorage {
        mounted: bool,
        files: Vec<(String, Vec<u8>)>,
    }

    pub(crate) struct MemHandle {
        index: usize,
        pos: usize,
    }

    impl MemStorage {
        pub(crate) fn new(files: Vec<(String, Vec<u8>)>) -> Self {
            Self {
                mounted: true,
                files,
            }
        }

        pub(crate) fn unmounted() -> Self {
            Self {
                mounted: false,
                files: Vec::new(),
            }
        }
    }

    impl Storage for MemStorage {
        type Handle = MemHandle;

        fn open(&mut self, path: &str) -> Result<MemHandle, StorageError> {
            if !self.mounted {
                return Err(StorageError::Mount);
            }
            let index = self
                .files
                .iter()
                .position(|(name, _)| name == path)
                .ok_or(StorageError::NotFound)?;
            Ok(MemHandle { index, pos: 0 })
        }

        fn read_sector(
            &mut self,
            handle: &mut MemHandle,
            buf: &mut [u8; SECTOR_SIZE],
        ) -> Result<usize, StorageError> {
            let contents = &self.files[handle.index].1;
            let take = (contents.len() - handle.pos).min(SECTOR_SIZE);
            buf[..take].copy_from_slice(&contents[handle.pos..handle.pos + take]);
            handle.pos += take;
            Ok(take)
        }

        fn rewind(&mut self, handle: &mut MemHandle) -> Result<(), StorageError> {
            handle.pos = 0;
            Ok(())
        }

        fn close(&mut self, _handle: MemHandle) {}
    }
}
