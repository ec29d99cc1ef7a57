// SPDX-License-Identifier: MPL-2.0

//! Emitting finished images.

use std::{
    fs::File,
    io::{self, Cursor, Seek, SeekFrom, Stdout, Write},
};

use log::info;

use crate::error::{Error, Result};

/// Outputs that can push written data to stable storage.
pub trait SyncOutput {
    fn sync(&mut self) -> io::Result<()>;
}

impl<T: SyncOutput + ?Sized> SyncOutput for &mut T {
    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

impl SyncOutput for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl SyncOutput for Vec<u8> {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SyncOutput for Cursor<Vec<u8>> {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SyncOutput for Stdout {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes an image to `out`, naming `name` in errors.
pub struct ImageWriter<W> {
    out: W,
    name: String,
    sync: bool,
    written: u64,
}

impl<W: Write + SyncOutput> ImageWriter<W> {
    /// With `sync` set, [`ImageWriter::finish`] waits for the data to reach
    /// stable storage.
    pub fn new(out: W, name: impl Into<String>, sync: bool) -> Self {
        ImageWriter {
            out,
            name: name.into(),
            sync,
            written: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends `bytes` at the current position.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out
            .write_all(bytes)
            .map_err(|err| Error::io("write to", &self.name, err))?;
        self.written += bytes.len() as u64;
        info!("wrote 0x{:x} bytes to {}", bytes.len(), self.name);
        Ok(())
    }

    /// Flushes the output, then syncs it if requested, and returns it.
    pub fn finish(mut self) -> Result<W> {
        self.out
            .flush()
            .map_err(|err| Error::io("flush", &self.name, err))?;
        if self.sync {
            self.out
                .sync()
                .map_err(|err| Error::io("sync", &self.name, err))?;
        }
        Ok(self.out)
    }
}

impl<W: Write + Seek + SyncOutput> ImageWriter<W> {
    /// Writes `bytes` at `offset` from the start of the output.
    pub fn write_at(&mut self, bytes: &[u8], offset: u64) -> Result<()> {
        self.out
            .seek(SeekFrom::Start(offset))
            .map_err(|err| Error::io("seek in", &self.name, err))?;
        self.out
            .write_all(bytes)
            .map_err(|err| Error::io("write to", &self.name, err))?;
        self.written = self.written.max(offset + bytes.len() as u64);
        info!(
            "wrote 0x{:x} bytes at 0x{:x} to {}",
            bytes.len(),
            offset,
            self.name
        );
        Ok(())
    }
}
