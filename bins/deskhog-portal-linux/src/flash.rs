//! File standing in for the inactive firmware slot.
//!
//! An image is written to `<slot>.partial` and renamed over the slot file
//! only once every announced byte has been written.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use deskhog_core::{FirmwareFlash, FlashError, FlashSession};
use tracing::{debug, info};

pub struct FileFlash {
    path: PathBuf,
    capacity: u64,
}

impl FileFlash {
    pub fn new(path: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }
}

impl FirmwareFlash for FileFlash {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn begin(&self, size: u64) -> Result<Box<dyn FlashSession>, FlashError> {
        if size > self.capacity {
            return Err(FlashError::NoSpace {
                needed: size,
                capacity: self.capacity,
            });
        }
        let partial = self.path.with_extension("partial");
        let file = File::create(&partial)
            .map_err(|e| FlashError::Begin(format!("{}: {}", partial.display(), e)))?;
        debug!(path = %partial.display(), size, "Flash session opened");

        Ok(Box::new(FileFlashSession {
            file,
            partial,
            target: self.path.clone(),
            expected: size,
            written: 0,
        }))
    }
}

struct FileFlashSession {
    file: File,
    partial: PathBuf,
    target: PathBuf,
    expected: u64,
    written: u64,
}

impl FlashSession for FileFlashSession {
    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
        if self.written + chunk.len() as u64 > self.expected {
            return Err(FlashError::Write("image larger than announced".into()));
        }
        self.file
            .write_all(chunk)
            .map_err(|e| FlashError::Write(e.to_string()))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), FlashError> {
        let FileFlashSession {
            file,
            partial,
            target,
            expected,
            written,
        } = *self;

        if written != expected {
            return Err(FlashError::End(format!(
                "wrote {} of {} bytes",
                written, expected
            )));
        }
        file.sync_all()
            .and_then(|_| std::fs::rename(&partial, &target))
            .map_err(|e| FlashError::End(e.to_string()))?;
        info!(path = %target.display(), bytes = written, "Firmware slot committed");
        Ok(())
    }
}
