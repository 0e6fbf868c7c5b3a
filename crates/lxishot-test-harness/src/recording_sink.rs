//! An [`ImageSink`] that keeps images in memory.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lxishot_core::error::{Error, Result};
use lxishot_core::sink::ImageSink;

/// One recorded `dump()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dump {
    pub image: Vec<u8>,
    pub extension: String,
}

/// Records every image handed to it instead of writing files.
#[derive(Debug, Default)]
pub struct RecordingSink {
    dumps: Mutex<Vec<Dump>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose `dump()` always fails with a permission error. The
    /// attempt is still recorded.
    pub fn failing() -> Self {
        RecordingSink {
            dumps: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Dump>> {
        self.dumps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All recorded dumps, oldest first.
    pub fn dumps(&self) -> Vec<Dump> {
        self.lock().clone()
    }
}

impl ImageSink for RecordingSink {
    fn dump(&self, image: &[u8], extension: &str) -> Result<()> {
        self.lock().push(Dump {
            image: image.to_vec(),
            extension: extension.to_string(),
        });
        if self.fail {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "recording sink set to fail",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_dumps_in_order() {
        let sink = RecordingSink::new();
        sink.dump(b"one", "png").unwrap();
        sink.dump(b"two", "bmp").unwrap();

        let dumps = sink.dumps();
        assert_eq!(dumps.len(), 2);
        assert_eq!(dumps[0].image, b"one");
        assert_eq!(dumps[1].extension, "bmp");
    }

    #[test]
    fn failing_sink_reports_io_error() {
        let sink = RecordingSink::failing();
        assert!(matches!(sink.dump(b"img", "png"), Err(Error::Io(_))));
        assert_eq!(sink.dumps().len(), 1);
    }
}
