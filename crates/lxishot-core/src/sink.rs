//! Destinations for captured screenshot images.
//!
//! Plugins hand the raw image bytes to an [`ImageSink`] together with the
//! file extension that matches the image format. [`FileDump`] is the sink
//! used by the command-line tool: it writes the image to disk, either to
//! an explicit path or to an automatically named file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::Result;

/// Receives the image produced by a successful capture.
///
/// A sink is only invoked once the whole image has been received and
/// unframed; failed captures never reach it.
pub trait ImageSink: Send + Sync {
    /// Persist `image`, whose format is identified by `extension`
    /// (e.g. `"png"`).
    fn dump(&self, image: &[u8], extension: &str) -> Result<()>;
}

/// Writes screenshot images to files.
///
/// Without an explicit output path, files are named
/// `screenshot_<address>_<YYYY-MM-DD>_<HH:MM:SS>.<extension>` using local
/// time, inside the configured directory (the current directory by
/// default).
///
/// # Example
///
/// ```no_run
/// use lxishot_core::{FileDump, ImageSink};
///
/// # fn example(png: &[u8]) -> lxishot_core::Result<()> {
/// let sink = FileDump::new("192.168.1.50").output("capture");
/// // Writes "capture.png".
/// sink.dump(png, "png")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileDump {
    address: String,
    output: Option<PathBuf>,
    directory: PathBuf,
}

impl FileDump {
    /// Create a sink that names files after the instrument `address`.
    pub fn new(address: &str) -> Self {
        FileDump {
            address: address.to_string(),
            output: None,
            directory: PathBuf::from("."),
        }
    }

    /// Write to this path instead of an automatic name.
    ///
    /// The image extension is appended when the path does not already
    /// end with it.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Directory for automatically named files (default: `.`).
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = dir.into();
        self
    }

    /// Compute the file path for an image with the given extension,
    /// captured at `now`.
    pub fn path_for(&self, extension: &str, now: DateTime<Local>) -> PathBuf {
        match &self.output {
            Some(path) => with_extension(path, extension),
            None => {
                let name = format!(
                    "screenshot_{}_{}.{}",
                    sanitize(&self.address),
                    now.format("%Y-%m-%d_%H:%M:%S"),
                    extension
                );
                self.directory.join(name)
            }
        }
    }
}

impl ImageSink for FileDump {
    fn dump(&self, image: &[u8], extension: &str) -> Result<()> {
        let path = self.path_for(extension, Local::now());
        std::fs::write(&path, image).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to write screenshot");
            e
        })?;
        tracing::info!(path = %path.display(), bytes = image.len(), "Saved screenshot image");
        Ok(())
    }
}

/// Append `.<extension>` unless `path` already carries it.
fn with_extension(path: &Path, extension: &str) -> PathBuf {
    let has_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension));
    if has_extension {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(extension);
        PathBuf::from(name)
    }
}

/// Keep address characters that are safe in file names.
fn sanitize(address: &str) -> String {
    address
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
