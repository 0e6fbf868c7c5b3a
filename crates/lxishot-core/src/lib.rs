//! lxishot-core: Core traits, types, and error definitions for lxishot.
//!
//! This crate defines the instrument-agnostic pieces that every screenshot
//! plugin builds on. Applications depend on these types without pulling in
//! a specific transport or plugin.
//!
//! # Key types
//!
//! - [`Transport`] / [`Connector`] -- message-level sessions with an instrument
//! - [`ImageSink`] / [`FileDump`] -- where captured images go
//! - [`ScreenshotPlugin`] / [`PluginRegistry`] -- plugin dispatch
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod plugin;
pub mod sink;
pub mod transport;

// Re-export key types at crate root for ergonomic `use lxishot_core::*`.
pub use error::{Error, Result};
pub use plugin::{identify, PluginInfo, PluginRegistry, ScreenshotPlugin, IDN_QUERY};
pub use sink::{FileDump, ImageSink};
pub use transport::{Connector, Transport};
