//! LeCroy WavePro screenshot plugin for lxishot.
//!
//! WavePro oscilloscopes do not stream their display directly. The plugin
//! has the instrument render a PNG hardcopy to its own disk and then reads
//! the file back as IEEE-488.2 block data. It provides:
//!
//! - **Protocol** ([`protocol`]) -- the fixed command literals and the
//!   transfer-response framing parser.
//! - **Capture** ([`capture`]) -- the four-step command exchange over an
//!   open [`Transport`](lxishot_core::Transport).
//! - **Plugin** ([`plugin`]) -- [`LecroyPlugin`], the
//!   [`ScreenshotPlugin`](lxishot_core::ScreenshotPlugin) implementation
//!   that owns the session lifecycle.
//!
//! # Example
//!
//! ```
//! use lxishot_lecroy::protocol::parse_block_response;
//! use lxishot_lecroy::LECROY_WP;
//!
//! assert_eq!(LECROY_WP.name, "lecroy-wp");
//!
//! let response = b"TRFL? 15PNGDATA\x01\x02\x03\x04\x05\x06\x07\x08\r\n";
//! let block = parse_block_response(response).unwrap();
//! assert_eq!(block.payload(response), b"PNGDATA");
//! ```

pub mod capture;
pub mod plugin;
pub mod protocol;

pub use capture::capture_image;
pub use plugin::{LecroyPlugin, LECROY_WP};
