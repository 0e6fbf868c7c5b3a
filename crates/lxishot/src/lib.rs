//! # lxishot -- Screenshots from LXI Instruments
//!
//! `lxishot` is an asynchronous Rust library for pulling screen captures
//! off networked test and measurement instruments over VXI-11. Each
//! instrument family is handled by a plugin that knows its command set and
//! response framing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use lxishot::transport::Vxi11Connector;
//! use lxishot::FileDump;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let address = "192.168.1.50";
//!     let registry = lxishot::default_registry(
//!         Arc::new(Vxi11Connector::new()),
//!         Arc::new(FileDump::new(address)),
//!     );
//!
//!     let plugin = registry.find("lecroy-wp")?;
//!     plugin.screenshot(address, "", Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                  | Purpose                                          |
//! |------------------------|--------------------------------------------------|
//! | `lxishot-core`         | Traits ([`Transport`], [`ScreenshotPlugin`]), sinks, errors |
//! | `lxishot-transport`    | ONC-RPC client and VXI-11 transport              |
//! | `lxishot-lecroy`       | LeCroy WavePro plugin                            |
//! | **`lxishot`**          | This facade crate -- re-exports everything       |
//!
//! ## Feature Flags
//!
//! | Feature  | Enables                           | Default |
//! |----------|-----------------------------------|---------|
//! | `lecroy` | [`lecroy`] module (WavePro)       | yes     |

pub use lxishot_core::*;

use std::sync::Arc;

/// VXI-11 transport.
///
/// Provides [`Vxi11Connector`](transport::Vxi11Connector), the
/// [`Connector`] used to reach real instruments.
pub mod transport {
    pub use lxishot_transport::*;
}

/// LeCroy WavePro plugin.
///
/// Provides [`LecroyPlugin`](lecroy::LecroyPlugin), which renders a PNG
/// hardcopy on the oscilloscope and transfers it back.
#[cfg(feature = "lecroy")]
pub mod lecroy {
    pub use lxishot_lecroy::*;
}

/// Build a registry holding every plugin from the enabled backends.
///
/// All plugins share `connector` for opening sessions and `sink` for the
/// captured images.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lxishot::transport::Vxi11Connector;
/// use lxishot::FileDump;
///
/// let registry = lxishot::default_registry(
///     Arc::new(Vxi11Connector::new()),
///     Arc::new(FileDump::new("192.168.1.50")),
/// );
/// for info in registry.infos() {
///     println!("{:<12} {}", info.name, info.description);
/// }
/// ```
#[cfg_attr(not(feature = "lecroy"), allow(unused_variables))]
pub fn default_registry(connector: Arc<dyn Connector>, sink: Arc<dyn ImageSink>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();

    #[cfg(feature = "lecroy")]
    {
        registry.register(Box::new(lecroy::LecroyPlugin::new(connector, sink)));
    }

    registry
}
