//! LecroyPlugin -- the [`ScreenshotPlugin`] implementation for LeCroy
//! WavePro oscilloscopes.
//!
//! Ties the capture sequence ([`capture`](crate::capture)) to a
//! [`Connector`] for opening sessions and an [`ImageSink`] for the result.
//! The session is closed on every path once it has been opened.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lxishot_core::error::Result;
use lxishot_core::plugin::{PluginInfo, ScreenshotPlugin};
use lxishot_core::sink::ImageSink;
use lxishot_core::transport::{Connector, Transport};
use tracing::{error, info, warn};

use crate::capture::capture_image;
use crate::protocol::IMAGE_EXTENSION;

/// Registration descriptor of the LeCroy WavePro plugin.
pub const LECROY_WP: PluginInfo = PluginInfo {
    name: "lecroy-wp",
    description: "LeCroy WavePro Oscilloscope",
    regex: "LECROY WP LCRY",
};

/// Screenshot plugin for LeCroy WavePro oscilloscopes.
pub struct LecroyPlugin {
    connector: Arc<dyn Connector>,
    sink: Arc<dyn ImageSink>,
}

impl LecroyPlugin {
    /// Create a plugin that opens sessions with `connector` and hands
    /// images to `sink`.
    pub fn new(connector: Arc<dyn Connector>, sink: Arc<dyn ImageSink>) -> Self {
        LecroyPlugin { connector, sink }
    }

    async fn capture_and_dump(&self, transport: &mut dyn Transport, timeout: Duration) -> Result<()> {
        let image = capture_image(transport, timeout).await?;
        info!(bytes = image.len(), "Captured screenshot");
        self.sink.dump(&image, IMAGE_EXTENSION)
    }
}

#[async_trait]
impl ScreenshotPlugin for LecroyPlugin {
    fn info(&self) -> &PluginInfo {
        &LECROY_WP
    }

    async fn screenshot(&self, address: &str, _id: &str, timeout: Duration) -> Result<()> {
        let mut transport = self
            .connector
            .connect(address, timeout)
            .await
            .inspect_err(|e| error!(address, error = %e, "Failed to connect"))?;

        let result = self.capture_and_dump(transport.as_mut(), timeout).await;

        if let Err(e) = transport.close().await {
            warn!(address, error = %e, "Failed to disconnect (continuing anyway)");
        }
        result
    }
}
