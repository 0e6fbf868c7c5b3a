//! Screenshot plugins and the registry that dispatches to them.
//!
//! Every supported instrument family is a [`ScreenshotPlugin`] described by
//! a static [`PluginInfo`]. The [`PluginRegistry`] picks a plugin either by
//! name or by matching the instrument's `*IDN?` identification string
//! against each plugin's regex tokens.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{Error, Result};
use crate::transport::{Connector, Transport};

/// Identification query sent to find out what instrument is connected.
pub const IDN_QUERY: &[u8] = b"*IDN?";

/// Largest identification response accepted.
const ID_LENGTH_MAX: usize = 65_536;

/// Static description of a screenshot plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginInfo {
    /// Short name used on the command line (e.g. `"lecroy-wp"`).
    pub name: &'static str,
    /// Human-readable instrument family.
    pub description: &'static str,
    /// Whitespace-separated regular expressions matched against the
    /// instrument identification string.
    pub regex: &'static str,
}

impl PluginInfo {
    /// Count how many of the regex tokens match `id`.
    ///
    /// Tokens that are not valid regular expressions never match.
    pub fn match_score(&self, id: &str) -> usize {
        self.regex
            .split_whitespace()
            .filter(|token| match Regex::new(token) {
                Ok(re) => re.is_match(id),
                Err(e) => {
                    tracing::warn!(plugin = self.name, token, error = %e, "Invalid plugin regex");
                    false
                }
            })
            .count()
    }
}

/// A screenshot capture implementation for one instrument family.
#[async_trait]
pub trait ScreenshotPlugin: Send + Sync {
    /// The plugin's registration descriptor.
    fn info(&self) -> &PluginInfo;

    /// Capture a screenshot from the instrument at `address` and hand the
    /// image to the plugin's sink.
    ///
    /// `id` is the instrument identification string, for plugins that
    /// need to tell models apart. Nothing is emitted when this fails.
    async fn screenshot(&self, address: &str, id: &str, timeout: Duration) -> Result<()>;

    /// Run a capture and report the outcome as a process-style status:
    /// `0` on success, `1` on failure.
    async fn run(&self, address: &str, id: &str, timeout: Duration) -> i32 {
        match self.screenshot(address, id, timeout).await {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(
                    plugin = self.info().name,
                    address,
                    error = %e,
                    "Screenshot failed"
                );
                1
            }
        }
    }
}

/// The set of available screenshot plugins.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn ScreenshotPlugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin. Plugins registered earlier win ties in
    /// [`match_id`](PluginRegistry::match_id).
    pub fn register(&mut self, plugin: Box<dyn ScreenshotPlugin>) {
        tracing::debug!(plugin = plugin.info().name, "Registered screenshot plugin");
        self.plugins.push(plugin);
    }

    /// Descriptors of all registered plugins, in registration order.
    pub fn infos(&self) -> impl Iterator<Item = &PluginInfo> {
        self.plugins.iter().map(|p| p.info())
    }

    /// Look up a plugin by its exact name.
    pub fn find(&self, name: &str) -> Result<&dyn ScreenshotPlugin> {
        self.plugins
            .iter()
            .find(|p| p.info().name == name)
            .map(|p| p.as_ref())
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))
    }

    /// Pick the plugin whose regex tokens best match an identification
    /// string.
    pub fn match_id(&self, id: &str) -> Result<&dyn ScreenshotPlugin> {
        let mut best: Option<(usize, &dyn ScreenshotPlugin)> = None;
        for plugin in &self.plugins {
            let score = plugin.info().match_score(id);
            tracing::trace!(plugin = plugin.info().name, score, "Plugin match score");
            let better = match best {
                Some((top, _)) => score > top,
                None => score > 0,
            };
            if better {
                best = Some((score, plugin.as_ref()));
            }
        }
        match best {
            Some((_, plugin)) => {
                tracing::debug!(plugin = plugin.info().name, id, "Matched plugin");
                Ok(plugin)
            }
            None => Err(Error::PluginNotFound(id.to_string())),
        }
    }
}

/// Query the identification string of the instrument at `address`.
///
/// Opens a session, sends `*IDN?`, and closes the session again whether
/// or not the query succeeded. Surrounding whitespace and line
/// terminators are trimmed.
pub async fn identify(connector: &dyn Connector, address: &str, timeout: Duration) -> Result<String> {
    let mut transport = connector.connect(address, timeout).await?;
    let result = query_id(transport.as_mut(), timeout).await;
    if let Err(e) = transport.close().await {
        tracing::warn!(address, error = %e, "Failed to close session after *IDN? (continuing anyway)");
    }
    result
}

async fn query_id(transport: &mut dyn Transport, timeout: Duration) -> Result<String> {
    transport
        .send(IDN_QUERY, timeout)
        .await
        .map_err(|e| Error::Send(e.to_string()))?;
    let mut buf = vec![0u8; ID_LENGTH_MAX];
    let n = transport
        .receive(&mut buf, timeout)
        .await
        .map_err(|e| Error::Receive(e.to_string()))?;
    let id = String::from_utf8_lossy(&buf[..n]).trim().to_string();
    tracing::debug!(id = %id, "Instrument identification");
    Ok(id)
}
