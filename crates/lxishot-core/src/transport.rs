//! Transport and connector traits for instrument communication.
//!
//! The [`Transport`] trait abstracts over an open session with an
//! instrument. The VXI-11 implementation lives in `lxishot-transport`;
//! deterministic mock implementations for tests live in
//! `lxishot-test-harness`.
//!
//! A [`Connector`] opens sessions. Plugins hold a connector rather than a
//! transport so that one plugin value can capture from any address, and so
//! that tests can simulate an unreachable instrument.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous message-level session with an instrument.
///
/// Each `send()` delivers one complete command message; each `receive()`
/// returns one complete response message (or as much of it as fits in the
/// buffer, for transports without message boundaries).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one command message to the instrument.
    ///
    /// Returns [`Error::Timeout`](crate::error::Error::Timeout) if the
    /// instrument does not accept the message within `timeout`.
    async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Receive one response message into the provided buffer.
    ///
    /// Returns the number of bytes written to `buf`. Waits up to `timeout`
    /// for the response; returns
    /// [`Error::Timeout`](crate::error::Error::Timeout) if nothing arrives
    /// before the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the session.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    /// Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Check whether the session is currently open.
    fn is_connected(&self) -> bool;
}

/// Opens [`Transport`] sessions to instruments by address.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session to the instrument at `address`.
    ///
    /// `timeout` bounds the whole connection setup. Failures are reported
    /// as [`Error::Connect`](crate::error::Error::Connect).
    async fn connect(&self, address: &str, timeout: Duration) -> Result<Box<dyn Transport>>;
}
