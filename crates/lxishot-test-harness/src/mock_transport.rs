//! Mock transport for deterministic testing of plugins.
//!
//! [`MockTransport`] implements the [`Transport`] trait with a pre-loaded
//! script of commands and their outcomes. This lets you test command
//! sequencing, response unframing, and failure handling without an
//! instrument on the network.
//!
//! # Example
//!
//! ```
//! use lxishot_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // Commands that produce no response.
//! mock.expect_no_reply(b"scdp");
//! // When the plugin sends this query, return this response.
//! mock.expect(b"*IDN?", b"LECROY,WP7300A,LCRY0101N12345,6.1.0\n");
//! let handle = mock.handle();
//! assert!(handle.sent_data().is_empty());
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lxishot_core::error::{Error, Result};
use lxishot_core::transport::Transport;

/// What the mock does once the expected request has been sent.
#[derive(Debug)]
enum Reply {
    /// Return these bytes from the following `receive()`.
    Data(Vec<u8>),
    /// Accept the send; a following `receive()` times out.
    None,
    /// Fail the send itself.
    SendError(Error),
    /// Accept the send and fail the following `receive()`.
    ReceiveError(Error),
}

/// A scripted request and its outcome.
#[derive(Debug)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    reply: Reply,
}

/// State shared between a [`MockTransport`] and its [`MockHandle`]s.
#[derive(Debug, Default)]
struct Shared {
    sent_log: Vec<Vec<u8>>,
    close_calls: usize,
}

/// Observes a [`MockTransport`] after it has been moved into a plugin or
/// boxed behind `dyn Transport`.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All data sent through the transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Whether `close()` has been called at least once.
    pub fn is_closed(&self) -> bool {
        self.lock().close_calls > 0
    }

    /// Number of `close()` calls.
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }
}

/// A mock [`Transport`] for testing plugins without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation. The
/// expectation's reply then decides the outcome of that send and of the
/// next `receive()` call.
///
/// If no expectation matches or the queue is exhausted, the send fails
/// with [`Error::Protocol`].
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of scripted requests.
    expectations: VecDeque<Expectation>,
    /// The outcome pending for the next `receive()` call.
    pending: Option<Reply>,
    /// Cursor into a pending data reply.
    response_cursor: usize,
    /// Whether the transport is "connected".
    connected: bool,
    /// Error returned by the next `close()`, if any.
    close_error: Option<Error>,
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            pending: None,
            response_cursor: 0,
            connected: true,
            close_error: None,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    fn push(&mut self, request: &[u8], reply: Reply) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply,
        });
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, the subsequent
    /// `receive()` call will return `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.push(request, Reply::Data(response.to_vec()));
    }

    /// Expect a command that the instrument accepts without answering.
    pub fn expect_no_reply(&mut self, request: &[u8]) {
        self.push(request, Reply::None);
    }

    /// Expect `request` and fail its `send()` with `error`.
    pub fn expect_send_error(&mut self, request: &[u8], error: Error) {
        self.push(request, Reply::SendError(error));
    }

    /// Expect `request` and fail the following `receive()` with `error`.
    pub fn expect_receive_error(&mut self, request: &[u8], error: Error) {
        self.push(request, Reply::ReceiveError(error));
    }

    /// Make the next `close()` return `error`. The transport still ends up
    /// disconnected.
    pub fn fail_close(&mut self, error: Error) {
        self.close_error = Some(error);
    }

    /// Return a handle for inspecting sent data and close calls.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn clear_pending(&mut self) {
        self.pending = None;
        self.response_cursor = 0;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8], _timeout: Duration) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sent_log
            .push(data.to_vec());

        let Some(expectation) = self.expectations.pop_front() else {
            return Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            ));
        };
        if data != expectation.request.as_slice() {
            return Err(Error::Protocol(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            )));
        }

        self.clear_pending();
        match expectation.reply {
            Reply::SendError(e) => Err(e),
            reply => {
                self.pending = Some(reply);
                Ok(())
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        match self.pending.take() {
            Some(Reply::Data(response)) => {
                let remaining = &response[self.response_cursor..];
                let n = remaining.len().min(buf.len());
                buf[..n].copy_from_slice(&remaining[..n]);
                self.response_cursor += n;
                if self.response_cursor < response.len() {
                    self.pending = Some(Reply::Data(response));
                } else {
                    self.response_cursor = 0;
                }
                Ok(n)
            }
            Some(Reply::ReceiveError(e)) => Err(e),
            Some(Reply::None) | Some(Reply::SendError(_)) | None => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.clear_pending();
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close_calls += 1;
        match self.close_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
