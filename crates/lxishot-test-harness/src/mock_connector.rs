//! Mock connector that hands out scripted [`MockTransport`] sessions.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lxishot_core::error::{Error, Result};
use lxishot_core::transport::{Connector, Transport};

use crate::MockTransport;

#[derive(Debug, Default)]
struct State {
    sessions: VecDeque<MockTransport>,
    addresses: Vec<String>,
}

/// A [`Connector`] that returns pre-built [`MockTransport`]s in order.
///
/// Every connection attempt is recorded. Once the sessions run out (or
/// for a connector built with [`refusing`](MockConnector::refusing)),
/// `connect()` fails with [`Error::Connect`].
#[derive(Debug, Default)]
pub struct MockConnector {
    state: Mutex<State>,
}

impl MockConnector {
    /// A connector whose single session is `transport`.
    pub fn new(transport: MockTransport) -> Self {
        Self::with_sessions([transport])
    }

    /// A connector that hands out `sessions` one per `connect()`.
    pub fn with_sessions(sessions: impl IntoIterator<Item = MockTransport>) -> Self {
        MockConnector {
            state: Mutex::new(State {
                sessions: sessions.into_iter().collect(),
                addresses: Vec::new(),
            }),
        }
    }

    /// A connector that refuses every connection.
    pub fn refusing() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Addresses passed to `connect()`, in call order.
    pub fn addresses(&self) -> Vec<String> {
        self.lock().addresses.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str, _timeout: Duration) -> Result<Box<dyn Transport>> {
        let mut state = self.lock();
        state.addresses.push(address.to_string());
        match state.sessions.pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(Error::Connect(format!("{address}: connection refused"))),
        }
    }
}
