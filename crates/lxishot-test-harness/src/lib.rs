//! lxishot-test-harness: Test utilities for lxishot plugins.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of
//! command exchanges without instrument hardware, [`MockConnector`] for
//! driving a plugin's whole session lifecycle (including refused
//! connections), and [`RecordingSink`] for capturing the images a plugin
//! produces.

pub mod mock_connector;
pub mod mock_transport;
pub mod recording_sink;

pub use mock_connector::MockConnector;
pub use mock_transport::{MockHandle, MockTransport};
pub use recording_sink::{Dump, RecordingSink};
