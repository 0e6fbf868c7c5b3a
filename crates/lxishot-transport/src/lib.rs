//! Transport implementations for lxishot.
//!
//! This crate provides the VXI-11 implementation of the
//! [`Transport`](lxishot_core::Transport) and
//! [`Connector`](lxishot_core::Connector) traits from `lxishot-core`:
//!
//! - [`rpc`]: ONC-RPC call/reply messages, XDR primitives, and TCP record
//!   marking
//! - [`Vxi11Transport`]: one open VXI-11 link to an instrument
//! - [`Vxi11Connector`]: opens links by address, with portmapper lookup
//!
//! # Example
//!
//! ```no_run
//! use lxishot_core::Connector;
//! use lxishot_transport::Vxi11Connector;
//! use std::time::Duration;
//!
//! # async fn example() -> lxishot_core::Result<()> {
//! let connector = Vxi11Connector::new().device("inst0");
//! let timeout = Duration::from_secs(5);
//! let mut transport = connector.connect("192.168.1.50", timeout).await?;
//!
//! transport.send(b"*IDN?", timeout).await?;
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, timeout).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod rpc;
pub mod vxi11;

pub use rpc::RpcClient;
pub use vxi11::{Vxi11Connector, Vxi11Transport};
