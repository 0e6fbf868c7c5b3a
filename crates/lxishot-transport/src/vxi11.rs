//! VXI-11 transport for LXI instruments.
//!
//! This module provides [`Vxi11Transport`], which implements the
//! [`Transport`] trait on top of the VXI-11 core channel, and
//! [`Vxi11Connector`], which opens such transports by address.
//!
//! Connection setup:
//!
//! 1. Ask the portmapper (TCP port 111) for the port of the VXI-11 core
//!    program, unless an explicit port is configured.
//! 2. Connect to the core channel and `create_link` to the device
//!    (`inst0` by default, no locking).
//!
//! Each [`send`](Transport::send) is one `device_write` sequence (split at
//! the link's `maxRecvSize`, END flag on the last chunk). Each
//! [`receive`](Transport::receive) repeats `device_read` until the
//! instrument marks the end of the message.
//!
//! # Example
//!
//! ```no_run
//! use lxishot_core::Transport;
//! use lxishot_transport::Vxi11Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> lxishot_core::Result<()> {
//! let timeout = Duration::from_secs(3);
//! let mut transport = Vxi11Transport::connect("192.168.1.50", timeout).await?;
//!
//! transport.send(b"*IDN?", timeout).await?;
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, timeout).await?;
//! println!("{}", String::from_utf8_lossy(&buf[..n]));
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use lxishot_core::error::{Error, Result};
use lxishot_core::transport::{Connector, Transport};

use crate::rpc::{self, RpcClient};

/// Well-known portmapper port.
pub const PORTMAPPER_PORT: u16 = 111;
const PMAP_PROG: u32 = 100_000;
const PMAP_VERS: u32 = 2;
const PMAPPROC_GETPORT: u32 = 3;
const IPPROTO_TCP: u32 = 6;

/// VXI-11 core channel program number.
pub const DEVICE_CORE_PROG: u32 = 0x0607AF;
/// VXI-11 core channel program version.
pub const DEVICE_CORE_VERS: u32 = 1;

const CREATE_LINK: u32 = 10;
const DEVICE_WRITE: u32 = 11;
const DEVICE_READ: u32 = 12;
const DESTROY_LINK: u32 = 23;

/// `device_write` flag marking the final chunk of a message.
const FLAG_END: i32 = 0x08;

/// `device_read` reason: the requested byte count was reached.
const REASON_REQCNT: i32 = 0x01;
/// `device_read` reason: the termination character was seen.
const REASON_CHR: i32 = 0x02;
/// `device_read` reason: the instrument marked the end of the message.
const REASON_END: i32 = 0x04;

/// VXI-11 device error code for an I/O timeout.
const ERR_IO_TIMEOUT: i32 = 15;

/// Default device name on LXI instruments.
pub const DEFAULT_DEVICE: &str = "inst0";

/// Human-readable name of a VXI-11 `Device_ErrorCode`.
pub fn device_error_name(code: i32) -> &'static str {
    match code {
        0 => "no error",
        1 => "syntax error",
        3 => "device not accessible",
        4 => "invalid link identifier",
        5 => "parameter error",
        6 => "channel not established",
        8 => "operation not supported",
        9 => "out of resources",
        11 => "device locked by another link",
        12 => "no lock held by this link",
        15 => "I/O timeout",
        17 => "I/O error",
        21 => "invalid address",
        23 => "abort",
        29 => "channel already established",
        _ => "unknown device error",
    }
}

/// Turn a non-zero `Device_ErrorCode` into an [`Error`].
fn check_device_error(operation: &str, code: i32) -> Result<()> {
    match code {
        0 => Ok(()),
        ERR_IO_TIMEOUT => Err(Error::Timeout),
        _ => Err(Error::Protocol(format!(
            "{operation} failed: {} ({code})",
            device_error_name(code)
        ))),
    }
}

fn millis(timeout: Duration) -> u32 {
    timeout.as_millis().min(u128::from(u32::MAX)) as u32
}

/// Opens [`Vxi11Transport`] sessions.
///
/// All settings have defaults matching ordinary LXI instruments: device
/// `inst0`, core channel port looked up through the portmapper.
#[derive(Debug, Clone)]
pub struct Vxi11Connector {
    device: String,
    port: Option<u16>,
    portmapper_port: u16,
    client_id: i32,
}

impl Vxi11Connector {
    /// Create a connector with default settings.
    pub fn new() -> Self {
        Vxi11Connector {
            device: DEFAULT_DEVICE.to_string(),
            port: None,
            portmapper_port: PORTMAPPER_PORT,
            client_id: 0,
        }
    }

    /// Set the VXI-11 device name (default: `inst0`).
    pub fn device(mut self, name: &str) -> Self {
        self.device = name.to_string();
        self
    }

    /// Connect to the core channel on this port instead of asking the
    /// portmapper.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Query the portmapper on this port (default: 111).
    pub fn portmapper_port(mut self, port: u16) -> Self {
        self.portmapper_port = port;
        self
    }

    /// Set the client id sent in `create_link` (default: 0).
    pub fn client_id(mut self, id: i32) -> Self {
        self.client_id = id;
        self
    }

    /// Open a session to the instrument at `host`.
    ///
    /// `timeout` bounds the whole setup: portmapper lookup, core channel
    /// connect, and `create_link`. It also becomes the session timeout used
    /// when the link is destroyed.
    pub async fn open(&self, host: &str, timeout: Duration) -> Result<Vxi11Transport> {
        tokio::time::timeout(timeout, self.establish(host, timeout))
            .await
            .map_err(|_| {
                tracing::error!(host, timeout_ms = timeout.as_millis(), "VXI-11 link setup timed out");
                Error::Timeout
            })?
    }

    async fn establish(&self, host: &str, timeout: Duration) -> Result<Vxi11Transport> {
        let port = match self.port {
            Some(port) => port,
            None => self.lookup_core_port(host, timeout).await?,
        };

        let mut client =
            RpcClient::connect(host, port, DEVICE_CORE_PROG, DEVICE_CORE_VERS, timeout).await?;

        let mut args = BytesMut::new();
        args.put_i32(self.client_id);
        rpc::put_bool(&mut args, false); // lockDevice
        args.put_u32(0); // lock_timeout
        rpc::put_string(&mut args, &self.device);

        let mut reply = client.call(CREATE_LINK, &args, timeout).await?;
        let error = rpc::get_i32(&mut reply)?;
        let link_id = rpc::get_i32(&mut reply)?;
        let _abort_port = rpc::get_u32(&mut reply)?;
        let max_recv_size = rpc::get_u32(&mut reply)?;
        if error != 0 {
            client.shutdown().await;
            return Err(Error::Connect(format!(
                "create_link to {} on {} failed: {} ({error})",
                self.device,
                host,
                device_error_name(error)
            )));
        }

        tracing::info!(
            addr = %client.addr(),
            device = %self.device,
            link_id,
            max_recv_size,
            "VXI-11 link established"
        );

        Ok(Vxi11Transport {
            client: Some(client),
            link_id,
            max_recv_size: max_recv_size as usize,
            timeout,
            addr: host.to_string(),
        })
    }

    /// Ask the portmapper where the VXI-11 core channel listens.
    async fn lookup_core_port(&self, host: &str, timeout: Duration) -> Result<u16> {
        let mut client =
            RpcClient::connect(host, self.portmapper_port, PMAP_PROG, PMAP_VERS, timeout).await?;

        let mut args = BytesMut::with_capacity(16);
        args.put_u32(DEVICE_CORE_PROG);
        args.put_u32(DEVICE_CORE_VERS);
        args.put_u32(IPPROTO_TCP);
        args.put_u32(0);

        let result = client.call(PMAPPROC_GETPORT, &args, timeout).await;
        client.shutdown().await;
        let port = rpc::get_u32(&mut result?)?;

        match u16::try_from(port) {
            Ok(0) => Err(Error::Connect(format!(
                "VXI-11 core channel not registered with portmapper on {host}"
            ))),
            Ok(port) => {
                tracing::debug!(host, port, "Portmapper returned VXI-11 core port");
                Ok(port)
            }
            Err(_) => Err(Error::Protocol(format!(
                "portmapper returned invalid port {port}"
            ))),
        }
    }
}

impl Default for Vxi11Connector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for Vxi11Connector {
    async fn connect(&self, address: &str, timeout: Duration) -> Result<Box<dyn Transport>> {
        match self.open(address, timeout).await {
            Ok(transport) => Ok(Box::new(transport)),
            Err(e @ Error::Connect(_)) => Err(e),
            Err(e) => Err(Error::Connect(format!("{address}: {e}"))),
        }
    }
}

/// An open VXI-11 link to one instrument.
#[derive(Debug)]
pub struct Vxi11Transport {
    /// Core channel client, `None` after `close()` is called.
    client: Option<RpcClient>,
    link_id: i32,
    max_recv_size: usize,
    /// Timeout the session was opened with; bounds `destroy_link`.
    timeout: Duration,
    /// The instrument address for logging/debugging.
    addr: String,
}

impl Vxi11Transport {
    /// Connect to `host` with the default [`Vxi11Connector`] settings.
    pub async fn connect(host: &str, timeout: Duration) -> Result<Self> {
        Vxi11Connector::new().open(host, timeout).await
    }

    /// The link id assigned by the instrument.
    pub fn link_id(&self) -> i32 {
        self.link_id
    }

    /// Largest `device_write` chunk the instrument accepts.
    pub fn max_recv_size(&self) -> usize {
        self.max_recv_size
    }

    /// The timeout the session was opened with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The instrument address this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for Vxi11Transport {
    async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let client = self.client.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            addr = %self.addr,
            bytes = data.len(),
            data = %String::from_utf8_lossy(data),
            "Sending command"
        );

        let chunk_size = if self.max_recv_size == 0 {
            data.len().max(1)
        } else {
            self.max_recv_size
        };

        let mut offset = 0;
        loop {
            let end = (offset + chunk_size).min(data.len());
            let chunk = &data[offset..end];
            let flags = if end == data.len() { FLAG_END } else { 0 };

            let mut args = BytesMut::with_capacity(24 + chunk.len());
            args.put_i32(self.link_id);
            args.put_u32(millis(timeout)); // io_timeout
            args.put_u32(0); // lock_timeout
            args.put_i32(flags);
            rpc::put_opaque(&mut args, chunk);

            let mut reply = client.call(DEVICE_WRITE, &args, timeout).await?;
            let error = rpc::get_i32(&mut reply)?;
            let size = rpc::get_u32(&mut reply)? as usize;
            check_device_error("device_write", error)?;
            if size > chunk.len() {
                return Err(Error::Protocol(format!(
                    "device_write acknowledged {size} bytes of {}",
                    chunk.len()
                )));
            }

            offset += size;
            if offset >= data.len() {
                return Ok(());
            }
            if size == 0 {
                return Err(Error::Protocol("device_write accepted no data".into()));
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let client = self.client.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            addr = %self.addr,
            buf_len = buf.len(),
            timeout_ms = timeout.as_millis(),
            "Waiting for response"
        );

        let mut filled = 0;
        loop {
            let request_size = buf.len() - filled;
            if request_size == 0 {
                return Err(Error::ResponseTooLarge { limit: buf.len() });
            }

            let mut args = BytesMut::with_capacity(24);
            args.put_i32(self.link_id);
            args.put_u32(request_size.min(u32::MAX as usize) as u32);
            args.put_u32(millis(timeout)); // io_timeout
            args.put_u32(0); // lock_timeout
            args.put_i32(0); // flags
            args.put_u32(0); // termChar

            let mut reply = client.call(DEVICE_READ, &args, timeout).await?;
            let error = rpc::get_i32(&mut reply)?;
            let reason = rpc::get_i32(&mut reply)?;
            let data = rpc::get_opaque(&mut reply)?;
            check_device_error("device_read", error)?;

            if data.len() > request_size {
                return Err(Error::ResponseTooLarge { limit: buf.len() });
            }
            buf[filled..filled + data.len()].copy_from_slice(&data);
            filled += data.len();

            tracing::trace!(
                addr = %self.addr,
                chunk = data.len(),
                total = filled,
                reason,
                "device_read chunk"
            );

            if reason & (REASON_END | REASON_CHR) != 0 {
                return Ok(filled);
            }
            if reason & REASON_REQCNT == 0 && data.is_empty() {
                return Err(Error::Protocol(format!(
                    "device_read returned no data and no reason ({reason:#x})"
                )));
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut client) = self.client.take() {
            tracing::debug!(addr = %self.addr, link_id = self.link_id, "Destroying VXI-11 link");

            let mut args = BytesMut::with_capacity(4);
            args.put_i32(self.link_id);
            match client.call(DESTROY_LINK, &args, self.timeout).await {
                Ok(mut reply) => {
                    if let Err(e) = rpc::get_i32(&mut reply)
                        .and_then(|code| check_device_error("destroy_link", code))
                    {
                        tracing::warn!(addr = %self.addr, error = %e, "destroy_link failed (continuing anyway)");
                    }
                }
                Err(e) => {
                    tracing::warn!(addr = %self.addr, error = %e, "destroy_link failed (continuing anyway)");
                }
            }

            client.shutdown().await;
            tracing::info!(addr = %self.addr, "VXI-11 link closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }
}

impl Drop for Vxi11Transport {
    fn drop(&mut self) {
        if self.client.is_some() {
            tracing::debug!(addr = %self.addr, "Vxi11Transport dropped without close, dropping channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::server::{decode_call, encode_reply};
    use crate::rpc::{write_record, RecordReader};
    use std::time::Instant;
    use bytes::Bytes;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Scripted behavior of the in-process VXI-11 instrument.
    #[derive(Clone)]
    struct Instrument {
        /// Response returned by `device_read`.
        response: Vec<u8>,
        /// `maxRecvSize` reported by `create_link`.
        max_recv_size: u32,
        /// Most bytes returned by one `device_read`.
        read_chunk: usize,
        create_link_error: i32,
        device_read_error: i32,
        /// Use a non-END reason on the final chunk (simulates a response
        /// that keeps going past the client's buffer).
        never_end: bool,
        /// Delay before answering the first `device_write`.
        first_write_delay: Duration,
        /// Delay before answering `GETPORT`.
        getport_delay: Duration,
        /// Delay before answering `create_link`.
        create_link_delay: Duration,
        /// Delay before answering `destroy_link`.
        destroy_link_delay: Duration,
    }

    impl Default for Instrument {
        fn default() -> Self {
            Instrument {
                response: Vec::new(),
                max_recv_size: 1024,
                read_chunk: usize::MAX,
                create_link_error: 0,
                device_read_error: 0,
                never_end: false,
                first_write_delay: Duration::ZERO,
                getport_delay: Duration::ZERO,
                create_link_delay: Duration::ZERO,
                destroy_link_delay: Duration::ZERO,
            }
        }
    }

    /// What the instrument saw.
    #[derive(Debug, Default)]
    struct Observed {
        /// Complete messages (chunks joined until END).
        messages: Vec<Vec<u8>>,
        /// Size of every `device_write` chunk.
        chunk_sizes: Vec<usize>,
        device: String,
        destroyed: bool,
        portmapper_queries: usize,
    }

    /// Serve `connections` sequential connections, answering both
    /// portmapper and core channel calls.
    async fn spawn_instrument(
        instrument: Instrument,
        connections: usize,
    ) -> (u16, JoinHandle<Observed>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let mut observed = Observed::default();
            let mut cursor = 0;
            let mut current = Vec::new();

            for _ in 0..connections {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut records = RecordReader::new();
                while let Ok(record) = records.read(&mut stream).await {
                    let call = decode_call(record).unwrap();
                    let mut args = call.args;
                    let mut results = BytesMut::new();

                    match (call.program, call.procedure) {
                        (PMAP_PROG, PMAPPROC_GETPORT) => {
                            observed.portmapper_queries += 1;
                            tokio::time::sleep(instrument.getport_delay).await;
                            assert_eq!(rpc::get_u32(&mut args).unwrap(), DEVICE_CORE_PROG);
                            results.put_u32(u32::from(port));
                        }
                        (DEVICE_CORE_PROG, CREATE_LINK) => {
                            let _client_id = rpc::get_i32(&mut args).unwrap();
                            assert!(!rpc::get_bool(&mut args).unwrap());
                            let _lock_timeout = rpc::get_u32(&mut args).unwrap();
                            let device = rpc::get_opaque(&mut args).unwrap();
                            observed.device = String::from_utf8(device.to_vec()).unwrap();
                            tokio::time::sleep(instrument.create_link_delay).await;
                            results.put_i32(instrument.create_link_error);
                            results.put_i32(7);
                            results.put_u32(0);
                            results.put_u32(instrument.max_recv_size);
                        }
                        (DEVICE_CORE_PROG, DEVICE_WRITE) => {
                            assert_eq!(rpc::get_i32(&mut args).unwrap(), 7);
                            let _io_timeout = rpc::get_u32(&mut args).unwrap();
                            let _lock_timeout = rpc::get_u32(&mut args).unwrap();
                            let flags = rpc::get_i32(&mut args).unwrap();
                            let data = rpc::get_opaque(&mut args).unwrap();
                            if observed.chunk_sizes.is_empty() {
                                tokio::time::sleep(instrument.first_write_delay).await;
                            }
                            observed.chunk_sizes.push(data.len());
                            current.extend_from_slice(&data);
                            if flags & FLAG_END != 0 {
                                observed.messages.push(std::mem::take(&mut current));
                            }
                            results.put_i32(0);
                            results.put_u32(data.len() as u32);
                        }
                        (DEVICE_CORE_PROG, DEVICE_READ) => {
                            assert_eq!(rpc::get_i32(&mut args).unwrap(), 7);
                            let request_size = rpc::get_u32(&mut args).unwrap() as usize;
                            if instrument.device_read_error != 0 {
                                results.put_i32(instrument.device_read_error);
                                results.put_i32(0);
                                rpc::put_opaque(&mut results, &[]);
                            } else {
                                let remaining = &instrument.response[cursor..];
                                let n = remaining.len().min(request_size).min(instrument.read_chunk);
                                cursor += n;
                                let done = cursor == instrument.response.len();
                                let reason = if done && !instrument.never_end {
                                    REASON_END
                                } else {
                                    REASON_REQCNT
                                };
                                results.put_i32(0);
                                results.put_i32(reason);
                                rpc::put_opaque(&mut results, &remaining[..n]);
                            }
                        }
                        (DEVICE_CORE_PROG, DESTROY_LINK) => {
                            assert_eq!(rpc::get_i32(&mut args).unwrap(), 7);
                            tokio::time::sleep(instrument.destroy_link_delay).await;
                            observed.destroyed = true;
                            results.put_i32(0);
                        }
                        other => panic!("unexpected call {other:?}"),
                    }

                    let reply = encode_reply(call.xid, &results);
                    if write_record(&mut stream, &reply).await.is_err() {
                        break;
                    }
                }
            }

            observed
        });

        (port, handle)
    }

    #[tokio::test]
    async fn connect_send_receive_close() {
        let instrument = Instrument {
            response: b"LECROY,WP7300A,LCRY0101N12345,6.1.0\n".to_vec(),
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.link_id(), 7);
        assert_eq!(transport.max_recv_size(), 1024);
        assert_eq!(transport.addr(), "127.0.0.1");

        transport.send(b"*IDN?", TIMEOUT).await.unwrap();
        let mut buf = [0u8; 256];
        let n = transport.receive(&mut buf, TIMEOUT).await.unwrap();
        assert_eq!(&buf[..n], b"LECROY,WP7300A,LCRY0101N12345,6.1.0\n");

        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        let observed = server.await.unwrap();
        assert_eq!(observed.device, "inst0");
        assert_eq!(observed.messages, vec![b"*IDN?".to_vec()]);
        assert!(observed.destroyed);
    }

    #[tokio::test]
    async fn portmapper_lookup() {
        let (port, server) = spawn_instrument(Instrument::default(), 2).await;

        let mut transport = Vxi11Connector::new()
            .portmapper_port(port)
            .device("hislip0")
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        transport.close().await.unwrap();

        let observed = server.await.unwrap();
        assert_eq!(observed.portmapper_queries, 1);
        assert_eq!(observed.device, "hislip0");
    }

    #[tokio::test]
    async fn send_splits_at_max_recv_size() {
        let instrument = Instrument {
            max_recv_size: 4,
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        transport.send(b"hardcopy", TIMEOUT).await.unwrap();
        transport.send(b"scdp", TIMEOUT).await.unwrap();
        transport.close().await.unwrap();

        let observed = server.await.unwrap();
        assert_eq!(observed.chunk_sizes, vec![4, 4, 4]);
        assert_eq!(observed.messages, vec![b"hardcopy".to_vec(), b"scdp".to_vec()]);
    }

    #[tokio::test]
    async fn receive_joins_multiple_reads() {
        let response: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let instrument = Instrument {
            response: response.clone(),
            read_chunk: 512,
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        let mut buf = vec![0u8; 4096];
        let n = transport.receive(&mut buf, TIMEOUT).await.unwrap();
        assert_eq!(&buf[..n], &response[..]);

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn receive_exactly_filling_buffer() {
        let instrument = Instrument {
            response: vec![0xAB; 64],
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let n = transport.receive(&mut buf, TIMEOUT).await.unwrap();
        assert_eq!(n, 64);

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn receive_overflowing_buffer() {
        let instrument = Instrument {
            response: vec![0xAB; 64],
            never_end: true,
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let result = transport.receive(&mut buf, TIMEOUT).await;
        assert!(matches!(result, Err(Error::ResponseTooLarge { limit: 64 })));

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn device_read_timeout_maps_to_timeout() {
        let instrument = Instrument {
            device_read_error: ERR_IO_TIMEOUT,
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let result = transport.receive(&mut buf, TIMEOUT).await;
        assert!(matches!(result, Err(Error::Timeout)));

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn device_read_error_is_named() {
        let instrument = Instrument {
            device_read_error: 17,
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let err = transport.receive(&mut buf, TIMEOUT).await.unwrap_err();
        assert!(err.to_string().contains("I/O error (17)"), "{err}");

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn create_link_error_is_connect_error() {
        let instrument = Instrument {
            create_link_error: 3,
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let result = Vxi11Connector::new()
            .port(port)
            .connect("127.0.0.1", TIMEOUT)
            .await;
        match result {
            Err(Error::Connect(msg)) => assert!(msg.contains("device not accessible"), "{msg}"),
            Err(other) => panic!("expected Connect error, got: {other:?}"),
            Ok(_) => panic!("expected Connect error, got a transport"),
        }

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connector_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Vxi11Connector::new()
            .port(port)
            .connect("127.0.0.1", TIMEOUT)
            .await;
        assert!(matches!(result, Err(Error::Connect(_))));
    }

    #[tokio::test]
    async fn operations_after_close_return_not_connected() {
        let (port, server) = spawn_instrument(Instrument::default(), 1).await;

        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();
        transport.close().await.unwrap();
        // Closing again is a no-op.
        transport.close().await.unwrap();

        assert!(matches!(
            transport.send(b"scdp", TIMEOUT).await,
            Err(Error::NotConnected)
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.receive(&mut buf, TIMEOUT).await,
            Err(Error::NotConnected)
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_instrument_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _): (TcpStream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let result = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));

        server.abort();
    }

    #[tokio::test]
    async fn late_write_reply_does_not_break_later_calls() {
        let instrument = Instrument {
            response: b"TRFL? 13PNG\x01\x02\x03\x04\x05\x06\x07\x08\r\n".to_vec(),
            first_write_delay: Duration::from_millis(300),
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", TIMEOUT)
            .await
            .unwrap();

        // The acknowledgment arrives after the caller gave up.
        let result = transport
            .send(b"DELETE_FILE", Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(transport.is_connected());

        for command in [&b"hardcopy_setup"[..], b"scdp", b"TRFL?"] {
            transport.send(command, TIMEOUT).await.unwrap();
        }
        let mut buf = [0u8; 64];
        let n = transport.receive(&mut buf, TIMEOUT).await.unwrap();
        assert_eq!(&buf[..n], b"TRFL? 13PNG\x01\x02\x03\x04\x05\x06\x07\x08\r\n");

        transport.close().await.unwrap();
        let observed = server.await.unwrap();
        assert_eq!(
            observed.messages,
            vec![
                b"DELETE_FILE".to_vec(),
                b"hardcopy_setup".to_vec(),
                b"scdp".to_vec(),
                b"TRFL?".to_vec(),
            ]
        );
        assert!(observed.destroyed);
    }

    #[tokio::test]
    async fn setup_timeout_covers_every_step() {
        // Each step fits in the timeout on its own; together they do not.
        let instrument = Instrument {
            getport_delay: Duration::from_millis(70),
            create_link_delay: Duration::from_millis(70),
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 2).await;

        let started = Instant::now();
        let result = Vxi11Connector::new()
            .portmapper_port(port)
            .open("127.0.0.1", Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(started.elapsed() < Duration::from_millis(250));

        server.abort();
    }

    #[tokio::test]
    async fn destroy_link_uses_session_timeout() {
        let instrument = Instrument {
            destroy_link_delay: Duration::from_millis(400),
            ..Default::default()
        };
        let (port, server) = spawn_instrument(instrument, 1).await;

        let session_timeout = Duration::from_millis(100);
        let mut transport = Vxi11Connector::new()
            .port(port)
            .open("127.0.0.1", session_timeout)
            .await
            .unwrap();
        assert_eq!(transport.timeout(), session_timeout);

        let started = Instant::now();
        transport.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(!transport.is_connected());

        server.await.unwrap();
    }

    #[test]
    fn device_error_names() {
        assert_eq!(device_error_name(0), "no error");
        assert_eq!(device_error_name(11), "device locked by another link");
        assert_eq!(device_error_name(99), "unknown device error");
        assert!(check_device_error("device_write", 0).is_ok());
        assert!(matches!(
            check_device_error("device_write", 15),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn timeout_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(5000)), 5000);
        assert_eq!(millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[test]
    fn opaque_reply_helpers_agree() {
        let mut buf = BytesMut::new();
        rpc::put_opaque(&mut buf, b"abc");
        let mut bytes: Bytes = buf.freeze();
        assert_eq!(&rpc::get_opaque(&mut bytes).unwrap()[..], b"abc");
    }
}
