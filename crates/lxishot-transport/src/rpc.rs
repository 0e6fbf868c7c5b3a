//! ONC-RPC client over TCP, with the XDR primitives VXI-11 needs.
//!
//! VXI-11 is defined as a set of ONC-RPC (RFC 5531) programs. On TCP every
//! RPC message is sent as a *record*: one or more fragments, each prefixed
//! with a 4-byte big-endian header whose top bit marks the last fragment
//! and whose low 31 bits carry the fragment length.
//!
//! # Call message layout
//!
//! ```text
//! xid | CALL(0) | rpcvers(2) | prog | vers | proc | cred | verf | args...
//! ```
//!
//! Credentials and verifier are both AUTH_NONE (flavor 0, empty body).
//!
//! # Reply message layout
//!
//! ```text
//! xid | REPLY(1) | MSG_ACCEPTED(0) | verf | SUCCESS(0) | results...
//! ```
//!
//! All integers are big-endian 32-bit words; variable-length opaque data
//! and strings carry a length word and are zero-padded to a multiple of 4.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use lxishot_core::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// ONC-RPC protocol version.
pub const RPC_VERSION: u32 = 2;

const MSG_CALL: u32 = 0;
const MSG_REPLY: u32 = 1;
const MSG_ACCEPTED: u32 = 0;
const AUTH_NONE: u32 = 0;
const ACCEPT_SUCCESS: u32 = 0;

/// Record-marking bit flagging the last fragment of a record.
pub const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Largest record accepted from a peer. Screen images are a few MiB at
/// most; anything beyond this is a corrupt or hostile length header.
pub const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// XDR primitives
// ---------------------------------------------------------------------------

/// Number of zero bytes that pad `len` bytes to a 4-byte boundary.
pub fn xdr_padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Append variable-length opaque data (length word, bytes, padding).
pub fn put_opaque(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
    buf.put_bytes(0, xdr_padding(data.len()));
}

/// Append an XDR boolean (one word, 0 or 1).
pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u32(u32::from(value));
}

/// Append an XDR string. Encoded exactly like opaque data.
pub fn put_string(buf: &mut BytesMut, s: &str) {
    put_opaque(buf, s.as_bytes());
}

/// Read one unsigned 32-bit word.
pub fn get_u32(buf: &mut Bytes) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::Protocol(format!(
            "XDR underflow: need 4 bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(buf.get_u32())
}

/// Read one signed 32-bit word.
pub fn get_i32(buf: &mut Bytes) -> Result<i32> {
    get_u32(buf).map(|v| v as i32)
}

/// Read an XDR boolean. Values other than 0 and 1 are rejected.
pub fn get_bool(buf: &mut Bytes) -> Result<bool> {
    match get_u32(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::Protocol(format!("invalid XDR boolean {other}"))),
    }
}

/// Read variable-length opaque data, consuming its padding.
pub fn get_opaque(buf: &mut Bytes) -> Result<Bytes> {
    let len = get_u32(buf)? as usize;
    let padded = len + xdr_padding(len);
    if buf.remaining() < padded {
        return Err(Error::Protocol(format!(
            "XDR underflow: opaque of {} bytes, {} left",
            len,
            buf.remaining()
        )));
    }
    let data = buf.split_to(len);
    buf.advance(padded - len);
    Ok(data)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Encode an RPC call message (without record marking).
pub fn encode_call(xid: u32, program: u32, version: u32, procedure: u32, args: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(40 + args.len());
    buf.put_u32(xid);
    buf.put_u32(MSG_CALL);
    buf.put_u32(RPC_VERSION);
    buf.put_u32(program);
    buf.put_u32(version);
    buf.put_u32(procedure);
    // cred
    buf.put_u32(AUTH_NONE);
    buf.put_u32(0);
    // verf
    buf.put_u32(AUTH_NONE);
    buf.put_u32(0);
    buf.put_slice(args);
    buf
}

/// Decode an RPC reply message and return the procedure results.
///
/// The reply must carry `expected_xid`, be accepted, and report success.
pub fn decode_reply(expected_xid: u32, mut msg: Bytes) -> Result<Bytes> {
    let xid = get_u32(&mut msg)?;
    if xid != expected_xid {
        return Err(Error::Protocol(format!(
            "RPC reply xid {xid:#010x} does not match call {expected_xid:#010x}"
        )));
    }

    let msg_type = get_u32(&mut msg)?;
    if msg_type != MSG_REPLY {
        return Err(Error::Protocol(format!(
            "expected RPC reply, got message type {msg_type}"
        )));
    }

    let reply_stat = get_u32(&mut msg)?;
    if reply_stat != MSG_ACCEPTED {
        return Err(Error::Protocol(format!(
            "RPC call denied (reply_stat {reply_stat})"
        )));
    }

    // verf: flavor + opaque body
    let _flavor = get_u32(&mut msg)?;
    let _body = get_opaque(&mut msg)?;

    let accept_stat = get_u32(&mut msg)?;
    if accept_stat != ACCEPT_SUCCESS {
        return Err(Error::Protocol(format!(
            "RPC call not executed: {}",
            accept_stat_name(accept_stat)
        )));
    }

    Ok(msg)
}

fn accept_stat_name(stat: u32) -> &'static str {
    match stat {
        1 => "program unavailable",
        2 => "program version mismatch",
        3 => "procedure unavailable",
        4 => "garbage arguments",
        5 => "system error",
        _ => "unknown accept status",
    }
}

// ---------------------------------------------------------------------------
// Record marking
// ---------------------------------------------------------------------------

/// Write `msg` as a single-fragment record.
pub async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, msg: &[u8]) -> std::io::Result<()> {
    let mut framed = BytesMut::with_capacity(4 + msg.len());
    framed.put_u32(LAST_FRAGMENT | msg.len() as u32);
    framed.put_slice(msg);
    writer.write_all(&framed).await?;
    writer.flush().await
}

/// Reassembles records from a byte stream.
///
/// Buffered bytes and completed fragments live in the reader, not in the
/// future returned by [`read`](RecordReader::read). Dropping that future
/// (for example when a timeout fires) loses nothing: the next `read`
/// picks up where the previous one stopped.
#[derive(Debug, Default)]
pub struct RecordReader {
    /// Bytes received but not yet consumed as fragments.
    rx: BytesMut,
    /// Fragments of the record being assembled.
    partial: BytesMut,
}

impl RecordReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one complete record, reassembling fragments.
    pub async fn read<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<Bytes> {
        loop {
            if let Some(record) = self.take_record()? {
                return Ok(record);
            }
            let n = reader.read_buf(&mut self.rx).await.map_err(map_io_error)?;
            if n == 0 {
                return Err(Error::ConnectionLost);
            }
        }
    }

    /// Pop a complete record out of the buffered bytes, if there is one.
    fn take_record(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.rx.len() < 4 {
                self.rx.reserve(4);
                return Ok(None);
            }
            let header = (&self.rx[..4]).get_u32();
            let len = (header & !LAST_FRAGMENT) as usize;
            if self.partial.len() + len > MAX_RECORD_LEN {
                return Err(Error::Protocol(format!(
                    "RPC record exceeds {MAX_RECORD_LEN} bytes"
                )));
            }
            if self.rx.len() < 4 + len {
                self.rx.reserve(4 + len - self.rx.len());
                return Ok(None);
            }

            self.rx.advance(4);
            let fragment = self.rx.split_to(len);
            self.partial.extend_from_slice(&fragment);
            if header & LAST_FRAGMENT != 0 {
                return Ok(Some(self.partial.split().freeze()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// An ONC-RPC client bound to one program/version over one TCP stream.
///
/// Calls are cancel-safe. A reply that arrives after its call timed out is
/// recognised by its xid and skipped by the next call. A call cancelled in
/// the middle of writing its request leaves the stream unusable; later
/// calls then fail with [`Error::NotConnected`].
#[derive(Debug)]
pub struct RpcClient {
    stream: TcpStream,
    records: RecordReader,
    program: u32,
    version: u32,
    next_xid: u32,
    /// Set while a request is being written and after a stream failure.
    broken: bool,
    addr: String,
}

impl RpcClient {
    /// Connect to `host:port` and bind the client to `program`/`version`.
    pub async fn connect(
        host: &str,
        port: u16,
        program: u32,
        version: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let addr = format!("{host}:{port}");
        tracing::debug!(
            addr = %addr,
            program,
            version,
            timeout_ms = timeout.as_millis(),
            "Connecting RPC client"
        );

        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "RPC connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "RPC connection failed");
                map_connect_error(e, &addr)
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY (continuing anyway)");
        }

        Ok(Self {
            stream,
            records: RecordReader::new(),
            program,
            version,
            next_xid: rand::random(),
            broken: false,
            addr,
        })
    }

    /// The `host:port` this client is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Perform one call and return the procedure results.
    ///
    /// `timeout` bounds the whole round trip.
    pub async fn call(&mut self, procedure: u32, args: &[u8], timeout: Duration) -> Result<Bytes> {
        if self.broken {
            return Err(Error::NotConnected);
        }

        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);
        let msg = encode_call(xid, self.program, self.version, procedure, args);

        tracing::trace!(
            addr = %self.addr,
            xid,
            procedure,
            args_len = args.len(),
            "RPC call"
        );

        let reply = tokio::time::timeout(timeout, self.exchange(xid, &msg))
            .await
            .map_err(|_| {
                tracing::debug!(xid, procedure, timeout_ms = timeout.as_millis(), "RPC call timed out");
                Error::Timeout
            })??;

        tracing::trace!(addr = %self.addr, xid, reply_len = reply.len(), "RPC reply");
        decode_reply(xid, reply)
    }

    /// Write the request, then read records until the reply to `xid`.
    async fn exchange(&mut self, xid: u32, msg: &[u8]) -> Result<Bytes> {
        self.broken = true;
        write_record(&mut self.stream, msg)
            .await
            .map_err(map_io_error)?;
        self.broken = false;

        loop {
            let record = match self.records.read(&mut self.stream).await {
                Ok(record) => record,
                Err(e) => {
                    self.broken = true;
                    return Err(e);
                }
            };
            match record.get(..4).map(|mut head| head.get_u32()) {
                Some(stale_xid) if stale_xid != xid => {
                    tracing::debug!(addr = %self.addr, xid, stale_xid, "Discarding late RPC reply");
                }
                _ => return Ok(record),
            }
        }
    }

    /// Shut the TCP stream down, ignoring errors.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::warn!(addr = %self.addr, error = %e, "Failed to shutdown RPC stream (continuing anyway)");
        }
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => Error::Connect(format!("connection refused: {addr}")),
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
