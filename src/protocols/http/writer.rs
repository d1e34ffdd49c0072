//! Outbound message serialisation and resumable sending.
//!
//! A message is serialised in full before the first byte goes out, so an
//! invalid message never reaches the wire. Sending writes the bytes,
//! then shuts down the write half: every exchange carries exactly one
//! request and one response.

use super::message::Method;
use crate::error::Result;
use crate::runtime::{ready, Connection, IoPolicy, Step};
use bytes::{Bytes, BytesMut};
use chrono::Utc;

/// Product token used in `User-Agent` and `Server`.
pub const PRODUCT: &str = concat!("wirestep/", env!("CARGO_PKG_VERSION"));

const VERSION: &str = "HTTP/1.1";

/// Whether a response with this code may carry a body at all.
pub fn status_allows_body(code: u16) -> bool {
    !(code < 200 || code == 204 || code == 304)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Writing,
    Shutdown,
    Done,
}

/// A serialised message plus its send progress.
#[derive(Debug)]
pub struct OutboundMessage {
    bytes: Bytes,
    sent: usize,
    state: SendState,
}

impl OutboundMessage {
    /// Serialise a request.
    ///
    /// Headers are written in a fixed order: `Content-Type`,
    /// `Content-Length`, `Host`, `User-Agent`, `Accept`.
    pub fn request(method: Method, target: &str, host: &str, body: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(128 + body.len());
        buf.extend_from_slice(format!("{} {} {}\r\n", method, target, VERSION).as_bytes());
        buf.extend_from_slice(b"Content-Type: text/plain\r\n");
        buf.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", host).as_bytes());
        buf.extend_from_slice(format!("User-Agent: {}\r\n", PRODUCT).as_bytes());
        buf.extend_from_slice(b"Accept: */*\r\n");
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(body);
        Self::from_bytes(buf.freeze())
    }

    /// Serialise a response.
    ///
    /// `head_only` answers a HEAD request: headers describe `body` but no
    /// body bytes follow. Codes that never carry a body get neither.
    pub fn response(code: u16, reason: &str, body: &[u8], head_only: bool) -> Self {
        let with_body = status_allows_body(code);
        let mut buf = BytesMut::with_capacity(160 + body.len());
        buf.extend_from_slice(format!("{} {} {}\r\n", VERSION, code, reason).as_bytes());
        buf.extend_from_slice(
            format!("Date: {}\r\n", Utc::now().format("%a, %d %b %Y %H:%M:%S GMT")).as_bytes(),
        );
        buf.extend_from_slice(format!("Server: {}\r\n", PRODUCT).as_bytes());
        if with_body {
            buf.extend_from_slice(b"Content-Type: text/plain\r\n");
            buf.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        if with_body && !head_only {
            buf.extend_from_slice(body);
        }
        Self::from_bytes(buf.freeze())
    }

    fn from_bytes(bytes: Bytes) -> Self {
        Self {
            bytes,
            sent: 0,
            state: SendState::Writing,
        }
    }

    /// The serialised message.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Write the message and shut down the write half.
    ///
    /// Resumable after `Blocked`; polling a sent message is a no-op.
    pub fn poll_send<P: IoPolicy>(&mut self, conn: &mut Connection<P>) -> Result<Step<()>> {
        loop {
            match self.state {
                SendState::Writing => {
                    ready!(conn.write_all(&self.bytes, &mut self.sent)?);
                    self.state = SendState::Shutdown;
                }
                SendState::Shutdown => {
                    conn.shutdown_write()?;
                    self.state = SendState::Done;
                }
                SendState::Done => return Ok(Step::Ready(())),
            }
        }
    }
}
