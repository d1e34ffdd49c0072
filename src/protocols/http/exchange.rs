//! Server side of one request/response exchange.
//!
//! `Exchange` owns everything a connection needs between suspensions: the
//! connection itself, its FrameBuffer, the reader state and the staged
//! response. Schedulers only ever call `resume` and, at the end, `close`.

use super::message::{Message, Method};
use super::reader::{Expect, MessageReader};
use super::writer::OutboundMessage;
use super::Limits;
use crate::error::{Error, Result};
use crate::runtime::{ready, Connection, FrameBuffer, IoPolicy, Step};
use tracing::{debug, warn};

/// Application callback invoked once per received request.
///
/// Must call `Responder::send` (or `send_status`) exactly once.
pub trait Handler: Send + Sync {
    fn handle(&self, request: Message, responder: &mut Responder) -> Result<()>;
}

impl<F> Handler for F
where
    F: Fn(Message, &mut Responder) -> Result<()> + Send + Sync,
{
    fn handle(&self, request: Message, responder: &mut Responder) -> Result<()> {
        self(request, responder)
    }
}

/// Stages the single response to a request.
#[derive(Debug)]
pub struct Responder {
    head_only: bool,
    outbound: Option<OutboundMessage>,
}

impl Responder {
    fn new(head_only: bool) -> Self {
        Self {
            head_only,
            outbound: None,
        }
    }

    /// Respond `200 OK` with `body`.
    pub fn send(&mut self, body: &[u8]) -> Result<()> {
        self.send_status(200, "OK", body)
    }

    /// Respond with an explicit status. A second response is a `Logic` error.
    pub fn send_status(&mut self, code: u16, reason: &str, body: &[u8]) -> Result<()> {
        if self.outbound.is_some() {
            return Err(Error::Logic("response already sent"));
        }
        self.outbound = Some(OutboundMessage::response(code, reason, body, self.head_only));
        Ok(())
    }
}

#[derive(Debug)]
enum Phase {
    Receiving,
    Responding(OutboundMessage),
    Finished,
}

/// One connection's request/response exchange.
#[derive(Debug)]
pub struct Exchange<P: IoPolicy> {
    conn: Connection<P>,
    buffer: FrameBuffer,
    reader: MessageReader,
    phase: Phase,
}

impl<P: IoPolicy> Exchange<P> {
    pub fn new(conn: Connection<P>, limits: Limits) -> Self {
        Self {
            conn,
            buffer: FrameBuffer::with_capacity(limits.buffer_capacity),
            reader: MessageReader::new(Expect::Request, limits),
            phase: Phase::Receiving,
        }
    }

    pub fn connection(&self) -> &Connection<P> {
        &self.conn
    }

    /// Run until the exchange finishes or the connection blocks.
    ///
    /// The handler runs exactly once, when the request is complete.
    pub fn resume<H: Handler + ?Sized>(&mut self, handler: &H) -> Result<Step<()>> {
        loop {
            match self.phase {
                Phase::Receiving => {
                    let request = ready!(self.reader.poll_message(&mut self.buffer, &mut self.conn)?);
                    debug!(
                        method = ?request.method(),
                        path = request.target().unwrap_or_default(),
                        host = request.header("Host").unwrap_or_default(),
                        body_len = request.body().len(),
                        "Request received"
                    );

                    let mut responder = Responder::new(request.method() == Some(Method::Head));
                    handler.handle(request, &mut responder)?;
                    match responder.outbound {
                        Some(outbound) => self.phase = Phase::Responding(outbound),
                        None => {
                            warn!(peer = ?self.conn.peer_addr(), "Handler returned without responding");
                            self.phase = Phase::Finished;
                        }
                    }
                }
                Phase::Responding(ref mut outbound) => {
                    ready!(outbound.poll_send(&mut self.conn)?);
                    self.phase = Phase::Finished;
                }
                Phase::Finished => return Ok(Step::Ready(())),
            }
        }
    }

    /// Release the connection, reporting close failures.
    pub fn close(self) -> Result<()> {
        let mut conn = self.conn;
        conn.close()
    }
}
