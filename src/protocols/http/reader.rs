//! Resumable message receiver.
//!
//! `MessageReader` walks `StartLine -> Headers -> Body -> Complete` and keeps
//! every bit of partial progress in its own fields. When the connection
//! suspends, `poll_message` returns `Step::Blocked` and the next call picks
//! up exactly where the last one stopped.

use super::message::{BodyLength, Header, Message, Method, StartLine};
use super::parser::{is_blank, parse_header_line, parse_request_line, parse_status_line, Framing};
use super::Limits;
use crate::error::{Error, Result};
use crate::runtime::{ready, Connection, FrameBuffer, IoPolicy, Step};
use std::mem;
use tracing::{debug, trace, warn};

/// Which kind of message the reader expects on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// A request, as read by the server side.
    Request,
    /// A response to a request sent with `method`.
    Response { method: Method },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitStartLine,
    AwaitHeaders,
    AwaitBody(BodyLength),
    Complete,
}

/// Receives one message over a connection.
#[derive(Debug)]
pub struct MessageReader {
    expect: Expect,
    limits: Limits,
    state: State,
    start: Option<StartLine>,
    headers: Vec<Header>,
    framing: Framing,
    body: Vec<u8>,
    /// Body bytes received so far; `body.len()` is the current capacity.
    filled: usize,
}

impl MessageReader {
    pub fn new(expect: Expect, limits: Limits) -> Self {
        Self {
            expect,
            limits,
            state: State::AwaitStartLine,
            start: None,
            headers: Vec::new(),
            framing: Framing::default(),
            body: Vec::new(),
            filled: 0,
        }
    }

    /// Advance until a whole message has arrived or the connection blocks.
    pub fn poll_message<P: IoPolicy>(
        &mut self,
        buffer: &mut FrameBuffer,
        conn: &mut Connection<P>,
    ) -> Result<Step<Message>> {
        loop {
            match self.state {
                State::AwaitStartLine => {
                    let len = ready!(buffer.read_line(conn)?);
                    if len == 0 {
                        return Err(Error::PeerDisconnected);
                    }
                    let line = buffer.record();
                    let start = match self.expect {
                        Expect::Request => parse_request_line(line)?,
                        Expect::Response { .. } => parse_status_line(line)?,
                    };
                    trace!(start = ?start, "Start line");
                    self.start = Some(start);
                    self.state = State::AwaitHeaders;
                }
                State::AwaitHeaders => {
                    let len = ready!(buffer.read_line(conn)?);
                    let line = buffer.record();
                    if len == 0 {
                        return Err(Error::format("header block not terminated by an empty line", line));
                    }
                    if is_blank(line) {
                        let length = self.resolve_body_length()?;
                        self.begin_body(length);
                        self.state = State::AwaitBody(length);
                        continue;
                    }
                    let header = parse_header_line(line)?;
                    self.framing.observe(&header, line)?;
                    self.headers.push(header);
                }
                State::AwaitBody(length) => {
                    ready!(self.poll_body(length, buffer, conn)?);
                    let unread = buffer.buffered();
                    if unread > 0 {
                        debug!(unread, "Bytes after the message body left unread");
                    }
                    self.state = State::Complete;
                    return self.finish().map(Step::Ready);
                }
                State::Complete => return Err(Error::Logic("message already received")),
            }
        }
    }

    fn resolve_body_length(&self) -> Result<BodyLength> {
        let (status, head) = match (self.expect, &self.start) {
            (Expect::Request, Some(StartLine::Request { method, .. })) => {
                (None, *method == Method::Head)
            }
            (Expect::Response { method }, Some(StartLine::Response { code, .. })) => {
                (Some(*code), method == Method::Head)
            }
            _ => return Err(Error::Logic("headers read before start line")),
        };
        self.framing.body_length(status, head, self.limits.max_body)
    }

    fn begin_body(&mut self, length: BodyLength) {
        self.filled = 0;
        let capacity = match length {
            BodyLength::Fixed(len) => len,
            BodyLength::UntilClose => self
                .limits
                .body_capacity
                .min(self.limits.max_body.saturating_add(1))
                .max(1),
        };
        // Sized once up front; until-close bodies grow from here.
        self.body = vec![0u8; capacity];
    }

    fn poll_body<P: IoPolicy>(
        &mut self,
        length: BodyLength,
        buffer: &mut FrameBuffer,
        conn: &mut Connection<P>,
    ) -> Result<Step<()>> {
        loop {
            if self.filled == self.body.len() {
                match length {
                    BodyLength::Fixed(_) => return Ok(Step::Ready(())),
                    BodyLength::UntilClose => self.grow_body(),
                }
            }

            let n = ready!(buffer.read_body(conn, &mut self.body[self.filled..])?);
            if n == 0 {
                if let BodyLength::Fixed(expected) = length {
                    warn!(
                        expected,
                        received = self.filled,
                        "Peer closed before the declared body arrived"
                    );
                }
                self.body.truncate(self.filled);
                return Ok(Step::Ready(()));
            }

            self.filled += n;
            if self.filled > self.limits.max_body {
                // No single line is at fault; the diagnostic carries no bytes.
                return Err(Error::format("body exceeds max_body_size", &[]));
            }
        }
    }

    /// Grow by half plus a little, capped one past the body limit so an
    /// oversized body is detected rather than silently truncated.
    fn grow_body(&mut self) {
        let len = self.body.len();
        let grown = len
            .saturating_add(len / 2)
            .saturating_add(10)
            .min(self.limits.max_body.saturating_add(1));
        self.body.resize(grown, 0);
    }

    fn finish(&mut self) -> Result<Message> {
        let start = self
            .start
            .take()
            .ok_or(Error::Logic("message completed without a start line"))?;
        Ok(Message {
            start,
            headers: mem::take(&mut self.headers),
            body: mem::take(&mut self.body),
        })
    }
}
