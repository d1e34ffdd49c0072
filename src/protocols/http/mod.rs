//! HTTP-style one-shot message protocol.
//!
//! One request and one response per connection:
//!
//! ```text
//! Request:  METHOD SP TARGET SP HTTP/1.1 CRLF
//!           Name: Value CRLF ...
//!           CRLF
//!           body (Content-Length bytes, or until the peer shuts down)
//!
//! Response: HTTP/1.1 SP CODE SP REASON CRLF
//!           Name: Value CRLF ...
//!           CRLF
//!           body
//! ```
//!
//! Chunked and identity transfer encodings and multipart bodies are
//! rejected, not decoded.

pub mod exchange;
pub mod message;
pub mod parser;
pub mod reader;
pub mod writer;

pub use exchange::{Exchange, Handler, Responder};
pub use message::{Message, Method};
pub use reader::{Expect, MessageReader};
pub use writer::OutboundMessage;

use crate::runtime::DEFAULT_CAPACITY;

/// Size limits applied while receiving a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// FrameBuffer capacity; also the longest accepted line.
    pub buffer_capacity: usize,
    /// Initial allocation for bodies read until close.
    pub body_capacity: usize,
    /// Largest body accepted, declared or not.
    pub max_body: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            body_capacity: 1024,
            max_body: 16 * 1024 * 1024,
        }
    }
}
