//! Fixed-reply application served by default.
//!
//! Every request gets the same payload back. A request whose body is
//! exactly `Done` stops the server instead and is answered `Stoped`.

use crate::error::Result;
use crate::protocols::http::{Handler, Message, Responder};
use crate::server::StopSignal;
use bytes::Bytes;
use tracing::info;

/// Body that asks the server to stop accepting.
pub const STOP_BODY: &[u8] = b"Done";

/// Reply sent to the stop request.
pub const STOP_REPLY: &[u8] = b"Stoped";

/// Build the reply payload: `OK`, or `size` bytes cycling `A..Z`.
pub fn reply_payload(size: Option<usize>) -> Bytes {
    match size {
        None => Bytes::from_static(b"OK"),
        Some(size) => (0..size).map(|i| b'A' + (i % 26) as u8).collect(),
    }
}

/// Replies with a fixed payload; stops the server on `Done`.
#[derive(Debug, Clone)]
pub struct FixedReply {
    payload: Bytes,
    stop: StopSignal,
}

impl FixedReply {
    pub fn new(payload: Bytes, stop: StopSignal) -> Self {
        Self { payload, stop }
    }
}

impl Handler for FixedReply {
    fn handle(&self, request: Message, responder: &mut Responder) -> Result<()> {
        if request.body() == STOP_BODY && !self.stop.is_requested() {
            info!(path = request.target().unwrap_or_default(), "Stop message received");
            self.stop.request();
            return responder.send(STOP_REPLY);
        }
        responder.send(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerKind;
    use crate::server::tests::post;
    use crate::server::{Server, ServerOptions};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_default_payload() {
        assert_eq!(reply_payload(None), Bytes::from_static(b"OK"));
    }

    #[test]
    fn test_sized_payload_cycles_alphabet() {
        let payload = reply_payload(Some(30));
        assert_eq!(payload.len(), 30);
        assert_eq!(&payload[..3], b"ABC");
        assert_eq!(payload[25], b'Z');
        assert_eq!(&payload[26..], b"ABCD");
        assert!(reply_payload(Some(0)).is_empty());
    }

    #[test]
    fn test_fixed_reply_over_sequential_server() {
        let options = ServerOptions {
            scheduler: SchedulerKind::Sequential,
            ..ServerOptions::default()
        };
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), options).unwrap();
        let addr = server.local_addr();
        let app = FixedReply::new(reply_payload(Some(5)), server.stop_signal());
        let running = thread::spawn(move || server.run(Arc::new(app)));

        assert!(post(addr, "anything").ends_with("\r\n\r\nABCDE"));
        assert!(post(addr, "Done").ends_with("\r\n\r\nStoped"));
        running.join().unwrap().unwrap();
    }
}
