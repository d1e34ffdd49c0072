//! Hand-rolled one-shot client.
//!
//! Connects, sends one request, shuts down the write half and reads the
//! response with the same reader the server uses.

use crate::error::Result;
use crate::protocols::http::{Expect, Limits, Message, MessageReader, Method, OutboundMessage};
use crate::runtime::{complete, Blocking, Connection, FrameBuffer};
use tracing::debug;

/// Send `body` to `addr` (`host:port`) and wait for the response.
pub fn send(addr: &str, method: Method, target: &str, body: &[u8], limits: Limits) -> Result<Message> {
    let mut conn = Connection::connect_to(addr, Blocking)?;
    let host = addr.rsplit_once(':').map_or(addr, |(host, _port)| host);

    let mut request = OutboundMessage::request(method, target, host, body);
    complete(|| request.poll_send(&mut conn))?;
    debug!(addr, method = %method, bytes = request.as_bytes().len(), "Request sent");

    let mut buffer = FrameBuffer::with_capacity(limits.buffer_capacity);
    let mut reader = MessageReader::new(Expect::Response { method }, limits);
    let response = complete(|| reader.poll_message(&mut buffer, &mut conn))?;
    debug!(status = ?response.status(), body_len = response.body().len(), "Response received");

    conn.close()?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{reply_payload, FixedReply};
    use crate::config::SchedulerKind;
    use crate::error::Error;
    use crate::server::{Server, ServerOptions};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_client_against_server() {
        let options = ServerOptions {
            scheduler: SchedulerKind::Pool,
            workers: 2,
            ..ServerOptions::default()
        };
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), options).unwrap();
        let addr = server.local_addr().to_string();
        let app = FixedReply::new(reply_payload(None), server.stop_signal());
        let running = thread::spawn(move || server.run(Arc::new(app)));

        let response = send(&addr, Method::Post, "/message", b"hello", Limits::default()).unwrap();
        assert_eq!(response.status(), Some(200));
        assert_eq!(response.header("Content-Length"), Some("2"));
        assert_eq!(response.body(), b"OK");

        let response = send(&addr, Method::Head, "/", b"", Limits::default()).unwrap();
        assert_eq!(response.status(), Some(200));
        assert!(response.body().is_empty());

        let response = send(&addr, Method::Post, "/message", b"Done", Limits::default()).unwrap();
        assert_eq!(response.body(), b"Stoped");
        running.join().unwrap().unwrap();

        assert!(matches!(
            send(&addr, Method::Get, "/", b"", Limits::default()),
            Err(Error::Connect { .. })
        ));
    }
}
