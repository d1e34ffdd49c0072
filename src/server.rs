//! Connection schedulers.
//!
//! Four interchangeable strategies run the same per-connection logic
//! (`Exchange::resume` to completion, then close):
//!
//! - `sequential`: accept and serve inline, one connection at a time
//! - `threaded`: one detached thread per accepted connection
//! - `pool`: fixed worker threads draining a shared job queue
//! - `event_loop`: single thread, cooperative connections, mio readiness
//!
//! All of them stop accepting once the `StopSignal` fires. A stop request
//! opens a throwaway loopback connection so a thread blocked in `accept`
//! wakes up and sees the flag.

mod event_loop;
mod pool;
mod registry;
mod sequential;
mod threaded;

use registry::Registry;

use crate::config::SchedulerKind;
use crate::error::{Error, Result};
use crate::protocols::http::{Exchange, Handler, Limits};
use crate::runtime::{complete, Blocking, Connection, Listener};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Scheduler parameters.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub scheduler: SchedulerKind,
    /// Worker threads for the pool scheduler.
    pub workers: usize,
    /// Live connections the event loop will track.
    pub max_connections: usize,
    /// Readiness events fetched per poll.
    pub event_capacity: usize,
    pub limits: Limits,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::Pool,
            workers: 4,
            max_connections: 1024,
            event_capacity: 256,
            limits: Limits::default(),
        }
    }
}

/// Shared "stop accepting" flag plus the address used to wake the acceptor.
#[derive(Debug, Clone)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
    wake_addr: SocketAddr,
}

impl StopSignal {
    fn new(listen_addr: SocketAddr) -> Self {
        let ip = match listen_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            wake_addr: SocketAddr::new(ip, listen_addr.port()),
        }
    }

    /// Ask the scheduler to stop accepting. Only the first call has an effect.
    pub fn request(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stop requested");
        // Unblock an acceptor parked in accept(2); the connection is dropped unused.
        match Connection::connect(self.wake_addr, Blocking) {
            Ok(conn) => drop(conn),
            Err(e) => debug!(error = %e, "Wake-up connection failed"),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// A bound listener plus the scheduler that will drain it.
pub struct Server {
    listener: Listener,
    options: ServerOptions,
    stop: StopSignal,
}

impl Server {
    pub fn bind(addr: SocketAddr, options: ServerOptions) -> Result<Self> {
        let listener = Listener::bind(addr)?;
        let stop = StopSignal::new(listener.local_addr());
        Ok(Self {
            listener,
            options,
            stop,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Handle that stops this server; hand it to the application.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Serve connections until stopped, then release the listener.
    pub fn run<H: Handler + ?Sized + 'static>(self, handler: Arc<H>) -> Result<()> {
        let Server {
            mut listener,
            options,
            stop,
        } = self;

        info!(
            scheduler = ?options.scheduler,
            addr = %listener.local_addr(),
            workers = options.workers,
            max_connections = options.max_connections,
            buffer_capacity = options.limits.buffer_capacity,
            "Scheduler started"
        );

        let result = match options.scheduler {
            SchedulerKind::Sequential => {
                sequential::run(&listener, &stop, handler.as_ref(), options.limits)
            }
            SchedulerKind::Thread => threaded::run(&listener, &stop, handler, options.limits),
            SchedulerKind::Pool => {
                pool::run(&listener, &stop, handler, options.workers, options.limits)
            }
            SchedulerKind::EventLoop => {
                event_loop::run(&listener, &stop, handler.as_ref(), &options)
            }
        };

        if let Err(e) = listener.close() {
            warn!(error = %e, "Failed to close listener");
        }
        info!(scheduler = ?options.scheduler, "Scheduler stopped");
        result
    }
}

/// Blocking accept loop shared by the thread-based schedulers.
///
/// Re-checks the stop flag after every accept so the wake-up connection
/// is never dispatched.
fn accept_until_stopped(
    listener: &Listener,
    stop: &StopSignal,
    mut dispatch: impl FnMut(Connection<Blocking>) -> Result<()>,
) -> Result<()> {
    while !stop.is_requested() {
        let conn = listener.accept()?;
        if stop.is_requested() {
            debug!("Stop observed after accept");
            break;
        }
        debug!(peer = ?conn.peer_addr(), "Accepted connection");
        dispatch(conn)?;
    }
    Ok(())
}

/// Run one exchange to completion on a blocking connection.
pub(crate) fn serve_connection<H: Handler + ?Sized>(
    conn: Connection<Blocking>,
    handler: &H,
    limits: Limits,
) {
    let peer = conn.peer_addr();
    let mut exchange = Exchange::new(conn, limits);
    let outcome = complete(|| exchange.resume(handler));
    report(peer, outcome);
    if let Err(e) = exchange.close() {
        warn!(peer = ?peer, error = %e, "Failed to close connection");
    }
}

/// Log how an exchange ended. Peer disconnects are expected and benign.
fn report(peer: Option<SocketAddr>, outcome: Result<()>) {
    match outcome {
        Ok(()) => debug!(peer = ?peer, "Exchange complete"),
        Err(Error::PeerDisconnected) => info!(peer = ?peer, "Peer disconnected"),
        Err(e) => warn!(peer = ?peer, error = %e, "Exchange failed"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocols::http::{Message, Responder};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;

    /// Reply "OK", or "Stoped" and stop the server on a "Done" body.
    pub(crate) fn stopping_handler(stop: StopSignal) -> impl Handler {
        move |request: Message, responder: &mut Responder| {
            if request.body() == b"Done" && !stop.is_requested() {
                stop.request();
                return responder.send(b"Stoped");
            }
            responder.send(b"OK")
        }
    }

    pub(crate) fn exchange_raw(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request).unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        String::from_utf8(response).unwrap()
    }

    pub(crate) fn post(addr: SocketAddr, body: &str) -> String {
        let request = format!(
            "POST /message HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        exchange_raw(addr, request.as_bytes())
    }

    /// Start a server on an ephemeral loopback port and run the full
    /// request, stop, refuse sequence against it.
    pub(crate) fn run_scenario(scheduler: SchedulerKind) {
        let options = ServerOptions {
            scheduler,
            workers: 2,
            ..ServerOptions::default()
        };
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), options).unwrap();
        let addr = server.local_addr();
        let handler = Arc::new(stopping_handler(server.stop_signal()));
        let running = thread::spawn(move || server.run(handler));

        let response = post(addr, "hello");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
        assert!(response.contains("Content-Length: 2\r\n"));
        assert!(response.ends_with("\r\n\r\nOK"));

        let response = post(addr, "Done");
        assert!(response.ends_with("\r\n\r\nStoped"), "{}", response);

        running.join().unwrap().unwrap();
        assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_err());
    }

    /// Keep a request half-sent across a stop, then complete it and expect
    /// a normal reply before the scheduler returns.
    pub(crate) fn finish_in_flight_after_stop(scheduler: SchedulerKind) {
        let options = ServerOptions {
            scheduler,
            workers: 2,
            ..ServerOptions::default()
        };
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), options).unwrap();
        let addr = server.local_addr();
        let handler = Arc::new(stopping_handler(server.stop_signal()));
        let running = thread::spawn(move || server.run(handler));

        let mut slow = TcpStream::connect(addr).unwrap();
        slow.write_all(b"POST /slow HTTP/1.1\r\nContent-Length: 4\r\n\r\nab").unwrap();
        thread::sleep(Duration::from_millis(20));

        assert!(post(addr, "Done").ends_with("Stoped"));
        thread::sleep(Duration::from_millis(50));
        assert!(!running.is_finished());

        slow.write_all(b"cd").unwrap();
        let mut response = Vec::new();
        slow.read_to_end(&mut response).unwrap();
        assert!(response.ends_with(b"\r\n\r\nOK"));

        running.join().unwrap().unwrap();
    }

    #[test]
    fn test_stop_signal_wake_addr_uses_loopback() {
        let signal = StopSignal::new("0.0.0.0:8080".parse().unwrap());
        assert_eq!(signal.wake_addr, "127.0.0.1:8080".parse().unwrap());

        let signal = StopSignal::new("[::]:9000".parse().unwrap());
        assert_eq!(signal.wake_addr, "[::1]:9000".parse().unwrap());
    }

    #[test]
    fn test_stop_signal_is_shared_between_clones() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let signal = StopSignal::new(listener.local_addr());
        let clone = signal.clone();
        assert!(!clone.is_requested());
        signal.request();
        assert!(clone.is_requested());
        // The wake-up connection is waiting in the backlog.
        assert!(listener.accept().is_ok());
    }

    #[test]
    fn test_serve_connection_replies() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr();
        let client = thread::spawn(move || post(addr, "hello"));

        let conn = listener.accept().unwrap();
        let handler = |_request: Message, responder: &mut Responder| responder.send(b"OK");
        serve_connection(conn, &handler, Limits::default());

        assert!(client.join().unwrap().ends_with("\r\n\r\nOK"));
    }

    #[test]
    fn test_serve_connection_survives_malformed_request() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr();
        let client = thread::spawn(move || exchange_raw(addr, b"NONSENSE\r\n"));

        let conn = listener.accept().unwrap();
        let handler = |_request: Message, responder: &mut Responder| responder.send(b"OK");
        serve_connection(conn, &handler, Limits::default());

        // No response; the connection is simply closed.
        assert!(client.join().unwrap().is_empty());
    }
}
