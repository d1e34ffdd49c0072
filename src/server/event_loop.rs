//! Single-threaded cooperative scheduler on mio.
//!
//! Readiness-based model: every connection runs under the `Cooperative`
//! policy, so `Exchange::resume` returns `Step::Blocked(direction)` instead
//! of blocking. The loop keeps exactly one registration per live
//! descriptor and only touches it when the wanted direction changes.
//! mio registrations are edge-triggered; a resume always runs until the
//! descriptor reports would-block, so no edge is missed.
//!
//! After a stop request the listener is deregistered and the loop keeps
//! polling only until the connections already in flight finish.

use super::{report, Registry, ServerOptions, StopSignal};
use crate::error::{Error, Result};
use crate::protocols::http::{Exchange, Handler, Limits};
use crate::runtime::{Cooperative, Listener, Readiness, Step};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Per-connection state owned by the loop between suspensions.
struct EventClient {
    exchange: Exchange<Cooperative>,
    peer: Option<SocketAddr>,
    /// Direction currently registered with the poller, if any.
    registered: Option<Readiness>,
}

fn interest(readiness: Readiness) -> Interest {
    match readiness {
        Readiness::Read => Interest::READABLE,
        Readiness::Write => Interest::WRITABLE,
    }
}

fn poll_err(op: &'static str) -> impl FnOnce(io::Error) -> Error {
    move |source| Error::Resource { op, source }
}

pub(super) fn run<H: Handler + ?Sized>(
    listener: &Listener,
    stop: &StopSignal,
    handler: &H,
    options: &ServerOptions,
) -> Result<()> {
    let mut poll = Poll::new().map_err(poll_err("create poll"))?;
    let mut events = Events::with_capacity(options.event_capacity.max(1));

    listener.set_nonblocking(true)?;
    let listen_fd = listener.raw_fd()?;
    poll.registry()
        .register(&mut SourceFd(&listen_fd), LISTENER_TOKEN, Interest::READABLE)
        .map_err(poll_err("register listener"))?;

    let mut clients: Registry<EventClient> = Registry::new(options.max_connections);
    let mut accepting = true;

    info!(
        max_connections = options.max_connections,
        event_capacity = options.event_capacity,
        "Event loop started"
    );

    while accepting || !clients.is_empty() {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Resource { op: "poll", source: e });
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    if accepting {
                        accept_connections(listener, &poll, &mut clients, handler, options.limits);
                    }
                }
                Token(id) => {
                    drive(id, &poll, &mut clients, handler);
                }
            }
        }

        if accepting && stop.is_requested() {
            accepting = false;
            poll.registry()
                .deregister(&mut SourceFd(&listen_fd))
                .map_err(poll_err("deregister listener"))?;
            info!(in_flight = clients.len(), "No longer accepting; draining connections");
        }
    }

    info!("Event loop finished");
    Ok(())
}

/// Accept everything pending; edge-triggered readiness fires only once.
fn accept_connections<H: Handler + ?Sized>(
    listener: &Listener,
    poll: &Poll,
    clients: &mut Registry<EventClient>,
    handler: &H,
    limits: Limits,
) {
    loop {
        let conn = match listener.accept_with(Cooperative::default()) {
            Ok(Some(conn)) => conn,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Accept error");
                break;
            }
        };

        let peer = conn.peer_addr();
        let client = EventClient {
            exchange: Exchange::new(conn, limits),
            peer,
            registered: None,
        };
        let id = match clients.insert(client) {
            Ok(id) => id,
            Err(_rejected) => {
                warn!(peer = ?peer, capacity = clients.capacity(), "Connection limit reached");
                continue;
            }
        };
        debug!(conn_id = id, peer = ?peer, "Accepted connection");

        // The request may already be waiting; run until the first suspension.
        drive(id, poll, clients, handler);
    }
}

/// Resume one connection and update its registration.
fn drive<H: Handler + ?Sized>(
    id: usize,
    poll: &Poll,
    clients: &mut Registry<EventClient>,
    handler: &H,
) {
    let Some(client) = clients.get_mut(id) else {
        return;
    };

    let outcome = match client.exchange.resume(handler) {
        Ok(Step::Blocked(readiness)) => match subscribe(poll, id, client, readiness) {
            Ok(()) => return,
            Err(e) => Err(e),
        },
        Ok(Step::Ready(())) => Ok(()),
        Err(e) => Err(e),
    };

    finish(id, poll, clients, outcome);
}

/// Make sure `client` is registered for exactly `readiness`.
fn subscribe(poll: &Poll, id: usize, client: &mut EventClient, readiness: Readiness) -> Result<()> {
    if client.registered == Some(readiness) {
        return Ok(());
    }

    let fd = client.exchange.connection().raw_fd()?;
    let mut source = SourceFd(&fd);
    let registry = poll.registry();
    let registered = match client.registered {
        None => registry.register(&mut source, Token(id), interest(readiness)),
        Some(_) => registry.reregister(&mut source, Token(id), interest(readiness)),
    };
    registered.map_err(poll_err("register connection"))?;

    client.registered = Some(readiness);
    Ok(())
}

/// Deregister, report and release a finished or failed connection.
fn finish(id: usize, poll: &Poll, clients: &mut Registry<EventClient>, outcome: Result<()>) {
    let Some(client) = clients.remove(id) else {
        return;
    };

    if client.registered.is_some() {
        if let Ok(fd) = client.exchange.connection().raw_fd() {
            if let Err(e) = poll.registry().deregister(&mut SourceFd(&fd)) {
                debug!(conn_id = id, error = %e, "Deregister failed");
            }
        }
    }

    debug!(
        conn_id = id,
        suspensions = client.exchange.connection().policy().suspensions(),
        "Connection finished"
    );
    report(client.peer, outcome);
    if let Err(e) = client.exchange.close() {
        warn!(conn_id = id, error = %e, "Failed to close connection");
    }
}
