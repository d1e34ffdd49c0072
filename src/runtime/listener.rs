//! Listening socket: bind, listen and accept.

use crate::error::{Error, Result};
use crate::runtime::connection::{close_fd, Connection};
use crate::runtime::policy::{Blocking, IoPolicy};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use tracing::{debug, info};

/// Pending-connection backlog passed to `listen(2)`.
pub const LISTEN_BACKLOG: i32 = 1024;

/// A bound, listening TCP socket.
#[derive(Debug)]
pub struct Listener {
    socket: Option<Socket>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind `addr` with address reuse enabled and start listening.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let bind_err = |source| Error::Bind { addr, source };
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|source| Error::Listen { addr, source })?;

        // Port 0 binds resolve to a real port here.
        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .unwrap_or(addr);

        info!(addr = %local_addr, backlog = LISTEN_BACKLOG, "Listening");
        Ok(Self {
            socket: Some(socket),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn raw_fd(&self) -> Result<RawFd> {
        Ok(self.socket()?.as_raw_fd())
    }

    /// Switch the listener between blocking and non-blocking accepts.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.socket()?
            .set_nonblocking(nonblocking)
            .map_err(|source| Error::Fatal {
                op: "set_nonblocking",
                source,
            })
    }

    /// Wait for a peer and return a blocking connection to it.
    pub fn accept(&self) -> Result<Connection<Blocking>> {
        self.accept_with(Blocking)?
            .ok_or(Error::Logic("blocking accept on a non-blocking listener"))
    }

    /// Accept one pending connection and wrap it with `policy`.
    ///
    /// Returns `None` when the listener is non-blocking and nothing is
    /// pending.
    pub fn accept_with<P: IoPolicy>(&self, policy: P) -> Result<Option<Connection<P>>> {
        let socket = self.socket()?;
        loop {
            match socket.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = ?peer.as_socket(), "Accepted connection");
                    return Connection::from_socket(stream, policy).map(Some);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(libc::ECONNABORTED) => {
                    debug!("Pending connection aborted before accept");
                    continue;
                }
                Err(e) => return Err(Error::Accept(e)),
            }
        }
    }

    /// Close the listening socket. Closing twice is a `Logic` error.
    pub fn close(&mut self) -> Result<()> {
        let socket = self
            .socket
            .take()
            .ok_or(Error::Logic("close called on a closed listener"))?;
        close_fd(socket.into_raw_fd(), "close listener")
    }

    fn socket(&self) -> Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or(Error::Logic("accept called on a closed listener"))
    }
}
