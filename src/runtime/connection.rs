//! Exclusive ownership of one connected socket descriptor.
//!
//! A `Connection` is either open and owns exactly one descriptor, or closed
//! (the sentinel state left behind by `close()`, `take()` or
//! `with_policy()`). Every operation on a closed connection fails fast with
//! `Error::Logic`.
//!
//! Reads and writes apply the same error taxonomy: interrupted calls are
//! retried, would-block is delegated to the `IoPolicy`, reset/not-connected
//! is a clean end of stream, everything else aborts with `Fatal` or
//! `Resource`.

use crate::error::{classify_read, classify_write, Disposition, Error, Result};
use crate::runtime::policy::{Blocking, IoPolicy, OnWouldBlock, Readiness, Step};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use tracing::{debug, warn};

/// A connected stream socket plus the policy deciding how it blocks.
#[derive(Debug)]
pub struct Connection<P: IoPolicy = Blocking> {
    socket: Option<Socket>,
    policy: P,
}

impl<P: IoPolicy> Connection<P> {
    /// Wrap an already connected socket, letting the policy configure it.
    pub fn from_socket(socket: Socket, policy: P) -> Result<Self> {
        policy
            .configure_non_blocking(&socket)
            .map_err(|source| Error::Fatal {
                op: "configure",
                source,
            })?;
        Ok(Self {
            socket: Some(socket),
            policy,
        })
    }

    /// Connect to `addr`.
    ///
    /// The descriptor is closed before the error propagates if the connect
    /// call fails.
    pub fn connect(addr: SocketAddr, policy: P) -> Result<Self> {
        let connect_err = |source| Error::Connect {
            addr: addr.to_string(),
            source,
        };
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(connect_err)?;
        // Dropping `socket` on the error path closes it.
        socket.connect(&addr.into()).map_err(connect_err)?;
        Self::from_socket(socket, policy)
    }

    /// Resolve `host:port` and connect to the first address that accepts.
    pub fn connect_to(target: &str, policy: P) -> Result<Self> {
        let addrs = target.to_socket_addrs().map_err(|source| Error::Connect {
            addr: target.to_string(),
            source,
        })?;

        let mut last_err = None;
        for addr in addrs {
            let attempt = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
                .and_then(|socket| socket.connect(&addr.into()).map(|()| socket));
            match attempt {
                Ok(socket) => return Self::from_socket(socket, policy),
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(Error::Connect {
            addr: target.to_string(),
            source: last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
            }),
        })
    }

    /// Whether this connection still owns a descriptor.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Raw descriptor, for readiness registration.
    pub fn raw_fd(&self) -> Result<RawFd> {
        Ok(self.socket()?.as_raw_fd())
    }

    /// Remote address, if the connection is open and the kernel knows it.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|s| s.peer_addr().ok())
            .and_then(|a| a.as_socket())
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Move the descriptor into a new connection, leaving this one closed.
    #[allow(dead_code)] // Ownership transfer between owners; no scheduler hands descriptors off yet
    pub fn take(&mut self) -> Self
    where
        P: Default,
    {
        Self {
            socket: self.socket.take(),
            policy: std::mem::take(&mut self.policy),
        }
    }

    /// Re-wrap the descriptor under a different policy.
    #[allow(dead_code)] // Policy switch for a live descriptor; accept_with covers the schedulers today
    pub fn with_policy<Q: IoPolicy>(mut self, policy: Q) -> Result<Connection<Q>> {
        let socket = self
            .socket
            .take()
            .ok_or(Error::Logic("with_policy called on a closed connection"))?;
        Connection::from_socket(socket, policy)
    }

    /// Read once into `buf`.
    ///
    /// `Ready(0)` means the peer closed (or reset) the stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Step<usize>> {
        loop {
            let socket = self
                .socket
                .as_mut()
                .ok_or(Error::Logic("read called on a closed connection"))?;
            let err = match socket.read(buf) {
                Ok(n) => return Ok(Step::Ready(n)),
                Err(e) => e,
            };
            match classify_read(&err) {
                Disposition::Retry => continue,
                Disposition::WouldBlock => match self.policy.on_read_would_block() {
                    OnWouldBlock::Retry => continue,
                    OnWouldBlock::Suspend => return Ok(Step::Blocked(Readiness::Read)),
                },
                Disposition::PeerReset => {
                    debug!(error = %err, "Read treated as end of stream");
                    return Ok(Step::Ready(0));
                }
                Disposition::Fatal => return Err(Error::Fatal { op: "read", source: err }),
                Disposition::Resource => {
                    return Err(Error::Resource { op: "read", source: err })
                }
            }
        }
    }

    /// Write once from `buf`.
    ///
    /// `Ready(0)` for a non-empty `buf` means the peer is gone.
    pub fn write(&mut self, buf: &[u8]) -> Result<Step<usize>> {
        loop {
            let socket = self
                .socket
                .as_mut()
                .ok_or(Error::Logic("write called on a closed connection"))?;
            let err = match socket.write(buf) {
                Ok(n) => return Ok(Step::Ready(n)),
                Err(e) => e,
            };
            match classify_write(&err) {
                Disposition::Retry => continue,
                Disposition::WouldBlock => match self.policy.on_write_would_block() {
                    OnWouldBlock::Retry => continue,
                    OnWouldBlock::Suspend => return Ok(Step::Blocked(Readiness::Write)),
                },
                Disposition::PeerReset => {
                    debug!(error = %err, "Write treated as end of stream");
                    return Ok(Step::Ready(0));
                }
                Disposition::Fatal => return Err(Error::Fatal { op: "write", source: err }),
                Disposition::Resource => {
                    return Err(Error::Resource { op: "write", source: err })
                }
            }
        }
    }

    /// Write `buf[*sent..]`, accumulating partial writes into `sent`.
    ///
    /// Resumable: after `Blocked`, call again with the same `sent`.
    pub fn write_all(&mut self, buf: &[u8], sent: &mut usize) -> Result<Step<()>> {
        while *sent < buf.len() {
            match self.write(&buf[*sent..])? {
                Step::Blocked(readiness) => return Ok(Step::Blocked(readiness)),
                Step::Ready(0) => {
                    debug!(sent = *sent, total = buf.len(), "Peer went away mid-write");
                    return Err(Error::PeerDisconnected);
                }
                Step::Ready(n) => *sent += n,
            }
        }
        Ok(Step::Ready(()))
    }

    /// Shut down the write half, signalling end of message to the peer.
    pub fn shutdown_write(&mut self) -> Result<()> {
        let socket = self.socket()?;
        match socket.shutdown(Shutdown::Write) {
            Ok(()) => Ok(()),
            Err(e) if classify_write(&e) == Disposition::PeerReset => {
                debug!(error = %e, "Shutdown on a connection the peer already dropped");
                Ok(())
            }
            Err(source) => Err(Error::Fatal {
                op: "shutdown",
                source,
            }),
        }
    }

    /// Close the descriptor, reporting failures.
    ///
    /// Closing an already closed connection is a `Logic` error.
    pub fn close(&mut self) -> Result<()> {
        let socket = self
            .socket
            .take()
            .ok_or(Error::Logic("close called on a closed connection"))?;
        close_fd(socket.into_raw_fd(), "close")
    }

    fn socket(&self) -> Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or(Error::Logic("operation on a closed connection"))
    }
}

impl<P: IoPolicy> Drop for Connection<P> {
    fn drop(&mut self) {
        if !self.is_open() {
            return;
        }
        // Callers who care about close failures call close() themselves.
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close connection during drop");
        }
    }
}

/// Close a raw descriptor we own, classifying the failure.
///
/// `EINTR` is not retried: on Linux the descriptor is already released and a
/// second close could hit an unrelated, reused descriptor.
pub(crate) fn close_fd(fd: RawFd, op: &'static str) -> Result<()> {
    // SAFETY: `fd` was just released from an owning `Socket`; nothing else
    // refers to it.
    if unsafe { libc::close(fd) } == 0 {
        return Ok(());
    }
    let source = io::Error::last_os_error();
    match source.raw_os_error() {
        Some(libc::EINTR) => Ok(()),
        Some(libc::EBADF) => Err(Error::Fatal { op, source }),
        _ => Err(Error::Resource { op, source }),
    }
}
