//! Error taxonomy for the transport and message layers.
//!
//! Errors fall into a few families:
//! - `Logic`: programmer misuse (operating on a closed connection, responding twice).
//! - `Connect` / `Bind` / `Listen` / `Accept`: socket setup failures.
//! - `Fatal` / `Resource`: I/O failures that abandon the connection.
//! - `PeerDisconnected`: the peer went away at a structural boundary. Benign.
//! - `Format` / `UnsupportedEncoding` / `UnsupportedMethod`: protocol violations.
//!
//! Interrupted calls and would-block conditions never surface here; the
//! connection read/write loops recover from them locally.

use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by connections, the message protocol and the schedulers.
#[derive(Debug)]
pub enum Error {
    /// Programmer misuse. Should not occur in correct code.
    Logic(&'static str),
    /// Connecting to a remote address failed.
    Connect { addr: String, source: io::Error },
    /// Creating or binding the listening socket failed.
    Bind { addr: SocketAddr, source: io::Error },
    /// Putting the bound socket into listening mode failed.
    Listen { addr: SocketAddr, source: io::Error },
    /// Accepting from the listener failed.
    Accept(io::Error),
    /// Descriptor-level or programming error during I/O. Never retried.
    Fatal { op: &'static str, source: io::Error },
    /// Resource exhaustion or device failure during I/O. Never retried.
    Resource { op: &'static str, source: io::Error },
    /// The peer closed before a message started, or vanished mid-response.
    PeerDisconnected,
    /// Malformed start line or header line. Carries the raw offending bytes.
    Format { reason: &'static str, line: Vec<u8> },
    /// The message declares an encoding this layer rejects.
    UnsupportedEncoding(&'static str),
    /// The request names a method this layer does not implement.
    UnsupportedMethod(String),
    /// Error raised by the application callback.
    #[allow(dead_code)] // Built by handlers; the fixed-reply handler never fails
    Application(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Build a format error, copying the offending line for diagnostics.
    pub fn format(reason: &'static str, line: &[u8]) -> Self {
        Error::Format {
            reason,
            line: line.to_vec(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Logic(msg) => write!(f, "Logic error: {}", msg),
            Error::Connect { addr, source } => write!(f, "Failed to connect to {}: {}", addr, source),
            Error::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            Error::Listen { addr, source } => write!(f, "Failed to listen on {}: {}", addr, source),
            Error::Accept(e) => write!(f, "Failed to accept connection: {}", e),
            Error::Fatal { op, source } => write!(f, "Fatal transport error during {}: {}", op, source),
            Error::Resource { op, source } => write!(f, "Resource failure during {}: {}", op, source),
            Error::PeerDisconnected => write!(f, "Peer disconnected"),
            Error::Format { reason, line } if line.is_empty() => {
                write!(f, "Protocol format error: {}", reason)
            }
            Error::Format { reason, line } => {
                write!(f, "Protocol format error: {}: \"{}\"", reason, line.escape_ascii())
            }
            Error::UnsupportedEncoding(what) => write!(f, "Unsupported encoding: {}", what),
            Error::UnsupportedMethod(method) => write!(f, "Unsupported method: {}", method),
            Error::Application(e) => write!(f, "Application error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connect { source, .. }
            | Error::Bind { source, .. }
            | Error::Listen { source, .. }
            | Error::Fatal { source, .. }
            | Error::Resource { source, .. } => Some(source),
            Error::Accept(e) => Some(e),
            Error::Application(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// How a failed read or write syscall should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Interrupted; simply try again.
    Retry,
    /// The descriptor is non-blocking and not ready; ask the IO policy.
    WouldBlock,
    /// Connection reset or not connected; treat as end of stream.
    PeerReset,
    /// Bad descriptor or invalid arguments.
    Fatal,
    /// Resource acquisition failure or device error.
    Resource,
}

/// Classify an error returned by `read(2)`/`recv(2)`.
pub(crate) fn classify_read(err: &io::Error) -> Disposition {
    match err.kind() {
        io::ErrorKind::Interrupted => return Disposition::Retry,
        io::ErrorKind::WouldBlock => return Disposition::WouldBlock,
        _ => {}
    }
    match err.raw_os_error() {
        Some(libc::ETIMEDOUT) => Disposition::Retry,
        Some(libc::ECONNRESET) | Some(libc::ENOTCONN) => Disposition::PeerReset,
        Some(libc::EBADF) | Some(libc::EFAULT) | Some(libc::EINVAL) | Some(libc::ENXIO) => {
            Disposition::Fatal
        }
        Some(libc::EIO) | Some(libc::ENOBUFS) | Some(libc::ENOMEM) => Disposition::Resource,
        _ => Disposition::Resource,
    }
}

/// Classify an error returned by `write(2)`/`send(2)`.
///
/// `EPIPE` is grouped with connection reset: the peer has gone away and the
/// exchange ends, rather than being reported as a programming bug.
pub(crate) fn classify_write(err: &io::Error) -> Disposition {
    match err.kind() {
        io::ErrorKind::Interrupted => return Disposition::Retry,
        io::ErrorKind::WouldBlock => return Disposition::WouldBlock,
        _ => {}
    }
    match err.raw_os_error() {
        Some(libc::ECONNRESET) | Some(libc::EPIPE) | Some(libc::ENOTCONN) => Disposition::PeerReset,
        Some(libc::EBADF) | Some(libc::EFAULT) | Some(libc::EINVAL) | Some(libc::ENXIO) => {
            Disposition::Fatal
        }
        Some(libc::EDQUOT)
        | Some(libc::EFBIG)
        | Some(libc::EIO)
        | Some(libc::ENETDOWN)
        | Some(libc::ENETUNREACH)
        | Some(libc::ENOSPC)
        | Some(libc::ENOBUFS) => Disposition::Resource,
        _ => Disposition::Resource,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(code: i32) -> io::Error {
        io::Error::from_raw_os_error(code)
    }

    #[test]
    fn test_transient_errors_are_retried() {
        assert_eq!(classify_read(&os(libc::EINTR)), Disposition::Retry);
        assert_eq!(classify_write(&os(libc::EINTR)), Disposition::Retry);
        assert_eq!(classify_read(&os(libc::EAGAIN)), Disposition::WouldBlock);
        assert_eq!(classify_write(&os(libc::EAGAIN)), Disposition::WouldBlock);
    }

    #[test]
    fn test_reset_is_end_of_stream_on_both_paths() {
        assert_eq!(classify_read(&os(libc::ECONNRESET)), Disposition::PeerReset);
        assert_eq!(classify_read(&os(libc::ENOTCONN)), Disposition::PeerReset);
        assert_eq!(classify_write(&os(libc::ECONNRESET)), Disposition::PeerReset);
        assert_eq!(classify_write(&os(libc::EPIPE)), Disposition::PeerReset);
    }

    #[test]
    fn test_fatal_and_resource_errors() {
        assert_eq!(classify_read(&os(libc::EBADF)), Disposition::Fatal);
        assert_eq!(classify_write(&os(libc::EINVAL)), Disposition::Fatal);
        assert_eq!(classify_read(&os(libc::EIO)), Disposition::Resource);
        assert_eq!(classify_write(&os(libc::ENOSPC)), Disposition::Resource);
        assert_eq!(classify_write(&os(libc::ENETUNREACH)), Disposition::Resource);
    }

    #[test]
    fn test_format_error_display_shows_raw_line() {
        let err = Error::format("invalid status line", b"HTTP/1.1 2x0 OK\r\n");
        let text = err.to_string();
        assert!(text.contains("invalid status line"));
        assert!(text.contains("HTTP/1.1 2x0 OK\\r\\n"));
    }

    #[test]
    fn test_format_error_without_line() {
        let err = Error::format("body exceeds max_body_size", &[]);
        assert_eq!(err.to_string(), "Protocol format error: body exceeds max_body_size");
    }
}
