//! Blocking/non-blocking strategy injection.
//!
//! A `Connection` never decides on its own what "would block" means. It asks
//! its `IoPolicy`, which either retries (classic blocking I/O) or suspends,
//! handing control back to whoever drives the connection. This is what lets
//! one piece of per-connection logic run unchanged under blocking threads and
//! under the cooperative readiness loop.
//!
//! Suspension is explicit: operations that may suspend return `Step<T>`, and
//! `Step::Blocked` carries the direction the caller is waiting on.

use crate::error::Result;
use socket2::Socket;
use std::io;

/// Direction a suspended operation is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Read,
    Write,
}

/// Outcome of an operation that may suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<T> {
    /// The operation made all the progress it needed.
    Ready(T),
    /// The descriptor is not ready; resume once it is.
    Blocked(Readiness),
}

/// What a policy wants done when a syscall reports would-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnWouldBlock {
    /// Try the syscall again immediately.
    Retry,
    /// Return `Step::Blocked` to the caller.
    Suspend,
}

/// Capability set injected into a `Connection`.
///
/// The defaults give pure blocking semantics.
pub trait IoPolicy {
    /// Called once when a descriptor is wrapped by a connection.
    fn configure_non_blocking(&self, _socket: &Socket) -> io::Result<()> {
        Ok(())
    }

    fn on_read_would_block(&mut self) -> OnWouldBlock {
        OnWouldBlock::Retry
    }

    fn on_write_would_block(&mut self) -> OnWouldBlock {
        OnWouldBlock::Retry
    }
}

/// Classic blocking I/O: nothing to configure, always retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blocking;

impl IoPolicy for Blocking {}

/// Non-blocking I/O for the readiness loop.
///
/// Marks the descriptor non-blocking and suspends instead of retrying.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cooperative {
    suspensions: u64,
}

impl Cooperative {
    /// Number of times this connection has yielded back to its scheduler.
    pub fn suspensions(&self) -> u64 {
        self.suspensions
    }
}

impl IoPolicy for Cooperative {
    fn configure_non_blocking(&self, socket: &Socket) -> io::Result<()> {
        socket.set_nonblocking(true)
    }

    fn on_read_would_block(&mut self) -> OnWouldBlock {
        self.suspensions += 1;
        OnWouldBlock::Suspend
    }

    fn on_write_would_block(&mut self) -> OnWouldBlock {
        self.suspensions += 1;
        OnWouldBlock::Suspend
    }
}

/// Unwrap a `Step`, returning `Ok(Step::Blocked(..))` from the enclosing
/// function when the operation suspended.
macro_rules! ready {
    ($e:expr) => {
        match $e {
            $crate::runtime::Step::Ready(value) => value,
            $crate::runtime::Step::Blocked(readiness) => {
                return Ok($crate::runtime::Step::Blocked(readiness))
            }
        }
    };
}

pub(crate) use ready;

/// Drive a resumable operation to completion on a blocking connection.
///
/// A blocking policy never suspends, so this normally completes on the
/// first call; a suspension just means "call again".
pub fn complete<T>(mut op: impl FnMut() -> Result<Step<T>>) -> Result<T> {
    loop {
        if let Step::Ready(value) = op()? {
            return Ok(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halve(n: &mut u32) -> Result<Step<u32>> {
        if *n > 1 {
            *n /= 2;
            Ok(Step::Blocked(Readiness::Read))
        } else {
            Ok(Step::Ready(*n))
        }
    }

    fn chained(n: &mut u32) -> Result<Step<&'static str>> {
        let value = ready!(halve(n)?);
        assert_eq!(value, 1);
        Ok(Step::Ready("done"))
    }

    #[test]
    fn test_blocking_policy_retries() {
        let mut policy = Blocking;
        assert_eq!(policy.on_read_would_block(), OnWouldBlock::Retry);
        assert_eq!(policy.on_write_would_block(), OnWouldBlock::Retry);
    }

    #[test]
    fn test_cooperative_policy_suspends_and_counts() {
        let mut policy = Cooperative::default();
        assert_eq!(policy.on_read_would_block(), OnWouldBlock::Suspend);
        assert_eq!(policy.on_write_would_block(), OnWouldBlock::Suspend);
        assert_eq!(policy.suspensions(), 2);
    }

    #[test]
    fn test_ready_macro_propagates_blocked() {
        let mut n = 8;
        assert_eq!(chained(&mut n).unwrap(), Step::Blocked(Readiness::Read));
        assert_eq!(n, 4);
    }

    #[test]
    fn test_complete_drives_until_ready() {
        let mut n = 64;
        let result = complete(|| chained(&mut n)).unwrap();
        assert_eq!(result, "done");
        assert_eq!(n, 1);
    }
}
