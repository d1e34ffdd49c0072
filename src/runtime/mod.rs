//! Transport runtime shared by every scheduler.
//!
//! - `Connection`: exclusive ownership of one socket descriptor
//! - `Listener`: bind/listen/accept
//! - `IoPolicy`: decides whether "would block" means retry or suspend
//! - `FrameBuffer`: line and body reads over one fixed window
//!
//! Operations that may suspend return `Step<T>`; the blocking policy never
//! produces `Step::Blocked`, the cooperative one does.

mod buffer;
mod connection;
mod listener;
mod policy;

pub use buffer::{FrameBuffer, DEFAULT_CAPACITY, END_OF_LINE};
pub use connection::Connection;
pub use listener::Listener;
pub use policy::{complete, Blocking, Cooperative, IoPolicy, Readiness, Step};

pub(crate) use policy::ready;

#[cfg(test)]
pub(crate) use connection::tests as test_support;
