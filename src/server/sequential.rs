//! Accept and serve inline, one connection at a time.

use super::{accept_until_stopped, serve_connection, StopSignal};
use crate::error::Result;
use crate::protocols::http::{Handler, Limits};
use crate::runtime::Listener;

pub(super) fn run<H: Handler + ?Sized>(
    listener: &Listener,
    stop: &StopSignal,
    handler: &H,
    limits: Limits,
) -> Result<()> {
    accept_until_stopped(listener, stop, |conn| {
        serve_connection(conn, handler, limits);
        Ok(())
    })
}
