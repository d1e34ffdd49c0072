//! One thread per accepted connection.
//!
//! Connection threads are counted while they run. After a stop request the
//! accept loop ends and `run` waits for the count to reach zero, so work in
//! flight is never cut off by the process exiting.

use super::{accept_until_stopped, serve_connection, StopSignal};
use crate::error::Result;
use crate::protocols::http::{Handler, Limits};
use crate::runtime::Listener;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{error, info};

/// Number of connection threads still running.
#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one more thread until the returned guard drops.
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.lock() += 1;
        InFlightGuard(Arc::clone(self))
    }

    fn pending(&self) -> usize {
        *self.lock()
    }

    fn wait_idle(&self) {
        let count = self.lock();
        let _idle = self
            .idle
            .wait_while(count, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Decrements on drop, including when the thread panics or never starts.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.lock();
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

pub(super) fn run<H: Handler + ?Sized + 'static>(
    listener: &Listener,
    stop: &StopSignal,
    handler: Arc<H>,
    limits: Limits,
) -> Result<()> {
    let in_flight = Arc::new(InFlight::default());
    let mut next_id: u64 = 0;

    let result = accept_until_stopped(listener, stop, |conn| {
        let id = next_id;
        next_id += 1;

        let handler = Arc::clone(&handler);
        let guard = in_flight.enter();
        let spawned = thread::Builder::new()
            .name(format!("conn-{id}"))
            .spawn(move || {
                let _guard = guard;
                serve_connection(conn, handler.as_ref(), limits);
            });

        // The connection and guard moved into the failed closure and drop with it.
        if let Err(e) = spawned {
            error!(conn = id, error = %e, "Failed to spawn connection thread");
        }
        Ok(())
    });

    let pending = in_flight.pending();
    if pending > 0 {
        info!(pending, "Waiting for in-flight connections");
    }
    in_flight.wait_idle();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerKind;
    use crate::server::tests::{finish_in_flight_after_stop, post, run_scenario, stopping_handler};
    use crate::server::{Server, ServerOptions};
    use std::time::Duration;

    #[test]
    fn test_thread_per_connection_serves_then_stops() {
        run_scenario(SchedulerKind::Thread);
    }

    #[test]
    fn test_thread_in_flight_connection_finishes_after_stop() {
        finish_in_flight_after_stop(SchedulerKind::Thread);
    }

    #[test]
    fn test_wait_idle_blocks_until_guards_drop() {
        let in_flight = Arc::new(InFlight::default());
        let guards: Vec<_> = (0..3).map(|_| in_flight.enter()).collect();
        assert_eq!(in_flight.pending(), 3);

        let waiter = {
            let in_flight = Arc::clone(&in_flight);
            thread::spawn(move || in_flight.wait_idle())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(guards);
        waiter.join().unwrap();
        assert_eq!(in_flight.pending(), 0);
    }

    #[test]
    fn test_concurrent_clients() {
        let options = ServerOptions {
            scheduler: SchedulerKind::Thread,
            ..ServerOptions::default()
        };
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), options).unwrap();
        let addr = server.local_addr();
        let handler = Arc::new(stopping_handler(server.stop_signal()));
        let running = thread::spawn(move || server.run(handler));

        let clients: Vec<_> = (0..8)
            .map(|i| thread::spawn(move || post(addr, &format!("client {i}"))))
            .collect();
        for client in clients {
            assert!(client.join().unwrap().ends_with("\r\n\r\nOK"));
        }

        assert!(post(addr, "Done").ends_with("Stoped"));
        running.join().unwrap().unwrap();
    }
}
