//! Bounded worker pool with a shared FIFO job queue.
//!
//! Workers block on a condition variable while the queue is empty.
//! `submit` appends and wakes one waiter. `shutdown` sets the finished flag,
//! wakes everyone and joins. Workers keep draining the queue after the flag
//! is set and exit only once it is empty, so every submitted job runs
//! exactly once.

use super::{accept_until_stopped, serve_connection, StopSignal};
use crate::error::{Error, Result};
use crate::protocols::http::{Handler, Limits};
use crate::runtime::{Blocking, Connection, Listener};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Unit of work executed by exactly one worker.
pub trait Job: Send + 'static {
    fn run(self);
}

struct State<J> {
    jobs: VecDeque<J>,
    finished: bool,
}

struct Shared<J> {
    state: Mutex<State<J>>,
    available: Condvar,
}

impl<J> Shared<J> {
    // Jobs run outside the lock, so a poisoned queue is still consistent.
    fn lock(&self) -> MutexGuard<'_, State<J>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed set of long-lived worker threads.
pub struct WorkerPool<J: Job> {
    shared: Arc<Shared<J>>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Job> WorkerPool<J> {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                finished: false,
            }),
            available: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(size.max(1)),
        };
        for worker_id in 0..size.max(1) {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, &shared))
                .map_err(|source| Error::Resource {
                    op: "spawn worker",
                    source,
                })?;
            pool.workers.push(handle);
        }

        info!(workers = pool.workers.len(), "Worker pool started");
        Ok(pool)
    }

    /// Queue a job and wake one idle worker.
    pub fn submit(&self, job: J) -> Result<()> {
        let mut state = self.shared.lock();
        if state.finished {
            return Err(Error::Logic("submit called on a finished worker pool"));
        }
        state.jobs.push_back(job);
        drop(state);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Refuse new jobs, let the workers drain the queue, and join them.
    ///
    /// Returns the number of jobs still queued when shutdown began.
    pub fn shutdown(&mut self) -> usize {
        let queued = {
            let mut state = self.shared.lock();
            state.finished = true;
            state.jobs.len()
        };
        self.shared.available.notify_all();

        if queued > 0 {
            info!(queued, "Draining queued jobs before stopping");
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker panicked");
            }
        }

        debug!("Worker pool stopped");
        queued
    }
}

impl<J: Job> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop<J: Job>(worker_id: usize, shared: &Shared<J>) {
    debug!(worker = worker_id, "Worker started");
    loop {
        let job = {
            let state = shared.lock();
            let mut state = shared
                .available
                .wait_while(state, |s| s.jobs.is_empty() && !s.finished)
                .unwrap_or_else(PoisonError::into_inner);
            match state.jobs.pop_front() {
                Some(job) => job,
                // Only reachable once finished and drained.
                None => break,
            }
        };
        job.run();
    }
    debug!(worker = worker_id, "Worker exiting");
}

/// An accepted connection waiting for a worker.
pub struct ConnectionJob<H: Handler + ?Sized> {
    conn: Connection<Blocking>,
    handler: Arc<H>,
    limits: Limits,
}

impl<H: Handler + ?Sized + 'static> Job for ConnectionJob<H> {
    fn run(self) {
        serve_connection(self.conn, self.handler.as_ref(), self.limits);
    }
}

pub(super) fn run<H: Handler + ?Sized + 'static>(
    listener: &Listener,
    stop: &StopSignal,
    handler: Arc<H>,
    workers: usize,
    limits: Limits,
) -> Result<()> {
    let mut pool = WorkerPool::new(workers)?;
    let result = accept_until_stopped(listener, stop, |conn| {
        pool.submit(ConnectionJob {
            conn,
            handler: Arc::clone(&handler),
            limits,
        })
    });
    pool.shutdown();
    result
}
