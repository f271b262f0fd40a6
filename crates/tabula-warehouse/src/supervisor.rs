//! Watchdog that interrupts long-running engine calls.
//!
//! The operation runs on the caller's thread. A scoped timer thread waits for
//! either completion or the deadline; on the deadline it flags the timeout and
//! asks the engine to interrupt. A failure observed after the flag is set is
//! reported as a timeout, anything else passes through untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::error::TabularError;

/// Cooperative cancellation hook of a running operation.
pub trait Interrupt: Sync {
    fn interrupt(&self);
}

impl Interrupt for ::duckdb::InterruptHandle {
    fn interrupt(&self) {
        ::duckdb::InterruptHandle::interrupt(self);
    }
}

/// Failure of a supervised operation.
#[derive(Debug)]
pub enum Supervised<E> {
    /// The deadline fired and the operation failed afterwards.
    TimedOut { timeout_ms: u64 },
    /// The operation failed on its own.
    Failed(E),
}

impl<E> Supervised<E> {
    /// Collapse into a taxonomy error.
    ///
    /// Timeouts become `timeout_error("query timed out after {T}ms")`; other
    /// failures go through `map_failure`.
    pub fn into_error(
        self,
        timeout_error: fn(String) -> TabularError,
        map_failure: impl FnOnce(E) -> TabularError,
    ) -> TabularError {
        match self {
            Self::TimedOut { timeout_ms } => {
                timeout_error(format!("query timed out after {timeout_ms}ms"))
            }
            Self::Failed(error) => map_failure(error),
        }
    }
}

/// Runs operations against a fixed deadline.
#[derive(Debug, Clone, Copy)]
pub struct Supervisor {
    timeout: Duration,
}

impl Supervisor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis().min(u128::from(u64::MAX)) as u64
    }

    /// Run `operation`, interrupting through `interrupt` once the deadline passes.
    pub fn run<T, E, I>(
        &self,
        interrupt: &I,
        operation: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, Supervised<E>>
    where
        I: Interrupt + ?Sized,
    {
        if self.timeout.is_zero() {
            return operation().map_err(Supervised::Failed);
        }

        let timeout = self.timeout;
        let timeout_ms = self.timeout_ms();
        let timed_out = AtomicBool::new(false);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let result = thread::scope(|scope| {
            let flag = &timed_out;
            scope.spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    flag.store(true, Ordering::SeqCst);
                    tracing::warn!(timeout_ms, "tabular.query_interrupted");
                    interrupt.interrupt();
                }
            });
            let result = operation();
            drop(done_tx);
            result
        });

        result.map_err(|error| {
            if timed_out.load(Ordering::SeqCst) {
                Supervised::TimedOut { timeout_ms }
            } else {
                Supervised::Failed(error)
            }
        })
    }
}
