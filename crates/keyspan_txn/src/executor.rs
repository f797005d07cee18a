//! Bounded worker pool and single-fulfillment completion bridge.
//!
//! Asynchronous run variants, query callback delivery, and concurrent
//! per-document unstaging all go through one fixed pool of worker
//! threads draining an explicit task queue. Nothing in the engine
//! spawns a thread per call.

use crate::error::{TxnError, TxnResult};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of worker threads over an explicit task queue.
///
/// `shutdown` stops accepting new tasks, lets queued tasks drain, and
/// joins the workers.
pub struct Executor {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    /// Creates a pool with `threads` workers (at least one).
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..threads.max(1))
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                std::thread::spawn(move || loop {
                    let task = {
                        let guard = receiver.lock();
                        guard.recv()
                    };
                    match task {
                        Ok(task) => task(),
                        Err(_) => break,
                    }
                })
            })
            .collect();
        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues a task for execution on the pool.
    ///
    /// # Errors
    ///
    /// Fails if the executor has been shut down.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) -> TxnResult<()> {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(sender) => sender
                .send(Box::new(task))
                .map_err(|_| TxnError::illegal_state("executor is shut down")),
            None => Err(TxnError::illegal_state("executor is shut down")),
        }
    }

    /// Stops accepting tasks, drains the queue, and joins the workers.
    ///
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) {
        // Dropping the sender makes workers exit once the queue drains.
        self.sender.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Creates a single-fulfillment completion pair.
///
/// The sender delivers exactly one value (it is consumed by
/// [`CompletionSender::complete`]); the waiter blocks until that value
/// arrives or the sender is dropped unfulfilled.
#[must_use]
pub fn completion<T>() -> (CompletionSender<T>, CompletionWaiter<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (CompletionSender { tx }, CompletionWaiter { rx })
}

/// Write half of a completion; delivers exactly one value.
pub struct CompletionSender<T> {
    tx: SyncSender<T>,
}

impl<T> CompletionSender<T> {
    /// Delivers the value, consuming the sender.
    pub fn complete(self, value: T) {
        // A dropped waiter makes this a no-op.
        let _ = self.tx.send(value);
    }
}

/// Read half of a completion.
pub struct CompletionWaiter<T> {
    rx: Receiver<T>,
}

impl<T> CompletionWaiter<T> {
    /// Blocks until the value arrives.
    ///
    /// # Errors
    ///
    /// Fails if the sender was dropped without fulfilling.
    pub fn wait(self) -> TxnResult<T> {
        self.rx
            .recv()
            .map_err(|_| TxnError::illegal_state("completion abandoned"))
    }

    /// Blocks until the value arrives or `timeout` passes.
    ///
    /// # Errors
    ///
    /// Fails on timeout or if the sender was dropped unfulfilled.
    pub fn wait_timeout(self, timeout: Duration) -> TxnResult<T> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => TxnError::Expired,
            RecvTimeoutError::Disconnected => TxnError::illegal_state("completion abandoned"),
        })
    }
}
