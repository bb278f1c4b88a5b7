use std::thread::{self, JoinHandle};

/// A unit of work handed to a dispatcher.
pub type Job = Box<dyn FnOnce() + Send>;

/// Runs work on the designated main thread.
///
/// The manager drives its state machine only on this thread; hosts plug in
/// their UI loop or equivalent.
pub trait MainThreadDispatcher: Send + Sync {
    /// True when called from the main thread.
    fn is_current(&self) -> bool;

    /// Enqueues `job` to run on the main thread.
    fn dispatch(&self, job: Job);
}

/// Runs work on a background thread.
pub trait WorkerQueue: Send + Sync {
    /// Enqueues `job` to run on the worker.
    fn dispatch(&self, job: Job);
}

/// [`WorkerQueue`] backed by a dedicated thread draining a channel.
///
/// The thread exits when the queue is dropped; pending jobs are still run.
pub struct ThreadWorkerQueue {
    tx: Option<crossbeam_channel::Sender<Job>>,
    join: Option<JoinHandle<()>>,
}

impl ThreadWorkerQueue {
    /// Spawns the worker thread.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let join = thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                job();
            }
        });
        Self {
            tx: Some(tx),
            join: Some(join),
        }
    }
}

impl Default for ThreadWorkerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerQueue for ThreadWorkerQueue {
    fn dispatch(&self, job: Job) {
        if let Some(tx) = &self.tx {
            // A send can only fail after drop has started tearing us down.
            let _ = tx.send(job);
        }
    }
}

impl Drop for ThreadWorkerQueue {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
    }
}
