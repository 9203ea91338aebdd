//! Serial workers: one named thread per component, one queue of jobs.
//!
//! ```text
//!   caller threads                   worker thread
//!   ──────────────                   ─────────────────────────────────
//!   post(job)         ──► mpsc ──►   select! { queue, delay queue }
//!   post_delayed(job) ──► mpsc ──►       job(&mut state, &handle)
//!   run_sync(job)     ──► mpsc ──►   ──► oneshot ──► caller resumes
//! ```
//!
//! A component keeps all of its mutable state in `S`. Only jobs touch it,
//! so the state needs no lock. The state is built on the worker thread by
//! the init closure and never leaves it.

use std::ops::Deref;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::time::DelayQueue;
use tracing::{debug, trace, warn};

use crate::error::MediaError;

/// A unit of work run against the worker's state.
pub type Job<S> = Box<dyn FnOnce(&mut S, &WorkerHandle<S>) + Send + 'static>;

enum Message<S> {
    Run(Job<S>),
    RunAfter(Duration, Job<S>),
    Quit,
}

// ── WorkerHandle ─────────────────────────────────────────────────

/// Cheap, cloneable sender side of a [`SerialWorker`].
///
/// Handles stay valid after the worker quits; posts then return `false`
/// and the job is dropped.
pub struct WorkerHandle<S> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Message<S>>,
    thread: Arc<OnceLock<ThreadId>>,
}

impl<S> Clone for WorkerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
            thread: Arc::clone(&self.thread),
        }
    }
}

impl<S: 'static> WorkerHandle<S> {
    /// Thread name of the worker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a job. Returns `false` if the worker has quit.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut S, &WorkerHandle<S>) + Send + 'static,
    {
        self.send(Message::Run(Box::new(job)))
    }

    /// Enqueue a job that runs once `delay` has elapsed.
    pub fn post_delayed<F>(&self, delay: Duration, job: F) -> bool
    where
        F: FnOnce(&mut S, &WorkerHandle<S>) + Send + 'static,
    {
        self.send(Message::RunAfter(delay, Box::new(job)))
    }

    /// Run a job on the worker and block until it returns.
    ///
    /// Fails with [`MediaError::Reentrant`] when called from the worker
    /// thread itself, and with [`MediaError::WorkerStopped`] when the
    /// worker quits before running the job.
    pub fn run_sync<R, F>(&self, job: F) -> Result<R, MediaError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S, &WorkerHandle<S>) -> R + Send + 'static,
    {
        if self.is_current() {
            return Err(MediaError::Reentrant(self.name.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        let posted = self.post(move |state, handle| {
            let _ = tx.send(job(state, handle));
        });
        if !posted {
            return Err(MediaError::WorkerStopped(self.name.to_string()));
        }
        futures::executor::block_on(rx).map_err(|_| MediaError::WorkerStopped(self.name.to_string()))
    }

    /// Ask the worker to exit after the jobs already queued.
    ///
    /// Pending delayed jobs are dropped.
    pub fn quit(&self) {
        self.send(Message::Quit);
    }

    /// Whether the calling thread is this worker's thread.
    pub fn is_current(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    fn send(&self, message: Message<S>) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(_) => {
                trace!(worker = %self.name, "worker gone; job dropped");
                false
            }
        }
    }
}

// ── SerialWorker ─────────────────────────────────────────────────

/// Owning side of a worker thread.
///
/// Dropping a `SerialWorker` detaches the thread; it keeps running until
/// something calls [`WorkerHandle::quit`]. Components decide when their
/// worker ends, which matters for deferred teardown.
pub struct SerialWorker<S> {
    handle: WorkerHandle<S>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<S: 'static> SerialWorker<S> {
    /// Spawn a worker named `name` whose state is built by `init` on the
    /// new thread. Blocks until `init` has returned.
    pub fn spawn<F>(name: &str, init: F) -> Result<Self, MediaError>
    where
        F: FnOnce(&WorkerHandle<S>) -> Result<S, MediaError> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = WorkerHandle {
            name: Arc::from(name),
            tx,
            thread: Arc::new(OnceLock::new()),
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker_handle = handle.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(worker_handle, rx, init, ready_tx))?;

        match futures::executor::block_on(ready_rx) {
            Ok(Ok(())) => Ok(Self {
                handle,
                join: Mutex::new(Some(join)),
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(MediaError::WorkerStopped(name.to_string()))
            }
        }
    }

    /// A cloneable handle for posting from other threads and callbacks.
    pub fn handle(&self) -> &WorkerHandle<S> {
        &self.handle
    }

    /// Quit and wait for the thread to exit.
    ///
    /// From the worker's own thread this only quits.
    pub fn shutdown(&self) {
        self.handle.quit();
        self.join();
    }

    /// Wait for the thread to exit without asking it to.
    pub fn join(&self) {
        if self.handle.is_current() {
            return;
        }
        if let Some(join) = self.join.lock().take() {
            if join.join().is_err() {
                warn!(worker = %self.handle.name, "worker thread panicked");
            }
        }
    }
}

impl<S> Deref for SerialWorker<S> {
    type Target = WorkerHandle<S>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

fn run_loop<S, F>(
    handle: WorkerHandle<S>,
    mut rx: mpsc::UnboundedReceiver<Message<S>>,
    init: F,
    ready_tx: oneshot::Sender<Result<(), MediaError>>,
) where
    S: 'static,
    F: FnOnce(&WorkerHandle<S>) -> Result<S, MediaError>,
{
    let _ = handle.thread.set(thread::current().id());
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready_tx.send(Err(MediaError::Spawn(e)));
            return;
        }
    };

    runtime.block_on(async move {
        let mut state = match init(&handle) {
            Ok(state) => state,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let _ = ready_tx.send(Ok(()));
        debug!(worker = %handle.name, "worker started");

        let mut delayed: DelayQueue<Job<S>> = DelayQueue::new();
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(Message::Run(job)) => job(&mut state, &handle),
                    Some(Message::RunAfter(delay, job)) => {
                        delayed.insert(job, delay);
                    }
                    Some(Message::Quit) | None => break,
                },
                Some(expired) = delayed.next(), if !delayed.is_empty() => {
                    let job = expired.into_inner();
                    job(&mut state, &handle);
                }
            }
        }

        // State teardown runs on the worker, like every other access.
        drop(state);
        debug!(worker = %handle.name, "worker stopped");
    });
}

// ── Tests ────────────────────────────────────────────────────────
