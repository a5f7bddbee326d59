//! The owning context: a dedicated thread on which every host call runs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

/// How often a blocked caller re-checks its cancel flag.
const POLL_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Execution timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Owning context '{0}' has stopped")]
    Stopped(String),
    #[error("Job panicked: {0}")]
    Panicked(String),
}

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

/// Owns the worker thread. Dropping it without [`OwningContext::shutdown`]
/// stops the queue but does not wait for the thread.
pub struct OwningContext {
    handle: ContextHandle,
    thread: Option<JoinHandle<()>>,
}

impl OwningContext {
    pub fn start(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Message>();
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(context = %thread_name, "Owning context started");
                while let Ok(Message::Run(job)) = rx.recv() {
                    job();
                }
                debug!(context = %thread_name, "Owning context stopped");
            })?;
        let handle = ContextHandle {
            name: Arc::from(name),
            sender: tx,
            thread_id: thread.thread().id(),
            stopped: Arc::new(AtomicBool::new(false)),
        };
        info!(context = %name, "Started owning context");
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread_id
    }

    /// Stop accepting jobs and wait for the current one to finish. Jobs
    /// still queued are dropped and their callers get `Stopped`.
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(context = %self.handle.name, "Owning context thread panicked");
        }
        info!(context = %self.handle.name, "Shut down owning context");
    }

    fn stop(&self) {
        if !self.handle.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.handle.sender.send(Message::Stop);
        }
    }
}

impl Drop for OwningContext {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable submitter for an [`OwningContext`].
#[derive(Clone)]
pub struct ContextHandle {
    name: Arc<str>,
    sender: mpsc::Sender<Message>,
    thread_id: ThreadId,
    stopped: Arc<AtomicBool>,
}

impl ContextHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether the caller is already on the owning thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Run `job` on the owning thread and wait for its result.
    pub fn run<T, F>(&self, job: F, timeout: Option<Duration>) -> Result<T, ScheduleError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let never = AtomicBool::new(false);
        self.run_cancellable(job, timeout, &never)
    }

    /// Like [`ContextHandle::run`], but also stops waiting once `cancel` is
    /// raised. The job itself is never interrupted.
    pub fn run_cancellable<T, F>(
        &self,
        job: F,
        timeout: Option<Duration>,
        cancel: &AtomicBool,
    ) -> Result<T, ScheduleError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_stopped() {
            return Err(ScheduleError::Stopped(self.name.to_string()));
        }
        if self.is_current() {
            // Re-entrant submission would wait on itself forever.
            return panic::catch_unwind(AssertUnwindSafe(job))
                .map_err(|payload| ScheduleError::Panicked(panic_message(payload)));
        }

        let (tx, rx) = mpsc::channel();
        let wrapped: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = tx.send(result);
        });
        self.sender
            .send(Message::Run(wrapped))
            .map_err(|_| ScheduleError::Stopped(self.name.to_string()))?;

        let started = Instant::now();
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(ScheduleError::Cancelled);
            }
            let slice = match timeout {
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        return Err(ScheduleError::Timeout(limit));
                    }
                    (limit - elapsed).min(POLL_SLICE)
                }
                None => POLL_SLICE,
            };
            match rx.recv_timeout(slice) {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(payload)) => return Err(ScheduleError::Panicked(panic_message(payload))),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ScheduleError::Stopped(self.name.to_string()));
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
