//! Per-thread event loops and the sync-over-async bridge.
//!
//! The non-blocking driver only makes progress while a tokio runtime polls
//! it, but every client operation is synchronous. Each calling thread gets
//! its own [`EventLoop`], created on first use and kept in a
//! [`LoopRegistry`] keyed by [`ThreadId`].
//!
//! A thread that is already inside a runtime (a `#[tokio::test]`, or a
//! future running on one of our own loops that calls back into the client)
//! cannot call `block_on` again. For that case the work is moved to a
//! dedicated worker thread for the duration of a single call, and the
//! caller blocks on the worker's join handle instead of on the busy loop.
//! On a multi-thread runtime that wait goes through
//! [`tokio::task::block_in_place`], so a loop whose only worker is the
//! caller hands its IO driver to another thread while it waits.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

/// A tokio runtime bound to one calling thread.
///
/// Uses the multi-thread flavor with a single worker so the IO driver keeps
/// running between calls. Connections opened on this loop stay usable from
/// any thread for as long as the loop is alive.
pub struct EventLoop {
    runtime: Option<Runtime>,
    owner: ThreadId,
}

impl EventLoop {
    fn new(owner: ThreadId) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pglite-client-loop")
            .enable_all()
            .build()?;

        tracing::debug!(?owner, "created event loop");

        Ok(Self {
            runtime: Some(runtime),
            owner,
        })
    }

    /// The thread this loop was created for.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn handle(&self) -> &Handle {
        self.runtime().handle()
    }

    /// Drive `fut` to completion on the calling thread.
    ///
    /// Panics if the calling thread is already inside a runtime; use
    /// [`LoopRegistry::block_on`] unless that has been ruled out.
    pub fn run<F: Future>(&self, fut: F) -> F::Output {
        self.runtime().block_on(fut)
    }

    fn runtime(&self) -> &Runtime {
        // Only `Drop` takes the runtime out.
        self.runtime.as_ref().expect("event loop used after drop")
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // A plain drop blocks, which panics inside an async context.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Thread-keyed registry of event loops.
///
/// At most one loop per thread. Loops are created lazily and never removed
/// while the registry lives.
#[derive(Default)]
pub struct LoopRegistry {
    loops: Mutex<HashMap<ThreadId, Arc<EventLoop>>>,
    fallbacks: AtomicUsize,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The calling thread's loop, created on first use.
    pub fn current(&self) -> io::Result<Arc<EventLoop>> {
        let id = thread::current().id();
        let mut loops = self
            .loops
            .lock()
            .map_err(|_| io::Error::other("event loop registry poisoned"))?;

        if let Some(event_loop) = loops.get(&id) {
            return Ok(Arc::clone(event_loop));
        }

        let event_loop = Arc::new(EventLoop::new(id)?);
        loops.insert(id, Arc::clone(&event_loop));
        Ok(event_loop)
    }

    /// Number of threads that own a loop in this registry.
    pub fn len(&self) -> usize {
        self.loops.lock().map(|loops| loops.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many calls had to leave a busy loop for a worker thread.
    pub fn fallback_count(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Run `fut` to completion and return its output, synchronously.
    ///
    /// Fast path: the thread's loop is idle, so drive it directly. If the
    /// thread is already dispatching, a worker thread drives `fut` through
    /// the loop's handle while the caller waits on the join.
    pub fn block_on<F>(&self, fut: F) -> io::Result<F::Output>
    where
        F: Future + Send,
        F::Output: Send,
    {
        let event_loop = self.current()?;

        if !is_dispatching() {
            return Ok(event_loop.run(fut));
        }

        let fallbacks = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            thread = ?event_loop.owner(),
            fallbacks,
            "non-blocking client called while this thread's event loop is running; \
             executing on a dedicated worker thread (prefer the blocking client here)"
        );

        let handle = event_loop.handle().clone();
        wait_in_place(|| run_on_worker(move || handle.block_on(fut)))
    }
}

/// Whether the calling thread is already inside a tokio runtime.
pub fn is_dispatching() -> bool {
    Handle::try_current().is_ok()
}

/// Run `f` on a fresh scoped thread and wait for its result.
///
/// The thread lives for exactly this call. A panic in `f` is resumed on the
/// caller.
pub fn run_on_worker<F, T>(f: F) -> io::Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("pglite-client-worker".to_string())
            .spawn_scoped(scope, f)?;

        match worker.join() {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

/// Run synchronous code that must not execute inside a runtime context.
///
/// Inline when the thread is free, otherwise on a one-off worker.
pub fn run_outside_loop<F, T>(f: F) -> io::Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    if is_dispatching() {
        tracing::debug!("thread is inside a runtime; running blocking call on a worker");
        wait_in_place(|| run_on_worker(f))
    } else {
        Ok(f())
    }
}

/// Block the calling thread for `f`.
///
/// A multi-thread runtime worker first gives up its core, so the runtime
/// keeps polling tasks and driving IO in the meantime. The single-threaded
/// flavor cannot do that and simply blocks.
fn wait_in_place<F, T>(f: F) -> T
where
    F: FnOnce() -> T,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
