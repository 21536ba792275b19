//! Collaborator interfaces consumed by the lifecycle core.
//!
//! The state machine calls out to three external subsystems — workers,
//! cleaners, and the host OS — through the narrow [`HostHooks`] trait.
//! [`DefaultHooks`] is the in-process implementation a standalone embedding
//! gets; tests substitute recording hooks whose `terminate` panics instead of
//! aborting.
//!
//! Fail-fast contract: nothing in this trait returns an error. The only
//! failure surface is `diagnostic` followed by `terminate`, which does not
//! return.

use std::fmt;
use std::process;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Identity of a worker, stable for the worker's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(
    /// Raw numeric id, unique for the process lifetime.
    pub u64,
);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

/// Owned handle to a live worker registration. Returned by
/// [`HostHooks::worker_start`], consumed by [`HostHooks::worker_deinit`].
#[derive(Debug)]
pub struct WorkerToken {
    id: WorkerId,
    main: bool,
}

impl WorkerToken {
    /// Construct a token; implementation detail of [`HostHooks`] impls.
    pub fn new(id: WorkerId, main: bool) -> Self {
        Self { id, main }
    }

    /// This worker's identity.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Whether this is a thread's main worker (created by attach) rather
    /// than a native-spawned one.
    pub fn is_main(&self) -> bool {
        self.main
    }
}

/// The narrow interfaces the lifecycle core consumes but does not implement.
pub trait HostHooks: Sync {
    // --- worker subsystem ------------------------------------------------

    /// Create this thread's worker identity. `main` is true for the worker
    /// created by runtime attach (as opposed to native-spawned workers).
    fn worker_start(&self, main: bool) -> WorkerToken;

    /// The identity behind a token.
    fn worker_id(&self, token: &WorkerToken) -> WorkerId {
        token.id()
    }

    /// Tear down a worker registration.
    fn worker_deinit(&self, token: WorkerToken);

    /// Release per-thread bookkeeping keyed by a worker id, after the
    /// worker itself is gone.
    fn release_worker_thread_data(&self, id: WorkerId);

    /// Block until every native-spawned worker thread has terminated.
    fn wait_native_workers_termination(&self);

    // --- cleaner subsystem -----------------------------------------------

    /// Stop the cleaner subsystem. When `run_pending` is true, pending
    /// cleanup actions run before the shutdown completes; otherwise they are
    /// discarded.
    fn shutdown_cleaners(&self, run_pending: bool);

    /// Force a full collection pass so lingering cleaners get queued.
    fn force_full_collection(&self);

    // --- host OS ---------------------------------------------------------

    /// One-time console/standard-stream setup, first runtime only.
    fn console_init(&self) {}

    /// One-time platform-interop setup, first runtime only. Invoked solely
    /// on Apple targets.
    fn interop_init(&self) {}

    /// Write a diagnostic line to the error stream.
    fn diagnostic(&self, message: fmt::Arguments<'_>);

    /// Terminate the process abnormally. Never returns.
    fn terminate(&self) -> !;
}

#[derive(Debug, Default)]
struct WorkerTable {
    next_id: u64,
    native_alive: u32,
    // Per-thread bookkeeping outliving the worker itself, released
    // separately once teardown no longer needs the id.
    thread_data: FxHashMap<u64, WorkerThreadData>,
}

#[derive(Debug)]
struct WorkerThreadData {
    main: bool,
}

#[derive(Default)]
struct CleanerQueue {
    pending: Vec<Box<dyn FnOnce() + Send>>,
    shut_down: bool,
}

/// Default in-process collaborators: a worker table with native-worker
/// tracking and a cleaner queue.
pub struct DefaultHooks {
    workers: Mutex<WorkerTable>,
    workers_done: Condvar,
    cleaners: Mutex<CleanerQueue>,
}

impl DefaultHooks {
    /// Fresh default collaborators.
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(WorkerTable::default()),
            workers_done: Condvar::new(),
            cleaners: Mutex::new(CleanerQueue::default()),
        }
    }

    /// Queue a cleanup action for the cleaner subsystem. Returns false when
    /// the cleaners were already shut down (the action is dropped).
    pub fn schedule_cleaner(&self, action: Box<dyn FnOnce() + Send>) -> bool {
        let mut queue = self.cleaners.lock();
        if queue.shut_down {
            return false;
        }
        queue.pending.push(action);
        true
    }

    /// Number of queued cleanup actions.
    pub fn pending_cleaners(&self) -> usize {
        self.cleaners.lock().pending.len()
    }
}

impl Default for DefaultHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl HostHooks for DefaultHooks {
    fn worker_start(&self, main: bool) -> WorkerToken {
        let mut table = self.workers.lock();
        let id = table.next_id;
        table.next_id += 1;
        if !main {
            table.native_alive += 1;
        }
        table.thread_data.insert(id, WorkerThreadData { main });
        debug!(id, main, "worker started");
        WorkerToken::new(WorkerId(id), main)
    }

    fn worker_deinit(&self, token: WorkerToken) {
        let mut table = self.workers.lock();
        if !token.is_main() {
            table.native_alive = table.native_alive.saturating_sub(1);
            if table.native_alive == 0 {
                self.workers_done.notify_all();
            }
        }
        debug!(id = token.id().0, "worker deinitialized");
    }

    fn release_worker_thread_data(&self, id: WorkerId) {
        if let Some(data) = self.workers.lock().thread_data.remove(&id.0) {
            debug!(id = id.0, main = data.main, "worker thread data released");
        }
    }

    fn wait_native_workers_termination(&self) {
        let mut table = self.workers.lock();
        while table.native_alive > 0 {
            self.workers_done.wait(&mut table);
        }
    }

    fn shutdown_cleaners(&self, run_pending: bool) {
        let pending = {
            let mut queue = self.cleaners.lock();
            queue.shut_down = true;
            std::mem::take(&mut queue.pending)
        };
        debug!(run_pending, dropped = !run_pending, "cleaners shut down");
        if run_pending {
            for action in pending {
                action();
            }
        }
    }

    fn force_full_collection(&self) {
        // Lifecycle-side collection point: reclaim whatever this thread's
        // memory state has parked on its deferred list.
        let freed = sable_memory::state::collect_deferred_current();
        debug!(freed, "forced collection pass");
    }

    fn diagnostic(&self, message: fmt::Arguments<'_>) {
        eprintln!("{message}");
    }

    fn terminate(&self) -> ! {
        process::abort()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn main_workers_do_not_block_native_termination_wait() {
        let hooks = DefaultHooks::new();
        let token = hooks.worker_start(true);
        // Would deadlock if the main worker counted as native.
        hooks.wait_native_workers_termination();
        let id = hooks.worker_id(&token);
        hooks.worker_deinit(token);
        hooks.release_worker_thread_data(id);
    }

    #[test]
    fn native_worker_termination_unblocks_waiter() {
        let hooks = Arc::new(DefaultHooks::new());
        let token = hooks.worker_start(false);
        let waiter = {
            let hooks = Arc::clone(&hooks);
            std::thread::spawn(move || hooks.wait_native_workers_termination())
        };
        hooks.worker_deinit(token);
        waiter.join().expect("waiter panicked");
    }

    #[test]
    fn cleaner_shutdown_runs_or_drops_pending_actions() {
        let ran = Arc::new(AtomicU32::new(0));
        let hooks = DefaultHooks::new();
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            assert!(hooks.schedule_cleaner(Box::new(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            })));
        }
        hooks.shutdown_cleaners(true);
        assert_eq!(ran.load(Ordering::Relaxed), 3);
        // Post-shutdown scheduling is refused.
        assert!(!hooks.schedule_cleaner(Box::new(|| ())));

        let dropped = DefaultHooks::new();
        let ran2 = Arc::new(AtomicU32::new(0));
        {
            let ran2 = Arc::clone(&ran2);
            dropped.schedule_cleaner(Box::new(move || {
                ran2.fetch_add(1, Ordering::Relaxed);
            }));
        }
        dropped.shutdown_cleaners(false);
        assert_eq!(ran2.load(Ordering::Relaxed), 0);
    }
}
