//! Per-thread memory bookkeeping.
//!
//! Each attached thread owns exactly one [`MemoryState`], handed out by
//! [`init_memory`] and stored behind a raw pointer in thread-local storage.
//! The state is never shared: every reference-update primitive runs on the
//! owning thread. The handle is raw because teardown can run from a
//! thread-exit destructor after ordinary thread-locals were already cleared,
//! which is why [`restore_memory`] exists.

use std::cell::Cell;
use std::ptr;

use tracing::{debug, trace};

use crate::alloc;
use crate::object::ObjRef;

/// A contiguous run of stack reference slots registered as GC roots.
///
/// `start..start+count` is the whole frame; the first `parameters` slots are
/// owned by the caller and are skipped when the frame is left.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpan {
    /// First slot of the frame.
    pub start: *mut ObjRef,
    /// Leading slots owned by the caller.
    pub parameters: usize,
    /// Total slot count, parameters included.
    pub count: usize,
}

/// Per-thread memory-model bookkeeping.
pub struct MemoryState {
    pub(crate) frames: Vec<FrameSpan>,
    pub(crate) deferred_releases: Vec<ObjRef>,
    live_objects: u64,
    live_bytes: u64,
    total_allocated: u64,
    first_runtime: bool,
}

impl MemoryState {
    fn new(first_runtime: bool) -> Self {
        Self {
            frames: Vec::new(),
            deferred_releases: Vec::new(),
            live_objects: 0,
            live_bytes: 0,
            total_allocated: 0,
            first_runtime,
        }
    }

    /// Objects allocated on this thread and not yet reclaimed.
    pub fn live_objects(&self) -> u64 {
        self.live_objects
    }

    /// Bytes allocated on this thread and not yet reclaimed.
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Total objects ever allocated on this thread.
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    /// Zero-refcount objects waiting for a collection point.
    pub fn deferred_release_count(&self) -> usize {
        self.deferred_releases.len()
    }

    /// Currently registered root frames.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether this state belongs to the first runtime in the process.
    pub fn is_first_runtime(&self) -> bool {
        self.first_runtime
    }

    pub(crate) fn note_alloc(&mut self, bytes: u64) {
        self.live_objects += 1;
        self.live_bytes += bytes;
        self.total_allocated += 1;
    }

    pub(crate) fn note_free(&mut self, bytes: u64) {
        debug_assert!(self.live_objects > 0);
        self.live_objects -= 1;
        self.live_bytes = self.live_bytes.saturating_sub(bytes);
    }
}

thread_local! {
    // Const-initialized Cell of a Copy type: no TLS destructor is registered,
    // so the slot stays accessible while other destructors run.
    static MEMORY: Cell<*mut MemoryState> = const { Cell::new(ptr::null_mut()) };
}

/// Create this thread's memory state and install it in thread-local storage.
///
/// `first_runtime` is true for the one attach that flipped the process into
/// the running state; process-wide one-time setup keys off it.
pub fn init_memory(first_runtime: bool) -> *mut MemoryState {
    let state = Box::into_raw(Box::new(MemoryState::new(first_runtime)));
    MEMORY.set(state);
    debug!(first_runtime, "memory state initialized");
    state
}

/// Re-install `state` as the thread's memory state.
///
/// Teardown may run from a thread-exit destructor after the thread-local slot
/// was already cleared; the caller keeps the owning handle and restores it
/// here before running deinitializers.
pub fn restore_memory(state: *mut MemoryState) {
    MEMORY.set(state);
}

/// The current thread's memory state, or null when none is attached.
pub fn current_memory() -> *mut MemoryState {
    MEMORY.get()
}

/// Tear down this thread's memory state.
///
/// Deferred releases are drained and reclaimed first. Returns the number of
/// objects still live afterwards so the caller's leak checker can report
/// them. Process-wide resources are released only on `full_teardown`.
///
/// # Safety
/// `state` must be a handle returned by [`init_memory`] on this thread, not
/// yet deinitialized.
pub unsafe fn deinit_memory(state: *mut MemoryState, full_teardown: bool) -> u64 {
    // SAFETY: per contract, state is the live handle for this thread.
    let leaked = unsafe {
        process_deferred_releases(&mut *state);
        (*state).live_objects()
    };
    trace!(leaked, full_teardown, "memory state deinitialized");
    if MEMORY.get() == state {
        MEMORY.set(ptr::null_mut());
    }
    // SAFETY: handle came from Box::into_raw in init_memory.
    drop(unsafe { Box::from_raw(state) });
    leaked
}

/// Reclaim every deferred zero-refcount object. Returns how many were freed.
///
/// This is the collection point both policies hand deferred releases to: the
/// relaxed model defers every release here, the strict model only the
/// `no_collect` variants.
pub fn process_deferred_releases(state: &mut MemoryState) -> usize {
    let pending = std::mem::take(&mut state.deferred_releases);
    let mut freed = 0;
    for obj in pending {
        // A deferred object can have been resurrected by a later retain;
        // only reclaim the ones still at zero. The deferred flag guarantees
        // each entry is unique, so survivors may re-queue later.
        // SAFETY: entries are live allocations owned by this thread's state.
        unsafe {
            (*obj).clear_deferred();
            if (*obj).ref_count() == 0 {
                alloc::reclaim(state, obj);
                freed += 1;
            }
        }
    }
    if freed > 0 {
        trace!(freed, "processed deferred releases");
    }
    freed
}

/// Run [`process_deferred_releases`] for the current thread, if one has a
/// memory state attached. Returns how many objects were freed.
pub fn collect_deferred_current() -> usize {
    let state = MEMORY.get();
    if state.is_null() {
        return 0;
    }
    // SAFETY: non-null thread-local handle is owned by this thread.
    unsafe { process_deferred_releases(&mut *state) }
}

pub(crate) fn with_state<R>(f: impl FnOnce(&mut MemoryState) -> R) -> R {
    let state = MEMORY.get();
    if state.is_null() {
        fatal_no_state();
    }
    // SAFETY: non-null thread-local handle is owned by this thread, and this
    // module never hands out overlapping mutable borrows (ops never reenter).
    unsafe { f(&mut *state) }
}

#[cold]
fn fatal_no_state() -> ! {
    // Precondition violation: a reference-update primitive ran on a thread
    // with no attached runtime. Memory-model invariants cannot be trusted.
    eprintln!("sable-memory: no memory state attached to this thread");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TypeRecord;

    static NODE: TypeRecord = TypeRecord::object("test.Node", 24);

    #[test]
    fn init_and_deinit_round_trip() {
        let state = init_memory(true);
        assert_eq!(current_memory(), state);
        // SAFETY: state is this thread's live handle.
        unsafe {
            assert!((*state).is_first_runtime());
            assert_eq!((*state).live_objects(), 0);
            assert_eq!(deinit_memory(state, true), 0);
        }
        assert!(current_memory().is_null());
    }

    #[test]
    fn deferred_release_reclaims_only_dead_objects() {
        let mut state = MemoryState::new(false);
        let dead = alloc::alloc_object(&mut state, &NODE);
        let resurrected = alloc::alloc_object(&mut state, &NODE);
        // SAFETY: both objects are live allocations of this state.
        unsafe {
            (*resurrected).retain();
            assert!((*dead).mark_deferred());
            assert!((*resurrected).mark_deferred());
        }
        state.deferred_releases.push(dead);
        state.deferred_releases.push(resurrected);

        assert_eq!(process_deferred_releases(&mut state), 1);
        assert_eq!(state.live_objects(), 1);

        // Drop the survivor too so the test state ends clean.
        unsafe {
            (*resurrected).release();
            alloc::reclaim(&mut state, resurrected);
        }
        assert_eq!(state.live_objects(), 0);
    }
}
