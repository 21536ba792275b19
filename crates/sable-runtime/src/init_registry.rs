//! Global-initializer registry.
//!
//! Generated static-setup code contributes one [`InitNode`] per global-state
//! unit, appended to an intrusive singly-linked list before any thread
//! attaches. The lifecycle machinery then drives every node through the four
//! [`GlobalInitPhase`]s.
//!
//! Ordering contract: callbacks run in registration order for **all** phases,
//! the deinit phases included. Teardown is deliberately not reversed; global
//! initializers must not rely on stack-order teardown between each other.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use sable_memory::MemoryState;

/// Lifecycle phase handed to every registered initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalInitPhase {
    /// Process-wide globals, run once by the first runtime.
    InitGlobals,
    /// Thread-local globals, run by every attaching thread.
    InitThreadLocalGlobals,
    /// Thread-local teardown, run on every detach.
    DeinitThreadLocalGlobals,
    /// Process-wide teardown, run only on full runtime destruction.
    DeinitGlobals,
}

/// Initializer callback: phase plus the attaching thread's memory handle.
pub type InitFn = fn(GlobalInitPhase, *mut MemoryState);

/// Intrusive list node owned by its static-lifetime declarer, never freed.
#[derive(Debug)]
pub struct InitNode {
    init: InitFn,
    next: AtomicPtr<InitNode>,
}

impl InitNode {
    /// A node wrapping `init`, ready for [`InitializerList::register`].
    pub const fn new(init: InitFn) -> Self {
        Self {
            init,
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Process-wide append-only list of initializer nodes.
///
/// Registration is only safe before concurrent attach activity begins; that
/// is a documented precondition, not an enforced one, which is why plain
/// relaxed pointer stores suffice here.
#[derive(Debug)]
pub struct InitializerList {
    head: AtomicPtr<InitNode>,
    tail: AtomicPtr<InitNode>,
}

impl InitializerList {
    /// An empty list, usable in a `static`.
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Append `node` at the tail. The node stays owned by its declarer for
    /// the rest of the process lifetime.
    pub fn register(&self, node: &'static InitNode) {
        let node_ptr = ptr::from_ref(node).cast_mut();
        let tail = self.tail.load(Ordering::Relaxed);
        if tail.is_null() {
            self.head.store(node_ptr, Ordering::Relaxed);
        } else {
            // SAFETY: tail was registered earlier and is 'static.
            unsafe { (*tail).next.store(node_ptr, Ordering::Relaxed) };
        }
        self.tail.store(node_ptr, Ordering::Relaxed);
    }

    /// Walk head-to-tail, invoking every node with `(phase, memory)`.
    pub fn run_phase(&self, phase: GlobalInitPhase, memory: *mut MemoryState) {
        let mut current = self.head.load(Ordering::Relaxed);
        while !current.is_null() {
            // SAFETY: registered nodes are 'static and never unlinked.
            let node = unsafe { &*current };
            (node.init)(phase, memory);
            current = node.next.load(Ordering::Relaxed);
        }
    }

    /// Whether any node has been registered.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed).is_null()
    }
}

impl Default for InitializerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static RUN_LOG: Mutex<Vec<(u8, GlobalInitPhase)>> = Mutex::new(Vec::new());

    fn log_a(phase: GlobalInitPhase, _memory: *mut MemoryState) {
        RUN_LOG.lock().unwrap().push((b'a', phase));
    }
    fn log_b(phase: GlobalInitPhase, _memory: *mut MemoryState) {
        RUN_LOG.lock().unwrap().push((b'b', phase));
    }
    fn log_c(phase: GlobalInitPhase, _memory: *mut MemoryState) {
        RUN_LOG.lock().unwrap().push((b'c', phase));
    }

    #[test]
    fn phases_run_in_registration_order_including_deinit() {
        static A: InitNode = InitNode::new(log_a);
        static B: InitNode = InitNode::new(log_b);
        static C: InitNode = InitNode::new(log_c);

        let list = InitializerList::new();
        assert!(list.is_empty());
        list.register(&A);
        list.register(&B);
        list.register(&C);

        RUN_LOG.lock().unwrap().clear();
        list.run_phase(GlobalInitPhase::InitGlobals, std::ptr::null_mut());
        list.run_phase(GlobalInitPhase::DeinitGlobals, std::ptr::null_mut());

        let log = RUN_LOG.lock().unwrap();
        let order: Vec<u8> = log.iter().map(|(id, _)| *id).collect();
        // Deinit deliberately repeats registration order, it is not reversed.
        assert_eq!(order, vec![b'a', b'b', b'c', b'a', b'b', b'c']);
        assert!(
            log.iter()
                .take(3)
                .all(|(_, phase)| *phase == GlobalInitPhase::InitGlobals)
        );
    }

    #[test]
    fn empty_list_runs_nothing() {
        let list = InitializerList::new();
        list.run_phase(GlobalInitPhase::InitThreadLocalGlobals, std::ptr::null_mut());
    }
}
