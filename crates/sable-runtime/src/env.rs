//! Process-wide runtime context.
//!
//! All cross-thread state of the lifecycle core lives in one explicitly-owned
//! [`RuntimeEnv`]: the global status, the alive-runtime count, the two
//! leak-checker toggles, and the global-initializer list. The production
//! surface uses a single process-wide instance; tests construct isolated
//! ones. Nothing here takes a lock — the shared state is three atomics and an
//! append-only list.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use crate::init_registry::{InitNode, InitializerList};

/// Process-wide lifecycle status. Transitions one way only:
/// Uninitialized → Running → Destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GlobalStatus {
    /// No thread has ever attached.
    Uninitialized = 0,
    /// At least one attach succeeded; the process runtime is live.
    Running = 1,
    /// `destroy_process_runtime` completed. Terminal.
    Destroyed = 2,
}

impl GlobalStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Running,
            _ => Self::Destroyed,
        }
    }
}

/// The process-wide runtime context.
#[derive(Debug)]
pub struct RuntimeEnv {
    global_status: AtomicU8,
    alive_runtimes: AtomicI32,
    check_leaked_objects: AtomicBool,
    check_leaked_cleaners: AtomicBool,
    initializers: InitializerList,
}

impl RuntimeEnv {
    /// A fresh context: status Uninitialized, no alive runtimes, leak
    /// checkers defaulting on in debug builds.
    pub const fn new() -> Self {
        Self {
            global_status: AtomicU8::new(GlobalStatus::Uninitialized as u8),
            alive_runtimes: AtomicI32::new(0),
            check_leaked_objects: AtomicBool::new(cfg!(debug_assertions)),
            check_leaked_cleaners: AtomicBool::new(cfg!(debug_assertions)),
            initializers: InitializerList::new(),
        }
    }

    /// Current process-wide status.
    pub fn global_status(&self) -> GlobalStatus {
        GlobalStatus::from_raw(self.global_status.load(Ordering::Acquire))
    }

    /// Attempt the one-time Uninitialized → Running flip. Returns true for
    /// the single caller whose attach performed it; losing racers observe
    /// Running already set.
    pub(crate) fn try_mark_running(&self) -> bool {
        self.global_status
            .compare_exchange(
                GlobalStatus::Uninitialized as u8,
                GlobalStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Terminal Running → Destroyed transition.
    pub(crate) fn mark_destroyed(&self) {
        self.global_status
            .store(GlobalStatus::Destroyed as u8, Ordering::Release);
    }

    /// Number of threads currently holding an attached runtime.
    pub fn alive_runtimes(&self) -> i32 {
        self.alive_runtimes.load(Ordering::Acquire)
    }

    pub(crate) fn note_attach(&self) {
        self.alive_runtimes.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_detach(&self) {
        self.alive_runtimes.fetch_sub(1, Ordering::AcqRel);
    }

    /// Whether the object leak checker is enabled.
    pub fn memory_leak_checker_enabled(&self) -> bool {
        self.check_leaked_objects.load(Ordering::Relaxed)
    }

    /// Toggle the object leak checker.
    pub fn set_memory_leak_checker(&self, value: bool) {
        self.check_leaked_objects.store(value, Ordering::Relaxed);
    }

    /// Whether the cleaners leak checker is enabled.
    pub fn cleaners_leak_checker_enabled(&self) -> bool {
        self.check_leaked_cleaners.load(Ordering::Relaxed)
    }

    /// Toggle the cleaners leak checker.
    pub fn set_cleaners_leak_checker(&self, value: bool) {
        self.check_leaked_cleaners.store(value, Ordering::Relaxed);
    }

    /// The global-initializer list of this context.
    pub fn initializers(&self) -> &InitializerList {
        &self.initializers
    }

    /// Append a caller-owned initializer node. Must happen before concurrent
    /// attach activity begins (static program setup).
    pub fn register_global_initializer(&self, node: &'static InitNode) {
        self.initializers.register(node);
    }
}

impl Default for RuntimeEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_running_transition_happens_once() {
        let env = RuntimeEnv::new();
        assert_eq!(env.global_status(), GlobalStatus::Uninitialized);
        assert!(env.try_mark_running());
        assert!(!env.try_mark_running());
        assert_eq!(env.global_status(), GlobalStatus::Running);
        env.mark_destroyed();
        assert!(!env.try_mark_running());
        assert_eq!(env.global_status(), GlobalStatus::Destroyed);
    }

    #[test]
    fn leak_checker_toggles_are_independent() {
        let env = RuntimeEnv::new();
        env.set_memory_leak_checker(true);
        env.set_cleaners_leak_checker(false);
        assert!(env.memory_leak_checker_enabled());
        assert!(!env.cleaners_leak_checker_enabled());
        env.set_memory_leak_checker(false);
        env.set_cleaners_leak_checker(true);
        assert!(!env.memory_leak_checker_enabled());
        assert!(env.cleaners_leak_checker_enabled());
    }
}
