//! Per-thread runtime lifecycle state machine.
//!
//! Each OS thread that runs managed code owns exactly one [`RuntimeState`],
//! created by [`attach_if_needed`] and torn down either explicitly
//! ([`detach_if_needed`], [`destroy_process_runtime`]) or automatically when
//! the thread exits. Cross-thread coordination is limited to the atomics in
//! [`RuntimeEnv`]: the one-way global status and the alive-runtime count.
//!
//! Failure philosophy: every precondition violation and every policy
//! violation terminates the process through [`HostHooks::terminate`]. There
//! is no error return anywhere on this surface — once any of these calls
//! returns normally, callers may assume the invariants hold unconditionally.

use std::cell::Cell;
use std::fmt;
use std::ptr;
use std::sync::LazyLock;

use tracing::debug;

use crate::env::{GlobalStatus, RuntimeEnv};
use crate::hooks::{DefaultHooks, HostHooks, WorkerToken};
use crate::init_registry::{GlobalInitPhase, InitNode};
use crate::thread_exit;
use sable_memory::MemoryState;

/// Lifecycle status of one thread's runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuntimeStatus {
    Uninitialized,
    Running,
    Destroying,
}

/// One thread's runtime: memory-model handle, worker identity, status, and
/// the context/collaborators it was attached with. Owned exclusively by its
/// thread, held behind a raw pointer so the thread-exit destructor can still
/// reach it.
struct RuntimeState {
    env: &'static RuntimeEnv,
    hooks: &'static dyn HostHooks,
    memory: *mut MemoryState,
    worker: Option<WorkerToken>,
    status: RuntimeStatus,
}

thread_local! {
    // Const-initialized Cells of Copy data: no TLS destructors, so both stay
    // readable while the thread-exit callbacks run.
    static RUNTIME: Cell<*mut RuntimeState> = const { Cell::new(ptr::null_mut()) };
    static EXIT_HOOK_ARMED: Cell<bool> = const { Cell::new(false) };
}

static PROCESS_ENV: RuntimeEnv = RuntimeEnv::new();
static PROCESS_HOOKS: LazyLock<DefaultHooks> = LazyLock::new(DefaultHooks::new);

/// The process-wide runtime context used by the argument-less surface.
pub fn process_env() -> &'static RuntimeEnv {
    &PROCESS_ENV
}

/// The process-wide default collaborators.
pub fn process_hooks() -> &'static DefaultHooks {
    &PROCESS_HOOKS
}

/// Append a global-initializer node to the process-wide registry. Called by
/// generated static-setup code, once per global-state unit, before any
/// thread attaches.
pub fn register_global_initializer(node: &'static InitNode) {
    PROCESS_ENV.register_global_initializer(node);
}

/// Whether the calling thread currently has a runtime attached.
pub fn current_thread_attached() -> bool {
    !RUNTIME.get().is_null()
}

fn runtime_check(hooks: &dyn HostHooks, condition: bool, message: fmt::Arguments<'_>) {
    if !condition {
        hooks.diagnostic(message);
        hooks.terminate();
    }
}

/// Attach the calling thread to the process runtime, creating it if needed.
/// Idempotent per thread.
pub fn attach_if_needed() {
    attach_if_needed_in(process_env(), process_hooks());
}

/// As [`attach_if_needed`], against an explicit context and collaborators.
pub fn attach_if_needed_in(env: &'static RuntimeEnv, hooks: &'static dyn HostHooks) {
    if !RUNTIME.get().is_null() {
        return;
    }
    if env.global_status() == GlobalStatus::Destroyed {
        hooks.diagnostic(format_args!(
            "Sable runtime was previously destroyed. Cannot create a new runtime."
        ));
        hooks.terminate();
    }
    init_runtime(env, hooks);
    // Normal thread termination must detach automatically; arm once per
    // thread, the callback works off whatever runtime is then current.
    if !EXIT_HOOK_ARMED.get() {
        EXIT_HOOK_ARMED.set(true);
        thread_exit::register_thread_exit(detach_if_needed);
    }
}

fn init_runtime(env: &'static RuntimeEnv, hooks: &'static dyn HostHooks) {
    let state = Box::into_raw(Box::new(RuntimeState {
        env,
        hooks,
        memory: ptr::null_mut(),
        worker: None,
        status: RuntimeStatus::Uninitialized,
    }));
    runtime_check(
        hooks,
        RUNTIME.get().is_null(),
        format_args!("No active runtimes allowed on this thread"),
    );
    RUNTIME.set(state);

    // Exactly one attach in the process's lifetime performs this flip, even
    // under concurrent first attaches; everyone else observes Running.
    let first_runtime = env.try_mark_running();
    runtime_check(
        hooks,
        env.global_status() == GlobalStatus::Running,
        format_args!("Global runtime status must be running"),
    );
    env.note_attach();

    // SAFETY: state was boxed above and is owned by this thread.
    unsafe {
        (*state).memory = sable_memory::init_memory(first_runtime);
        (*state).worker = Some(hooks.worker_start(true));
        if first_runtime {
            hooks.console_init();
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "tvos",
                target_os = "watchos"
            ))]
            hooks.interop_init();
            env.initializers()
                .run_phase(GlobalInitPhase::InitGlobals, (*state).memory);
        }
        env.initializers()
            .run_phase(GlobalInitPhase::InitThreadLocalGlobals, (*state).memory);
        runtime_check(
            hooks,
            (*state).status == RuntimeStatus::Uninitialized,
            format_args!("Runtime must still be in the uninitialized state"),
        );
        (*state).status = RuntimeStatus::Running;
    }
    debug!(first_runtime, "runtime attached");
}

/// Tear down one thread's runtime.
///
/// # Safety
/// `state` must be this thread's live runtime pointer; the caller clears the
/// thread-local afterwards and never touches `state` again.
unsafe fn deinit_runtime(state: *mut RuntimeState, destroy_runtime: bool) {
    // SAFETY: per contract, state is this thread's live runtime.
    unsafe {
        let env = (*state).env;
        let hooks = (*state).hooks;
        runtime_check(
            hooks,
            (*state).status == RuntimeStatus::Running,
            format_args!("Runtime must be in the running state"),
        );
        (*state).status = RuntimeStatus::Destroying;
        // This can run after thread-local storage was already cleared, so
        // the memory handle is re-installed from the owning state.
        sable_memory::restore_memory((*state).memory);
        env.note_detach();
        env.initializers()
            .run_phase(GlobalInitPhase::DeinitThreadLocalGlobals, (*state).memory);
        if destroy_runtime {
            env.initializers()
                .run_phase(GlobalInitPhase::DeinitGlobals, (*state).memory);
        }
        let worker = match (*state).worker.take() {
            Some(worker) => worker,
            None => {
                runtime_check(
                    hooks,
                    false,
                    format_args!("Runtime must own a worker while running"),
                );
                unreachable!()
            }
        };
        let worker_id = hooks.worker_id(&worker);
        hooks.worker_deinit(worker);
        let leaked = sable_memory::deinit_memory((*state).memory, destroy_runtime);
        if leaked > 0 {
            tracing::warn!(leaked, full = destroy_runtime, "objects leaked at detach");
        }
        drop(Box::from_raw(state));
        hooks.release_worker_thread_data(worker_id);
        debug!(full = destroy_runtime, "runtime detached");
    }
}

/// Detach the calling thread's runtime, if any: partial teardown, the
/// process runtime stays running. No-op on an unattached thread.
pub fn detach_if_needed() {
    let state = RUNTIME.get();
    if !state.is_null() {
        // SAFETY: non-null thread-local pointer is this thread's runtime.
        unsafe { deinit_runtime(state, false) };
        RUNTIME.set(ptr::null_mut());
    }
}

/// Full, irreversible shutdown of the process runtime.
///
/// Only valid while the global status is Running, from a thread with an
/// attached runtime, and only when no other thread holds one — anything else
/// is terminal. After this returns, any further attach anywhere aborts.
pub fn destroy_process_runtime() {
    destroy_process_runtime_in(process_env(), process_hooks());
}

/// As [`destroy_process_runtime`], against an explicit context and
/// collaborators.
pub fn destroy_process_runtime_in(env: &'static RuntimeEnv, hooks: &'static dyn HostHooks) {
    runtime_check(
        hooks,
        env.global_status() == GlobalStatus::Running,
        format_args!("Sable runtime must be running"),
    );
    let state = RUNTIME.get();
    runtime_check(
        hooks,
        !state.is_null(),
        format_args!("Current thread must have a Sable runtime on it"),
    );

    if env.cleaners_leak_checker_enabled() {
        // Make sure lingering cleaners get queued, then run every pending
        // block while stopping the cleaner subsystem.
        hooks.force_full_collection();
        hooks.shutdown_cleaners(true);
    } else {
        hooks.shutdown_cleaners(false);
    }
    if env.memory_leak_checker_enabled() {
        hooks.wait_native_workers_termination();
    }

    env.mark_destroyed();

    let other_runtimes = env.alive_runtimes() - 1;
    runtime_check(
        hooks,
        other_runtimes >= 0,
        format_args!("Alive runtime count cannot be negative"),
    );
    if other_runtimes > 0 {
        hooks.diagnostic(format_args!(
            "Cannot destroy runtime while there are {other_runtimes} alive threads with a runtime attached."
        ));
        hooks.terminate();
    }

    // SAFETY: non-null thread-local pointer is this thread's runtime.
    unsafe { deinit_runtime(state, true) };
    RUNTIME.set(ptr::null_mut());
    debug!("process runtime destroyed");
}

/// Run the thread-local deinit phase for the current runtime without
/// detaching it. Used when the host zeroes thread-local globals ahead of
/// ordinary teardown. No-op when nothing is attached.
pub fn zero_out_thread_globals() {
    let state = RUNTIME.get();
    if state.is_null() {
        return;
    }
    // SAFETY: non-null thread-local pointer is this thread's runtime.
    unsafe {
        if !(*state).memory.is_null() {
            (*state)
                .env
                .initializers()
                .run_phase(GlobalInitPhase::DeinitThreadLocalGlobals, (*state).memory);
        }
    }
}
