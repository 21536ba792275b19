//! # Sable Runtime
//!
//! Per-thread runtime lifecycle and process-wide state machine for the Sable
//! native runtime: attach/detach/destroy, the global-initializer registry,
//! thread-exit integration, and the platform query shims.
//!
//! ## Lifecycle contract
//!
//! - A thread attaches with [`lifecycle::attach_if_needed`]; the first attach
//!   in the process flips the global status to Running and runs the one-time
//!   global initializers.
//! - Normal thread exit detaches automatically; [`lifecycle::detach_if_needed`]
//!   does it explicitly. Both are partial teardown.
//! - [`lifecycle::destroy_process_runtime`] is the one-way full shutdown: it
//!   requires being the last attached thread and leaves the process unable to
//!   ever attach again.
//!
//! Every failure on this surface is terminal — diagnostics to stderr, then
//! process termination. There are no recoverable errors by design: downstream
//! code assumes the invariants hold unconditionally after any call returns.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod env;
pub mod hooks;
pub mod init_registry;
pub mod lifecycle;
pub mod platform;
pub mod thread_exit;

pub use env::{GlobalStatus, RuntimeEnv};
pub use hooks::{DefaultHooks, HostHooks, WorkerId, WorkerToken};
pub use init_registry::{GlobalInitPhase, InitFn, InitNode, InitializerList};
pub use lifecycle::{
    attach_if_needed, current_thread_attached, destroy_process_runtime, detach_if_needed,
    process_env, register_global_initializer, zero_out_thread_globals,
};
pub use platform::{CpuArchitecture, OsFamily};
