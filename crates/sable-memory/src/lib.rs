//! # Sable Memory
//!
//! Object model, per-thread memory bookkeeping, and the two interchangeable
//! reference-counting policies of the Sable native runtime.
//!
//! ## Design
//!
//! - **Two policies, one surface**: `strict` (eager counting, thread-confined
//!   objects) and `relaxed` (deferred reclamation, shared mutable objects
//!   permitted) expose the identical operation set; the [`ops`] facade binds
//!   call sites to whichever one the `strict-mm` / `relaxed-mm` feature
//!   selected at build time.
//! - **Thread-owned state**: every attached thread owns one
//!   [`state::MemoryState`]; no reference-update primitive ever crosses
//!   threads.
//! - **Fail-fast**: there is no recoverable error path. Allocation failure
//!   and precondition violations terminate the process.

#![warn(clippy::all)]
#![warn(missing_docs)]

mod alloc;
pub mod object;
pub mod ops;
pub mod relaxed;
pub mod state;
pub mod strict;

pub use object::{ArrayHeader, ObjHeader, ObjRef, TypeKind, TypeRecord};
pub use ops::{IS_STRICT_MEMORY_MODEL, MemoryModel, active_memory_model};
pub use state::{MemoryState, current_memory, deinit_memory, init_memory, restore_memory};
