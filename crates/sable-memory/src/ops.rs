//! Build-time memory-model facade.
//!
//! Exactly one policy module backs these entry points, selected by the
//! `strict-mm` / `relaxed-mm` cargo feature at build time. Call sites never
//! name a policy: generated object/field-access code goes through this module
//! and the whole memory-management strategy swaps underneath it.
//!
//! Every operation resolves the calling thread's [`MemoryState`] from
//! thread-local storage; running one on a thread with no attached runtime is
//! a fatal precondition violation.
//!
//! [`MemoryState`]: crate::state::MemoryState

use crate::object::{ObjRef, TypeRecord};
use crate::state::with_state;

#[cfg(all(feature = "strict-mm", feature = "relaxed-mm"))]
compile_error!("features `strict-mm` and `relaxed-mm` are mutually exclusive");

#[cfg(not(any(feature = "strict-mm", feature = "relaxed-mm")))]
compile_error!("one of the `strict-mm` / `relaxed-mm` features must be enabled");

#[cfg(feature = "strict-mm")]
use crate::strict as active;

#[cfg(all(feature = "relaxed-mm", not(feature = "strict-mm")))]
use crate::relaxed as active;

/// True when this build carries the strict memory model.
pub const IS_STRICT_MEMORY_MODEL: bool = cfg!(feature = "strict-mm");

/// The reference-counting policy compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MemoryModel {
    /// Eager counting, thread-confined objects.
    Strict = 0,
    /// Deferred reclamation, shared mutable objects permitted.
    Relaxed = 1,
}

/// The memory model selected for this build.
pub fn active_memory_model() -> MemoryModel {
    if IS_STRICT_MEMORY_MODEL {
        MemoryModel::Strict
    } else {
        MemoryModel::Relaxed
    }
}

/// Store `obj` into a stack slot under the active policy.
///
/// # Safety
/// `slot` must be a valid stack slot owned by the calling frame; `obj` must
/// be null or a live reference.
pub unsafe fn set_stack_ref(slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::set_stack_ref(state, slot, obj) })
}

/// Store `obj` into a heap slot under the active policy.
///
/// # Safety
/// `slot` must be a valid, zeroed-or-released heap slot; `obj` must be null
/// or a live reference.
pub unsafe fn set_heap_ref(slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::set_heap_ref(state, slot, obj) })
}

/// Clear a stack slot under the active policy.
///
/// # Safety
/// `slot` must be a valid stack slot owned by the calling frame.
pub unsafe fn zero_stack_ref(slot: *mut ObjRef) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::zero_stack_ref(state, slot) })
}

/// Replace the reference in a heap slot under the active policy.
///
/// # Safety
/// `slot` must be a valid heap slot; `obj` must be null or a live reference.
pub unsafe fn update_heap_ref(slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::update_heap_ref(state, slot, obj) })
}

/// Replace the reference in a stack slot under the active policy.
///
/// # Safety
/// `slot` must be a valid stack slot owned by the calling frame; `obj` must
/// be null or a live reference.
pub unsafe fn update_stack_ref(slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::update_stack_ref(state, slot, obj) })
}

/// Replace the reference in a caller-provided return slot under the active
/// policy.
///
/// # Safety
/// `slot` must be a valid return slot in the caller's frame; `obj` must be
/// null or a live reference.
pub unsafe fn update_return_ref(slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::update_return_ref(state, slot, obj) })
}

/// Release one reference without a store; the active policy decides whether
/// reclamation may happen synchronously.
///
/// # Safety
/// `obj` must be null or a live reference owned by the caller.
pub unsafe fn release_heap_ref(obj: ObjRef) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::release_heap_ref(state, obj) })
}

/// Release one reference without a store, always deferring reclamation.
///
/// # Safety
/// `obj` must be null or a live reference owned by the caller.
pub unsafe fn release_heap_ref_no_collect(obj: ObjRef) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::release_heap_ref_no_collect(state, obj) })
}

/// Register a call frame's slots as roots under the active policy.
///
/// # Safety
/// `start..start+count` must be valid, exclusively-owned slot storage that
/// outlives the frame registration.
pub unsafe fn enter_frame(start: *mut ObjRef, parameters: usize, count: usize) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::enter_frame(state, start, parameters, count) })
}

/// Deregister the innermost frame under the active policy.
///
/// # Safety
/// Must pair with the matching [`enter_frame`]; the span must still be valid.
pub unsafe fn leave_frame(start: *mut ObjRef, parameters: usize, count: usize) {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::leave_frame(state, start, parameters, count) })
}

/// Allocate a zeroed, unconstructed instance of `type_record`.
pub fn alloc_instance(type_record: &'static TypeRecord) -> ObjRef {
    with_state(|state| active::alloc_instance(state, type_record))
}

/// Allocate a zeroed, unconstructed array of `count` elements.
pub fn alloc_array_instance(type_record: &'static TypeRecord, count: usize) -> ObjRef {
    with_state(|state| active::alloc_array_instance(state, type_record, count))
}

/// Initialize a singleton slot under the active policy's publication order.
///
/// # Safety
/// `slot` must be a valid heap slot; `ctor` must only touch the object it is
/// given and must not re-enter instance initialization for the same slot.
pub unsafe fn init_instance(
    slot: *mut ObjRef,
    type_record: &'static TypeRecord,
    ctor: fn(ObjRef),
) -> ObjRef {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::init_instance(state, slot, type_record, ctor) })
}

/// As [`init_instance`], additionally marking the object shared.
///
/// # Safety
/// Same contract as [`init_instance`].
pub unsafe fn init_shared_instance(
    slot: *mut ObjRef,
    type_record: &'static TypeRecord,
    ctor: fn(ObjRef),
) -> ObjRef {
    // SAFETY: forwarded contract.
    with_state(|state| unsafe { active::init_shared_instance(state, slot, type_record, ctor) })
}
