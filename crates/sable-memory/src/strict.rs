//! Strict memory model: eagerly counted references, thread-confined objects.
//!
//! Every slot that holds an object reference holds a counted one, stack slots
//! included. Releases that bring a count to zero reclaim synchronously
//! (except the `no_collect` variants, which defer). Update operations retain
//! the new value **before** releasing the old one, so a self-update never
//! passes through refcount zero.
//!
//! Objects are thread-confined: a partially-constructed object is never
//! visible to another thread because `init_instance` runs the constructor to
//! completion before publishing.
//!
//! All operations take the owning thread's [`MemoryState`] explicitly so both
//! policies stay unit-testable regardless of which one the build selects; the
//! [`crate::ops`] facade supplies the thread-local state.

use crate::alloc;
use crate::object::{ObjRef, TypeRecord};
use crate::state::{FrameSpan, MemoryState};

#[inline]
fn retain(obj: ObjRef) {
    if !obj.is_null() {
        // SAFETY: non-null refs point at live allocations.
        unsafe { (*obj).retain() };
    }
}

#[inline]
fn release(state: &mut MemoryState, obj: ObjRef) {
    if !obj.is_null() {
        // SAFETY: non-null refs point at live allocations.
        unsafe {
            // An object with a pending deferred-list entry is owned by the
            // next collection point; reclaiming it here would leave that
            // entry dangling.
            if (*obj).release() && !(*obj).is_deferred() {
                alloc::reclaim(state, obj);
            }
        }
    }
}

/// Store `obj` into a stack slot, retaining it.
///
/// # Safety
/// `slot` must be a valid, zeroed-or-released stack slot owned by the calling
/// frame; `obj` must be null or a live reference.
pub unsafe fn set_stack_ref(_state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: slot validity per contract.
    unsafe { *slot = obj };
    retain(obj);
}

/// Store `obj` into a heap slot, retaining it.
///
/// # Safety
/// `slot` must be a valid, zeroed-or-released heap slot; `obj` must be null
/// or a live reference.
pub unsafe fn set_heap_ref(_state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: slot validity per contract.
    unsafe { *slot = obj };
    retain(obj);
}

/// Clear a stack slot, releasing its current value.
///
/// # Safety
/// `slot` must be a valid stack slot owned by the calling frame.
pub unsafe fn zero_stack_ref(state: &mut MemoryState, slot: *mut ObjRef) {
    // SAFETY: slot validity per contract.
    let old = unsafe { *slot };
    // SAFETY: slot validity per contract.
    unsafe { *slot = std::ptr::null_mut() };
    release(state, old);
}

/// Replace the reference in a heap slot. Retains the new value before
/// releasing the old one.
///
/// # Safety
/// `slot` must be a valid heap slot; `obj` must be null or a live reference.
pub unsafe fn update_heap_ref(state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    retain(obj);
    // SAFETY: slot validity per contract.
    let old = unsafe { *slot };
    // SAFETY: slot validity per contract.
    unsafe { *slot = obj };
    release(state, old);
}

/// Replace the reference in a stack slot. Same discipline as
/// [`update_heap_ref`].
///
/// # Safety
/// `slot` must be a valid stack slot owned by the calling frame; `obj` must
/// be null or a live reference.
pub unsafe fn update_stack_ref(state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: forwarded contract.
    unsafe { update_heap_ref(state, slot, obj) };
}

/// Replace the reference in a caller-provided return slot.
///
/// # Safety
/// `slot` must be a valid return slot in the caller's frame; `obj` must be
/// null or a live reference.
pub unsafe fn update_return_ref(state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: a return slot is a stack slot of the caller.
    unsafe { update_stack_ref(state, slot, obj) };
}

/// Release one reference without a store. Reclaims synchronously at zero.
///
/// # Safety
/// `obj` must be null or a live reference owned by the caller.
pub unsafe fn release_heap_ref(state: &mut MemoryState, obj: ObjRef) {
    release(state, obj);
}

/// Release one reference, deferring any reclamation to the next collection
/// point.
///
/// # Safety
/// `obj` must be null or a live reference owned by the caller.
pub unsafe fn release_heap_ref_no_collect(state: &mut MemoryState, obj: ObjRef) {
    if !obj.is_null() {
        // SAFETY: non-null refs point at live allocations.
        unsafe {
            // The deferred flag keeps each object on the list at most once,
            // even across a resurrect-and-release cycle.
            if (*obj).release() && (*obj).mark_deferred() {
                state.deferred_releases.push(obj);
            }
        }
    }
}

/// Register a call frame's slots as roots, zeroing them first.
///
/// # Safety
/// `start..start+count` must be valid, exclusively-owned slot storage that
/// outlives the frame registration.
pub unsafe fn enter_frame(
    state: &mut MemoryState,
    start: *mut ObjRef,
    parameters: usize,
    count: usize,
) {
    for i in 0..count {
        // SAFETY: span validity per contract.
        unsafe { *start.add(i) = std::ptr::null_mut() };
    }
    state.frames.push(FrameSpan {
        start,
        parameters,
        count,
    });
}

/// Deregister the innermost frame, releasing every owned slot.
///
/// Parameter slots are skipped: the caller's frame owns those references.
///
/// # Safety
/// Must pair with the matching [`enter_frame`]; the span must still be valid.
pub unsafe fn leave_frame(
    state: &mut MemoryState,
    start: *mut ObjRef,
    parameters: usize,
    count: usize,
) {
    let span = state.frames.pop();
    debug_assert!(
        matches!(span, Some(span) if span.start == start && span.count == count),
        "leave_frame does not match innermost enter_frame"
    );
    for i in parameters..count {
        // SAFETY: span validity per contract.
        let old = unsafe { *start.add(i) };
        // SAFETY: span validity per contract.
        unsafe { *start.add(i) = std::ptr::null_mut() };
        release(state, old);
    }
}

/// Allocate a zeroed, unconstructed instance of `type_record`.
pub fn alloc_instance(state: &mut MemoryState, type_record: &'static TypeRecord) -> ObjRef {
    alloc::alloc_object(state, type_record)
}

/// Allocate a zeroed, unconstructed array of `count` elements.
pub fn alloc_array_instance(
    state: &mut MemoryState,
    type_record: &'static TypeRecord,
    count: usize,
) -> ObjRef {
    alloc::alloc_array(state, type_record, count)
}

/// Initialize a singleton slot: construct first, publish after.
///
/// If the slot already holds an object it is returned unchanged and the
/// constructor does not run. Otherwise the new object is fully constructed
/// before the slot (and the refcount) ever see it.
///
/// # Safety
/// `slot` must be a valid heap slot; `ctor` must only touch the object it is
/// given and must not re-enter instance initialization for the same slot.
pub unsafe fn init_instance(
    state: &mut MemoryState,
    slot: *mut ObjRef,
    type_record: &'static TypeRecord,
    ctor: fn(ObjRef),
) -> ObjRef {
    // SAFETY: slot validity per contract.
    let existing = unsafe { *slot };
    if !existing.is_null() {
        return existing;
    }
    let obj = alloc::alloc_object(state, type_record);
    ctor(obj);
    // SAFETY: slot validity per contract.
    unsafe { set_heap_ref(state, slot, obj) };
    obj
}

/// As [`init_instance`], additionally marking the object shared.
///
/// Under the strict model shared objects still observe construct-then-publish;
/// confinement is what makes that safe.
///
/// # Safety
/// Same contract as [`init_instance`].
pub unsafe fn init_shared_instance(
    state: &mut MemoryState,
    slot: *mut ObjRef,
    type_record: &'static TypeRecord,
    ctor: fn(ObjRef),
) -> ObjRef {
    // SAFETY: slot validity per contract.
    let existing = unsafe { *slot };
    if !existing.is_null() {
        return existing;
    }
    let obj = alloc::alloc_object(state, type_record);
    // SAFETY: obj is a fresh live allocation.
    unsafe { (*obj).mark_shared() };
    ctor(obj);
    // SAFETY: slot validity per contract.
    unsafe { set_heap_ref(state, slot, obj) };
    obj
}
