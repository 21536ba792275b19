//! Relaxed memory model: unmanaged stack refs, deferred heap reclamation.
//!
//! Stack slots are plain stores with no counting; the frame registry alone
//! keeps the root scanner honest. Heap slots are counted, stored with atomic
//! release/acquire ordering because relaxed-model objects may be shared
//! mutable across threads. Reclamation never happens inside a mutator store:
//! a release that reaches zero parks the object on the deferred list until
//! the next collection point ([`crate::state::process_deferred_releases`]).
//!
//! Update operations retain the new value before swapping out the old one,
//! so a self-update never passes through refcount zero.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::alloc;
use crate::object::{ObjHeader, ObjRef, TypeRecord};
use crate::state::{FrameSpan, MemoryState};

#[inline]
fn retain(obj: ObjRef) {
    if !obj.is_null() {
        // SAFETY: non-null refs point at live allocations.
        unsafe { (*obj).retain() };
    }
}

#[inline]
fn defer_release(state: &mut MemoryState, obj: ObjRef) {
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

/// A heap slot may be read and written by several threads; go through an
/// atomic view of it.
///
/// # Safety
/// `slot` must be valid, properly aligned slot storage.
#[inline]
unsafe fn atomic_slot<'a>(slot: *mut ObjRef) -> &'a AtomicPtr<ObjHeader> {
    // SAFETY: AtomicPtr<T> has the same layout as *mut T.
    unsafe { &*slot.cast::<AtomicPtr<ObjHeader>>() }
}

/// Store `obj` into a stack slot. Plain store, no counting.
///
/// # Safety
/// `slot` must be a valid stack slot owned by the calling frame.
pub unsafe fn set_stack_ref(_state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: slot validity per contract.
    unsafe { *slot = obj };
}

/// Store `obj` into a heap slot: retain, then publish with release ordering.
///
/// # Safety
/// `slot` must be a valid, zeroed-or-released heap slot; `obj` must be null
/// or a live reference.
pub unsafe fn set_heap_ref(_state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    retain(obj);
    // SAFETY: slot validity per contract.
    unsafe { atomic_slot(slot) }.store(obj, Ordering::Release);
}

/// Clear a stack slot. Plain store, no counting.
///
/// # Safety
/// `slot` must be a valid stack slot owned by the calling frame.
pub unsafe fn zero_stack_ref(_state: &mut MemoryState, slot: *mut ObjRef) {
    // SAFETY: slot validity per contract.
    unsafe { *slot = std::ptr::null_mut() };
}

/// Replace the reference in a heap slot.
///
/// Retains the new value, atomically swaps it in, then defers the release of
/// the displaced value to the next collection point.
///
/// # Safety
/// `slot` must be a valid heap slot; `obj` must be null or a live reference.
pub unsafe fn update_heap_ref(state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    retain(obj);
    // SAFETY: slot validity per contract.
    let old = unsafe { atomic_slot(slot) }.swap(obj, Ordering::AcqRel);
    defer_release(state, old);
}

/// Replace the reference in a stack slot. Plain store, no counting.
///
/// # Safety
/// `slot` must be a valid stack slot owned by the calling frame.
pub unsafe fn update_stack_ref(_state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: slot validity per contract.
    unsafe { *slot = obj };
}

/// Replace the reference in a caller-provided return slot. Return slots are
/// stack slots of the caller, hence unmanaged here.
///
/// # Safety
/// `slot` must be a valid return slot in the caller's frame.
pub unsafe fn update_return_ref(state: &mut MemoryState, slot: *mut ObjRef, obj: ObjRef) {
    // SAFETY: forwarded contract.
    unsafe { update_stack_ref(state, slot, obj) };
}

/// Release one reference without a store. Reclamation is deferred.
///
/// # Safety
/// `obj` must be null or a live reference owned by the caller.
pub unsafe fn release_heap_ref(state: &mut MemoryState, obj: ObjRef) {
    defer_release(state, obj);
}

/// Release one reference without a store. Identical to [`release_heap_ref`]
/// under this model, which never reclaims inside the mutator anyway.
///
/// # Safety
/// `obj` must be null or a live reference owned by the caller.
pub unsafe fn release_heap_ref_no_collect(state: &mut MemoryState, obj: ObjRef) {
    defer_release(state, obj);
}

/// Register a call frame's slots for root scanning, zeroing them first.
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

/// Deregister the innermost frame. Stack slots are unmanaged, so this only
/// narrows the root-scan window.
///
/// # Safety
/// Must pair with the matching [`enter_frame`].
pub unsafe fn leave_frame(
    state: &mut MemoryState,
    start: *mut ObjRef,
    _parameters: usize,
    count: usize,
) {
    let span = state.frames.pop();
    debug_assert!(
        matches!(span, Some(span) if span.start == start && span.count == count),
        "leave_frame does not match innermost enter_frame"
    );
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

/// Initialize a singleton slot: publish first, construct after.
///
/// If the slot already holds an object it is returned unchanged. Otherwise
/// the slot becomes visible **before** the constructor runs; under this model
/// other threads are permitted to observe an in-construction object.
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
    let existing = unsafe { atomic_slot(slot) }.load(Ordering::Acquire);
    if !existing.is_null() {
        return existing;
    }
    let obj = alloc::alloc_object(state, type_record);
    // SAFETY: slot validity per contract.
    unsafe { set_heap_ref(state, slot, obj) };
    ctor(obj);
    obj
}

/// As [`init_instance`], additionally marking the object shared.
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
    let existing = unsafe { atomic_slot(slot) }.load(Ordering::Acquire);
    if !existing.is_null() {
        return existing;
    }
    let obj = alloc::alloc_object(state, type_record);
    // SAFETY: obj is a fresh live allocation.
    unsafe { (*obj).mark_shared() };
    // SAFETY: slot validity per contract.
    unsafe { set_heap_ref(state, slot, obj) };
    ctor(obj);
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::process_deferred_releases;
    use std::cell::Cell;
    use std::ptr;

    static NODE: TypeRecord = TypeRecord::object("test.Node", 32);

    fn fresh_state() -> MemoryState {
        let state = crate::state::init_memory(false);
        crate::state::restore_memory(ptr::null_mut());
        // SAFETY: handle was just created by init_memory on this thread.
        unsafe { *Box::from_raw(state) }
    }

    #[test]
    fn stack_refs_are_unmanaged() {
        let mut state = fresh_state();
        let obj = alloc_instance(&mut state, &NODE);
        let mut slot: ObjRef = ptr::null_mut();
        unsafe {
            set_stack_ref(&mut state, &mut slot, obj);
            assert_eq!((*obj).ref_count(), 0);
            zero_stack_ref(&mut state, &mut slot);
            assert_eq!((*obj).ref_count(), 0);
            // Hand the floating object back through a counted slot so the
            // test state ends clean.
            set_heap_ref(&mut state, &mut slot, obj);
            update_heap_ref(&mut state, &mut slot, ptr::null_mut());
        }
        assert_eq!(process_deferred_releases(&mut state), 1);
        assert_eq!(state.live_objects(), 0);
    }

    #[test]
    fn heap_update_defers_reclamation_to_collection_point() {
        let mut state = fresh_state();
        let obj = alloc_instance(&mut state, &NODE);
        let mut slot: ObjRef = ptr::null_mut();
        unsafe {
            set_heap_ref(&mut state, &mut slot, obj);
            update_heap_ref(&mut state, &mut slot, ptr::null_mut());
        }
        // Still live: the mutator never reclaims.
        assert_eq!(state.live_objects(), 1);
        assert_eq!(state.deferred_release_count(), 1);
        assert_eq!(process_deferred_releases(&mut state), 1);
        assert_eq!(state.live_objects(), 0);
    }

    #[test]
    fn self_update_keeps_object_alive() {
        let mut state = fresh_state();
        let obj = alloc_instance(&mut state, &NODE);
        let mut slot: ObjRef = ptr::null_mut();
        unsafe {
            set_heap_ref(&mut state, &mut slot, obj);
            update_heap_ref(&mut state, &mut slot, obj);
            assert_eq!((*obj).ref_count(), 1);
        }
        // Nothing hit zero, nothing was deferred.
        assert_eq!(state.deferred_release_count(), 0);
        unsafe { update_heap_ref(&mut state, &mut slot, ptr::null_mut()) };
        assert_eq!(process_deferred_releases(&mut state), 1);
        assert_eq!(state.live_objects(), 0);
    }

    #[test]
    fn repeated_deferral_queues_object_once() {
        let mut state = fresh_state();
        let obj = alloc_instance(&mut state, &NODE);
        let mut slot: ObjRef = ptr::null_mut();
        unsafe {
            set_heap_ref(&mut state, &mut slot, obj);
            update_heap_ref(&mut state, &mut slot, ptr::null_mut());
            // Resurrect through a fresh store, then drop that reference the
            // same way. The object must not end up on the list twice.
            set_heap_ref(&mut state, &mut slot, obj);
            update_heap_ref(&mut state, &mut slot, ptr::null_mut());
        }
        assert_eq!(state.deferred_release_count(), 1);
        assert_eq!(process_deferred_releases(&mut state), 1);
        assert_eq!(state.live_objects(), 0);
    }

    #[test]
    fn init_instance_publishes_before_construction() {
        thread_local! {
            static SLOT_ADDR: Cell<*mut ObjRef> = const { Cell::new(ptr::null_mut()) };
            static SEEN_AT_CTOR: Cell<ObjRef> = const { Cell::new(ptr::null_mut()) };
        }
        fn observing_ctor(_obj: ObjRef) {
            // SAFETY: the test keeps the slot alive for the whole call.
            SEEN_AT_CTOR.set(unsafe { *SLOT_ADDR.get() });
        }

        let mut state = fresh_state();
        let mut slot: ObjRef = ptr::null_mut();
        SLOT_ADDR.set(&mut slot);
        SEEN_AT_CTOR.set(ptr::null_mut());
        let obj = unsafe { init_instance(&mut state, &mut slot, &NODE, observing_ctor) };
        // Relaxed model: the slot was already visible while the ctor ran.
        assert_eq!(SEEN_AT_CTOR.get(), obj);
        unsafe { update_heap_ref(&mut state, &mut slot, ptr::null_mut()) };
        process_deferred_releases(&mut state);
    }

    #[test]
    fn init_shared_instance_marks_object_shared() {
        fn noop_ctor(_obj: ObjRef) {}

        let mut state = fresh_state();
        let mut slot: ObjRef = ptr::null_mut();
        let obj = unsafe { init_shared_instance(&mut state, &mut slot, &NODE, noop_ctor) };
        unsafe {
            assert!((*obj).is_shared());
            update_heap_ref(&mut state, &mut slot, ptr::null_mut());
        }
        process_deferred_releases(&mut state);
        assert_eq!(state.live_objects(), 0);
    }

    #[test]
    fn frame_registration_pairs_without_counting() {
        let mut state = fresh_state();
        let mut frame: [ObjRef; 4] = [ptr::null_mut(); 4];
        unsafe {
            enter_frame(&mut state, frame.as_mut_ptr(), 2, 4);
            assert_eq!(state.frame_depth(), 1);
            leave_frame(&mut state, frame.as_mut_ptr(), 2, 4);
        }
        assert_eq!(state.frame_depth(), 0);
    }
}
