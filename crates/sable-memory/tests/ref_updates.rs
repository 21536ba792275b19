//! End-to-end exercises of the build-selected memory model through the
//! `ops` facade, the way generated code drives it.

#![cfg(feature = "strict-mm")]

use std::ptr;

use sable_memory::{ObjRef, TypeRecord, ops, state};

static WIDGET: TypeRecord = TypeRecord::object("app.Widget", 48);
static BYTES: TypeRecord = TypeRecord::array("app.ByteArray", 1);

/// Run `f` on a dedicated thread with a memory state attached, tearing the
/// state down afterwards. Returns the leak count reported by deinit.
fn with_attached_memory(f: impl FnOnce() + Send + 'static) -> u64 {
    std::thread::spawn(move || {
        let handle = sable_memory::init_memory(false);
        f();
        // SAFETY: handle belongs to this thread and is deinitialized once.
        unsafe { sable_memory::deinit_memory(handle, false) }
    })
    .join()
    .expect("memory test thread panicked")
}

#[test]
fn allocate_publish_and_drop_reclaims_object() {
    let leaked = with_attached_memory(|| {
        let obj = ops::alloc_instance(&WIDGET);
        let mut slot: ObjRef = ptr::null_mut();
        unsafe {
            ops::set_heap_ref(&mut slot, obj);
            assert_eq!((*obj).ref_count(), 1);
            ops::update_heap_ref(&mut slot, ptr::null_mut());
        }
        assert!(slot.is_null());
    });
    assert_eq!(leaked, 0);
}

#[test]
fn call_frame_owns_its_locals() {
    let leaked = with_attached_memory(|| {
        let mut frame: [ObjRef; 2] = [ptr::null_mut(); 2];
        unsafe {
            ops::enter_frame(frame.as_mut_ptr(), 0, 2);
            ops::set_stack_ref(&mut frame[0], ops::alloc_instance(&WIDGET));
            ops::set_stack_ref(&mut frame[1], ops::alloc_array_instance(&BYTES, 256));
            ops::leave_frame(frame.as_mut_ptr(), 0, 2);
        }
    });
    assert_eq!(leaked, 0);
}

#[test]
fn no_collect_release_survives_until_collection_point() {
    let leaked = with_attached_memory(|| {
        let obj = ops::alloc_instance(&WIDGET);
        let mut slot: ObjRef = ptr::null_mut();
        unsafe {
            ops::set_heap_ref(&mut slot, obj);
            // Release the slot's reference without reclaiming in place.
            ops::release_heap_ref_no_collect(obj);
        }
        assert_eq!(state::collect_deferred_current(), 1);
    });
    assert_eq!(leaked, 0);
}

#[test]
fn unbalanced_references_are_reported_as_leaks() {
    let leaked = with_attached_memory(|| {
        let obj = ops::alloc_instance(&WIDGET);
        let mut slot: ObjRef = ptr::null_mut();
        unsafe { ops::set_heap_ref(&mut slot, obj) };
        // Slot goes out of scope without a release: one object leaks.
    });
    assert_eq!(leaked, 1);
}
