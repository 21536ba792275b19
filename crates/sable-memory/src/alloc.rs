//! Zeroed allocation and reclamation of managed objects.
//!
//! Allocation failure is terminal: there is no recoverable out-of-memory path
//! in this layer, callers are expected to have pre-checked quota.

use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};

use tracing::trace;

use crate::object::{ArrayHeader, ObjHeader, ObjRef, TypeKind, TypeRecord};
use crate::state::MemoryState;

const OBJECT_ALIGN: usize = 16;

fn payload_layout(size: usize) -> Layout {
    match Layout::from_size_align(size, OBJECT_ALIGN) {
        Ok(layout) => layout,
        // An unrepresentable size is an unsatisfiable allocation.
        Err(_) => handle_alloc_error(Layout::new::<ObjHeader>()),
    }
}

fn object_size(type_record: &TypeRecord) -> usize {
    size_of::<ObjHeader>() + type_record.instance_size
}

fn array_size(type_record: &TypeRecord, count: usize) -> usize {
    // The header stores the element count as u32; anything above that bound
    // is an unsatisfiable allocation, not a truncated one.
    if count > u32::MAX as usize {
        handle_alloc_error(Layout::new::<ArrayHeader>());
    }
    let elements = type_record
        .element_size
        .checked_mul(count)
        .and_then(|bytes| bytes.checked_add(size_of::<ArrayHeader>()));
    match elements {
        Some(size) => size,
        None => handle_alloc_error(Layout::new::<ArrayHeader>()),
    }
}

fn allocation_size(obj: &ObjHeader) -> usize {
    let type_record = obj.type_record();
    match type_record.kind {
        TypeKind::Object => object_size(type_record),
        TypeKind::Array => {
            // SAFETY: kind==Array means the allocation starts with ArrayHeader.
            let count = unsafe { ArrayHeader::count_of(obj as *const ObjHeader as ObjRef) };
            array_size(type_record, count as usize)
        }
    }
}

fn raw_alloc(state: &mut MemoryState, size: usize) -> *mut u8 {
    let layout = payload_layout(size);
    // SAFETY: layout has non-zero size (it includes the header).
    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        handle_alloc_error(layout);
    }
    state.note_alloc(size as u64);
    ptr
}

/// Allocate a zeroed, unconstructed object. Refcount starts at zero.
pub(crate) fn alloc_object(state: &mut MemoryState, type_record: &'static TypeRecord) -> ObjRef {
    debug_assert_eq!(type_record.kind, TypeKind::Object);
    let ptr = raw_alloc(state, object_size(type_record)).cast::<ObjHeader>();
    // SAFETY: ptr is a fresh allocation large enough for the header.
    unsafe { (*ptr).init_in_place(type_record) };
    trace!(type_name = type_record.name, "allocated instance");
    ptr
}

/// Allocate a zeroed, unconstructed array of `count` elements.
pub(crate) fn alloc_array(
    state: &mut MemoryState,
    type_record: &'static TypeRecord,
    count: usize,
) -> ObjRef {
    debug_assert_eq!(type_record.kind, TypeKind::Array);
    let ptr = raw_alloc(state, array_size(type_record, count)).cast::<ArrayHeader>();
    // SAFETY: ptr is a fresh allocation large enough for the array header.
    unsafe {
        (*ptr).obj.init_in_place(type_record);
        (*ptr).count = count as u32;
    }
    trace!(
        type_name = type_record.name,
        count, "allocated array instance"
    );
    ptr.cast::<ObjHeader>()
}

/// Return a dead object's storage to the allocator.
///
/// # Safety
/// `obj` must be a live allocation from this module whose reference count has
/// reached zero, and must not be referenced again.
pub(crate) unsafe fn reclaim(state: &mut MemoryState, obj: ObjRef) {
    // SAFETY: per contract, obj heads a live allocation.
    let size = unsafe { allocation_size(&*obj) };
    state.note_free(size as u64);
    let layout = payload_layout(size);
    // SAFETY: same layout as the original allocation.
    unsafe { dealloc(obj.cast::<u8>(), layout) };
}
