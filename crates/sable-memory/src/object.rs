//! Object headers and static type descriptors.
//!
//! Every managed allocation starts with an [`ObjHeader`] (arrays with an
//! [`ArrayHeader`], which embeds one). The payload follows the header and is
//! zero-initialized at allocation time; constructors run later, under the
//! publication discipline of the active memory model.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering, fence};

/// Whether a [`TypeRecord`] describes a plain object or an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Fixed-size object; payload size is `instance_size`.
    Object,
    /// Array; payload size is `element_size * count`.
    Array,
}

/// Static type descriptor, declared once per type by generated code.
///
/// Descriptors live for the whole process (`&'static`) and are never owned by
/// the memory subsystem.
#[derive(Debug)]
pub struct TypeRecord {
    /// Fully-qualified type name, used in diagnostics only.
    pub name: &'static str,
    /// Payload bytes past the header for [`TypeKind::Object`] types.
    pub instance_size: usize,
    /// Per-element payload bytes for [`TypeKind::Array`] types.
    pub element_size: usize,
    /// Object or array.
    pub kind: TypeKind,
}

impl TypeRecord {
    /// Descriptor for a fixed-size object type.
    pub const fn object(name: &'static str, instance_size: usize) -> Self {
        Self {
            name,
            instance_size,
            element_size: 0,
            kind: TypeKind::Object,
        }
    }

    /// Descriptor for an array type with the given element size.
    pub const fn array(name: &'static str, element_size: usize) -> Self {
        Self {
            name,
            instance_size: 0,
            element_size,
            kind: TypeKind::Array,
        }
    }
}

/// Flag bit: object was published through `init_shared_instance` and may be
/// reachable from more than one thread (relaxed model only).
pub const OBJECT_FLAG_SHARED: u8 = 1 << 0;

// Flag bit: object sits on its thread's deferred-release list. Keeps an
// object from being queued twice and from being reclaimed synchronously
// while an entry for it is still pending.
pub(crate) const OBJECT_FLAG_DEFERRED: u8 = 1 << 1;

/// Header preceding every managed object's payload.
///
/// The reference count starts at zero: a freshly allocated object is unowned
/// until the first store publishes it into a slot.
#[repr(C)]
#[derive(Debug)]
pub struct ObjHeader {
    type_record: *const TypeRecord,
    ref_count: AtomicI32,
    flags: AtomicU8,
}

/// A possibly-null reference to a managed object.
pub type ObjRef = *mut ObjHeader;

impl ObjHeader {
    pub(crate) fn init_in_place(&mut self, type_record: &'static TypeRecord) {
        self.type_record = type_record;
        self.ref_count = AtomicI32::new(0);
        self.flags = AtomicU8::new(0);
    }

    /// The static descriptor this object was allocated with.
    pub fn type_record(&self) -> &'static TypeRecord {
        // SAFETY: set from a &'static TypeRecord at allocation, never changed.
        unsafe { &*self.type_record }
    }

    /// Current reference count. Diagnostic/test read only; the value is stale
    /// the moment it is returned.
    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Whether the object carries the shared flag.
    pub fn is_shared(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & OBJECT_FLAG_SHARED != 0
    }

    pub(crate) fn mark_shared(&self) {
        self.flags.fetch_or(OBJECT_FLAG_SHARED, Ordering::Relaxed);
    }

    /// Sets the deferred flag. Returns true when this call set it, false when
    /// the object was already queued.
    pub(crate) fn mark_deferred(&self) -> bool {
        self.flags.fetch_or(OBJECT_FLAG_DEFERRED, Ordering::Relaxed) & OBJECT_FLAG_DEFERRED == 0
    }

    pub(crate) fn clear_deferred(&self) {
        self.flags.fetch_and(!OBJECT_FLAG_DEFERRED, Ordering::Relaxed);
    }

    pub(crate) fn is_deferred(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & OBJECT_FLAG_DEFERRED != 0
    }

    pub(crate) fn retain(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one reference. Returns true when this was the last one; the
    /// caller then owns reclamation. Release/acquire pairing makes all writes
    /// to the object visible to the reclaiming thread.
    pub(crate) fn release(&self) -> bool {
        if self.ref_count.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }
}

/// Header preceding every managed array's elements.
#[repr(C)]
#[derive(Debug)]
pub struct ArrayHeader {
    /// Common object header.
    pub obj: ObjHeader,
    /// Element count, fixed at allocation.
    pub count: u32,
}

impl ArrayHeader {
    /// Element count of the array that `obj` heads.
    ///
    /// # Safety
    /// `obj` must point to a live allocation made with a [`TypeKind::Array`]
    /// descriptor.
    pub unsafe fn count_of(obj: ObjRef) -> u32 {
        // SAFETY: an array allocation starts with an ArrayHeader whose first
        // field is the ObjHeader, so the cast recovers the full header.
        unsafe { (*obj.cast::<ArrayHeader>()).count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static POINT: TypeRecord = TypeRecord::object("test.Point", 16);

    #[test]
    fn release_reports_last_reference_exactly_once() {
        let mut header = ObjHeader {
            type_record: &POINT,
            ref_count: AtomicI32::new(0),
            flags: AtomicU8::new(0),
        };
        header.init_in_place(&POINT);
        header.retain();
        header.retain();
        assert_eq!(header.ref_count(), 2);
        assert!(!header.release());
        assert!(header.release());
        assert_eq!(header.ref_count(), 0);
    }

    #[test]
    fn deferred_flag_sets_once_until_cleared() {
        let mut header = ObjHeader {
            type_record: &POINT,
            ref_count: AtomicI32::new(0),
            flags: AtomicU8::new(0),
        };
        header.init_in_place(&POINT);
        assert!(header.mark_deferred());
        assert!(header.is_deferred());
        // Second queue attempt is refused while the entry is pending.
        assert!(!header.mark_deferred());
        header.clear_deferred();
        assert!(!header.is_deferred());
        assert!(header.mark_deferred());
    }

    #[test]
    fn shared_flag_is_sticky() {
        let mut header = ObjHeader {
            type_record: &POINT,
            ref_count: AtomicI32::new(0),
            flags: AtomicU8::new(0),
        };
        header.init_in_place(&POINT);
        assert!(!header.is_shared());
        header.mark_shared();
        assert!(header.is_shared());
    }
}
