//! GC handle types bridging the collector and the VM object model.

use std::fmt;
use std::ops::Deref;

use marten_vm_gc::{GcHeader, GcTraceable, gc_alloc_in, global_registry, header_of, value_of};

/// Types that live on the GC heap.
pub trait HeapObject: GcTraceable + 'static {
    /// Header tag recorded for this type's allocations.
    const TAG: u8;
}

/// Handle to a GC-managed cell.
///
/// `GcRef` is a copyable raw-pointer handle; it does NOT root its target.
/// The handle stays usable while the cell is reachable from the context's
/// roots (or, inside a finalizer callback, for the duration of that
/// callback). Dereferencing a handle after its cell has been swept is
/// undefined behavior, exactly as for the collector's raw pointers.
pub struct GcRef<T> {
    ptr: *const T,
}

impl<T: HeapObject> GcRef<T> {
    /// Allocate `value` in the thread-local registry and return a handle.
    pub fn new(value: T) -> Self {
        // SAFETY: the cell is tracked by the thread-local registry; callers
        // root the handle (directly or through a parent object) to keep it
        // across collections.
        let ptr = unsafe { gc_alloc_in(global_registry(), T::TAG, value) };
        Self { ptr }
    }
}

impl<T> GcRef<T> {
    /// Get the raw value pointer.
    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    /// Get the cell's header pointer, for rooting and weak registration.
    pub fn header_ptr(&self) -> *const GcHeader {
        header_of(self.ptr)
    }

    /// Rebuild a handle from a cell's header.
    ///
    /// # Safety
    /// `header` must name a cell allocated for exactly this `T`, and the
    /// cell's memory must be valid — either live, or within the finalizer
    /// callback window of the current collection.
    pub unsafe fn from_header(header: *const GcHeader) -> Self {
        Self {
            // SAFETY: forwarded to the caller's contract
            ptr: unsafe { value_of::<T>(header) },
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(a: Self, b: Self) -> bool {
        std::ptr::eq(a.ptr, b.ptr)
    }
}

impl<T> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GcRef<T> {}

impl<T> Deref for GcRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see the type-level contract — the handle is only
        // dereferenced while its cell is valid
        unsafe { &*self.ptr }
    }
}

impl<T> fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({:p})", self.ptr)
    }
}
