//! Thread-confined interior mutability for VM objects.
//!
//! `ObjectCell<T>` provides interior mutability for the single-threaded VM,
//! backed by `RefCell<T>`. Runtime borrow checking catches overlapping
//! mutable borrows in both debug AND release builds. The VM enforces thread
//! confinement at the `Context` level, so no `Send`/`Sync` escape hatch is
//! provided.

use std::cell::{Ref, RefCell, RefMut};

/// Thread-confined interior mutability wrapper.
pub struct ObjectCell<T> {
    value: RefCell<T>,
}

impl<T> ObjectCell<T> {
    /// Create a new `ObjectCell` with the given value.
    #[inline]
    pub fn new(value: T) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }

    /// Borrow the value immutably.
    ///
    /// Panics if an exclusive borrow is active.
    #[inline]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.value.borrow()
    }

    /// Borrow the value mutably.
    ///
    /// Panics if any borrow (shared or exclusive) is active.
    #[inline]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.value.borrow_mut()
    }

    /// Consume the cell and return the inner value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObjectCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value.try_borrow() {
            Ok(value) => f
                .debug_struct("ObjectCell")
                .field("value", &*value)
                .finish(),
            Err(_) => f
                .debug_struct("ObjectCell")
                .field("value", &"<borrowed>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrow_round_trip() {
        let cell = ObjectCell::new(41);
        *cell.borrow_mut() += 1;
        assert_eq!(*cell.borrow(), 42);
        assert_eq!(cell.into_inner(), 42);
    }
}
