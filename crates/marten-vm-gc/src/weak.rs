//! Weak bindings with finalizer callbacks.
//!
//! A weak binding is a collector-visible handle over a referent that does
//! NOT keep the referent alive. Each binding carries a finalizer callback,
//! invoked by [`AllocationRegistry::collect`](crate::AllocationRegistry)
//! between mark and sweep of the cycle in which the referent becomes
//! unreachable — at that point the referent's memory is still valid, for
//! the duration of the callback only.
//!
//! Finalizers are invoked in registration order, at most once per
//! registration. From inside the callback a finalizer may resolve or
//! release other bindings, and may [`rearm`](FinalizerScope::rearm) its own
//! binding: re-arming defers the referent's reclamation to a later cycle
//! (the referent is resurrected and re-marked before the sweep) and the
//! finalizer will fire again once the referent is unreachable again.

use std::cell::{Cell, RefCell};

use rustc_hash::FxHashMap;

use crate::object::{GcHeader, MarkColor};

/// Handle naming one weak registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakBinding(u64);

/// Finalizer callback attached to a weak binding.
pub type Finalizer = Box<dyn FnMut(&mut FinalizerScope<'_>)>;

struct WeakEntry {
    /// Weak pointer to the referent's header (NOT traced)
    referent: *const GcHeader,
    /// Taken out of the entry while the callback runs
    finalizer: Option<Finalizer>,
}

/// Table of weak bindings, owned by the allocation registry.
#[derive(Default)]
pub(crate) struct WeakTable {
    entries: RefCell<FxHashMap<u64, WeakEntry>>,
    next_id: Cell<u64>,
}

impl WeakTable {
    pub(crate) fn register(&self, referent: *const GcHeader, finalizer: Finalizer) -> WeakBinding {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().insert(
            id,
            WeakEntry {
                referent,
                finalizer: Some(finalizer),
            },
        );
        WeakBinding(id)
    }

    pub(crate) fn resolve(&self, binding: WeakBinding) -> Option<*const GcHeader> {
        self.entries.borrow().get(&binding.0).map(|e| e.referent)
    }

    pub(crate) fn release(&self, binding: WeakBinding) {
        self.entries.borrow_mut().remove(&binding.0);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Run finalizers for every binding whose referent is white.
    ///
    /// Must be called between mark and sweep, when mark bits are valid and
    /// dead referents are still in memory. Returns the referents of
    /// re-armed bindings; the caller must re-mark them before sweeping.
    pub(crate) fn run_finalizer_pass(&self) -> Vec<*const GcHeader> {
        // Snapshot the due set first: callbacks mutate the table.
        let due: Vec<(u64, *const GcHeader)> = {
            let entries = self.entries.borrow();
            let mut due: Vec<(u64, *const GcHeader)> = entries
                .iter()
                // SAFETY: referents of registered entries are valid until sweep
                .filter(|(_, e)| unsafe { (*e.referent).mark() == MarkColor::White })
                .map(|(&id, e)| (id, e.referent))
                .collect();
            // Registration order
            due.sort_unstable_by_key(|&(id, _)| id);
            due
        };

        let mut resurrected = Vec::new();
        for (id, referent) in due {
            // Take the finalizer out so callback-side table access is free
            // of outstanding borrows. A callback may have released this
            // entry already; skip in that case.
            let Some(mut finalizer) = self
                .entries
                .borrow_mut()
                .get_mut(&id)
                .and_then(|e| e.finalizer.take())
            else {
                continue;
            };

            let mut scope = FinalizerScope {
                table: self,
                binding: WeakBinding(id),
                referent,
                rearmed: false,
            };
            finalizer(&mut scope);
            let rearmed = scope.rearmed;

            let mut entries = self.entries.borrow_mut();
            if rearmed {
                if let Some(entry) = entries.get_mut(&id) {
                    entry.finalizer = Some(finalizer);
                    resurrected.push(referent);
                }
            } else {
                // Single invocation per registration: retire the binding.
                // Dropping the entry drops the finalizer closure and
                // anything it captured.
                entries.remove(&id);
            }
        }
        resurrected
    }
}

/// Capabilities available to a finalizer while it runs.
pub struct FinalizerScope<'a> {
    table: &'a WeakTable,
    binding: WeakBinding,
    referent: *const GcHeader,
    rearmed: bool,
}

impl FinalizerScope<'_> {
    /// The binding this finalizer was registered under.
    pub fn binding(&self) -> WeakBinding {
        self.binding
    }

    /// The dying referent's header. Valid for the duration of this callback
    /// only; it must not be retained past the callback's return.
    pub fn referent(&self) -> *const GcHeader {
        self.referent
    }

    /// Resolve any still-registered binding, including this one.
    ///
    /// During the finalizer pass every registered binding's referent is
    /// still in valid memory, even if it dies in this same cycle.
    pub fn resolve(&self, binding: WeakBinding) -> Option<*const GcHeader> {
        self.table.resolve(binding)
    }

    /// Release any binding, including this one. Idempotent.
    pub fn release(&mut self, binding: WeakBinding) {
        self.table.release(binding);
    }

    /// Re-register this binding for a future weak notification.
    ///
    /// The referent is resurrected for the current cycle and this finalizer
    /// will be invoked again in a later cycle if the referent is still
    /// unreachable then. This is the only permitted "retry".
    pub fn rearm(&mut self) {
        self.rearmed = true;
    }
}
