//! Script objects.

use indexmap::IndexMap;
use marten_vm_gc::{GcTraceable, tags};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::gc::HeapObject;
use crate::object_cell::ObjectCell;
use crate::value::Value;

/// A script object: ordered named properties plus hidden internal slots.
///
/// Hidden slots carry engine-internal state (weak-binding handles and the
/// like). They are invisible to property enumeration and deliberately not
/// traced, so a handle stored there never keeps its referent alive.
pub struct ScriptObject {
    properties: ObjectCell<IndexMap<Arc<str>, Value>>,
    hidden: ObjectCell<FxHashMap<&'static str, Value>>,
}

impl ScriptObject {
    /// Create an empty object
    pub fn new() -> Self {
        Self {
            properties: ObjectCell::new(IndexMap::new()),
            hidden: ObjectCell::new(FxHashMap::default()),
        }
    }

    /// Get a named property
    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties.borrow().get(key).cloned()
    }

    /// Set a named property
    pub fn set(&self, key: impl Into<Arc<str>>, value: Value) {
        self.properties.borrow_mut().insert(key.into(), value);
    }

    /// Property names in insertion order
    pub fn own_keys(&self) -> Vec<Arc<str>> {
        self.properties.borrow().keys().cloned().collect()
    }

    /// Get a hidden internal slot
    pub fn get_hidden(&self, slot: &'static str) -> Option<Value> {
        self.hidden.borrow().get(slot).cloned()
    }

    /// Set a hidden internal slot
    pub fn set_hidden(&self, slot: &'static str, value: Value) {
        self.hidden.borrow_mut().insert(slot, value);
    }
}

impl Default for ScriptObject {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapObject for ScriptObject {
    const TAG: u8 = tags::OBJECT;
}

impl GcTraceable for ScriptObject {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, mark: &mut dyn FnMut(*const marten_vm_gc::GcHeader)) {
        // Hidden slots are intentionally skipped here.
        for value in self.properties.borrow().values() {
            if let Some(header) = value.gc_header() {
                mark(header);
            }
        }
    }
}
