//! VM values.

use std::sync::Arc;

use marten_vm_gc::{GcHeader, WeakBinding, tags};

use crate::context::NativeFunction;
use crate::gc::GcRef;
use crate::object::ScriptObject;

/// A VM value.
///
/// Heap values (`Object`, `Native`) compare by identity. `Weak` is an
/// internal variant carrying a weak-binding handle; it only ever appears in
/// hidden slots and is never handed to script-visible code.
#[derive(Debug, Clone)]
pub enum Value {
    /// The undefined value
    Undefined,
    /// The null value
    Null,
    /// A boolean
    Boolean(bool),
    /// A number
    Number(f64),
    /// A string
    String(Arc<str>),
    /// A script object
    Object(GcRef<ScriptObject>),
    /// A native function object
    Native(GcRef<NativeFunction>),
    /// A weak-binding handle (hidden slots only)
    Weak(WeakBinding),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    /// Create an object value
    pub fn object(obj: GcRef<ScriptObject>) -> Self {
        Self::Object(obj)
    }

    /// Create a native function value
    pub fn native(func: GcRef<NativeFunction>) -> Self {
        Self::Native(func)
    }

    /// Create a weak-binding value (hidden slots only)
    pub fn weak(binding: WeakBinding) -> Self {
        Self::Weak(binding)
    }

    /// Is this the null value?
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Is this the undefined value?
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Is this a heap object (plain object or function)?
    ///
    /// This is the validity test for weak-reference targets: only values
    /// with their own heap cell can be weakly referenced.
    pub fn is_object_like(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Native(_))
    }

    /// Get the script object handle, if this is an object
    pub fn as_object(&self) -> Option<GcRef<ScriptObject>> {
        match self {
            Self::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    /// Get the native function handle, if this is one
    pub fn as_native(&self) -> Option<GcRef<NativeFunction>> {
        match self {
            Self::Native(func) => Some(*func),
            _ => None,
        }
    }

    /// Get the weak-binding handle, if this is one
    pub fn as_weak_binding(&self) -> Option<WeakBinding> {
        match self {
            Self::Weak(binding) => Some(*binding),
            _ => None,
        }
    }

    /// The cell header of a heap value, `None` for primitives.
    pub fn gc_header(&self) -> Option<*const GcHeader> {
        match self {
            Self::Object(obj) => Some(obj.header_ptr()),
            Self::Native(func) => Some(func.header_ptr()),
            _ => None,
        }
    }

    /// Rebuild a heap value from a cell header, dispatching on its tag.
    ///
    /// # Safety
    /// `header` must name a cell allocated by this VM whose memory is valid
    /// (live, or within the current finalizer callback window).
    pub unsafe fn from_live_header(header: *const GcHeader) -> Self {
        // SAFETY: forwarded to the caller's contract
        unsafe {
            match (*header).tag() {
                tags::FUNCTION => Self::Native(GcRef::from_header(header)),
                _ => Self::Object(GcRef::from_header(header)),
            }
        }
    }

    /// Short name of this value's kind, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(_) => "object",
            Self::Native(_) => "function",
            Self::Weak(_) => "weak",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => GcRef::ptr_eq(*a, *b),
            (Self::Native(a), Self::Native(b)) => GcRef::ptr_eq(*a, *b),
            (Self::Weak(a), Self::Weak(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_like() {
        assert!(!Value::Undefined.is_object_like());
        assert!(!Value::Null.is_object_like());
        assert!(!Value::Boolean(true).is_object_like());
        assert!(!Value::Number(1.0).is_object_like());
        assert!(!Value::string("x").is_object_like());

        let obj = Value::object(GcRef::new(ScriptObject::new()));
        assert!(obj.is_object_like());
        marten_vm_gc::global_registry().collect(&[]);
    }

    #[test]
    fn test_identity_equality() {
        let a = GcRef::new(ScriptObject::new());
        let b = GcRef::new(ScriptObject::new());
        assert_eq!(Value::object(a), Value::object(a));
        assert_ne!(Value::object(a), Value::object(b));
        marten_vm_gc::global_registry().collect(&[]);
    }
}
