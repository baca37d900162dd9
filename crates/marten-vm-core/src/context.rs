//! Execution context: roots, globals, and native-function dispatch.

use std::cell::RefCell;

use marten_vm_gc::{AllocationRegistry, GcHeader, GcTraceable, global_registry, tags};

use crate::error::{VmError, VmResult};
use crate::gc::{GcRef, HeapObject};
use crate::object::ScriptObject;
use crate::value::Value;

/// Signature of a native function.
///
/// `this` is the receiver, `args` the call arguments. Construct calls are
/// distinguished through [`NativeCtx::is_construct`].
pub type NativeFn = fn(this: &Value, args: &[Value], ncx: &mut NativeCtx<'_>) -> VmResult<Value>;

/// A native function object on the GC heap.
pub struct NativeFunction {
    /// Diagnostic name, surfaced in error messages
    pub name: &'static str,
    /// The implementation
    pub func: NativeFn,
}

impl HeapObject for NativeFunction {
    const TAG: u8 = tags::FUNCTION;
}

impl GcTraceable for NativeFunction {
    const NEEDS_TRACE: bool = false;

    fn trace(&self, _mark: &mut dyn FnMut(*const GcHeader)) {}
}

/// Per-invocation state handed to native functions.
pub struct NativeCtx<'a> {
    context: &'a Context,
    is_construct: bool,
}

impl<'a> NativeCtx<'a> {
    /// The owning context
    pub fn context(&self) -> &'a Context {
        self.context
    }

    /// Was this invocation a construct call (`new F()`)?
    pub fn is_construct(&self) -> bool {
        self.is_construct
    }
}

/// Per-context cache of intrinsic accessor functions.
///
/// Built lazily on first use and rooted in the context, so repeated
/// constructions share one function object per accessor.
#[derive(Default)]
pub(crate) struct IntrinsicCache {
    pub(crate) weak_ref_get: RefCell<Option<Value>>,
    pub(crate) weak_ref_clear: RefCell<Option<Value>>,
}

/// A single-threaded VM context.
///
/// Owns the global object and the root set for the thread-local allocation
/// registry. Dropping the context does not free the heap; tests that need a
/// clean heap call [`AllocationRegistry::dealloc_all`] on the registry.
pub struct Context {
    global: GcRef<ScriptObject>,
    roots: RefCell<Vec<*const GcHeader>>,
    pub(crate) intrinsics: IntrinsicCache,
}

impl Context {
    /// Create a context with the standard intrinsics installed.
    pub fn new() -> Self {
        let global = GcRef::new(ScriptObject::new());
        let ctx = Self {
            global,
            roots: RefCell::new(vec![global.header_ptr()]),
            intrinsics: IntrinsicCache::default(),
        };
        crate::intrinsics::install(&ctx);
        ctx
    }

    /// The global object
    pub fn global(&self) -> GcRef<ScriptObject> {
        self.global
    }

    /// The allocation registry backing this context
    pub fn registry(&self) -> &'static AllocationRegistry {
        global_registry()
    }

    /// Add a cell to the root set.
    pub fn root(&self, header: *const GcHeader) {
        self.roots.borrow_mut().push(header);
    }

    /// Remove one occurrence of a cell from the root set.
    pub fn unroot(&self, header: *const GcHeader) {
        let mut roots = self.roots.borrow_mut();
        if let Some(pos) = roots.iter().position(|root| std::ptr::eq(*root, header)) {
            roots.swap_remove(pos);
        }
    }

    /// Run a full collection cycle over this context's roots.
    ///
    /// Returns the number of bytes reclaimed.
    pub fn collect_garbage(&self) -> usize {
        let roots = self.roots.borrow().clone();
        self.registry().collect(&roots)
    }

    /// Allocate a native function object.
    pub fn wrap_native(&self, name: &'static str, func: NativeFn) -> Value {
        Value::native(GcRef::new(NativeFunction { name, func }))
    }

    /// Install a native constructor on the global object.
    pub fn register_global_constructor(&self, name: &'static str, func: NativeFn) {
        let ctor = self.wrap_native(name, func);
        self.global.set(name, ctor);
    }

    /// Call a function value as a plain (non-construct) call.
    pub fn call(&self, callee: &Value, this: &Value, args: &[Value]) -> VmResult<Value> {
        self.invoke(callee, this, args, false)
    }

    /// Call a function value as a construct call.
    pub fn construct(&self, callee: &Value, args: &[Value]) -> VmResult<Value> {
        self.invoke(callee, &Value::Undefined, args, true)
    }

    fn invoke(
        &self,
        callee: &Value,
        this: &Value,
        args: &[Value],
        is_construct: bool,
    ) -> VmResult<Value> {
        let func = callee
            .as_native()
            .ok_or_else(|| VmError::type_error(format!("{} is not callable", callee.type_name())))?;
        let mut ncx = NativeCtx {
            context: self,
            is_construct,
        };
        (func.func)(this, args, &mut ncx)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_survives_collection() {
        let ctx = Context::new();
        ctx.global().set("answer", Value::Number(42.0));
        ctx.collect_garbage();
        assert_eq!(ctx.global().get("answer"), Some(Value::Number(42.0)));
    }

    #[test]
    fn test_unrooted_object_is_swept() {
        let ctx = Context::new();
        let obj = GcRef::new(ScriptObject::new());
        ctx.root(obj.header_ptr());
        ctx.collect_garbage();
        let live = ctx.registry().allocation_count();
        ctx.unroot(obj.header_ptr());
        ctx.collect_garbage();
        assert_eq!(ctx.registry().allocation_count(), live - 1);
    }

    #[test]
    fn test_call_non_callable_is_type_error() {
        let ctx = Context::new();
        let err = ctx
            .call(&Value::Number(3.0), &Value::Undefined, &[])
            .unwrap_err();
        assert!(matches!(err, VmError::TypeError(_)));
    }

    #[test]
    fn test_native_dispatch() {
        fn add(_this: &Value, args: &[Value], _ncx: &mut NativeCtx<'_>) -> VmResult<Value> {
            let sum = args
                .iter()
                .map(|arg| match arg {
                    Value::Number(n) => *n,
                    _ => f64::NAN,
                })
                .sum();
            Ok(Value::Number(sum))
        }

        let ctx = Context::new();
        let func = ctx.wrap_native("add", add);
        let result = ctx
            .call(&func, &Value::Undefined, &[Value::Number(2.0), Value::Number(3.0)])
            .unwrap();
        assert_eq!(result, Value::Number(5.0));
    }
}
