//! The `WeakRef` global.
//!
//! `new WeakRef(target)` returns a holder object with `get`, `deref` (an
//! alias of `get`) and `clear` methods. The holder observes `target`
//! without keeping it alive: once the target is collected, `get` returns
//! null. `clear` detaches the holder from its target eagerly.
//!
//! Internally each construction registers two weak bindings with the
//! collector, one over the target and one over the holder itself. The
//! holder's hidden `[[WeakRefTarget]]` slot is the single source of truth
//! for the current target: the target's finalizer nulls it out, the
//! holder's finalizer re-arms itself while the slot still names a live
//! binding (so the slot bookkeeping outlives neither side), and both
//! finalizers retire their half of a shared record once done.

use std::cell::Cell;
use std::sync::Arc;

use marten_vm_gc::{FinalizerScope, WeakBinding};
use parking_lot::Mutex;

use crate::context::{Context, NativeCtx};
use crate::error::{VmError, VmResult};
use crate::gc::GcRef;
use crate::object::ScriptObject;
use crate::value::Value;

/// Hidden slot on holder objects naming the current target binding.
const TARGET_SLOT: &str = "[[WeakRefTarget]]";

thread_local! {
    static LIVE_STATES: Cell<usize> = const { Cell::new(0) };
}

/// Number of live shared finalization records on this thread.
///
/// Each `new WeakRef(..)` creates exactly one record; it is freed once
/// both of its weak bindings have retired. Exposed for leak tests.
pub fn live_finalize_states() -> usize {
    LIVE_STATES.with(Cell::get)
}

/// Shared record linking a holder's two weak registrations.
///
/// Each finalizer closure owns one `Arc` clone; the record is dropped when
/// the last closure retires, which is how "freed exactly once, after both
/// sides are done" falls out of ownership.
struct FinalizeState {
    target: Option<WeakBinding>,
    holder: Option<WeakBinding>,
}

impl FinalizeState {
    fn new() -> Arc<Mutex<FinalizeState>> {
        LIVE_STATES.with(|count| count.set(count.get() + 1));
        Arc::new(Mutex::new(FinalizeState {
            target: None,
            holder: None,
        }))
    }
}

impl Drop for FinalizeState {
    fn drop(&mut self) {
        LIVE_STATES.with(|count| count.set(count.get() - 1));
    }
}

/// Install the `WeakRef` constructor on the context's global object.
pub fn install(ctx: &Context) {
    ctx.register_global_constructor("WeakRef", weak_ref_constructor);
}

fn weak_ref_constructor(
    _this: &Value,
    args: &[Value],
    ncx: &mut NativeCtx<'_>,
) -> VmResult<Value> {
    assert!(ncx.is_construct(), "WeakRef requires a construct call");

    // Validate before any allocation or registration so a rejected call
    // leaves no trace behind.
    let target = args.first().cloned().unwrap_or(Value::Undefined);
    if !target.is_object_like() {
        return Err(VmError::invalid_argument(format!(
            "WeakRef target must be an object, got {}",
            target.type_name()
        )));
    }
    let target_header = match target.gc_header() {
        Some(header) => header,
        None => return Err(VmError::internal("object value without a heap cell")),
    };

    let ctx = ncx.context();
    let registry = ctx.registry();
    let holder = GcRef::new(ScriptObject::new());

    let state = FinalizeState::new();

    let target_state = Arc::clone(&state);
    let target_binding = registry.register_weak(
        target_header,
        Box::new(move |scope: &mut FinalizerScope<'_>| on_target_finalized(&target_state, scope)),
    );

    let holder_state = Arc::clone(&state);
    let holder_binding = registry.register_weak(
        holder.header_ptr(),
        Box::new(move |scope: &mut FinalizerScope<'_>| on_holder_finalized(&holder_state, scope)),
    );

    {
        let mut state = state.lock();
        state.target = Some(target_binding);
        state.holder = Some(holder_binding);
    }

    let getter = getter_function(ctx);
    holder.set("get", getter.clone());
    holder.set("deref", getter);
    holder.set("clear", clear_function(ctx));
    holder.set_hidden(TARGET_SLOT, Value::weak(target_binding));

    Ok(Value::object(holder))
}

/// Target finalizer: the target is being collected. Null out the holder's
/// slot (if the holder is still around) and retire this half of the record.
fn on_target_finalized(state: &Arc<Mutex<FinalizeState>>, scope: &mut FinalizerScope<'_>) {
    let holder_binding = {
        let mut state = state.lock();
        state.target = None;
        state.holder
    };

    // The holder may be live, already retired, or dying in this same
    // cycle. While its binding is still registered its memory is valid.
    if let Some(holder_binding) = holder_binding
        && let Some(holder_header) = scope.resolve(holder_binding)
    {
        // SAFETY: holder cells always hold a ScriptObject, and the
        // binding just resolved so the memory is valid for this callback
        let holder = unsafe { GcRef::<ScriptObject>::from_header(holder_header) };
        holder.set_hidden(TARGET_SLOT, Value::Null);
    }
}

/// Holder finalizer: the holder is being collected. If its slot still
/// names a live target binding, the target's finalizer has bookkeeping to
/// do against this holder later, so defer teardown by re-arming. Otherwise
/// retire.
fn on_holder_finalized(state: &Arc<Mutex<FinalizeState>>, scope: &mut FinalizerScope<'_>) {
    // SAFETY: this binding's referent is the holder cell, valid for the
    // duration of the callback
    let holder = unsafe { GcRef::<ScriptObject>::from_header(scope.referent()) };

    if let Some(Value::Weak(target_binding)) = holder.get_hidden(TARGET_SLOT)
        && scope.resolve(target_binding).is_some()
    {
        scope.rearm();
        return;
    }

    state.lock().holder = None;
}

fn weak_ref_get(this: &Value, _args: &[Value], ncx: &mut NativeCtx<'_>) -> VmResult<Value> {
    let holder = this
        .as_object()
        .ok_or_else(|| VmError::type_error("WeakRef.get called on incompatible receiver"))?;

    match holder.get_hidden(TARGET_SLOT) {
        Some(Value::Weak(binding)) => match ncx.context().registry().resolve_weak(binding) {
            // SAFETY: a registered binding's referent has not been swept
            Some(header) => Ok(unsafe { Value::from_live_header(header) }),
            None => Ok(Value::Null),
        },
        _ => Ok(Value::Null),
    }
}

fn weak_ref_clear(this: &Value, _args: &[Value], _ncx: &mut NativeCtx<'_>) -> VmResult<Value> {
    let holder = this
        .as_object()
        .ok_or_else(|| VmError::type_error("WeakRef.clear called on incompatible receiver"))?;

    holder.set_hidden(TARGET_SLOT, Value::Null);
    Ok(Value::Undefined)
}

/// The per-context `get` accessor, built once and rooted for the life of
/// the context so every holder shares the same function object.
fn getter_function(ctx: &Context) -> Value {
    if let Some(cached) = ctx.intrinsics.weak_ref_get.borrow().as_ref() {
        return cached.clone();
    }
    let func = ctx.wrap_native("get", weak_ref_get);
    if let Some(header) = func.gc_header() {
        ctx.root(header);
    }
    *ctx.intrinsics.weak_ref_get.borrow_mut() = Some(func.clone());
    func
}

/// The per-context `clear` accessor. Same caching scheme as the getter.
fn clear_function(ctx: &Context) -> Value {
    if let Some(cached) = ctx.intrinsics.weak_ref_clear.borrow().as_ref() {
        return cached.clone();
    }
    let func = ctx.wrap_native("clear", weak_ref_clear);
    if let Some(header) = func.gc_header() {
        ctx.root(header);
    }
    *ctx.intrinsics.weak_ref_clear.borrow_mut() = Some(func.clone());
    func
}
