//! End-to-end tests for the `WeakRef` intrinsic: construction, accessor
//! behavior, and finalization across every target/holder death ordering.

use marten_vm_core::intrinsics::weak_ref::live_finalize_states;
use marten_vm_core::{Context, GcRef, ScriptObject, Value, VmError};

/// Construct `new WeakRef(target)` through the global constructor.
fn make_weak_ref(ctx: &Context, target: &Value) -> Value {
    let ctor = ctx
        .global()
        .get("WeakRef")
        .expect("WeakRef global installed");
    ctx.construct(&ctor, std::slice::from_ref(target))
        .expect("construction succeeds")
}

/// Invoke a holder method (`get`, `deref` or `clear`) with the holder as
/// receiver.
fn call_method(ctx: &Context, holder: &Value, name: &str) -> Value {
    let obj = holder.as_object().expect("holder is an object");
    let func = obj.get(name).expect("holder method present");
    ctx.call(&func, holder, &[]).expect("method call succeeds")
}

fn rooted_target(ctx: &Context) -> Value {
    let target = GcRef::new(ScriptObject::new());
    ctx.root(target.header_ptr());
    Value::object(target)
}

#[test]
fn get_returns_target_after_construction() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let holder = make_weak_ref(&ctx, &target);
    ctx.root(holder.gc_header().unwrap());

    assert_eq!(call_method(&ctx, &holder, "get"), target);
    // Still the target after a collection with both sides rooted
    ctx.collect_garbage();
    assert_eq!(call_method(&ctx, &holder, "get"), target);
}

#[test]
fn deref_is_an_alias_of_get() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let holder = make_weak_ref(&ctx, &target);
    ctx.root(holder.gc_header().unwrap());

    let obj = holder.as_object().unwrap();
    // Same function object, not just same behavior
    assert_eq!(obj.get("get"), obj.get("deref"));
    assert_eq!(call_method(&ctx, &holder, "deref"), target);
}

#[test]
fn non_object_target_is_rejected_without_side_effects() {
    let ctx = Context::new();
    let ctor = ctx.global().get("WeakRef").unwrap();
    ctx.collect_garbage();

    let weak_before = ctx.registry().weak_count();
    let states_before = live_finalize_states();
    let cells_before = ctx.registry().allocation_count();

    for bad in [
        Value::Undefined,
        Value::Null,
        Value::Boolean(true),
        Value::Number(3.0),
        Value::string("nope"),
    ] {
        let err = ctx.construct(&ctor, &[bad]).unwrap_err();
        assert!(matches!(err, VmError::InvalidArgument(_)), "{err}");
    }
    // Zero arguments behaves like an undefined argument
    let err = ctx.construct(&ctor, &[]).unwrap_err();
    assert!(matches!(err, VmError::InvalidArgument(_)));

    assert_eq!(ctx.registry().weak_count(), weak_before);
    assert_eq!(live_finalize_states(), states_before);
    assert_eq!(ctx.registry().allocation_count(), cells_before);
}

#[test]
#[should_panic(expected = "construct")]
fn plain_call_of_the_constructor_panics() {
    let ctx = Context::new();
    let ctor = ctx.global().get("WeakRef").unwrap();
    let target = rooted_target(&ctx);
    let _ = ctx.call(&ctor, &Value::Undefined, &[target]);
}

#[test]
fn get_returns_null_once_target_is_collected() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let holder = make_weak_ref(&ctx, &target);
    ctx.root(holder.gc_header().unwrap());
    assert_eq!(ctx.registry().weak_count(), 2);

    ctx.unroot(target.gc_header().unwrap());
    ctx.collect_garbage();

    assert_eq!(call_method(&ctx, &holder, "get"), Value::Null);
    // Target binding retired, holder binding still registered
    assert_eq!(ctx.registry().weak_count(), 1);
    assert_eq!(live_finalize_states(), 1);
}

#[test]
fn clear_detaches_a_live_target() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let holder = make_weak_ref(&ctx, &target);
    ctx.root(holder.gc_header().unwrap());

    let cells = ctx.registry().allocation_count();
    assert_eq!(call_method(&ctx, &holder, "clear"), Value::Undefined);
    assert_eq!(call_method(&ctx, &holder, "get"), Value::Null);
    // Clearing is idempotent
    call_method(&ctx, &holder, "clear");
    assert_eq!(call_method(&ctx, &holder, "get"), Value::Null);

    // The target itself is untouched: still rooted, still live
    ctx.collect_garbage();
    assert_eq!(ctx.registry().allocation_count(), cells);
    target.as_object().unwrap().set("x", Value::Number(1.0));
}

#[test]
fn target_dies_first_then_holder() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let holder = make_weak_ref(&ctx, &target);
    ctx.root(holder.gc_header().unwrap());

    ctx.unroot(target.gc_header().unwrap());
    ctx.collect_garbage();
    assert_eq!(call_method(&ctx, &holder, "get"), Value::Null);
    assert_eq!(ctx.registry().weak_count(), 1);

    ctx.unroot(holder.gc_header().unwrap());
    ctx.collect_garbage();
    // Holder's slot was already nulled, so its finalizer retires at once
    assert_eq!(ctx.registry().weak_count(), 0);
    assert_eq!(live_finalize_states(), 0);
}

#[test]
fn holder_dies_first_then_target() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let holder = make_weak_ref(&ctx, &target);

    // Holder was never rooted: it dies in the first cycle while the
    // target is still alive, so its finalizer re-arms instead of retiring.
    ctx.collect_garbage();
    assert_eq!(ctx.registry().weak_count(), 2);
    assert_eq!(live_finalize_states(), 1);

    // Re-arming repeats for as long as the target lives
    ctx.collect_garbage();
    assert_eq!(ctx.registry().weak_count(), 2);

    // Once the target dies, its finalizer nulls the holder's slot and the
    // holder retires in the same cycle.
    ctx.unroot(target.gc_header().unwrap());
    ctx.collect_garbage();
    assert_eq!(ctx.registry().weak_count(), 0);
    assert_eq!(live_finalize_states(), 0);
    drop(holder);
}

#[test]
fn target_and_holder_die_in_the_same_cycle() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let holder = make_weak_ref(&ctx, &target);
    ctx.root(holder.gc_header().unwrap());

    ctx.unroot(target.gc_header().unwrap());
    ctx.unroot(holder.gc_header().unwrap());
    ctx.collect_garbage();

    // The target binding registers first, so its finalizer runs first and
    // nulls the slot; the holder then retires without re-arming. One cycle
    // tears the whole thing down.
    assert_eq!(ctx.registry().weak_count(), 0);
    assert_eq!(live_finalize_states(), 0);
}

#[test]
fn cleared_holder_retires_without_rearming() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let holder = make_weak_ref(&ctx, &target);
    ctx.root(holder.gc_header().unwrap());

    call_method(&ctx, &holder, "clear");
    ctx.unroot(holder.gc_header().unwrap());
    ctx.collect_garbage();

    // Slot was nulled by clear, so the holder does not wait for the target
    assert_eq!(ctx.registry().weak_count(), 1);
    assert_eq!(live_finalize_states(), 1);

    ctx.unroot(target.gc_header().unwrap());
    ctx.collect_garbage();
    assert_eq!(ctx.registry().weak_count(), 0);
    assert_eq!(live_finalize_states(), 0);
}

#[test]
fn two_holders_can_observe_one_target() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let first = make_weak_ref(&ctx, &target);
    let second = make_weak_ref(&ctx, &target);
    ctx.root(first.gc_header().unwrap());
    ctx.root(second.gc_header().unwrap());

    assert_eq!(ctx.registry().weak_count(), 4);
    assert_eq!(live_finalize_states(), 2);
    assert_eq!(call_method(&ctx, &first, "get"), target);
    assert_eq!(call_method(&ctx, &second, "get"), target);

    // Clearing one holder leaves the other attached
    call_method(&ctx, &first, "clear");
    assert_eq!(call_method(&ctx, &first, "get"), Value::Null);
    assert_eq!(call_method(&ctx, &second, "get"), target);

    ctx.unroot(target.gc_header().unwrap());
    ctx.collect_garbage();
    assert_eq!(call_method(&ctx, &second, "get"), Value::Null);
}

#[test]
fn accessor_functions_are_cached_per_context() {
    let ctx = Context::new();
    let target = rooted_target(&ctx);
    let first = make_weak_ref(&ctx, &target);
    let second = make_weak_ref(&ctx, &target);
    ctx.root(first.gc_header().unwrap());
    ctx.root(second.gc_header().unwrap());

    let first = first.as_object().unwrap();
    let second = second.as_object().unwrap();
    assert_eq!(first.get("get"), second.get("get"));
    assert_eq!(first.get("clear"), second.get("clear"));

    // And the cache survives collection
    ctx.collect_garbage();
    let target = rooted_target(&ctx);
    let third = make_weak_ref(&ctx, &target).as_object().unwrap();
    assert_eq!(first.get("get"), third.get("get"));
}

#[test]
fn function_values_are_valid_targets() {
    fn noop(
        _this: &Value,
        _args: &[Value],
        _ncx: &mut marten_vm_core::NativeCtx<'_>,
    ) -> marten_vm_core::VmResult<Value> {
        Ok(Value::Undefined)
    }

    let ctx = Context::new();
    let target = ctx.wrap_native("noop", noop);
    ctx.root(target.gc_header().unwrap());
    let holder = make_weak_ref(&ctx, &target);
    ctx.root(holder.gc_header().unwrap());

    let resolved = call_method(&ctx, &holder, "get");
    assert!(resolved.as_native().is_some());
    assert_eq!(resolved, target);

    ctx.unroot(target.gc_header().unwrap());
    ctx.collect_garbage();
    assert_eq!(call_method(&ctx, &holder, "get"), Value::Null);
}

#[test]
fn no_finalize_state_leaks_after_full_teardown() {
    let ctx = Context::new();

    for _ in 0..16 {
        let target = rooted_target(&ctx);
        let holder = make_weak_ref(&ctx, &target);
        ctx.root(holder.gc_header().unwrap());
        ctx.unroot(target.gc_header().unwrap());
        ctx.unroot(holder.gc_header().unwrap());
    }

    ctx.collect_garbage();
    assert_eq!(ctx.registry().weak_count(), 0);
    assert_eq!(live_finalize_states(), 0);
}
