//! # Marten VM core
//!
//! Object model, native-function plumbing, and the `WeakRef` intrinsic:
//! weak-reference holders whose finalization is coordinated with the
//! collector in `marten-vm-gc`.

#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod gc;
pub mod intrinsics;
pub mod object;
pub mod object_cell;
pub mod value;

pub use context::{Context, NativeCtx, NativeFn, NativeFunction};
pub use error::{VmError, VmResult};
pub use gc::{GcRef, HeapObject};
pub use object::ScriptObject;
pub use object_cell::ObjectCell;
pub use value::Value;
