//! # Marten VM garbage collector
//!
//! A registry-based mark/sweep collector with weak bindings and finalizer
//! callbacks.
//!
//! ## Design
//!
//! - **Registry allocation**: every cell is tracked individually with its
//!   drop and trace functions
//! - **Tri-color marking**: white/gray/black mark bytes, worklist marking
//! - **Finalizer pass**: weak bindings whose referent died are notified
//!   between mark and sweep, while the referent's memory is still valid
//! - **Re-arming**: a finalizer may defer its referent's reclamation to a
//!   later cycle by re-registering itself from within the callback

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod object;
pub mod registry;
pub mod weak;

pub use object::{GcHeader, MarkColor, tags};
pub use registry::{
    AllocationRegistry, GcTraceable, RegistryStats, gc_alloc_in, global_registry, header_of,
    value_of,
};
pub use weak::{Finalizer, FinalizerScope, WeakBinding};
