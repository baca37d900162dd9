//! Built-in globals installed on every new context.

pub mod weak_ref;

pub(crate) fn install(ctx: &crate::context::Context) {
    weak_ref::install(ctx);
}
