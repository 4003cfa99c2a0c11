use crate::context::active_context;

/// Defer effect flushing until the outermost batch exits. Writes inside
/// still apply immediately (only notification is deferred) and the flush
/// happens on every exit path, a panic included. The return value of `f`
/// passes through unchanged.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
	let ctx = active_context();
	let _guard = ctx.begin_batch();
	f()
}

pub fn in_batch() -> bool {
	active_context().in_batch()
}
