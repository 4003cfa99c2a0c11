use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::context::{active_context, enter, untracked, ContextBody};
use crate::error::DynError;
use crate::next_id;
use crate::scheduler::Strategy;
use crate::signal::Source;

type Body = Box<dyn FnMut() -> Result<(), DynError>>;
type Executor = Rc<dyn Fn(Box<dyn FnOnce()>)>;
type ErrorHandler = Box<dyn Fn(&DynError)>;

pub struct EffectOptions {
	name: Option<&'static str>,
	priority: i32,
	once: bool,
	debounce: Option<Duration>,
	executor: Option<Executor>,
	on_error: Option<ErrorHandler>,
	on_cleanup: Option<Box<dyn FnOnce()>>,
}

impl Default for EffectOptions {
	fn default() -> Self {
		EffectOptions {
			name: None,
			priority: 0,
			once: false,
			debounce: None,
			executor: None,
			on_error: None,
			on_cleanup: None,
		}
	}
}

impl EffectOptions {
	pub fn new() -> Self {
		Default::default()
	}

	pub fn name(mut self, name: &'static str) -> Self {
		self.name = Some(name);
		self
	}

	/// Flush ordering; higher runs first. Default 0.
	pub fn priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	/// Dispose the effect after its first successful run.
	pub fn once(mut self) -> Self {
		self.once = true;
		self
	}

	/// Coalesce runs after the first: a trigger (re)schedules the run on
	/// the context's timer queue, and a new trigger inside the window
	/// resets it.
	pub fn debounce(mut self, interval: Duration) -> Self {
		self.debounce = Some(interval);
		self
	}

	/// Take full control of when the body runs. The executor receives
	/// the run-now thunk for every run, the registration run included.
	pub fn executor(mut self, f: impl Fn(Box<dyn FnOnce()>) + 'static) -> Self {
		self.executor = Some(Rc::new(f));
		self
	}

	pub fn on_error(mut self, f: impl Fn(&DynError) + 'static) -> Self {
		self.on_error = Some(Box::new(f));
		self
	}

	pub fn on_cleanup(mut self, f: impl FnOnce() + 'static) -> Self {
		self.on_cleanup = Some(Box::new(f));
		self
	}
}

pub(crate) struct EffectBody {
	id: u64,
	name: Option<&'static str>,
	priority: i32,
	once: bool,
	debounce: Option<Duration>,
	executor: Option<Executor>,
	on_error: Option<ErrorHandler>,
	body: RefCell<Body>,
	cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
	deps: RefCell<Vec<Rc<dyn Source>>>,
	disposed: Cell<bool>,
	has_run: Cell<bool>,
	ctx: Weak<ContextBody>,
	this: Weak<EffectBody>,
}

impl EffectBody {
	fn create(ctx: &Rc<ContextBody>, options: EffectOptions, body: Body) -> Rc<EffectBody> {
		Rc::new_cyclic(|this| EffectBody {
			id: next_id(),
			name: options.name,
			priority: options.priority,
			once: options.once,
			debounce: options.debounce,
			executor: options.executor,
			on_error: options.on_error,
			body: RefCell::new(body),
			cleanup: RefCell::new(options.on_cleanup),
			deps: RefCell::new(Vec::new()),
			disposed: Cell::new(false),
			has_run: Cell::new(false),
			ctx: Rc::downgrade(ctx),
			this: this.clone(),
		})
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	pub(crate) fn label(&self) -> &'static str {
		self.name.unwrap_or("<unnamed>")
	}

	pub(crate) fn priority(&self) -> i32 {
		self.priority
	}

	pub(crate) fn is_once(&self) -> bool {
		self.once
	}

	pub(crate) fn debounce(&self) -> Option<Duration> {
		self.debounce
	}

	pub(crate) fn executor(&self) -> Option<Executor> {
		self.executor.clone()
	}

	pub(crate) fn is_disposed(&self) -> bool {
		self.disposed.get()
	}

	/// Flags the effect disposed; returns whether it already was.
	pub(crate) fn mark_disposed(&self) -> bool {
		self.disposed.replace(true)
	}

	pub(crate) fn has_run(&self) -> bool {
		self.has_run.get()
	}

	pub(crate) fn mark_ran(&self) {
		self.has_run.set(true);
	}

	pub(crate) fn weak_self(&self) -> Weak<EffectBody> {
		self.this.clone()
	}

	pub(crate) fn context(&self) -> Option<Rc<ContextBody>> {
		self.ctx.upgrade()
	}

	pub(crate) fn invoke(&self) -> Result<(), DynError> {
		let mut body = self.body.borrow_mut();
		(*body)()
	}

	pub(crate) fn handle_error(&self, err: DynError) {
		match &self.on_error {
			Some(handler) => handler(&err),
			None => tracing::error!(effect = self.label(), error = %err, "effect failed"),
		}
	}

	pub(crate) fn add_dep(&self, source: Rc<dyn Source>) {
		let mut deps = self.deps.borrow_mut();
		if !deps.iter().any(|dep| Rc::ptr_eq(dep, &source)) {
			deps.push(source);
		}
	}

	/// Sever every dependency edge in both directions.
	pub(crate) fn clear_deps(&self) {
		let deps = std::mem::take(&mut *self.deps.borrow_mut());
		let Some(ctx) = self.ctx.upgrade() else { return };
		for dep in deps {
			dep.unsubscribe(ctx.id, &self.this);
		}
	}

	pub(crate) fn set_cleanup(&self, f: Box<dyn FnOnce()>) {
		*self.cleanup.borrow_mut() = Some(f);
	}

	pub(crate) fn run_cleanup(&self) {
		let cleanup = self.cleanup.borrow_mut().take();
		if let Some(f) = cleanup {
			f();
		}
	}
}

/// Handle to a registered effect. Dropping the handle does not stop the
/// effect; call [`Effect::dispose`].
#[derive(Clone)]
pub struct Effect {
	body: Weak<EffectBody>,
}

impl Effect {
	/// Idempotent teardown: cancels a pending debounce timer, disposes
	/// child effects, runs the cleanup, severs all dependency edges and
	/// removes the effect from its context.
	pub fn dispose(&self) {
		let Some(body) = self.body.upgrade() else { return };
		let Some(ctx) = body.context() else { return };
		ctx.dispose_effect(body.id());
	}

	pub fn is_disposed(&self) -> bool {
		self.body.upgrade().map(|b| b.is_disposed()).unwrap_or(true)
	}

	pub(crate) fn body(&self) -> Option<Rc<EffectBody>> {
		self.body.upgrade()
	}
}

impl Debug for Effect {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Effect")
			.field(
				"name",
				&self.body.upgrade().map(|b| b.label()).unwrap_or("<dead>"),
			)
			.finish()
	}
}

pub fn effect(mut f: impl FnMut() + 'static) -> Effect {
	try_effect(move || {
		f();
		Ok(())
	})
}

pub fn effect_with(options: EffectOptions, mut f: impl FnMut() + 'static) -> Effect {
	try_effect_with(options, move || {
		f();
		Ok(())
	})
}

pub fn try_effect(f: impl FnMut() -> Result<(), DynError> + 'static) -> Effect {
	try_effect_with(EffectOptions::new(), f)
}

/// Register an effect in the active context and run it once, routed
/// through the custom executor when one is set. Registration inside a
/// running effect links the new effect as its child.
pub fn try_effect_with(
	options: EffectOptions,
	f: impl FnMut() -> Result<(), DynError> + 'static,
) -> Effect {
	let ctx = active_context();
	let body = EffectBody::create(&ctx, options, Box::new(f));
	let handle = Effect {
		body: body.weak_self(),
	};
	ctx.register_effect(body);
	handle
}

/// Replace the disposal cleanup of the currently running effect.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
	let ctx = active_context();
	let Some(id) = ctx.running.get() else {
		tracing::warn!("on_cleanup called outside of a running effect");
		return;
	};
	let effect = ctx.effects.borrow().get(&id).cloned();
	if let Some(effect) = effect {
		effect.set_cleanup(Box::new(f));
	}
}

/// Schedule `f` as a deferred, untracked continuation of the currently
/// running effect, on the context's microtask queue. The continuation is
/// dropped if the effect is disposed before it runs; its error routes to
/// the effect's error path. Dependency tracking covers only the
/// synchronous part of an effect body, never deferred continuations.
pub fn defer(f: impl FnOnce() -> Result<(), DynError> + 'static) {
	let ctx = active_context();
	let owner = ctx
		.running
		.get()
		.and_then(|id| ctx.effects.borrow().get(&id).cloned());
	let owner = owner.map(|effect| effect.weak_self());
	let weak_ctx = ctx.this.clone();
	let task: Box<dyn FnOnce()> = Box::new(move || {
		let Some(ctx) = weak_ctx.upgrade() else { return };
		let owner = match &owner {
			Some(weak) => match weak.upgrade() {
				Some(owner) if !owner.is_disposed() => Some(owner),
				// Owner disposed before the continuation ran: cancelled.
				_ => return,
			},
			None => None,
		};
		let _enter = enter(&ctx);
		if let Err(err) = untracked(f) {
			match &owner {
				Some(owner) => owner.handle_error(err),
				None => tracing::error!(error = %err, "deferred task failed"),
			}
		}
	});
	ctx.scheduler().schedule(Strategy::Microtask, next_id(), task);
}
