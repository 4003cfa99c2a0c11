use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use fxhash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::computed::{Computed, ComputedOptions};
use crate::effect::{Effect, EffectBody, EffectOptions};
use crate::error::DynError;
use crate::next_id;
use crate::scheduler::{Scheduler, Strategy};
use crate::signal::{Signal, SignalOptions};

const MAX_FLUSH_PASSES: usize = 100;

/// Dedup key for a context's scheduled flush task. Ids handed out by
/// `next_id` start at 1, so the key never collides with an effect.
const FLUSH_TASK_KEY: u64 = 0;

/// Active-tracker slot. `Suppressed` (set by `untracked`) is distinct
/// from `Inactive` so nested suppression restores precisely.
pub(crate) enum Tracker {
	Inactive,
	Suppressed,
	Active(Weak<EffectBody>),
}

pub(crate) struct ContextBody {
	pub(crate) id: u64,
	tracker: RefCell<Tracker>,
	pending: RefCell<Vec<Weak<EffectBody>>>,
	pending_ids: RefCell<FxHashSet<u64>>,
	stack: RefCell<Vec<u64>>,
	pub(crate) running: Cell<Option<u64>>,
	pub(crate) effects: RefCell<FxHashMap<u64, Rc<EffectBody>>>,
	children: RefCell<FxHashMap<u64, SmallVec<[u64; 4]>>>,
	batch_depth: Cell<u32>,
	flushing: Cell<bool>,
	flush_via: Cell<Strategy>,
	scheduler: Rc<Scheduler>,
	pub(crate) this: Weak<ContextBody>,
}

thread_local! {
	static ACTIVE: RefCell<Vec<Rc<ContextBody>>> = RefCell::new(Vec::new());
	static DEFAULT: Rc<ContextBody> = ContextBody::create();
}

pub(crate) fn active_context() -> Rc<ContextBody> {
	ACTIVE
		.with(|stack| stack.borrow().last().cloned())
		.unwrap_or_else(|| DEFAULT.with(Rc::clone))
}

pub(crate) struct Enter;

impl Drop for Enter {
	fn drop(&mut self) {
		ACTIVE.with(|stack| {
			stack.borrow_mut().pop();
		});
	}
}

pub(crate) fn enter(ctx: &Rc<ContextBody>) -> Enter {
	ACTIVE.with(|stack| stack.borrow_mut().push(ctx.clone()));
	Enter
}

struct FlushReset(Rc<ContextBody>);

impl Drop for FlushReset {
	fn drop(&mut self) {
		self.0.flushing.set(false);
	}
}

struct TrackerRestore {
	ctx: Rc<ContextBody>,
	tracker: Option<Tracker>,
}

impl Drop for TrackerRestore {
	fn drop(&mut self) {
		if let Some(tracker) = self.tracker.take() {
			self.ctx.tracker.replace(tracker);
		}
	}
}

struct RunRestore {
	ctx: Rc<ContextBody>,
	tracker: Option<Tracker>,
	running: Option<u64>,
}

impl Drop for RunRestore {
	fn drop(&mut self) {
		self.ctx.running.set(self.running);
		if let Some(tracker) = self.tracker.take() {
			self.ctx.tracker.replace(tracker);
		}
		self.ctx.stack.borrow_mut().pop();
	}
}

pub(crate) struct BatchGuard(Rc<ContextBody>);

impl Drop for BatchGuard {
	fn drop(&mut self) {
		let depth = self.0.batch_depth.get() - 1;
		self.0.batch_depth.set(depth);
		if depth == 0 {
			self.0.route_flush();
		}
	}
}

impl ContextBody {
	pub(crate) fn create() -> Rc<ContextBody> {
		Rc::new_cyclic(|this| ContextBody {
			id: next_id(),
			tracker: RefCell::new(Tracker::Inactive),
			pending: RefCell::new(Vec::new()),
			pending_ids: RefCell::new(FxHashSet::default()),
			stack: RefCell::new(Vec::new()),
			running: Cell::new(None),
			effects: RefCell::new(FxHashMap::default()),
			children: RefCell::new(FxHashMap::default()),
			batch_depth: Cell::new(0),
			flushing: Cell::new(false),
			flush_via: Cell::new(Strategy::Immediate),
			scheduler: Rc::new(Scheduler::new()),
			this: this.clone(),
		})
	}

	pub(crate) fn scheduler(&self) -> &Rc<Scheduler> {
		&self.scheduler
	}

	pub(crate) fn in_batch(&self) -> bool {
		self.batch_depth.get() > 0
	}

	pub(crate) fn begin_batch(self: &Rc<Self>) -> BatchGuard {
		self.batch_depth.set(self.batch_depth.get() + 1);
		BatchGuard(self.clone())
	}

	pub(crate) fn tracked_effect(&self) -> Option<Rc<EffectBody>> {
		let upgraded = match &*self.tracker.borrow() {
			Tracker::Active(weak) => weak.upgrade(),
			_ => None,
		};
		upgraded.filter(|effect| !effect.is_disposed())
	}

	pub(crate) fn suppress_tracking(self: &Rc<Self>) -> impl Drop {
		let prev = self.tracker.replace(Tracker::Suppressed);
		TrackerRestore {
			ctx: self.clone(),
			tracker: Some(prev),
		}
	}

	pub(crate) fn register_effect(self: &Rc<Self>, effect: Rc<EffectBody>) {
		let id = effect.id();
		self.effects.borrow_mut().insert(id, effect.clone());
		if let Some(parent) = self.running.get() {
			self.children.borrow_mut().entry(parent).or_default().push(id);
		}
		self.dispatch(&effect);
	}

	pub(crate) fn queue_effects(
		self: &Rc<Self>,
		effects: impl IntoIterator<Item = Rc<EffectBody>>,
	) {
		{
			let mut pending = self.pending.borrow_mut();
			let mut ids = self.pending_ids.borrow_mut();
			for effect in effects {
				if effect.is_disposed() || !ids.insert(effect.id()) {
					continue;
				}
				pending.push(effect.weak_self());
			}
		}
		if self.batch_depth.get() == 0 {
			self.route_flush();
		}
	}

	/// Writes that land while a tracked run is on the stack defer their
	/// flush to the end of that run, so an effect re-triggering itself is
	/// picked up by a later pass instead of re-entered synchronously.
	pub(crate) fn route_flush(self: &Rc<Self>) {
		if self.pending.borrow().is_empty() {
			return;
		}
		match self.flush_via.get() {
			Strategy::Immediate => {
				if !self.flushing.get() && self.stack.borrow().is_empty() {
					self.flush();
				}
			}
			strategy => {
				let weak = self.this.clone();
				self.scheduler.schedule(
					strategy,
					FLUSH_TASK_KEY,
					Box::new(move || {
						if let Some(ctx) = weak.upgrade() {
							ctx.flush();
						}
					}),
				);
			}
		}
	}

	pub(crate) fn set_flush_strategy(&self, strategy: Strategy) {
		self.flush_via.set(strategy);
	}

	/// Run pending effects in passes: each pass snapshots the queue,
	/// sorts it by descending priority (stable, so enqueue order breaks
	/// ties) and clears it before running anything. Effects queued while
	/// a pass runs go to the next pass; a pass cap keeps mutually
	/// retriggering effects from hanging the process.
	pub(crate) fn flush(self: &Rc<Self>) {
		if self.flushing.get() {
			return;
		}
		self.flushing.set(true);
		let _reset = FlushReset(self.clone());
		let _enter = enter(self);
		let mut passes = 0;
		loop {
			if self.pending.borrow().is_empty() {
				break;
			}
			passes += 1;
			if passes > MAX_FLUSH_PASSES {
				tracing::warn!(
					context = self.id,
					"flush did not settle after {MAX_FLUSH_PASSES} passes; effects remain queued"
				);
				break;
			}
			let mut snapshot: SmallVec<[Rc<EffectBody>; 8]> = {
				let mut pending = self.pending.borrow_mut();
				self.pending_ids.borrow_mut().clear();
				pending.drain(..).filter_map(|weak| weak.upgrade()).collect()
			};
			snapshot.sort_by_key(|effect| std::cmp::Reverse(effect.priority()));
			for effect in snapshot {
				if effect.is_disposed() {
					continue;
				}
				self.dispatch(&effect);
			}
		}
	}

	/// Route one triggered effect: debounced effects that already ran go
	/// to the timer queue (rescheduling resets the window), then a custom
	/// executor, when present, decides when the body runs.
	pub(crate) fn dispatch(self: &Rc<Self>, effect: &Rc<EffectBody>) {
		if let (Some(delay), true) = (effect.debounce(), effect.has_run()) {
			let ctx = self.this.clone();
			let weak = effect.weak_self();
			self.scheduler.schedule_after(
				effect.id(),
				delay,
				Box::new(move || {
					if let (Some(ctx), Some(effect)) = (ctx.upgrade(), weak.upgrade()) {
						ctx.dispatch_now(&effect);
					}
				}),
			);
			return;
		}
		self.dispatch_now(effect);
	}

	fn dispatch_now(self: &Rc<Self>, effect: &Rc<EffectBody>) {
		if effect.is_disposed() {
			return;
		}
		match effect.executor() {
			Some(executor) => {
				let ctx = self.this.clone();
				let weak = effect.weak_self();
				(*executor)(Box::new(move || {
					if let (Some(ctx), Some(effect)) = (ctx.upgrade(), weak.upgrade()) {
						ctx.run_effect(&effect);
					}
				}));
			}
			None => self.run_effect(effect),
		}
	}

	pub(crate) fn run_effect(self: &Rc<Self>, effect: &Rc<EffectBody>) {
		match self.run_tracked(effect, || effect.invoke()) {
			Some(Ok(())) => {
				if effect.is_once() && !effect.is_disposed() {
					self.dispose_effect(effect.id());
				}
			}
			Some(Err(err)) => effect.handle_error(err),
			None => {}
		}
	}

	/// Execute `f` as `effect`'s tracked run: previous dependency edges
	/// are severed, the effect goes on the execution stack and becomes
	/// the active tracker, and everything is restored on every exit path.
	/// Returns `None` when the run is refused (disposed, or already on
	/// the stack).
	pub(crate) fn run_tracked(
		self: &Rc<Self>,
		effect: &Rc<EffectBody>,
		f: impl FnOnce() -> Result<(), DynError>,
	) -> Option<Result<(), DynError>> {
		if effect.is_disposed() {
			return None;
		}
		if self.stack.borrow().contains(&effect.id()) {
			tracing::warn!(
				effect = effect.label(),
				"effect re-entered while running; skipped to avoid unbounded recursion"
			);
			return None;
		}
		effect.clear_deps();
		let out = {
			let _enter = enter(self);
			self.stack.borrow_mut().push(effect.id());
			let prev_tracker = self.tracker.replace(Tracker::Active(effect.weak_self()));
			let prev_running = self.running.replace(Some(effect.id()));
			let _restore = RunRestore {
				ctx: self.clone(),
				tracker: Some(prev_tracker),
				running: prev_running,
			};
			let out = f();
			effect.mark_ran();
			out
		};
		// Flush anything this run queued, once the stack unwound.
		if self.stack.borrow().is_empty() && self.batch_depth.get() == 0 {
			self.route_flush();
		}
		Some(out)
	}

	pub(crate) fn dispose_effect(self: &Rc<Self>, id: u64) {
		let effect = self.effects.borrow().get(&id).cloned();
		let Some(effect) = effect else { return };
		if effect.mark_disposed() {
			return;
		}
		self.scheduler.cancel(id);
		let children = self.children.borrow_mut().remove(&id).unwrap_or_default();
		for child in children {
			self.dispose_effect(child);
		}
		effect.run_cleanup();
		if self.pending_ids.borrow_mut().remove(&id) {
			self.pending
				.borrow_mut()
				.retain(|weak| weak.upgrade().map(|e| e.id() != id).unwrap_or(false));
		}
		effect.clear_deps();
		self.effects.borrow_mut().remove(&id);
	}
}

/// An isolated reactive universe. Operations called through a context
/// activate it for their duration; contexts never see each other's
/// pending queues or dependency edges, even for a shared [`Signal`].
pub struct Context {
	pub(crate) body: Rc<ContextBody>,
}

impl Clone for Context {
	fn clone(&self) -> Self {
		Context {
			body: self.body.clone(),
		}
	}
}

impl Default for Context {
	fn default() -> Self {
		Context::new()
	}
}

impl Context {
	pub fn new() -> Context {
		Context {
			body: ContextBody::create(),
		}
	}

	pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
		let _enter = enter(&self.body);
		f()
	}

	pub fn signal<T: 'static>(&self, initial: T) -> Signal<T> {
		self.run(|| crate::signal(initial))
	}

	pub fn signal_with<T: 'static>(&self, options: SignalOptions<T>, initial: T) -> Signal<T> {
		self.run(|| crate::signal_with(options, initial))
	}

	pub fn effect(&self, f: impl FnMut() + 'static) -> Effect {
		self.run(|| crate::effect(f))
	}

	pub fn effect_with(&self, options: EffectOptions, f: impl FnMut() + 'static) -> Effect {
		self.run(|| crate::effect_with(options, f))
	}

	pub fn try_effect(&self, f: impl FnMut() -> Result<(), DynError> + 'static) -> Effect {
		self.run(|| crate::try_effect(f))
	}

	pub fn computed<T, F>(&self, f: F) -> Computed<T>
	where
		T: Clone + PartialEq + 'static,
		F: Fn() -> T + 'static,
	{
		self.run(|| crate::computed(f))
	}

	pub fn computed_with<T, F>(&self, options: ComputedOptions<T>, f: F) -> Computed<T>
	where
		T: Clone + PartialEq + 'static,
		F: Fn() -> T + 'static,
	{
		self.run(|| crate::computed_with(options, f))
	}

	pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
		self.run(|| crate::batch(f))
	}

	pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
		self.run(|| untracked(f))
	}

	pub fn flush(&self) {
		self.body.flush();
	}

	pub fn set_flush_strategy(&self, strategy: Strategy) {
		self.body.set_flush_strategy(strategy);
	}

	pub fn scheduler(&self) -> Rc<Scheduler> {
		self.body.scheduler.clone()
	}

	pub fn effect_count(&self) -> usize {
		self.body.effects.borrow().len()
	}
}

pub fn default_context() -> Context {
	Context {
		body: DEFAULT.with(Rc::clone),
	}
}

pub fn with_context<R>(ctx: &Context, f: impl FnOnce() -> R) -> R {
	ctx.run(f)
}

/// Run `f` with dependency tracking suppressed: signal reads inside
/// establish no edges. The previous tracker is restored on every exit
/// path, so suppression nests inside effects and other `untracked` calls.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
	let ctx = active_context();
	let _restore = ctx.suppress_tracking();
	f()
}
