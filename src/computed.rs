use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use crate::context::{active_context, untracked, ContextBody};
use crate::effect::{try_effect_with, Effect, EffectOptions};
use crate::error::{ComputedError, DynError};
use crate::signal::Signal;

type Derive<T> = Box<dyn Fn() -> Result<T, DynError>>;

pub struct ComputedOptions<T> {
	name: Option<&'static str>,
	keep_alive: bool,
	on_error: Option<Box<dyn Fn(&DynError)>>,
	on_computed: Option<Box<dyn Fn(&T)>>,
}

impl<T> Default for ComputedOptions<T> {
	fn default() -> Self {
		ComputedOptions {
			name: None,
			keep_alive: false,
			on_error: None,
			on_computed: None,
		}
	}
}

impl<T> ComputedOptions<T> {
	pub fn new() -> Self {
		Default::default()
	}

	pub fn name(mut self, name: &'static str) -> Self {
		self.name = Some(name);
		self
	}

	/// Recompute eagerly whenever a dependency changes, pushing the new
	/// value into dependents instead of waiting for the next access.
	pub fn keep_alive(mut self) -> Self {
		self.keep_alive = true;
		self
	}

	pub fn on_error(mut self, f: impl Fn(&DynError) + 'static) -> Self {
		self.on_error = Some(Box::new(f));
		self
	}

	/// Invoked with each freshly computed value, outside of tracking.
	pub fn on_computed(mut self, f: impl Fn(&T) + 'static) -> Self {
		self.on_computed = Some(Box::new(f));
		self
	}
}

struct ComputedBody<T> {
	name: Option<&'static str>,
	backing: Signal<Option<T>>,
	derive: Derive<T>,
	stale: Cell<bool>,
	disposed: Cell<bool>,
	keep_alive: bool,
	on_error: Option<Box<dyn Fn(&DynError)>>,
	on_computed: Option<Box<dyn Fn(&T)>>,
	effect: RefCell<Option<Effect>>,
	ctx: Weak<ContextBody>,
}

/// A derived value: a backing signal plus an internal effect that marks
/// it stale when its tracked reads change. Lazy by default; the derive
/// function runs on access, not on invalidation, and `keep_alive`
/// recomputes eagerly. Once disposed it never recomputes again and the
/// accessor returns the last cached value.
pub struct Computed<T> {
	body: Rc<ComputedBody<T>>,
}

impl<T> Clone for Computed<T> {
	fn clone(&self) -> Self {
		Computed {
			body: self.body.clone(),
		}
	}
}

pub fn computed<T, F>(f: F) -> Computed<T>
where
	T: Clone + PartialEq + 'static,
	F: Fn() -> T + 'static,
{
	computed_with(ComputedOptions::new(), f)
}

pub fn computed_with<T, F>(options: ComputedOptions<T>, f: F) -> Computed<T>
where
	T: Clone + PartialEq + 'static,
	F: Fn() -> T + 'static,
{
	Computed::try_new(options, move || Ok(f()))
}

impl<T> Computed<T>
where
	T: Clone + PartialEq + 'static,
{
	pub fn try_new(
		options: ComputedOptions<T>,
		derive: impl Fn() -> Result<T, DynError> + 'static,
	) -> Computed<T> {
		let ctx = active_context();
		let body = Rc::new(ComputedBody {
			name: options.name,
			backing: Signal::new(None),
			derive: Box::new(derive),
			stale: Cell::new(true),
			disposed: Cell::new(false),
			keep_alive: options.keep_alive,
			on_error: options.on_error,
			on_computed: options.on_computed,
			effect: RefCell::new(None),
			ctx: ctx.this.clone(),
		});
		let mut effect_options = EffectOptions::new();
		if let Some(name) = options.name {
			effect_options = effect_options.name(name);
		}
		let inner = body.clone();
		let handle = try_effect_with(effect_options, move || {
			inner.on_trigger();
			Ok(())
		});
		*body.effect.borrow_mut() = Some(handle);
		Computed { body }
	}

	/// Recompute if stale, then read the backing signal. The read also
	/// registers the caller as a dependent when tracking is active.
	pub fn try_get(&self) -> Result<T, ComputedError> {
		self.body.ensure_fresh()?;
		self.body
			.backing
			.with(Option::clone)
			.ok_or(ComputedError::Unavailable {
				name: self.body.label(),
			})
	}

	/// Panics if the value is unavailable: the derive function failed
	/// with an `on_error` handler installed before ever succeeding, or
	/// the computed was disposed before its first evaluation.
	pub fn get(&self) -> T {
		match self.try_get() {
			Ok(value) => value,
			Err(err) => panic!("{err}"),
		}
	}

	pub fn get_untracked(&self) -> T {
		match self.body.ensure_fresh() {
			Ok(()) => {}
			Err(err) => panic!("{err}"),
		}
		match self.body.backing.with_untracked(Option::clone) {
			Some(value) => value,
			None => panic!(
				"{}",
				ComputedError::Unavailable {
					name: self.body.label()
				}
			),
		}
	}

	/// Stop the internal effect. The cached value remains readable; no
	/// recomputation ever happens again.
	pub fn dispose(&self) {
		if self.body.disposed.replace(true) {
			return;
		}
		let handle = self.body.effect.borrow().clone();
		if let Some(handle) = handle {
			handle.dispose();
		}
	}

	pub fn is_disposed(&self) -> bool {
		self.body.disposed.get()
	}
}

impl<T> ComputedBody<T>
where
	T: Clone + PartialEq + 'static,
{
	fn label(&self) -> &'static str {
		self.name.unwrap_or("<unnamed>")
	}

	/// Queued invalidation run. Only marks staleness; under `keep_alive`
	/// it also recomputes in place, inside the already-tracked run, and
	/// isolates its own errors.
	fn on_trigger(&self) {
		self.stale.set(true);
		if self.keep_alive && !self.disposed.get() {
			if let Err(err) = self.refresh() {
				self.report(err);
			}
		}
	}

	/// Run the derive function and push the result into the backing
	/// signal. Must execute inside the internal effect's tracked run so
	/// the dependency set is rebuilt.
	fn refresh(&self) -> Result<(), DynError> {
		let value = (self.derive)()?;
		self.stale.set(false);
		match &self.on_computed {
			Some(hook) => {
				self.backing.set(Some(value.clone()));
				untracked(|| hook(&value));
			}
			None => self.backing.set(Some(value)),
		}
		Ok(())
	}

	fn ensure_fresh(&self) -> Result<(), ComputedError> {
		if self.disposed.get() || !self.stale.get() {
			return Ok(());
		}
		let Some(ctx) = self.ctx.upgrade() else {
			return Ok(());
		};
		let effect = {
			let slot = self.effect.borrow();
			slot.as_ref().and_then(Effect::body)
		};
		let Some(effect) = effect else {
			return Ok(());
		};
		match ctx.run_tracked(&effect, || self.refresh()) {
			None | Some(Ok(())) => Ok(()),
			Some(Err(err)) => match &self.on_error {
				Some(handler) => {
					handler(&err);
					Ok(())
				}
				None => Err(ComputedError::Derive {
					name: self.label(),
					cause: err,
				}),
			},
		}
	}

	fn report(&self, err: DynError) {
		match &self.on_error {
			Some(handler) => handler(&err),
			None => {
				tracing::error!(computed = self.label(), error = %err, "computed failed to evaluate")
			}
		}
	}
}

impl<T> Debug for Computed<T>
where
	T: Debug + Clone + PartialEq + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Computed")
			.field("name", &self.body.label())
			.field("stale", &self.body.stale.get())
			.finish()
	}
}
