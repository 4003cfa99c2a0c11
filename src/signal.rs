use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use fxhash::FxHashMap;

use crate::computed::Computed;
use crate::context::active_context;
use crate::effect::EffectBody;
use crate::error::{DynError, WriteError};
use crate::link::WeakRegistry;

/// Severing port implemented by anything an effect can depend on. The
/// effect holds the strong half of the edge; `unsubscribe` removes the
/// weak half from the source's per-context subscriber bucket.
pub(crate) trait Source {
	fn unsubscribe(&self, ctx: u64, effect: &Weak<EffectBody>);
}

type OnSet<T> = Box<dyn Fn(&T, &T) -> Result<(), DynError>>;

pub struct SignalOptions<T> {
	name: Option<&'static str>,
	validators: Vec<Box<dyn Fn(&T) -> bool>>,
	on_set: Option<OnSet<T>>,
}

impl<T> Default for SignalOptions<T> {
	fn default() -> Self {
		SignalOptions {
			name: None,
			validators: Vec::new(),
			on_set: None,
		}
	}
}

impl<T> SignalOptions<T> {
	pub fn new() -> Self {
		Default::default()
	}

	pub fn name(mut self, name: &'static str) -> Self {
		self.name = Some(name);
		self
	}

	/// Boolean-accept validator: a candidate value rejected by any
	/// validator leaves the signal untouched and emits a diagnostic.
	pub fn validator(mut self, f: impl Fn(&T) -> bool + 'static) -> Self {
		self.validators.push(Box::new(f));
		self
	}

	/// Hook invoked with `(new, old)` right before assignment. A hook
	/// failure is logged; the write still proceeds.
	pub fn on_set(mut self, f: impl Fn(&T, &T) -> Result<(), DynError> + 'static) -> Self {
		self.on_set = Some(Box::new(f));
		self
	}
}

pub(crate) struct SignalBody<T> {
	name: Option<&'static str>,
	value: RefCell<T>,
	subscribers: RefCell<FxHashMap<u64, WeakRegistry<EffectBody>>>,
	validators: Vec<Box<dyn Fn(&T) -> bool>>,
	on_set: Option<OnSet<T>>,
	this: Weak<SignalBody<T>>,
}

/// A reactive value cell. Reads performed while an effect is tracking
/// register that effect as a subscriber; writes queue the subscribers of
/// the active context for a flush.
pub struct Signal<T> {
	body: Rc<SignalBody<T>>,
}

impl<T> Clone for Signal<T> {
	fn clone(&self) -> Self {
		Signal {
			body: self.body.clone(),
		}
	}
}

impl<T> Default for Signal<T>
where
	T: Default + 'static,
{
	fn default() -> Self {
		Signal::new(Default::default())
	}
}

pub fn signal<T: 'static>(initial: T) -> Signal<T> {
	Signal::new(initial)
}

pub fn signal_with<T: 'static>(options: SignalOptions<T>, initial: T) -> Signal<T> {
	Signal::with_options(options, initial)
}

pub trait Toggle {
	fn toggle(&mut self);
}

impl Toggle for bool {
	fn toggle(&mut self) {
		*self = !*self
	}
}

impl<T> Signal<T>
where
	T: 'static,
{
	pub fn new(initial: T) -> Self {
		Signal::with_options(SignalOptions::new(), initial)
	}

	pub fn with_options(options: SignalOptions<T>, initial: T) -> Self {
		Signal {
			body: Rc::new_cyclic(|this| SignalBody {
				name: options.name,
				value: RefCell::new(initial),
				subscribers: RefCell::new(FxHashMap::default()),
				validators: options.validators,
				on_set: options.on_set,
				this: this.clone(),
			}),
		}
	}

	pub fn name(&self) -> Option<&'static str> {
		self.body.name
	}

	pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
		self.body.track_read();
		f(&self.body.value.borrow())
	}

	pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
		f(&self.body.value.borrow())
	}

	pub fn get(&self) -> T
	where
		T: Clone,
	{
		self.with(T::clone)
	}

	pub fn get_untracked(&self) -> T
	where
		T: Clone,
	{
		self.with_untracked(T::clone)
	}

	pub fn set(&self, value: T)
	where
		T: PartialEq,
	{
		let _ = self.try_set(value);
	}

	/// Like `set`, surfacing validator rejection as an error. Returns
	/// whether the value actually changed.
	pub fn try_set(&self, value: T) -> Result<bool, WriteError>
	where
		T: PartialEq,
	{
		if *self.body.value.borrow() == value {
			return Ok(false);
		}
		self.body.validate(&value)?;
		self.body.commit(value);
		self.body.notify();
		Ok(true)
	}

	pub fn update(&self, f: impl FnOnce(&T) -> T)
	where
		T: PartialEq,
	{
		let next = {
			let current = self.body.value.borrow();
			f(&current)
		};
		self.set(next);
	}

	/// Swap in a new value and return the old one. A rejected candidate
	/// is handed back unchanged.
	pub fn replace(&self, value: T) -> T
	where
		T: PartialEq,
	{
		if self.body.validate(&value).is_err() {
			return value;
		}
		let changed = *self.body.value.borrow() != value;
		if !changed {
			return std::mem::replace(&mut *self.body.value.borrow_mut(), value);
		}
		let old = self.body.commit(value);
		self.body.notify();
		old
	}

	pub fn toggle(&self)
	where
		T: Toggle + Clone + PartialEq,
	{
		self.update(|current| {
			let mut next = current.clone();
			next.toggle();
			next
		});
	}

	pub fn map<F, R>(&self, f: F) -> Computed<R>
	where
		F: Fn(&T) -> R + 'static,
		R: Clone + PartialEq + 'static,
	{
		let this = self.clone();
		crate::computed(move || this.with(|value| f(value)))
	}

	/// Live subscribers across all contexts; dead links are pruned.
	pub fn subscriber_count(&self) -> usize {
		let mut subscribers = self.body.subscribers.borrow_mut();
		subscribers
			.values_mut()
			.map(|registry| registry.live_count())
			.sum()
	}
}

impl<T> SignalBody<T>
where
	T: 'static,
{
	fn label(&self) -> &'static str {
		self.name.unwrap_or("<unnamed>")
	}

	/// Register the bidirectional edge for the active context, if its
	/// tracker is a live effect.
	fn track_read(&self) {
		let ctx = active_context();
		let Some(effect) = ctx.tracked_effect() else { return };
		let Some(this) = self.this.upgrade() else { return };
		self.subscribers
			.borrow_mut()
			.entry(ctx.id)
			.or_default()
			.insert(effect.weak_self());
		effect.add_dep(this);
	}

	fn validate(&self, value: &T) -> Result<(), WriteError> {
		for validator in &self.validators {
			if !validator(value) {
				tracing::warn!(signal = self.label(), "write rejected by validator");
				return Err(WriteError::Rejected { name: self.label() });
			}
		}
		Ok(())
	}

	fn commit(&self, value: T) -> T {
		if let Some(hook) = &self.on_set {
			let old = self.value.borrow();
			if let Err(err) = hook(&value, &old) {
				tracing::warn!(signal = self.label(), error = %err, "on_set hook failed");
			}
		}
		std::mem::replace(&mut *self.value.borrow_mut(), value)
	}

	fn notify(&self) {
		let ctx = active_context();
		let live = {
			let mut subscribers = self.subscribers.borrow_mut();
			match subscribers.get_mut(&ctx.id) {
				Some(registry) => registry.collect_live(),
				None => return,
			}
		};
		if !live.is_empty() {
			ctx.queue_effects(live);
		}
	}
}

impl<T> Source for SignalBody<T>
where
	T: 'static,
{
	fn unsubscribe(&self, ctx: u64, effect: &Weak<EffectBody>) {
		let mut subscribers = self.subscribers.borrow_mut();
		if let Some(registry) = subscribers.get_mut(&ctx) {
			registry.remove(effect);
			if registry.is_empty() {
				subscribers.remove(&ctx);
			}
		}
	}
}

impl<T> Debug for Signal<T>
where
	T: Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.with_untracked(|value| value.fmt(f))
	}
}
