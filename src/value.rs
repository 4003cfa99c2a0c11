use std::rc::Rc;

use crate::{Computed, Signal};

pub trait Readable<T> {
	fn get(&self) -> T;
	fn get_untracked(&self) -> T;
}

impl<T> Readable<T> for Signal<T>
where
	T: Clone + 'static,
{
	fn get(&self) -> T {
		Signal::get(self)
	}

	fn get_untracked(&self) -> T {
		Signal::get_untracked(self)
	}
}

impl<T> Readable<T> for Computed<T>
where
	T: Clone + PartialEq + 'static,
{
	fn get(&self) -> T {
		Computed::get(self)
	}

	fn get_untracked(&self) -> T {
		Computed::get_untracked(self)
	}
}

/// A readable handle erasing whether the underlying cell is a [`Signal`]
/// or a [`Computed`].
pub struct Value<T> {
	inner: Rc<dyn Readable<T>>,
}

impl<T> Clone for Value<T> {
	fn clone(&self) -> Self {
		Value {
			inner: self.inner.clone(),
		}
	}
}

impl<T> Value<T> {
	pub fn new(inner: Rc<dyn Readable<T>>) -> Self {
		Value { inner }
	}
}

impl<T> Readable<T> for Value<T> {
	fn get(&self) -> T {
		self.inner.get()
	}

	fn get_untracked(&self) -> T {
		self.inner.get_untracked()
	}
}

impl<T> From<Signal<T>> for Value<T>
where
	T: Clone + 'static,
{
	fn from(signal: Signal<T>) -> Self {
		Value::new(Rc::new(signal))
	}
}

impl<T> From<Computed<T>> for Value<T>
where
	T: Clone + PartialEq + 'static,
{
	fn from(computed: Computed<T>) -> Self {
		Value::new(Rc::new(computed))
	}
}
