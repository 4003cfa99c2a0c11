use std::rc::{Rc, Weak};

use smallvec::SmallVec;

/// Non-owning subscriber set keyed on pointer identity, ordered by
/// insertion so notification order follows subscription order. Dead
/// links are pruned whenever the set is iterated, so a dropped
/// subscriber never outlives one notification cycle.
pub(crate) struct WeakRegistry<T: ?Sized> {
	links: Vec<Weak<T>>,
}

impl<T: ?Sized> Default for WeakRegistry<T> {
	fn default() -> Self {
		WeakRegistry { links: Vec::new() }
	}
}

impl<T: ?Sized> WeakRegistry<T> {
	pub fn insert(&mut self, link: Weak<T>) {
		if !self.links.iter().any(|other| other.ptr_eq(&link)) {
			self.links.push(link);
		}
	}

	pub fn remove(&mut self, link: &Weak<T>) {
		self.links.retain(|other| !other.ptr_eq(link));
	}

	pub fn is_empty(&self) -> bool {
		self.links.is_empty()
	}

	pub fn collect_live(&mut self) -> SmallVec<[Rc<T>; 8]> {
		let mut live = SmallVec::new();
		self.links.retain(|link| match link.upgrade() {
			Some(rc) => {
				live.push(rc);
				true
			}
			None => false,
		});
		live
	}

	pub fn live_count(&mut self) -> usize {
		self.collect_live().len()
	}
}
