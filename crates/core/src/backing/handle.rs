use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A typed, non-owning coordinate into a [`GenerationalHandlePool`]. It is never dereferenced directly, instead the
/// pool it was issued by resolves it, rejecting it once the slot has been released or reused.
///
/// Generation 0 is never issued, so [`Handle::INVALID`] and [`Handle::default`] never resolve to anything.
///
/// [`GenerationalHandlePool`]: crate::backing::GenerationalHandlePool
pub struct Handle<T> {
	index: u32,
	generation: u32,
	_phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
	pub const INVALID: Self = Self::new(0, 0);

	#[inline]
	pub(crate) const fn new(index: u32, generation: u32) -> Self {
		Self {
			index,
			generation,
			_phantom: PhantomData,
		}
	}

	#[inline]
	pub fn index(&self) -> u32 {
		self.index
	}

	#[inline]
	pub fn generation(&self) -> u32 {
		self.generation
	}

	/// Whether this handle could have been issued by any pool. It may still be stale.
	#[inline]
	pub fn is_valid(&self) -> bool {
		self.generation != 0
	}
}

// manual impls, derives would require `T` to implement them as well

impl<T> Copy for Handle<T> {}

impl<T> Clone for Handle<T> {
	#[inline]
	fn clone(&self) -> Self {
		*self
	}
}

impl<T> Default for Handle<T> {
	#[inline]
	fn default() -> Self {
		Self::INVALID
	}
}

impl<T> PartialEq for Handle<T> {
	#[inline]
	fn eq(&self, other: &Self) -> bool {
		self.index == other.index && self.generation == other.generation
	}
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.index.hash(state);
		self.generation.hash(state);
	}
}

impl<T> PartialOrd for Handle<T> {
	#[inline]
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl<T> Ord for Handle<T> {
	#[inline]
	fn cmp(&self, other: &Self) -> Ordering {
		self.index
			.cmp(&other.index)
			.then_with(|| self.generation.cmp(&other.generation))
	}
}

impl<T> Debug for Handle<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Handle")
			.field("type", &std::any::type_name::<T>())
			.field("index", &self.index)
			.field("generation", &self.generation)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use static_assertions::assert_impl_all;
	use std::cell::Cell;
	use std::collections::BTreeSet;

	struct NotSync(#[allow(dead_code)] Cell<u32>);

	assert_impl_all!(Handle<NotSync>: Copy, Send, Sync, Eq, Ord, Hash, Default);

	#[test]
	fn invalid_is_default() {
		let handle = Handle::<u32>::default();
		assert_eq!(handle, Handle::INVALID);
		assert!(!handle.is_valid());
		assert!(Handle::<u32>::new(0, 1).is_valid());
	}

	#[test]
	fn ordered_by_index_then_generation() {
		let set = BTreeSet::from([
			Handle::<u32>::new(1, 1),
			Handle::new(0, 2),
			Handle::new(0, 1),
			Handle::new(1, 1),
		]);
		assert_eq!(
			set.into_iter().collect::<Vec<_>>(),
			[Handle::new(0, 1), Handle::new(0, 2), Handle::new(1, 1)]
		);
	}
}
