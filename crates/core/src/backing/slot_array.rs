use std::ops::{Index, IndexMut};

/// Contiguous storage addressed by `u32` slot indices. Unlike a plain `Vec` it only grows, and only through
/// [`Self::grow_generator`], so slot indices handed out once stay valid for the lifetime of the array.
pub struct SlotArray<T>(Vec<T>);

impl<T: Default> SlotArray<T> {
	pub fn new(count: u32) -> Self {
		Self::new_generator(count, |_| T::default())
	}
}

impl<T> SlotArray<T> {
	pub fn new_generator(count: u32, f: impl FnMut(u32) -> T) -> Self {
		Self((0..count).map(f).collect())
	}

	/// Grows the array to `new_count` slots, generating the new slots with `f`. Existing slots are moved, never
	/// dropped or regenerated.
	pub fn grow_generator(&mut self, new_count: u32, f: impl FnMut(u32) -> T) {
		let old_count = self.len();
		assert!(
			new_count >= old_count,
			"SlotArray may only grow, from {} to {}",
			old_count,
			new_count
		);
		self.0.reserve_exact((new_count - old_count) as usize);
		self.0.extend((old_count..new_count).map(f));
	}

	pub fn len(&self) -> u32 {
		self.0.len() as u32
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.0.iter()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
		self.0.iter_mut()
	}
}

impl<T> Index<u32> for SlotArray<T> {
	type Output = T;

	fn index(&self, index: u32) -> &Self::Output {
		self.0.index(index as usize)
	}
}

impl<T> IndexMut<u32> for SlotArray<T> {
	fn index_mut(&mut self, index: u32) -> &mut Self::Output {
		self.0.index_mut(index as usize)
	}
}
