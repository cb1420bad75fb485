use crate::backing::handle::Handle;
use crate::backing::slot_array::SlotArray;
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

/// Capacity an empty growable pool grows to.
pub const DEFAULT_POOL_CAPACITY: u32 = 16;

/// Generation a slot starts out with. Generation 0 is reserved for [`Handle::INVALID`].
pub const FIRST_GENERATION: u32 = 1;

/// Once a slot's generation reaches this value it is retired and never handed out again.
pub const RETIRED_GENERATION: u32 = u32::MAX;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum PoolGrowth {
	/// Running out of slots is an error.
	#[default]
	Fixed,
	/// Running out of slots doubles the capacity.
	Doubling,
}

#[derive(Error, Copy, Clone, Eq, PartialEq)]
pub enum PoolError {
	#[error("Pool is out of slots at its fixed capacity of {capacity}")]
	CapacityExceeded { capacity: u32 },
}

impl Debug for PoolError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}

/// Owns a contiguous array of `T` and issues [`Handle`]s to them. Each slot carries a generation which is bumped
/// whenever its value is released, invalidating all handles issued for the previous value.
///
/// A slot moves through `Free -> Occupied -> Free -> ...` until its generation reaches [`RETIRED_GENERATION`], at which
/// point it is retired forever. Free slots are handed out last-released-first, starting with index 0.
///
/// All mutation goes through `&mut self`, so no `&T` can be held across [`Self::emplace`] growing the backing storage.
pub struct GenerationalHandlePool<T> {
	slots: SlotArray<Option<T>>,
	generations: SlotArray<u32>,
	free_list: Vec<u32>,
	len: u32,
	growth: PoolGrowth,
}

impl<T> GenerationalHandlePool<T> {
	pub fn new(capacity: u32, growth: PoolGrowth) -> Self {
		Self {
			slots: SlotArray::new_generator(capacity, |_| None),
			generations: SlotArray::new_generator(capacity, |_| FIRST_GENERATION),
			free_list: (0..capacity).rev().collect(),
			len: 0,
			growth,
		}
	}

	/// Moves `value` into a free slot and returns its handle, growing the pool if allowed.
	pub fn emplace(&mut self, value: T) -> Result<Handle<T>, PoolError> {
		self.reserve()?;
		let index = self.free_list.pop().ok_or(PoolError::CapacityExceeded {
			capacity: self.capacity(),
		})?;
		debug_assert!(self.slots[index].is_none(), "free slot {} is occupied", index);
		self.slots[index] = Some(value);
		self.len += 1;
		Ok(Handle::new(index, self.generations[index]))
	}

	/// Ensures the next [`Self::emplace`] succeeds, growing the pool if allowed. Lets callers keep ownership of a value
	/// that needs explicit destruction when the pool is full.
	pub fn reserve(&mut self) -> Result<(), PoolError> {
		if self.free_list.is_empty() {
			self.grow()?;
		}
		Ok(())
	}

	#[inline]
	pub fn insert(&mut self, value: T) -> Result<Handle<T>, PoolError> {
		self.emplace(value)
	}

	fn grow(&mut self) -> Result<(), PoolError> {
		let old_capacity = self.capacity();
		let exceeded = PoolError::CapacityExceeded {
			capacity: old_capacity,
		};
		let new_capacity = match self.growth {
			PoolGrowth::Fixed => return Err(exceeded),
			PoolGrowth::Doubling if old_capacity == 0 => DEFAULT_POOL_CAPACITY,
			PoolGrowth::Doubling => old_capacity.checked_mul(2).ok_or(exceeded)?,
		};
		self.slots.grow_generator(new_capacity, |_| None);
		self.generations.grow_generator(new_capacity, |_| FIRST_GENERATION);
		self.free_list.clear();
		self.free_list.extend((old_capacity..new_capacity).rev());
		log::debug!(
			"Growing pool of {} from {} to {} slots",
			std::any::type_name::<T>(),
			old_capacity,
			new_capacity
		);
		Ok(())
	}

	/// Whether `handle` refers to a live value of this pool.
	#[inline]
	pub fn contains(&self, handle: Handle<T>) -> bool {
		handle.index() < self.slots.len()
			&& handle.is_valid()
			&& self.generations[handle.index()] == handle.generation()
			&& self.slots[handle.index()].is_some()
	}

	#[inline]
	pub fn get(&self, handle: Handle<T>) -> Option<&T> {
		if self.contains(handle) {
			self.slots[handle.index()].as_ref()
		} else {
			None
		}
	}

	#[inline]
	pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
		if self.contains(handle) {
			self.slots[handle.index()].as_mut()
		} else {
			None
		}
	}

	/// Takes the value out of its slot and invalidates `handle`. Stale handles return `None` and have no effect.
	pub fn release(&mut self, handle: Handle<T>) -> Option<T> {
		if !self.contains(handle) {
			return None;
		}
		Some(self.release_index(handle.index()))
	}

	fn release_index(&mut self, index: u32) -> T {
		let value = self.slots[index].take();
		let generation = &mut self.generations[index];
		*generation += 1;
		if *generation == RETIRED_GENERATION {
			log::debug!(
				"Retiring slot {} of pool of {}, its generation is exhausted",
				index,
				std::any::type_name::<T>()
			);
		} else {
			self.free_list.push(index);
		}
		self.len -= 1;
		// callers only pass occupied slots
		match value {
			Some(value) => value,
			None => unreachable!("released slot {} was not occupied", index),
		}
	}

	/// Releases every live value, handing them out in index order. Used for teardown.
	pub fn drain(&mut self) -> Vec<(Handle<T>, T)> {
		let live = (0..self.slots.len())
			.filter(|&i| self.slots[i].is_some())
			.collect::<Vec<_>>();
		live.into_iter()
			.map(|i| {
				let handle = Handle::new(i, self.generations[i]);
				(handle, self.release_index(i))
			})
			.collect()
	}

	/// Iterates all live values with their handles in index order.
	pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
		self.slots
			.iter()
			.zip(self.generations.iter())
			.enumerate()
			.filter_map(|(i, (slot, generation))| slot.as_ref().map(|value| (Handle::new(i as u32, *generation), value)))
	}

	#[inline]
	pub fn len(&self) -> u32 {
		self.len
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	#[inline]
	pub fn capacity(&self) -> u32 {
		self.slots.len()
	}

	#[inline]
	pub fn growth(&self) -> PoolGrowth {
		self.growth
	}
}

impl<T> Default for GenerationalHandlePool<T> {
	fn default() -> Self {
		Self::new(0, PoolGrowth::Doubling)
	}
}

impl<T> Debug for GenerationalHandlePool<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GenerationalHandlePool")
			.field("type", &std::any::type_name::<T>())
			.field("len", &self.len)
			.field("capacity", &self.capacity())
			.field("growth", &self.growth)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[test]
	fn fixed_capacity_exceeded() {
		let mut pool = GenerationalHandlePool::new(2, PoolGrowth::Fixed);
		let h0 = pool.emplace("a").unwrap();
		let h1 = pool.emplace("b").unwrap();
		assert_eq!((h0.index(), h1.index()), (0, 1));
		assert_eq!(pool.emplace("c"), Err(PoolError::CapacityExceeded { capacity: 2 }));

		assert_eq!(pool.release(h0), Some("a"));
		let h2 = pool.emplace("c").unwrap();
		assert_eq!(h2.index(), 0);
		assert_eq!(h2.generation(), h0.generation() + 1);
		assert_eq!(pool.get(h0), None);
		assert_eq!(pool.get(h2), Some(&"c"));
		assert_eq!(pool.get(h1), Some(&"b"));
	}

	#[test]
	fn stale_release_has_no_effect() {
		let mut pool = GenerationalHandlePool::new(4, PoolGrowth::Fixed);
		let h0 = pool.emplace(1).unwrap();
		assert_eq!(pool.release(h0), Some(1));
		assert_eq!(pool.release(h0), None);
		assert_eq!(pool.release(Handle::INVALID), None);
		assert_eq!(pool.release(Handle::new(17, 1)), None);
		assert_eq!(pool.len(), 0);

		// the freed slot must only be in the free list once
		let a = pool.emplace(2).unwrap();
		let b = pool.emplace(3).unwrap();
		assert_ne!(a.index(), b.index());
	}

	#[test]
	fn default_handle_never_resolves() {
		let mut pool = GenerationalHandlePool::new(1, PoolGrowth::Fixed);
		let h = pool.emplace(5).unwrap();
		assert_eq!(h.index(), 0);
		assert_eq!(pool.get(Handle::default()), None);
		assert!(!pool.contains(Handle::INVALID));
	}

	#[test]
	fn free_list_is_lifo() {
		let mut pool = GenerationalHandlePool::new(4, PoolGrowth::Fixed);
		let handles = (0..4).map(|i| pool.emplace(i).unwrap()).collect::<Vec<_>>();
		pool.release(handles[1]);
		pool.release(handles[3]);
		assert_eq!(pool.emplace(10).unwrap().index(), 3);
		assert_eq!(pool.emplace(11).unwrap().index(), 1);
	}

	#[test]
	fn doubling_growth_keeps_live_values() {
		let mut pool = GenerationalHandlePool::default();
		assert_eq!(pool.capacity(), 0);
		let first = pool.emplace(0).unwrap();
		assert_eq!(pool.capacity(), DEFAULT_POOL_CAPACITY);

		let handles = (1..=DEFAULT_POOL_CAPACITY)
			.map(|i| pool.emplace(i).unwrap())
			.collect::<Vec<_>>();
		assert_eq!(pool.capacity(), DEFAULT_POOL_CAPACITY * 2);
		assert_eq!(pool.len(), DEFAULT_POOL_CAPACITY + 1);
		assert_eq!(pool.get(first), Some(&0));
		for (i, h) in handles.iter().enumerate() {
			assert_eq!(pool.get(*h), Some(&(i as u32 + 1)));
		}
		// new slots are drawn in ascending order
		assert_eq!(handles.last().unwrap().index(), DEFAULT_POOL_CAPACITY);
	}

	#[test]
	fn release_drops_value() {
		let rc = Arc::new(());
		let mut pool = GenerationalHandlePool::new(2, PoolGrowth::Fixed);
		let h = pool.emplace(rc.clone()).unwrap();
		assert_eq!(Arc::strong_count(&rc), 2);
		drop(pool.release(h));
		assert_eq!(Arc::strong_count(&rc), 1);
	}

	#[test]
	fn exhausted_generation_retires_slot() {
		let mut pool = GenerationalHandlePool::new(2, PoolGrowth::Fixed);
		pool.generations[0] = RETIRED_GENERATION - 1;
		let h = pool.emplace(1).unwrap();
		assert_eq!(h.index(), 0);
		assert_eq!(h.generation(), RETIRED_GENERATION - 1);
		assert_eq!(pool.release(h), Some(1));

		assert_eq!(pool.emplace(2).unwrap().index(), 1);
		assert_eq!(pool.emplace(3), Err(PoolError::CapacityExceeded { capacity: 2 }));
		assert!(!pool.contains(Handle::new(0, RETIRED_GENERATION)));
	}

	#[test]
	fn iter_and_drain() {
		let mut pool = GenerationalHandlePool::new(4, PoolGrowth::Fixed);
		let a = pool.emplace('a').unwrap();
		let b = pool.emplace('b').unwrap();
		let c = pool.emplace('c').unwrap();
		pool.release(b);
		assert_eq!(pool.iter().collect::<Vec<_>>(), [(a, &'a'), (c, &'c')]);

		let drained = pool.drain();
		assert_eq!(drained, [(a, 'a'), (c, 'c')]);
		assert!(pool.is_empty());
		assert_eq!(pool.get(a), None);
		assert_eq!(pool.get(c), None);
	}

	#[test]
	fn get_mut_modifies_in_place() {
		let mut pool = GenerationalHandlePool::new(1, PoolGrowth::Fixed);
		let h = pool.insert(String::from("hello")).unwrap();
		pool.get_mut(h).unwrap().push_str(" world");
		assert_eq!(pool.get(h).map(String::as_str), Some("hello world"));
	}
}
