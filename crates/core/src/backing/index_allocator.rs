use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};

const WORD_BITS: u32 = u64::BITS;

/// Allocates small integer indices out of a fixed capacity, backed by an occupancy bitset.
///
/// Allocation scans forward from a cursor and wraps around, releasing an index moves the cursor back to it if it is
/// lower, so freshly released low indices are preferred and the occupied set stays dense.
pub struct IndexAllocator {
	capacity: u32,
	inner: Mutex<IndexAllocatorInner>,
}

struct IndexAllocatorInner {
	occupied: Box<[u64]>,
	next_available: u32,
	allocated: u32,
}

impl IndexAllocatorInner {
	#[inline]
	fn get(&self, index: u32) -> bool {
		self.occupied[(index / WORD_BITS) as usize] & (1 << (index % WORD_BITS)) != 0
	}

	#[inline]
	fn set(&mut self, index: u32, value: bool) {
		let word = &mut self.occupied[(index / WORD_BITS) as usize];
		let bit = 1 << (index % WORD_BITS);
		if value {
			*word |= bit;
		} else {
			*word &= !bit;
		}
	}
}

impl IndexAllocator {
	pub fn new(capacity: u32) -> Self {
		Self {
			capacity,
			inner: Mutex::new(IndexAllocatorInner {
				occupied: vec![0; capacity.div_ceil(WORD_BITS) as usize].into_boxed_slice(),
				next_available: 0,
				allocated: 0,
			}),
		}
	}

	/// Allocates a free index, or returns `None` if every index is occupied.
	pub fn allocate(&self) -> Option<u32> {
		let mut inner = self.inner.lock();
		if inner.allocated == self.capacity {
			return None;
		}
		for i in 0..self.capacity {
			let index = (inner.next_available + i) % self.capacity;
			if !inner.get(index) {
				inner.set(index, true);
				inner.next_available = (index + 1) % self.capacity;
				inner.allocated += 1;
				return Some(index);
			}
		}
		None
	}

	/// Releases an index so it may be allocated again. Indices out of range are ignored.
	pub fn release(&self, index: u32) {
		if index >= self.capacity {
			return;
		}
		let mut inner = self.inner.lock();
		if inner.get(index) {
			inner.set(index, false);
			inner.allocated -= 1;
		}
		inner.next_available = inner.next_available.min(index);
	}

	pub fn is_allocated(&self, index: u32) -> bool {
		index < self.capacity && self.inner.lock().get(index)
	}

	#[inline]
	pub fn capacity(&self) -> u32 {
		self.capacity
	}

	pub fn allocated_count(&self) -> u32 {
		self.inner.lock().allocated
	}
}

impl Debug for IndexAllocator {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("IndexAllocator")
			.field("capacity", &self.capacity)
			.field("allocated", &self.allocated_count())
			.finish()
	}
}
