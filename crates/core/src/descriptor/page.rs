use crate::descriptor::allocation::{CpuDescriptorHandle, DescriptorHeapAllocation, GpuDescriptorHandle};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};

/// A run of free descriptor slots within a page.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FreeBlock {
	pub offset: u32,
	pub size: u32,
}

/// Owns a fixed range of descriptor slots within one platform heap and hands out contiguous sub-ranges.
///
/// Free space is kept in two indices over the same blocks: by offset, to find neighbours to merge with on free, and by
/// size, to find the best fitting block on allocation. Adjacent free blocks are always merged, so the offset index
/// never contains two contiguous blocks.
pub struct DescriptorHeapPage {
	page_id: u32,
	capacity: u32,
	stride: u32,
	cpu_base: CpuDescriptorHandle,
	gpu_base: Option<GpuDescriptorHandle>,
	free_list: Mutex<FreeList>,
}

#[derive(Debug, Default)]
struct FreeList {
	by_offset: BTreeMap<u32, u32>,
	by_size: BTreeSet<(u32, u32)>,
	free_handles: u32,
}

impl FreeList {
	fn add_block(&mut self, offset: u32, size: u32) {
		self.by_offset.insert(offset, size);
		self.by_size.insert((size, offset));
	}

	fn remove_block(&mut self, offset: u32, size: u32) {
		self.by_offset.remove(&offset);
		self.by_size.remove(&(size, offset));
	}

	fn allocate(&mut self, count: u32) -> Option<u32> {
		if count == 0 || count > self.free_handles {
			return None;
		}
		// smallest block that fits, lowest offset on ties
		let (size, offset) = *self.by_size.range((count, 0)..).next()?;
		self.remove_block(offset, size);
		if size > count {
			self.add_block(offset + count, size - count);
		}
		self.free_handles -= count;
		Some(offset)
	}

	fn free(&mut self, mut offset: u32, mut size: u32) {
		let prev = self.by_offset.range(..offset).next_back().map(|(&o, &s)| (o, s));
		let next = self.by_offset.range(offset..).next().map(|(&o, &s)| (o, s));
		if let Some((prev_offset, prev_size)) = prev {
			debug_assert!(
				prev_offset + prev_size <= offset,
				"double free of descriptors {}..{}",
				offset,
				offset + size
			);
		}
		if let Some((next_offset, _)) = next {
			debug_assert!(
				offset + size <= next_offset,
				"double free of descriptors {}..{}",
				offset,
				offset + size
			);
		}

		self.free_handles += size;
		if let Some((prev_offset, prev_size)) = prev {
			if prev_offset + prev_size == offset {
				self.remove_block(prev_offset, prev_size);
				offset = prev_offset;
				size += prev_size;
			}
		}
		if let Some((next_offset, next_size)) = next {
			if offset + size == next_offset {
				self.remove_block(next_offset, next_size);
				size += next_size;
			}
		}
		self.add_block(offset, size);
	}
}

impl DescriptorHeapPage {
	/// Creates a page spanning `capacity` descriptors of `stride` bytes starting at `cpu_base`, and at `gpu_base` if
	/// the underlying heap is shader visible. All slots start out free.
	pub fn new(
		page_id: u32,
		cpu_base: CpuDescriptorHandle,
		gpu_base: Option<GpuDescriptorHandle>,
		capacity: u32,
		stride: u32,
	) -> Self {
		assert_ne!(stride, 0, "descriptor stride must not be 0");
		let mut free_list = FreeList::default();
		if capacity > 0 {
			free_list.add_block(0, capacity);
			free_list.free_handles = capacity;
		}
		Self {
			page_id,
			capacity,
			stride,
			cpu_base,
			gpu_base,
			free_list: Mutex::new(free_list),
		}
	}

	/// Allocates `count` contiguous descriptors from the smallest free block that fits. Returns `None` if `count` is 0
	/// or no block is large enough.
	pub fn allocate(&self, count: u32) -> Option<DescriptorHeapAllocation> {
		let offset = self.free_list.lock().allocate(count)?;
		Some(DescriptorHeapAllocation::new(
			self.page_id,
			self.cpu_base.offset(offset, self.stride),
			self.gpu_base.map(|gpu| gpu.offset(offset, self.stride)),
			count,
			self.stride,
		))
	}

	/// Returns the descriptors of `allocation` to this page, merging them with adjacent free blocks.
	///
	/// Foreign allocations are a logic error: they panic in debug builds and are ignored otherwise.
	pub fn free(&self, allocation: DescriptorHeapAllocation) {
		let offset = self.offset_in_page(&allocation);
		debug_assert!(
			offset.is_some(),
			"{:?} was not allocated from page {}",
			allocation,
			self.page_id
		);
		match offset {
			Some(offset) => self.free_list.lock().free(offset, allocation.count()),
			None => log::error!("Ignoring free of {:?}, not allocated from page {}", allocation, self.page_id),
		}
	}

	/// Offset of `allocation` within this page, `None` if it doesn't lie within this page.
	fn offset_in_page(&self, allocation: &DescriptorHeapAllocation) -> Option<u32> {
		if allocation.page_id() != self.page_id || allocation.stride() != self.stride {
			return None;
		}
		let bytes = allocation.cpu_base().0.checked_sub(self.cpu_base.0)?;
		let stride = self.stride as usize;
		if bytes % stride != 0 {
			return None;
		}
		let offset = u32::try_from(bytes / stride).ok()?;
		(offset as u64 + allocation.count() as u64 <= self.capacity as u64).then_some(offset)
	}

	/// Whether `allocation` lies within this page.
	pub fn contains(&self, allocation: &DescriptorHeapAllocation) -> bool {
		self.offset_in_page(allocation).is_some()
	}

	#[inline]
	pub fn page_id(&self) -> u32 {
		self.page_id
	}

	#[inline]
	pub fn capacity(&self) -> u32 {
		self.capacity
	}

	#[inline]
	pub fn stride(&self) -> u32 {
		self.stride
	}

	#[inline]
	pub fn cpu_base(&self) -> CpuDescriptorHandle {
		self.cpu_base
	}

	#[inline]
	pub fn gpu_base(&self) -> Option<GpuDescriptorHandle> {
		self.gpu_base
	}

	pub fn num_free_handles(&self) -> u32 {
		self.free_list.lock().free_handles
	}

	pub fn has_space(&self) -> bool {
		self.num_free_handles() > 0
	}

	/// Snapshot of all free blocks, ordered by offset.
	pub fn free_blocks(&self) -> Vec<FreeBlock> {
		self.free_list
			.lock()
			.by_offset
			.iter()
			.map(|(&offset, &size)| FreeBlock { offset, size })
			.collect()
	}
}

impl Debug for DescriptorHeapPage {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DescriptorHeapPage")
			.field("page_id", &self.page_id)
			.field("capacity", &self.capacity)
			.field("stride", &self.stride)
			.field("free", &self.num_free_handles())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rangemap::RangeSet;

	const STRIDE: u32 = 32;

	fn page(capacity: u32) -> DescriptorHeapPage {
		DescriptorHeapPage::new(
			7,
			CpuDescriptorHandle(0x1000),
			Some(GpuDescriptorHandle(0x10_0000)),
			capacity,
			STRIDE,
		)
	}

	#[test]
	fn allocate_computes_addresses() {
		let page = page(16);
		let a = page.allocate(4).unwrap();
		let b = page.allocate(2).unwrap();
		assert_eq!(a.cpu_base(), CpuDescriptorHandle(0x1000));
		assert_eq!(a.gpu_base(), Some(GpuDescriptorHandle(0x10_0000)));
		assert_eq!(b.cpu_base(), CpuDescriptorHandle(0x1000 + 4 * 32));
		assert_eq!(b.gpu_handle(1), Some(GpuDescriptorHandle(0x10_0000 + 5 * 32)));
		assert_eq!(b.page_id(), 7);
		assert_eq!(page.num_free_handles(), 10);
		page.free(a);
		page.free(b);
		assert_eq!(page.free_blocks(), [FreeBlock { offset: 0, size: 16 }]);
	}

	#[test]
	fn cpu_only_page_has_no_gpu_handles() {
		let page = DescriptorHeapPage::new(0, CpuDescriptorHandle(64), None, 4, 8);
		let a = page.allocate(1).unwrap();
		assert!(!a.is_shader_visible());
		assert_eq!(a.gpu_handle(0), None);
		page.free(a);
	}

	#[test]
	fn foreign_allocation_below_page_is_not_contained() {
		let page = page(8);
		let lower = DescriptorHeapPage::new(7, CpuDescriptorHandle(0x800), None, 8, STRIDE);
		let foreign = lower.allocate(2).unwrap();
		assert!(!page.contains(&foreign));
		let misaligned = DescriptorHeapPage::new(7, CpuDescriptorHandle(0x1001), None, 8, STRIDE);
		assert!(!page.contains(&misaligned.allocate(1).unwrap()));
		lower.free(foreign);
	}

	#[test]
	#[cfg_attr(debug_assertions, should_panic(expected = "was not allocated from page"))]
	fn free_of_foreign_allocation_is_ignored() {
		let page = page(8);
		let lower = DescriptorHeapPage::new(7, CpuDescriptorHandle(0x800), None, 8, STRIDE);
		page.free(lower.allocate(2).unwrap());
		assert_eq!(page.free_blocks(), [FreeBlock { offset: 0, size: 8 }]);
	}

	#[test]
	fn rejects_zero_and_oversized() {
		let page = page(8);
		assert_eq!(page.allocate(0), None);
		assert_eq!(page.allocate(9), None);
		let all = page.allocate(8).unwrap();
		assert_eq!(page.allocate(1), None);
		page.free(all);
	}

	#[test]
	fn best_fit_prefers_smallest_block() {
		let page = page(16);
		let a = page.allocate(4).unwrap();
		let b = page.allocate(2).unwrap();
		let c = page.allocate(4).unwrap();
		let d = page.allocate(6).unwrap();
		assert_eq!(page.num_free_handles(), 0);
		page.free(a);
		page.free(c);
		// free blocks: [0..4) and [6..10), both size 4, so the lowest offset wins
		let e = page.allocate(3).unwrap();
		assert_eq!(e.cpu_base(), CpuDescriptorHandle(0x1000));
		page.free(d);
		// free blocks: [3..4) size 1, [6..16) size 10
		let f = page.allocate(1).unwrap();
		assert_eq!(f.cpu_base(), CpuDescriptorHandle(0x1000 + 3 * STRIDE as usize));
		for x in [b, e, f] {
			page.free(x);
		}
		assert_eq!(page.free_blocks(), [FreeBlock { offset: 0, size: 16 }]);
	}

	#[test]
	fn fragmented_alloc_fails_despite_free_count() {
		let page = page(4);
		let a = page.allocate(1).unwrap();
		let b = page.allocate(1).unwrap();
		let c = page.allocate(1).unwrap();
		let d = page.allocate(1).unwrap();
		page.free(a);
		page.free(c);
		assert_eq!(page.num_free_handles(), 2);
		assert_eq!(page.allocate(2), None);
		page.free(b);
		assert_eq!(page.free_blocks(), [FreeBlock { offset: 0, size: 3 }]);
		let e = page.allocate(3).unwrap();
		page.free(d);
		page.free(e);
	}

	/// small deterministic xorshift, tests must not depend on a random seed
	struct XorShift(u64);

	impl XorShift {
		fn next(&mut self) -> u64 {
			self.0 ^= self.0 << 13;
			self.0 ^= self.0 >> 7;
			self.0 ^= self.0 << 17;
			self.0
		}

		fn below(&mut self, n: u64) -> u64 {
			self.next() % n
		}
	}

	fn assert_consistent(page: &DescriptorHeapPage, live: &[DescriptorHeapAllocation]) {
		let blocks = page.free_blocks();
		let mut oracle = RangeSet::new();
		for block in &blocks {
			oracle.insert(block.offset..block.offset + block.size);
		}
		// RangeSet merges touching ranges, equal counts mean no two free blocks are contiguous
		assert_eq!(oracle.iter().count(), blocks.len(), "uncoalesced free list {:?}", blocks);

		let free = blocks.iter().map(|b| b.size).sum::<u32>();
		assert_eq!(free, page.num_free_handles());
		let used = live.iter().map(|a| a.count()).sum::<u32>();
		assert_eq!(free + used, page.capacity());

		for allocation in live {
			let start = ((allocation.cpu_base().0 - page.cpu_base().0) / STRIDE as usize) as u32;
			assert!(
				!oracle.overlaps(&(start..start + allocation.count())),
				"live allocation {:?} overlaps free space",
				allocation
			);
		}
	}

	#[test]
	fn random_churn_stays_coalesced() {
		let page = page(512);
		let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
		let mut live = Vec::new();
		for _ in 0..4000 {
			if live.is_empty() || rng.below(3) != 0 {
				let count = rng.below(24) as u32 + 1;
				if let Some(allocation) = page.allocate(count) {
					live.push(allocation);
				}
			} else {
				let index = rng.below(live.len() as u64) as usize;
				page.free(live.swap_remove(index));
			}
			assert_consistent(&page, &live);
		}
		for allocation in live.drain(..) {
			page.free(allocation);
		}
		assert_eq!(page.free_blocks(), [FreeBlock { offset: 0, size: 512 }]);
	}

	#[test]
	fn concurrent_allocations_do_not_overlap() {
		let page = page(1024);
		let allocations = std::thread::scope(|s| {
			let handles = (0..8)
				.map(|_| {
					s.spawn(|| {
						let mut mine = Vec::new();
						for i in 0..32 {
							mine.push(page.allocate(i % 4 + 1).unwrap());
						}
						mine
					})
				})
				.collect::<Vec<_>>();
			handles.into_iter().flat_map(|h| h.join().unwrap()).collect::<Vec<_>>()
		});
		assert_consistent(&page, &allocations);
		for allocation in allocations {
			page.free(allocation);
		}
		assert_eq!(page.num_free_handles(), 1024);
	}
}
