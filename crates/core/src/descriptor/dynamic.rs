use crate::descriptor::{
	CpuDescriptorHandle, DescriptorAllocationError, DescriptorHeapAllocation, GpuDescriptorHandle, GpuDescriptorHeap,
};
use crate::platform::GpuPlatform;
use std::sync::Arc;

/// A range of descriptors within a chunk of a [`DynamicSuballocator`]. Only valid until the suballocator releases its
/// allocations, which happens when the frame it belongs to is reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DynamicAllocation {
	cpu_base: CpuDescriptorHandle,
	gpu_base: Option<GpuDescriptorHandle>,
	count: u32,
	stride: u32,
}

impl DynamicAllocation {
	#[inline]
	pub fn count(&self) -> u32 {
		self.count
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

	#[inline]
	pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
		assert!(index < self.count, "index {} out of bounds of {}", index, self.count);
		self.cpu_base.offset(index, self.stride)
	}

	#[inline]
	pub fn gpu_handle(&self, index: u32) -> Option<GpuDescriptorHandle> {
		assert!(index < self.count, "index {} out of bounds of {}", index, self.count);
		self.gpu_base.map(|gpu| gpu.offset(index, self.stride))
	}
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct DynamicSuballocatorStats {
	/// descriptors in chunks currently held
	pub current_chunk_total: u32,
	/// highest `current_chunk_total` ever reached
	pub peak_chunk_total: u32,
	/// largest single request ever made
	pub peak_request: u32,
	pub chunk_count: u32,
}

/// Bump allocates descriptor tables out of chunks of a [`GpuDescriptorHeap`]'s dynamic region. Individual allocations
/// are never freed, instead all chunks are returned in bulk with [`Self::release_allocations`] once the GPU is done
/// with the frame that used them.
pub struct DynamicSuballocator<P: GpuPlatform> {
	heap: Arc<GpuDescriptorHeap<P>>,
	chunk_size: u32,
	chunks: Vec<DescriptorHeapAllocation>,
	cursor: u32,
	stats: DynamicSuballocatorStats,
}

impl<P: GpuPlatform> DynamicSuballocator<P> {
	pub fn new(heap: Arc<GpuDescriptorHeap<P>>, chunk_size: u32) -> Self {
		Self {
			heap,
			chunk_size,
			chunks: Vec::new(),
			cursor: 0,
			stats: DynamicSuballocatorStats::default(),
		}
	}

	pub fn allocate(&mut self, count: u32) -> Result<DynamicAllocation, DescriptorAllocationError<P>> {
		let needs_chunk = match self.chunks.last() {
			None => true,
			Some(chunk) => self.cursor as u64 + count as u64 > chunk.count() as u64,
		};
		if needs_chunk {
			let chunk_count = count.max(self.chunk_size);
			let chunk = self.heap.allocate_dynamic(chunk_count).inspect_err(|_| {
				log::error!(
					"Dynamic {:?} descriptor region exhausted, failed to allocate chunk of {} descriptors",
					self.heap.heap_type(),
					chunk_count
				);
			})?;
			self.stats.current_chunk_total += chunk.count();
			self.stats.peak_chunk_total = self.stats.peak_chunk_total.max(self.stats.current_chunk_total);
			self.stats.chunk_count += 1;
			self.chunks.push(chunk);
			self.cursor = 0;
		}
		self.stats.peak_request = self.stats.peak_request.max(count);

		// just pushed or checked above
		let Some(chunk) = self.chunks.last() else {
			unreachable!()
		};
		let allocation = DynamicAllocation {
			cpu_base: chunk.cpu_base().offset(self.cursor, chunk.stride()),
			gpu_base: chunk.gpu_base().map(|gpu| gpu.offset(self.cursor, chunk.stride())),
			count,
			stride: chunk.stride(),
		};
		self.cursor += count;
		Ok(allocation)
	}

	/// Individual dynamic allocations are not freed, see [`Self::release_allocations`].
	#[inline]
	pub fn free(&mut self, _allocation: DynamicAllocation) {}

	/// Returns all chunks to the heap, invalidating every [`DynamicAllocation`] made so far.
	pub fn release_allocations(&mut self) {
		for chunk in self.chunks.drain(..) {
			self.heap.free(chunk);
		}
		self.cursor = 0;
		self.stats.current_chunk_total = 0;
		self.stats.chunk_count = 0;
	}

	#[inline]
	pub fn stats(&self) -> DynamicSuballocatorStats {
		self.stats
	}

	#[inline]
	pub fn heap(&self) -> &Arc<GpuDescriptorHeap<P>> {
		&self.heap
	}
}

impl<P: GpuPlatform> Drop for DynamicSuballocator<P> {
	fn drop(&mut self) {
		self.release_allocations();
	}
}
