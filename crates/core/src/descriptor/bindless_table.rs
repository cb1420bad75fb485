use crate::backing::IndexAllocator;
use crate::descriptor::{
	CpuDescriptorHandle, DescriptorAllocationError, DescriptorHeapAllocation, GpuDescriptorHandle, GpuDescriptorHeap,
};
use crate::platform::GpuPlatform;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Index of a descriptor within a [`BindlessTable`], stable for the lifetime of the resource it was allocated for.
/// Shaders receive this index to access the resource.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct BindlessIndex(pub u32);

impl BindlessIndex {
	#[inline]
	pub fn to_u32(&self) -> u32 {
		self.0
	}
}

/// A fixed block within the static region of a [`GpuDescriptorHeap`] whose slots are handed out one at a time.
pub struct BindlessTable<P: GpuPlatform> {
	heap: Arc<GpuDescriptorHeap<P>>,
	block: Option<DescriptorHeapAllocation>,
	indices: IndexAllocator,
}

impl<P: GpuPlatform> BindlessTable<P> {
	pub fn new(heap: Arc<GpuDescriptorHeap<P>>, capacity: u32) -> Result<Self, DescriptorAllocationError<P>> {
		let block = if capacity > 0 {
			Some(heap.allocate(capacity)?)
		} else {
			None
		};
		Ok(Self {
			heap,
			block,
			indices: IndexAllocator::new(capacity),
		})
	}

	pub fn allocate(&self) -> Option<BindlessIndex> {
		self.indices.allocate().map(BindlessIndex)
	}

	pub fn release(&self, index: BindlessIndex) {
		self.indices.release(index.0);
	}

	/// `None` if `index` lies outside this table, e.g. when it came from another table.
	pub fn cpu_handle(&self, index: BindlessIndex) -> Option<CpuDescriptorHandle> {
		self.block_of(index).map(|block| block.cpu_handle(index.0))
	}

	pub fn gpu_handle(&self, index: BindlessIndex) -> Option<GpuDescriptorHandle> {
		self.block_of(index).and_then(|block| block.gpu_handle(index.0))
	}

	fn block_of(&self, index: BindlessIndex) -> Option<&DescriptorHeapAllocation> {
		self.block.as_ref().filter(|block| index.0 < block.count())
	}

	#[inline]
	pub fn capacity(&self) -> u32 {
		self.indices.capacity()
	}

	pub fn allocated_count(&self) -> u32 {
		self.indices.allocated_count()
	}

	#[inline]
	pub fn heap(&self) -> &Arc<GpuDescriptorHeap<P>> {
		&self.heap
	}
}

impl<P: GpuPlatform> Debug for BindlessTable<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BindlessTable")
			.field("heap", &self.heap.heap_type())
			.field("indices", &self.indices)
			.finish()
	}
}

impl<P: GpuPlatform> Drop for BindlessTable<P> {
	fn drop(&mut self) {
		if let Some(block) = self.block.take() {
			self.heap.free(block);
		}
	}
}
