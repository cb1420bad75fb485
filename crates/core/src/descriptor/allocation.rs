/// CPU address of a descriptor slot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle(pub usize);

/// GPU address of a descriptor slot within a shader visible heap.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
	#[inline]
	pub fn offset(self, index: u32, stride: u32) -> Self {
		Self(self.0 + index as usize * stride as usize)
	}
}

impl GpuDescriptorHandle {
	#[inline]
	pub fn offset(self, index: u32, stride: u32) -> Self {
		Self(self.0 + index as u64 * stride as u64)
	}
}

/// A contiguous range of descriptor slots handed out by a [`DescriptorHeapPage`]. Ownership of the slots stays with
/// the allocation until it is passed back to the heap it came from by value.
///
/// [`DescriptorHeapPage`]: crate::descriptor::DescriptorHeapPage
#[must_use = "descriptor allocations must be returned to the heap they were allocated from"]
#[derive(Debug, Eq, PartialEq)]
pub struct DescriptorHeapAllocation {
	page_id: u32,
	cpu_base: CpuDescriptorHandle,
	gpu_base: Option<GpuDescriptorHandle>,
	count: u32,
	stride: u32,
}

impl DescriptorHeapAllocation {
	#[inline]
	pub(crate) fn new(
		page_id: u32,
		cpu_base: CpuDescriptorHandle,
		gpu_base: Option<GpuDescriptorHandle>,
		count: u32,
		stride: u32,
	) -> Self {
		Self {
			page_id,
			cpu_base,
			gpu_base,
			count,
			stride,
		}
	}

	#[inline]
	pub fn page_id(&self) -> u32 {
		self.page_id
	}

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
	pub fn is_shader_visible(&self) -> bool {
		self.gpu_base.is_some()
	}

	/// CPU address of the `index`-th descriptor of this allocation.
	#[inline]
	pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
		assert!(index < self.count, "index {} out of bounds of {}", index, self.count);
		self.cpu_base.offset(index, self.stride)
	}

	/// GPU address of the `index`-th descriptor of this allocation, if it was allocated from a shader visible heap.
	#[inline]
	pub fn gpu_handle(&self, index: u32) -> Option<GpuDescriptorHandle> {
		assert!(index < self.count, "index {} out of bounds of {}", index, self.count);
		self.gpu_base.map(|gpu| gpu.offset(index, self.stride))
	}
}
