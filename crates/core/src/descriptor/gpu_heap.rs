use crate::descriptor::{
	DescriptorAllocationError, DescriptorHeapAllocation, DescriptorHeapPage, DescriptorHeapType, GpuDescriptorHandle,
};
use crate::platform::GpuPlatform;
use std::sync::Arc;

pub const STATIC_PAGE_ID: u32 = 0;
pub const DYNAMIC_PAGE_ID: u32 = 1;

/// A single fixed-size shader visible heap, split into a static region at the front for long-lived descriptors and a
/// dynamic region behind it that is handed out in chunks to per-frame [`DynamicSuballocator`]s.
///
/// [`DynamicSuballocator`]: crate::descriptor::DynamicSuballocator
pub struct GpuDescriptorHeap<P: GpuPlatform> {
	platform: Arc<P>,
	heap_type: DescriptorHeapType,
	heap: Option<P::DescriptorHeap>,
	static_page: DescriptorHeapPage,
	dynamic_page: DescriptorHeapPage,
}

impl<P: GpuPlatform> GpuDescriptorHeap<P> {
	pub fn new(
		platform: Arc<P>,
		heap_type: DescriptorHeapType,
		static_count: u32,
		dynamic_count: u32,
	) -> Result<Self, DescriptorAllocationError<P>> {
		assert!(
			heap_type.can_be_shader_visible(),
			"{:?} heaps cannot be shader visible",
			heap_type
		);
		let total = static_count
			.checked_add(dynamic_count)
			.ok_or(DescriptorAllocationError::OutOfDescriptors {
				heap: heap_type,
				requested: u32::MAX,
			})?;
		let stride = platform.descriptor_stride(heap_type);
		let heap = unsafe {
			platform
				.create_descriptor_heap(heap_type, total, true)
				.map_err(DescriptorAllocationError::Platform)?
		};
		let (cpu_base, gpu_base) = unsafe { platform.descriptor_heap_start(&heap) };
		let gpu_base = gpu_base.unwrap_or(GpuDescriptorHandle(0));
		let static_page = DescriptorHeapPage::new(STATIC_PAGE_ID, cpu_base, Some(gpu_base), static_count, stride);
		let dynamic_page = DescriptorHeapPage::new(
			DYNAMIC_PAGE_ID,
			cpu_base.offset(static_count, stride),
			Some(gpu_base.offset(static_count, stride)),
			dynamic_count,
			stride,
		);
		log::debug!(
			"Created shader visible {:?} heap with {} static and {} dynamic descriptors",
			heap_type,
			static_count,
			dynamic_count
		);
		Ok(Self {
			platform,
			heap_type,
			heap: Some(heap),
			static_page,
			dynamic_page,
		})
	}

	/// Allocates from the static region.
	pub fn allocate(&self, count: u32) -> Result<DescriptorHeapAllocation, DescriptorAllocationError<P>> {
		self.static_page
			.allocate(count)
			.ok_or(DescriptorAllocationError::OutOfDescriptors {
				heap: self.heap_type,
				requested: count,
			})
	}

	/// Allocates a chunk of the dynamic region, only to be used by [`DynamicSuballocator`].
	///
	/// [`DynamicSuballocator`]: crate::descriptor::DynamicSuballocator
	pub fn allocate_dynamic(&self, count: u32) -> Result<DescriptorHeapAllocation, DescriptorAllocationError<P>> {
		self.dynamic_page
			.allocate(count)
			.ok_or(DescriptorAllocationError::OutOfDescriptors {
				heap: self.heap_type,
				requested: count,
			})
	}

	/// Returns an allocation of either region.
	pub fn free(&self, allocation: DescriptorHeapAllocation) {
		match allocation.page_id() {
			STATIC_PAGE_ID => self.static_page.free(allocation),
			DYNAMIC_PAGE_ID => self.dynamic_page.free(allocation),
			_ => log::warn!("Ignoring free of {:?} from unknown page", allocation),
		}
	}

	#[inline]
	pub fn heap_type(&self) -> DescriptorHeapType {
		self.heap_type
	}

	/// The platform heap to bind for shader access.
	#[inline]
	pub fn heap(&self) -> Option<&P::DescriptorHeap> {
		self.heap.as_ref()
	}

	#[inline]
	pub fn static_page(&self) -> &DescriptorHeapPage {
		&self.static_page
	}

	#[inline]
	pub fn dynamic_page(&self) -> &DescriptorHeapPage {
		&self.dynamic_page
	}
}

impl<P: GpuPlatform> Drop for GpuDescriptorHeap<P> {
	fn drop(&mut self) {
		if let Some(heap) = self.heap.take() {
			unsafe { self.platform.destroy_descriptor_heap(heap) };
		}
	}
}
