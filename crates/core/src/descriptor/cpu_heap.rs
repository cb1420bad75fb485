use crate::descriptor::{DescriptorAllocationError, DescriptorHeapAllocation, DescriptorHeapPage, DescriptorHeapType};
use crate::platform::GpuPlatform;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A growable pool of CPU-only descriptor pages, used for staging views before they are copied into shader visible
/// heaps, and for render target and depth stencil views which are never shader visible.
pub struct CpuDescriptorHeap<P: GpuPlatform> {
	platform: Arc<P>,
	heap_type: DescriptorHeapType,
	stride: u32,
	page_size: u32,
	inner: Mutex<CpuDescriptorHeapInner<P>>,
}

struct CpuDescriptorHeapInner<P: GpuPlatform> {
	pages: Vec<CpuDescriptorPage<P>>,
	/// indices of pages that have free descriptors
	available: BTreeSet<u32>,
}

struct CpuDescriptorPage<P: GpuPlatform> {
	heap: Option<P::DescriptorHeap>,
	page: DescriptorHeapPage,
}

impl<P: GpuPlatform> CpuDescriptorHeap<P> {
	/// Creates an empty heap, pages of at least `page_size` descriptors are created on demand.
	pub fn new(platform: Arc<P>, heap_type: DescriptorHeapType, page_size: u32) -> Self {
		let stride = platform.descriptor_stride(heap_type);
		Self {
			platform,
			heap_type,
			stride,
			page_size,
			inner: Mutex::new(CpuDescriptorHeapInner {
				pages: Vec::new(),
				available: BTreeSet::new(),
			}),
		}
	}

	pub fn allocate(&self, count: u32) -> Result<DescriptorHeapAllocation, DescriptorAllocationError<P>> {
		let out_of_descriptors = DescriptorAllocationError::OutOfDescriptors {
			heap: self.heap_type,
			requested: count,
		};
		if count == 0 {
			return Err(out_of_descriptors);
		}

		let mut inner = self.inner.lock();
		let inner = &mut *inner;
		let mut exhausted = Vec::new();
		let mut found = None;
		for &page_id in &inner.available {
			let page = &inner.pages[page_id as usize].page;
			if let Some(allocation) = page.allocate(count) {
				found = Some(allocation);
			}
			if !page.has_space() {
				exhausted.push(page_id);
			}
			if found.is_some() {
				break;
			}
		}
		for page_id in exhausted {
			inner.available.remove(&page_id);
		}
		if let Some(allocation) = found {
			return Ok(allocation);
		}

		let page_id = inner.pages.len() as u32;
		let capacity = self.page_size.max(count);
		let heap = unsafe {
			self.platform
				.create_descriptor_heap(self.heap_type, capacity, false)
				.map_err(DescriptorAllocationError::Platform)?
		};
		let (cpu_base, _) = unsafe { self.platform.descriptor_heap_start(&heap) };
		let page = DescriptorHeapPage::new(page_id, cpu_base, None, capacity, self.stride);
		log::debug!(
			"Created {:?} descriptor page {} with {} descriptors",
			self.heap_type,
			page_id,
			capacity
		);

		let allocation = page.allocate(count);
		if page.has_space() {
			inner.available.insert(page_id);
		}
		inner.pages.push(CpuDescriptorPage { heap: Some(heap), page });
		allocation.ok_or(out_of_descriptors)
	}

	/// Returns `allocation` to its page. Allocations of unknown pages are ignored.
	pub fn free(&self, allocation: DescriptorHeapAllocation) {
		let mut guard = self.inner.lock();
		let inner = &mut *guard;
		let page_id = allocation.page_id();
		match inner.pages.get(page_id as usize) {
			Some(page) => {
				page.page.free(allocation);
				inner.available.insert(page_id);
			}
			None => log::warn!("Ignoring free of {:?} from unknown page", allocation),
		}
	}

	#[inline]
	pub fn heap_type(&self) -> DescriptorHeapType {
		self.heap_type
	}

	#[inline]
	pub fn stride(&self) -> u32 {
		self.stride
	}

	pub fn page_count(&self) -> u32 {
		self.inner.lock().pages.len() as u32
	}

	pub fn num_free_handles(&self) -> u32 {
		self.inner
			.lock()
			.pages
			.iter()
			.map(|page| page.page.num_free_handles())
			.sum()
	}
}

impl<P: GpuPlatform> Drop for CpuDescriptorHeap<P> {
	fn drop(&mut self) {
		for page in self.inner.get_mut().pages.iter_mut() {
			if let Some(heap) = page.heap.take() {
				unsafe { self.platform.destroy_descriptor_heap(heap) };
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::platform::headless::Headless;

	#[test]
	fn creates_pages_on_demand() {
		let platform = Arc::new(Headless::default());
		let heap = CpuDescriptorHeap::new(platform.clone(), DescriptorHeapType::Resource, 8);
		assert_eq!(heap.page_count(), 0);

		let a = heap.allocate(6).unwrap();
		let b = heap.allocate(2).unwrap();
		assert_eq!((a.page_id(), b.page_id()), (0, 0));
		assert_eq!(heap.page_count(), 1);

		// first page is full, second is sized to the request
		let c = heap.allocate(20).unwrap();
		assert_eq!(c.page_id(), 1);
		assert_eq!(heap.num_free_handles(), 0);
		assert_eq!(platform.stats().descriptor_heaps, 2);

		heap.free(a);
		heap.free(b);
		heap.free(c);
		assert_eq!(heap.num_free_handles(), 28);
		drop(heap);
		assert_eq!(platform.stats().descriptor_heaps, 0);
	}

	#[test]
	fn freed_pages_are_reused() {
		let platform = Arc::new(Headless::default());
		let heap = CpuDescriptorHeap::new(platform, DescriptorHeapType::RenderTarget, 4);
		let a = heap.allocate(4).unwrap();
		heap.free(a);
		let b = heap.allocate(4).unwrap();
		assert_eq!(b.page_id(), 0);
		assert_eq!(heap.page_count(), 1);
		heap.free(b);
	}

	#[test]
	fn zero_count_fails() {
		let heap = CpuDescriptorHeap::new(Arc::new(Headless::default()), DescriptorHeapType::Sampler, 4);
		assert!(matches!(
			heap.allocate(0),
			Err(DescriptorAllocationError::OutOfDescriptors { requested: 0, .. })
		));
	}
}
