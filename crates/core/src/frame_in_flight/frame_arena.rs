use bytemuck::Pod;
use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::fmt::{Debug, Display, Formatter};
use std::mem::{align_of, size_of};
use std::ptr::NonNull;
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: usize = 4 << 20;

/// Alignment of each page, allocations with a larger alignment are treated as oversized.
pub const PAGE_ALIGN: usize = 256;

#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
	(value + align - 1) & !(align - 1)
}

/// Position within a [`FrameArena`] to roll back to.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Marker {
	pub page_index: u32,
	pub byte_offset: usize,
}

#[derive(Error, Copy, Clone, Eq, PartialEq)]
pub enum FrameArenaError {
	#[error("Frame arena is out of its {reserved_pages} reserved pages of {page_size} bytes, requested {size} bytes")]
	OutOfReservedPages {
		size: usize,
		page_size: usize,
		reserved_pages: u32,
	},
	#[error("Alignment {0} is not a power of two")]
	InvalidAlignment(usize),
	#[error("Allocation size overflows usize")]
	SizeOverflow,
}

impl Debug for FrameArenaError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}

/// A bump allocator for data living at most one frame, or less when rolled back with a [`Marker`].
///
/// A budget of `reserve_size / page_size` pages is reserved up front, but pages are only allocated when first used and
/// then kept across [`Self::reset`], so a steady state frame does not allocate at all. Requests larger than a page get
/// a dedicated allocation that is freed on reset.
///
/// Allocation only needs `&self`, references handed out are bound to that borrow. Rewinding needs `&mut self` or an
/// `unsafe` call to [`Self::free_marker`].
pub struct FrameArena {
	page_size: usize,
	reserved_pages: u32,
	state: Mutex<ArenaState>,
}

struct ArenaState {
	pages: Vec<NonNull<u8>>,
	page_index: u32,
	byte_offset: usize,
	oversized: Vec<(NonNull<u8>, Layout)>,
}

// SAFETY: the pages are owned by the arena and only accessed through pointers handed out by allocate, which never
// overlap while live. All bookkeeping is behind the mutex.
unsafe impl Send for FrameArena {}
unsafe impl Sync for FrameArena {}

impl FrameArena {
	pub fn new(page_size: usize, reserve_size: usize) -> Self {
		assert_ne!(page_size, 0, "page_size must not be 0");
		let reserved_pages = (reserve_size / page_size).max(1).min(u32::MAX as usize) as u32;
		Self {
			page_size,
			reserved_pages,
			state: Mutex::new(ArenaState {
				pages: Vec::new(),
				page_index: 0,
				byte_offset: 0,
				oversized: Vec::new(),
			}),
		}
	}

	#[inline]
	fn page_layout(&self) -> Layout {
		// page_size is non-zero and PAGE_ALIGN a power of two, this can only fail on overflow which a reservation of
		// this size would have hit already
		match Layout::from_size_align(self.page_size, PAGE_ALIGN) {
			Ok(layout) => layout,
			Err(_) => handle_alloc_error(Layout::new::<u8>()),
		}
	}

	/// Allocates `size` bytes aligned to `alignment`. The memory is zeroed the first time a page is used, but reused
	/// memory is not cleared again.
	pub fn allocate(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, FrameArenaError> {
		if !alignment.is_power_of_two() {
			return Err(FrameArenaError::InvalidAlignment(alignment));
		}
		if size == 0 {
			// dangling but aligned
			return NonNull::new(std::ptr::null_mut::<u8>().wrapping_add(alignment)).ok_or(FrameArenaError::SizeOverflow);
		}

		let mut state = self.state.lock();
		if size > self.page_size || alignment > PAGE_ALIGN {
			log::warn!(
				"Frame arena allocation of {} bytes aligned to {} does not fit a page of {} bytes, allocating it separately",
				size,
				alignment,
				self.page_size
			);
			let layout = Layout::from_size_align(size, alignment).map_err(|_| FrameArenaError::SizeOverflow)?;
			// SAFETY: layout has a non-zero size
			let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).unwrap_or_else(|| handle_alloc_error(layout));
			state.oversized.push((ptr, layout));
			return Ok(ptr);
		}

		let rollback = (state.page_index, state.byte_offset);
		loop {
			if state.page_index as usize == state.pages.len() {
				if state.page_index >= self.reserved_pages {
					state.page_index = rollback.0;
					state.byte_offset = rollback.1;
					return Err(FrameArenaError::OutOfReservedPages {
						size,
						page_size: self.page_size,
						reserved_pages: self.reserved_pages,
					});
				}
				let layout = self.page_layout();
				// SAFETY: layout has a non-zero size
				let page = NonNull::new(unsafe { alloc_zeroed(layout) }).unwrap_or_else(|| handle_alloc_error(layout));
				state.pages.push(page);
				log::debug!("Frame arena committed page {}", state.pages.len());
			}

			let base = state.pages[state.page_index as usize];
			let base_addr = base.as_ptr() as usize;
			let start = align_up(base_addr + state.byte_offset, alignment) - base_addr;
			if start + size <= self.page_size {
				state.byte_offset = start + size;
				// SAFETY: start + size is within the page
				return Ok(unsafe { NonNull::new_unchecked(base.as_ptr().add(start)) });
			}
			state.page_index += 1;
			state.byte_offset = 0;
		}
	}

	#[allow(clippy::mut_from_ref)]
	pub fn alloc<T: Pod>(&self, value: T) -> Result<&mut T, FrameArenaError> {
		let ptr = self.allocate(size_of::<T>(), align_of::<T>())?.cast::<T>();
		// SAFETY: freshly allocated, aligned and exclusive to us for the lifetime of &self
		unsafe {
			ptr.as_ptr().write(value);
			Ok(&mut *ptr.as_ptr())
		}
	}

	#[allow(clippy::mut_from_ref)]
	pub fn alloc_slice_zeroed<T: Pod>(&self, len: usize) -> Result<&mut [T], FrameArenaError> {
		let size = size_of::<T>()
			.checked_mul(len)
			.ok_or(FrameArenaError::SizeOverflow)?;
		let ptr = self.allocate(size, align_of::<T>())?.cast::<T>();
		// SAFETY: see alloc, an all zero T is valid as T is Pod
		unsafe {
			ptr.as_ptr().write_bytes(0, len);
			Ok(std::slice::from_raw_parts_mut(ptr.as_ptr(), len))
		}
	}

	#[allow(clippy::mut_from_ref)]
	pub fn alloc_slice_copy<T: Pod>(&self, src: &[T]) -> Result<&mut [T], FrameArenaError> {
		let dst = self.alloc_slice_zeroed(src.len())?;
		dst.copy_from_slice(src);
		Ok(dst)
	}

	pub fn get_marker(&self) -> Marker {
		let state = self.state.lock();
		Marker {
			page_index: state.page_index,
			byte_offset: state.byte_offset,
		}
	}

	/// Rolls the arena back to `marker`, so the next allocation reuses the memory of everything allocated after it.
	///
	/// # Safety
	/// All allocations made after `marker` was taken must no longer be accessed.
	pub unsafe fn free_marker(&self, marker: Marker) {
		let mut state = self.state.lock();
		debug_assert!(
			marker <= Marker {
				page_index: state.page_index,
				byte_offset: state.byte_offset,
			},
			"marker {:?} lies after the current position",
			marker
		);
		state.page_index = marker.page_index;
		state.byte_offset = marker.byte_offset;
	}

	/// Opens a scope whose allocations are rolled back when it is dropped.
	pub fn scope(&mut self) -> ArenaScope<'_> {
		ArenaScope {
			marker: self.get_marker(),
			arena: self,
		}
	}

	/// Rewinds to the start of the first page, keeping all committed pages, and frees oversized allocations.
	pub fn reset(&mut self) {
		let state = self.state.get_mut();
		state.page_index = 0;
		state.byte_offset = 0;
		for (ptr, layout) in state.oversized.drain(..) {
			// SAFETY: allocated with this layout, and no references can be live as we have &mut self
			unsafe { dealloc(ptr.as_ptr(), layout) };
		}
	}

	pub fn committed_pages(&self) -> u32 {
		self.state.lock().pages.len() as u32
	}

	#[inline]
	pub fn page_size(&self) -> usize {
		self.page_size
	}

	#[inline]
	pub fn reserved_pages(&self) -> u32 {
		self.reserved_pages
	}
}

impl Debug for FrameArena {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FrameArena")
			.field("page_size", &self.page_size)
			.field("reserved_pages", &self.reserved_pages)
			.field("marker", &self.get_marker())
			.finish()
	}
}

impl Drop for FrameArena {
	fn drop(&mut self) {
		self.reset();
		let layout = self.page_layout();
		for page in self.state.get_mut().pages.drain(..) {
			// SAFETY: allocated with the page layout
			unsafe { dealloc(page.as_ptr(), layout) };
		}
	}
}

/// Allocations made through this scope are rolled back when it is dropped. Holding `&mut FrameArena` prevents
/// allocations outliving the scope from being made through the arena directly.
pub struct ArenaScope<'a> {
	arena: &'a mut FrameArena,
	marker: Marker,
}

impl ArenaScope<'_> {
	pub fn allocate(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, FrameArenaError> {
		self.arena.allocate(size, alignment)
	}

	#[allow(clippy::mut_from_ref)]
	pub fn alloc<T: Pod>(&self, value: T) -> Result<&mut T, FrameArenaError> {
		self.arena.alloc(value)
	}

	#[allow(clippy::mut_from_ref)]
	pub fn alloc_slice_zeroed<T: Pod>(&self, len: usize) -> Result<&mut [T], FrameArenaError> {
		self.arena.alloc_slice_zeroed(len)
	}

	#[allow(clippy::mut_from_ref)]
	pub fn alloc_slice_copy<T: Pod>(&self, src: &[T]) -> Result<&mut [T], FrameArenaError> {
		self.arena.alloc_slice_copy(src)
	}

	/// Opens a nested scope.
	pub fn scope(&mut self) -> ArenaScope<'_> {
		self.arena.scope()
	}

	pub fn marker(&self) -> Marker {
		self.marker
	}
}

impl Drop for ArenaScope<'_> {
	fn drop(&mut self) {
		// SAFETY: allocations made through this scope are bound to its lifetime
		unsafe { self.arena.free_marker(self.marker) };
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use static_assertions::assert_impl_all;

	assert_impl_all!(FrameArena: Send, Sync);

	#[test]
	fn marker_restores_position() -> anyhow::Result<()> {
		let arena = FrameArena::new(1024, 4096);
		arena.allocate(24, 8)?;
		let marker = arena.get_marker();
		let first = arena.allocate(100, 16)?;
		arena.allocate(300, 4)?;
		unsafe { arena.free_marker(marker) };
		assert_eq!(arena.get_marker(), marker);
		let again = arena.allocate(100, 16)?;
		assert_eq!(first, again);
		Ok(())
	}

	#[test]
	fn respects_alignment() -> anyhow::Result<()> {
		let arena = FrameArena::new(1024, 1024);
		arena.allocate(1, 1)?;
		for align in [2, 4, 8, 16, 64, 256] {
			let ptr = arena.allocate(3, align)?;
			assert_eq!(ptr.as_ptr() as usize % align, 0);
		}
		assert_eq!(arena.allocate(1, 3), Err(FrameArenaError::InvalidAlignment(3)));
		Ok(())
	}

	#[test]
	fn moves_to_next_page_and_runs_out() -> anyhow::Result<()> {
		let arena = FrameArena::new(256, 512);
		assert_eq!(arena.reserved_pages(), 2);
		assert_eq!(arena.committed_pages(), 0);
		arena.allocate(200, 1)?;
		assert_eq!(arena.committed_pages(), 1);
		arena.allocate(100, 1)?;
		assert_eq!(
			arena.get_marker(),
			Marker {
				page_index: 1,
				byte_offset: 100
			}
		);
		assert_eq!(arena.committed_pages(), 2);

		let before = arena.get_marker();
		assert!(matches!(
			arena.allocate(200, 1),
			Err(FrameArenaError::OutOfReservedPages { size: 200, .. })
		));
		// a failed allocation does not move the arena
		assert_eq!(arena.get_marker(), before);
		arena.allocate(156, 1)?;
		Ok(())
	}

	#[test]
	fn reset_keeps_pages_committed() -> anyhow::Result<()> {
		let mut arena = FrameArena::new(128, 1024);
		let first = arena.allocate(100, 8)?;
		arena.allocate(100, 8)?;
		arena.allocate(100, 8)?;
		assert_eq!(arena.committed_pages(), 3);
		arena.reset();
		assert_eq!(arena.get_marker(), Marker::default());
		assert_eq!(arena.committed_pages(), 3);
		assert_eq!(arena.allocate(100, 8)?, first);
		Ok(())
	}

	#[test]
	fn oversized_allocations_are_separate() -> anyhow::Result<()> {
		let mut arena = FrameArena::new(64, 64);
		let big = arena.alloc_slice_zeroed::<u32>(100)?;
		assert!(big.iter().all(|x| *x == 0));
		big[99] = 7;
		assert_eq!(arena.get_marker(), Marker::default());
		assert_eq!(arena.committed_pages(), 0);
		arena.reset();
		Ok(())
	}

	#[test]
	fn typed_allocations() -> anyhow::Result<()> {
		let mut arena = FrameArena::new(256, 256);
		let value = arena.alloc(0xDEAD_BEEF_u32)?;
		*value += 1;
		assert_eq!(*value, 0xDEAD_BEF0);

		let copy = arena.alloc_slice_copy(&[1.0f32, 2.0, 3.0])?;
		assert_eq!(copy, &[1.0, 2.0, 3.0]);

		arena.reset();
		// reused memory is cleared by alloc_slice_zeroed
		let zeroed = arena.alloc_slice_zeroed::<u64>(4)?;
		assert_eq!(zeroed, &[0; 4]);
		assert!(arena.alloc_slice_zeroed::<u64>(0)?.is_empty());
		Ok(())
	}

	#[test]
	fn scope_rolls_back_on_drop() -> anyhow::Result<()> {
		let mut arena = FrameArena::new(256, 256);
		arena.allocate(16, 1)?;
		let outer = arena.get_marker();
		{
			let mut scope = arena.scope();
			scope.alloc_slice_zeroed::<u8>(64)?;
			{
				let nested = scope.scope();
				nested.alloc(5u64)?;
			}
			assert_eq!(
				scope.arena.get_marker(),
				Marker {
					page_index: 0,
					byte_offset: 80
				}
			);
		}
		assert_eq!(arena.get_marker(), outer);
		Ok(())
	}
}
