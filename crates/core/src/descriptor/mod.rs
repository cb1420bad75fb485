//! Descriptor heap management: [`DescriptorHeapPage`]s carve contiguous ranges out of a platform heap,
//! [`CpuDescriptorHeap`] grows a list of them, [`GpuDescriptorHeap`] splits a single shader visible heap into a static
//! and a dynamic region, the latter consumed per frame by [`DynamicSuballocator`]s.

mod allocation;
mod bindless_table;
mod cpu_heap;
mod dynamic;
mod gpu_heap;
mod page;

pub use allocation::*;
pub use bindless_table::*;
pub use cpu_heap::*;
pub use dynamic::*;
pub use gpu_heap::*;
pub use page::*;

use crate::platform::GpuPlatform;
use bitflags::bitflags;
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum DescriptorHeapType {
	/// Buffer and texture views
	Resource,
	Sampler,
	RenderTarget,
	DepthStencil,
}

impl DescriptorHeapType {
	pub const ALL: [DescriptorHeapType; 4] = [
		DescriptorHeapType::Resource,
		DescriptorHeapType::Sampler,
		DescriptorHeapType::RenderTarget,
		DescriptorHeapType::DepthStencil,
	];

	/// Only resource and sampler heaps may be bound to shaders.
	#[inline]
	pub fn can_be_shader_visible(&self) -> bool {
		matches!(self, DescriptorHeapType::Resource | DescriptorHeapType::Sampler)
	}

	#[inline]
	pub fn to_usize(&self) -> usize {
		*self as usize
	}
}

bitflags! {
	#[repr(transparent)]
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
	pub struct DescriptorHeapFlags: u32 {
		const SHADER_VISIBLE = 0x1;
	}
}

#[derive(Error)]
pub enum DescriptorAllocationError<P: GpuPlatform> {
	#[error("Out of descriptors in {heap:?} heap, requested {requested}")]
	OutOfDescriptors { heap: DescriptorHeapType, requested: u32 },
	#[error("Platform Error: {0}")]
	Platform(#[source] P::PlatformError),
}

impl<P: GpuPlatform> Debug for DescriptorAllocationError<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}
