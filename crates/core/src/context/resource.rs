use crate::backing::PoolError;
use crate::descriptor::{
	BindlessIndex, BindlessTable, CpuDescriptorHeap, DescriptorAllocationError, DescriptorHeapAllocation,
	DescriptorHeapType,
};
use crate::platform::GpuPlatform;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use thiserror::Error;

bitflags::bitflags! {
	/// Buffer usage specify how you may use a buffer. Missing flags are only validated during runtime.
	#[repr(transparent)]
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
	pub struct BufferUsage: u64 {
		/// Can be used as a source of transfer operations
		const TRANSFER_SRC = 0b1;
		/// Can be used as a destination of transfer operations
		const TRANSFER_DST = 0b10;
		/// Allows a buffer to be mapped into host memory. The mapping will optimize for reading from the device.
		const MAP_READ = 0b100;
		/// Allows a buffer to be mapped into host memory. The mapping will optimize for writing to the device.
		const MAP_WRITE = 0b1000;
		/// Can be used as uniform buffer
		const UNIFORM_BUFFER = 0b1_0000;
		/// Can be used as storage buffer
		const STORAGE_BUFFER = 0b10_0000;
		const INDEX_BUFFER = 0b100_0000;
		const VERTEX_BUFFER = 0b1000_0000;
		/// Can be the source of indirect parameters
		const INDIRECT_BUFFER = 0b1_0000_0000;
	}
}

impl BufferUsage {
	#[inline]
	pub fn is_mappable(&self) -> bool {
		self.intersects(BufferUsage::MAP_READ | BufferUsage::MAP_WRITE)
	}

	/// Whether shaders access the buffer through the bindless table.
	#[inline]
	pub fn is_shader_accessible(&self) -> bool {
		self.intersects(BufferUsage::UNIFORM_BUFFER | BufferUsage::STORAGE_BUFFER)
	}
}

bitflags::bitflags! {
	#[repr(transparent)]
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
	pub struct TextureUsage: u64 {
		const TRANSFER_SRC = 0b1;
		const TRANSFER_DST = 0b10;
		/// Can be sampled from with a sampler
		const SAMPLED = 0b100;
		/// Can be used as storage image
		const STORAGE = 0b1000;
		/// Can be used as framebuffer color attachment, gets a render target view
		const COLOR_ATTACHMENT = 0b1_0000;
		/// Can be used as framebuffer depth/stencil attachment, gets a depth stencil view
		const DEPTH_STENCIL_ATTACHMENT = 0b10_0000;
	}
}

impl TextureUsage {
	#[inline]
	pub fn is_shader_accessible(&self) -> bool {
		self.intersects(TextureUsage::SAMPLED | TextureUsage::STORAGE)
	}
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum TextureFormat {
	#[default]
	Rgba8Unorm,
	Rgba8Srgb,
	Bgra8Unorm,
	Bgra8Srgb,
	Rgba16Float,
	Rgba32Float,
	R32Float,
	D32Float,
	D24UnormS8Uint,
}

impl TextureFormat {
	pub fn is_depth(&self) -> bool {
		matches!(self, TextureFormat::D32Float | TextureFormat::D24UnormS8Uint)
	}

	pub fn block_size(&self) -> u32 {
		match self {
			TextureFormat::Rgba8Unorm
			| TextureFormat::Rgba8Srgb
			| TextureFormat::Bgra8Unorm
			| TextureFormat::Bgra8Srgb
			| TextureFormat::R32Float
			| TextureFormat::D32Float
			| TextureFormat::D24UnormS8Uint => 4,
			TextureFormat::Rgba16Float => 8,
			TextureFormat::Rgba32Float => 16,
		}
	}
}

#[derive(Copy, Clone, Debug, Default)]
pub struct BufferDesc<'a> {
	/// Name of the buffer, for tracking and debugging purposes
	pub name: &'a str,
	/// Size in bytes
	pub size: u64,
	pub usage: BufferUsage,
}

#[derive(Copy, Clone, Debug)]
pub struct TextureDesc<'a> {
	pub name: &'a str,
	/// width, height, depth
	pub extent: [u32; 3],
	pub format: TextureFormat,
	pub mip_levels: u32,
	pub array_layers: u32,
	pub usage: TextureUsage,
}

impl Default for TextureDesc<'_> {
	fn default() -> Self {
		Self {
			name: "",
			extent: [1, 1, 1],
			format: TextureFormat::default(),
			mip_levels: 1,
			array_layers: 1,
			usage: TextureUsage::default(),
		}
	}
}

/// Texel mixing mode when sampling between texels.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub enum Filter {
	#[default]
	Nearest,
	Linear,
}

/// How edges should be handled in texture addressing.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub enum AddressMode {
	#[default]
	ClampToEdge,
	Repeat,
	MirrorRepeat,
	ClampToBorder,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SamplerDesc<'a> {
	pub name: &'a str,
	pub mag_filter: Filter,
	pub min_filter: Filter,
	pub mipmap_mode: Filter,
	pub address_mode: AddressMode,
	pub max_anisotropy: Option<f32>,
}

impl BufferDesc<'_> {
	pub fn validate<P: GpuPlatform>(&self) -> Result<(), ResourceError<P>> {
		if self.usage.is_empty() {
			Err(ResourceError::NoUsageDeclared {
				name: self.name.to_string(),
			})
		} else if self.size == 0 {
			Err(ResourceError::ZeroSized {
				name: self.name.to_string(),
			})
		} else {
			Ok(())
		}
	}
}

impl TextureDesc<'_> {
	pub fn validate<P: GpuPlatform>(&self) -> Result<(), ResourceError<P>> {
		if self.usage.is_empty() {
			Err(ResourceError::NoUsageDeclared {
				name: self.name.to_string(),
			})
		} else if self.extent.contains(&0) || self.mip_levels == 0 || self.array_layers == 0 {
			Err(ResourceError::ZeroSized {
				name: self.name.to_string(),
			})
		} else if self.usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) != self.format.is_depth()
			&& self
				.usage
				.intersects(TextureUsage::DEPTH_STENCIL_ATTACHMENT | TextureUsage::COLOR_ATTACHMENT)
		{
			Err(ResourceError::AttachmentFormat {
				name: self.name.to_string(),
				format: self.format,
			})
		} else {
			Ok(())
		}
	}
}

#[derive(Error)]
pub enum ResourceError<P: GpuPlatform> {
	#[error("Platform Error: {0}")]
	Platform(#[source] P::PlatformError),
	#[error("Descriptor Allocation Error: {0}")]
	Descriptor(#[from] DescriptorAllocationError<P>),
	#[error("Pool Error: {0}")]
	Pool(#[from] PoolError),
	#[error("Bindless table of {heap:?} is full")]
	BindlessTableFull { heap: DescriptorHeapType },
	#[error("Resource {name} must have at least one usage declared")]
	NoUsageDeclared { name: String },
	#[error("Resource {name} must not be zero sized")]
	ZeroSized { name: String },
	#[error("Texture {name} with format {format:?} can't be used as this kind of attachment")]
	AttachmentFormat { name: String, format: TextureFormat },
}

impl<P: GpuPlatform> Debug for ResourceError<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}

/// Every descriptor heap and table a resource may hold descriptors in. Shared with deferred releases, which outlive the
/// borrow of the context that enqueued them.
pub struct ResourceHeaps<P: GpuPlatform> {
	pub platform: Arc<P>,
	cpu: [CpuDescriptorHeap<P>; 4],
	pub resource_table: BindlessTable<P>,
	pub sampler_table: BindlessTable<P>,
}

impl<P: GpuPlatform> ResourceHeaps<P> {
	pub(crate) fn new(
		platform: Arc<P>,
		cpu_page_size: u32,
		resource_table: BindlessTable<P>,
		sampler_table: BindlessTable<P>,
	) -> Self {
		let cpu = DescriptorHeapType::ALL.map(|ty| CpuDescriptorHeap::new(platform.clone(), ty, cpu_page_size));
		Self {
			platform,
			cpu,
			resource_table,
			sampler_table,
		}
	}

	#[inline]
	pub fn cpu_heap(&self, heap_type: DescriptorHeapType) -> &CpuDescriptorHeap<P> {
		&self.cpu[heap_type.to_usize()]
	}

	fn table(&self, heap_type: DescriptorHeapType) -> &BindlessTable<P> {
		match heap_type {
			DescriptorHeapType::Sampler => &self.sampler_table,
			_ => &self.resource_table,
		}
	}

	/// Allocates a CPU view and, if `bindless`, a slot in the matching bindless table.
	fn alloc_view(&self, heap_type: DescriptorHeapType, bindless: bool) -> Result<ResourceView, ResourceError<P>> {
		let cpu = self.cpu_heap(heap_type).allocate(1)?;
		let bindless = if bindless {
			match self.table(heap_type).allocate() {
				Some(index) => Some(index),
				None => {
					self.cpu_heap(heap_type).free(cpu);
					return Err(ResourceError::BindlessTableFull { heap: heap_type });
				}
			}
		} else {
			None
		};
		Ok(ResourceView {
			heap_type,
			cpu,
			bindless,
		})
	}

	fn free_view(&self, view: ResourceView) {
		self.cpu_heap(view.heap_type).free(view.cpu);
		if let Some(index) = view.bindless {
			self.table(view.heap_type).release(index);
		}
	}

	fn free_attachment_view(&self, heap_type: DescriptorHeapType, allocation: DescriptorHeapAllocation) {
		self.cpu_heap(heap_type).free(allocation);
	}
}

/// A single CPU descriptor plus the resource's slot in the bindless table, if it is shader accessible.
#[derive(Debug)]
pub struct ResourceView {
	heap_type: DescriptorHeapType,
	cpu: DescriptorHeapAllocation,
	bindless: Option<BindlessIndex>,
}

impl ResourceView {
	#[inline]
	pub fn cpu(&self) -> &DescriptorHeapAllocation {
		&self.cpu
	}

	#[inline]
	pub fn bindless(&self) -> Option<BindlessIndex> {
		self.bindless
	}

	#[inline]
	pub fn heap_type(&self) -> DescriptorHeapType {
		self.heap_type
	}
}

pub struct Buffer<P: GpuPlatform> {
	pub platform: P::Buffer,
	pub view: ResourceView,
	pub size: u64,
	pub usage: BufferUsage,
	pub debug_name: String,
}

pub struct Texture<P: GpuPlatform> {
	pub platform: P::Texture,
	pub view: ResourceView,
	pub render_target: Option<DescriptorHeapAllocation>,
	pub depth_stencil: Option<DescriptorHeapAllocation>,
	pub extent: [u32; 3],
	pub format: TextureFormat,
	pub mip_levels: u32,
	pub array_layers: u32,
	pub usage: TextureUsage,
	pub debug_name: String,
}

pub struct Sampler<P: GpuPlatform> {
	pub platform: P::Sampler,
	pub view: ResourceView,
	pub debug_name: String,
}

impl<P: GpuPlatform> Buffer<P> {
	pub(crate) fn create(heaps: &ResourceHeaps<P>, desc: &BufferDesc) -> Result<Self, ResourceError<P>> {
		desc.validate()?;
		let view = heaps.alloc_view(DescriptorHeapType::Resource, desc.usage.is_shader_accessible())?;
		// SAFETY: buffer is created on the platform it'll be destroyed on
		let platform = match unsafe { heaps.platform.create_buffer(desc) } {
			Ok(platform) => platform,
			Err(e) => {
				heaps.free_view(view);
				return Err(ResourceError::Platform(e));
			}
		};
		Ok(Self {
			platform,
			view,
			size: desc.size,
			usage: desc.usage,
			debug_name: desc.name.to_string(),
		})
	}

	/// # Safety
	/// The GPU must no longer reference this buffer or any of its descriptors.
	pub(crate) unsafe fn destroy(self, heaps: &ResourceHeaps<P>) {
		unsafe {
			heaps.platform.destroy_buffer(self.platform);
		}
		heaps.free_view(self.view);
	}
}

impl<P: GpuPlatform> Texture<P> {
	pub(crate) fn create(heaps: &ResourceHeaps<P>, desc: &TextureDesc) -> Result<Self, ResourceError<P>> {
		desc.validate()?;
		let view = heaps.alloc_view(DescriptorHeapType::Resource, desc.usage.is_shader_accessible())?;
		let mut render_target = None;
		let mut depth_stencil = None;
		let result = Self::create_with_attachments(heaps, desc, &mut render_target, &mut depth_stencil);
		match result {
			Ok(platform) => Ok(Self {
				platform,
				view,
				render_target,
				depth_stencil,
				extent: desc.extent,
				format: desc.format,
				mip_levels: desc.mip_levels,
				array_layers: desc.array_layers,
				usage: desc.usage,
				debug_name: desc.name.to_string(),
			}),
			Err(e) => {
				heaps.free_view(view);
				if let Some(rtv) = render_target {
					heaps.free_attachment_view(DescriptorHeapType::RenderTarget, rtv);
				}
				if let Some(dsv) = depth_stencil {
					heaps.free_attachment_view(DescriptorHeapType::DepthStencil, dsv);
				}
				Err(e)
			}
		}
	}

	fn create_with_attachments(
		heaps: &ResourceHeaps<P>,
		desc: &TextureDesc,
		render_target: &mut Option<DescriptorHeapAllocation>,
		depth_stencil: &mut Option<DescriptorHeapAllocation>,
	) -> Result<P::Texture, ResourceError<P>> {
		if desc.usage.contains(TextureUsage::COLOR_ATTACHMENT) {
			*render_target = Some(heaps.cpu_heap(DescriptorHeapType::RenderTarget).allocate(1)?);
		}
		if desc.usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
			*depth_stencil = Some(heaps.cpu_heap(DescriptorHeapType::DepthStencil).allocate(1)?);
		}
		// SAFETY: texture is created on the platform it'll be destroyed on
		unsafe { heaps.platform.create_texture(desc) }.map_err(ResourceError::Platform)
	}

	/// # Safety
	/// The GPU must no longer reference this texture or any of its descriptors.
	pub(crate) unsafe fn destroy(self, heaps: &ResourceHeaps<P>) {
		unsafe {
			heaps.platform.destroy_texture(self.platform);
		}
		heaps.free_view(self.view);
		if let Some(rtv) = self.render_target {
			heaps.free_attachment_view(DescriptorHeapType::RenderTarget, rtv);
		}
		if let Some(dsv) = self.depth_stencil {
			heaps.free_attachment_view(DescriptorHeapType::DepthStencil, dsv);
		}
	}
}

impl<P: GpuPlatform> Sampler<P> {
	pub(crate) fn create(heaps: &ResourceHeaps<P>, desc: &SamplerDesc) -> Result<Self, ResourceError<P>> {
		let view = heaps.alloc_view(DescriptorHeapType::Sampler, true)?;
		// SAFETY: sampler is created on the platform it'll be destroyed on
		let platform = match unsafe { heaps.platform.create_sampler(desc) } {
			Ok(platform) => platform,
			Err(e) => {
				heaps.free_view(view);
				return Err(ResourceError::Platform(e));
			}
		};
		Ok(Self {
			platform,
			view,
			debug_name: desc.name.to_string(),
		})
	}

	/// # Safety
	/// The GPU must no longer reference this sampler or its descriptors.
	pub(crate) unsafe fn destroy(self, heaps: &ResourceHeaps<P>) {
		unsafe {
			heaps.platform.destroy_sampler(self.platform);
		}
		heaps.free_view(self.view);
	}
}

impl<P: GpuPlatform> Debug for Buffer<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Buffer")
			.field("name", &self.debug_name)
			.field("size", &self.size)
			.field("usage", &self.usage)
			.field("bindless", &self.view.bindless)
			.finish()
	}
}

impl<P: GpuPlatform> Debug for Texture<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Texture")
			.field("name", &self.debug_name)
			.field("extent", &self.extent)
			.field("format", &self.format)
			.field("usage", &self.usage)
			.field("bindless", &self.view.bindless)
			.finish()
	}
}

impl<P: GpuPlatform> Debug for Sampler<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Sampler")
			.field("name", &self.debug_name)
			.field("bindless", &self.view.bindless)
			.finish()
	}
}
