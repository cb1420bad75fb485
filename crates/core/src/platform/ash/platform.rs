use crate::context::{BufferDesc, SamplerDesc, TextureDesc};
use crate::descriptor::{CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle};
use crate::execution::{FenceWaitError, QueueType};
use crate::platform::ash::{
	create_timeline_semaphore, texture_extent, texture_image_type, texture_view_type, AshCommandAllocator,
	AshCommandList, AshDescriptorHeap, DescriptorStrides,
};
use crate::platform::GpuPlatform;
use ash::ext::{debug_utils, descriptor_buffer};
use ash::prelude::VkResult;
use ash::vk::{
	CommandBufferSubmitInfo, CommandPool, CommandPoolCreateFlags, CommandPoolCreateInfo, CommandPoolResetFlags,
	ComponentMapping, DebugUtilsObjectNameInfoEXT, Handle, ImageLayout, ImageSubresourceRange, ImageTiling,
	ImageViewCreateInfo, PipelineStageFlags2, SamplerCreateInfo, SemaphoreSubmitInfo, SemaphoreWaitInfo, SharingMode,
	SubmitInfo2, LOD_CLAMP_NONE,
};
use crossbeam_queue::SegQueue;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::{AllocationError, MemoryLocation};
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use static_assertions::assert_impl_all;
use std::cell::UnsafeCell;
use std::ffi::CString;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::time::Duration;
use thiserror::Error;

pub struct Ash {
	pub create_info: AshCreateInfo,
	pub strides: DescriptorStrides,
	/// command pools of destroyed allocators, already reset and ready for reuse
	free_command_pools: SegQueue<CommandPool>,
}
assert_impl_all!(Ash: Send, Sync);

impl Ash {
	pub fn new(create_info: AshCreateInfo) -> VkResult<Self> {
		let strides = DescriptorStrides::query(&create_info);
		log::debug!("Descriptor strides: {:?}", strides);
		Ok(Ash {
			create_info,
			strides,
			free_command_pools: SegQueue::new(),
		})
	}

	pub unsafe fn set_debug_object_name(&self, handle: impl Handle, name: &str) -> VkResult<()> {
		unsafe {
			if let Some(debug_marker) = self.extensions.debug_utils.as_ref() {
				// names with interior nul bytes are not worth failing over
				if let Ok(name) = CString::new(name) {
					debug_marker.set_debug_utils_object_name(
						&DebugUtilsObjectNameInfoEXT::default()
							.object_handle(handle)
							.object_name(&name),
					)?;
				}
			}
			Ok(())
		}
	}

	/// Names a freshly created object. Failing to name it is logged instead of failing the creation, so the caller
	/// never has to unwind the object just created.
	pub(crate) unsafe fn name_created_object(&self, handle: impl Handle, name: &str) {
		unsafe {
			if let Err(e) = self.set_debug_object_name(handle, name) {
				log::warn!("Failed to set debug name {:?}: {}", name, e);
			}
		}
	}

	fn create_command_pool(&self) -> VkResult<CommandPool> {
		if let Some(pool) = self.free_command_pools.pop() {
			return Ok(pool);
		}
		unsafe {
			self.device.create_command_pool(
				&CommandPoolCreateInfo::default()
					.flags(CommandPoolCreateFlags::TRANSIENT)
					.queue_family_index(self.queue_family_index),
				None,
			)
		}
	}

	unsafe fn submit(&self, command_buffers: &[CommandBufferSubmitInfo], signal: &[SemaphoreSubmitInfo]) {
		unsafe {
			let queue = self.queue.lock();
			let result = self.device.queue_submit2(
				*queue,
				&[SubmitInfo2::default()
					.command_buffer_infos(command_buffers)
					.signal_semaphore_infos(signal)],
				ash::vk::Fence::null(),
			);
			// a failed submission loses the device, which the next fence wait reports
			if let Err(e) = result {
				log::error!("vkQueueSubmit2 failed: {}", e);
			}
		}
	}

	unsafe fn free_allocation(&self, allocation: &AshMemoryAllocation) {
		if let Some(allocation) = allocation.take() {
			if let Err(e) = self.memory_allocator().free(allocation) {
				log::error!("Failed to free memory allocation: {}", e);
			}
		}
	}
}

impl Deref for Ash {
	type Target = AshCreateInfo;

	fn deref(&self) -> &Self::Target {
		&self.create_info
	}
}

impl Drop for Ash {
	fn drop(&mut self) {
		unsafe {
			if let Err(e) = self.device.device_wait_idle() {
				log::error!("Failed to idle device on shutdown: {}", e);
			}
			while let Some(pool) = self.free_command_pools.pop() {
				self.device.destroy_command_pool(pool, None);
			}
		}
	}
}

pub struct AshCreateInfo {
	pub entry: ash::Entry,
	pub instance: ash::Instance,
	pub physical_device: ash::vk::PhysicalDevice,
	pub device: ash::Device,
	pub memory_allocator: Option<Mutex<Allocator>>,
	pub queue_family_index: u32,
	/// all [`QueueType`]s submit to this queue
	pub queue: Mutex<ash::vk::Queue>,
	pub extensions: AshExtensions,
	pub destroy: Option<AshDestroyFn>,
}

pub type AshDestroyFn = Box<dyn FnOnce(&mut AshCreateInfo) + Send + Sync>;

#[derive(Default)]
#[non_exhaustive]
pub struct AshExtensions {
	pub debug_utils: Option<debug_utils::Device>,
	pub descriptor_buffer: Option<descriptor_buffer::Device>,
}

impl AshCreateInfo {
	pub fn memory_allocator(&self) -> MutexGuard<'_, Allocator> {
		match self.memory_allocator.as_ref() {
			Some(allocator) => allocator.lock(),
			None => unreachable!("memory allocator is only taken on drop"),
		}
	}
}

impl Drop for AshCreateInfo {
	fn drop(&mut self) {
		if let Some(destroy) = self.destroy.take() {
			destroy(self);
		}
	}
}

/// Wraps gpu-allocator's Allocation to be able to [`Option::take`] it when destroying the owning object.
#[derive(Debug)]
pub struct AshMemoryAllocation(UnsafeCell<Option<Allocation>>);

impl AshMemoryAllocation {
	/// # Safety
	/// You must [`Self::take`] the Allocation and free it manually before dropping self
	pub unsafe fn new(allocation: Allocation) -> Self {
		Self(UnsafeCell::new(Some(allocation)))
	}

	pub fn mapped_ptr(&self) -> Option<std::ptr::NonNull<std::ffi::c_void>> {
		unsafe { (*self.0.get()).as_ref().and_then(Allocation::mapped_ptr) }
	}

	pub fn take(&self) -> Option<Allocation> {
		unsafe { (*self.0.get()).take() }
	}
}

/// Safety: only ever taken once while destroying the owning object, which requires exclusive access
unsafe impl Send for AshMemoryAllocation {}
unsafe impl Sync for AshMemoryAllocation {}

pub struct AshBuffer {
	pub buffer: ash::vk::Buffer,
	pub allocation: AshMemoryAllocation,
}

pub struct AshImage {
	pub image: ash::vk::Image,
	pub image_view: ash::vk::ImageView,
	pub allocation: AshMemoryAllocation,
}

/// All [`QueueType`]s share the device's single queue, this only remembers which one it was created as.
#[derive(Copy, Clone, Debug)]
pub struct AshQueue {
	pub queue_type: QueueType,
}

#[derive(Debug)]
pub struct AshFence {
	pub semaphore: ash::vk::Semaphore,
}

#[derive(Error)]
pub enum AshError {
	#[error("VkResult: {0}")]
	Vk(#[from] ash::vk::Result),
	#[error("gpu-allocator Error: {0}")]
	Allocation(#[from] AllocationError),
}

impl Debug for AshError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}

unsafe impl GpuPlatform for Ash {
	type Queue = AshQueue;
	type Fence = AshFence;
	type CommandAllocator = AshCommandAllocator;
	type CommandList = AshCommandList;
	type DescriptorHeap = AshDescriptorHeap;
	type Buffer = AshBuffer;
	type Texture = AshImage;
	type Sampler = ash::vk::Sampler;
	type PlatformError = AshError;

	unsafe fn create_queue(&self, queue_type: QueueType) -> Result<Self::Queue, Self::PlatformError> {
		Ok(AshQueue { queue_type })
	}

	unsafe fn destroy_queue(&self, _queue: Self::Queue) {}

	unsafe fn create_fence(&self, initial_value: u64) -> Result<Self::Fence, Self::PlatformError> {
		Ok(AshFence {
			semaphore: create_timeline_semaphore(&self.device, initial_value)?,
		})
	}

	unsafe fn destroy_fence(&self, fence: Self::Fence) {
		unsafe {
			self.device.destroy_semaphore(fence.semaphore, None);
		}
	}

	unsafe fn fence_completed_value(&self, fence: &Self::Fence) -> u64 {
		unsafe {
			self.device
				.get_semaphore_counter_value(fence.semaphore)
				.unwrap_or_else(|e| {
					log::error!("vkGetSemaphoreCounterValue failed: {}", e);
					0
				})
		}
	}

	unsafe fn signal_fence(&self, _queue: &Self::Queue, fence: &Self::Fence, value: u64) {
		unsafe {
			self.submit(
				&[],
				&[SemaphoreSubmitInfo::default()
					.semaphore(fence.semaphore)
					.value(value)
					.stage_mask(PipelineStageFlags2::ALL_COMMANDS)],
			);
		}
	}

	unsafe fn wait_fence(
		&self,
		fence: &Self::Fence,
		value: u64,
		timeout: Option<Duration>,
	) -> Result<(), FenceWaitError> {
		unsafe {
			let timeout = timeout.map_or(u64::MAX, |timeout| timeout.as_nanos().min(u64::MAX as u128) as u64);
			let result = self.device.wait_semaphores(
				&SemaphoreWaitInfo::default()
					.semaphores(&[fence.semaphore])
					.values(&[value]),
				timeout,
			);
			match result {
				Ok(()) => Ok(()),
				Err(ash::vk::Result::TIMEOUT) => Err(FenceWaitError::Timeout { value }),
				Err(e) => {
					log::error!("vkWaitSemaphores failed: {}", e);
					Err(FenceWaitError::DeviceLost { value })
				}
			}
		}
	}

	unsafe fn execute_command_lists(&self, _queue: &Self::Queue, command_lists: &[Self::CommandList]) {
		unsafe {
			let infos = command_lists
				.iter()
				.map(|list| CommandBufferSubmitInfo::default().command_buffer(list.command_buffer))
				.collect::<SmallVec<[_; 4]>>();
			self.submit(&infos, &[]);
		}
	}

	unsafe fn create_command_allocator(
		&self,
		queue_type: QueueType,
	) -> Result<Self::CommandAllocator, Self::PlatformError> {
		Ok(AshCommandAllocator::new(self.create_command_pool()?, queue_type))
	}

	unsafe fn reset_command_allocator(&self, allocator: &mut Self::CommandAllocator) -> Result<(), Self::PlatformError> {
		unsafe {
			self.device
				.reset_command_pool(allocator.command_pool, CommandPoolResetFlags::empty())?;
			allocator.recycle();
			Ok(())
		}
	}

	unsafe fn destroy_command_allocator(&self, allocator: Self::CommandAllocator) {
		unsafe {
			let pool = allocator.into_command_pool(&self.device);
			match self.device.reset_command_pool(pool, CommandPoolResetFlags::empty()) {
				Ok(()) => self.free_command_pools.push(pool),
				Err(_) => self.device.destroy_command_pool(pool, None),
			}
		}
	}

	unsafe fn create_descriptor_heap(
		&self,
		heap_type: DescriptorHeapType,
		count: u32,
		shader_visible: bool,
	) -> Result<Self::DescriptorHeap, Self::PlatformError> {
		unsafe { AshDescriptorHeap::new(self, heap_type, count, shader_visible) }
	}

	unsafe fn descriptor_heap_start(
		&self,
		heap: &Self::DescriptorHeap,
	) -> (CpuDescriptorHandle, Option<GpuDescriptorHandle>) {
		heap.start()
	}

	unsafe fn destroy_descriptor_heap(&self, heap: Self::DescriptorHeap) {
		unsafe { heap.destroy(self) }
	}

	fn descriptor_stride(&self, heap_type: DescriptorHeapType) -> u32 {
		self.strides.get(heap_type)
	}

	unsafe fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer, Self::PlatformError> {
		unsafe {
			let buffer = self.device.create_buffer(
				&ash::vk::BufferCreateInfo::default()
					.usage(desc.usage.to_ash_buffer_usage_flags())
					.size(desc.size)
					.sharing_mode(SharingMode::EXCLUSIVE),
				None,
			)?;
			self.name_created_object(buffer, desc.name);
			let requirements = self.device.get_buffer_memory_requirements(buffer);
			let allocation = self.memory_allocator().allocate(&AllocationCreateDesc {
				requirements,
				name: desc.name,
				location: desc.usage.to_gpu_allocator_memory_location(),
				allocation_scheme: AllocationScheme::GpuAllocatorManaged,
				linear: true,
			});
			let allocation = match allocation {
				Ok(allocation) => allocation,
				Err(e) => {
					self.device.destroy_buffer(buffer, None);
					return Err(e.into());
				}
			};
			let allocation = AshMemoryAllocation::new(allocation);
			if let Err(e) = self.device.bind_buffer_memory(
				buffer,
				allocation_memory(&allocation),
				allocation_offset(&allocation),
			) {
				self.free_allocation(&allocation);
				self.device.destroy_buffer(buffer, None);
				return Err(e.into());
			}
			Ok(AshBuffer { buffer, allocation })
		}
	}

	unsafe fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture, Self::PlatformError> {
		unsafe {
			let format = desc.format.to_ash_format();
			let image = self.device.create_image(
				&ash::vk::ImageCreateInfo::default()
					.image_type(texture_image_type(desc))
					.format(format)
					.extent(texture_extent(desc))
					.mip_levels(desc.mip_levels)
					.array_layers(desc.array_layers)
					.samples(ash::vk::SampleCountFlags::TYPE_1)
					.tiling(ImageTiling::OPTIMAL)
					.usage(desc.usage.to_ash_image_usage_flags())
					.sharing_mode(SharingMode::EXCLUSIVE)
					.initial_layout(ImageLayout::UNDEFINED),
				None,
			)?;
			self.name_created_object(image, desc.name);
			let requirements = self.device.get_image_memory_requirements(image);
			let allocation = match self.memory_allocator().allocate(&AllocationCreateDesc {
				requirements,
				name: desc.name,
				location: MemoryLocation::GpuOnly,
				allocation_scheme: AllocationScheme::GpuAllocatorManaged,
				linear: false,
			}) {
				Ok(allocation) => AshMemoryAllocation::new(allocation),
				Err(e) => {
					self.device.destroy_image(image, None);
					return Err(e.into());
				}
			};
			let image_view = self
				.device
				.bind_image_memory(image, allocation_memory(&allocation), allocation_offset(&allocation))
				.and_then(|_| {
					self.device.create_image_view(
						&ImageViewCreateInfo::default()
							.image(image)
							.view_type(texture_view_type(desc))
							.format(format)
							.components(ComponentMapping::default())
							.subresource_range(ImageSubresourceRange {
								aspect_mask: desc.format.to_ash_aspect(),
								base_mip_level: 0,
								level_count: desc.mip_levels,
								base_array_layer: 0,
								layer_count: desc.array_layers,
							}),
						None,
					)
				});
			match image_view {
				Ok(image_view) => Ok(AshImage {
					image,
					image_view,
					allocation,
				}),
				Err(e) => {
					self.free_allocation(&allocation);
					self.device.destroy_image(image, None);
					Err(e.into())
				}
			}
		}
	}

	unsafe fn create_sampler(&self, desc: &SamplerDesc) -> Result<Self::Sampler, Self::PlatformError> {
		unsafe {
			let address_mode = desc.address_mode.to_ash_address_mode();
			let sampler = self.device.create_sampler(
				&SamplerCreateInfo::default()
					.mag_filter(desc.mag_filter.to_ash_filter())
					.min_filter(desc.min_filter.to_ash_filter())
					.mipmap_mode(desc.mipmap_mode.to_ash_mipmap_mode())
					.address_mode_u(address_mode)
					.address_mode_v(address_mode)
					.address_mode_w(address_mode)
					.anisotropy_enable(desc.max_anisotropy.is_some())
					.max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
					.min_lod(0.)
					.max_lod(LOD_CLAMP_NONE),
				None,
			)?;
			self.name_created_object(sampler, desc.name);
			Ok(sampler)
		}
	}

	unsafe fn destroy_buffer(&self, buffer: Self::Buffer) {
		unsafe {
			self.free_allocation(&buffer.allocation);
			self.device.destroy_buffer(buffer.buffer, None);
		}
	}

	unsafe fn destroy_texture(&self, texture: Self::Texture) {
		unsafe {
			self.device.destroy_image_view(texture.image_view, None);
			self.free_allocation(&texture.allocation);
			self.device.destroy_image(texture.image, None);
		}
	}

	unsafe fn destroy_sampler(&self, sampler: Self::Sampler) {
		unsafe {
			self.device.destroy_sampler(sampler, None);
		}
	}
}

fn allocation_memory(allocation: &AshMemoryAllocation) -> ash::vk::DeviceMemory {
	unsafe { (*allocation.0.get()).as_ref().map_or(ash::vk::DeviceMemory::null(), |a| a.memory()) }
}

fn allocation_offset(allocation: &AshMemoryAllocation) -> u64 {
	unsafe { (*allocation.0.get()).as_ref().map_or(0, Allocation::offset) }
}
