use crate::context::{BufferDesc, SamplerDesc, TextureDesc};
use crate::descriptor::{CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle};
use crate::execution::{FenceWaitError, QueueType};
use std::error::Error;
use std::time::Duration;

/// Internal interface for platform API calls, may change at any time!
///
/// # Safety
/// Objects passed to any of these functions must have been created by the same platform instance. Objects passed to
/// `destroy_*` must no longer be in use by the GPU, nor accessed by anything afterward.
pub unsafe trait GpuPlatform: Sized + Send + Sync + 'static {
	type Queue: 'static + Send + Sync;
	/// A counter signaled by queues, monotonically increasing
	type Fence: 'static + Send + Sync;
	type CommandAllocator: 'static + Send + Sync;
	type CommandList: 'static + Send + Sync;
	type DescriptorHeap: 'static + Send + Sync;
	type Buffer: 'static + Send + Sync;
	type Texture: 'static + Send + Sync;
	type Sampler: 'static + Send + Sync;
	type PlatformError: 'static + Error + Send + Sync;

	unsafe fn create_queue(&self, queue_type: QueueType) -> Result<Self::Queue, Self::PlatformError>;

	unsafe fn destroy_queue(&self, queue: Self::Queue);

	unsafe fn create_fence(&self, initial_value: u64) -> Result<Self::Fence, Self::PlatformError>;

	unsafe fn destroy_fence(&self, fence: Self::Fence);

	/// The highest value the GPU has signaled the fence with so far. A lost device must not report values that were
	/// never reached, instead it is reported by [`Self::wait_fence`].
	unsafe fn fence_completed_value(&self, fence: &Self::Fence) -> u64;

	/// Enqueue a signal of `fence` to `value` on `queue`, after all previously submitted work.
	unsafe fn signal_fence(&self, queue: &Self::Queue, fence: &Self::Fence, value: u64);

	/// Block until `fence` reaches `value`. `None` waits indefinitely.
	unsafe fn wait_fence(
		&self,
		fence: &Self::Fence,
		value: u64,
		timeout: Option<Duration>,
	) -> Result<(), FenceWaitError>;

	unsafe fn execute_command_lists(&self, queue: &Self::Queue, command_lists: &[Self::CommandList]);

	unsafe fn create_command_allocator(
		&self,
		queue_type: QueueType,
	) -> Result<Self::CommandAllocator, Self::PlatformError>;

	/// Reset an allocator for reuse, recycling all command lists recorded with it.
	///
	/// # Safety
	/// All work recorded with this allocator must have completed execution.
	unsafe fn reset_command_allocator(&self, allocator: &mut Self::CommandAllocator) -> Result<(), Self::PlatformError>;

	unsafe fn destroy_command_allocator(&self, allocator: Self::CommandAllocator);

	unsafe fn create_descriptor_heap(
		&self,
		heap_type: DescriptorHeapType,
		count: u32,
		shader_visible: bool,
	) -> Result<Self::DescriptorHeap, Self::PlatformError>;

	/// CPU and, if shader visible, GPU address of the first descriptor of `heap`.
	unsafe fn descriptor_heap_start(
		&self,
		heap: &Self::DescriptorHeap,
	) -> (CpuDescriptorHandle, Option<GpuDescriptorHandle>);

	unsafe fn destroy_descriptor_heap(&self, heap: Self::DescriptorHeap);

	/// Size in bytes of a single descriptor in heaps of `heap_type`.
	fn descriptor_stride(&self, heap_type: DescriptorHeapType) -> u32;

	unsafe fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer, Self::PlatformError>;

	unsafe fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture, Self::PlatformError>;

	unsafe fn create_sampler(&self, desc: &SamplerDesc) -> Result<Self::Sampler, Self::PlatformError>;

	unsafe fn destroy_buffer(&self, buffer: Self::Buffer);

	unsafe fn destroy_texture(&self, texture: Self::Texture);

	unsafe fn destroy_sampler(&self, sampler: Self::Sampler);
}
