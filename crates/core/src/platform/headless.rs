//! A software platform without any GPU. Descriptor heaps are plain host allocations and fences are counters guarded by
//! a condvar, which either complete immediately when signaled or only once told to, so tests can hold the "GPU" back.

use crate::context::{BufferDesc, BufferUsage, SamplerDesc, TextureDesc};
use crate::descriptor::{CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle};
use crate::execution::{FenceWaitError, QueueType};
use crate::platform::GpuPlatform;
use parking_lot::{Condvar, Mutex};
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Base of the fake GPU address space descriptor heaps are placed in.
const GPU_ADDRESS_BASE: u64 = 0x1_0000_0000;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum HeadlessCompletion {
	/// Signaled fence values complete instantly.
	#[default]
	Immediate,
	/// Signaled fence values only complete with [`Headless::complete_fence`] or [`Headless::complete_all`].
	Manual,
}

#[derive(Error, Copy, Clone, Eq, PartialEq)]
pub enum HeadlessError {
	#[error("Device was lost")]
	DeviceLost,
	#[error("Creating {0} failed, out of memory")]
	OutOfMemory(&'static str),
}

impl Debug for HeadlessError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}

/// Counts of platform objects currently alive.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HeadlessStats {
	pub queues: usize,
	pub fences: usize,
	pub command_allocators: usize,
	pub descriptor_heaps: usize,
	pub buffers: usize,
	pub textures: usize,
	pub samplers: usize,
}

#[derive(Default)]
struct LiveCounters {
	queues: AtomicUsize,
	fences: AtomicUsize,
	command_allocators: AtomicUsize,
	descriptor_heaps: AtomicUsize,
	buffers: AtomicUsize,
	textures: AtomicUsize,
	samplers: AtomicUsize,
}

pub struct Headless {
	manual: AtomicBool,
	lost: AtomicBool,
	fences: Mutex<Vec<Weak<HeadlessFenceState>>>,
	next_gpu_address: AtomicU64,
	next_id: AtomicU64,
	/// buffers with at least this size fail to allocate, for testing allocation failures
	max_buffer_size: AtomicU64,
	live: LiveCounters,
}

impl Default for Headless {
	fn default() -> Self {
		Self::new(HeadlessCompletion::default())
	}
}

impl Headless {
	pub fn new(completion: HeadlessCompletion) -> Self {
		Self {
			manual: AtomicBool::new(completion == HeadlessCompletion::Manual),
			lost: AtomicBool::new(false),
			fences: Mutex::new(Vec::new()),
			next_gpu_address: AtomicU64::new(GPU_ADDRESS_BASE),
			next_id: AtomicU64::new(1),
			max_buffer_size: AtomicU64::new(u64::MAX),
			live: LiveCounters::default(),
		}
	}

	#[inline]
	pub fn completion(&self) -> HeadlessCompletion {
		if self.manual.load(Relaxed) {
			HeadlessCompletion::Manual
		} else {
			HeadlessCompletion::Immediate
		}
	}

	/// Switching to [`HeadlessCompletion::Immediate`] completes everything signaled so far, so that shutdown can idle.
	pub fn set_completion(&self, completion: HeadlessCompletion) {
		self.manual
			.store(completion == HeadlessCompletion::Manual, Relaxed);
		if completion == HeadlessCompletion::Immediate {
			self.complete_all();
		}
	}

	/// Completes `fence` up to `value`, waking up anyone waiting for it.
	pub fn complete_fence(&self, fence: &HeadlessFence, value: u64) {
		fence.0.complete(value);
	}

	/// Completes every fence up to the last value it was signaled with.
	pub fn complete_all(&self) {
		let fences = {
			let mut fences = self.fences.lock();
			fences.retain(|fence| fence.strong_count() > 0);
			fences.iter().filter_map(Weak::upgrade).collect::<Vec<_>>()
		};
		for fence in fences {
			let signaled = fence.inner.lock().signaled;
			fence.complete(signaled);
		}
	}

	/// Simulates losing the device: all current and future fence waits fail and object creation errors.
	pub fn lose_device(&self) {
		self.lost.store(true, Relaxed);
		let fences = self.fences.lock().iter().filter_map(Weak::upgrade).collect::<Vec<_>>();
		for fence in fences {
			// take the lock so waiters can't miss the notification between checking and sleeping
			let _guard = fence.inner.lock();
			fence.condvar.notify_all();
		}
	}

	pub fn is_device_lost(&self) -> bool {
		self.lost.load(Relaxed)
	}

	/// Buffers of at least `size` bytes fail to be created with [`HeadlessError::OutOfMemory`].
	pub fn set_max_buffer_size(&self, size: u64) {
		self.max_buffer_size.store(size, Relaxed);
	}

	pub fn stats(&self) -> HeadlessStats {
		HeadlessStats {
			queues: self.live.queues.load(Relaxed),
			fences: self.live.fences.load(Relaxed),
			command_allocators: self.live.command_allocators.load(Relaxed),
			descriptor_heaps: self.live.descriptor_heaps.load(Relaxed),
			buffers: self.live.buffers.load(Relaxed),
			textures: self.live.textures.load(Relaxed),
			samplers: self.live.samplers.load(Relaxed),
		}
	}

	fn check_lost(&self) -> Result<(), HeadlessError> {
		if self.is_device_lost() {
			Err(HeadlessError::DeviceLost)
		} else {
			Ok(())
		}
	}

	fn next_id(&self) -> u64 {
		self.next_id.fetch_add(1, Relaxed)
	}
}

impl Debug for Headless {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Headless")
			.field("completion", &self.completion())
			.field("lost", &self.is_device_lost())
			.field("live", &self.stats())
			.finish()
	}
}

#[derive(Debug)]
pub struct HeadlessQueue {
	pub queue_type: QueueType,
	executed: AtomicU64,
}

impl HeadlessQueue {
	/// Amount of command lists executed on this queue.
	pub fn executed(&self) -> u64 {
		self.executed.load(Relaxed)
	}
}

#[derive(Debug, Default)]
struct FenceValues {
	signaled: u64,
	completed: u64,
}

#[derive(Debug, Default)]
struct HeadlessFenceState {
	inner: Mutex<FenceValues>,
	condvar: Condvar,
}

impl HeadlessFenceState {
	fn complete(&self, value: u64) {
		let mut inner = self.inner.lock();
		if value > inner.completed {
			inner.completed = value;
			self.condvar.notify_all();
		}
	}
}

#[derive(Debug)]
pub struct HeadlessFence(Arc<HeadlessFenceState>);

impl HeadlessFence {
	pub fn signaled_value(&self) -> u64 {
		self.0.inner.lock().signaled
	}
}

#[derive(Debug)]
pub struct HeadlessCommandAllocator {
	id: u64,
	queue_type: QueueType,
	resets: u32,
}

impl HeadlessCommandAllocator {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn queue_type(&self) -> QueueType {
		self.queue_type
	}

	/// How often this allocator has been reset for reuse.
	pub fn resets(&self) -> u32 {
		self.resets
	}
}

/// A command list recording nothing, tagged with an arbitrary value for tests.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HeadlessCommandList(pub u64);

pub struct HeadlessDescriptorHeap {
	pub heap_type: DescriptorHeapType,
	memory: Box<[u8]>,
	gpu_base: Option<GpuDescriptorHandle>,
}

impl HeadlessDescriptorHeap {
	/// The raw descriptor memory, views write into this.
	pub fn memory(&self) -> &[u8] {
		&self.memory
	}
}

#[derive(Debug)]
pub struct HeadlessBuffer {
	pub id: u64,
	pub name: String,
	pub size: u64,
	pub usage: BufferUsage,
}

#[derive(Debug)]
pub struct HeadlessTexture {
	pub id: u64,
	pub name: String,
	pub extent: [u32; 3],
}

#[derive(Debug)]
pub struct HeadlessSampler {
	pub id: u64,
	pub name: String,
}

unsafe impl GpuPlatform for Headless {
	type Queue = HeadlessQueue;
	type Fence = HeadlessFence;
	type CommandAllocator = HeadlessCommandAllocator;
	type CommandList = HeadlessCommandList;
	type DescriptorHeap = HeadlessDescriptorHeap;
	type Buffer = HeadlessBuffer;
	type Texture = HeadlessTexture;
	type Sampler = HeadlessSampler;
	type PlatformError = HeadlessError;

	unsafe fn create_queue(&self, queue_type: QueueType) -> Result<Self::Queue, Self::PlatformError> {
		self.check_lost()?;
		self.live.queues.fetch_add(1, Relaxed);
		Ok(HeadlessQueue {
			queue_type,
			executed: AtomicU64::new(0),
		})
	}

	unsafe fn destroy_queue(&self, _queue: Self::Queue) {
		self.live.queues.fetch_sub(1, Relaxed);
	}

	unsafe fn create_fence(&self, initial_value: u64) -> Result<Self::Fence, Self::PlatformError> {
		self.check_lost()?;
		let state = Arc::new(HeadlessFenceState {
			inner: Mutex::new(FenceValues {
				signaled: initial_value,
				completed: initial_value,
			}),
			condvar: Condvar::new(),
		});
		self.fences.lock().push(Arc::downgrade(&state));
		self.live.fences.fetch_add(1, Relaxed);
		Ok(HeadlessFence(state))
	}

	unsafe fn destroy_fence(&self, fence: Self::Fence) {
		drop(fence);
		self.fences.lock().retain(|fence| fence.strong_count() > 0);
		self.live.fences.fetch_sub(1, Relaxed);
	}

	unsafe fn fence_completed_value(&self, fence: &Self::Fence) -> u64 {
		fence.0.inner.lock().completed
	}

	unsafe fn signal_fence(&self, _queue: &Self::Queue, fence: &Self::Fence, value: u64) {
		let mut inner = fence.0.inner.lock();
		inner.signaled = inner.signaled.max(value);
		if self.completion() == HeadlessCompletion::Immediate && !self.is_device_lost() {
			inner.completed = inner.completed.max(value);
			fence.0.condvar.notify_all();
		}
	}

	unsafe fn wait_fence(
		&self,
		fence: &Self::Fence,
		value: u64,
		timeout: Option<Duration>,
	) -> Result<(), FenceWaitError> {
		let deadline = timeout.map(|timeout| Instant::now() + timeout);
		let mut inner = fence.0.inner.lock();
		loop {
			if inner.completed >= value {
				return Ok(());
			}
			if self.is_device_lost() {
				return Err(FenceWaitError::DeviceLost { value });
			}
			match deadline {
				None => fence.0.condvar.wait(&mut inner),
				Some(deadline) => {
					if fence.0.condvar.wait_until(&mut inner, deadline).timed_out() && inner.completed < value {
						return Err(FenceWaitError::Timeout { value });
					}
				}
			}
		}
	}

	unsafe fn execute_command_lists(&self, queue: &Self::Queue, command_lists: &[Self::CommandList]) {
		queue.executed.fetch_add(command_lists.len() as u64, Relaxed);
	}

	unsafe fn create_command_allocator(
		&self,
		queue_type: QueueType,
	) -> Result<Self::CommandAllocator, Self::PlatformError> {
		self.check_lost()?;
		self.live.command_allocators.fetch_add(1, Relaxed);
		Ok(HeadlessCommandAllocator {
			id: self.next_id(),
			queue_type,
			resets: 0,
		})
	}

	unsafe fn reset_command_allocator(&self, allocator: &mut Self::CommandAllocator) -> Result<(), Self::PlatformError> {
		self.check_lost()?;
		allocator.resets += 1;
		Ok(())
	}

	unsafe fn destroy_command_allocator(&self, _allocator: Self::CommandAllocator) {
		self.live.command_allocators.fetch_sub(1, Relaxed);
	}

	unsafe fn create_descriptor_heap(
		&self,
		heap_type: DescriptorHeapType,
		count: u32,
		shader_visible: bool,
	) -> Result<Self::DescriptorHeap, Self::PlatformError> {
		self.check_lost()?;
		let size = count as u64 * self.descriptor_stride(heap_type) as u64;
		let gpu_base = (shader_visible && heap_type.can_be_shader_visible())
			.then(|| GpuDescriptorHandle(self.next_gpu_address.fetch_add(size.next_multiple_of(0x1000), Relaxed)));
		self.live.descriptor_heaps.fetch_add(1, Relaxed);
		Ok(HeadlessDescriptorHeap {
			heap_type,
			memory: vec![0; size as usize].into_boxed_slice(),
			gpu_base,
		})
	}

	unsafe fn descriptor_heap_start(
		&self,
		heap: &Self::DescriptorHeap,
	) -> (CpuDescriptorHandle, Option<GpuDescriptorHandle>) {
		(CpuDescriptorHandle(heap.memory.as_ptr() as usize), heap.gpu_base)
	}

	unsafe fn destroy_descriptor_heap(&self, _heap: Self::DescriptorHeap) {
		self.live.descriptor_heaps.fetch_sub(1, Relaxed);
	}

	fn descriptor_stride(&self, heap_type: DescriptorHeapType) -> u32 {
		match heap_type {
			DescriptorHeapType::Resource => 32,
			DescriptorHeapType::Sampler => 16,
			DescriptorHeapType::RenderTarget => 8,
			DescriptorHeapType::DepthStencil => 8,
		}
	}

	unsafe fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer, Self::PlatformError> {
		self.check_lost()?;
		if desc.size >= self.max_buffer_size.load(Relaxed) {
			return Err(HeadlessError::OutOfMemory("buffer"));
		}
		self.live.buffers.fetch_add(1, Relaxed);
		Ok(HeadlessBuffer {
			id: self.next_id(),
			name: desc.name.to_string(),
			size: desc.size,
			usage: desc.usage,
		})
	}

	unsafe fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture, Self::PlatformError> {
		self.check_lost()?;
		self.live.textures.fetch_add(1, Relaxed);
		Ok(HeadlessTexture {
			id: self.next_id(),
			name: desc.name.to_string(),
			extent: desc.extent,
		})
	}

	unsafe fn create_sampler(&self, desc: &SamplerDesc) -> Result<Self::Sampler, Self::PlatformError> {
		self.check_lost()?;
		self.live.samplers.fetch_add(1, Relaxed);
		Ok(HeadlessSampler {
			id: self.next_id(),
			name: desc.name.to_string(),
		})
	}

	unsafe fn destroy_buffer(&self, _buffer: Self::Buffer) {
		self.live.buffers.fetch_sub(1, Relaxed);
	}

	unsafe fn destroy_texture(&self, _texture: Self::Texture) {
		self.live.textures.fetch_sub(1, Relaxed);
	}

	unsafe fn destroy_sampler(&self, _sampler: Self::Sampler) {
		self.live.samplers.fetch_sub(1, Relaxed);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use static_assertions::assert_impl_all;

	assert_impl_all!(Headless: Send, Sync);

	#[test]
	fn shader_visible_heaps_get_disjoint_gpu_ranges() -> anyhow::Result<()> {
		let platform = Headless::default();
		unsafe {
			let a = platform.create_descriptor_heap(DescriptorHeapType::Resource, 100, true)?;
			let b = platform.create_descriptor_heap(DescriptorHeapType::Resource, 100, true)?;
			let cpu_only = platform.create_descriptor_heap(DescriptorHeapType::RenderTarget, 4, true)?;
			let (_, a_gpu) = platform.descriptor_heap_start(&a);
			let (_, b_gpu) = platform.descriptor_heap_start(&b);
			let (a_gpu, b_gpu) = (a_gpu.unwrap().0, b_gpu.unwrap().0);
			assert!(a_gpu + 100 * 32 <= b_gpu);
			assert_eq!(platform.descriptor_heap_start(&cpu_only).1, None);
			assert_eq!(platform.stats().descriptor_heaps, 3);
			for heap in [a, b, cpu_only] {
				platform.destroy_descriptor_heap(heap);
			}
		}
		assert_eq!(platform.stats(), HeadlessStats::default());
		Ok(())
	}

	#[test]
	fn manual_completion() -> anyhow::Result<()> {
		let platform = Headless::new(HeadlessCompletion::Manual);
		unsafe {
			let queue = platform.create_queue(QueueType::Graphics)?;
			let fence = platform.create_fence(0)?;
			platform.signal_fence(&queue, &fence, 3);
			assert_eq!(platform.fence_completed_value(&fence), 0);
			assert_eq!(fence.signaled_value(), 3);
			platform.complete_all();
			assert_eq!(platform.fence_completed_value(&fence), 3);
			platform.wait_fence(&fence, 3, None)?;
			platform.destroy_fence(fence);
			platform.destroy_queue(queue);
		}
		Ok(())
	}

	#[test]
	fn lost_device_refuses_creation() {
		let platform = Headless::default();
		platform.lose_device();
		unsafe {
			assert_eq!(
				platform.create_fence(0).map(|_| ()),
				Err(HeadlessError::DeviceLost)
			);
		}
	}
}
