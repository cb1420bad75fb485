//! # Context
//! [`GpuContext`] ties all allocators together and owns everything shared by the renderer: the platform, one
//! [`CommandQueue`] per [`QueueType`], the descriptor heaps, the resource pools, the [`DeferredReleaseQueue`] and the
//! frame counter driving it.
//!
//! A frame is bracketed by [`GpuContextInner::begin_frame`] and [`GpuContextInner::present`], which must be called by a
//! single frame owner. Everything else may be called from any thread.
//!
//! Destroying a resource removes it from its pool immediately, invalidating its handle, but the platform object and its
//! descriptors are only released once every queue has finished the frame the resource was destroyed in.

mod config;
mod resource;

pub use config::*;
pub use resource::*;

use crate::backing::{GenerationalHandlePool, Handle};
use crate::descriptor::{
	BindlessTable, DescriptorAllocationError, DescriptorHeapType, DynamicAllocation, DynamicSuballocator,
	GpuDescriptorHeap,
};
use crate::execution::{CommandQueue, FenceWaitError, QueueType};
use crate::frame_in_flight::{DeferredReleaseQueue, FrameArena, FrameInFlight, ResourceInFlight, SeedInFlight};
use crate::platform::GpuPlatform;
use crossbeam_utils::CachePadded;
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::Arc;
use thiserror::Error;

pub struct GpuContext<P: GpuPlatform>(Arc<GpuContextInner<P>>);

impl<P: GpuPlatform> Clone for GpuContext<P> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}

impl<P: GpuPlatform> Deref for GpuContext<P> {
	type Target = Arc<GpuContextInner<P>>;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

pub struct GpuContextInner<P: GpuPlatform> {
	config: ContextConfig,
	seed: SeedInFlight,
	queues: [CommandQueue<P>; 3],
	resource_heap: Arc<GpuDescriptorHeap<P>>,
	sampler_heap: Arc<GpuDescriptorHeap<P>>,
	heaps: Arc<ResourceHeaps<P>>,
	buffers: RwLock<GenerationalHandlePool<Buffer<P>>>,
	textures: RwLock<GenerationalHandlePool<Texture<P>>>,
	samplers: RwLock<GenerationalHandlePool<Sampler<P>>>,
	frames: ResourceInFlight<FrameSlot<P>>,
	scratch: RwLock<FrameArena>,
	deferred: DeferredReleaseQueue,
	frame_state: Mutex<FrameState>,
	/// the frame currently being recorded
	frame_number: CachePadded<AtomicU64>,
	/// all frames below this value have completed on every queue
	completed_frames: CachePadded<AtomicU64>,
	platform: Arc<P>,
}

/// Per frame in flight state, reused every `buffer_depth` frames.
struct FrameSlot<P: GpuPlatform> {
	submitted: Mutex<Option<SubmittedFrame>>,
	resource_descriptors: Mutex<DynamicSuballocator<P>>,
	sampler_descriptors: Mutex<DynamicSuballocator<P>>,
	arena: RwLock<FrameArena>,
}

#[derive(Copy, Clone, Debug)]
struct SubmittedFrame {
	frame: u64,
	/// fence value of each queue signaled at present, indexed by [`QueueType`]
	fences: [u64; 3],
}

#[derive(Debug, Default)]
struct FrameState {
	recording: bool,
}

#[derive(Error)]
pub enum ContextError<P: GpuPlatform> {
	#[error("Config Error: {0}")]
	Config(#[from] ConfigError),
	#[error("Platform Error: {0}")]
	Platform(#[source] P::PlatformError),
	#[error("Descriptor Allocation Error: {0}")]
	Descriptor(#[from] DescriptorAllocationError<P>),
}

impl<P: GpuPlatform> Debug for ContextError<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}

/// A snapshot of how many resources are alive and how far the frame loop has progressed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ContextStats {
	pub buffers: u32,
	pub textures: u32,
	pub samplers: u32,
	pub pending_releases: usize,
	pub frame_number: u64,
	pub completed_frames: u64,
}

impl<P: GpuPlatform> GpuContext<P> {
	pub fn new(platform: P, config: ContextConfig) -> Result<Self, ContextError<P>> {
		profiling::function_scope!();
		config.validate()?;
		let platform = Arc::new(platform);
		let seed = SeedInFlight::new(config.buffer_depth);

		let queues = [
			CommandQueue::new(platform.clone(), QueueType::Graphics).map_err(ContextError::Platform)?,
			CommandQueue::new(platform.clone(), QueueType::Compute).map_err(ContextError::Platform)?,
			CommandQueue::new(platform.clone(), QueueType::Copy).map_err(ContextError::Platform)?,
		];

		let resource_heap = Arc::new(GpuDescriptorHeap::new(
			platform.clone(),
			DescriptorHeapType::Resource,
			config.descriptor_count_static,
			config.descriptor_count_dynamic,
		)?);
		let sampler_heap = Arc::new(GpuDescriptorHeap::new(
			platform.clone(),
			DescriptorHeapType::Sampler,
			config.sampler_count_static,
			config.sampler_count_dynamic,
		)?);
		let heaps = Arc::new(ResourceHeaps::new(
			platform.clone(),
			config.cpu_page_size,
			BindlessTable::new(resource_heap.clone(), config.bindless_capacity)?,
			BindlessTable::new(sampler_heap.clone(), config.sampler_count_static)?,
		));

		let frames = ResourceInFlight::new(seed, |_| FrameSlot {
			submitted: Mutex::new(None),
			resource_descriptors: Mutex::new(DynamicSuballocator::new(resource_heap.clone(), config.chunk_size)),
			sampler_descriptors: Mutex::new(DynamicSuballocator::new(sampler_heap.clone(), config.chunk_size)),
			arena: RwLock::new(FrameArena::new(config.frame_arena_page_size, config.frame_arena_reserve)),
		});

		log::info!(
			"Created GpuContext with {} frames in flight, {} bindless resources and {} bindless samplers",
			config.buffer_depth,
			config.bindless_capacity,
			config.sampler_count_static
		);
		Ok(Self(Arc::new(GpuContextInner {
			seed,
			queues,
			resource_heap,
			sampler_heap,
			heaps,
			buffers: RwLock::new(GenerationalHandlePool::new(config.pool_capacity, config.pool_growth)),
			textures: RwLock::new(GenerationalHandlePool::new(config.pool_capacity, config.pool_growth)),
			samplers: RwLock::new(GenerationalHandlePool::new(config.pool_capacity, config.pool_growth)),
			frames,
			scratch: RwLock::new(FrameArena::new(
				config.frame_arena_page_size,
				config.scratch_arena_reserve,
			)),
			deferred: DeferredReleaseQueue::new(),
			frame_state: Mutex::new(FrameState::default()),
			frame_number: CachePadded::new(AtomicU64::new(0)),
			completed_frames: CachePadded::new(AtomicU64::new(0)),
			config,
			platform,
		})))
	}
}

impl<P: GpuPlatform> GpuContextInner<P> {
	/// Starts recording the next frame: waits until the GPU is done with the frame that last used this frame's slot,
	/// releases everything retired in completed frames and resets the slot's dynamic descriptors and arenas.
	///
	/// Returns the number of the frame now being recorded. Must not be called while a guard returned by
	/// [`Self::frame_arena`] or [`Self::scratch_arena`] is held.
	pub fn begin_frame(&self) -> Result<u64, FenceWaitError> {
		profiling::function_scope!();
		let mut state = self.frame_state.lock();
		let frame = self.frame_number.load(Acquire);
		if state.recording {
			log::warn!("begin_frame called twice for frame {} without present", frame);
			return Ok(frame);
		}

		let slot = self.slot_of(frame);
		let previous = *slot.submitted.lock();
		if let Some(previous) = previous {
			self.wait_for_submitted(&previous)?;
		}

		let completed = self.update_completed_frames();
		let released = self.deferred.release_items(completed);
		if released > 0 {
			log::trace!("Frame {}: released {} deferred items", frame, released);
		}

		slot.resource_descriptors.lock().release_allocations();
		slot.sampler_descriptors.lock().release_allocations();
		slot.arena.write().reset();
		self.scratch.write().reset();
		state.recording = true;
		Ok(frame)
	}

	/// Ends the current frame: signals every queue so completion of the frame can be tracked and advances the frame
	/// counter. Returns the number of the frame that was presented.
	pub fn present(&self) -> u64 {
		profiling::function_scope!();
		let mut state = self.frame_state.lock();
		let frame = self.frame_number.load(Acquire);
		if !state.recording {
			log::warn!("present called for frame {} without begin_frame", frame);
		}
		let fences = QueueType::ALL.map(|queue_type| self.queue(queue_type).increment_fence());
		*self.slot_of(frame).submitted.lock() = Some(SubmittedFrame { frame, fences });
		self.frame_number.store(frame + 1, Release);
		state.recording = false;
		frame
	}

	fn wait_for_submitted(&self, submitted: &SubmittedFrame) -> Result<(), FenceWaitError> {
		for queue_type in QueueType::ALL {
			self.queue(queue_type)
				.wait_for_fence(submitted.fences[queue_type as usize])?;
		}
		Ok(())
	}

	fn is_submitted_complete(&self, submitted: &SubmittedFrame) -> bool {
		QueueType::ALL
			.iter()
			.all(|&queue_type| self.queue(queue_type).is_fence_complete(submitted.fences[queue_type as usize]))
	}

	/// Fence values of each queue increase with the frame number, so the newest completed slot bounds all older frames.
	fn update_completed_frames(&self) -> u64 {
		let newest = self
			.frames
			.iter()
			.filter_map(|slot| *slot.submitted.lock())
			.filter(|submitted| self.is_submitted_complete(submitted))
			.map(|submitted| submitted.frame + 1)
			.max()
			.unwrap_or(0);
		self.completed_frames.fetch_max(newest, Relaxed).max(newest)
	}

	/// Polls the queues and returns the number of frames known to have completed on the GPU.
	pub fn completed_frames(&self) -> u64 {
		self.update_completed_frames()
	}

	fn slot_of(&self, frame: u64) -> &FrameSlot<P> {
		// SAFETY: slot reuse is synchronized by begin_frame waiting on the frame previously using it
		let fif = unsafe { FrameInFlight::new(self.seed, self.seed.slot_of(frame)) };
		self.frames.index(fif)
	}

	fn current_slot(&self) -> &FrameSlot<P> {
		self.slot_of(self.frame_number.load(Acquire))
	}

	/// Calls `f` with the [`FrameInFlight`] of the frame currently being recorded, to index [`ResourceInFlight`]s
	/// created with [`Self::seed`].
	pub fn with_frame_in_flight<R>(&self, f: impl FnOnce(FrameInFlight<'_>) -> R) -> R {
		let frame = self.frame_number.load(Acquire);
		// SAFETY: the current frame's slot is not in use by the GPU after begin_frame
		let fif = unsafe { FrameInFlight::new(self.seed, self.seed.slot_of(frame)) };
		f(fif)
	}

	/// Allocates `count` contiguous shader visible resource descriptors valid until the current frame completes.
	pub fn allocate_dynamic(&self, count: u32) -> Result<DynamicAllocation, DescriptorAllocationError<P>> {
		self.current_slot().resource_descriptors.lock().allocate(count)
	}

	/// Allocates `count` contiguous shader visible sampler descriptors valid until the current frame completes.
	pub fn allocate_dynamic_samplers(&self, count: u32) -> Result<DynamicAllocation, DescriptorAllocationError<P>> {
		self.current_slot().sampler_descriptors.lock().allocate(count)
	}

	/// The arena of the current frame, reset once the frame's slot comes around again.
	pub fn frame_arena(&self) -> RwLockReadGuard<'_, FrameArena> {
		self.current_slot().arena.read()
	}

	/// The scratch arena, reset every frame.
	pub fn scratch_arena(&self) -> RwLockReadGuard<'_, FrameArena> {
		self.scratch.read()
	}

	/// Exclusive access to the scratch arena, to create an [`ArenaScope`](crate::frame_in_flight::ArenaScope).
	pub fn scratch_arena_mut(&self) -> RwLockWriteGuard<'_, FrameArena> {
		self.scratch.write()
	}

	/// Submits `command_lists` to the queue of `queue_type`, see [`CommandQueue::submit`].
	pub fn submit(&self, queue_type: QueueType, command_lists: &[P::CommandList]) -> u64 {
		self.queue(queue_type).submit(command_lists)
	}

	/// Blocks until all queues are idle, then releases all deferred items. All work referencing destroyed resources
	/// must have been submitted.
	pub fn wait_for_idle(&self) -> Result<(), FenceWaitError> {
		profiling::function_scope!();
		for queue in &self.queues {
			queue.wait_for_idle()?;
		}
		self.completed_frames.fetch_max(self.frame_number.load(Acquire), Relaxed);
		self.deferred.release_all();
		Ok(())
	}

	pub fn create_buffer(&self, desc: &BufferDesc) -> Result<Handle<Buffer<P>>, ResourceError<P>> {
		let buffer = Buffer::create(&self.heaps, desc)?;
		// SAFETY: the buffer was never handed out
		self.insert_resource(&self.buffers, buffer, |buffer, heaps| unsafe { buffer.destroy(heaps) })
	}

	pub fn create_texture(&self, desc: &TextureDesc) -> Result<Handle<Texture<P>>, ResourceError<P>> {
		let texture = Texture::create(&self.heaps, desc)?;
		// SAFETY: see create_buffer
		self.insert_resource(&self.textures, texture, |texture, heaps| unsafe { texture.destroy(heaps) })
	}

	pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<Handle<Sampler<P>>, ResourceError<P>> {
		let sampler = Sampler::create(&self.heaps, desc)?;
		// SAFETY: see create_buffer
		self.insert_resource(&self.samplers, sampler, |sampler, heaps| unsafe { sampler.destroy(heaps) })
	}

	fn insert_resource<T>(
		&self,
		pool: &RwLock<GenerationalHandlePool<T>>,
		value: T,
		destroy: impl FnOnce(T, &ResourceHeaps<P>),
	) -> Result<Handle<T>, ResourceError<P>> {
		let mut pool = pool.write();
		if let Err(e) = pool.reserve() {
			drop(pool);
			log::error!("{}: {}", std::any::type_name::<T>(), e);
			destroy(value, &self.heaps);
			return Err(e.into());
		}
		Ok(pool.emplace(value)?)
	}

	/// Invalidates `handle` and releases the buffer once the current frame has completed. Returns false if the handle
	/// was stale.
	pub fn destroy_buffer(&self, handle: Handle<Buffer<P>>) -> bool {
		let Some(buffer) = self.buffers.write().release(handle) else {
			return false;
		};
		let heaps = self.heaps.clone();
		// SAFETY: only runs once every queue finished the frame the buffer was destroyed in
		self.deferred
			.enqueue_current(&self.frame_number, move || unsafe { buffer.destroy(&heaps) });
		true
	}

	pub fn destroy_texture(&self, handle: Handle<Texture<P>>) -> bool {
		let Some(texture) = self.textures.write().release(handle) else {
			return false;
		};
		let heaps = self.heaps.clone();
		// SAFETY: see destroy_buffer
		self.deferred
			.enqueue_current(&self.frame_number, move || unsafe { texture.destroy(&heaps) });
		true
	}

	pub fn destroy_sampler(&self, handle: Handle<Sampler<P>>) -> bool {
		let Some(sampler) = self.samplers.write().release(handle) else {
			return false;
		};
		let heaps = self.heaps.clone();
		// SAFETY: see destroy_buffer
		self.deferred
			.enqueue_current(&self.frame_number, move || unsafe { sampler.destroy(&heaps) });
		true
	}

	pub fn buffer(&self, handle: Handle<Buffer<P>>) -> Option<MappedRwLockReadGuard<'_, Buffer<P>>> {
		RwLockReadGuard::try_map(self.buffers.read(), |pool| pool.get(handle)).ok()
	}

	pub fn texture(&self, handle: Handle<Texture<P>>) -> Option<MappedRwLockReadGuard<'_, Texture<P>>> {
		RwLockReadGuard::try_map(self.textures.read(), |pool| pool.get(handle)).ok()
	}

	pub fn sampler(&self, handle: Handle<Sampler<P>>) -> Option<MappedRwLockReadGuard<'_, Sampler<P>>> {
		RwLockReadGuard::try_map(self.samplers.read(), |pool| pool.get(handle)).ok()
	}

	pub fn stats(&self) -> ContextStats {
		ContextStats {
			buffers: self.buffers.read().len(),
			textures: self.textures.read().len(),
			samplers: self.samplers.read().len(),
			pending_releases: self.deferred.len(),
			frame_number: self.frame_number.load(Acquire),
			completed_frames: self.completed_frames.load(Relaxed),
		}
	}

	#[inline]
	pub fn queue(&self, queue_type: QueueType) -> &CommandQueue<P> {
		&self.queues[queue_type as usize]
	}

	#[inline]
	pub fn platform(&self) -> &Arc<P> {
		&self.platform
	}

	#[inline]
	pub fn config(&self) -> &ContextConfig {
		&self.config
	}

	#[inline]
	pub fn seed(&self) -> SeedInFlight {
		self.seed
	}

	#[inline]
	pub fn frame_number(&self) -> u64 {
		self.frame_number.load(Acquire)
	}

	#[inline]
	pub fn heaps(&self) -> &ResourceHeaps<P> {
		&self.heaps
	}

	#[inline]
	pub fn resource_heap(&self) -> &Arc<GpuDescriptorHeap<P>> {
		&self.resource_heap
	}

	#[inline]
	pub fn sampler_heap(&self) -> &Arc<GpuDescriptorHeap<P>> {
		&self.sampler_heap
	}

	#[inline]
	pub fn deferred(&self) -> &DeferredReleaseQueue {
		&self.deferred
	}
}

impl<P: GpuPlatform> Debug for GpuContextInner<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GpuContext")
			.field("seed", &self.seed)
			.field("stats", &self.stats())
			.finish()
	}
}

impl<P: GpuPlatform> Drop for GpuContextInner<P> {
	fn drop(&mut self) {
		profiling::function_scope!();
		if let Err(e) = self.wait_for_idle() {
			log::error!("GpuContext shutdown failed to idle the GPU, releasing anyway: {}", e);
			self.deferred.release_all();
		}
		let heaps = &self.heaps;
		unsafe {
			for (_, buffer) in self.buffers.get_mut().drain() {
				buffer.destroy(heaps);
			}
			for (_, texture) in self.textures.get_mut().drain() {
				texture.destroy(heaps);
			}
			for (_, sampler) in self.samplers.get_mut().drain() {
				sampler.destroy(heaps);
			}
		}
		log::info!("GpuContext shut down after {} frames", self.frame_number.load(Relaxed));
	}
}
