use crate::execution::{CommandAllocatorPool, FenceWaitError, QueueType};
use crate::platform::GpuPlatform;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::mem::ManuallyDrop;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{Acquire, Relaxed};
use std::sync::Arc;
use std::time::Duration;

/// A hardware submission queue with its fence. Every submission signals the fence with the next value of a strictly
/// increasing counter, which is returned as the receipt to wait on.
///
/// Dropping the queue destroys its fence and recycled allocators without waiting, the owner must idle it first.
pub struct CommandQueue<P: GpuPlatform> {
	platform: Arc<P>,
	queue_type: QueueType,
	queue: ManuallyDrop<P::Queue>,
	fence: ManuallyDrop<P::Fence>,
	/// signaling and incrementing happens under this lock, so values are signaled in order
	next_fence_value: Mutex<u64>,
	last_completed: CachePadded<AtomicU64>,
	allocators: CommandAllocatorPool<P>,
}

impl<P: GpuPlatform> CommandQueue<P> {
	pub fn new(platform: Arc<P>, queue_type: QueueType) -> Result<Self, P::PlatformError> {
		let initial_completed = 0;
		unsafe {
			let queue = platform.create_queue(queue_type)?;
			let fence = match platform.create_fence(initial_completed) {
				Ok(fence) => fence,
				Err(e) => {
					platform.destroy_queue(queue);
					return Err(e);
				}
			};
			Ok(Self {
				allocators: CommandAllocatorPool::new(platform.clone(), queue_type),
				platform,
				queue_type,
				queue: ManuallyDrop::new(queue),
				fence: ManuallyDrop::new(fence),
				next_fence_value: Mutex::new(initial_completed + 1),
				last_completed: CachePadded::new(AtomicU64::new(initial_completed)),
			})
		}
	}

	/// Executes `command_lists` and signals a new fence value once they complete, returning that value.
	pub fn submit(&self, command_lists: &[P::CommandList]) -> u64 {
		profiling::function_scope!();
		let mut next = self.next_fence_value.lock();
		unsafe {
			self.platform.execute_command_lists(&self.queue, command_lists);
		}
		self.signal_locked(&mut next)
	}

	/// Signals a new fence value after all previously submitted work, returning that value.
	pub fn increment_fence(&self) -> u64 {
		let mut next = self.next_fence_value.lock();
		self.signal_locked(&mut next)
	}

	fn signal_locked(&self, next: &mut u64) -> u64 {
		let value = *next;
		unsafe {
			self.platform.signal_fence(&self.queue, &self.fence, value);
		}
		*next += 1;
		value
	}

	/// Whether the GPU has reached `fence_value`. Only queries the platform if the cached completed value is lower.
	pub fn is_fence_complete(&self, fence_value: u64) -> bool {
		if fence_value > self.last_completed.load(Acquire) {
			self.poll_completed_fence();
		}
		fence_value <= self.last_completed.load(Acquire)
	}

	/// Queries the platform for the completed fence value and updates the cached value.
	pub fn poll_completed_fence(&self) -> u64 {
		let completed = unsafe { self.platform.fence_completed_value(&self.fence) };
		self.last_completed.fetch_max(completed, Relaxed).max(completed)
	}

	/// Blocks until the GPU reaches `fence_value`.
	pub fn wait_for_fence(&self, fence_value: u64) -> Result<(), FenceWaitError> {
		self.wait_for_fence_inner(fence_value, None)
	}

	/// Blocks until the GPU reaches `fence_value` or `timeout` has passed.
	pub fn wait_for_fence_timeout(&self, fence_value: u64, timeout: Duration) -> Result<(), FenceWaitError> {
		self.wait_for_fence_inner(fence_value, Some(timeout))
	}

	fn wait_for_fence_inner(&self, fence_value: u64, timeout: Option<Duration>) -> Result<(), FenceWaitError> {
		if self.is_fence_complete(fence_value) {
			return Ok(());
		}
		profiling::scope!("CommandQueue::wait_for_fence");
		unsafe {
			self.platform.wait_fence(&self.fence, fence_value, timeout)?;
		}
		self.last_completed.fetch_max(fence_value, Relaxed);
		Ok(())
	}

	/// Signals a fresh fence value and blocks until the GPU has reached it, and with that all prior work.
	pub fn wait_for_idle(&self) -> Result<(), FenceWaitError> {
		let value = self.increment_fence();
		self.wait_for_fence(value)
	}

	/// Returns a command allocator ready for recording, recycled if the oldest discarded one has completed.
	pub fn request_allocator(&self) -> Result<P::CommandAllocator, P::PlatformError> {
		self.allocators.request(|fence_value| self.is_fence_complete(fence_value))
	}

	/// Hands back `allocator` to be recycled once the GPU reaches `fence_value`, usually the value returned by the
	/// [`Self::submit`] executing its command lists.
	pub fn discard_allocator(&self, fence_value: u64, allocator: P::CommandAllocator) {
		self.allocators.discard(fence_value, allocator);
	}

	/// Last fence value known to be completed, without querying the platform.
	#[inline]
	pub fn last_completed_fence(&self) -> u64 {
		self.last_completed.load(Acquire)
	}

	/// The value the next signal will use.
	pub fn next_fence_value(&self) -> u64 {
		*self.next_fence_value.lock()
	}

	#[inline]
	pub fn queue_type(&self) -> QueueType {
		self.queue_type
	}

	#[inline]
	pub fn queue(&self) -> &P::Queue {
		&self.queue
	}

	#[inline]
	pub fn fence(&self) -> &P::Fence {
		&self.fence
	}

	pub fn allocator_count(&self) -> u32 {
		self.allocators.allocator_count()
	}
}

impl<P: GpuPlatform> Debug for CommandQueue<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CommandQueue")
			.field("queue_type", &self.queue_type)
			.field("last_completed", &self.last_completed_fence())
			.finish()
	}
}

impl<P: GpuPlatform> Drop for CommandQueue<P> {
	fn drop(&mut self) {
		unsafe {
			self.platform.destroy_fence(ManuallyDrop::take(&mut self.fence));
			self.platform.destroy_queue(ManuallyDrop::take(&mut self.queue));
		}
	}
}
