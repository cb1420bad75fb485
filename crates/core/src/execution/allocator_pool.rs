use crate::execution::QueueType;
use crate::platform::GpuPlatform;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

/// Recycles command allocators once the GPU has finished executing the work recorded with them.
///
/// Discarded allocators are queued together with the fence value of the submission that used them last, sorted by
/// that value, so only the oldest allocator needs to be checked for completion. Threads may discard in any order.
pub struct CommandAllocatorPool<P: GpuPlatform> {
	platform: Arc<P>,
	queue_type: QueueType,
	discarded: Mutex<VecDeque<(u64, P::CommandAllocator)>>,
	created: AtomicU32,
}

impl<P: GpuPlatform> CommandAllocatorPool<P> {
	pub fn new(platform: Arc<P>, queue_type: QueueType) -> Self {
		Self {
			platform,
			queue_type,
			discarded: Mutex::new(VecDeque::new()),
			created: AtomicU32::new(0),
		}
	}

	/// Returns the oldest discarded allocator reset for reuse if `is_complete` reports its fence value as reached,
	/// otherwise creates a new allocator.
	pub fn request(&self, is_complete: impl FnOnce(u64) -> bool) -> Result<P::CommandAllocator, P::PlatformError> {
		let ready = {
			let mut discarded = self.discarded.lock();
			match discarded.front() {
				Some((fence_value, _)) if is_complete(*fence_value) => discarded.pop_front(),
				_ => None,
			}
		};

		unsafe {
			match ready {
				Some((_, mut allocator)) => match self.platform.reset_command_allocator(&mut allocator) {
					Ok(()) => Ok(allocator),
					Err(e) => {
						self.platform.destroy_command_allocator(allocator);
						self.created.fetch_sub(1, Relaxed);
						Err(e)
					}
				},
				None => {
					let allocator = self.platform.create_command_allocator(self.queue_type)?;
					let count = self.created.fetch_add(1, Relaxed) + 1;
					log::debug!("Created {:?} command allocator, {} in total", self.queue_type, count);
					Ok(allocator)
				}
			}
		}
	}

	/// Queues `allocator` to be recycled once the queue reaches `fence_value`.
	pub fn discard(&self, fence_value: u64, allocator: P::CommandAllocator) {
		let mut discarded = self.discarded.lock();
		let at = discarded.partition_point(|(value, _)| *value <= fence_value);
		discarded.insert(at, (fence_value, allocator));
	}

	/// Total allocators created by this pool and not destroyed since.
	pub fn allocator_count(&self) -> u32 {
		self.created.load(Relaxed)
	}

	pub fn discarded_count(&self) -> usize {
		self.discarded.lock().len()
	}
}

impl<P: GpuPlatform> Drop for CommandAllocatorPool<P> {
	fn drop(&mut self) {
		for (_, allocator) in self.discarded.get_mut().drain(..) {
			unsafe { self.platform.destroy_command_allocator(allocator) };
		}
	}
}
