use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Acquire;

pub type ReleaseFn = Box<dyn FnOnce() + Send>;

struct DeferredItem {
	frame_tag: u64,
	release: ReleaseFn,
}

/// Delays the destruction of resources until the GPU has provably finished the frame that last referenced them.
///
/// Items are tagged with the frame they were retired in and must be enqueued in non-decreasing tag order, so releasing
/// only ever needs to look at the front of the queue. Release closures run outside the lock and may enqueue further
/// items. Dropping the queue runs all remaining closures.
#[derive(Default)]
pub struct DeferredReleaseQueue {
	items: Mutex<VecDeque<DeferredItem>>,
}

impl DeferredReleaseQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn enqueue(&self, frame_tag: u64, release: impl FnOnce() + Send + 'static) {
		let mut items = self.items.lock();
		Self::push(&mut items, frame_tag, Box::new(release));
	}

	/// Enqueues `release` tagged with the value of `frame_counter`, read under the queue's lock. As long as the counter
	/// never decreases, concurrent callers racing a frame advance can't enqueue out of order.
	pub fn enqueue_current(&self, frame_counter: &AtomicU64, release: impl FnOnce() + Send + 'static) {
		let mut items = self.items.lock();
		let frame_tag = frame_counter.load(Acquire);
		Self::push(&mut items, frame_tag, Box::new(release));
	}

	fn push(items: &mut VecDeque<DeferredItem>, frame_tag: u64, release: ReleaseFn) {
		if let Some(last) = items.back() {
			if last.frame_tag > frame_tag {
				log::warn!(
					"Deferred release with frame tag {} enqueued after tag {}, it will be released late",
					frame_tag,
					last.frame_tag
				);
				debug_assert!(false, "deferred releases must be enqueued in frame order");
			}
		}
		items.push_back(DeferredItem { frame_tag, release });
	}

	/// Releases all items with a frame tag lower than `completed_frame`, stopping at the first item that does not
	/// qualify. Returns the amount of items released.
	pub fn release_items(&self, completed_frame: u64) -> usize {
		self.release_while(|tag| tag < completed_frame)
	}

	/// Releases items that are older than `buffer_depth` frames relative to `current_frame`, for callers which
	/// know their frame latency but not the completed frame.
	pub fn release_items_buffered(&self, current_frame: u64, buffer_depth: u32) -> usize {
		self.release_while(|tag| tag.saturating_add(buffer_depth as u64) < current_frame)
	}

	/// Releases everything regardless of tag, must only be called once the GPU is idle.
	pub fn release_all(&self) -> usize {
		self.release_while(|_| true)
	}

	fn release_while(&self, qualifies: impl Fn(u64) -> bool) -> usize {
		profiling::function_scope!();
		let mut released = 0;
		loop {
			let item = {
				let mut items = self.items.lock();
				match items.front() {
					Some(item) if qualifies(item.frame_tag) => items.pop_front(),
					_ => None,
				}
			};
			match item {
				Some(item) => {
					(item.release)();
					released += 1;
				}
				None => break released,
			}
		}
	}

	pub fn len(&self) -> usize {
		self.items.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.lock().is_empty()
	}
}

impl Debug for DeferredReleaseQueue {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DeferredReleaseQueue")
			.field("len", &self.len())
			.finish()
	}
}

impl Drop for DeferredReleaseQueue {
	fn drop(&mut self) {
		let remaining = self.release_all();
		if remaining > 0 {
			log::debug!("Released {} deferred items on drop", remaining);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;
	use std::sync::atomic::Ordering::Relaxed;
	use std::sync::Arc;

	fn recorder() -> (Arc<Mutex<Vec<u64>>>, impl Fn(u64) -> ReleaseFn) {
		let log = Arc::new(Mutex::new(Vec::new()));
		let log2 = log.clone();
		(log, move |id| {
			let log = log2.clone();
			Box::new(move || log.lock().push(id))
		})
	}

	#[test]
	fn releases_only_completed_frames() {
		let queue = DeferredReleaseQueue::new();
		let (log, record) = recorder();
		queue.enqueue(1, record(1));
		queue.enqueue(2, record(2));
		queue.enqueue(3, record(3));

		assert_eq!(queue.release_items(2), 1);
		assert_eq!(*log.lock(), [1]);
		assert_eq!(queue.release_items(2), 0);
		assert_eq!(queue.release_items(4), 2);
		assert_eq!(*log.lock(), [1, 2, 3]);
		assert!(queue.is_empty());
	}

	#[test]
	fn buffered_release_respects_depth() {
		let queue = DeferredReleaseQueue::new();
		let (log, record) = recorder();
		queue.enqueue(5, record(5));
		queue.enqueue(6, record(6));
		assert_eq!(queue.release_items_buffered(7, 2), 0);
		assert_eq!(queue.release_items_buffered(8, 2), 1);
		assert_eq!(*log.lock(), [5]);
		assert_eq!(queue.len(), 1);
	}

	#[test]
	fn release_all_and_drop_run_everything() {
		let counter = Arc::new(AtomicUsize::new(0));
		let queue = DeferredReleaseQueue::new();
		for tag in 0..4 {
			let counter = counter.clone();
			queue.enqueue(tag * 10, move || {
				counter.fetch_add(1, Relaxed);
			});
		}
		assert_eq!(queue.release_all(), 4);
		assert_eq!(counter.load(Relaxed), 4);

		let counter2 = counter.clone();
		queue.enqueue(100, move || {
			counter2.fetch_add(1, Relaxed);
		});
		drop(queue);
		assert_eq!(counter.load(Relaxed), 5);
	}

	#[test]
	fn release_closure_may_enqueue() {
		let queue = Arc::new(DeferredReleaseQueue::new());
		let (log, record) = recorder();
		let inner = queue.clone();
		let follow_up = record(2);
		queue.enqueue(1, move || inner.enqueue(1, follow_up));
		assert_eq!(queue.release_items(2), 2);
		assert_eq!(*log.lock(), [2]);
	}

	#[test]
	fn enqueue_current_tracks_counter() {
		let queue = DeferredReleaseQueue::new();
		let frame = AtomicU64::new(3);
		let (log, record) = recorder();
		queue.enqueue_current(&frame, record(3));
		frame.store(4, Relaxed);
		queue.enqueue_current(&frame, record(4));
		assert_eq!(queue.release_items(4), 1);
		assert_eq!(*log.lock(), [3]);
		assert_eq!(queue.release_items(5), 1);
	}

	#[test]
	#[cfg(debug_assertions)]
	#[should_panic]
	fn decreasing_tag_is_a_logic_error() {
		let queue = DeferredReleaseQueue::new();
		queue.enqueue(2, || {});
		queue.enqueue(1, || {});
	}
}
