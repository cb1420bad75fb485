#![cfg(test)]

use crate::{init_logger, test_config};
use rust_gpu_lifecycle::context::{BufferDesc, BufferUsage, GpuContext, SamplerDesc, TextureDesc, TextureUsage};
use rust_gpu_lifecycle::execution::QueueType;
use rust_gpu_lifecycle::platform::headless::{Headless, HeadlessCommandList, HeadlessCompletion, HeadlessStats};
use std::thread;
use std::time::Duration;

#[test]
fn frames_churn_resources() -> anyhow::Result<()> {
	init_logger();
	let context = GpuContext::new(Headless::default(), test_config())?;
	for frame in 0..64u64 {
		assert_eq!(context.begin_frame()?, frame);
		let buffer = context.create_buffer(&BufferDesc {
			name: "per frame",
			size: 64 + frame,
			usage: BufferUsage::UNIFORM_BUFFER | BufferUsage::MAP_WRITE,
		})?;
		let texture = context.create_texture(&TextureDesc {
			name: "per frame",
			extent: [16, 16, 1],
			usage: TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
			..TextureDesc::default()
		})?;
		let dynamic = context.allocate_dynamic(8)?;
		assert_eq!(dynamic.count(), 8);
		context.frame_arena().alloc_slice_copy(&[frame; 16])?;

		context.destroy_buffer(buffer);
		context.destroy_texture(texture);
		assert_eq!(context.present(), frame);
	}

	// with immediate completion everything older than the previous frame is gone
	let stats = context.stats();
	assert_eq!(stats.frame_number, 64);
	assert!(stats.pending_releases <= 2 * 2, "{:?}", stats);
	assert_eq!(stats.buffers, 0);
	assert_eq!(stats.textures, 0);

	context.wait_for_idle()?;
	assert_eq!(context.stats().pending_releases, 0);
	assert_eq!(context.platform().stats().buffers, 0);
	assert_eq!(context.platform().stats().textures, 0);
	assert_eq!(context.heaps().resource_table.allocated_count(), 0);
	Ok(())
}

#[test]
fn begin_frame_blocks_until_slot_completes() -> anyhow::Result<()> {
	init_logger();
	let context = GpuContext::new(Headless::new(HeadlessCompletion::Manual), test_config())?;
	let buffer_depth = context.config().buffer_depth as u64;
	for _ in 0..buffer_depth {
		context.begin_frame()?;
		context.present();
	}
	assert_eq!(context.completed_frames(), 0);

	let gpu = {
		let context = context.clone();
		thread::spawn(move || {
			thread::sleep(Duration::from_millis(50));
			let platform = context.platform();
			for queue_type in QueueType::ALL {
				let queue = context.queue(queue_type);
				// only the first frame
				platform.complete_fence(queue.fence(), 1);
			}
		})
	};

	// waits for the first frame, which reuses the slot
	assert_eq!(context.begin_frame()?, buffer_depth);
	assert_eq!(context.completed_frames(), 1);
	gpu.join().unwrap();

	context.platform().set_completion(HeadlessCompletion::Immediate);
	context.present();
	Ok(())
}

#[test]
fn submissions_order_with_frame_fences() -> anyhow::Result<()> {
	init_logger();
	let context = GpuContext::new(Headless::new(HeadlessCompletion::Manual), test_config())?;
	context.begin_frame()?;
	let first = context.submit(QueueType::Compute, &[HeadlessCommandList(1), HeadlessCommandList(2)]);
	let second = context.submit(QueueType::Compute, &[HeadlessCommandList(3)]);
	assert!(second > first);
	assert_eq!(context.queue(QueueType::Compute).queue().executed(), 3);
	context.present();

	let compute = context.queue(QueueType::Compute);
	assert!(!compute.is_fence_complete(first));
	context.platform().complete_fence(compute.fence(), second);
	assert!(compute.is_fence_complete(first));
	assert!(compute.is_fence_complete(second));
	// the frame fence was signaled after both submissions, the other queues are still pending
	assert_eq!(context.completed_frames(), 0);

	context.platform().complete_all();
	assert_eq!(context.completed_frames(), 1);
	context.platform().set_completion(HeadlessCompletion::Immediate);
	Ok(())
}

#[test]
fn command_allocators_recycle_after_completion() -> anyhow::Result<()> {
	init_logger();
	let context = GpuContext::new(Headless::new(HeadlessCompletion::Manual), test_config())?;
	let queue = context.queue(QueueType::Graphics);

	let first = queue.request_allocator()?;
	let first_id = first.id();
	let fence = queue.submit(&[HeadlessCommandList(first_id)]);
	queue.discard_allocator(fence, first);

	// the GPU may still use it
	let second = queue.request_allocator()?;
	assert_ne!(second.id(), first_id);
	assert_eq!(queue.allocator_count(), 2);

	context.platform().complete_fence(queue.fence(), fence);
	let recycled = queue.request_allocator()?;
	assert_eq!(recycled.id(), first_id);
	assert_eq!(recycled.resets(), 1);

	queue.discard_allocator(queue.next_fence_value() - 1, second);
	queue.discard_allocator(queue.next_fence_value() - 1, recycled);
	context.platform().set_completion(HeadlessCompletion::Immediate);
	Ok(())
}

#[test]
fn shutdown_releases_platform_objects() -> anyhow::Result<()> {
	init_logger();
	let context = GpuContext::new(Headless::default(), test_config())?;
	let platform = context.platform().clone();
	assert_eq!(platform.stats().queues, QueueType::ALL.len());
	// two shader visible heaps and the pages of four CPU heaps
	assert!(platform.stats().descriptor_heaps >= 2);

	context.begin_frame()?;
	for i in 0..8 {
		let name = format!("sampler {}", i);
		context.create_sampler(&SamplerDesc {
			name: &name,
			..SamplerDesc::default()
		})?;
	}
	let texture = context.create_texture(&TextureDesc {
		name: "target",
		extent: [128, 128, 1],
		usage: TextureUsage::COLOR_ATTACHMENT,
		..TextureDesc::default()
	})?;
	context.destroy_texture(texture);
	context.present();

	drop(context);
	assert_eq!(platform.stats(), HeadlessStats::default());
	Ok(())
}
