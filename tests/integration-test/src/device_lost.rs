#![cfg(test)]

use crate::{init_logger, test_config};
use rust_gpu_lifecycle::context::{BufferDesc, BufferUsage, GpuContext, ResourceError};
use rust_gpu_lifecycle::execution::{FenceWaitError, QueueType};
use rust_gpu_lifecycle::platform::headless::{Headless, HeadlessCompletion, HeadlessError, HeadlessStats};
use std::thread;
use std::time::Duration;

#[test]
fn lost_device_wakes_blocked_frame() -> anyhow::Result<()> {
	init_logger();
	let context = GpuContext::new(Headless::new(HeadlessCompletion::Manual), test_config())?;
	for _ in 0..context.config().buffer_depth {
		context.begin_frame()?;
		context.present();
	}

	let blocked = {
		let context = context.clone();
		thread::spawn(move || context.begin_frame())
	};
	thread::sleep(Duration::from_millis(20));
	context.platform().lose_device();
	let result = blocked.join().unwrap();
	assert!(matches!(result, Err(FenceWaitError::DeviceLost { .. })), "{:?}", result);
	Ok(())
}

#[test]
fn lost_device_refuses_resources_but_shuts_down() -> anyhow::Result<()> {
	init_logger();
	let context = GpuContext::new(Headless::new(HeadlessCompletion::Manual), test_config())?;
	let platform = context.platform().clone();
	context.begin_frame()?;
	let buffer = context.create_buffer(&BufferDesc {
		name: "before",
		size: 128,
		usage: BufferUsage::STORAGE_BUFFER,
	})?;
	context.destroy_buffer(buffer);
	context.present();

	platform.lose_device();
	let result = context.create_buffer(&BufferDesc {
		name: "after",
		size: 128,
		usage: BufferUsage::STORAGE_BUFFER,
	});
	assert!(matches!(result, Err(ResourceError::Platform(HeadlessError::DeviceLost))));
	assert_eq!(context.heaps().resource_table.allocated_count(), 1);

	assert_eq!(context.wait_for_idle(), Err(FenceWaitError::DeviceLost { value: 2 }));
	let timeout = context
		.queue(QueueType::Copy)
		.wait_for_fence_timeout(1, Duration::from_millis(1));
	assert!(matches!(timeout, Err(FenceWaitError::DeviceLost { .. })));

	// shutdown releases everything without waiting on the lost device
	drop(context);
	assert_eq!(platform.stats(), HeadlessStats::default());
	Ok(())
}

#[test]
fn wait_for_fence_times_out() -> anyhow::Result<()> {
	init_logger();
	let context = GpuContext::new(Headless::new(HeadlessCompletion::Manual), test_config())?;
	let queue = context.queue(QueueType::Graphics);
	let value = queue.submit(&[]);
	assert_eq!(
		queue.wait_for_fence_timeout(value, Duration::from_millis(10)),
		Err(FenceWaitError::Timeout { value })
	);
	context.platform().complete_fence(queue.fence(), value);
	assert_eq!(queue.wait_for_fence_timeout(value, Duration::from_millis(10)), Ok(()));
	assert_eq!(queue.last_completed_fence(), value);
	context.platform().set_completion(HeadlessCompletion::Immediate);
	Ok(())
}
