#![cfg(test)]

use crate::{init_logger, test_config};
use rust_gpu_lifecycle::context::{
	BufferDesc, BufferUsage, Filter, GpuContext, SamplerDesc, TextureDesc, TextureFormat, TextureUsage,
};
use rust_gpu_lifecycle::execution::QueueType;
use rust_gpu_lifecycle::platform::ash::init::{ash_init_single_queue, AshSingleQueueCreateInfo, Debuggers};
use rust_gpu_lifecycle::platform::ash::Ash;

fn ash_context() -> anyhow::Result<GpuContext<Ash>> {
	init_logger();
	let ash = ash_init_single_queue(AshSingleQueueCreateInfo {
		app_name: c"integration-test",
		debug: Debuggers::Validation,
		..AshSingleQueueCreateInfo::default()
	})?;
	Ok(GpuContext::new(ash, test_config())?)
}

#[test]
#[ignore = "requires a vulkan device with VK_EXT_descriptor_buffer"]
fn ash_frame_loop() -> anyhow::Result<()> {
	let context = ash_context()?;
	for _ in 0..8 {
		context.begin_frame()?;
		let buffer = context.create_buffer(&BufferDesc {
			name: "uniforms",
			size: 256,
			usage: BufferUsage::UNIFORM_BUFFER | BufferUsage::MAP_WRITE,
		})?;
		let texture = context.create_texture(&TextureDesc {
			name: "depth",
			extent: [64, 64, 1],
			format: TextureFormat::D32Float,
			usage: TextureUsage::DEPTH_STENCIL_ATTACHMENT | TextureUsage::SAMPLED,
			..TextureDesc::default()
		})?;
		context.allocate_dynamic(4)?;
		context.destroy_buffer(buffer);
		context.destroy_texture(texture);
		context.present();
	}
	context.wait_for_idle()?;
	assert_eq!(context.completed_frames(), 8);
	assert_eq!(context.stats().pending_releases, 0);
	Ok(())
}

#[test]
#[ignore = "requires a vulkan device with VK_EXT_descriptor_buffer"]
fn ash_command_lists() -> anyhow::Result<()> {
	let context = ash_context()?;
	let sampler = context.create_sampler(&SamplerDesc {
		name: "linear",
		mag_filter: Filter::Linear,
		min_filter: Filter::Linear,
		max_anisotropy: Some(4.),
		..SamplerDesc::default()
	})?;
	assert!(context.sampler(sampler).and_then(|s| s.view.bindless()).is_some());

	let queue = context.queue(QueueType::Compute);
	for _ in 0..4 {
		let mut allocator = queue.request_allocator()?;
		let list = unsafe { allocator.begin_command_list(context.platform())? };
		unsafe { context.platform().end_command_list(&list)? };
		let fence = queue.submit(&[list]);
		queue.discard_allocator(fence, allocator);
		queue.wait_for_fence(fence)?;
	}
	assert!(queue.allocator_count() <= 2);
	Ok(())
}

#[test]
#[ignore = "requires a vulkan device with VK_EXT_descriptor_buffer"]
fn ash_unnameable_resources_are_still_created() -> anyhow::Result<()> {
	let context = ash_context()?;
	context.begin_frame()?;
	let buffer = context.create_buffer(&BufferDesc {
		name: "nul\0buffer",
		size: 64,
		usage: BufferUsage::STORAGE_BUFFER,
	})?;
	let texture = context.create_texture(&TextureDesc {
		name: "nul\0texture",
		extent: [16, 16, 1],
		format: TextureFormat::Rgba8Unorm,
		usage: TextureUsage::SAMPLED,
		..TextureDesc::default()
	})?;
	let sampler = context.create_sampler(&SamplerDesc {
		name: "nul\0sampler",
		..SamplerDesc::default()
	})?;
	assert!(context.destroy_buffer(buffer));
	assert!(context.destroy_texture(texture));
	assert!(context.destroy_sampler(sampler));
	context.present();
	context.wait_for_idle()?;
	assert_eq!(context.stats().pending_releases, 0);
	Ok(())
}
