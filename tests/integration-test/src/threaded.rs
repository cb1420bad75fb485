#![cfg(test)]

use crate::{init_logger, test_config};
use parking_lot::Mutex;
use rust_gpu_lifecycle::backing::Handle;
use rust_gpu_lifecycle::context::{Buffer, BufferDesc, BufferUsage, ContextConfig, GpuContext, SamplerDesc};
use rust_gpu_lifecycle::platform::headless::{Headless, HeadlessStats};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::thread;

const PRODUCERS: usize = 4;
const PER_PRODUCER: usize = 200;

#[test]
fn producers_race_the_frame_loop() -> anyhow::Result<()> {
	init_logger();
	// every buffer may still await its deferred release when the frame loop falls behind
	let config = ContextConfig {
		descriptor_count_static: 1024,
		bindless_capacity: 1024,
		..test_config()
	};
	let context = GpuContext::new(Headless::default(), config)?;
	let platform = context.platform().clone();
	let done = Arc::new(AtomicBool::new(false));
	let bindless_indices = Arc::new(Mutex::new(Vec::new()));

	let producers = (0..PRODUCERS)
		.map(|producer| {
			let context = context.clone();
			let bindless_indices = bindless_indices.clone();
			thread::spawn(move || -> anyhow::Result<()> {
				let name = format!("producer {}", producer);
				let mut alive: Vec<Handle<Buffer<Headless>>> = Vec::new();
				for i in 0..PER_PRODUCER {
					let handle = context.create_buffer(&BufferDesc {
						name: &name,
						size: 16,
						usage: BufferUsage::STORAGE_BUFFER,
					})?;
					if let Some(index) = context.buffer(handle).and_then(|buffer| buffer.view.bindless()) {
						bindless_indices.lock().push((handle, index));
					}
					alive.push(handle);
					// keep a few alive for a while to overlap with other threads
					if i % 3 == 0 {
						for handle in alive.drain(..) {
							assert!(context.destroy_buffer(handle));
						}
					}
				}
				for handle in alive {
					assert!(context.destroy_buffer(handle));
				}
				Ok(())
			})
		})
		.collect::<Vec<_>>();

	let frame_loop = {
		let context = context.clone();
		let done = done.clone();
		thread::spawn(move || -> anyhow::Result<u64> {
			let mut frames = 0;
			while !done.load(Relaxed) {
				context.begin_frame()?;
				context.allocate_dynamic(4)?;
				context.present();
				frames += 1;
			}
			Ok(frames)
		})
	};

	for producer in producers {
		producer.join().unwrap()?;
	}
	done.store(true, Relaxed);
	let frames = frame_loop.join().unwrap()?;
	log::info!("frame loop ran {} frames while producing", frames);

	// handles are unique, even though bindless indices get reused
	let recorded = bindless_indices.lock();
	let handles = recorded.iter().map(|(handle, _)| *handle).collect::<HashSet<_>>();
	assert_eq!(handles.len(), PRODUCERS * PER_PRODUCER);
	assert!(recorded.iter().all(|(_, index)| index.to_u32() < config.bindless_capacity));
	drop(recorded);

	assert_eq!(context.stats().buffers, 0);
	context.wait_for_idle()?;
	assert_eq!(context.stats().pending_releases, 0);
	assert_eq!(platform.stats().buffers, 0);
	assert_eq!(context.heaps().resource_table.allocated_count(), 0);

	drop(context);
	assert_eq!(platform.stats(), HeadlessStats::default());
	Ok(())
}

#[test]
fn stale_handles_stay_invalid_across_threads() -> anyhow::Result<()> {
	init_logger();
	let context = GpuContext::new(Headless::default(), test_config())?;
	let sampler = context.create_sampler(&SamplerDesc {
		name: "shared",
		..SamplerDesc::default()
	})?;

	let destroyers = (0..PRODUCERS)
		.map(|_| {
			let context = context.clone();
			thread::spawn(move || context.destroy_sampler(sampler))
		})
		.collect::<Vec<_>>();
	let destroyed = destroyers
		.into_iter()
		.map(|destroyer| destroyer.join().unwrap())
		.filter(|destroyed| *destroyed)
		.count();
	assert_eq!(destroyed, 1);
	assert!(context.sampler(sampler).is_none());

	// the slot is reused with a new generation, the stale handle must not alias it
	let replacement = context.create_sampler(&SamplerDesc {
		name: "replacement",
		..SamplerDesc::default()
	})?;
	assert_eq!(replacement.index(), sampler.index());
	assert_ne!(replacement.generation(), sampler.generation());
	assert!(context.sampler(sampler).is_none());
	assert_eq!(context.sampler(replacement).map(|s| s.debug_name.clone()), Some("replacement".to_string()));
	Ok(())
}
