use rust_gpu_lifecycle::context::ContextConfig;

#[cfg(feature = "ash")]
pub mod ash;
pub mod device_lost;
pub mod frame_loop;
pub mod threaded;

/// Routes the crate's logging to the test output, `RUST_LOG` picks the level.
pub fn init_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// Small enough that running out of pool slots, dynamic descriptors or arena pages is easy to provoke.
pub fn test_config() -> ContextConfig {
	ContextConfig {
		pool_capacity: 16,
		descriptor_count_static: 256,
		descriptor_count_dynamic: 128,
		sampler_count_static: 32,
		sampler_count_dynamic: 64,
		cpu_page_size: 32,
		chunk_size: 32,
		bindless_capacity: 256,
		frame_arena_page_size: 4096,
		frame_arena_reserve: 4 * 4096,
		scratch_arena_reserve: 4096,
		..ContextConfig::REASONABLE_DEFAULTS
	}
}
