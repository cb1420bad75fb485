use crate::backing::PoolGrowth;
use crate::frame_in_flight::{DEFAULT_PAGE_SIZE, FRAMES_LIMIT};
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

/// Sizes of all pools, heaps and arenas owned by a [`GpuContext`](crate::context::GpuContext), fixed at creation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ContextConfig {
	/// initial capacity of each of the buffer, texture and sampler pools
	pub pool_capacity: u32,
	pub pool_growth: PoolGrowth,
	/// static region of the shader visible resource heap, holding the bindless table
	pub descriptor_count_static: u32,
	/// dynamic region of the shader visible resource heap, shared by all frames in flight
	pub descriptor_count_dynamic: u32,
	pub sampler_count_static: u32,
	pub sampler_count_dynamic: u32,
	/// descriptors per page of the CPU heaps
	pub cpu_page_size: u32,
	/// descriptors per chunk taken from a dynamic region
	pub chunk_size: u32,
	/// slots of the bindless resource table, must fit into `descriptor_count_static`
	pub bindless_capacity: u32,
	pub frame_arena_page_size: usize,
	/// bytes reserved per frame arena, one arena exists per frame in flight
	pub frame_arena_reserve: usize,
	pub scratch_arena_reserve: usize,
	/// amount of frames that may be in flight at the same time
	pub buffer_depth: u32,
}

impl ContextConfig {
	pub const REASONABLE_DEFAULTS: Self = ContextConfig {
		pool_capacity: 1024,
		pool_growth: PoolGrowth::Doubling,
		descriptor_count_static: 10_000,
		descriptor_count_dynamic: 8192,
		sampler_count_static: 400,
		sampler_count_dynamic: 256,
		cpu_page_size: 256,
		chunk_size: 256,
		bindless_capacity: 10_000,
		frame_arena_page_size: DEFAULT_PAGE_SIZE,
		frame_arena_reserve: 16 * DEFAULT_PAGE_SIZE,
		scratch_arena_reserve: 4 * DEFAULT_PAGE_SIZE,
		buffer_depth: 2,
	};

	pub fn validate(&self) -> Result<(), ConfigError> {
		// destructure so new fields can't be forgotten
		let ContextConfig {
			pool_capacity: _,
			pool_growth,
			descriptor_count_static,
			descriptor_count_dynamic,
			sampler_count_static,
			sampler_count_dynamic,
			cpu_page_size,
			chunk_size,
			bindless_capacity,
			frame_arena_page_size,
			frame_arena_reserve,
			scratch_arena_reserve,
			buffer_depth,
		} = *self;

		if buffer_depth == 0 || buffer_depth > FRAMES_LIMIT {
			return Err(ConfigError::BufferDepth(buffer_depth));
		}
		if self.pool_capacity == 0 && pool_growth == PoolGrowth::Fixed {
			return Err(ConfigError::Zero("pool_capacity"));
		}
		for (name, value) in [
			("cpu_page_size", cpu_page_size as usize),
			("chunk_size", chunk_size as usize),
			("sampler_count_static", sampler_count_static as usize),
			("frame_arena_page_size", frame_arena_page_size),
		] {
			if value == 0 {
				return Err(ConfigError::Zero(name));
			}
		}
		if bindless_capacity > descriptor_count_static {
			return Err(ConfigError::BindlessCapacity {
				bindless_capacity,
				descriptor_count_static,
			});
		}
		for (name, dynamic) in [
			("descriptor_count_dynamic", descriptor_count_dynamic),
			("sampler_count_dynamic", sampler_count_dynamic),
		] {
			let required = chunk_size.saturating_mul(buffer_depth);
			if dynamic < required {
				return Err(ConfigError::DynamicRegion {
					name,
					dynamic,
					required,
				});
			}
		}
		for (name, reserve) in [
			("frame_arena_reserve", frame_arena_reserve),
			("scratch_arena_reserve", scratch_arena_reserve),
		] {
			if reserve < frame_arena_page_size {
				return Err(ConfigError::ArenaReserve {
					name,
					reserve,
					page_size: frame_arena_page_size,
				});
			}
		}
		Ok(())
	}
}

impl Default for ContextConfig {
	fn default() -> Self {
		Self::REASONABLE_DEFAULTS
	}
}

#[derive(Error, Clone, Eq, PartialEq)]
pub enum ConfigError {
	#[error("buffer_depth must be within 1..={max}, got {0}", max = FRAMES_LIMIT)]
	BufferDepth(u32),
	#[error("{0} must not be 0")]
	Zero(&'static str),
	#[error("bindless_capacity {bindless_capacity} exceeds descriptor_count_static {descriptor_count_static}")]
	BindlessCapacity {
		bindless_capacity: u32,
		descriptor_count_static: u32,
	},
	#[error("{name} of {dynamic} can't fit a chunk for each frame in flight, requires at least {required}")]
	DynamicRegion {
		name: &'static str,
		dynamic: u32,
		required: u32,
	},
	#[error("{name} of {reserve} bytes can't hold a single page of {page_size} bytes")]
	ArenaReserve {
		name: &'static str,
		reserve: usize,
		page_size: usize,
	},
}

impl Debug for ConfigError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_valid() {
		assert_eq!(ContextConfig::REASONABLE_DEFAULTS.validate(), Ok(()));
		assert_eq!(ContextConfig::default(), ContextConfig::REASONABLE_DEFAULTS);
	}

	#[test]
	fn rejects_buffer_depth() {
		for buffer_depth in [0, FRAMES_LIMIT + 1] {
			let config = ContextConfig {
				buffer_depth,
				..ContextConfig::REASONABLE_DEFAULTS
			};
			assert_eq!(config.validate(), Err(ConfigError::BufferDepth(buffer_depth)));
		}
	}

	#[test]
	fn rejects_oversized_bindless_table() {
		let config = ContextConfig {
			descriptor_count_static: 100,
			bindless_capacity: 101,
			..ContextConfig::REASONABLE_DEFAULTS
		};
		assert!(matches!(config.validate(), Err(ConfigError::BindlessCapacity { .. })));
	}

	#[test]
	fn rejects_small_dynamic_region() {
		let config = ContextConfig {
			chunk_size: 64,
			buffer_depth: 3,
			sampler_count_dynamic: 100,
			..ContextConfig::REASONABLE_DEFAULTS
		};
		assert_eq!(
			config.validate(),
			Err(ConfigError::DynamicRegion {
				name: "sampler_count_dynamic",
				dynamic: 100,
				required: 192,
			})
		);
	}

	#[test]
	fn fixed_pools_need_capacity() {
		let config = ContextConfig {
			pool_capacity: 0,
			pool_growth: PoolGrowth::Fixed,
			..ContextConfig::REASONABLE_DEFAULTS
		};
		assert_eq!(config.validate(), Err(ConfigError::Zero("pool_capacity")));
	}
}
