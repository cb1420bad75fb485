//! GPU work submission: [`CommandQueue`]s with their monotonically increasing fence counter and a fence-gated
//! [`CommandAllocatorPool`] recycling command allocators.

mod allocator_pool;
mod command_queue;

pub use allocator_pool::*;
pub use command_queue::*;

use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum QueueType {
	#[default]
	Graphics,
	Compute,
	Copy,
}

impl QueueType {
	pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Copy];
}

#[derive(Error, Copy, Clone, Eq, PartialEq)]
pub enum FenceWaitError {
	#[error("Device was lost while waiting for fence value {value}")]
	DeviceLost { value: u64 },
	#[error("Timed out waiting for fence value {value}")]
	Timeout { value: u64 },
}

impl Debug for FenceWaitError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}
