use crate::execution::QueueType;
use crate::platform::ash::Ash;
use ash::prelude::VkResult;
use ash::vk::{
	CommandBuffer, CommandBufferAllocateInfo, CommandBufferBeginInfo, CommandBufferLevel, CommandBufferUsageFlags,
	CommandPool, SemaphoreCreateInfo, SemaphoreType, SemaphoreTypeCreateInfo,
};
use ash::Device;
use smallvec::SmallVec;

pub fn create_timeline_semaphore(device: &Device, timeline_value: u64) -> VkResult<ash::vk::Semaphore> {
	unsafe {
		device.create_semaphore(
			&SemaphoreCreateInfo::default().push_next(
				&mut SemaphoreTypeCreateInfo::default()
					.semaphore_type(SemaphoreType::TIMELINE)
					.initial_value(timeline_value),
			),
			None,
		)
	}
}

/// A transient command pool and the command buffers allocated from it. Resetting the pool keeps the buffers around to
/// be handed out again.
#[derive(Debug)]
pub struct AshCommandAllocator {
	pub command_pool: CommandPool,
	pub queue_type: QueueType,
	command_buffers: SmallVec<[CommandBuffer; 4]>,
	used: usize,
}

impl AshCommandAllocator {
	pub fn new(command_pool: CommandPool, queue_type: QueueType) -> Self {
		Self {
			command_pool,
			queue_type,
			command_buffers: SmallVec::new(),
			used: 0,
		}
	}

	/// Begin recording a new command list.
	///
	/// # Safety
	/// The allocator must have been created by `ash` and must not be in use by the GPU, unless it was reset since.
	pub unsafe fn begin_command_list(&mut self, ash: &Ash) -> VkResult<AshCommandList> {
		unsafe {
			let command_buffer = if let Some(command_buffer) = self.command_buffers.get(self.used) {
				*command_buffer
			} else {
				let allocated = ash.device.allocate_command_buffers(
					&CommandBufferAllocateInfo::default()
						.command_pool(self.command_pool)
						.level(CommandBufferLevel::PRIMARY)
						.command_buffer_count(1),
				)?;
				self.command_buffers.extend(allocated.iter().copied());
				allocated[0]
			};
			ash.device.begin_command_buffer(
				command_buffer,
				&CommandBufferBeginInfo::default().flags(CommandBufferUsageFlags::ONE_TIME_SUBMIT),
			)?;
			self.used += 1;
			Ok(AshCommandList { command_buffer })
		}
	}

	/// All command buffers are implicitly reset with their pool.
	pub(crate) fn recycle(&mut self) {
		self.used = 0;
	}

	/// # Safety
	/// None of the command buffers may be in use by the GPU.
	pub(crate) unsafe fn into_command_pool(self, device: &Device) -> CommandPool {
		unsafe {
			if !self.command_buffers.is_empty() {
				device.free_command_buffers(self.command_pool, &self.command_buffers);
			}
			self.command_pool
		}
	}
}

#[derive(Copy, Clone, Debug)]
pub struct AshCommandList {
	pub command_buffer: CommandBuffer,
}

impl Ash {
	/// # Safety
	/// `command_list` must be in the recording state.
	pub unsafe fn end_command_list(&self, command_list: &AshCommandList) -> VkResult<()> {
		unsafe { self.device.end_command_buffer(command_list.command_buffer) }
	}
}
