//! Vulkan platform. Fences are timeline semaphores, command allocators are transient command pools and shader visible
//! descriptor heaps are host visible descriptor buffers (`VK_EXT_descriptor_buffer`), so descriptor addresses map
//! directly onto [`CpuDescriptorHandle`](crate::descriptor::CpuDescriptorHandle) and
//! [`GpuDescriptorHandle`](crate::descriptor::GpuDescriptorHandle).

mod convert;
mod executing;
mod heap;
pub mod init;
mod platform;

pub use convert::*;
pub use executing::*;
pub use heap::*;
pub use platform::*;
