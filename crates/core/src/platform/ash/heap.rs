use crate::descriptor::{CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle};
use crate::platform::ash::{Ash, AshCreateInfo, AshError, AshMemoryAllocation};
use ash::vk::{
	BufferCreateInfo, BufferDeviceAddressInfo, BufferUsageFlags, PhysicalDeviceDescriptorBufferPropertiesEXT,
	PhysicalDeviceProperties2, SharingMode,
};
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

/// Byte size of a single descriptor per [`DescriptorHeapType`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DescriptorStrides([u32; 4]);

impl DescriptorStrides {
	/// Render targets and depth stencils are not descriptors in vulkan, their heaps store image view handles.
	const VIEW_HANDLE_STRIDE: u32 = std::mem::size_of::<u64>() as u32;

	pub fn query(create_info: &AshCreateInfo) -> Self {
		let mut props = PhysicalDeviceDescriptorBufferPropertiesEXT::default();
		unsafe {
			create_info.instance.get_physical_device_properties2(
				create_info.physical_device,
				&mut PhysicalDeviceProperties2::default().push_next(&mut props),
			);
		}
		let resource = [
			props.uniform_buffer_descriptor_size,
			props.storage_buffer_descriptor_size,
			props.sampled_image_descriptor_size,
			props.storage_image_descriptor_size,
		]
		.into_iter()
		.max()
		.unwrap_or(0);
		Self([
			resource as u32,
			props.sampler_descriptor_size as u32,
			Self::VIEW_HANDLE_STRIDE,
			Self::VIEW_HANDLE_STRIDE,
		])
	}

	pub fn get(&self, heap_type: DescriptorHeapType) -> u32 {
		self.0[heap_type.to_usize()]
	}
}

pub enum AshDescriptorHeap {
	/// Heaps the shader never sees only live in host memory, views are copied out of them.
	Host {
		heap_type: DescriptorHeapType,
		memory: Box<[u8]>,
	},
	/// A host visible descriptor buffer, written by the CPU and read by shaders through its device address.
	Device {
		heap_type: DescriptorHeapType,
		buffer: ash::vk::Buffer,
		allocation: AshMemoryAllocation,
		address: u64,
	},
}

impl AshDescriptorHeap {
	pub unsafe fn new(ash: &Ash, heap_type: DescriptorHeapType, count: u32, shader_visible: bool) -> Result<Self, AshError> {
		unsafe {
			let size = ash.strides.get(heap_type) as u64 * count as u64;
			if !shader_visible {
				return Ok(AshDescriptorHeap::Host {
					heap_type,
					memory: vec![0; size as usize].into_boxed_slice(),
				});
			}

			let usage = match heap_type {
				DescriptorHeapType::Sampler => BufferUsageFlags::SAMPLER_DESCRIPTOR_BUFFER_EXT,
				_ => BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT,
			} | BufferUsageFlags::SHADER_DEVICE_ADDRESS;
			let buffer = ash.device.create_buffer(
				&BufferCreateInfo::default()
					.usage(usage)
					.size(size)
					.sharing_mode(SharingMode::EXCLUSIVE),
				None,
			)?;
			let name = format!("{:?} descriptor heap", heap_type);
			ash.name_created_object(buffer, &name);
			let requirements = ash.device.get_buffer_memory_requirements(buffer);
			let allocation = match ash.memory_allocator().allocate(&AllocationCreateDesc {
				requirements,
				name: &name,
				location: MemoryLocation::CpuToGpu,
				allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
				linear: true,
			}) {
				Ok(allocation) => allocation,
				Err(e) => {
					ash.device.destroy_buffer(buffer, None);
					return Err(e.into());
				}
			};
			if let Err(e) = ash
				.device
				.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
			{
				if let Err(free_error) = ash.memory_allocator().free(allocation) {
					log::error!("Failed to free memory allocation of {}: {}", name, free_error);
				}
				ash.device.destroy_buffer(buffer, None);
				return Err(e.into());
			}
			let address = ash
				.device
				.get_buffer_device_address(&BufferDeviceAddressInfo::default().buffer(buffer));
			Ok(AshDescriptorHeap::Device {
				heap_type,
				buffer,
				allocation: AshMemoryAllocation::new(allocation),
				address,
			})
		}
	}

	pub fn heap_type(&self) -> DescriptorHeapType {
		match self {
			AshDescriptorHeap::Host { heap_type, .. } | AshDescriptorHeap::Device { heap_type, .. } => *heap_type,
		}
	}

	pub fn start(&self) -> (CpuDescriptorHandle, Option<GpuDescriptorHandle>) {
		match self {
			AshDescriptorHeap::Host { memory, .. } => (CpuDescriptorHandle(memory.as_ptr() as usize), None),
			AshDescriptorHeap::Device {
				allocation, address, ..
			} => {
				let cpu = allocation.mapped_ptr().map_or(0, |ptr| ptr.as_ptr() as usize);
				(CpuDescriptorHandle(cpu), Some(GpuDescriptorHandle(*address)))
			}
		}
	}

	pub unsafe fn destroy(self, ash: &Ash) {
		unsafe {
			if let AshDescriptorHeap::Device {
				buffer, allocation, ..
			} = self
			{
				if let Some(allocation) = allocation.take() {
					if let Err(e) = ash.memory_allocator().free(allocation) {
						log::error!("Failed to free descriptor heap memory: {}", e);
					}
				}
				ash.device.destroy_buffer(buffer, None);
			}
		}
	}
}
