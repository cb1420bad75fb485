use crate::context::{AddressMode, BufferUsage, Filter, TextureDesc, TextureFormat, TextureUsage};
use ash::vk::{BufferUsageFlags, Extent3D, Format, ImageAspectFlags, ImageType, ImageUsageFlags, ImageViewType};
use gpu_allocator::MemoryLocation;

impl BufferUsage {
	pub fn to_ash_buffer_usage_flags(&self) -> BufferUsageFlags {
		let mut out = BufferUsageFlags::empty();
		if self.contains(BufferUsage::TRANSFER_SRC) {
			out |= BufferUsageFlags::TRANSFER_SRC;
		}
		if self.contains(BufferUsage::TRANSFER_DST) {
			out |= BufferUsageFlags::TRANSFER_DST;
		}
		if self.contains(BufferUsage::UNIFORM_BUFFER) {
			out |= BufferUsageFlags::UNIFORM_BUFFER;
		}
		if self.contains(BufferUsage::STORAGE_BUFFER) {
			out |= BufferUsageFlags::STORAGE_BUFFER;
		}
		if self.contains(BufferUsage::INDEX_BUFFER) {
			out |= BufferUsageFlags::INDEX_BUFFER;
		}
		if self.contains(BufferUsage::VERTEX_BUFFER) {
			out |= BufferUsageFlags::VERTEX_BUFFER;
		}
		if self.contains(BufferUsage::INDIRECT_BUFFER) {
			out |= BufferUsageFlags::INDIRECT_BUFFER;
		}
		// empty flags are invalid in vulkan, reachable with a buffer that is only host mappable
		if out.is_empty() {
			BufferUsageFlags::TRANSFER_SRC
		} else {
			out
		}
	}

	/// prioritizes MAP_WRITE over MAP_READ
	pub fn to_gpu_allocator_memory_location(&self) -> MemoryLocation {
		if self.contains(BufferUsage::MAP_WRITE) {
			MemoryLocation::CpuToGpu
		} else if self.contains(BufferUsage::MAP_READ) {
			MemoryLocation::GpuToCpu
		} else {
			MemoryLocation::GpuOnly
		}
	}
}

impl TextureUsage {
	pub fn to_ash_image_usage_flags(&self) -> ImageUsageFlags {
		let mut out = ImageUsageFlags::empty();
		if self.contains(TextureUsage::TRANSFER_SRC) {
			out |= ImageUsageFlags::TRANSFER_SRC;
		}
		if self.contains(TextureUsage::TRANSFER_DST) {
			out |= ImageUsageFlags::TRANSFER_DST;
		}
		if self.contains(TextureUsage::SAMPLED) {
			out |= ImageUsageFlags::SAMPLED;
		}
		if self.contains(TextureUsage::STORAGE) {
			out |= ImageUsageFlags::STORAGE;
		}
		if self.contains(TextureUsage::COLOR_ATTACHMENT) {
			out |= ImageUsageFlags::COLOR_ATTACHMENT;
		}
		if self.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
			out |= ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
		}
		out
	}
}

impl TextureFormat {
	pub fn to_ash_format(&self) -> Format {
		match self {
			TextureFormat::Rgba8Unorm => Format::R8G8B8A8_UNORM,
			TextureFormat::Rgba8Srgb => Format::R8G8B8A8_SRGB,
			TextureFormat::Bgra8Unorm => Format::B8G8R8A8_UNORM,
			TextureFormat::Bgra8Srgb => Format::B8G8R8A8_SRGB,
			TextureFormat::Rgba16Float => Format::R16G16B16A16_SFLOAT,
			TextureFormat::Rgba32Float => Format::R32G32B32A32_SFLOAT,
			TextureFormat::R32Float => Format::R32_SFLOAT,
			TextureFormat::D32Float => Format::D32_SFLOAT,
			TextureFormat::D24UnormS8Uint => Format::D24_UNORM_S8_UINT,
		}
	}

	/// Aspects viewed by the default image view. Depth stencil formats are only viewed as depth.
	pub fn to_ash_aspect(&self) -> ImageAspectFlags {
		if self.is_depth() {
			ImageAspectFlags::DEPTH
		} else {
			ImageAspectFlags::COLOR
		}
	}
}

impl Filter {
	pub fn to_ash_filter(&self) -> ash::vk::Filter {
		match self {
			Filter::Nearest => ash::vk::Filter::NEAREST,
			Filter::Linear => ash::vk::Filter::LINEAR,
		}
	}

	pub fn to_ash_mipmap_mode(&self) -> ash::vk::SamplerMipmapMode {
		match self {
			Filter::Nearest => ash::vk::SamplerMipmapMode::NEAREST,
			Filter::Linear => ash::vk::SamplerMipmapMode::LINEAR,
		}
	}
}

impl AddressMode {
	pub fn to_ash_address_mode(&self) -> ash::vk::SamplerAddressMode {
		match self {
			AddressMode::ClampToEdge => ash::vk::SamplerAddressMode::CLAMP_TO_EDGE,
			AddressMode::Repeat => ash::vk::SamplerAddressMode::REPEAT,
			AddressMode::MirrorRepeat => ash::vk::SamplerAddressMode::MIRRORED_REPEAT,
			AddressMode::ClampToBorder => ash::vk::SamplerAddressMode::CLAMP_TO_BORDER,
		}
	}
}

pub fn texture_extent(desc: &TextureDesc) -> Extent3D {
	let [width, height, depth] = desc.extent;
	Extent3D { width, height, depth }
}

/// A depth above 1 makes a 3D texture, a height of 1 a 1D texture.
pub fn texture_image_type(desc: &TextureDesc) -> ImageType {
	match desc.extent {
		[_, _, depth] if depth > 1 => ImageType::TYPE_3D,
		[_, 1, _] => ImageType::TYPE_1D,
		_ => ImageType::TYPE_2D,
	}
}

pub fn texture_view_type(desc: &TextureDesc) -> ImageViewType {
	match (texture_image_type(desc), desc.array_layers > 1) {
		(ImageType::TYPE_3D, _) => ImageViewType::TYPE_3D,
		(ImageType::TYPE_1D, false) => ImageViewType::TYPE_1D,
		(ImageType::TYPE_1D, true) => ImageViewType::TYPE_1D_ARRAY,
		(_, false) => ImageViewType::TYPE_2D,
		(_, true) => ImageViewType::TYPE_2D_ARRAY,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_buffer_usage_mapping() {
		assert_eq!(
			(BufferUsage::UNIFORM_BUFFER | BufferUsage::TRANSFER_DST).to_ash_buffer_usage_flags(),
			BufferUsageFlags::UNIFORM_BUFFER | BufferUsageFlags::TRANSFER_DST
		);
		assert_eq!(
			BufferUsage::MAP_WRITE.to_ash_buffer_usage_flags(),
			BufferUsageFlags::TRANSFER_SRC
		);
		assert_eq!(
			(BufferUsage::MAP_WRITE | BufferUsage::MAP_READ).to_gpu_allocator_memory_location(),
			MemoryLocation::CpuToGpu
		);
		assert_eq!(
			BufferUsage::STORAGE_BUFFER.to_gpu_allocator_memory_location(),
			MemoryLocation::GpuOnly
		);
	}

	#[test]
	fn test_texture_types() {
		let desc = |extent, array_layers| TextureDesc {
			extent,
			array_layers,
			..TextureDesc::default()
		};
		assert_eq!(texture_view_type(&desc([64, 64, 1], 1)), ImageViewType::TYPE_2D);
		assert_eq!(texture_view_type(&desc([64, 64, 1], 6)), ImageViewType::TYPE_2D_ARRAY);
		assert_eq!(texture_view_type(&desc([64, 1, 1], 1)), ImageViewType::TYPE_1D);
		assert_eq!(texture_view_type(&desc([8, 8, 8], 1)), ImageViewType::TYPE_3D);
		assert_eq!(TextureFormat::D24UnormS8Uint.to_ash_aspect(), ImageAspectFlags::DEPTH);
	}
}
