//! GPU memory management.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))
    }

    /// Allocate a buffer.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.inner()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(GpuError::AllocationFailed(format!("{name}: {e}")));
            }
        };

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        let device_address = if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            unsafe { self.device.get_buffer_device_address(&info) }
        } else {
            0
        };

        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
            device_address,
        })
    }

    /// Free a buffer allocation.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.inner()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
        }
        buffer.buffer = vk::Buffer::null();
        buffer.device_address = 0;

        Ok(())
    }

    /// Allocate a 2D image and a view over its first mip and layer.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        aspect_mask: vk::ImageAspectFlags,
        name: &str,
    ) -> Result<GpuImage> {
        let image = unsafe { self.device.create_image(create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.inner()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(GpuError::AllocationFailed(format!("{name}: {e}")));
            }
        };

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(create_info.format)
            .subresource_range(crate::transition::single_subresource(aspect_mask));
        let view = unsafe { self.device.create_image_view(&view_info, None)? };

        Ok(GpuImage {
            image,
            view,
            allocation: Some(allocation),
            format: create_info.format,
            extent: create_info.extent,
        })
    }

    /// Free an image allocation and its view.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        if let Some(allocation) = image.allocation.take() {
            self.inner()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        unsafe {
            self.device.destroy_image_view(image.view, None);
            self.device.destroy_image(image.image, None);
        }
        image.view = vk::ImageView::null();
        image.image = vk::Image::null();

        Ok(())
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations are logged as leaks.
    pub fn shutdown(&mut self) {
        // gpu_allocator::Allocator's Drop calls vkFreeMemory
        drop(self.allocator.take());
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
    /// Zero unless created with `SHADER_DEVICE_ADDRESS` usage.
    pub device_address: vk::DeviceAddress,
}

impl GpuBuffer {
    /// Pointer to the mapped memory, for host-visible buffers.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr() as *mut u8)
    }

    /// Write data to the start of the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "Write of {} bytes at {offset} exceeds buffer of {} bytes",
                data.len(),
                self.size
            )));
        }

        // SAFETY: range checked above and the mapping lives as long as the allocation
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }

        Ok(())
    }
}

/// A GPU image with its allocation and default view.
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

impl GpuImage {
    /// Width and height as a 2D extent.
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}
