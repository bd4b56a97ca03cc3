//! Descriptor set management.

use crate::error::{GpuError, Result};
use ash::vk;

/// Descriptor set layout builder.
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a storage buffer binding.
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a storage image binding.
    pub fn storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    /// Add a combined image sampler binding.
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Add an acceleration structure binding.
    pub fn acceleration_structure(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            1,
            stage_flags,
        )
    }

    /// Pool sizes that fit `sets` copies of this layout.
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            let count = binding.descriptor_count * sets;
            match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: count,
                }),
            }
        }
        sizes
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(&self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = device.create_descriptor_set_layout(&layout_info, None)?;
        Ok(layout)
    }
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate one descriptor set with `layout`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = device.allocate_descriptor_sets(&alloc_info)?;
        sets.first()
            .copied()
            .ok_or_else(|| GpuError::Other("Driver returned no descriptor set".to_string()))
    }

    /// Destroy the pool, freeing its sets.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}

/// Write a buffer descriptor of type `descriptor_type` covering the whole buffer.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    buffer: vk::Buffer,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(vk::WHOLE_SIZE);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write an image descriptor. `sampler` is ignored for storage images.
///
/// # Safety
/// Device, image view and sampler must be valid.
pub unsafe fn write_image(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
    layout: vk::ImageLayout,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .sampler(sampler)
        .image_layout(layout);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .image_info(std::slice::from_ref(&image_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write a top-level acceleration structure descriptor.
///
/// # Safety
/// Device and acceleration structure must be valid.
pub unsafe fn write_acceleration_structure(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    acceleration_structure: vk::AccelerationStructureKHR,
) {
    let structures = [acceleration_structure];
    let mut as_info = vk::WriteDescriptorSetAccelerationStructureKHR::default()
        .acceleration_structures(&structures);

    let mut write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
        .push_next(&mut as_info);
    // The count is not derived from the pNext chain
    write.descriptor_count = 1;

    device.update_descriptor_sets(&[write], &[]);
}
