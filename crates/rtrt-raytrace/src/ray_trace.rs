//! Hardware ray tracing pipeline over the triangle scene.
//!
//! Set 0 layout, shared by all stages:
//! - binding 0: TLAS (raygen)
//! - binding 1: color target storage image, rgba32f, GENERAL (raygen)
//! - binding 2: camera uniforms (raygen)
//! - binding 3: object descriptions (closest-hit)

use ash::vk;
use rtrt_gpu::descriptors::{write_acceleration_structure, write_buffer, write_image};
use rtrt_gpu::pipeline::{create_pipeline_layout, create_shader_module};
use rtrt_gpu::{
    DescriptorPool, DescriptorSetLayoutBuilder, GpuContext, GpuError, Result, SbtRegions,
};

use crate::sbt::{SbtLayout, ShaderBindingTable};

/// Push constants read by the miss and closest-hit stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RayTracePushConstants {
    /// Background written by the miss shader.
    pub clear_color: [f32; 4],
    pub light_position: [f32; 3],
    pub light_intensity: f32,
}

impl RayTracePushConstants {
    /// Size of push constants in bytes.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    /// Stages that read the block.
    pub const STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
        vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
            | vk::ShaderStageFlags::MISS_KHR.as_raw()
            | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw(),
    );
}

impl Default for RayTracePushConstants {
    fn default() -> Self {
        Self {
            clear_color: [1.0, 1.0, 1.0, 1.0],
            light_position: [10.0, 15.0, 8.0],
            light_intensity: 100.0,
        }
    }
}

fn descriptor_layout_builder<'a>() -> DescriptorSetLayoutBuilder<'a> {
    DescriptorSetLayoutBuilder::new()
        .acceleration_structure(0, vk::ShaderStageFlags::RAYGEN_KHR)
        .storage_image(1, vk::ShaderStageFlags::RAYGEN_KHR)
        .uniform_buffer(2, vk::ShaderStageFlags::RAYGEN_KHR)
        .storage_buffer(3, vk::ShaderStageFlags::CLOSEST_HIT_KHR)
}

/// Ray tracing pipeline, its layouts and shader binding table.
pub struct RayTracePipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
    sbt: ShaderBindingTable,
}

impl RayTracePipeline {
    /// Create the pipeline with one raygen, one miss and one triangle hit
    /// group.
    ///
    /// # Safety
    /// The context must have been created with ray tracing enabled.
    pub unsafe fn new(gpu: &GpuContext) -> Result<Self> {
        let loaders = gpu.ray_tracing().ok_or_else(|| {
            GpuError::ExtensionNotSupported("VK_KHR_ray_tracing_pipeline".to_string())
        })?;
        let device = gpu.device();

        let descriptor_set_layout = descriptor_layout_builder().build(device)?;
        let push_range = vk::PushConstantRange::default()
            .stage_flags(RayTracePushConstants::STAGES)
            .offset(0)
            .size(RayTracePushConstants::SIZE);

        let layout = match create_pipeline_layout(
            device,
            &[descriptor_set_layout],
            std::slice::from_ref(&push_range),
        ) {
            Ok(layout) => layout,
            Err(e) => {
                device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                return Err(e);
            }
        };

        let pipeline = match Self::create_pipeline(gpu, &loaders.pipeline, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                device.destroy_pipeline_layout(layout, None);
                device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                return Err(e);
            }
        };

        let sbt_layout = SbtLayout::new(&loaders.properties, 1, 1);
        let sbt = match ShaderBindingTable::new(gpu, pipeline, &sbt_layout) {
            Ok(sbt) => sbt,
            Err(e) => {
                device.destroy_pipeline(pipeline, None);
                device.destroy_pipeline_layout(layout, None);
                device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                return Err(e);
            }
        };

        tracing::info!("Created ray tracing pipeline");
        Ok(Self {
            pipeline,
            layout,
            descriptor_set_layout,
            sbt,
        })
    }

    unsafe fn create_pipeline(
        gpu: &GpuContext,
        rt_loader: &ash::khr::ray_tracing_pipeline::Device,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let device = gpu.device();
        let sources = [
            (rtrt_shaders::raygen_shader(), "Ray generation"),
            (rtrt_shaders::miss_shader(), "Miss"),
            (rtrt_shaders::closest_hit_shader(), "Closest hit"),
        ];
        let mut modules = Vec::with_capacity(sources.len());
        for (code, label) in sources {
            match create_shader_module(device, code, label) {
                Ok(module) => modules.push(module),
                Err(e) => {
                    for module in modules {
                        device.destroy_shader_module(module, None);
                    }
                    return Err(e);
                }
            }
        }

        let entry_point = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::RAYGEN_KHR)
                .module(modules[0])
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::MISS_KHR)
                .module(modules[1])
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::CLOSEST_HIT_KHR)
                .module(modules[2])
                .name(entry_point),
        ];

        let groups = [
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(0)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(1)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(2)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
        ];

        let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(1)
            .layout(layout);

        let created = rt_loader.create_ray_tracing_pipelines(
            vk::DeferredOperationKHR::null(),
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        );

        for module in modules {
            device.destroy_shader_module(module, None);
        }

        let pipelines = created
            .map_err(|e| GpuError::PipelineCreation(format!("Ray tracing pipeline: {e:?}")))?;
        pipelines
            .first()
            .copied()
            .ok_or_else(|| GpuError::PipelineCreation("Driver returned no pipeline".to_string()))
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set_layout
    }

    /// SBT regions for the trace dispatch.
    pub fn sbt_regions(&self) -> SbtRegions {
        self.sbt.regions()
    }

    /// Destroy the pipeline, its layouts and the SBT.
    ///
    /// # Safety
    /// The pipeline must not be in use.
    pub unsafe fn destroy(self, gpu: &GpuContext) -> Result<()> {
        let device = gpu.device();
        self.sbt.destroy(gpu)?;
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        Ok(())
    }
}

/// Resources bound into the ray tracing descriptor set.
#[derive(Debug, Clone, Copy)]
pub struct RayTraceBindings {
    pub tlas: vk::AccelerationStructureKHR,
    pub color_target: vk::ImageView,
    pub camera_buffer: vk::Buffer,
    pub object_buffer: vk::Buffer,
}

/// Descriptor pool and the single set of the ray tracing pipeline.
pub struct RayTraceDescriptors {
    pool: DescriptorPool,
    set: vk::DescriptorSet,
}

impl RayTraceDescriptors {
    /// Allocate the set and write every binding.
    ///
    /// # Safety
    /// Every handle in `bindings` must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        pipeline: &RayTracePipeline,
        bindings: &RayTraceBindings,
    ) -> Result<Self> {
        let device = gpu.device();
        let pool = DescriptorPool::new(device, 1, &descriptor_layout_builder().pool_sizes(1))?;
        let set = match pool.allocate(device, pipeline.descriptor_set_layout()) {
            Ok(set) => set,
            Err(e) => {
                pool.destroy(device);
                return Err(e);
            }
        };

        let descriptors = Self { pool, set };
        write_acceleration_structure(device, set, 0, bindings.tlas);
        descriptors.update_color_target(gpu, bindings.color_target);
        write_buffer(
            device,
            set,
            2,
            vk::DescriptorType::UNIFORM_BUFFER,
            bindings.camera_buffer,
        );
        write_buffer(
            device,
            set,
            3,
            vk::DescriptorType::STORAGE_BUFFER,
            bindings.object_buffer,
        );
        Ok(descriptors)
    }

    /// Point binding 1 at a new color target, after a resize.
    ///
    /// # Safety
    /// The set must not be in use by pending GPU work.
    pub unsafe fn update_color_target(&self, gpu: &GpuContext, view: vk::ImageView) {
        write_image(
            gpu.device(),
            self.set,
            1,
            vk::DescriptorType::STORAGE_IMAGE,
            view,
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
        );
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// # Safety
    /// The set must not be in use.
    pub unsafe fn destroy(self, gpu: &GpuContext) {
        self.pool.destroy(gpu.device());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_size() {
        assert_eq!(RayTracePushConstants::SIZE, 32);
    }

    #[test]
    fn push_constants_layout() {
        let pc = RayTracePushConstants {
            clear_color: [0.25, 0.5, 0.75, 1.0],
            light_position: [1.0, 2.0, 3.0],
            light_intensity: 42.0,
        };

        let bytes = bytemuck::bytes_of(&pc);
        assert_eq!(&bytes[0..4], &0.25f32.to_ne_bytes());
        assert_eq!(&bytes[16..20], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[24..28], &3.0f32.to_ne_bytes());
        assert_eq!(&bytes[28..32], &42.0f32.to_ne_bytes());
    }

    #[test]
    fn default_clear_is_white() {
        assert_eq!(RayTracePushConstants::default().clear_color, [1.0; 4]);
    }

    #[test]
    fn layout_needs_one_of_each_descriptor() {
        let sizes = descriptor_layout_builder().pool_sizes(1);
        assert_eq!(sizes.len(), 4);
        assert!(sizes.iter().all(|s| s.descriptor_count == 1));
    }
}
