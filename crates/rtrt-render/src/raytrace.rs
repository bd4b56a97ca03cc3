//! Ray-trace path: one trace dispatch over the window extent.

use ash::vk;
use rtrt_gpu::{DeviceContext, Result, SbtRegions};
use rtrt_raytrace::{RayTracePipeline, RayTracePushConstants};

/// Handles the ray-trace path records with.
#[derive(Debug, Clone, Copy)]
pub struct RayTracePass {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// TLAS, color target, camera uniforms and object records.
    pub descriptor_set: vk::DescriptorSet,
    pub sbt: SbtRegions,
    pub push: RayTracePushConstants,
}

impl RayTracePass {
    /// Take pipeline, layout and binding table regions from `pipeline`.
    pub fn from_pipeline(pipeline: &RayTracePipeline, descriptor_set: vk::DescriptorSet) -> Self {
        Self {
            pipeline: pipeline.pipeline(),
            layout: pipeline.layout(),
            descriptor_set,
            sbt: pipeline.sbt_regions(),
            push: RayTracePushConstants::default(),
        }
    }

    /// Trace one ray per pixel of `extent` into the color target.
    pub fn record(
        &self,
        device: &dyn DeviceContext,
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) -> Result<()> {
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::RAY_TRACING_KHR, self.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            self.layout,
            0,
            &[self.descriptor_set],
        );
        device.cmd_push_constants(
            cmd,
            self.layout,
            RayTracePushConstants::STAGES,
            0,
            bytemuck::bytes_of(&self.push),
        );
        device.cmd_trace_rays(cmd, &self.sbt, extent.width, extent.height, 1)
    }
}
