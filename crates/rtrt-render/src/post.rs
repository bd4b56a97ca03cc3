//! Post-process pass: tone map the color target onto the swapchain image.

use ash::vk;
use rtrt_gpu::{DeviceContext, RenderPassBegin};

use crate::overlay::OverlayRenderer;

/// Handles the post-process pass records with.
#[derive(Debug, Clone, Copy)]
pub struct PostProcessPass {
    /// Swapchain render pass with a color and a depth attachment.
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// Samples the shared color target.
    pub descriptor_set: vk::DescriptorSet,
}

impl PostProcessPass {
    /// White color clear and a 1.0/0 depth/stencil clear.
    pub fn clear_values() -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [1.0, 1.0, 1.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ]
    }

    /// Record the full-screen tone-mapping draw into `framebuffer`, then the
    /// overlay, then end the render pass.
    ///
    /// The render pass is ended even when the overlay fails; the overlay's
    /// error is returned afterwards.
    pub fn record(
        &self,
        device: &dyn DeviceContext,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        overlay: &mut dyn OverlayRenderer,
    ) -> rtrt_gpu::Result<()> {
        let clear_values = Self::clear_values();
        device.cmd_begin_render_pass(
            cmd,
            &RenderPassBegin {
                render_pass: self.render_pass,
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                },
                clear_values: &clear_values,
            },
        );
        device.cmd_set_viewport(cmd, extent);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.layout,
            0,
            &[self.descriptor_set],
        );
        // Full-screen triangle from the vertex index
        device.cmd_draw(cmd, 3, 1, 0, 0);

        let overlay_result = overlay.record(device, cmd, extent);
        device.cmd_end_render_pass(cmd);
        overlay_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{DrawListOverlay, NoOverlay, OverlayDrawData, OverlayQuad};
    use ash::vk::Handle;
    use rtrt_gpu::mock::{MockDevice, Recorded, RecordedClear};
    use rtrt_gpu::GpuError;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    fn pass() -> PostProcessPass {
        PostProcessPass {
            render_pass: vk::RenderPass::from_raw(11),
            pipeline: vk::Pipeline::from_raw(12),
            layout: vk::PipelineLayout::from_raw(13),
            descriptor_set: vk::DescriptorSet::from_raw(14),
        }
    }

    struct FailingOverlay;

    impl OverlayRenderer for FailingOverlay {
        fn record(
            &mut self,
            _device: &dyn DeviceContext,
            _cmd: vk::CommandBuffer,
            _extent: vk::Extent2D,
        ) -> rtrt_gpu::Result<()> {
            Err(GpuError::Other("overlay".into()))
        }
    }

    #[test]
    fn single_fullscreen_draw() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        let framebuffer = vk::Framebuffer::from_raw(15);

        pass()
            .record(&device, cmd, framebuffer, EXTENT, &mut NoOverlay)
            .unwrap();

        let commands = device.commands_for(cmd);
        assert_eq!(
            commands,
            vec![
                Recorded::BeginRenderPass {
                    cmd,
                    render_pass: vk::RenderPass::from_raw(11),
                    framebuffer,
                    width: 800,
                    height: 600,
                    clear_values: vec![
                        RecordedClear::Color([1.0, 1.0, 1.0, 1.0]),
                        RecordedClear::DepthStencil {
                            depth: 1.0,
                            stencil: 0
                        },
                    ],
                },
                Recorded::SetViewport {
                    cmd,
                    width: 800,
                    height: 600
                },
                Recorded::BindPipeline {
                    cmd,
                    bind_point: vk::PipelineBindPoint::GRAPHICS,
                    pipeline: vk::Pipeline::from_raw(12),
                },
                Recorded::BindDescriptorSets {
                    cmd,
                    bind_point: vk::PipelineBindPoint::GRAPHICS,
                    layout: vk::PipelineLayout::from_raw(13),
                    first_set: 0,
                    sets: vec![vk::DescriptorSet::from_raw(14)],
                },
                Recorded::Draw {
                    cmd,
                    vertex_count: 3,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
                Recorded::EndRenderPass(cmd),
            ]
        );
        assert_eq!(device.count(|r| matches!(r, Recorded::BindVertexBuffer { .. })), 0);
    }

    #[test]
    fn overlay_is_recorded_inside_the_render_pass() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        let mut data = OverlayDrawData::new(
            vk::Pipeline::from_raw(20),
            vk::PipelineLayout::from_raw(21),
            vk::ShaderStageFlags::VERTEX,
        );
        data.push_quad(OverlayQuad::from_pixels(0.0, 0.0, 10.0, 10.0, EXTENT, [1.0; 4]));
        let mut overlay = DrawListOverlay::new();
        overlay.set_draw_data(data);

        pass()
            .record(&device, cmd, vk::Framebuffer::from_raw(15), EXTENT, &mut overlay)
            .unwrap();

        let commands = device.commands_for(cmd);
        let tone_map = commands
            .iter()
            .position(|r| matches!(r, Recorded::Draw { vertex_count: 3, .. }))
            .unwrap();
        let quad = commands
            .iter()
            .position(|r| matches!(r, Recorded::Draw { vertex_count: 6, .. }))
            .unwrap();
        let end = commands
            .iter()
            .position(|r| matches!(r, Recorded::EndRenderPass(_)))
            .unwrap();
        assert!(tone_map < quad && quad < end);
        assert_eq!(end, commands.len() - 1);
    }

    #[test]
    fn failing_overlay_still_ends_render_pass() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        let result = pass().record(
            &device,
            cmd,
            vk::Framebuffer::from_raw(15),
            EXTENT,
            &mut FailingOverlay,
        );
        assert!(result.is_err());
        assert_eq!(device.commands_for(cmd).last(), Some(&Recorded::EndRenderPass(cmd)));
    }
}
