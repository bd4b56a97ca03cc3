//! Rasterize path: scanline rendering of the scene into the color target.

use ash::vk;
use glam::{Mat4, Vec3};
use rtrt_gpu::{DeviceContext, RenderPassBegin};

/// Push constants of the scanline shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RasterPushConstants {
    pub model: [[f32; 4]; 4],
    /// Light position in `xyz`, intensity in `w`.
    pub light: [f32; 4],
    pub object_index: u32,
    pub _pad: [u32; 3],
}

impl RasterPushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
    pub const STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
        vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
    );

    pub fn new(model: Mat4, light_position: Vec3, light_intensity: f32, object_index: u32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            light: light_position.extend(light_intensity).to_array(),
            object_index,
            _pad: [0; 3],
        }
    }
}

/// One indexed draw of a scene object.
#[derive(Debug, Clone, Copy)]
pub struct RasterDraw {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub push: RasterPushConstants,
}

/// Handles the rasterize path records with. Built by the application.
#[derive(Debug, Clone)]
pub struct RasterPass {
    /// Render pass whose color attachment ends in `GENERAL`.
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// Camera uniforms at binding 0, object records at binding 1.
    pub descriptor_set: vk::DescriptorSet,
    pub draws: Vec<RasterDraw>,
    pub clear_color: [f32; 4],
}

impl RasterPass {
    pub fn clear_values(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
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

    /// Record the scene into `framebuffer`, one indexed draw per object.
    pub fn record(
        &self,
        device: &dyn DeviceContext,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) {
        let clear_values = self.clear_values();
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

        for draw in &self.draws {
            device.cmd_bind_vertex_buffer(cmd, 0, draw.vertex_buffer, 0);
            device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_push_constants(
                cmd,
                self.layout,
                RasterPushConstants::STAGES,
                0,
                bytemuck::bytes_of(&draw.push),
            );
            device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
        }

        device.cmd_end_render_pass(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use rtrt_gpu::mock::{MockDevice, Recorded, RecordedClear};

    fn pass(draws: usize) -> RasterPass {
        RasterPass {
            render_pass: vk::RenderPass::from_raw(1),
            pipeline: vk::Pipeline::from_raw(2),
            layout: vk::PipelineLayout::from_raw(3),
            descriptor_set: vk::DescriptorSet::from_raw(4),
            draws: (0..draws)
                .map(|i| RasterDraw {
                    vertex_buffer: vk::Buffer::from_raw(100 + i as u64),
                    index_buffer: vk::Buffer::from_raw(200 + i as u64),
                    index_count: 36,
                    push: RasterPushConstants::new(Mat4::IDENTITY, Vec3::Y, 50.0, i as u32),
                })
                .collect(),
            clear_color: [0.1, 0.2, 0.3, 1.0],
        }
    }

    #[test]
    fn push_constants_match_shader_block() {
        assert_eq!(RasterPushConstants::SIZE, 96);
        assert_eq!(std::mem::offset_of!(RasterPushConstants, light), 64);
        assert_eq!(std::mem::offset_of!(RasterPushConstants, object_index), 80);
    }

    #[test]
    fn one_indexed_draw_per_object() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        let framebuffer = vk::Framebuffer::from_raw(9);
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };

        pass(3).record(&device, cmd, framebuffer, extent);

        let commands = device.commands_for(cmd);
        assert_eq!(
            commands[0],
            Recorded::BeginRenderPass {
                cmd,
                render_pass: vk::RenderPass::from_raw(1),
                framebuffer,
                width: 800,
                height: 600,
                clear_values: vec![
                    RecordedClear::Color([0.1, 0.2, 0.3, 1.0]),
                    RecordedClear::DepthStencil {
                        depth: 1.0,
                        stencil: 0
                    },
                ],
            }
        );
        assert_eq!(
            device.count(|r| matches!(r, Recorded::DrawIndexed { index_count: 36, .. })),
            3
        );
        let pushed: Vec<u32> = commands
            .iter()
            .filter_map(|r| match r {
                Recorded::PushConstants { data, stages, .. } => {
                    assert_eq!(*stages, RasterPushConstants::STAGES);
                    Some(bytemuck::pod_read_unaligned::<RasterPushConstants>(data).object_index)
                }
                _ => None,
            })
            .collect();
        assert_eq!(pushed, vec![0, 1, 2]);
        assert_eq!(commands.last(), Some(&Recorded::EndRenderPass(cmd)));
    }

    #[test]
    fn empty_scene_still_clears() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        pass(0).record(
            &device,
            cmd,
            vk::Framebuffer::from_raw(9),
            vk::Extent2D {
                width: 4,
                height: 4,
            },
        );
        assert_eq!(device.count(|r| matches!(r, Recorded::BeginRenderPass { .. })), 1);
        assert_eq!(device.count(|r| matches!(r, Recorded::DrawIndexed { .. })), 0);
    }
}
