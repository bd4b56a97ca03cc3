//! Overlay capability recorded inside the post-process render pass.
//!
//! The renderer is built with one [`OverlayRenderer`]. [`NoOverlay`] records
//! nothing; [`DrawListOverlay`] replays draw data handed to it each frame.

use ash::vk;
use rtrt_gpu::{DeviceContext, Result};

/// Injection point immediately before the post-process render pass ends.
pub trait OverlayRenderer {
    /// Replace the draw data recorded by subsequent frames.
    fn set_draw_data(&mut self, _data: OverlayDrawData) {}

    /// Record into `cmd`, inside the active post-process render pass.
    fn record(
        &mut self,
        device: &dyn DeviceContext,
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) -> Result<()>;
}

/// Overlay that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverlay;

impl OverlayRenderer for NoOverlay {
    fn record(
        &mut self,
        _device: &dyn DeviceContext,
        _cmd: vk::CommandBuffer,
        _extent: vk::Extent2D,
    ) -> Result<()> {
        Ok(())
    }
}

/// One vertex-less draw with its push-constant payload.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayDraw {
    pub vertex_count: u32,
    pub push_constants: Vec<u8>,
}

/// Pre-built overlay draw data for one or more frames.
#[derive(Debug, Clone, Default)]
pub struct OverlayDrawData {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub push_stages: vk::ShaderStageFlags,
    pub draws: Vec<OverlayDraw>,
}

impl OverlayDrawData {
    pub fn new(
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        push_stages: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            pipeline,
            layout,
            push_stages,
            draws: Vec::new(),
        }
    }

    /// Append a solid quad.
    pub fn push_quad(&mut self, quad: OverlayQuad) {
        self.draws.push(OverlayDraw {
            vertex_count: OverlayQuad::VERTEX_COUNT,
            push_constants: bytemuck::bytes_of(&quad).to_vec(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }
}

/// Push constants of the overlay shaders: a rectangle in normalized device
/// coordinates and its color.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OverlayQuad {
    /// `x, y, width, height`.
    pub rect: [f32; 4],
    pub color: [f32; 4],
}

impl OverlayQuad {
    pub const VERTEX_COUNT: u32 = 6;
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    /// A quad from pixel coordinates within `extent`.
    pub fn from_pixels(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        extent: vk::Extent2D,
        color: [f32; 4],
    ) -> Self {
        let w = extent.width.max(1) as f32;
        let h = extent.height.max(1) as f32;
        Self {
            rect: [
                x / w * 2.0 - 1.0,
                y / h * 2.0 - 1.0,
                width / w * 2.0,
                height / h * 2.0,
            ],
            color,
        }
    }
}

/// Overlay replaying the latest [`OverlayDrawData`].
#[derive(Debug, Default)]
pub struct DrawListOverlay {
    data: Option<OverlayDrawData>,
}

impl DrawListOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw_data(&self) -> Option<&OverlayDrawData> {
        self.data.as_ref()
    }
}

impl OverlayRenderer for DrawListOverlay {
    fn set_draw_data(&mut self, data: OverlayDrawData) {
        self.data = Some(data);
    }

    fn record(
        &mut self,
        device: &dyn DeviceContext,
        cmd: vk::CommandBuffer,
        _extent: vk::Extent2D,
    ) -> Result<()> {
        let Some(data) = self.data.as_ref().filter(|d| !d.is_empty()) else {
            return Ok(());
        };

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, data.pipeline);
        for draw in &data.draws {
            if !draw.push_constants.is_empty() {
                device.cmd_push_constants(cmd, data.layout, data.push_stages, 0, &draw.push_constants);
            }
            device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ash::vk::Handle;
    use rtrt_gpu::mock::{MockDevice, Recorded};

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn no_overlay_records_nothing() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        NoOverlay.record(&device, cmd, EXTENT).unwrap();
        assert!(device.commands_for(cmd).is_empty());
    }

    #[test]
    fn draw_list_replays_quads() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        let layout = vk::PipelineLayout::from_raw(5);
        let mut data = OverlayDrawData::new(
            vk::Pipeline::from_raw(4),
            layout,
            vk::ShaderStageFlags::VERTEX,
        );
        data.push_quad(OverlayQuad::from_pixels(0.0, 0.0, 80.0, 60.0, EXTENT, [1.0; 4]));
        data.push_quad(OverlayQuad::from_pixels(100.0, 0.0, 80.0, 60.0, EXTENT, [0.0; 4]));

        let mut overlay = DrawListOverlay::new();
        overlay.set_draw_data(data);
        overlay.record(&device, cmd, EXTENT).unwrap();

        let commands = device.commands_for(cmd);
        assert_eq!(commands.len(), 5);
        assert!(matches!(commands[0], Recorded::BindPipeline { .. }));
        assert!(matches!(
            commands[1],
            Recorded::PushConstants { layout: l, offset: 0, .. } if l == layout
        ));
        assert_eq!(
            device.count(|r| matches!(r, Recorded::Draw { vertex_count: 6, .. })),
            2
        );
    }

    #[test]
    fn empty_draw_list_binds_nothing() {
        let device = MockDevice::new();
        let cmd = device.allocate_command_buffer().unwrap();
        let mut overlay = DrawListOverlay::new();
        overlay.record(&device, cmd, EXTENT).unwrap();
        overlay.set_draw_data(OverlayDrawData::default());
        overlay.record(&device, cmd, EXTENT).unwrap();
        assert!(device.commands_for(cmd).is_empty());
    }

    #[test]
    fn pixel_quad_maps_to_ndc() {
        let quad = OverlayQuad::from_pixels(400.0, 300.0, 400.0, 150.0, EXTENT, [1.0; 4]);
        assert_relative_eq!(quad.rect[0], 0.0);
        assert_relative_eq!(quad.rect[1], 0.0);
        assert_relative_eq!(quad.rect[2], 1.0);
        assert_relative_eq!(quad.rect[3], 0.5);
        assert_eq!(OverlayQuad::SIZE, 32);
    }
}
