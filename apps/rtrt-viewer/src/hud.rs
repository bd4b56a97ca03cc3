//! Heads-up display drawn by the overlay hook of the post-process pass.

use ash::vk;
use rtrt_render::{OverlayDrawData, OverlayQuad, RenderPath};

const MARGIN: f32 = 16.0;
const PANEL_WIDTH: f32 = 220.0;
const PANEL_HEIGHT: f32 = 56.0;
const INDICATOR_SIZE: f32 = 24.0;
const BAR_HEIGHT: f32 = 8.0;

/// Frame time that fills the whole bar.
const BAR_FULL_SCALE_MS: f32 = 1000.0 / 30.0;
/// Weight of the newest sample in the smoothed frame time.
const SMOOTHING: f32 = 0.1;

const PANEL_COLOR: [f32; 4] = [0.05, 0.05, 0.08, 0.7];
const RASTER_COLOR: [f32; 4] = [0.25, 0.55, 0.95, 1.0];
const RAYTRACE_COLOR: [f32; 4] = [0.95, 0.6, 0.15, 1.0];

/// Builds the overlay quads for the current frame.
pub struct Hud {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    smoothed_ms: Option<f32>,
}

impl Hud {
    pub fn new(pipeline: vk::Pipeline, layout: vk::PipelineLayout) -> Self {
        Self {
            pipeline,
            layout,
            smoothed_ms: None,
        }
    }

    /// Feed the latest frame delta, in seconds.
    pub fn record_frame_time(&mut self, dt: f32) {
        let ms = dt * 1000.0;
        self.smoothed_ms = Some(match self.smoothed_ms {
            Some(prev) => prev + (ms - prev) * SMOOTHING,
            None => ms,
        });
    }

    pub fn frame_time_ms(&self) -> f32 {
        self.smoothed_ms.unwrap_or(0.0)
    }

    /// Panel, path indicator and frame-time bar. `pinned` dims the indicator
    /// when the path cannot be switched.
    pub fn build(&self, extent: vk::Extent2D, path: RenderPath, pinned: bool) -> OverlayDrawData {
        let mut data = OverlayDrawData::new(self.pipeline, self.layout, vk::ShaderStageFlags::VERTEX);

        data.push_quad(OverlayQuad::from_pixels(
            MARGIN,
            MARGIN,
            PANEL_WIDTH,
            PANEL_HEIGHT,
            extent,
            PANEL_COLOR,
        ));

        let mut indicator = match path {
            RenderPath::Rasterize => RASTER_COLOR,
            RenderPath::Raytrace => RAYTRACE_COLOR,
        };
        if pinned {
            indicator[3] = 0.4;
        }
        let inner = MARGIN + 8.0;
        data.push_quad(OverlayQuad::from_pixels(
            inner,
            inner,
            INDICATOR_SIZE,
            INDICATOR_SIZE,
            extent,
            indicator,
        ));

        let bar_left = inner + INDICATOR_SIZE + 8.0;
        let bar_max = MARGIN + PANEL_WIDTH - 8.0 - bar_left;
        let fill = (self.frame_time_ms() / BAR_FULL_SCALE_MS).clamp(0.0, 1.0);
        if fill > 0.0 {
            data.push_quad(OverlayQuad::from_pixels(
                bar_left,
                inner + (INDICATOR_SIZE - BAR_HEIGHT) / 2.0,
                bar_max * fill,
                BAR_HEIGHT,
                extent,
                [fill, 1.0 - fill, 0.2, 0.9],
            ));
        }

        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    fn quad_color(data: &OverlayDrawData, index: usize) -> [f32; 4] {
        let bytes = &data.draws[index].push_constants;
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        [floats[4], floats[5], floats[6], floats[7]]
    }

    #[test]
    fn no_bar_before_first_sample() {
        let hud = Hud::new(vk::Pipeline::null(), vk::PipelineLayout::null());
        let data = hud.build(EXTENT, RenderPath::Rasterize, false);
        assert_eq!(data.draws.len(), 2);
        assert!(data
            .draws
            .iter()
            .all(|d| d.vertex_count == OverlayQuad::VERTEX_COUNT));
    }

    #[test]
    fn indicator_follows_path() {
        let hud = Hud::new(vk::Pipeline::null(), vk::PipelineLayout::null());
        let raster = hud.build(EXTENT, RenderPath::Rasterize, false);
        let raytrace = hud.build(EXTENT, RenderPath::Raytrace, false);
        assert_eq!(quad_color(&raster, 1), RASTER_COLOR);
        assert_eq!(quad_color(&raytrace, 1), RAYTRACE_COLOR);

        let pinned = hud.build(EXTENT, RenderPath::Rasterize, true);
        assert_relative_eq!(quad_color(&pinned, 1)[3], 0.4);
    }

    #[test]
    fn frame_time_is_smoothed() {
        let mut hud = Hud::new(vk::Pipeline::null(), vk::PipelineLayout::null());
        hud.record_frame_time(0.010);
        assert_relative_eq!(hud.frame_time_ms(), 10.0, epsilon = 1e-4);
        hud.record_frame_time(0.020);
        assert_relative_eq!(hud.frame_time_ms(), 11.0, epsilon = 1e-4);

        let data = hud.build(EXTENT, RenderPath::Raytrace, false);
        assert_eq!(data.draws.len(), 3);
    }
}
