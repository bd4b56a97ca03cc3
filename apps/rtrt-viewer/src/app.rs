//! Viewer application implementation.

use std::collections::HashSet;

use tracing::{error, info};
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use rtrt_app::{AppContext, Camera, FrameError, RenderPath, RtrtApp, WindowEvent};
use rtrt_render::{DrawListOverlay, NoOverlay, OverlayRenderer, Renderer};

use crate::hud::Hud;
use crate::resources::ViewerResources;
use crate::scene::Scene;

/// Orbit speed in radians per second.
const ORBIT_SPEED: f32 = 1.2;

/// Field of view of the camera.
const FOV_DEGREES: f32 = 60.0;

/// Viewer application state.
pub struct Viewer {
    renderer: Option<Renderer>,
    resources: Option<ViewerResources>,
    scene: Scene,
    camera: Camera,
    hud: Option<Hud>,
    /// Arrow keys currently held.
    held: HashSet<KeyCode>,
}

impl Viewer {
    fn orbit_input(&self) -> (f32, f32) {
        let axis = |negative: KeyCode, positive: KeyCode| {
            f32::from(u8::from(self.held.contains(&positive)))
                - f32::from(u8::from(self.held.contains(&negative)))
        };
        (
            axis(KeyCode::ArrowLeft, KeyCode::ArrowRight),
            axis(KeyCode::ArrowDown, KeyCode::ArrowUp),
        )
    }
}

impl RtrtApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let scene = Scene::demo();

        // SAFETY: The swapchain was created from this GPU context
        let resources =
            unsafe { ViewerResources::new(&ctx.gpu, &ctx.swapchain, &scene, ctx.ray_tracing)? };

        let hud = ctx.overlay.then(|| {
            let (pipeline, layout) = resources.overlay_pipeline();
            Hud::new(pipeline, layout)
        });
        let overlay: Box<dyn OverlayRenderer> = if hud.is_some() {
            Box::new(DrawListOverlay::new())
        } else {
            Box::new(NoOverlay)
        };

        // The selector pins itself to rasterize when no ray-trace pass exists
        let config = resources.renderer_config(&scene, &ctx.swapchain, overlay, ctx.initial_path);
        let renderer = Renderer::new(ctx.device(), config)?;

        let camera = Camera::new(
            scene.camera_start,
            scene.focus,
            FOV_DEGREES.to_radians(),
            ctx.aspect_ratio(),
        );

        info!(
            path = %renderer.selector().requested(),
            ray_tracing = resources.ray_tracing_available(),
            "Viewer ready. Space toggles the render path, arrow keys orbit"
        );

        Ok(Self {
            renderer: Some(renderer),
            resources: Some(resources),
            scene,
            camera,
            hud,
            held: HashSet::new(),
        })
    }

    fn update(&mut self, ctx: &AppContext, dt: f32) {
        let (yaw, pitch) = self.orbit_input();
        if yaw != 0.0 || pitch != 0.0 {
            self.camera
                .orbit(self.scene.focus, yaw * ORBIT_SPEED * dt, pitch * ORBIT_SPEED * dt);
        }

        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        renderer.set_camera(&self.camera);

        if let Some(hud) = self.hud.as_mut() {
            hud.record_frame_time(dt);
            let selector = renderer.selector();
            let data = hud.build(
                ctx.extent(),
                selector.requested(),
                !selector.ray_tracing_supported(),
            );
            renderer.overlay_mut().set_draw_data(data);
        }
    }

    fn render(&mut self, _ctx: &AppContext) -> Result<(), FrameError> {
        match self.renderer.as_mut() {
            Some(renderer) => renderer.draw_frame(),
            None => Ok(()),
        }
    }

    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        self.camera.set_viewport(width, height);

        let (Some(renderer), Some(resources)) = (self.renderer.as_mut(), self.resources.as_mut())
        else {
            return Ok(());
        };
        // SAFETY: The runner waits for the device to go idle before resizing
        let targets = unsafe { resources.resize(&ctx.gpu, &ctx.swapchain)? };
        renderer.set_targets(targets);
        Ok(())
    }

    fn toggle_path(&mut self) -> Option<RenderPath> {
        Some(self.renderer.as_mut()?.selector_mut().toggle())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput {
            event:
                KeyEvent {
                    physical_key: PhysicalKey::Code(code),
                    state,
                    ..
                },
            ..
        } = event
        {
            if matches!(
                code,
                KeyCode::ArrowLeft | KeyCode::ArrowRight | KeyCode::ArrowUp | KeyCode::ArrowDown
            ) {
                match state {
                    ElementState::Pressed => self.held.insert(*code),
                    ElementState::Released => self.held.remove(code),
                };
                return true;
            }
        }
        false
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        if let Some(renderer) = self.renderer.take() {
            let stats = renderer.stats();
            info!(
                frames = stats.frames,
                raster = stats.raster_frames,
                raytrace = stats.raytrace_frames,
                stale = stats.stale_frames,
                "Renderer statistics"
            );
            if let Err(e) = renderer.destroy() {
                error!("Failed to destroy renderer: {e}");
            }
        }

        if let Some(resources) = self.resources.take() {
            // SAFETY: The device is idle and the renderer is gone
            if let Err(e) = unsafe { resources.destroy(&ctx.gpu) } {
                error!("Failed to destroy viewer resources: {e:#}");
            }
        }
    }
}
