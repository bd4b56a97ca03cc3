//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rtrt_gpu::GpuContextBuilder;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::app::RtrtApp;
use crate::config::AppConfig;
use crate::context::AppContext;

/// Run an `RtrtApp` with the given configuration.
///
/// This function initializes logging, creates the window and GPU context,
/// and runs the event loop until the application exits or a frame fails
/// fatally.
pub fn run_app<A: RtrtApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);
    if config.force_raster {
        info!("Rasterize path forced");
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's ApplicationHandler.
struct AppRunner<A: RtrtApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    /// Error that ended the event loop.
    failure: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: RtrtApp> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    // FPS tracking
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl<A: RtrtApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown(event_loop);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match code {
                KeyCode::Escape => {
                    info!("Escape pressed");
                    self.shutdown(event_loop);
                }
                KeyCode::Space => {
                    if let Some(state) = &mut self.state {
                        if let Some(path) = state.app.toggle_path() {
                            debug!(%path, "Render path toggled");
                        }
                    }
                }
                _ => {}
            },
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                match state.render_frame() {
                    Ok(()) => state.ctx.window.request_redraw(),
                    Err(e) => {
                        error!("Fatal frame error: {e:#}");
                        self.failure = Some(e);
                        self.shutdown(event_loop);
                    }
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e:#}");
                        self.failure = Some(e);
                        self.shutdown(event_loop);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: RtrtApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .api_dump(self.config.api_dump)
            .ray_tracing(!self.config.force_raster)
            .build()?;

        info!("GPU: {}", gpu.capabilities().summary());

        // SAFETY: The window was just created by the event loop
        let mut ctx = unsafe {
            AppContext::new(
                window,
                gpu,
                self.config.vsync,
                self.config.effective_initial_path(),
                !self.config.force_raster,
                self.config.overlay,
            )?
        };

        let app = A::init(&mut ctx)?;

        let target_frame_time = self
            .config
            .target_fps
            .filter(|fps| *fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

        Ok(AppState {
            ctx,
            app,
            target_frame_time,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }
}

impl<A: RtrtApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let now = Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;

        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
        }

        self.app.update(&self.ctx, dt);

        match self.app.render(&self.ctx) {
            Ok(()) => self.ctx.frame_count += 1,
            Err(e) if e.is_recoverable() => {
                debug!("{e}, recreating swapchain");
                let size = self.ctx.window.inner_size();
                self.handle_resize(size.width, size.height)?;
            }
            Err(e) => return Err(e.into()),
        }

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        // Minimized; keep the old swapchain until the window has an area again
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.ctx.gpu.wait_idle()?;
        // SAFETY: The device is idle
        unsafe {
            self.ctx.recreate_swapchain(width, height)?;
        }

        self.app.on_resize(&mut self.ctx, width, height)?;

        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn cleanup(&mut self) {
        // Print FPS statistics
        if self.ctx.frame_count > 0 {
            let avg_fps = self.fps_sum / self.ctx.frame_count as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first
        self.app.cleanup(&mut self.ctx);

        // SAFETY: The device is idle and the app released its resources
        unsafe {
            self.ctx.cleanup();
        }

        info!("Cleanup complete");
    }
}
