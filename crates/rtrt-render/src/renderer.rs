//! The per-frame driver.

use std::sync::Arc;

use ash::vk;
use rtrt_gpu::transition::single_subresource;
use rtrt_gpu::{DeviceContext, GpuError, ImageBarrier, LayoutScope};

use crate::camera::{record_camera_update, Camera, CameraUniforms};
use crate::error::FrameError;
use crate::frame::{FrameState, FrameSynchronizer};
use crate::overlay::OverlayRenderer;
use crate::path::{PathSelector, RenderPath};
use crate::post::PostProcessPass;
use crate::raster::RasterPass;
use crate::raytrace::RayTracePass;

/// Size-dependent handles, rebuilt by the application whenever the
/// swapchain is recreated.
#[derive(Debug, Clone)]
pub struct FrameTargets {
    pub swapchain: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    /// Shared color target, kept in `GENERAL`.
    pub color_target: vk::Image,
    /// Framebuffer of the rasterize path over the color target.
    pub raster_framebuffer: vk::Framebuffer,
    /// One post-process framebuffer per swapchain image.
    pub post_framebuffers: Vec<vk::Framebuffer>,
}

/// Everything the renderer records with. The handles are built and owned by
/// the application.
pub struct RendererConfig {
    pub targets: FrameTargets,
    pub post: PostProcessPass,
    pub raster: RasterPass,
    /// `None` pins the renderer to the rasterize path.
    pub ray_trace: Option<RayTracePass>,
    pub camera_buffer: vk::Buffer,
    pub overlay: Box<dyn OverlayRenderer>,
    pub initial_path: RenderPath,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames handed to the queue.
    pub frames: u64,
    pub raster_frames: u64,
    pub raytrace_frames: u64,
    /// Frames that reported a stale swapchain, at acquire or present.
    pub stale_frames: u64,
    /// Fence polls made by the most recent frame.
    pub last_poll_count: u64,
}

/// Records and submits one frame at a time into a single persistent command
/// buffer.
pub struct Renderer {
    device: Arc<dyn DeviceContext>,
    cmd: vk::CommandBuffer,
    sync: FrameSynchronizer,
    selector: PathSelector,
    targets: FrameTargets,
    post: PostProcessPass,
    raster: RasterPass,
    ray_trace: Option<RayTracePass>,
    camera_buffer: vk::Buffer,
    camera: CameraUniforms,
    overlay: Box<dyn OverlayRenderer>,
    stats: FrameStats,
}

impl Renderer {
    /// Allocate the persistent command buffer and frame synchronization
    /// primitives.
    pub fn new(device: Arc<dyn DeviceContext>, config: RendererConfig) -> Result<Self, GpuError> {
        let cmd = device.allocate_command_buffer()?;
        let sync = match FrameSynchronizer::new(device.as_ref()) {
            Ok(sync) => sync,
            Err(e) => {
                device.free_command_buffer(cmd);
                return Err(e);
            }
        };
        let selector = PathSelector::new(config.initial_path, config.ray_trace.is_some());

        tracing::info!(
            path = %selector.requested(),
            ray_tracing = selector.ray_tracing_supported(),
            width = config.targets.extent.width,
            height = config.targets.extent.height,
            "Renderer created"
        );

        Ok(Self {
            device,
            cmd,
            sync,
            selector,
            targets: config.targets,
            post: config.post,
            raster: config.raster,
            ray_trace: config.ray_trace,
            camera_buffer: config.camera_buffer,
            camera: Camera::default().uniforms(),
            overlay: config.overlay,
            stats: FrameStats::default(),
        })
    }

    /// Render one frame.
    ///
    /// Acquires an image and waits for the previous frame, records the
    /// latched path followed by the post-process pass, then submits and
    /// presents. [`FrameError::SwapchainStale`] asks the caller to recreate
    /// the swapchain and call [`set_targets`](Self::set_targets).
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn draw_frame(&mut self) -> Result<(), FrameError> {
        let device = Arc::clone(&self.device);
        let device = device.as_ref();
        let swapchain = self.targets.swapchain;

        let image_index = match self.sync.prepare(device, swapchain) {
            Ok(index) => index,
            Err(e) => return Err(self.note_failure(e)),
        };
        self.stats.last_poll_count = self.sync.last_poll_count();

        let path = self.selector.latch();
        self.sync.begin_recording();
        if let Err(e) = self.record(device, image_index, path) {
            tracing::error!(%path, image_index, "Frame recording failed: {e}");
            if let Err(release) = self.sync.abandon(device) {
                tracing::error!("Failed to release the abandoned frame: {release}");
                return Err(FrameError::Device(release));
            }
            return Err(FrameError::Recording(e));
        }

        let result = self.sync.submit(device, swapchain, image_index, self.cmd);
        if self.sync.state() == FrameState::Submitted {
            self.stats.frames += 1;
            match path {
                RenderPath::Rasterize => self.stats.raster_frames += 1,
                RenderPath::Raytrace => self.stats.raytrace_frames += 1,
            }
        }
        result.map_err(|e| self.note_failure(e))
    }

    fn note_failure(&mut self, error: FrameError) -> FrameError {
        if error.is_recoverable() {
            self.stats.stale_frames += 1;
        }
        error
    }

    fn record(
        &mut self,
        device: &dyn DeviceContext,
        image_index: u32,
        path: RenderPath,
    ) -> rtrt_gpu::Result<()> {
        let cmd = self.cmd;
        let extent = self.targets.extent;
        let post_framebuffer = self
            .targets
            .post_framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                GpuError::InvalidState(format!("No framebuffer for swapchain image {image_index}"))
            })?;

        device.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let reader_stage = match path {
            RenderPath::Rasterize => vk::PipelineStageFlags::VERTEX_SHADER,
            RenderPath::Raytrace => vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        };
        record_camera_update(device, cmd, self.camera_buffer, &self.camera, reader_stage);

        let written = match path {
            RenderPath::Rasterize => {
                self.raster
                    .record(device, cmd, self.targets.raster_framebuffer, extent);
                LayoutScope {
                    layout: vk::ImageLayout::GENERAL,
                    access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                }
            }
            RenderPath::Raytrace => {
                let pass = self.ray_trace.as_ref().ok_or_else(|| {
                    GpuError::InvalidState("Ray-trace path latched without a pipeline".into())
                })?;
                pass.record(device, cmd, extent)?;
                LayoutScope {
                    layout: vk::ImageLayout::GENERAL,
                    access: vk::AccessFlags::SHADER_WRITE,
                    stage: vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
                }
            }
        };

        device.cmd_image_barrier(
            cmd,
            &ImageBarrier {
                image: self.targets.color_target,
                subresource_range: single_subresource(vk::ImageAspectFlags::COLOR),
                src: written,
                dst: LayoutScope {
                    layout: vk::ImageLayout::GENERAL,
                    access: vk::AccessFlags::SHADER_READ,
                    stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                },
            },
        );

        self.post
            .record(device, cmd, post_framebuffer, extent, self.overlay.as_mut())?;

        device.end_command_buffer(cmd)
    }

    /// Replace the size-dependent handles after swapchain recreation.
    pub fn set_targets(&mut self, targets: FrameTargets) {
        tracing::debug!(
            width = targets.extent.width,
            height = targets.extent.height,
            images = targets.post_framebuffers.len(),
            "Frame targets replaced"
        );
        self.targets = targets;
    }

    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    /// Camera written to the uniform buffer by subsequent frames.
    pub fn set_camera(&mut self, camera: &Camera) {
        self.camera = camera.uniforms();
    }

    pub fn selector(&self) -> &PathSelector {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut PathSelector {
        &mut self.selector
    }

    pub fn overlay_mut(&mut self) -> &mut dyn OverlayRenderer {
        self.overlay.as_mut()
    }

    pub fn raster_mut(&mut self) -> &mut RasterPass {
        &mut self.raster
    }

    pub fn ray_trace_mut(&mut self) -> Option<&mut RayTracePass> {
        self.ray_trace.as_mut()
    }

    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.sync
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Wait for the queue to drain, then release the command buffer and
    /// synchronization primitives.
    pub fn destroy(self) -> Result<(), GpuError> {
        self.device.queue_wait_idle()?;
        self.device.free_command_buffer(self.cmd);
        self.sync.destroy(self.device.as_ref());
        tracing::debug!(frames = self.stats.frames, "Renderer destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StalePoint;
    use crate::overlay::{DrawListOverlay, NoOverlay, OverlayDrawData, OverlayQuad};
    use crate::raster::{RasterDraw, RasterPushConstants};
    use ash::vk::Handle;
    use glam::{Mat4, Vec3};
    use rtrt_gpu::mock::{FenceBehavior, MockDevice, Recorded};
    use rtrt_gpu::SbtRegions;
    use rtrt_raytrace::RayTracePushConstants;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    fn targets() -> FrameTargets {
        FrameTargets {
            swapchain: vk::SwapchainKHR::from_raw(0x5C),
            extent: EXTENT,
            color_target: vk::Image::from_raw(0xC0),
            raster_framebuffer: vk::Framebuffer::from_raw(0xF0),
            post_framebuffers: (1..=3).map(|i| vk::Framebuffer::from_raw(0xF0 + i)).collect(),
        }
    }

    fn ray_trace_pass() -> RayTracePass {
        let mut sbt = SbtRegions::default();
        sbt.raygen.device_address = 0x8000;
        RayTracePass {
            pipeline: vk::Pipeline::from_raw(0x31),
            layout: vk::PipelineLayout::from_raw(0x32),
            descriptor_set: vk::DescriptorSet::from_raw(0x33),
            sbt,
            push: RayTracePushConstants::default(),
        }
    }

    fn config(path: RenderPath, ray_tracing: bool) -> RendererConfig {
        RendererConfig {
            targets: targets(),
            post: PostProcessPass {
                render_pass: vk::RenderPass::from_raw(0x11),
                pipeline: vk::Pipeline::from_raw(0x12),
                layout: vk::PipelineLayout::from_raw(0x13),
                descriptor_set: vk::DescriptorSet::from_raw(0x14),
            },
            raster: RasterPass {
                render_pass: vk::RenderPass::from_raw(0x21),
                pipeline: vk::Pipeline::from_raw(0x22),
                layout: vk::PipelineLayout::from_raw(0x23),
                descriptor_set: vk::DescriptorSet::from_raw(0x24),
                draws: (0..2)
                    .map(|i| RasterDraw {
                        vertex_buffer: vk::Buffer::from_raw(0x100 + i),
                        index_buffer: vk::Buffer::from_raw(0x200 + i),
                        index_count: 36,
                        push: RasterPushConstants::new(Mat4::IDENTITY, Vec3::Y, 10.0, i as u32),
                    })
                    .collect(),
                clear_color: [0.0, 0.0, 0.0, 1.0],
            },
            ray_trace: ray_tracing.then(ray_trace_pass),
            camera_buffer: vk::Buffer::from_raw(0xCA),
            overlay: Box::new(NoOverlay),
            initial_path: path,
        }
    }

    fn renderer_with(device: &Arc<MockDevice>, config: RendererConfig) -> Renderer {
        let shared: Arc<dyn DeviceContext> = device.clone();
        Renderer::new(shared, config).unwrap()
    }

    fn renderer(device: &Arc<MockDevice>, path: RenderPath) -> Renderer {
        renderer_with(device, config(path, true))
    }

    fn kind(entry: &Recorded) -> &'static str {
        match entry {
            Recorded::BufferBarrier { .. } => "buffer_barrier",
            Recorded::UpdateBuffer { .. } => "update_buffer",
            Recorded::ImageBarrier { .. } => "image_barrier",
            Recorded::BeginRenderPass { .. } => "begin_render_pass",
            Recorded::EndRenderPass(_) => "end_render_pass",
            Recorded::SetViewport { .. } => "set_viewport",
            Recorded::BindPipeline { .. } => "bind_pipeline",
            Recorded::BindDescriptorSets { .. } => "bind_descriptor_sets",
            Recorded::PushConstants { .. } => "push_constants",
            Recorded::BindVertexBuffer { .. } => "bind_vertex_buffer",
            Recorded::BindIndexBuffer { .. } => "bind_index_buffer",
            Recorded::Draw { .. } => "draw",
            Recorded::DrawIndexed { .. } => "draw_indexed",
            Recorded::TraceRays { .. } => "trace_rays",
            _ => "other",
        }
    }

    /// Submissions that carry command buffers.
    fn work_submits(device: &MockDevice) -> usize {
        device.count(|r| {
            matches!(r, Recorded::Submit { command_buffers, .. } if !command_buffers.is_empty())
        })
    }

    fn kinds(entries: &[Recorded]) -> Vec<&'static str> {
        entries.iter().map(kind).collect()
    }

    /// Commands recorded after the color target barrier.
    fn post_section(commands: &[Recorded]) -> Vec<Recorded> {
        let barrier = commands
            .iter()
            .position(|r| matches!(r, Recorded::ImageBarrier { .. }))
            .unwrap();
        commands[barrier + 1..].to_vec()
    }

    fn is_fullscreen_draw(entry: &Recorded) -> bool {
        matches!(
            entry,
            Recorded::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
                ..
            }
        )
    }

    const POST_KINDS: [&str; 6] = [
        "begin_render_pass",
        "set_viewport",
        "bind_pipeline",
        "bind_descriptor_sets",
        "draw",
        "end_render_pass",
    ];

    #[test]
    fn raster_frame_at_800x600() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        let cmd = renderer.command_buffer();

        renderer.draw_frame().unwrap();

        let mut expected = vec![
            "buffer_barrier",
            "update_buffer",
            "buffer_barrier",
            "begin_render_pass",
            "set_viewport",
            "bind_pipeline",
            "bind_descriptor_sets",
        ];
        for _ in 0..2 {
            expected.extend([
                "bind_vertex_buffer",
                "bind_index_buffer",
                "push_constants",
                "draw_indexed",
            ]);
        }
        expected.extend(["end_render_pass", "image_barrier"]);
        expected.extend(POST_KINDS);

        let commands = device.commands_for(cmd);
        assert_eq!(kinds(&commands), expected);
        assert!(matches!(
            &commands[3],
            Recorded::BeginRenderPass { framebuffer, width: 800, height: 600, .. }
                if *framebuffer == vk::Framebuffer::from_raw(0xF0)
        ));
        assert!(matches!(
            commands.iter().rev().nth(5),
            Some(Recorded::BeginRenderPass { framebuffer, width: 800, height: 600, .. })
                if *framebuffer == vk::Framebuffer::from_raw(0xF1)
        ));

        let log = device.log();
        assert!(log.contains(&Recorded::Begin {
            cmd,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        }));
        let submit = log
            .iter()
            .find(|r| matches!(r, Recorded::Submit { .. }))
            .unwrap();
        assert!(matches!(
            submit,
            Recorded::Submit { command_buffers, wait_stages, .. }
                if command_buffers == &vec![cmd]
                    && wait_stages == &vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
        ));
        assert_eq!(device.present_count(), 1);
    }

    #[test]
    fn raytrace_frame_substitutes_trace_dispatch() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Raytrace);
        let cmd = renderer.command_buffer();

        renderer.draw_frame().unwrap();

        let commands = device.commands_for(cmd);
        assert_eq!(
            kinds(&commands[..8]),
            vec![
                "buffer_barrier",
                "update_buffer",
                "buffer_barrier",
                "bind_pipeline",
                "bind_descriptor_sets",
                "push_constants",
                "trace_rays",
                "image_barrier",
            ]
        );
        assert!(commands.contains(&Recorded::TraceRays {
            cmd,
            raygen_address: 0x8000,
            width: 800,
            height: 600,
            depth: 1,
        }));
        assert_eq!(device.count(|r| matches!(r, Recorded::DrawIndexed { .. })), 0);
        assert_eq!(kinds(&post_section(&commands)), POST_KINDS);
    }

    #[test]
    fn post_sequence_is_identical_for_both_paths() {
        let raster_device = Arc::new(MockDevice::new());
        let mut raster = renderer(&raster_device, RenderPath::Rasterize);
        raster.draw_frame().unwrap();

        let rt_device = Arc::new(MockDevice::new());
        let mut rt = renderer(&rt_device, RenderPath::Raytrace);
        rt.draw_frame().unwrap();

        // Both mocks hand out handles in the same order
        assert_eq!(raster.command_buffer(), rt.command_buffer());
        let raster_post = post_section(&raster_device.commands_for(raster.command_buffer()));
        let rt_post = post_section(&rt_device.commands_for(rt.command_buffer()));
        assert_eq!(raster_post, rt_post);

        for post in [raster_post, rt_post] {
            assert_eq!(post.iter().filter(|r| is_fullscreen_draw(r)).count(), 1);
            assert_eq!(
                post.iter()
                    .filter(|r| matches!(r, Recorded::BeginRenderPass { .. }))
                    .count(),
                1
            );
        }
    }

    #[test]
    fn color_target_barrier_follows_the_latched_path() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        let cmd = renderer.command_buffer();

        renderer.draw_frame().unwrap();
        let first = device.take_log();
        renderer.selector_mut().toggle();
        renderer.draw_frame().unwrap();
        let second = device.take_log();

        let barrier = |log: &[Recorded]| {
            log.iter()
                .find_map(|r| match r {
                    Recorded::ImageBarrier {
                        cmd: c,
                        image,
                        old_layout,
                        new_layout,
                        src_stage,
                        dst_access,
                        ..
                    } if *c == cmd => {
                        assert_eq!(*image, vk::Image::from_raw(0xC0));
                        assert_eq!(*old_layout, vk::ImageLayout::GENERAL);
                        assert_eq!(*new_layout, vk::ImageLayout::GENERAL);
                        assert_eq!(*dst_access, vk::AccessFlags::SHADER_READ);
                        Some(*src_stage)
                    }
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(
            barrier(&first),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            barrier(&second),
            vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR
        );
        assert!(!first.iter().any(|r| matches!(r, Recorded::TraceRays { .. })));
        assert!(second.iter().any(|r| matches!(r, Recorded::TraceRays { .. })));
        assert!(!second.iter().any(|r| matches!(r, Recorded::DrawIndexed { .. })));
    }

    #[test]
    fn path_switch_takes_effect_next_frame() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Raytrace);

        renderer.draw_frame().unwrap();
        renderer.selector_mut().set(RenderPath::Rasterize);
        assert_eq!(renderer.selector().latched(), Some(RenderPath::Raytrace));

        renderer.draw_frame().unwrap();
        assert_eq!(renderer.selector().latched(), Some(RenderPath::Rasterize));

        let stats = renderer.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.raytrace_frames, 1);
        assert_eq!(stats.raster_frames, 1);
    }

    #[test]
    fn first_frame_does_not_wait() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        renderer.draw_frame().unwrap();
        assert_eq!(renderer.stats().last_poll_count, 1);
    }

    #[test]
    fn slow_gpu_blocks_until_fence_signals() {
        let device = Arc::new(MockDevice::new());
        device.set_default_fence_behavior(FenceBehavior::SignalAfterPolls(5));
        let mut renderer = renderer(&device, RenderPath::Rasterize);

        renderer.draw_frame().unwrap();
        device.take_log();
        renderer.draw_frame().unwrap();

        assert_eq!(renderer.stats().last_poll_count, 5);
        let log = device.log();
        let last_wait = log
            .iter()
            .rposition(|r| matches!(r, Recorded::WaitForFence { .. }))
            .unwrap();
        let begin = log
            .iter()
            .position(|r| matches!(r, Recorded::Begin { .. }))
            .unwrap();
        assert!(last_wait < begin);
    }

    #[test]
    fn hung_gpu_keeps_polling_without_returning() {
        let device = Arc::new(MockDevice::new());
        device.set_default_fence_behavior(FenceBehavior::Hang);
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        renderer.draw_frame().unwrap();

        let fence = renderer.synchronizer().fence();
        let polls_before = device.fence_polls(fence);
        let returned = Arc::new(AtomicBool::new(false));

        let watchdog = {
            let device = Arc::clone(&device);
            let returned = Arc::clone(&returned);
            std::thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(5);
                while device.fence_polls(fence) < polls_before + 25 {
                    if Instant::now() > deadline {
                        device.signal_fence(fence);
                        return Err("fence polls stopped growing");
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                let early = returned.load(Ordering::SeqCst);
                device.signal_fence(fence);
                if early {
                    Err("draw_frame returned before the fence signaled")
                } else {
                    Ok(())
                }
            })
        };

        renderer.draw_frame().unwrap();
        returned.store(true, Ordering::SeqCst);

        watchdog.join().unwrap().unwrap();
        assert!(renderer.stats().last_poll_count >= 25);
        assert_eq!(device.submit_count(), 2);
    }

    #[test]
    fn stale_acquire_skips_wait_and_submission() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        device.push_acquire_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        device.take_log();

        let err = renderer.draw_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::SwapchainStale {
                at: StalePoint::Acquire
            }
        ));
        assert_eq!(device.count(|r| matches!(r, Recorded::WaitForFence { .. })), 0);
        assert_eq!(device.count(|r| matches!(r, Recorded::Begin { .. })), 0);
        assert_eq!(device.submit_count(), 0);
        assert_eq!(renderer.stats().stale_frames, 1);
        assert_eq!(renderer.stats().frames, 0);

        renderer.draw_frame().unwrap();
    }

    #[test]
    fn stale_present_is_recoverable_after_submission() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        device.push_present_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        let err = renderer.draw_frame().unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(device.submit_count(), 1);
        assert_eq!(renderer.stats().frames, 1);
        assert_eq!(renderer.stats().stale_frames, 1);

        let mut targets = targets();
        targets.extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        renderer.set_targets(targets);
        device.take_log();
        renderer.draw_frame().unwrap();
        // Raster and post passes both cover the new extent
        assert_eq!(
            device.count(|r| matches!(
                r,
                Recorded::SetViewport {
                    width: 1024,
                    height: 768,
                    ..
                }
            )),
            2
        );
    }

    #[test]
    fn suboptimal_present_reports_stale() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        device.push_present_result(Ok(true));
        assert!(matches!(
            renderer.draw_frame(),
            Err(FrameError::SwapchainStale {
                at: StalePoint::Present
            })
        ));
    }

    #[test]
    fn lost_device_is_fatal() {
        let device = Arc::new(MockDevice::new());
        device.set_default_fence_behavior(FenceBehavior::FailAfterPolls(
            3,
            vk::Result::ERROR_DEVICE_LOST,
        ));
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        renderer.draw_frame().unwrap();

        let err = renderer.draw_frame().unwrap_err();
        assert!(matches!(err, FrameError::Device(ref e) if e.is_device_lost()));
        assert!(!err.is_recoverable());
        assert_eq!(device.submit_count(), 1);
    }

    #[test]
    fn begin_failure_leaves_frame_unsubmitted() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        device.fail_next_begin(vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        let err = renderer.draw_frame().unwrap_err();
        assert!(matches!(err, FrameError::Recording(_)));
        assert_eq!(work_submits(&device), 0);
        assert_eq!(device.present_count(), 0);
        assert_eq!(renderer.synchronizer().state(), FrameState::Idle);
        assert_eq!(renderer.stats().frames, 0);
    }

    #[test]
    fn retry_after_recording_failure_reuses_a_waited_semaphore() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        device.take_log();
        device.fail_next_begin(vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        assert!(matches!(
            renderer.draw_frame(),
            Err(FrameError::Recording(_))
        ));
        renderer.draw_frame().unwrap();

        let log = device.log();
        let acquires: Vec<(usize, vk::Semaphore)> = log
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match r {
                Recorded::Acquire { semaphore, .. } => Some((i, *semaphore)),
                _ => None,
            })
            .collect();
        assert_eq!(acquires.len(), 2);
        let (first, semaphore) = acquires[0];
        let (second, _) = acquires[1];

        let between = &log[first + 1..second];
        assert!(between.iter().any(|r| matches!(
            r,
            Recorded::Submit { command_buffers, wait_semaphores, .. }
                if command_buffers.is_empty() && wait_semaphores.contains(&semaphore)
        )));
        assert!(!between.iter().any(|r| matches!(r, Recorded::Present { .. })));
        assert_eq!(device.present_count(), 1);
        assert_eq!(renderer.stats().frames, 1);
    }

    #[test]
    fn end_failure_leaves_frame_unsubmitted() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Raytrace);
        device.fail_next_end(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        assert!(matches!(
            renderer.draw_frame(),
            Err(FrameError::Recording(_))
        ));
        assert_eq!(work_submits(&device), 0);
    }

    #[test]
    fn failed_trace_dispatch_is_a_recording_error() {
        let device = Arc::new(MockDevice::new().without_ray_tracing());
        let mut renderer = renderer(&device, RenderPath::Raytrace);
        assert!(matches!(
            renderer.draw_frame(),
            Err(FrameError::Recording(_))
        ));
        assert_eq!(work_submits(&device), 0);
    }

    #[test]
    fn missing_post_framebuffer_is_a_recording_error() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        device.push_acquire_result(Ok((7, false)));
        assert!(matches!(
            renderer.draw_frame(),
            Err(FrameError::Recording(GpuError::InvalidState(_)))
        ));
        assert_eq!(work_submits(&device), 0);
    }

    #[test]
    fn without_ray_tracing_the_renderer_stays_on_raster() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer_with(&device, config(RenderPath::Raytrace, false));

        assert_eq!(renderer.selector().requested(), RenderPath::Rasterize);
        renderer.selector_mut().toggle();
        renderer.draw_frame().unwrap();

        assert_eq!(device.count(|r| matches!(r, Recorded::TraceRays { .. })), 0);
        assert_eq!(renderer.stats().raster_frames, 1);
    }

    #[test]
    fn overlay_draws_land_before_post_pass_ends() {
        let device = Arc::new(MockDevice::new());
        let mut config = config(RenderPath::Rasterize, true);
        config.overlay = Box::new(DrawListOverlay::new());
        let mut renderer = renderer_with(&device, config);

        let mut data = OverlayDrawData::new(
            vk::Pipeline::from_raw(0x41),
            vk::PipelineLayout::from_raw(0x42),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        );
        data.push_quad(OverlayQuad::from_pixels(8.0, 8.0, 120.0, 24.0, EXTENT, [0.0, 0.0, 0.0, 0.6]));
        renderer.overlay_mut().set_draw_data(data);
        renderer.draw_frame().unwrap();

        let post = post_section(&device.commands_for(renderer.command_buffer()));
        assert_eq!(
            kinds(&post),
            vec![
                "begin_render_pass",
                "set_viewport",
                "bind_pipeline",
                "bind_descriptor_sets",
                "draw",
                "bind_pipeline",
                "push_constants",
                "draw",
                "end_render_pass",
            ]
        );
        assert!(is_fullscreen_draw(&post[4]));
        assert_eq!(post.iter().filter(|r| is_fullscreen_draw(r)).count(), 1);
    }

    #[test]
    fn camera_update_carries_current_camera() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        let camera = Camera::new(Vec3::new(4.0, 3.0, 6.0), Vec3::ZERO, 1.0, 800.0 / 600.0);
        renderer.set_camera(&camera);
        renderer.draw_frame().unwrap();

        let expected = camera.uniforms();
        assert_eq!(
            device.count(|r| matches!(
                r,
                Recorded::UpdateBuffer { buffer, data, .. }
                    if *buffer == vk::Buffer::from_raw(0xCA)
                        && data.as_slice() == bytemuck::bytes_of(&expected)
            )),
            1
        );
    }

    #[test]
    fn persistent_command_buffer_is_reused() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        for _ in 0..4 {
            renderer.draw_frame().unwrap();
        }
        assert_eq!(
            device.count(|r| matches!(r, Recorded::AllocateCommandBuffer(_))),
            1
        );
        let images: Vec<u32> = device
            .log()
            .iter()
            .filter_map(|r| match r {
                Recorded::Present { image_index, .. } => Some(*image_index),
                _ => None,
            })
            .collect();
        assert_eq!(images, vec![0, 1, 2, 0]);
    }

    #[test]
    fn destroy_releases_everything() {
        let device = Arc::new(MockDevice::new());
        let mut renderer = renderer(&device, RenderPath::Rasterize);
        renderer.draw_frame().unwrap();
        renderer.destroy().unwrap();

        assert_eq!(device.live_command_buffers(), 0);
        assert_eq!(device.live_fences(), 0);
        assert!(device.log().contains(&Recorded::QueueWaitIdle));
    }

    #[test]
    fn failed_allocation_surfaces_at_construction() {
        let device = Arc::new(MockDevice::new());
        device.fail_next_allocate(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let shared: Arc<dyn DeviceContext> = device.clone();
        assert!(Renderer::new(shared, config(RenderPath::Rasterize, true)).is_err());
        assert_eq!(device.live_fences(), 0);
    }
}
