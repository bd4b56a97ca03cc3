//! GPU resources of the viewer: scene buffers, pipelines and the render
//! targets that follow the swapchain size.

use anyhow::Context as _;
use ash::vk;
use rtrt_gpu::descriptors::{write_buffer, write_image};
use rtrt_gpu::render_pass::{create_framebuffer, create_linear_sampler, create_render_pass};
use rtrt_gpu::{
    execute_single_time_commands, record_image_transition, upload_buffer, DescriptorPool,
    DescriptorSetLayoutBuilder, GpuBuffer, GpuContext, GpuImage, GraphicsPipeline,
    GraphicsPipelineConfig, MemoryLocation, RenderPassConfig, Swapchain, DEPTH_FORMAT,
};
use rtrt_raytrace::{
    InstanceDesc, RayTraceBindings, RayTraceDescriptors, RayTracePipeline,
    SceneAccelerationStructure, TriangleMesh,
};
use rtrt_render::{
    CameraUniforms, FrameTargets, OverlayQuad, OverlayRenderer, PostProcessPass, RasterDraw,
    RasterPass, RasterPushConstants, RayTracePass, RenderPath, RendererConfig, Vertex,
};
use rtrt_shaders as shaders;
use tracing::{info, warn};

use crate::scene::{MeshData, Scene};

/// Format of the color target shared by both paths and the post-process pass.
pub const COLOR_TARGET_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Background of the raster path, matching the ray-trace miss color.
const CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

struct MeshBuffers {
    vertices: GpuBuffer,
    indices: GpuBuffer,
    vertex_count: u32,
    index_count: u32,
}

/// A graphics pipeline with a single descriptor set of its own.
struct DescribedPipeline {
    pipeline: GraphicsPipeline,
    set_layout: vk::DescriptorSetLayout,
    pool: DescriptorPool,
    set: vk::DescriptorSet,
}

impl DescribedPipeline {
    unsafe fn new(
        device: &ash::Device,
        config: &GraphicsPipelineConfig,
        bindings: DescriptorSetLayoutBuilder<'_>,
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> anyhow::Result<Self> {
        let set_layout = bindings.build(device)?;
        let pipeline = match GraphicsPipeline::new(device, config, &[set_layout], push_constant_ranges) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                device.destroy_descriptor_set_layout(set_layout, None);
                return Err(e.into());
            }
        };
        let pool = DescriptorPool::new(device, 1, &bindings.pool_sizes(1))?;
        let set = pool.allocate(device, set_layout)?;
        Ok(Self {
            pipeline,
            set_layout,
            pool,
            set,
        })
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        self.pool.destroy(device);
        self.pipeline.destroy(device);
        device.destroy_descriptor_set_layout(self.set_layout, None);
    }
}

/// Images and framebuffers sized to the swapchain.
struct SizedTargets {
    extent: vk::Extent2D,
    color: GpuImage,
    raster_depth: GpuImage,
    present_depth: GpuImage,
    raster_framebuffer: vk::Framebuffer,
    post_framebuffers: Vec<vk::Framebuffer>,
}

fn image_info(
    format: vk::Format,
    extent: vk::Extent2D,
    usage: vk::ImageUsageFlags,
) -> vk::ImageCreateInfo<'static> {
    vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
}

impl SizedTargets {
    unsafe fn new(
        gpu: &GpuContext,
        offscreen_pass: vk::RenderPass,
        present_pass: vk::RenderPass,
        swapchain: &Swapchain,
    ) -> anyhow::Result<Self> {
        let device = gpu.device();
        let extent = swapchain.extent;

        let (color, raster_depth, present_depth) = {
            let mut allocator = gpu.allocator().lock();
            let color = allocator.create_image(
                &image_info(
                    COLOR_TARGET_FORMAT,
                    extent,
                    vk::ImageUsageFlags::STORAGE
                        | vk::ImageUsageFlags::SAMPLED
                        | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                ),
                vk::ImageAspectFlags::COLOR,
                "color_target",
            )?;
            let depth_info = image_info(
                DEPTH_FORMAT,
                extent,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            );
            let raster_depth =
                allocator.create_image(&depth_info, vk::ImageAspectFlags::DEPTH, "raster_depth")?;
            let present_depth =
                allocator.create_image(&depth_info, vk::ImageAspectFlags::DEPTH, "present_depth")?;
            (color, raster_depth, present_depth)
        };

        // Both paths and the post pass expect the color target in GENERAL
        execute_single_time_commands(gpu, |cmd| {
            record_image_transition(
                gpu,
                cmd,
                color.image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
            );
        })?;

        let raster_framebuffer = create_framebuffer(
            device,
            offscreen_pass,
            &[color.view, raster_depth.view],
            extent,
        )?;
        let post_framebuffers = swapchain
            .image_views
            .iter()
            .map(|&view| create_framebuffer(device, present_pass, &[view, present_depth.view], extent))
            .collect::<rtrt_gpu::Result<Vec<_>>>()?;

        Ok(Self {
            extent,
            color,
            raster_depth,
            present_depth,
            raster_framebuffer,
            post_framebuffers,
        })
    }

    unsafe fn destroy(mut self, gpu: &GpuContext) -> anyhow::Result<()> {
        let device = gpu.device();
        for framebuffer in self.post_framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer, None);
        }
        device.destroy_framebuffer(self.raster_framebuffer, None);

        let mut allocator = gpu.allocator().lock();
        allocator.free_image(&mut self.color)?;
        allocator.free_image(&mut self.raster_depth)?;
        allocator.free_image(&mut self.present_depth)?;
        Ok(())
    }
}

struct RayTracingResources {
    acceleration: SceneAccelerationStructure,
    pipeline: RayTracePipeline,
    descriptors: RayTraceDescriptors,
}

impl RayTracingResources {
    unsafe fn new(
        gpu: &GpuContext,
        scene: &Scene,
        meshes: &[MeshBuffers],
        color_target: vk::ImageView,
        camera_buffer: vk::Buffer,
        object_buffer: vk::Buffer,
    ) -> anyhow::Result<Self> {
        let triangle_meshes: Vec<TriangleMesh> = meshes
            .iter()
            .map(|mesh| TriangleMesh {
                vertex_address: mesh.vertices.device_address,
                vertex_count: mesh.vertex_count,
                vertex_stride: vk::DeviceSize::from(Vertex::STRIDE),
                index_address: mesh.indices.device_address,
                index_count: mesh.index_count,
            })
            .collect();
        let instances: Vec<InstanceDesc> = scene
            .objects
            .iter()
            .enumerate()
            .map(|(i, object)| InstanceDesc {
                mesh: object.mesh,
                transform: object.transform.to_cols_array_2d(),
                custom_index: i as u32,
            })
            .collect();

        let acceleration = SceneAccelerationStructure::build(gpu, &triangle_meshes, &instances)
            .context("Failed to build acceleration structures")?;

        let pipeline = match RayTracePipeline::new(gpu) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                acceleration.destroy(gpu)?;
                return Err(e).context("Failed to create ray tracing pipeline");
            }
        };

        let bindings = RayTraceBindings {
            tlas: acceleration.tlas().handle(),
            color_target,
            camera_buffer,
            object_buffer,
        };
        let descriptors = match RayTraceDescriptors::new(gpu, &pipeline, &bindings) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                pipeline.destroy(gpu)?;
                acceleration.destroy(gpu)?;
                return Err(e).context("Failed to allocate ray tracing descriptors");
            }
        };

        Ok(Self {
            acceleration,
            pipeline,
            descriptors,
        })
    }

    unsafe fn destroy(self, gpu: &GpuContext) -> anyhow::Result<()> {
        self.descriptors.destroy(gpu);
        self.pipeline.destroy(gpu)?;
        self.acceleration.destroy(gpu)?;
        Ok(())
    }
}

fn upload_mesh(
    gpu: &GpuContext,
    mesh: &MeshData,
    usage: vk::BufferUsageFlags,
    index: usize,
) -> anyhow::Result<MeshBuffers> {
    let mut vertices = upload_buffer(
        gpu,
        &mesh.vertices,
        usage | vk::BufferUsageFlags::VERTEX_BUFFER,
        &format!("mesh{index}_vertices"),
    )?;
    let indices = match upload_buffer(
        gpu,
        &mesh.indices,
        usage | vk::BufferUsageFlags::INDEX_BUFFER,
        &format!("mesh{index}_indices"),
    ) {
        Ok(indices) => indices,
        Err(e) => {
            gpu.allocator().lock().free_buffer(&mut vertices)?;
            return Err(e.into());
        }
    };

    Ok(MeshBuffers {
        vertices,
        indices,
        vertex_count: mesh.vertex_count(),
        index_count: mesh.index_count(),
    })
}

fn scanline_config(render_pass: vk::RenderPass) -> GraphicsPipelineConfig {
    GraphicsPipelineConfig {
        vertex_shader: shaders::scanline_vertex_shader().to_vec(),
        fragment_shader: shaders::scanline_fragment_shader().to_vec(),
        vertex_bindings: vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: Vertex::STRIDE,
            input_rate: vk::VertexInputRate::VERTEX,
        }],
        vertex_attributes: vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: Vertex::NORMAL_OFFSET,
            },
        ],
        render_pass,
        ..Default::default()
    }
}

fn overlay_config(render_pass: vk::RenderPass) -> GraphicsPipelineConfig {
    GraphicsPipelineConfig {
        vertex_shader: shaders::overlay_vertex_shader().to_vec(),
        fragment_shader: shaders::overlay_fragment_shader().to_vec(),
        cull_mode: vk::CullModeFlags::NONE,
        depth_test: false,
        depth_write: false,
        alpha_blend: true,
        render_pass,
        ..Default::default()
    }
}

/// Everything the renderer's passes point at.
pub struct ViewerResources {
    meshes: Vec<MeshBuffers>,
    object_buffer: GpuBuffer,
    camera_buffer: GpuBuffer,
    sampler: vk::Sampler,
    offscreen_pass: vk::RenderPass,
    present_pass: vk::RenderPass,
    present_format: vk::Format,
    scanline: DescribedPipeline,
    post: DescribedPipeline,
    overlay: GraphicsPipeline,
    targets: SizedTargets,
    ray_tracing: Option<RayTracingResources>,
}

impl ViewerResources {
    /// Upload `scene` and create every pipeline. Ray tracing resources are
    /// only built when `ray_tracing` is set; a failed build leaves the viewer
    /// raster-only.
    ///
    /// # Safety
    /// The swapchain must belong to `gpu`.
    pub unsafe fn new(
        gpu: &GpuContext,
        swapchain: &Swapchain,
        scene: &Scene,
        ray_tracing: bool,
    ) -> anyhow::Result<Self> {
        let device = gpu.device();

        let mut geometry_usage =
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS | vk::BufferUsageFlags::STORAGE_BUFFER;
        if ray_tracing {
            geometry_usage |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        }
        let meshes = scene
            .meshes
            .iter()
            .enumerate()
            .map(|(i, mesh)| upload_mesh(gpu, mesh, geometry_usage, i))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let addresses: Vec<(u64, u64)> = meshes
            .iter()
            .map(|m| (m.vertices.device_address, m.indices.device_address))
            .collect();
        let object_buffer = upload_buffer(
            gpu,
            &scene.object_descs(&addresses),
            vk::BufferUsageFlags::STORAGE_BUFFER,
            "objects",
        )?;
        let camera_buffer = gpu.allocator().lock().create_buffer(
            CameraUniforms::SIZE,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            "camera",
        )?;

        let offscreen_pass =
            create_render_pass(device, &RenderPassConfig::offscreen(COLOR_TARGET_FORMAT))?;
        let present_pass = create_render_pass(device, &RenderPassConfig::present(swapchain.format))?;
        let sampler = create_linear_sampler(device)?;

        let scanline = DescribedPipeline::new(
            device,
            &scanline_config(offscreen_pass),
            DescriptorSetLayoutBuilder::new()
                .uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
                .storage_buffer(1, vk::ShaderStageFlags::FRAGMENT),
            &[vk::PushConstantRange {
                stage_flags: RasterPushConstants::STAGES,
                offset: 0,
                size: RasterPushConstants::SIZE,
            }],
        )
        .context("Failed to create scanline pipeline")?;
        write_buffer(
            device,
            scanline.set,
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            camera_buffer.buffer,
        );
        write_buffer(
            device,
            scanline.set,
            1,
            vk::DescriptorType::STORAGE_BUFFER,
            object_buffer.buffer,
        );

        let post = DescribedPipeline::new(
            device,
            &GraphicsPipelineConfig::fullscreen(
                shaders::post_vertex_shader().to_vec(),
                shaders::post_fragment_shader().to_vec(),
                present_pass,
            ),
            DescriptorSetLayoutBuilder::new().sampled_image(0, vk::ShaderStageFlags::FRAGMENT),
            &[],
        )
        .context("Failed to create post-process pipeline")?;

        let overlay = GraphicsPipeline::new(
            device,
            &overlay_config(present_pass),
            &[],
            &[vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: OverlayQuad::SIZE,
            }],
        )
        .context("Failed to create overlay pipeline")?;

        let targets = SizedTargets::new(gpu, offscreen_pass, present_pass, swapchain)?;

        let ray_tracing = if ray_tracing {
            match RayTracingResources::new(
                gpu,
                scene,
                &meshes,
                targets.color.view,
                camera_buffer.buffer,
                object_buffer.buffer,
            ) {
                Ok(resources) => Some(resources),
                Err(e) => {
                    warn!("Ray tracing disabled: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let resources = Self {
            meshes,
            object_buffer,
            camera_buffer,
            sampler,
            offscreen_pass,
            present_pass,
            present_format: swapchain.format,
            scanline,
            post,
            overlay,
            targets,
            ray_tracing,
        };
        resources.bind_color_target(gpu);

        info!(
            meshes = resources.meshes.len(),
            objects = scene.objects.len(),
            ray_tracing = resources.ray_tracing.is_some(),
            "Viewer resources created"
        );
        Ok(resources)
    }

    pub fn ray_tracing_available(&self) -> bool {
        self.ray_tracing.is_some()
    }

    pub fn overlay_pipeline(&self) -> (vk::Pipeline, vk::PipelineLayout) {
        (self.overlay.pipeline, self.overlay.layout)
    }

    pub fn frame_targets(&self, swapchain: &Swapchain) -> FrameTargets {
        FrameTargets {
            swapchain: swapchain.swapchain,
            extent: self.targets.extent,
            color_target: self.targets.color.image,
            raster_framebuffer: self.targets.raster_framebuffer,
            post_framebuffers: self.targets.post_framebuffers.clone(),
        }
    }

    /// Configuration for a renderer drawing `scene` with these resources.
    pub fn renderer_config(
        &self,
        scene: &Scene,
        swapchain: &Swapchain,
        overlay: Box<dyn OverlayRenderer>,
        initial_path: RenderPath,
    ) -> RendererConfig {
        let draws = scene
            .objects
            .iter()
            .enumerate()
            .filter_map(|(i, object)| {
                let mesh = self.meshes.get(object.mesh)?;
                Some(RasterDraw {
                    vertex_buffer: mesh.vertices.buffer,
                    index_buffer: mesh.indices.buffer,
                    index_count: mesh.index_count,
                    push: RasterPushConstants::new(
                        object.transform,
                        scene.light_position,
                        scene.light_intensity,
                        i as u32,
                    ),
                })
            })
            .collect();

        let ray_trace = self.ray_tracing.as_ref().map(|rt| {
            let mut pass = RayTracePass::from_pipeline(&rt.pipeline, rt.descriptors.set());
            pass.push.clear_color = CLEAR_COLOR;
            pass.push.light_position = scene.light_position.to_array();
            pass.push.light_intensity = scene.light_intensity;
            pass
        });

        RendererConfig {
            targets: self.frame_targets(swapchain),
            post: PostProcessPass {
                render_pass: self.present_pass,
                pipeline: self.post.pipeline.pipeline,
                layout: self.post.pipeline.layout,
                descriptor_set: self.post.set,
            },
            raster: RasterPass {
                render_pass: self.offscreen_pass,
                pipeline: self.scanline.pipeline.pipeline,
                layout: self.scanline.pipeline.layout,
                descriptor_set: self.scanline.set,
                draws,
                clear_color: CLEAR_COLOR,
            },
            ray_trace,
            camera_buffer: self.camera_buffer.buffer,
            overlay,
            initial_path,
        }
    }

    /// Rebuild the size-dependent targets for a recreated swapchain.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn resize(
        &mut self,
        gpu: &GpuContext,
        swapchain: &Swapchain,
    ) -> anyhow::Result<FrameTargets> {
        if swapchain.format != self.present_format {
            anyhow::bail!(
                "Swapchain format changed from {:?} to {:?}",
                self.present_format,
                swapchain.format
            );
        }

        let targets = SizedTargets::new(gpu, self.offscreen_pass, self.present_pass, swapchain)?;
        let old = std::mem::replace(&mut self.targets, targets);
        old.destroy(gpu)?;
        self.bind_color_target(gpu);

        Ok(self.frame_targets(swapchain))
    }

    /// Point the post-process sampler and the ray-trace storage image at the
    /// current color target.
    unsafe fn bind_color_target(&self, gpu: &GpuContext) {
        write_image(
            gpu.device(),
            self.post.set,
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            self.targets.color.view,
            self.sampler,
            vk::ImageLayout::GENERAL,
        );
        if let Some(rt) = &self.ray_tracing {
            rt.descriptors.update_color_target(gpu, self.targets.color.view);
        }
    }

    /// Free everything.
    ///
    /// # Safety
    /// The device must be idle and no renderer may still use these handles.
    pub unsafe fn destroy(mut self, gpu: &GpuContext) -> anyhow::Result<()> {
        let device = gpu.device();

        if let Some(rt) = self.ray_tracing.take() {
            rt.destroy(gpu)?;
        }
        self.targets.destroy(gpu)?;

        self.overlay.destroy(device);
        self.post.destroy(device);
        self.scanline.destroy(device);
        device.destroy_sampler(self.sampler, None);
        device.destroy_render_pass(self.present_pass, None);
        device.destroy_render_pass(self.offscreen_pass, None);

        let mut allocator = gpu.allocator().lock();
        allocator.free_buffer(&mut self.camera_buffer)?;
        allocator.free_buffer(&mut self.object_buffer)?;
        for mesh in &mut self.meshes {
            allocator.free_buffer(&mut mesh.vertices)?;
            allocator.free_buffer(&mut mesh.indices)?;
        }
        Ok(())
    }
}
