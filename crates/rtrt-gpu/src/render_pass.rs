//! Single-subpass render passes and framebuffers.

use crate::error::Result;
use ash::vk;

/// Depth format used by every depth attachment of the renderer.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Description of a render pass with one color and an optional depth attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassConfig {
    pub color_format: vk::Format,
    pub color_initial_layout: vk::ImageLayout,
    pub color_final_layout: vk::ImageLayout,
    pub depth_format: Option<vk::Format>,
}

impl RenderPassConfig {
    /// Pass that writes a swapchain image and leaves it ready to present.
    pub fn present(color_format: vk::Format) -> Self {
        Self {
            color_format,
            color_initial_layout: vk::ImageLayout::UNDEFINED,
            color_final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            depth_format: Some(DEPTH_FORMAT),
        }
    }

    /// Pass that writes the shared color target, which lives in GENERAL.
    pub fn offscreen(color_format: vk::Format) -> Self {
        Self {
            color_format,
            color_initial_layout: vk::ImageLayout::GENERAL,
            color_final_layout: vk::ImageLayout::GENERAL,
            depth_format: Some(DEPTH_FORMAT),
        }
    }

    /// Number of clear values a begin of this pass needs.
    pub fn attachment_count(&self) -> usize {
        1 + usize::from(self.depth_format.is_some())
    }
}

/// Create a render pass. Both attachments are cleared on load.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_render_pass(
    device: &ash::Device,
    config: &RenderPassConfig,
) -> Result<vk::RenderPass> {
    let mut attachments = vec![vk::AttachmentDescription::default()
        .format(config.color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(config.color_initial_layout)
        .final_layout(config.color_final_layout)];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);

    if let Some(depth_format) = config.depth_format {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }

    // Orders attachment writes after the acquire semaphore wait and prior passes
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let subpasses = [subpass];
    let dependencies = [dependency];
    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass = device.create_render_pass(&create_info, None)?;
    Ok(render_pass)
}

/// Create a framebuffer over `attachments` (color first, then depth).
///
/// # Safety
/// The device, render pass and views must be valid.
pub unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    let framebuffer = device.create_framebuffer(&create_info, None)?;
    Ok(framebuffer)
}

/// Create a linear clamp-to-edge sampler.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_linear_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .max_lod(vk::LOD_CLAMP_NONE);

    let sampler = device.create_sampler(&create_info, None)?;
    Ok(sampler)
}
