//! Pipeline creation and management.

use crate::error::{GpuError, Result};
use ash::vk;

/// Create a shader module from SPIR-V words.
///
/// # Safety
/// The device must be valid and the code must be valid SPIR-V.
pub unsafe fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
    label: &str,
) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(code);
    device
        .create_shader_module(&info, None)
        .map_err(|e| GpuError::ShaderCompilation(format!("{label}: {e}")))
}

/// Create a pipeline layout.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_pipeline_layout(
    device: &ash::Device,
    descriptor_set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(descriptor_set_layouts)
        .push_constant_ranges(push_constant_ranges);

    device
        .create_pipeline_layout(&layout_info, None)
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))
}

/// Graphics pipeline configuration.
#[derive(Clone)]
pub struct GraphicsPipelineConfig {
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    /// Standard alpha blending on the color attachment.
    pub alpha_blend: bool,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            vertex_shader: Vec::new(),
            fragment_shader: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            alpha_blend: false,
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        }
    }
}

impl GraphicsPipelineConfig {
    /// Configuration for a vertex-less full-screen pass: no vertex input,
    /// no culling, no depth test.
    pub fn fullscreen(
        vertex_shader: Vec<u32>,
        fragment_shader: Vec<u32>,
        render_pass: vk::RenderPass,
    ) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: false,
            depth_write: false,
            render_pass,
            ..Default::default()
        }
    }
}

fn color_blend_attachment(alpha_blend: bool) -> vk::PipelineColorBlendAttachmentState {
    let state = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    if !alpha_blend {
        return state.blend_enable(false);
    }
    state
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create a graphics pipeline for subpass `config.subpass` of
    /// `config.render_pass`. Viewport and scissor are dynamic.
    ///
    /// # Safety
    /// The device must be valid and shader code must be valid SPIR-V.
    pub unsafe fn new(
        device: &ash::Device,
        config: &GraphicsPipelineConfig,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let vert_module = create_shader_module(device, &config.vertex_shader, "Vertex")?;
        let frag_module = match create_shader_module(device, &config.fragment_shader, "Fragment")
        {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(vert_module, None);
                return Err(e);
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(c"main"),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&config.vertex_bindings)
            .vertex_attribute_descriptions(&config.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(config.topology)
            .primitive_restart_enable(false);

        // Viewport (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(config.depth_test)
            .depth_write_enable(config.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [color_blend_attachment(config.alpha_blend)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let layout = create_pipeline_layout(device, descriptor_set_layouts, push_constant_ranges);
        let layout = match layout {
            Ok(layout) => layout,
            Err(e) => {
                device.destroy_shader_module(vert_module, None);
                device.destroy_shader_module(frag_module, None);
                return Err(e);
            }
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(config.render_pass)
            .subpass(config.subpass);

        let result =
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None);

        // Modules are only needed during creation
        device.destroy_shader_module(vert_module, None);
        device.destroy_shader_module(frag_module, None);

        let pipeline = match result {
            Ok(pipelines) => pipelines.first().copied(),
            Err((_pipelines, e)) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(GpuError::PipelineCreation(e.to_string()));
            }
        }
        .ok_or_else(|| GpuError::PipelineCreation("Driver returned no pipeline".to_string()))?;

        Ok(Self { pipeline, layout })
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullscreen_config_disables_depth_and_culling() {
        let config = GraphicsPipelineConfig::fullscreen(vec![1], vec![2], vk::RenderPass::null());
        assert!(config.vertex_bindings.is_empty());
        assert!(config.vertex_attributes.is_empty());
        assert_eq!(config.cull_mode, vk::CullModeFlags::NONE);
        assert!(!config.depth_test);
        assert!(!config.depth_write);
    }

    #[test]
    fn alpha_blend_uses_source_alpha() {
        let blended = color_blend_attachment(true);
        assert_eq!(blended.blend_enable, vk::TRUE);
        assert_eq!(blended.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);

        let opaque = color_blend_attachment(false);
        assert_eq!(opaque.blend_enable, vk::FALSE);
    }
}
