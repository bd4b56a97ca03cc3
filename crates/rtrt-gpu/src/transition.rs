//! Image layout transition policy.
//!
//! Maps an image layout to the access mask and pipeline stage that guard a
//! transition into (or out of) that layout. Barriers are formed by looking up
//! the source and destination layouts independently.
//!
//! Layouts outside the table resolve to an empty access mask and
//! `BOTTOM_OF_PIPE`. Callers rely on that fallback for layouts added later.

use ash::vk;

use crate::device::DeviceContext;

/// Access flags that must be available/visible for an image in `layout`.
pub fn access_flags_for_layout(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags::HOST_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        _ => vk::AccessFlags::empty(),
    }
}

/// Pipeline stage at which an image in `layout` is used.
pub fn pipeline_stage_for_layout(layout: vk::ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL | vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            vk::PipelineStageFlags::TRANSFER
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        }
        // ALL_COMMANDS so the barrier also holds on queues without graphics stages.
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::PipelineStageFlags::ALL_COMMANDS,
        vk::ImageLayout::PREINITIALIZED => vk::PipelineStageFlags::HOST,
        vk::ImageLayout::UNDEFINED => vk::PipelineStageFlags::TOP_OF_PIPE,
        _ => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

/// One side of a barrier: what must happen before, or what waits after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutScope {
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

impl LayoutScope {
    /// Resolve access and stage for a layout through the policy table.
    pub fn of(layout: vk::ImageLayout) -> Self {
        Self {
            layout,
            access: access_flags_for_layout(layout),
            stage: pipeline_stage_for_layout(layout),
        }
    }
}

/// An image memory barrier in plain-data form.
#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub subresource_range: vk::ImageSubresourceRange,
    pub src: LayoutScope,
    pub dst: LayoutScope,
}

impl ImageBarrier {
    /// Build a layout transition barrier for the first mip/layer of `image`.
    pub fn transition(
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Self {
        Self {
            image,
            subresource_range: single_subresource(aspect_mask),
            src: LayoutScope::of(old_layout),
            dst: LayoutScope::of(new_layout),
        }
    }

    /// Old layout of the image.
    pub fn old_layout(&self) -> vk::ImageLayout {
        self.src.layout
    }

    /// New layout of the image.
    pub fn new_layout(&self) -> vk::ImageLayout {
        self.dst.layout
    }

    /// Convert to the Vulkan structure.
    pub fn to_vk(&self) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .src_access_mask(self.src.access)
            .dst_access_mask(self.dst.access)
            .old_layout(self.src.layout)
            .new_layout(self.dst.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.subresource_range)
    }
}

/// A buffer memory barrier in plain-data form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl BufferBarrier {
    /// Convert to the Vulkan structure.
    pub fn to_vk(&self) -> vk::BufferMemoryBarrier<'static> {
        vk::BufferMemoryBarrier::default()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.buffer)
            .offset(self.offset)
            .size(self.size)
    }
}

/// Subresource range covering mip 0, layer 0.
pub fn single_subresource(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Record a layout transition of `image` from `old_layout` to `new_layout`.
pub fn record_image_transition(
    device: &dyn DeviceContext,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> ImageBarrier {
    let barrier = ImageBarrier::transition(image, aspect_mask, old_layout, new_layout);
    device.cmd_image_barrier(cmd, &barrier);
    barrier
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: [(vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags); 7] = [
        (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        (
            vk::ImageLayout::PREINITIALIZED,
            vk::AccessFlags::HOST_WRITE,
            vk::PipelineStageFlags::HOST,
        ),
        (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    ];

    #[test]
    fn known_layouts_match_table() {
        for (layout, access, stage) in TABLE {
            assert_eq!(access_flags_for_layout(layout), access, "{layout:?}");
            assert_eq!(pipeline_stage_for_layout(layout), stage, "{layout:?}");
        }
    }

    #[test]
    fn lookups_are_deterministic() {
        for (layout, _, _) in TABLE {
            assert_eq!(LayoutScope::of(layout), LayoutScope::of(layout));
        }
    }

    #[test]
    fn unknown_layouts_fall_back_to_bottom_of_pipe() {
        for layout in [
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
            vk::ImageLayout::from_raw(0x7FFF_FFFF),
        ] {
            assert_eq!(access_flags_for_layout(layout), vk::AccessFlags::empty());
            assert_eq!(
                pipeline_stage_for_layout(layout),
                vk::PipelineStageFlags::BOTTOM_OF_PIPE
            );
        }
    }

    #[test]
    fn transition_combines_both_sides() {
        let barrier = ImageBarrier::transition(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(barrier.src.access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.src.stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(barrier.dst.access, vk::AccessFlags::SHADER_READ);
        assert_eq!(barrier.dst.stage, vk::PipelineStageFlags::ALL_COMMANDS);

        let raw = barrier.to_vk();
        assert_eq!(raw.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(raw.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(raw.subresource_range.level_count, 1);
    }
}
