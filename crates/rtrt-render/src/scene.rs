//! GPU-side scene records shared by the raster and ray-trace paths.

use glam::Vec3;

/// Vertex layout of every mesh: position then normal, tightly packed.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
    pub const NORMAL_OFFSET: u32 = 12;

    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
        }
    }
}

/// Per-object record read by the closest-hit and scanline fragment shaders
/// through the object storage buffer. Indexed by instance custom index.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectDesc {
    pub vertex_address: u64,
    pub index_address: u64,
    pub color: [f32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_shader_structs() {
        assert_eq!(Vertex::STRIDE, 24);
        assert_eq!(std::mem::offset_of!(Vertex, normal) as u32, Vertex::NORMAL_OFFSET);
        assert_eq!(std::mem::size_of::<ObjectDesc>(), 32);
        assert_eq!(std::mem::offset_of!(ObjectDesc, color), 16);
    }
}
