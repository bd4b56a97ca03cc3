//! Shaders of the rtrt renderer.
//!
//! GLSL sources live in `shaders/` and are compiled to SPIR-V at build time
//! using shaderc. Accessors return the words ready for
//! `vkCreateShaderModule`.

use std::sync::OnceLock;

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    macro_rules! spirv {
        ($name:ident, $file:literal) => {
            pub static $name: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/", $file));
        };
    }

    spirv!(POST_VERT, "post_vert.spv");
    spirv!(POST_FRAG, "post_frag.spv");
    spirv!(SCANLINE_VERT, "scanline_vert.spv");
    spirv!(SCANLINE_FRAG, "scanline_frag.spv");
    spirv!(OVERLAY_VERT, "overlay_vert.spv");
    spirv!(OVERLAY_FRAG, "overlay_frag.spv");
    spirv!(RAYTRACE_RGEN, "raytrace_rgen.spv");
    spirv!(RAYTRACE_RMISS, "raytrace_rmiss.spv");
    spirv!(RAYTRACE_RCHIT, "raytrace_rchit.spv");
}

/// SPIR-V magic number, first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Convert byte slice to aligned u32 Vec (SPIR-V requires 4-byte alignment).
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    assert!(
        bytes.len() % 4 == 0,
        "SPIR-V bytecode must be a whole number of words"
    );
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

macro_rules! shader_accessor {
    ($(#[$doc:meta])* $fn_name:ident, $bytes:ident) => {
        $(#[$doc])*
        pub fn $fn_name() -> &'static [u32] {
            static WORDS: OnceLock<Vec<u32>> = OnceLock::new();
            WORDS.get_or_init(|| bytes_to_spirv(spirv_bytes::$bytes))
        }
    };
}

shader_accessor!(
    /// Full-screen triangle synthesized from the vertex index.
    post_vertex_shader,
    POST_VERT
);
shader_accessor!(
    /// Tone mapper sampling the shared color target.
    post_fragment_shader,
    POST_FRAG
);
shader_accessor!(scanline_vertex_shader, SCANLINE_VERT);
shader_accessor!(scanline_fragment_shader, SCANLINE_FRAG);
shader_accessor!(
    /// Vertex-less quad placed by push constants.
    overlay_vertex_shader,
    OVERLAY_VERT
);
shader_accessor!(overlay_fragment_shader, OVERLAY_FRAG);
shader_accessor!(raygen_shader, RAYTRACE_RGEN);
shader_accessor!(miss_shader, RAYTRACE_RMISS);
shader_accessor!(closest_hit_shader, RAYTRACE_RCHIT);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_shader_is_spirv() {
        let shaders = [
            post_vertex_shader(),
            post_fragment_shader(),
            scanline_vertex_shader(),
            scanline_fragment_shader(),
            overlay_vertex_shader(),
            overlay_fragment_shader(),
            raygen_shader(),
            miss_shader(),
            closest_hit_shader(),
        ];
        for shader in shaders {
            assert_eq!(shader[0], SPIRV_MAGIC, "Invalid SPIR-V magic number");
            assert!(shader.len() > 5, "Shader too small");
        }
    }

    #[test]
    fn accessors_are_cached() {
        assert!(std::ptr::eq(post_vertex_shader(), post_vertex_shader()));
    }
}
