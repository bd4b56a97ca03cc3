//! Build script to compile GLSL shaders to SPIR-V.

use shaderc::{CompileOptions, Compiler, IncludeType, ResolvedInclude, ShaderKind};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const SHADERS: &[(&str, &str, ShaderKind)] = &[
    ("post.vert", "post_vert.spv", ShaderKind::Vertex),
    ("post.frag", "post_frag.spv", ShaderKind::Fragment),
    ("scanline.vert", "scanline_vert.spv", ShaderKind::Vertex),
    ("scanline.frag", "scanline_frag.spv", ShaderKind::Fragment),
    ("overlay.vert", "overlay_vert.spv", ShaderKind::Vertex),
    ("overlay.frag", "overlay_frag.spv", ShaderKind::Fragment),
    ("raytrace.rgen", "raytrace_rgen.spv", ShaderKind::RayGeneration),
    ("raytrace.rmiss", "raytrace_rmiss.spv", ShaderKind::Miss),
    ("raytrace.rchit", "raytrace_rchit.spv", ShaderKind::ClosestHit),
];

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let shader_dir = Path::new("shaders");

    println!("cargo:rerun-if-changed=shaders/");

    let compiler = Compiler::new().expect("Failed to create shader compiler");

    for (source, output, kind) in SHADERS {
        compile_shader(
            &compiler,
            shader_dir,
            &shader_dir.join(source),
            &out_dir.join(output),
            *kind,
        );
    }
}

fn compile_shader(
    compiler: &Compiler,
    shader_dir: &Path,
    input_path: &Path,
    output_path: &Path,
    kind: ShaderKind,
) {
    let source = fs::read_to_string(input_path)
        .unwrap_or_else(|e| panic!("Failed to read shader {input_path:?}: {e}"));

    let file_name = input_path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("Shader paths are UTF-8");

    let mut options = CompileOptions::new().expect("Failed to create compile options");
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );
    options.set_target_spirv(shaderc::SpirvVersion::V1_6);
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let include_dir = shader_dir.to_path_buf();
    options.set_include_callback(move |name, include_type, _source, _depth| {
        if !matches!(include_type, IncludeType::Relative) {
            return Err(format!("Only relative includes are supported: {name}"));
        }
        let path = include_dir.join(name);
        let content = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read include {path:?}: {e}"))?;
        Ok(ResolvedInclude {
            resolved_name: path.display().to_string(),
            content,
        })
    });

    let result = compiler
        .compile_into_spirv(&source, kind, file_name, "main", Some(&options))
        .unwrap_or_else(|e| panic!("Failed to compile shader {input_path:?}: {e}"));

    if result.get_num_warnings() > 0 {
        println!(
            "cargo:warning=Shader warnings in {input_path:?}: {}",
            result.get_warning_messages()
        );
    }

    fs::write(
        output_path,
        bytemuck::cast_slice::<u32, u8>(result.as_binary()),
    )
    .unwrap_or_else(|e| panic!("Failed to write shader {output_path:?}: {e}"));
}
