//! Hardware ray tracing resources for the rtrt renderer.
//!
//! This crate builds the setup-time side of the ray-trace path using:
//! - `VK_KHR_acceleration_structure` for per-mesh triangle BLAS and a TLAS
//! - `VK_KHR_ray_tracing_pipeline` for the pipeline and shader binding table
//!
//! Per-frame recording of the trace dispatch lives in `rtrt-render`.

pub mod acceleration;
pub mod ray_trace;
pub mod sbt;

pub use acceleration::{
    instance_record, transform_matrix, Blas, InstanceDesc, SceneAccelerationStructure, Tlas,
    TriangleMesh,
};
pub use ray_trace::{RayTraceBindings, RayTraceDescriptors, RayTracePipeline, RayTracePushConstants};
pub use sbt::{SbtLayout, ShaderBindingTable};
