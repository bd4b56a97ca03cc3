//! Acceleration structures for hardware ray tracing.
//!
//! Every mesh gets one triangle BLAS; a single TLAS references them through
//! instances whose custom index is the object index the hit shader uses to
//! look up its `ObjectDesc`. Builds are recorded into one temporary command
//! buffer and executed synchronously at setup time.

use ash::vk;
use rtrt_gpu::{GpuAllocator, GpuBuffer, GpuContext, GpuError, MemoryLocation, Result};
use rtrt_gpu::{RayTracingLoaders, TemporaryCommands};

/// Scratch addresses must be aligned to this for every known implementation.
const SCRATCH_ALIGNMENT: u64 = 256;

/// Geometry of one indexed triangle mesh already resident on the GPU.
///
/// Positions are three floats at the start of each vertex; indices are `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleMesh {
    pub vertex_address: vk::DeviceAddress,
    pub vertex_count: u32,
    pub vertex_stride: vk::DeviceSize,
    pub index_address: vk::DeviceAddress,
    pub index_count: u32,
}

impl TriangleMesh {
    /// Number of triangles in the mesh.
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    fn geometry(&self) -> vk::AccelerationStructureGeometryKHR<'static> {
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.vertex_address,
            })
            .vertex_stride(self.vertex_stride)
            .max_vertex(self.vertex_count.saturating_sub(1))
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.index_address,
            });

        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
    }
}

/// Placement of one BLAS in the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceDesc {
    /// Index into the BLAS list.
    pub mesh: usize,
    /// Column-major object-to-world transform.
    pub transform: [[f32; 4]; 4],
    /// Visible to the hit shader as `gl_InstanceCustomIndexEXT`.
    pub custom_index: u32,
}

/// Convert a column-major 4x4 matrix into the row-major 3x4 layout Vulkan
/// instances use. The projective row is dropped.
pub fn transform_matrix(columns: &[[f32; 4]; 4]) -> vk::TransformMatrixKHR {
    let mut matrix = [0.0f32; 12];
    for row in 0..3 {
        for (col, column) in columns.iter().enumerate() {
            matrix[row * 4 + col] = column[row];
        }
    }
    vk::TransformMatrixKHR { matrix }
}

/// Build the Vulkan instance record for `desc` pointing at `blas_address`.
pub fn instance_record(
    desc: &InstanceDesc,
    blas_address: vk::DeviceAddress,
) -> vk::AccelerationStructureInstanceKHR {
    vk::AccelerationStructureInstanceKHR {
        transform: transform_matrix(&desc.transform),
        instance_custom_index_and_mask: vk::Packed24_8::new(desc.custom_index, 0xFF),
        instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
            0,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: blas_address,
        },
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Storage for one acceleration structure.
struct AccelerationStorage {
    acceleration_structure: vk::AccelerationStructureKHR,
    buffer: GpuBuffer,
    device_address: vk::DeviceAddress,
}

impl AccelerationStorage {
    unsafe fn new(
        allocator: &mut GpuAllocator,
        loader: &ash::khr::acceleration_structure::Device,
        ty: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
        name: &str,
    ) -> Result<Self> {
        let mut buffer = allocator.create_buffer(
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.buffer)
            .offset(0)
            .size(size)
            .ty(ty);

        let acceleration_structure = match loader.create_acceleration_structure(&create_info, None)
        {
            Ok(handle) => handle,
            Err(e) => {
                allocator.free_buffer(&mut buffer)?;
                return Err(e.into());
            }
        };

        let address_info = vk::AccelerationStructureDeviceAddressInfoKHR::default()
            .acceleration_structure(acceleration_structure);
        let device_address = loader.get_acceleration_structure_device_address(&address_info);

        Ok(Self {
            acceleration_structure,
            buffer,
            device_address,
        })
    }

    unsafe fn destroy(
        mut self,
        loader: &ash::khr::acceleration_structure::Device,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        loader.destroy_acceleration_structure(self.acceleration_structure, None);
        allocator.free_buffer(&mut self.buffer)
    }
}

unsafe fn build_sizes(
    loader: &ash::khr::acceleration_structure::Device,
    ty: vk::AccelerationStructureTypeKHR,
    geometry: &vk::AccelerationStructureGeometryKHR<'_>,
    primitive_count: u32,
) -> vk::AccelerationStructureBuildSizesInfoKHR<'static> {
    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(ty)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(std::slice::from_ref(geometry));

    let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
    loader.get_acceleration_structure_build_sizes(
        vk::AccelerationStructureBuildTypeKHR::DEVICE,
        &build_info,
        &[primitive_count],
        &mut sizes,
    );
    sizes
}

unsafe fn record_build(
    loader: &ash::khr::acceleration_structure::Device,
    cmd: vk::CommandBuffer,
    ty: vk::AccelerationStructureTypeKHR,
    dst: vk::AccelerationStructureKHR,
    geometry: &vk::AccelerationStructureGeometryKHR<'_>,
    primitive_count: u32,
    scratch_address: vk::DeviceAddress,
) {
    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(ty)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .dst_acceleration_structure(dst)
        .geometries(std::slice::from_ref(geometry))
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: scratch_address,
        });

    let build_range = vk::AccelerationStructureBuildRangeInfoKHR::default()
        .primitive_count(primitive_count)
        .primitive_offset(0)
        .first_vertex(0)
        .transform_offset(0);

    loader.cmd_build_acceleration_structures(
        cmd,
        &[build_info],
        &[std::slice::from_ref(&build_range)],
    );
}

/// Make one build's writes visible to the next build, which reuses the scratch
/// buffer and may read the previous result.
unsafe fn record_build_barrier(device: &ash::Device, cmd: vk::CommandBuffer) {
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
        .dst_access_mask(
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
        );

    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::DependencyFlags::empty(),
        std::slice::from_ref(&barrier),
        &[],
        &[],
    );
}

/// Bottom-level acceleration structure over one triangle mesh.
pub struct Blas {
    storage: AccelerationStorage,
    mesh: TriangleMesh,
    build_scratch_size: vk::DeviceSize,
}

impl Blas {
    unsafe fn new(
        allocator: &mut GpuAllocator,
        loader: &ash::khr::acceleration_structure::Device,
        mesh: TriangleMesh,
        index: usize,
    ) -> Result<Self> {
        let sizes = build_sizes(
            loader,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            &mesh.geometry(),
            mesh.triangle_count(),
        );
        let storage = AccelerationStorage::new(
            allocator,
            loader,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            sizes.acceleration_structure_size,
            &format!("blas_{index}"),
        )?;

        Ok(Self {
            storage,
            mesh,
            build_scratch_size: sizes.build_scratch_size,
        })
    }

    /// Device address referenced by TLAS instances.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.storage.device_address
    }

    /// Triangles in the source mesh.
    pub fn triangle_count(&self) -> u32 {
        self.mesh.triangle_count()
    }
}

/// Top-level acceleration structure over every scene instance.
pub struct Tlas {
    storage: AccelerationStorage,
    instance_buffer: GpuBuffer,
    instance_count: u32,
    build_scratch_size: vk::DeviceSize,
}

impl Tlas {
    unsafe fn new(
        allocator: &mut GpuAllocator,
        loader: &ash::khr::acceleration_structure::Device,
        instances: &[vk::AccelerationStructureInstanceKHR],
    ) -> Result<Self> {
        let instance_size = std::mem::size_of::<vk::AccelerationStructureInstanceKHR>();
        let mut instance_buffer = allocator.create_buffer(
            (instance_size * instances.len()) as u64,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "tlas_instances",
        )?;

        let Some(ptr) = instance_buffer.mapped_ptr() else {
            allocator.free_buffer(&mut instance_buffer)?;
            return Err(GpuError::InvalidState(
                "Instance buffer not mapped".to_string(),
            ));
        };
        std::ptr::copy_nonoverlapping(
            instances.as_ptr().cast::<u8>(),
            ptr,
            instance_size * instances.len(),
        );

        let instance_count = instances.len() as u32;
        let geometry = Self::geometry(instance_buffer.device_address);
        let sizes = build_sizes(
            loader,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            &geometry,
            instance_count,
        );
        let storage = match AccelerationStorage::new(
            allocator,
            loader,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            sizes.acceleration_structure_size,
            "tlas",
        ) {
            Ok(storage) => storage,
            Err(e) => {
                allocator.free_buffer(&mut instance_buffer)?;
                return Err(e);
            }
        };

        Ok(Self {
            storage,
            instance_buffer,
            instance_count,
            build_scratch_size: sizes.build_scratch_size,
        })
    }

    fn geometry(instance_address: vk::DeviceAddress) -> vk::AccelerationStructureGeometryKHR<'static> {
        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: instance_address,
                    }),
            })
    }

    /// Handle bound to the ray tracing descriptor set.
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.storage.acceleration_structure
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

/// Every BLAS of the scene plus the TLAS over them.
pub struct SceneAccelerationStructure {
    blases: Vec<Blas>,
    tlas: Tlas,
}

impl SceneAccelerationStructure {
    /// Create and build acceleration structures for `meshes` placed by
    /// `instances`, blocking until the builds complete.
    pub fn build(
        gpu: &GpuContext,
        meshes: &[TriangleMesh],
        instances: &[InstanceDesc],
    ) -> Result<Self> {
        let loaders = gpu.ray_tracing().ok_or_else(|| {
            GpuError::ExtensionNotSupported("VK_KHR_acceleration_structure".to_string())
        })?;
        if instances.is_empty() {
            return Err(GpuError::InvalidState(
                "Scene has no instances".to_string(),
            ));
        }
        if let Some(bad) = instances.iter().find(|i| i.mesh >= meshes.len()) {
            return Err(GpuError::InvalidState(format!(
                "Instance references mesh {} of {}",
                bad.mesh,
                meshes.len()
            )));
        }

        let mut allocator = gpu.allocator().lock();
        let scene = unsafe { Self::create(&mut allocator, loaders, meshes, instances)? };

        let scratch_size = scene
            .blases
            .iter()
            .map(|b| b.build_scratch_size)
            .chain(std::iter::once(scene.tlas.build_scratch_size))
            .max()
            .unwrap_or(0);
        let scratch = allocator.create_buffer(
            scratch_size + SCRATCH_ALIGNMENT,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            "as_scratch",
        );
        let mut scratch = match scratch {
            Ok(scratch) => scratch,
            Err(e) => {
                unsafe { scene.destroy_with(loaders, &mut allocator)? };
                return Err(e);
            }
        };
        drop(allocator);

        let built = scene.record_and_submit(gpu, loaders, &scratch);

        let mut allocator = gpu.allocator().lock();
        allocator.free_buffer(&mut scratch)?;
        if let Err(e) = built {
            unsafe { scene.destroy_with(loaders, &mut allocator)? };
            return Err(e);
        }

        tracing::info!(
            blas_count = scene.blases.len(),
            instance_count = scene.tlas.instance_count,
            triangles = scene.blases.iter().map(Blas::triangle_count).sum::<u32>(),
            "Built scene acceleration structures"
        );
        Ok(scene)
    }

    unsafe fn create(
        allocator: &mut GpuAllocator,
        loaders: &RayTracingLoaders,
        meshes: &[TriangleMesh],
        instances: &[InstanceDesc],
    ) -> Result<Self> {
        let loader = &loaders.acceleration_structure;
        let mut blases = Vec::with_capacity(meshes.len());
        for (index, mesh) in meshes.iter().enumerate() {
            match Blas::new(allocator, loader, *mesh, index) {
                Ok(blas) => blases.push(blas),
                Err(e) => {
                    for blas in blases {
                        blas.storage.destroy(loader, allocator)?;
                    }
                    return Err(e);
                }
            }
        }

        let records: Vec<_> = instances
            .iter()
            .map(|desc| instance_record(desc, blases[desc.mesh].device_address()))
            .collect();

        match Tlas::new(allocator, loader, &records) {
            Ok(tlas) => Ok(Self { blases, tlas }),
            Err(e) => {
                for blas in blases {
                    blas.storage.destroy(loader, allocator)?;
                }
                Err(e)
            }
        }
    }

    fn record_and_submit(
        &self,
        gpu: &GpuContext,
        loaders: &RayTracingLoaders,
        scratch: &GpuBuffer,
    ) -> Result<()> {
        let loader = &loaders.acceleration_structure;
        let scratch_address = align_up(scratch.device_address, SCRATCH_ALIGNMENT);
        let commands = TemporaryCommands::begin(gpu)?;
        let cmd = commands.handle();

        unsafe {
            for blas in &self.blases {
                record_build(
                    loader,
                    cmd,
                    vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
                    blas.storage.acceleration_structure,
                    &blas.mesh.geometry(),
                    blas.mesh.triangle_count(),
                    scratch_address,
                );
                record_build_barrier(gpu.device(), cmd);
            }

            record_build(
                loader,
                cmd,
                vk::AccelerationStructureTypeKHR::TOP_LEVEL,
                self.tlas.storage.acceleration_structure,
                &Tlas::geometry(self.tlas.instance_buffer.device_address),
                self.tlas.instance_count,
                scratch_address,
            );
        }

        commands.submit_and_wait()
    }

    /// The TLAS, for descriptor binding.
    pub fn tlas(&self) -> &Tlas {
        &self.tlas
    }

    pub fn blases(&self) -> &[Blas] {
        &self.blases
    }

    unsafe fn destroy_with(
        self,
        loaders: &RayTracingLoaders,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        let loader = &loaders.acceleration_structure;
        let mut tlas = self.tlas;
        tlas.storage.destroy(loader, allocator)?;
        allocator.free_buffer(&mut tlas.instance_buffer)?;
        for blas in self.blases {
            blas.storage.destroy(loader, allocator)?;
        }
        Ok(())
    }

    /// Destroy every acceleration structure and free its memory.
    ///
    /// # Safety
    /// The structures must not be in use by the GPU.
    pub unsafe fn destroy(self, gpu: &GpuContext) -> Result<()> {
        let loaders = gpu.ray_tracing().ok_or_else(|| {
            GpuError::InvalidState("Ray tracing loaders missing at destroy".to_string())
        })?;
        let mut allocator = gpu.allocator().lock();
        self.destroy_with(loaders, &mut allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translation(x: f32, y: f32, z: f32) -> [[f32; 4]; 4] {
        [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [x, y, z, 1.0],
        ]
    }

    #[test]
    fn instance_size_matches_vulkan() {
        assert_eq!(
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(),
            64
        );
    }

    #[test]
    fn transform_is_row_major_with_translation_last() {
        let m = transform_matrix(&translation(1.0, 2.0, 3.0));
        assert_eq!(
            m.matrix,
            [1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 3.0]
        );
    }

    #[test]
    fn instance_carries_custom_index_and_blas_address() {
        let desc = InstanceDesc {
            mesh: 0,
            transform: translation(0.0, 0.0, 0.0),
            custom_index: 5,
        };
        let record = instance_record(&desc, 0xABC0);
        assert_eq!(record.instance_custom_index_and_mask.low_24(), 5);
        assert_eq!(record.instance_custom_index_and_mask.high_8(), 0xFF);
        assert_eq!(
            unsafe { record.acceleration_structure_reference.device_handle },
            0xABC0
        );
    }

    #[test]
    fn triangle_count_from_indices() {
        let mesh = TriangleMesh {
            vertex_address: 0,
            vertex_count: 24,
            vertex_stride: 24,
            index_address: 0,
            index_count: 36,
        };
        assert_eq!(mesh.triangle_count(), 12);
    }

    #[test]
    fn scratch_alignment() {
        assert_eq!(align_up(1, SCRATCH_ALIGNMENT), 256);
        assert_eq!(align_up(256, SCRATCH_ALIGNMENT), 256);
        assert_eq!(align_up(257, SCRATCH_ALIGNMENT), 512);
    }
}
