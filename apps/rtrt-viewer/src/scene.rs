//! Procedural demo scene: a ground plane with a few cubes on it.

use glam::{Mat4, Quat, Vec3};
use rtrt_render::{ObjectDesc, Vertex};

/// Indexed triangle mesh in host memory.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Axis-aligned cube centered on the origin, one quad per face so every
    /// face gets a flat normal.
    pub fn cube(half_extent: f32) -> Self {
        // (normal, u, v) with u x v == normal
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];

        let mut mesh = Self::default();
        for (normal, u, v) in faces {
            mesh.push_quad(normal * half_extent, u * half_extent, v * half_extent, normal);
        }
        mesh
    }

    /// Square in the XZ plane facing +Y.
    pub fn plane(half_extent: f32) -> Self {
        let mut mesh = Self::default();
        mesh.push_quad(
            Vec3::ZERO,
            Vec3::Z * half_extent,
            Vec3::X * half_extent,
            Vec3::Y,
        );
        mesh
    }

    fn push_quad(&mut self, center: Vec3, u: Vec3, v: Vec3, normal: Vec3) {
        let base = self.vertices.len() as u32;
        for corner in [-u - v, u - v, u + v, -u + v] {
            self.vertices.push(Vertex::new(center + corner, normal));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }
}

/// One placed mesh.
#[derive(Debug, Clone, Copy)]
pub struct SceneObject {
    pub mesh: usize,
    pub transform: Mat4,
    pub color: [f32; 4],
}

/// Everything the viewer draws.
#[derive(Debug, Clone)]
pub struct Scene {
    pub meshes: Vec<MeshData>,
    pub objects: Vec<SceneObject>,
    pub light_position: Vec3,
    pub light_intensity: f32,
    /// Point the camera orbits.
    pub focus: Vec3,
    pub camera_start: Vec3,
}

const PLANE_MESH: usize = 0;
const CUBE_MESH: usize = 1;

impl Scene {
    pub fn demo() -> Self {
        let meshes = vec![MeshData::plane(12.0), MeshData::cube(1.0)];

        let cube = |translation: Vec3, scale: f32, yaw_degrees: f32, color: [f32; 4]| SceneObject {
            mesh: CUBE_MESH,
            transform: Mat4::from_scale_rotation_translation(
                Vec3::splat(scale),
                Quat::from_rotation_y(yaw_degrees.to_radians()),
                translation,
            ),
            color,
        };

        let objects = vec![
            SceneObject {
                mesh: PLANE_MESH,
                transform: Mat4::IDENTITY,
                color: [0.55, 0.55, 0.52, 1.0],
            },
            cube(Vec3::new(0.0, 1.0, 0.0), 1.0, 20.0, [0.85, 0.25, 0.2, 1.0]),
            cube(Vec3::new(-3.2, 0.6, 1.5), 0.6, -35.0, [0.2, 0.6, 0.85, 1.0]),
            cube(Vec3::new(2.8, 1.5, -2.0), 1.5, 45.0, [0.3, 0.75, 0.35, 1.0]),
            cube(Vec3::new(1.6, 0.4, 2.6), 0.4, 10.0, [0.9, 0.8, 0.25, 1.0]),
        ];

        Self {
            meshes,
            objects,
            light_position: Vec3::new(10.0, 15.0, 8.0),
            light_intensity: 100.0,
            focus: Vec3::new(0.0, 1.0, 0.0),
            camera_start: Vec3::new(0.0, 5.0, 12.0),
        }
    }

    /// Shader-side object records, given the device addresses of each mesh's
    /// vertex and index buffers. Record `i` belongs to object `i`.
    pub fn object_descs(&self, mesh_addresses: &[(u64, u64)]) -> Vec<ObjectDesc> {
        self.objects
            .iter()
            .map(|object| {
                let (vertex_address, index_address) =
                    mesh_addresses.get(object.mesh).copied().unwrap_or_default();
                ObjectDesc {
                    vertex_address,
                    index_address,
                    color: object.color,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_outward_winding(mesh: &MeshData) {
        for tri in mesh.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| {
                let v = mesh.vertices[i as usize];
                (Vec3::from(v.position), Vec3::from(v.normal))
            });
            let face_normal = (b.0 - a.0).cross(c.0 - a.0);
            assert!(
                face_normal.dot(a.1) > 0.0,
                "triangle {tri:?} winds against its normal"
            );
        }
    }

    #[test]
    fn cube_has_six_flat_faces() {
        let cube = MeshData::cube(1.0);
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        for v in &cube.vertices {
            let p = Vec3::from(v.position);
            let n = Vec3::from(v.normal);
            approx::assert_relative_eq!(p.dot(n), 1.0);
        }
    }

    #[test]
    fn meshes_wind_counter_clockwise_from_outside() {
        assert_outward_winding(&MeshData::cube(0.5));
        assert_outward_winding(&MeshData::plane(3.0));
    }

    #[test]
    fn plane_faces_up() {
        let plane = MeshData::plane(2.0);
        assert!(plane.vertices.iter().all(|v| v.normal == [0.0, 1.0, 0.0]));
        assert!(plane.vertices.iter().all(|v| v.position[1] == 0.0));
    }

    #[test]
    fn demo_objects_reference_meshes() {
        let scene = Scene::demo();
        assert!(scene.objects.iter().all(|o| o.mesh < scene.meshes.len()));
    }

    #[test]
    fn object_descs_follow_object_order() {
        let scene = Scene::demo();
        let descs = scene.object_descs(&[(0x1000, 0x2000), (0x3000, 0x4000)]);
        assert_eq!(descs.len(), scene.objects.len());
        assert_eq!(descs[0].vertex_address, 0x1000);
        assert_eq!(descs[1].index_address, 0x4000);
        assert_eq!(descs[1].color, scene.objects[1].color);
    }
}
